pub mod config;
pub mod error;
pub mod handlers;
pub mod server;

pub use config::{AppConfig, ConfigError, Deployment, LimitsConfig};
pub use error::ApiError;
pub use server::{build_router, start, AppState, ServerConfig, ServerError, ServerHandle};

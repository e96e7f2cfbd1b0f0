pub mod database;
pub mod error;
pub mod row_helpers;
pub mod schema;
pub mod session_store;
pub mod sessions;

pub use database::Database;
pub use error::StoreError;
pub use session_store::SessionStore;
pub use sessions::SessionRepo;

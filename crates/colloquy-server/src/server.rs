use std::net::SocketAddr;
use std::sync::Arc;

use axum::http::HeaderValue;
use axum::routing::{get, post};
use axum::Router;
use tokio::sync::oneshot;
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use colloquy_engine::ChatService;

use crate::config::Deployment;
use crate::handlers;

/// Server configuration.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub cors_origins: Vec<String>,
    pub deployment: Deployment,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: 8000,
            cors_origins: vec!["http://localhost:3000".into()],
            deployment: Deployment::default(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("invalid CORS origin {0:?}")]
    InvalidOrigin(String),

    #[error("failed to bind listener: {0}")]
    Bind(#[from] std::io::Error),
}

/// Shared application state passed to Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<ChatService>,
    pub deployment: Deployment,
}

/// Build the Axum router with all routes.
///
/// No request-level timeout layer: a chat turn bounds itself and answers
/// with an `ApiError` body, and the handler must not be cancelled mid-commit.
pub fn build_router(state: AppState, cors: CorsLayer) -> Router {
    Router::new()
        .route("/", get(handlers::root))
        .route("/health", get(handlers::health))
        .route("/chat", post(handlers::chat))
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

/// Exact-origin CORS with credentials. Methods and headers mirror the
/// preflight request, since wildcards are not allowed alongside credentials.
pub fn cors_layer(origins: &[String]) -> Result<CorsLayer, ServerError> {
    let origins = origins
        .iter()
        .map(|o| HeaderValue::from_str(o).map_err(|_| ServerError::InvalidOrigin(o.clone())))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods(AllowMethods::mirror_request())
        .allow_headers(AllowHeaders::mirror_request())
        .allow_credentials(true))
}

/// Bind and serve. Returns a handle to shut the server down.
pub async fn start(config: ServerConfig, service: Arc<ChatService>) -> Result<ServerHandle, ServerError> {
    let cors = cors_layer(&config.cors_origins)?;
    let state = AppState {
        service,
        deployment: config.deployment,
    };
    let router = build_router(state, cors);

    let listener = tokio::net::TcpListener::bind((config.host.as_str(), config.port)).await?;
    let local_addr = listener.local_addr()?;

    info!(addr = %local_addr, deployment = ?config.deployment, "colloquy server started");

    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let server = tokio::spawn(async move {
        let shutdown = async {
            let _ = shutdown_rx.await;
        };
        if let Err(e) = axum::serve(listener, router)
            .with_graceful_shutdown(shutdown)
            .await
        {
            error!(error = %e, "server terminated");
        }
    });

    Ok(ServerHandle {
        port: local_addr.port(),
        addr: local_addr,
        shutdown: shutdown_tx,
        server,
    })
}

/// Handle returned by `start()`; keeps the serve task alive.
pub struct ServerHandle {
    pub port: u16,
    pub addr: SocketAddr,
    shutdown: oneshot::Sender<()>,
    server: tokio::task::JoinHandle<()>,
}

impl ServerHandle {
    /// Stop accepting connections and wait for in-flight requests.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(());
        if let Err(e) = self.server.await {
            error!(error = %e, "server task failed");
        }
        info!("colloquy server stopped");
    }
}

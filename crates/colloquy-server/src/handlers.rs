//! HTTP handlers.

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::Json;
use serde_json::{json, Value};
use tracing::{error, warn};

use colloquy_engine::{ChatReply, ChatRequest};

use crate::error::ApiError;
use crate::server::AppState;

/// Liveness banner.
pub async fn root() -> Json<Value> {
    Json(json!({ "message": "Chat API is running!" }))
}

pub async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "agent": state.service.agent_name(),
    }))
}

/// Run one chat turn. Malformed bodies are rejected with `invalid_request`
/// rather than axum's default plain-text rejection.
pub async fn chat(
    State(state): State<AppState>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<ChatReply>, ApiError> {
    let Json(request) = payload.map_err(|rejection| {
        warn!(reason = %rejection.body_text(), "rejected chat request body");
        ApiError::invalid_request(&rejection, state.deployment)
    })?;

    match state.service.handle(request).await {
        Ok(reply) => Ok(Json(reply)),
        Err(e) => {
            if e.is_client_error() {
                warn!(kind = e.kind(), error = %e, "chat request rejected");
            } else {
                let cause = std::error::Error::source(&e).map(ToString::to_string);
                error!(kind = e.kind(), error = %e, cause = ?cause, "chat request failed");
            }
            Err(ApiError::from_chat(&e, state.deployment))
        }
    }
}

use std::error::Error;

use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use colloquy_engine::ChatError;

use crate::config::Deployment;

/// HTTP rendering of a failed request.
///
/// The body is `{"error": {"kind", "message", "detail"?}}`; `detail` lists
/// the underlying causes and is only filled in development deployments.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    body: ErrorBody,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    kind: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<Vec<String>>,
}

impl ApiError {
    pub fn from_chat(err: &ChatError, deployment: Deployment) -> Self {
        let status = if err.is_client_error() {
            StatusCode::BAD_REQUEST
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        };
        Self {
            status,
            body: ErrorBody {
                kind: err.kind(),
                message: err.to_string(),
                detail: deployment
                    .exposes_detail()
                    .then(|| source_chain(err))
                    .filter(|chain| !chain.is_empty()),
            },
        }
    }

    pub fn invalid_request(rejection: &JsonRejection, deployment: Deployment) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            body: ErrorBody {
                kind: "invalid_request",
                message: "request body must be JSON with a string \"message\" field".into(),
                detail: deployment
                    .exposes_detail()
                    .then(|| vec![rejection.body_text()]),
            },
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn kind(&self) -> &'static str {
        self.body.kind
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({ "error": self.body });
        (self.status, Json(body)).into_response()
    }
}

fn source_chain(err: &dyn Error) -> Vec<String> {
    let mut chain = Vec::new();
    let mut current = err.source();
    while let Some(cause) = current {
        chain.push(cause.to_string());
        current = cause.source();
    }
    chain
}

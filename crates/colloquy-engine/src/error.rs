use colloquy_core::errors::GatewayError;
use colloquy_core::ids::SessionIdError;
use colloquy_store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("message must not be empty")]
    EmptyMessage,

    #[error("invalid session id")]
    InvalidSessionId(#[from] SessionIdError),

    #[error("session storage unavailable")]
    StorageUnavailable(#[from] StoreError),

    #[error("conversation engine failed")]
    EngineFailure(#[from] GatewayError),
}

impl ChatError {
    /// Stable classification string, used as the `kind` of error payloads.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::EmptyMessage => "empty_message",
            Self::InvalidSessionId(_) => "invalid_session_id",
            Self::StorageUnavailable(_) => "storage_unavailable",
            Self::EngineFailure(_) => "engine_failure",
        }
    }

    /// Whether the caller, rather than a dependency, is at fault.
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::EmptyMessage | Self::InvalidSessionId(_))
    }
}

use std::future::Future;
use std::time::Duration;

use colloquy_store::StoreError;

use crate::error::ChatError;

const DEFAULT_STORAGE_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(60);
const DEFAULT_TURN_TIMEOUT: Duration = Duration::from_secs(180);

/// Upper bounds on every wait a turn can perform.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TurnLimits {
    /// Per store call.
    pub storage_timeout: Duration,
    /// Per engine pull, including the initial `run`.
    pub idle_timeout: Duration,
    /// Everything after resolution: `run`, every pull and the commit.
    pub turn_timeout: Duration,
}

impl Default for TurnLimits {
    fn default() -> Self {
        Self {
            storage_timeout: DEFAULT_STORAGE_TIMEOUT,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            turn_timeout: DEFAULT_TURN_TIMEOUT,
        }
    }
}

/// Run a store call under `limit`; both a store error and an elapsed
/// deadline surface as `StorageUnavailable`.
///
/// An elapsed deadline abandons the wait, not the blocking call behind it,
/// so this is only for idempotent calls. Turn commits bound themselves.
pub(crate) async fn bounded_store<T>(
    limit: Duration,
    call: impl Future<Output = Result<T, StoreError>>,
) -> Result<T, ChatError> {
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result.map_err(ChatError::from),
        Err(_) => Err(StoreError::Timeout(limit).into()),
    }
}

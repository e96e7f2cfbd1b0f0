use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, instrument};

use colloquy_core::ids::SessionId;
use colloquy_core::session::{Session, SessionKey};
use colloquy_store::SessionStore;

use crate::error::ChatError;
use crate::limits::bounded_store;

/// Outcome of resolving a request's session.
#[derive(Clone, Debug)]
pub struct Resolved {
    pub session: Session,
    /// True for exactly one caller per (app, user, session id).
    pub is_new: bool,
}

/// Maps an optional client-supplied session id to a persisted session,
/// creating it on first sight.
#[derive(Clone)]
pub struct SessionResolver {
    store: Arc<dyn SessionStore>,
    storage_timeout: Duration,
}

impl SessionResolver {
    pub fn new(store: Arc<dyn SessionStore>, storage_timeout: Duration) -> Self {
        Self {
            store,
            storage_timeout,
        }
    }

    #[instrument(skip(self))]
    pub async fn resolve(
        &self,
        app_name: &str,
        user_id: &str,
        requested: Option<&str>,
    ) -> Result<Resolved, ChatError> {
        // An empty id is treated the same as an omitted one.
        let session_id = match requested.filter(|raw| !raw.is_empty()) {
            Some(raw) => SessionId::parse(raw)?,
            None => SessionId::new(),
        };
        let key = SessionKey::new(app_name, user_id, session_id);

        let (session, is_new) =
            bounded_store(self.storage_timeout, self.store.get_or_create_session(&key)).await?;

        if is_new {
            info!(session_id = %key.session_id, "session created");
        } else {
            debug!(session_id = %key.session_id, turns = session.turns.len(), "session found");
        }
        Ok(Resolved { session, is_new })
    }
}

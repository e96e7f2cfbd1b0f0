use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};

use colloquy_core::session::{PendingTurn, Session, SessionKey, Turn};
use colloquy_store::{Database, SessionRepo, SessionStore, StoreError};

pub(crate) fn repo() -> SessionRepo {
    SessionRepo::new(Database::in_memory().unwrap())
}

/// Which store calls misbehave.
#[derive(Clone, Copy, Debug)]
pub(crate) enum Fault {
    /// Every call fails.
    Everything,
    /// Only `append_turn` fails.
    Append,
    /// `get_or_create_session` sleeps before answering.
    SlowLookup(Duration),
}

/// Store wrapper that injects failures and counts calls.
pub(crate) struct FaultyStore {
    pub inner: SessionRepo,
    fault: Fault,
    calls: AtomicUsize,
}

impl FaultyStore {
    pub fn new(fault: Fault) -> Arc<Self> {
        Arc::new(Self {
            inner: repo(),
            fault,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }

    fn outage(&self) -> Result<(), StoreError> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        match self.fault {
            Fault::Everything => Err(StoreError::Database("database is locked".into())),
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl SessionStore for FaultyStore {
    async fn get_session(&self, key: &SessionKey) -> Result<Option<Session>, StoreError> {
        self.outage()?;
        SessionStore::get_session(&self.inner, key).await
    }

    async fn create_session(
        &self,
        key: &SessionKey,
        state: Map<String, Value>,
    ) -> Result<Session, StoreError> {
        self.outage()?;
        SessionStore::create_session(&self.inner, key, state).await
    }

    async fn get_or_create_session(&self, key: &SessionKey) -> Result<(Session, bool), StoreError> {
        self.outage()?;
        if let Fault::SlowLookup(delay) = self.fault {
            tokio::time::sleep(delay).await;
        }
        SessionStore::get_or_create_session(&self.inner, key).await
    }

    async fn append_turn(
        &self,
        key: &SessionKey,
        turn: PendingTurn,
        budget: Duration,
    ) -> Result<Turn, StoreError> {
        self.outage()?;
        if let Fault::Append = self.fault {
            return Err(StoreError::Io("disk full".into()));
        }
        SessionStore::append_turn(&self.inner, key, turn, budget).await
    }

    async fn update_state(
        &self,
        key: &SessionKey,
        delta: Map<String, Value>,
    ) -> Result<Map<String, Value>, StoreError> {
        self.outage()?;
        SessionStore::update_state(&self.inner, key, delta).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use colloquy_core::event::Event;
    use colloquy_core::ids::SessionId;
    use colloquy_core::messages::Content;
    use serde_json::json;

    #[tokio::test]
    async fn healthy_fault_modes_delegate_every_call() {
        let store = FaultyStore::new(Fault::SlowLookup(Duration::ZERO));
        let key = SessionKey::new("assistant", "user", SessionId::from_raw("s1"));

        let (_, created) = store.get_or_create_session(&key).await.unwrap();
        assert!(created);

        let turn = PendingTurn {
            message: Content::user_text("hi"),
            events: vec![Event::text("assistant", &["hello"])],
            reply: "hello".into(),
        };
        let stored = store
            .append_turn(&key, turn, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(stored.sequence, 0);

        let mut delta = Map::new();
        delta.insert("topic".into(), json!("greeting"));
        let state = store.update_state(&key, delta).await.unwrap();
        assert_eq!(state["topic"], "greeting");

        let session = store.get_session(&key).await.unwrap().unwrap();
        assert_eq!(session.turns.len(), 1);
        assert_eq!(store.calls(), 4);
    }
}

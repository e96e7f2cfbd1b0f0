//! Async persistence interface consumed by the conversation core.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};

use colloquy_core::session::{PendingTurn, Session, SessionKey, Turn};

use crate::error::StoreError;
use crate::sessions::SessionRepo;

/// Session persistence. "Not found" is a normal `Ok(None)`, never an error.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn get_session(&self, key: &SessionKey) -> Result<Option<Session>, StoreError>;

    async fn create_session(
        &self,
        key: &SessionKey,
        state: Map<String, Value>,
    ) -> Result<Session, StoreError>;

    /// Atomic lookup-or-insert keyed by (app, user, session id).
    async fn get_or_create_session(&self, key: &SessionKey) -> Result<(Session, bool), StoreError>;

    /// Commit a finished turn. The write either lands within `budget` or
    /// not at all: on `Timeout` nothing was stored and nothing is pending.
    async fn append_turn(
        &self,
        key: &SessionKey,
        turn: PendingTurn,
        budget: Duration,
    ) -> Result<Turn, StoreError>;

    async fn update_state(
        &self,
        key: &SessionKey,
        delta: Map<String, Value>,
    ) -> Result<Map<String, Value>, StoreError>;
}

impl SessionRepo {
    async fn blocking<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(SessionRepo) -> Result<T, StoreError> + Send + 'static,
    {
        let repo = self.clone();
        tokio::task::spawn_blocking(move || f(repo))
            .await
            .map_err(|e| StoreError::Database(format!("blocking task failed: {e}")))?
    }
}

#[async_trait]
impl SessionStore for SessionRepo {
    async fn get_session(&self, key: &SessionKey) -> Result<Option<Session>, StoreError> {
        let key = key.clone();
        self.blocking(move |repo| repo.get(&key)).await
    }

    async fn create_session(
        &self,
        key: &SessionKey,
        state: Map<String, Value>,
    ) -> Result<Session, StoreError> {
        let key = key.clone();
        self.blocking(move |repo| repo.create(&key, state)).await
    }

    async fn get_or_create_session(&self, key: &SessionKey) -> Result<(Session, bool), StoreError> {
        let key = key.clone();
        self.blocking(move |repo| repo.get_or_create(&key)).await
    }

    async fn append_turn(
        &self,
        key: &SessionKey,
        turn: PendingTurn,
        budget: Duration,
    ) -> Result<Turn, StoreError> {
        let key = key.clone();
        self.blocking(move |repo| repo.append_turn(&key, turn, budget)).await
    }

    async fn update_state(
        &self,
        key: &SessionKey,
        delta: Map<String, Value>,
    ) -> Result<Map<String, Value>, StoreError> {
        let key = key.clone();
        self.blocking(move |repo| repo.update_state(&key, delta)).await
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::event::Event;
use crate::ids::SessionId;
use crate::messages::Content;

/// Identity of a session: unique per (app, user).
#[derive(Clone, Debug, Hash, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionKey {
    pub app_name: String,
    pub user_id: String,
    pub session_id: SessionId,
}

impl SessionKey {
    pub fn new(
        app_name: impl Into<String>,
        user_id: impl Into<String>,
        session_id: SessionId,
    ) -> Self {
        Self {
            app_name: app_name.into(),
            user_id: user_id.into(),
            session_id,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub key: SessionKey,
    pub state: Map<String, Value>,
    pub turns: Vec<Turn>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    pub fn id(&self) -> &SessionId {
        &self.key.session_id
    }
}

/// A committed request/response exchange.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub sequence: i64,
    pub message: Content,
    pub events: Vec<Event>,
    pub reply: String,
    pub created_at: DateTime<Utc>,
}

/// A finished turn waiting to be appended; the store assigns sequence
/// and timestamp.
#[derive(Clone, Debug)]
pub struct PendingTurn {
    pub message: Content,
    pub events: Vec<Event>,
    pub reply: String,
}

impl PendingTurn {
    /// State changes carried by the turn's events, later keys winning.
    pub fn state_delta(&self) -> Map<String, Value> {
        let mut merged = Map::new();
        for event in &self.events {
            for (k, v) in &event.state_delta {
                merged.insert(k.clone(), v.clone());
            }
        }
        merged
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::ids::EventId;
use crate::messages::Content;

/// One unit emitted by the engine while producing a turn.
///
/// The body is classified once, when the event is built, so consumers
/// match on [`EventBody`] instead of probing optional fields.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub author: String,
    pub body: EventBody,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub state_delta: Map<String, Value>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventBody {
    /// Content with parts. Holds the text parts in emission order; may be
    /// empty when every part was non-text.
    Fragments { fragments: Vec<String> },
    /// Content present but carrying no parts at all.
    Opaque { repr: String },
    Empty,
}

impl Event {
    pub fn new(author: impl Into<String>, body: EventBody) -> Self {
        Self {
            id: EventId::new(),
            author: author.into(),
            body,
            state_delta: Map::new(),
            timestamp: Utc::now(),
        }
    }

    /// Classify engine output into a body.
    pub fn from_content(author: impl Into<String>, content: Option<&Content>) -> Self {
        let body = match content {
            None => EventBody::Empty,
            Some(c) if c.parts.is_empty() => EventBody::Opaque {
                repr: serde_json::to_string(c).unwrap_or_else(|_| format!("{c:?}")),
            },
            Some(c) => EventBody::Fragments {
                fragments: c.texts().map(str::to_owned).collect(),
            },
        };
        Self::new(author, body)
    }

    pub fn text(author: impl Into<String>, fragments: &[&str]) -> Self {
        Self::new(
            author,
            EventBody::Fragments {
                fragments: fragments.iter().map(|f| (*f).to_owned()).collect(),
            },
        )
    }

    pub fn empty(author: impl Into<String>) -> Self {
        Self::new(author, EventBody::Empty)
    }

    pub fn with_state_delta(mut self, delta: Map<String, Value>) -> Self {
        self.state_delta = delta;
        self
    }

    /// Whether folding this event contributes anything to a reply.
    pub fn has_content(&self) -> bool {
        match &self.body {
            EventBody::Fragments { fragments } => !fragments.is_empty(),
            EventBody::Opaque { .. } => true,
            EventBody::Empty => false,
        }
    }
}

use serde_json::{Map, Value};

use crate::messages::Content;
use crate::session::{Session, SessionKey, Turn};

/// Everything an engine gets for one turn: the session's accumulated
/// context plus the new inbound message.
#[derive(Clone, Debug)]
pub struct TurnContext {
    pub key: SessionKey,
    pub history: Vec<Turn>,
    pub state: Map<String, Value>,
    pub message: Content,
}

impl TurnContext {
    pub fn new(session: &Session, message: Content) -> Self {
        Self {
            key: session.key.clone(),
            history: session.turns.clone(),
            state: session.state.clone(),
            message,
        }
    }

    /// History flattened into alternating user/model messages, followed by
    /// the new message. Turns with an empty reply contribute only the
    /// user side.
    pub fn conversation(&self) -> Vec<Content> {
        let mut out = Vec::with_capacity(self.history.len() * 2 + 1);
        for turn in &self.history {
            out.push(turn.message.clone());
            if !turn.reply.is_empty() {
                out.push(Content::model_text(&turn.reply));
            }
        }
        out.push(self.message.clone());
        out
    }
}

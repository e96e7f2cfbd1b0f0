use std::sync::Arc;
use std::time::Duration;

use futures::{Stream, StreamExt};
use tokio::time::Instant;
use tracing::{debug, instrument, warn};

use colloquy_core::context::TurnContext;
use colloquy_core::engine::{ConversationEngine, EventStream};
use colloquy_core::errors::GatewayError;
use colloquy_core::event::Event;
use colloquy_core::messages::Content;
use colloquy_core::session::{PendingTurn, Session, SessionKey, Turn};
use colloquy_store::SessionStore;

use crate::aggregator::ResponseAggregator;
use crate::error::ChatError;
use crate::limits::TurnLimits;

/// One user message to submit against a resolved session.
#[derive(Clone, Debug)]
pub struct TurnRequest {
    pub message: String,
}

/// Submits user messages to the conversation engine.
#[derive(Clone)]
pub struct TurnDispatcher {
    engine: Arc<dyn ConversationEngine>,
    store: Arc<dyn SessionStore>,
    limits: TurnLimits,
}

impl TurnDispatcher {
    pub fn new(
        engine: Arc<dyn ConversationEngine>,
        store: Arc<dyn SessionStore>,
        limits: TurnLimits,
    ) -> Self {
        Self {
            engine,
            store,
            limits,
        }
    }

    pub fn engine(&self) -> &dyn ConversationEngine {
        self.engine.as_ref()
    }

    /// Start a turn. The turn's deadline (`turn_timeout`) starts now and
    /// covers `run`, every pull and the final commit.
    #[instrument(
        skip(self, session, request),
        fields(session_id = %session.id(), engine = self.engine.name(), model = self.engine.model())
    )]
    pub async fn dispatch(
        &self,
        session: &Session,
        request: TurnRequest,
    ) -> Result<TurnStream, ChatError> {
        let deadline = Instant::now() + self.limits.turn_timeout;
        let message = Content::user_text(request.message);
        let context = TurnContext::new(session, message.clone());

        let (bound, limit) = wait_bound(&self.limits, deadline);
        let events = match tokio::time::timeout(bound, self.engine.run(context)).await {
            Ok(result) => result?,
            Err(_) => return Err(GatewayError::Timeout(limit).into()),
        };
        debug!(history = session.turns.len(), "turn dispatched");

        Ok(TurnStream {
            key: session.key.clone(),
            message,
            events,
            yielded: Vec::new(),
            store: Arc::clone(&self.store),
            limits: self.limits,
            deadline,
            finished: false,
            committed: None,
        })
    }
}

/// How long the next wait may take, and the limit to report if it elapses:
/// the idle bound, or whatever is left of the turn if that is shorter.
fn wait_bound(limits: &TurnLimits, deadline: Instant) -> (Duration, Duration) {
    let remaining = deadline.saturating_duration_since(Instant::now());
    if remaining < limits.idle_timeout {
        (remaining, limits.turn_timeout)
    } else {
        (limits.idle_timeout, limits.idle_timeout)
    }
}

/// Lazily pulls the engine's events for one turn.
///
/// Single-pass. When the engine finishes normally the turn is appended to
/// the session before `next` reports the end; a turn that fails, times out
/// or is dropped early is never recorded.
///
/// The commit is never abandoned midway: the store is given whatever
/// budget is left and either commits within it or rolls back, and `next`
/// reports that real outcome.
pub struct TurnStream {
    key: SessionKey,
    message: Content,
    events: EventStream,
    yielded: Vec<Event>,
    store: Arc<dyn SessionStore>,
    limits: TurnLimits,
    deadline: Instant,
    finished: bool,
    committed: Option<Turn>,
}

impl TurnStream {
    pub async fn next(&mut self) -> Option<Result<Event, ChatError>> {
        if self.finished {
            return None;
        }

        let (bound, limit) = wait_bound(&self.limits, self.deadline);
        match tokio::time::timeout(bound, self.events.next()).await {
            Ok(Some(Ok(event))) => {
                self.yielded.push(event.clone());
                Some(Ok(event))
            }
            Ok(Some(Err(e))) => {
                self.finished = true;
                warn!(session_id = %self.key.session_id, kind = e.error_kind(), error = %e, "engine stream failed");
                Some(Err(e.into()))
            }
            Ok(None) => {
                self.finished = true;
                match self.commit().await {
                    Ok(turn) => {
                        self.committed = Some(turn);
                        None
                    }
                    Err(e) => Some(Err(e)),
                }
            }
            Err(_) => {
                self.finished = true;
                warn!(session_id = %self.key.session_id, ?limit, "engine stream timed out");
                Some(Err(GatewayError::Timeout(limit).into()))
            }
        }
    }

    /// The stored turn, once the stream has ended normally.
    pub fn committed(&self) -> Option<&Turn> {
        self.committed.as_ref()
    }

    pub fn into_stream(self) -> impl Stream<Item = Result<Event, ChatError>> + Send {
        futures::stream::unfold(self, |mut turn| async move {
            let item = turn.next().await?;
            Some((item, turn))
        })
    }

    async fn commit(&mut self) -> Result<Turn, ChatError> {
        let events = std::mem::take(&mut self.yielded);
        let mut aggregator = ResponseAggregator::new();
        for event in &events {
            aggregator.push(event);
        }

        let pending = PendingTurn {
            message: self.message.clone(),
            reply: aggregator.text().to_string(),
            events,
        };
        let remaining = self.deadline.saturating_duration_since(Instant::now());
        let budget = self.limits.storage_timeout.min(remaining);
        let turn = self.store.append_turn(&self.key, pending, budget).await?;

        debug!(
            session_id = %self.key.session_id,
            sequence = turn.sequence,
            events = turn.events.len(),
            content_events = turn.events.iter().filter(|e| e.has_content()).count(),
            "turn recorded"
        );
        Ok(turn)
    }
}

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

use crate::context::TurnContext;
use crate::errors::GatewayError;
use crate::event::Event;

/// Ordered, finite, single-pass sequence of events for one turn.
/// An `Err` item ends the turn.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<Event, GatewayError>> + Send>>;

/// The generation engine behind the service (Gemini, a mock, ...).
///
/// `run` returns as soon as the engine has accepted the turn; events are
/// produced as the caller pulls them.
#[async_trait]
pub trait ConversationEngine: Send + Sync {
    fn name(&self) -> &str;
    fn model(&self) -> &str;

    async fn run(&self, context: TurnContext) -> Result<EventStream, GatewayError>;
}

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::{stream, StreamExt};
use parking_lot::Mutex;

use colloquy_core::context::TurnContext;
use colloquy_core::engine::{ConversationEngine, EventStream};
use colloquy_core::errors::GatewayError;
use colloquy_core::event::Event;

/// Pre-programmed responses for deterministic testing without API calls.
#[derive(Clone, Debug)]
pub enum MockResponse {
    /// Yield a sequence of events, then end.
    Events(Vec<Event>),
    /// Fail the `run` call itself.
    Error(GatewayError),
    /// Yield some events, then a stream error.
    FailAfter(Vec<Event>, GatewayError),
    /// Yield some events, then never produce another item.
    Stall(Vec<Event>),
    /// Yield each event after waiting the given interval.
    Paced(Duration, Vec<Event>),
    /// Wait a duration, then resolve the inner response.
    Delay(Duration, Box<MockResponse>),
}

impl MockResponse {
    /// One event per fragment, all authored by `author`.
    pub fn text(author: &str, fragments: &[&str]) -> Self {
        Self::Events(
            fragments
                .iter()
                .map(|f| Event::text(author, &[*f]))
                .collect(),
        )
    }

    pub fn delayed(delay: Duration, inner: MockResponse) -> Self {
        Self::Delay(delay, Box::new(inner))
    }
}

/// Mock engine that hands out pre-programmed responses in order.
/// Every context it receives is recorded for later inspection.
pub struct MockEngine {
    responses: Mutex<VecDeque<MockResponse>>,
    fallback: Option<MockResponse>,
    contexts: Mutex<Vec<TurnContext>>,
    call_count: AtomicUsize,
}

impl MockEngine {
    pub fn new(responses: Vec<MockResponse>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            fallback: None,
            contexts: Mutex::new(Vec::new()),
            call_count: AtomicUsize::new(0),
        }
    }

    /// Answer every call with the same response.
    pub fn always(response: MockResponse) -> Self {
        Self {
            fallback: Some(response),
            ..Self::new(Vec::new())
        }
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::Relaxed)
    }

    pub fn contexts(&self) -> Vec<TurnContext> {
        self.contexts.lock().clone()
    }
}

#[async_trait]
impl ConversationEngine for MockEngine {
    fn name(&self) -> &str {
        "assistant"
    }

    fn model(&self) -> &str {
        "mock-model"
    }

    async fn run(&self, context: TurnContext) -> Result<EventStream, GatewayError> {
        let idx = self.call_count.fetch_add(1, Ordering::Relaxed);
        self.contexts.lock().push(context);

        let response = self
            .responses
            .lock()
            .pop_front()
            .or_else(|| self.fallback.clone())
            .ok_or_else(|| {
                GatewayError::InvalidRequest(format!(
                    "MockEngine: no response configured for call {idx}"
                ))
            })?;

        resolve_response(response).await
    }
}

/// Unrolls nested delays iteratively to avoid recursive async.
async fn resolve_response(response: MockResponse) -> Result<EventStream, GatewayError> {
    let mut current = response;
    loop {
        match current {
            MockResponse::Events(events) => {
                return Ok(Box::pin(stream::iter(events.into_iter().map(Ok))));
            }
            MockResponse::Error(e) => return Err(e),
            MockResponse::FailAfter(events, error) => {
                let items = events.into_iter().map(Ok).chain(std::iter::once(Err(error)));
                return Ok(Box::pin(stream::iter(items)));
            }
            MockResponse::Stall(events) => {
                let stalled = stream::iter(events.into_iter().map(Ok)).chain(stream::pending());
                return Ok(Box::pin(stalled));
            }
            MockResponse::Paced(interval, events) => {
                let paced = stream::iter(events).then(move |event| async move {
                    tokio::time::sleep(interval).await;
                    Ok(event)
                });
                return Ok(Box::pin(paced));
            }
            MockResponse::Delay(duration, inner) => {
                tokio::time::sleep(duration).await;
                current = *inner;
            }
        }
    }
}

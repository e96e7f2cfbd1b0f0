use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn, Span};

use colloquy_core::engine::ConversationEngine;
use colloquy_core::ids::SessionId;
use colloquy_store::SessionStore;

use crate::aggregator::aggregate;
use crate::dispatcher::{TurnDispatcher, TurnRequest};
use crate::error::ChatError;
use crate::limits::TurnLimits;
use crate::resolver::SessionResolver;

/// Fixed identity every request is scoped under.
#[derive(Clone, Debug)]
pub struct ChatConfig {
    pub app_name: String,
    pub user_id: String,
    pub limits: TurnLimits,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            app_name: "assistant".into(),
            user_id: "user".into(),
            limits: TurnLimits::default(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    #[serde(default)]
    pub session_id: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ChatReply {
    pub response: String,
    /// Always the resolved (possibly freshly created) id.
    pub session_id: SessionId,
}

/// Runs one chat turn end to end: resolve, dispatch, aggregate.
pub struct ChatService {
    resolver: SessionResolver,
    dispatcher: TurnDispatcher,
    config: ChatConfig,
}

impl ChatService {
    pub fn new(
        store: Arc<dyn SessionStore>,
        engine: Arc<dyn ConversationEngine>,
        config: ChatConfig,
    ) -> Self {
        Self {
            resolver: SessionResolver::new(Arc::clone(&store), config.limits.storage_timeout),
            dispatcher: TurnDispatcher::new(engine, store, config.limits),
            config,
        }
    }

    pub fn agent_name(&self) -> &str {
        self.dispatcher.engine().name()
    }

    pub fn config(&self) -> &ChatConfig {
        &self.config
    }

    #[instrument(skip(self, request), fields(session_id = tracing::field::Empty, is_new = tracing::field::Empty))]
    pub async fn handle(&self, request: ChatRequest) -> Result<ChatReply, ChatError> {
        if request.message.trim().is_empty() {
            return Err(ChatError::EmptyMessage);
        }

        let resolved = self
            .resolver
            .resolve(
                &self.config.app_name,
                &self.config.user_id,
                request.session_id.as_deref(),
            )
            .await?;

        let session_id = resolved.session.id().clone();
        let span = Span::current();
        span.record("session_id", tracing::field::display(&session_id));
        span.record("is_new", resolved.is_new);

        // `turn_timeout` is enforced inside the turn stream, so the commit
        // is never cut off halfway.
        let outcome = match self
            .dispatcher
            .dispatch(&resolved.session, TurnRequest { message: request.message })
            .await
        {
            Ok(stream) => aggregate(stream.into_stream()).await,
            Err(e) => Err(e),
        };

        match &outcome {
            Ok(reply) => info!(reply_len = reply.len(), "turn completed"),
            Err(ChatError::EngineFailure(cause)) => warn!(
                kind = "engine_failure",
                retryable = cause.is_retryable(),
                error = %cause,
                "turn failed"
            ),
            Err(e) => warn!(kind = e.kind(), error = %e, "turn failed"),
        }

        Ok(ChatReply {
            response: outcome?,
            session_id,
        })
    }
}

use std::collections::VecDeque;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{Future, Stream};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, instrument, warn};

use colloquy_core::context::TurnContext;
use colloquy_core::engine::{ConversationEngine, EventStream};
use colloquy_core::errors::GatewayError;
use colloquy_core::event::Event;
use colloquy_core::AgentProfile;

use crate::converter::{self, GenerateContentResponse};
use crate::sse::SseDecoder;

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const SSE_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Conversation engine backed by the Gemini `streamGenerateContent` API.
pub struct GeminiEngine {
    client: Client,
    api_key: SecretString,
    profile: AgentProfile,
    base_url: String,
    idle_timeout: Duration,
}

impl GeminiEngine {
    pub fn new(api_key: SecretString, profile: AgentProfile) -> Result<Self, GatewayError> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| GatewayError::NetworkError(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            api_key,
            profile,
            base_url: DEFAULT_BASE_URL.to_string(),
            idle_timeout: SSE_IDLE_TIMEOUT,
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/v1beta/models/{}:streamGenerateContent?alt=sse",
            self.base_url.trim_end_matches('/'),
            self.profile.model
        )
    }
}

#[async_trait]
impl ConversationEngine for GeminiEngine {
    fn name(&self) -> &str {
        &self.profile.name
    }

    fn model(&self) -> &str {
        &self.profile.model
    }

    #[instrument(skip(self, context), fields(model = %self.profile.model, session_id = %context.key.session_id))]
    async fn run(&self, context: TurnContext) -> Result<EventStream, GatewayError> {
        let body = converter::build_request(&self.profile, &context);

        let resp = self
            .client
            .post(self.endpoint())
            .header("x-goog-api-key", self.api_key.expose_secret())
            .json(&body)
            .send()
            .await
            .map_err(|e| GatewayError::NetworkError(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            warn!(status, "gemini request rejected");
            return Err(GatewayError::from_status(status, body));
        }

        debug!("gemini stream opened");
        Ok(Box::pin(SseStream::with_idle_timeout(
            resp.bytes_stream(),
            self.profile.name.clone(),
            self.idle_timeout,
        )))
    }
}

/// Wraps the response byte stream and yields one event per SSE chunk.
/// The first error ends the stream. If no bytes arrive within
/// `idle_duration` the stream fails with [`GatewayError::Timeout`].
struct SseStream {
    inner: Pin<Box<dyn Stream<Item = Result<Bytes, reqwest::Error>> + Send>>,
    decoder: SseDecoder,
    author: String,
    pending: VecDeque<Result<Event, GatewayError>>,
    idle_deadline: Pin<Box<tokio::time::Sleep>>,
    idle_duration: Duration,
    done: bool,
}

impl SseStream {
    fn with_idle_timeout(
        byte_stream: impl Stream<Item = Result<Bytes, reqwest::Error>> + Send + 'static,
        author: String,
        idle_timeout: Duration,
    ) -> Self {
        Self {
            inner: Box::pin(byte_stream),
            decoder: SseDecoder::new(),
            author,
            pending: VecDeque::new(),
            idle_deadline: Box::pin(tokio::time::sleep(idle_timeout)),
            idle_duration: idle_timeout,
            done: false,
        }
    }

    fn enqueue(&mut self, data: String) {
        if data.trim().is_empty() {
            return;
        }
        let item = serde_json::from_str::<GenerateContentResponse>(&data)
            .map_err(|e| GatewayError::StreamInterrupted(format!("malformed chunk: {e}")))
            .and_then(|chunk| converter::chunk_to_event(&chunk, &self.author));
        self.pending.push_back(item);
    }

    fn pop(&mut self) -> Option<Result<Event, GatewayError>> {
        let item = self.pending.pop_front()?;
        if item.is_err() {
            self.done = true;
            self.pending.clear();
        }
        Some(item)
    }
}

impl Stream for SseStream {
    type Item = Result<Event, GatewayError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        if let Some(item) = this.pop() {
            return Poll::Ready(Some(item));
        }
        if this.done {
            return Poll::Ready(None);
        }

        loop {
            match this.inner.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(bytes))) => {
                    let new_deadline = tokio::time::Instant::now() + this.idle_duration;
                    this.idle_deadline.as_mut().reset(new_deadline);

                    for data in this.decoder.push(&bytes) {
                        this.enqueue(data);
                    }
                    if let Some(item) = this.pop() {
                        return Poll::Ready(Some(item));
                    }
                }
                Poll::Ready(Some(Err(e))) => {
                    this.done = true;
                    return Poll::Ready(Some(Err(GatewayError::StreamInterrupted(e.to_string()))));
                }
                Poll::Ready(None) => {
                    this.done = true;
                    if let Some(data) = this.decoder.finish() {
                        this.enqueue(data);
                    }
                    return Poll::Ready(this.pop());
                }
                Poll::Pending => {
                    if this.idle_deadline.as_mut().poll(cx).is_ready() {
                        this.done = true;
                        return Poll::Ready(Some(Err(GatewayError::Timeout(this.idle_duration))));
                    }
                    return Poll::Pending;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use colloquy_core::event::EventBody;
    use colloquy_core::ids::SessionId;
    use colloquy_core::messages::Content;
    use colloquy_core::session::{Session, SessionKey};
    use futures::StreamExt;
    use wiremock::matchers::{body_partial_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const STREAM_PATH: &str = "/v1beta/models/gemini-2.0-flash:streamGenerateContent";

    fn context(message: &str) -> TurnContext {
        let now = chrono_now();
        let session = Session {
            key: SessionKey::new("assistant", "user", SessionId::from_raw("s1")),
            state: Default::default(),
            turns: Vec::new(),
            created_at: now,
            updated_at: now,
        };
        TurnContext::new(&session, Content::user_text(message))
    }

    fn chrono_now() -> chrono::DateTime<chrono::Utc> {
        "2026-01-01T00:00:00Z".parse().unwrap()
    }

    fn engine(server: &MockServer) -> GeminiEngine {
        GeminiEngine::new(SecretString::from("test-key"), AgentProfile::default())
            .unwrap()
            .with_base_url(server.uri())
    }

    fn sse_body(chunks: &[serde_json::Value]) -> String {
        chunks.iter().map(|c| format!("data: {c}\r\n\r\n")).collect()
    }

    fn text_chunk(text: &str) -> serde_json::Value {
        serde_json::json!({"candidates": [{"content": {"role": "model", "parts": [{"text": text}]}}]})
    }

    async fn collect(stream: EventStream) -> Vec<Result<Event, GatewayError>> {
        stream.collect().await
    }

    #[test]
    fn engine_properties() {
        let engine = GeminiEngine::new(SecretString::from("k"), AgentProfile::default()).unwrap();
        assert_eq!(engine.name(), "assistant");
        assert_eq!(engine.model(), "gemini-2.0-flash");
        assert_eq!(
            engine.endpoint(),
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.0-flash:streamGenerateContent?alt=sse"
        );
    }

    #[test]
    fn base_url_trailing_slash_trimmed() {
        let engine = GeminiEngine::new(SecretString::from("k"), AgentProfile::default())
            .unwrap()
            .with_base_url("http://localhost:9999/");
        assert!(engine.endpoint().starts_with("http://localhost:9999/v1beta/"));
    }

    #[tokio::test]
    async fn streams_one_event_per_chunk() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(STREAM_PATH))
            .and(query_param("alt", "sse"))
            .and(header("x-goog-api-key", "test-key"))
            .and(body_partial_json(serde_json::json!({
                "contents": [{"role": "user", "parts": [{"text": "hello"}]}]
            })))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/event-stream")
                    .set_body_string(sse_body(&[
                        text_chunk("Hi "),
                        text_chunk("there"),
                        serde_json::json!({"candidates": [{"finishReason": "STOP"}]}),
                    ])),
            )
            .expect(1)
            .mount(&server)
            .await;

        let stream = engine(&server).run(context("hello")).await.unwrap();
        let events: Vec<Event> = collect(stream).await.into_iter().map(|r| r.unwrap()).collect();

        assert_eq!(events.len(), 3);
        assert_eq!(events[0].body, EventBody::Fragments { fragments: vec!["Hi ".into()] });
        assert_eq!(events[1].body, EventBody::Fragments { fragments: vec!["there".into()] });
        assert_eq!(events[2].body, EventBody::Empty);
        assert!(events.iter().all(|e| e.author == "assistant"));
    }

    #[tokio::test]
    async fn http_errors_are_classified() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(403).set_body_string("API key not valid"))
            .mount(&server)
            .await;

        let err = engine(&server).run(context("hello")).await.err().unwrap();
        assert!(matches!(err, GatewayError::AuthenticationFailed(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn server_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
            .mount(&server)
            .await;

        let err = engine(&server).run(context("hello")).await.err().unwrap();
        assert!(matches!(err, GatewayError::ServerError { status: 503, .. }), "got {err:?}");
    }

    #[tokio::test]
    async fn error_chunk_ends_stream() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/event-stream")
                    .set_body_string(sse_body(&[
                        text_chunk("partial"),
                        serde_json::json!({"error": {"code": 500, "message": "internal"}}),
                        text_chunk("never seen"),
                    ])),
            )
            .mount(&server)
            .await;

        let items = collect(engine(&server).run(context("hello")).await.unwrap()).await;
        assert_eq!(items.len(), 2);
        assert!(items[0].is_ok());
        assert!(matches!(items[1], Err(GatewayError::Api { code: 500, .. })));
    }

    #[tokio::test]
    async fn malformed_chunk_is_stream_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/event-stream")
                    .set_body_string("data: {not json}\n\n"),
            )
            .mount(&server)
            .await;

        let items = collect(engine(&server).run(context("hello")).await.unwrap()).await;
        assert_eq!(items.len(), 1);
        assert!(matches!(&items[0], Err(GatewayError::StreamInterrupted(msg)) if msg.contains("malformed")));
    }

    #[tokio::test]
    async fn connection_refused_is_network_error() {
        let engine = GeminiEngine::new(SecretString::from("k"), AgentProfile::default())
            .unwrap()
            .with_base_url("http://127.0.0.1:1");
        let err = engine.run(context("hello")).await.err().unwrap();
        assert!(matches!(err, GatewayError::NetworkError(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn idle_timeout_fires_when_no_data() {
        tokio::time::pause();

        let byte_stream = futures::stream::pending::<Result<Bytes, reqwest::Error>>();
        let mut stream = Box::pin(SseStream::with_idle_timeout(
            byte_stream,
            "assistant".into(),
            Duration::from_secs(5),
        ));

        tokio::time::advance(Duration::from_secs(6)).await;

        let item = stream.next().await;
        assert!(
            matches!(item, Some(Err(GatewayError::Timeout(d))) if d == Duration::from_secs(5)),
            "expected idle timeout, got: {item:?}"
        );
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn idle_timeout_resets_on_data() {
        tokio::time::pause();

        let (tx, rx) = tokio::sync::mpsc::channel::<Result<Bytes, reqwest::Error>>(16);
        let mut stream = Box::pin(SseStream::with_idle_timeout(
            tokio_stream::wrappers::ReceiverStream::new(rx),
            "assistant".into(),
            Duration::from_secs(5),
        ));

        tx.send(Ok(Bytes::from(format!("data: {}\n\n", text_chunk("a")))))
            .await
            .unwrap();
        assert!(stream.next().await.unwrap().is_ok());

        tokio::time::advance(Duration::from_secs(4)).await;

        tx.send(Ok(Bytes::from(format!("data: {}\n\n", text_chunk("b")))))
            .await
            .unwrap();
        assert!(stream.next().await.unwrap().is_ok());

        drop(tx);
        let item = stream.next().await;
        assert!(item.is_none(), "expected stream end, got: {item:?}");
    }

    #[tokio::test]
    async fn unterminated_final_chunk_is_flushed() {
        let byte_stream = futures::stream::iter(vec![Ok::<_, reqwest::Error>(Bytes::from(
            format!("data: {}", text_chunk("tail")),
        ))]);
        let stream = SseStream::with_idle_timeout(byte_stream, "assistant".into(), SSE_IDLE_TIMEOUT);
        let items: Vec<_> = stream.collect().await;
        assert_eq!(items.len(), 1);
        assert_eq!(
            items[0].as_ref().unwrap().body,
            EventBody::Fragments { fragments: vec!["tail".into()] }
        );
    }
}

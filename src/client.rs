//! Transport client - discovery and message dispatch.
//!
//! The client resolves an [`AgentCard`] from a base URL, then sends messages
//! to the agent it describes. A send either blocks for one terminal
//! [`Message`] (single mode) or yields a [`ResponseStream`] of task updates
//! ending in a terminal message (streaming mode).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::StreamExt;
use parking_lot::RwLock;
use reqwest_eventsource::{Event as SseEvent, EventSource};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, instrument, warn};

use crate::card::{AgentCard, AGENT_CARD_PATH, CAP_STREAMING};
use crate::error::Error;
use crate::protocol::{
    Message, StreamFrame, Task, TaskUpdate, WireFailure, MESSAGE_PATH, MESSAGE_STREAM_PATH,
};

/// One event pulled from a [`ResponseStream`].
#[derive(Debug, Clone)]
pub enum ReplyEvent {
    /// A message from the remote agent. The terminal message ends the stream.
    Message(Message),
    /// A task snapshot plus the update that produced it.
    TaskUpdate(Task, TaskUpdate),
}

/// A lazy, finite, non-restartable sequence of reply events.
///
/// Events arrive in the order the remote emitted them. Dropping the stream
/// before it ends closes the underlying connection; the remote finishes any
/// in-flight delegated work on its own.
pub struct ResponseStream {
    rx: mpsc::Receiver<Result<ReplyEvent, Error>>,
    reader: JoinHandle<()>,
}

impl ResponseStream {
    /// Pull the next event. `None` means the stream ended after a terminal
    /// event or error was delivered.
    pub async fn next(&mut self) -> Option<Result<ReplyEvent, Error>> {
        self.rx.recv().await
    }
}

impl Drop for ResponseStream {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

/// Upper bound on a discovery round trip. Message sends carry their own
/// deadline, so this only guards [`AgentClient::resolve`] against a peer
/// that accepts the connection and never answers.
pub const DEFAULT_DISCOVERY_TIMEOUT: Duration = Duration::from_secs(120);

/// Client side of the agent transport.
///
/// Cheap to clone; clones share the HTTP connection pool and the card cache.
#[derive(Clone)]
pub struct AgentClient {
    http: reqwest::Client,
    discovery_timeout: Duration,
    cards: Arc<RwLock<HashMap<String, AgentCard>>>,
}

impl AgentClient {
    pub fn new() -> Self {
        Self::with_discovery_timeout(DEFAULT_DISCOVERY_TIMEOUT)
    }

    /// A client whose card fetches give up after `timeout`.
    pub fn with_discovery_timeout(timeout: Duration) -> Self {
        Self {
            http: reqwest::Client::new(),
            discovery_timeout: timeout,
            cards: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Fetch the agent card served at `base_url`.
    ///
    /// Pure fetch, no retries; the result is recorded in the card cache for
    /// [`resolve_cached`](Self::resolve_cached). Bounded by the client's
    /// discovery timeout.
    #[instrument(skip(self))]
    pub async fn resolve(&self, base_url: &str) -> Result<AgentCard, Error> {
        let url = format!("{}{}", base_url.trim_end_matches('/'), AGENT_CARD_PATH);

        let response = self
            .http
            .get(&url)
            .timeout(self.discovery_timeout)
            .send()
            .await
            .map_err(|e| Error::Discovery {
                url: url.clone(),
                reason: e.to_string(),
            })?;

        if !response.status().is_success() {
            return Err(Error::Discovery {
                url,
                reason: format!("unexpected status {}", response.status()),
            });
        }

        let card: AgentCard = response.json().await.map_err(|e| Error::Discovery {
            url,
            reason: format!("malformed card document: {e}"),
        })?;

        debug!(agent = %card.name, url = %card.url, "resolved agent card");
        self.cards.write().insert(base_url.to_string(), card.clone());
        Ok(card)
    }

    /// Like [`resolve`](Self::resolve), but returns a previously fetched card
    /// if one exists. An in-flight call keeps the card it started with; a card
    /// that changed on the remote is only picked up by a fresh [`resolve`](Self::resolve).
    pub async fn resolve_cached(&self, base_url: &str) -> Result<AgentCard, Error> {
        if let Some(card) = self.cards.read().get(base_url).cloned() {
            return Ok(card);
        }
        self.resolve(base_url).await
    }

    /// Send a message and suspend until the terminal reply.
    #[instrument(skip(self, message), fields(agent = %card.name))]
    pub async fn send(
        &self,
        card: &AgentCard,
        message: Message,
        deadline: Duration,
    ) -> Result<Message, Error> {
        let url = format!("{}{}", card.url.trim_end_matches('/'), MESSAGE_PATH);

        let request = async {
            let response = self.http.post(&url).json(&message).send().await?;
            let status = response.status();

            if status.is_success() {
                let reply: Message = response
                    .json()
                    .await
                    .map_err(|e| Error::Protocol(format!("malformed reply: {e}")))?;
                Ok(reply)
            } else {
                let body = response.text().await.unwrap_or_default();
                match serde_json::from_str::<WireFailure>(&body) {
                    Ok(failure) => Err(failure.into_error()),
                    Err(_) => Err(Error::Protocol(format!(
                        "{url} returned {status} with unrecognized body"
                    ))),
                }
            }
        };

        match tokio::time::timeout(deadline, request).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout(deadline)),
        }
    }

    /// Send a message and consume the reply as a stream of events.
    ///
    /// The card must advertise the [`CAP_STREAMING`] capability; there is no
    /// silent fallback to single mode.
    #[instrument(skip(self, message), fields(agent = %card.name))]
    pub fn send_streaming(
        &self,
        card: &AgentCard,
        message: Message,
        deadline: Duration,
    ) -> Result<ResponseStream, Error> {
        if !card.supports(CAP_STREAMING) {
            return Err(Error::Protocol(format!(
                "agent '{}' does not advertise streaming",
                card.name
            )));
        }

        let url = format!("{}{}", card.url.trim_end_matches('/'), MESSAGE_STREAM_PATH);
        let builder = self.http.post(&url).json(&message);
        let source =
            EventSource::new(builder).map_err(|e| Error::Transport(e.to_string()))?;

        let (tx, rx) = mpsc::channel(32);
        let reader = tokio::spawn(read_stream(source, tx, deadline));

        Ok(ResponseStream { rx, reader })
    }
}

impl Default for AgentClient {
    fn default() -> Self {
        Self::new()
    }
}

/// Forward SSE frames to the consumer until a terminal frame, error, or the
/// deadline. Never lets the sequence end silently: a connection that closes
/// before a terminal frame surfaces as [`Error::StreamTruncated`].
async fn read_stream(
    mut source: EventSource,
    tx: mpsc::Sender<Result<ReplyEvent, Error>>,
    deadline: Duration,
) {
    let start = Instant::now();
    let mut delivered = 0usize;

    loop {
        let remaining = deadline.saturating_sub(start.elapsed());

        let event = match tokio::time::timeout(remaining, source.next()).await {
            Ok(event) => event,
            Err(_) => {
                source.close();
                let _ = tx.send(Err(Error::Timeout(deadline))).await;
                return;
            }
        };

        match event {
            Some(Ok(SseEvent::Open)) => {}
            Some(Ok(SseEvent::Message(frame))) => {
                match serde_json::from_str::<StreamFrame>(&frame.data) {
                    Ok(StreamFrame::Update { task, update }) => {
                        delivered += 1;
                        if tx.send(Ok(ReplyEvent::TaskUpdate(task, update))).await.is_err() {
                            // Consumer went away; close our side and stop.
                            source.close();
                            return;
                        }
                    }
                    Ok(StreamFrame::Final { message }) => {
                        source.close();
                        let _ = tx.send(Ok(ReplyEvent::Message(message))).await;
                        return;
                    }
                    Ok(StreamFrame::Failure { failure }) => {
                        source.close();
                        let _ = tx.send(Err(failure.into_error())).await;
                        return;
                    }
                    Err(e) => {
                        source.close();
                        let _ = tx
                            .send(Err(Error::Protocol(format!("malformed frame: {e}"))))
                            .await;
                        return;
                    }
                }
            }
            Some(Err(reqwest_eventsource::Error::StreamEnded)) | None => {
                // Closed without a terminal frame.
                source.close();
                warn!(events = delivered, "stream ended without terminal signal");
                let _ = tx
                    .send(Err(Error::StreamTruncated { events: delivered }))
                    .await;
                return;
            }
            Some(Err(reqwest_eventsource::Error::InvalidStatusCode(status, _))) => {
                source.close();
                let _ = tx
                    .send(Err(Error::Transport(format!(
                        "stream request rejected with status {status}"
                    ))))
                    .await;
                return;
            }
            Some(Err(reqwest_eventsource::Error::Transport(e))) => {
                source.close();
                let _ = tx.send(Err(Error::Transport(e.to_string()))).await;
                return;
            }
            Some(Err(e)) => {
                source.close();
                let _ = tx.send(Err(Error::Protocol(e.to_string()))).await;
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::protocol::{TaskProgress, TaskStatus};
    use crate::router::DelegationRouter;
    use crate::server::testing::{spawn_agent, CountingEcho, FailingCapability, NumberedUpdates};
    use crate::server::{Capability, Outcome};

    const DEADLINE: Duration = Duration::from_secs(5);

    #[tokio::test]
    async fn test_resolve_and_idempotence() {
        let card = spawn_agent("echo", Arc::new(CountingEcho::default()), DelegationRouter::empty())
            .await;
        let client = AgentClient::new();

        let first = client.resolve(&card.url).await.unwrap();
        let second = client.resolve(&card.url).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first.name, "echo");
        assert!(first.supports(CAP_STREAMING));
    }

    #[tokio::test]
    async fn test_resolve_unreachable_address() {
        let client = AgentClient::new();
        let result = client.resolve("http://127.0.0.1:1").await;
        assert!(matches!(result, Err(Error::Discovery { .. })));
    }

    #[tokio::test]
    async fn test_send_single_mode() {
        let card = spawn_agent("echo", Arc::new(CountingEcho::default()), DelegationRouter::empty())
            .await;
        let client = AgentClient::new();

        let reply = client
            .send(&card, Message::user("ping"), DEADLINE)
            .await
            .unwrap();
        assert_eq!(reply.text(), "echo: ping");
        assert_eq!(reply.role, crate::protocol::Role::Agent);
    }

    #[tokio::test]
    async fn test_remote_capability_failure_maps_to_error() {
        let card = spawn_agent(
            "broken",
            Arc::new(FailingCapability::new("model unavailable")),
            DelegationRouter::empty(),
        )
        .await;
        let client = AgentClient::new();

        match client.send(&card, Message::user("x"), DEADLINE).await {
            Err(Error::Capability(msg)) => assert!(msg.contains("model unavailable")),
            other => panic!("expected Capability error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_streaming_preserves_emission_order() {
        let card = spawn_agent(
            "counter",
            Arc::new(NumberedUpdates::new(5)),
            DelegationRouter::empty(),
        )
        .await;
        let client = AgentClient::new();

        let mut stream = client
            .send_streaming(&card, Message::user("count"), DEADLINE)
            .unwrap();

        let mut seen = Vec::new();
        let mut terminal = None;
        while let Some(event) = stream.next().await {
            match event.unwrap() {
                ReplyEvent::TaskUpdate(task, update) => {
                    assert_eq!(update.task_id, task.id);
                    assert_eq!(update.status, TaskStatus::Working);
                    seen.push(update.message.unwrap().text());
                }
                ReplyEvent::Message(message) => terminal = Some(message),
            }
        }

        assert_eq!(seen, vec!["0", "1", "2", "3", "4"]);
        assert_eq!(terminal.unwrap().text(), "emitted 5 updates");
    }

    #[tokio::test]
    async fn test_streaming_requires_capability_tag() {
        let client = AgentClient::new();
        let card = AgentCard::new("plain", "http://localhost:9");

        let result = client.send_streaming(&card, Message::user("x"), DEADLINE);
        assert!(matches!(result, Err(Error::Protocol(_))));
    }

    #[tokio::test]
    async fn test_truncated_stream_surfaces_after_n_events() {
        // A peer that emits three update frames and then closes the
        // connection, never sending a terminal frame.
        let card = spawn_truncating_peer(3).await;
        let client = AgentClient::new();

        let mut stream = client
            .send_streaming(&card, Message::user("x"), DEADLINE)
            .unwrap();

        let mut yielded = 0usize;
        loop {
            match stream.next().await {
                Some(Ok(ReplyEvent::TaskUpdate(..))) => yielded += 1,
                Some(Err(Error::StreamTruncated { events })) => {
                    assert_eq!(yielded, 3);
                    assert_eq!(events, 3);
                    break;
                }
                other => panic!("unexpected stream item: {other:?}"),
            }
        }
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_deadline_exceeded() {
        let card = spawn_agent(
            "slow",
            Arc::new(crate::server::testing::SlowCapability::new(Duration::from_secs(30))),
            DelegationRouter::empty(),
        )
        .await;
        let client = AgentClient::new();

        match client
            .send(&card, Message::user("x"), Duration::from_millis(100))
            .await
        {
            Err(Error::Timeout(_)) => {}
            other => panic!("expected Timeout, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_resolve_gives_up_on_silent_peer() {
        // Accepts connections but never writes a byte back.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                let (socket, _) = listener.accept().await.unwrap();
                tokio::spawn(async move {
                    let _socket = socket;
                    tokio::time::sleep(Duration::from_secs(60)).await;
                });
            }
        });

        let client = AgentClient::with_discovery_timeout(Duration::from_millis(200));
        match client.resolve(&format!("http://{addr}")).await {
            Err(Error::Discovery { .. }) => {}
            other => panic!("expected Discovery error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_dropped_stream_lets_remote_finish() {
        let produced = Arc::new(AtomicUsize::new(0));
        let card = spawn_agent(
            "drip",
            Arc::new(DripUpdates {
                n: 5,
                pace: Duration::from_millis(20),
                produced: Arc::clone(&produced),
            }),
            DelegationRouter::empty(),
        )
        .await;
        let client = AgentClient::new();

        let mut stream = client
            .send_streaming(&card, Message::user("x"), DEADLINE)
            .unwrap();
        let first = stream.next().await.unwrap().unwrap();
        assert!(matches!(first, ReplyEvent::TaskUpdate(..)));
        drop(stream);

        // The remote keeps working through all five updates plus the
        // terminal one even though nobody is listening anymore.
        tokio::time::timeout(DEADLINE, async {
            while produced.load(Ordering::SeqCst) < 6 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("remote should finish its stream after the client hung up");
    }

    /// Emits `n` working updates at a fixed pace, bumping `produced` per
    /// emission whether or not anyone is still receiving.
    struct DripUpdates {
        n: usize,
        pace: Duration,
        produced: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Capability for DripUpdates {
        async fn respond(
            &self,
            _message: Message,
            _history: Vec<Message>,
            _router: Arc<DelegationRouter>,
        ) -> Result<Outcome, Error> {
            let (tx, rx) = mpsc::channel(1);
            let n = self.n;
            let pace = self.pace;
            let produced = Arc::clone(&self.produced);
            tokio::spawn(async move {
                for i in 0..n {
                    tokio::time::sleep(pace).await;
                    let _ = tx
                        .send(TaskProgress::working(Message::agent(i.to_string())))
                        .await;
                    produced.fetch_add(1, Ordering::SeqCst);
                }
                let _ = tx
                    .send(TaskProgress::completed(Message::agent("done")))
                    .await;
                produced.fetch_add(1, Ordering::SeqCst);
            });
            Ok(Outcome::TaskStream(rx))
        }
    }

    /// Raw SSE endpoint that speaks just enough of the protocol to emit `n`
    /// update frames and then hang up without a terminal frame.
    async fn spawn_truncating_peer(n: usize) -> AgentCard {
        use axum::response::sse::{Event, Sse};
        use axum::routing::post;
        use std::convert::Infallible;

        let app = axum::Router::new().route(
            MESSAGE_STREAM_PATH,
            post(move || async move {
                let task = Task::new();
                let frames: Vec<Result<Event, Infallible>> = (0..n)
                    .map(|i| {
                        let frame = StreamFrame::Update {
                            task: task.clone(),
                            update: TaskUpdate {
                                task_id: task.id,
                                status: TaskStatus::Working,
                                message: Some(Message::agent(i.to_string())),
                            },
                        };
                        Ok(Event::default().data(serde_json::to_string(&frame).unwrap()))
                    })
                    .collect();
                Sse::new(futures::stream::iter(frames))
            }),
        );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        AgentCard::new("truncating", format!("http://{addr}")).with_capability(CAP_STREAMING)
    }
}

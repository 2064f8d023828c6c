//! Transport server - the receiving side of the protocol.
//!
//! An [`AgentServer`] serves one agent: its card at the well-known path, a
//! single-response message route, and a streaming route. Every inbound message
//! is handed to the injected [`Capability`] together with the conversation
//! history and the delegation router; the capability may call other agents
//! through the router with an ordinary [`AgentClient`](crate::AgentClient).
//!
//! A capability failure is always converted into a well-formed terminal
//! response. A caller never observes a hanging stream.

use std::convert::Infallible;
use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};

use crate::card::{AgentCard, AGENT_CARD_PATH};
use crate::error::Error;
use crate::protocol::{
    Message, StreamFrame, Task, TaskProgress, TaskStatus, TaskUpdate, WireFailure, MESSAGE_PATH,
    MESSAGE_STREAM_PATH,
};
use crate::router::DelegationRouter;

/// What a capability produced for an inbound message.
pub enum Outcome {
    /// One terminal message, sent immediately.
    Final(Message),
    /// Incremental progress; the server creates a task and streams each item.
    /// A progress item with a terminal status ends the task.
    TaskStream(mpsc::Receiver<TaskProgress>),
}

/// The opaque reasoning step of an agent.
///
/// Implementations receive the inbound message, a snapshot of the
/// conversation history, and the agent's delegation router. They may be slow
/// and they may fail; the server reports failures to the caller and never
/// retries them.
#[async_trait]
pub trait Capability: Send + Sync {
    async fn respond(
        &self,
        message: Message,
        history: Vec<Message>,
        router: Arc<DelegationRouter>,
    ) -> Result<Outcome, Error>;
}

struct ServerState {
    card: AgentCard,
    capability: Arc<dyn Capability>,
    router: Arc<DelegationRouter>,
    /// Append-only conversation history, owned by this server.
    history: RwLock<Vec<Message>>,
}

impl ServerState {
    fn record(&self, message: &Message) {
        self.history.write().push(message.clone());
    }

    fn history_snapshot(&self) -> Vec<Message> {
        self.history.read().clone()
    }
}

/// Serves one agent over HTTP.
pub struct AgentServer {
    state: Arc<ServerState>,
}

impl AgentServer {
    pub fn new(card: AgentCard, capability: Arc<dyn Capability>, router: DelegationRouter) -> Self {
        info!(agent = %card.name, url = %card.url, delegates = router.len(), "creating agent server");
        Self {
            state: Arc::new(ServerState {
                card,
                capability,
                router: Arc::new(router),
                history: RwLock::new(Vec::new()),
            }),
        }
    }

    /// The axum application for this agent.
    pub fn app(&self) -> Router {
        Router::new()
            .route(AGENT_CARD_PATH, get(serve_card))
            .route(MESSAGE_PATH, post(handle_message))
            .route(MESSAGE_STREAM_PATH, post(handle_message_stream))
            .with_state(Arc::clone(&self.state))
    }

    /// Serve until the listener fails.
    pub async fn serve(self, listener: tokio::net::TcpListener) -> Result<(), Error> {
        info!(agent = %self.state.card.name, "agent listening");
        axum::serve(listener, self.app())
            .await
            .map_err(|e| Error::Transport(e.to_string()))
    }

    /// Snapshot of the conversation history, for inspection.
    pub fn history(&self) -> Vec<Message> {
        self.state.history_snapshot()
    }
}

async fn serve_card(State(state): State<Arc<ServerState>>) -> Json<AgentCard> {
    Json(state.card.clone())
}

async fn handle_message(
    State(state): State<Arc<ServerState>>,
    Json(message): Json<Message>,
) -> Response {
    debug!(agent = %state.card.name, message_id = %message.id, "inbound message");

    let history = state.history_snapshot();
    state.record(&message);

    let outcome = state
        .capability
        .respond(message, history, Arc::clone(&state.router))
        .await;

    match outcome {
        Ok(Outcome::Final(reply)) => {
            state.record(&reply);
            Json(reply).into_response()
        }
        Ok(Outcome::TaskStream(progress)) => match drain_task(progress).await {
            Ok(reply) => {
                state.record(&reply);
                Json(reply).into_response()
            }
            Err(failure) => failure_response(failure),
        },
        Err(err) => {
            warn!(agent = %state.card.name, error = %err, "capability failed");
            failure_response(wire_failure(err))
        }
    }
}

async fn handle_message_stream(
    State(state): State<Arc<ServerState>>,
    Json(message): Json<Message>,
) -> impl IntoResponse {
    debug!(agent = %state.card.name, message_id = %message.id, "inbound streaming message");

    let history = state.history_snapshot();
    state.record(&message);

    let (tx, rx) = mpsc::channel(32);
    tokio::spawn(run_stream(state, message, history, tx));

    Sse::new(ReceiverStream::new(rx)).keep_alive(KeepAlive::default())
}

/// Drive one streaming response to its terminal frame.
async fn run_stream(
    state: Arc<ServerState>,
    message: Message,
    history: Vec<Message>,
    tx: mpsc::Sender<Result<Event, Infallible>>,
) {
    let outcome = state
        .capability
        .respond(message, history, Arc::clone(&state.router))
        .await;

    match outcome {
        Ok(Outcome::Final(reply)) => {
            state.record(&reply);
            send_frame(&tx, StreamFrame::Final { message: reply }).await;
        }
        Ok(Outcome::TaskStream(mut progress)) => {
            let mut task = Task::new();
            debug!(agent = %state.card.name, task_id = %task.id, "task created");

            while let Some(item) = progress.recv().await {
                if item.status.is_terminal() {
                    match (item.status, item.message) {
                        (TaskStatus::Completed, Some(reply)) => {
                            state.record(&reply);
                            send_frame(&tx, StreamFrame::Final { message: reply }).await;
                        }
                        (TaskStatus::Completed, None) => {
                            // Summarize from what the task accumulated.
                            let reply = summarize_task(&task);
                            state.record(&reply);
                            send_frame(&tx, StreamFrame::Final { message: reply }).await;
                        }
                        (_, message) => {
                            let error = message
                                .map(|m| m.text())
                                .unwrap_or_else(|| "task failed".to_string());
                            send_frame(
                                &tx,
                                StreamFrame::Failure {
                                    failure: WireFailure::capability(error),
                                },
                            )
                            .await;
                        }
                    }
                    return;
                }

                task.status = item.status;
                if let Some(m) = &item.message {
                    task.history.push(m.clone());
                }
                let update = TaskUpdate {
                    task_id: task.id,
                    status: item.status,
                    message: item.message,
                };
                let frame = StreamFrame::Update {
                    task: task.clone(),
                    update,
                };
                if !send_frame(&tx, frame).await {
                    // Caller abandoned the stream; the capability keeps
                    // running, its remaining progress goes nowhere.
                    debug!(task_id = %task.id, "caller disconnected mid-stream");
                    return;
                }
            }

            // Progress channel closed without a terminal item.
            warn!(task_id = %task.id, "task stream ended without terminal update");
            send_frame(
                &tx,
                StreamFrame::Failure {
                    failure: WireFailure::internal("task ended without a terminal update"),
                },
            )
            .await;
        }
        Err(err) => {
            warn!(agent = %state.card.name, error = %err, "capability failed");
            send_frame(
                &tx,
                StreamFrame::Failure {
                    failure: wire_failure(err),
                },
            )
            .await;
        }
    }
}

/// Drain a task stream in single mode, returning only the terminal message.
async fn drain_task(mut progress: mpsc::Receiver<TaskProgress>) -> Result<Message, WireFailure> {
    let mut task = Task::new();

    while let Some(item) = progress.recv().await {
        if item.status.is_terminal() {
            return match (item.status, item.message) {
                (TaskStatus::Completed, Some(reply)) => Ok(reply),
                (TaskStatus::Completed, None) => Ok(summarize_task(&task)),
                (_, message) => Err(WireFailure::capability(
                    message
                        .map(|m| m.text())
                        .unwrap_or_else(|| "task failed".to_string()),
                )),
            };
        }
        task.status = item.status;
        if let Some(m) = item.message {
            task.history.push(m);
        }
    }

    Err(WireFailure::internal("task ended without a terminal update"))
}

fn summarize_task(task: &Task) -> Message {
    let text = task
        .history
        .iter()
        .map(Message::text)
        .collect::<Vec<_>>()
        .join("\n");
    Message::agent(text)
}

fn wire_failure(err: Error) -> WireFailure {
    match err {
        Error::Capability(e) => WireFailure::capability(e),
        other => WireFailure::internal(other.to_string()),
    }
}

fn failure_response(failure: WireFailure) -> Response {
    (StatusCode::INTERNAL_SERVER_ERROR, Json(failure)).into_response()
}

async fn send_frame(tx: &mpsc::Sender<Result<Event, Infallible>>, frame: StreamFrame) -> bool {
    match serde_json::to_string(&frame) {
        Ok(json) => tx.send(Ok(Event::default().data(json))).await.is_ok(),
        Err(_) => false,
    }
}

//! Wire-level data model.
//!
//! Everything an agent puts on the wire lives here: a [`Message`] is one
//! conversational turn made of ordered content parts, a [`Task`] is a unit of
//! work that resolves through a sequence of [`TaskUpdate`] events, and a
//! [`StreamFrame`] is one discrete frame of a streaming response.
//!
//! All types round-trip losslessly through JSON.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Route a server accepts single-response messages on.
pub const MESSAGE_PATH: &str = "/message";

/// Route a server accepts streaming messages on (server-sent events).
pub const MESSAGE_STREAM_PATH: &str = "/message/stream";

// ============================================================================
// Identifiers
// ============================================================================

/// Unique identifier for a [`Message`], generated by the sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(Uuid);

impl MessageId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Unique identifier for a [`Task`], assigned by the server that created it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(Uuid);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

// ============================================================================
// Messages
// ============================================================================

/// Who authored a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Agent,
}

/// One piece of message content.
///
/// Only text parts exist today; the enum is non-exhaustive so new kinds can be
/// added without breaking consumers, and a part kind this version does not
/// know deserializes to [`Part::Unknown`] instead of failing the message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
#[non_exhaustive]
pub enum Part {
    Text { text: String },
    #[serde(other)]
    Unknown,
}

impl Part {
    pub fn text(text: impl Into<String>) -> Self {
        Part::Text { text: text.into() }
    }
}

/// A single conversational turn.
///
/// `parts` is ordered; concatenation order is the content order. A message is
/// immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub role: Role,
    pub parts: Vec<Part>,
}

impl Message {
    /// Build a message with a fresh id.
    pub fn new(role: Role, parts: Vec<Part>) -> Self {
        Self {
            id: MessageId::new(),
            role,
            parts,
        }
    }

    /// A single-part user message.
    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, vec![Part::text(text)])
    }

    /// A single-part agent message.
    pub fn agent(text: impl Into<String>) -> Self {
        Self::new(Role::Agent, vec![Part::text(text)])
    }

    /// Concatenated text of all text parts, in part order.
    pub fn text(&self) -> String {
        let mut out = String::new();
        for part in &self.parts {
            if let Part::Text { text } = part {
                out.push_str(text);
            }
        }
        out
    }
}

// ============================================================================
// Tasks
// ============================================================================

/// Lifecycle state of a [`Task`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Submitted,
    Working,
    Completed,
    Failed,
    Canceled,
}

impl TaskStatus {
    /// Whether no further updates will follow this status.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Canceled
        )
    }
}

/// A unit of work that resolves asynchronously.
///
/// Created by a server when a response needs more than one update event.
/// `history` is append-only and owned by the creating server until the task
/// reaches a terminal status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub status: TaskStatus,
    pub history: Vec<Message>,
}

impl Task {
    pub fn new() -> Self {
        Self {
            id: TaskId::new(),
            status: TaskStatus::Submitted,
            history: Vec::new(),
        }
    }
}

impl Default for Task {
    fn default() -> Self {
        Self::new()
    }
}

/// One status change on the wire, consumed exactly once in emission order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskUpdate {
    pub task_id: TaskId,
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<Message>,
}

/// Progress item produced by a capability while working on a task.
///
/// The server stamps the task id before putting it on the wire. A progress
/// item with a terminal status ends the stream; its attached message (if any)
/// becomes the final summary.
#[derive(Debug, Clone)]
pub struct TaskProgress {
    pub status: TaskStatus,
    pub message: Option<Message>,
}

impl TaskProgress {
    pub fn working(message: Message) -> Self {
        Self {
            status: TaskStatus::Working,
            message: Some(message),
        }
    }

    pub fn completed(message: Message) -> Self {
        Self {
            status: TaskStatus::Completed,
            message: Some(message),
        }
    }

    pub fn failed(message: Message) -> Self {
        Self {
            status: TaskStatus::Failed,
            message: Some(message),
        }
    }
}

// ============================================================================
// Stream frames
// ============================================================================

/// One discrete frame of a streaming response.
///
/// `Final` and `Failure` are terminal: nothing follows them. A stream that
/// ends without either is truncated and the client reports it as such.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StreamFrame {
    /// Task progress: a snapshot of the task plus the update that produced it.
    Update { task: Task, update: TaskUpdate },
    /// Terminal message; the stream is complete.
    Final { message: Message },
    /// Terminal failure; the stream is complete.
    Failure { failure: WireFailure },
}

/// Error category a peer reports alongside a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCode {
    /// The reasoning capability failed.
    Capability,
    /// The request could not be understood.
    Protocol,
    /// Anything else that went wrong server-side.
    Internal,
}

/// Structured failure body a server returns instead of dropping the connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireFailure {
    pub code: FailureCode,
    pub error: String,
}

impl WireFailure {
    pub fn capability(error: impl Into<String>) -> Self {
        Self {
            code: FailureCode::Capability,
            error: error.into(),
        }
    }

    pub fn internal(error: impl Into<String>) -> Self {
        Self {
            code: FailureCode::Internal,
            error: error.into(),
        }
    }

    /// Map a wire failure back to a crate error on the consuming side.
    pub fn into_error(self) -> crate::Error {
        match self.code {
            FailureCode::Capability => crate::Error::Capability(self.error),
            FailureCode::Protocol => crate::Error::Protocol(self.error),
            FailureCode::Internal => crate::Error::Remote(self.error),
        }
    }
}

//! # Parley
//!
//! Agent-to-agent delegation protocol with discovery and streaming task
//! updates.
//!
//! Parley coordinates independently hosted agents through a request/response
//! protocol: a caller submits an instruction to a coordinator agent, which
//! delegates sub-tasks to specialized agents reachable over the network and
//! aggregates their output into a final reply.
//!
//! ## Architecture
//!
//! ```text
//!   caller
//!     │  send / send_streaming
//!     ▼
//! ┌─────────────────────────────────────────────┐
//! │   COORDINATOR  (AgentServer + Coordinator)  │
//! │   architect → developer → reviewer → summary│
//! └───────┬───────────────┬─────────────┬───────┘
//!         │ AgentClient   │             │
//!         ▼               ▼             ▼
//!   ┌──────────┐    ┌──────────┐   ┌──────────┐
//!   │ architect│    │ developer│   │ reviewer │
//!   │  :8000   │    │  :8001 ──┼──▶│  :8002   │
//!   └──────────┘    └──────────┘   └──────────┘
//! ```
//!
//! Every agent is symmetric: it serves inbound messages through an
//! [`AgentServer`] and, when it holds delegates, calls onward through an
//! [`AgentClient`] resolved via its [`DelegationRouter`] (the developer agent
//! above delegates to the reviewer on its own).
//!
//! ## Key concepts
//!
//! - **Card**: discoverable metadata (name, address, capability tags) served
//!   at a well-known path
//! - **Message**: one conversational turn of ordered content parts
//! - **Task**: a unit of work resolved through ordered update events until a
//!   terminal status
//! - **Capability**: the injected, opaque reasoning step of an agent
//! - **Delegate**: another agent called by logical name through the router

pub mod card;
pub mod client;
pub mod coordinator;
pub mod error;
pub mod protocol;
pub mod router;
pub mod server;

pub use card::{AgentCard, AGENT_CARD_PATH, CAP_STREAMING};
pub use client::{AgentClient, ReplyEvent, ResponseStream};
pub use coordinator::{Coordinator, PipelineReport, Stage, StageFailure, StageOutput};
pub use error::Error;
pub use protocol::{
    FailureCode, Message, MessageId, Part, Role, StreamFrame, Task, TaskId, TaskProgress,
    TaskStatus, TaskUpdate, WireFailure,
};
pub use router::{DelegationRouter, RouterBuilder};
pub use server::{AgentServer, Capability, Outcome};

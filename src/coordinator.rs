//! Orchestration coordinator - sequences the delegate pipeline.
//!
//! The coordinator is an agent whose only capability is calling other agents:
//! architect first with the original instruction, then developer with the
//! plan, then reviewer with the code, then a summary of all three outputs.
//! The policy is an explicit state machine so each transition is observable
//! and testable; stages run strictly sequentially and a failing stage goes
//! straight to [`Stage::Failed`] without invoking the rest.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

use crate::client::AgentClient;
use crate::error::Error;
use crate::protocol::{Message, TaskProgress};
use crate::router::DelegationRouter;
use crate::server::{Capability, Outcome};

/// Logical delegate names the pipeline resolves through its router.
pub const DELEGATE_ARCHITECT: &str = "architect";
pub const DELEGATE_DEVELOPER: &str = "developer";
pub const DELEGATE_REVIEWER: &str = "reviewer";

/// Default per-call deadline for delegate calls.
pub const DEFAULT_DEADLINE: Duration = Duration::from_secs(120);

/// States of the coordination pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    AwaitingArchitect,
    AwaitingDeveloper,
    AwaitingReviewer,
    Summarizing,
    Done,
    Failed,
}

impl Stage {
    /// Short label used in progress updates and failure reports.
    pub fn label(&self) -> &'static str {
        match self {
            Stage::AwaitingArchitect => "architect",
            Stage::AwaitingDeveloper => "developer",
            Stage::AwaitingReviewer => "reviewer",
            Stage::Summarizing => "summarizing",
            Stage::Done => "done",
            Stage::Failed => "failed",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Output of one completed delegate stage.
#[derive(Debug, Clone)]
pub struct StageOutput {
    pub stage: Stage,
    pub delegate: String,
    pub text: String,
}

/// The stage a pipeline failed in, and why.
#[derive(Debug)]
pub struct StageFailure {
    pub stage: Stage,
    pub error: Error,
}

impl fmt::Display for StageFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} stage failed: {}", self.stage, self.error)
    }
}

/// Everything one pipeline run produced.
///
/// Completed stage outputs are kept on failure; they are informational, not
/// transactional, and nothing is rolled back.
#[derive(Debug)]
pub struct PipelineReport {
    /// States visited, in order.
    pub trace: Vec<Stage>,
    /// Outputs of the stages that completed.
    pub outputs: Vec<StageOutput>,
    /// The summary message, or the failure that ended the run.
    pub outcome: Result<Message, StageFailure>,
}

/// Sequences architect, developer, and reviewer delegate calls.
#[derive(Clone)]
pub struct Coordinator {
    client: AgentClient,
    deadline: Duration,
}

impl Coordinator {
    pub fn new(client: AgentClient) -> Self {
        Self {
            client,
            deadline: DEFAULT_DEADLINE,
        }
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    /// Run the pipeline for one instruction.
    ///
    /// `progress`, when present, receives one working update per stage entered.
    #[instrument(skip_all, fields(instruction_len = instruction.len()))]
    pub async fn run(
        &self,
        router: &DelegationRouter,
        instruction: &str,
        progress: Option<&mpsc::Sender<TaskProgress>>,
    ) -> PipelineReport {
        let stages = [
            (Stage::AwaitingArchitect, DELEGATE_ARCHITECT),
            (Stage::AwaitingDeveloper, DELEGATE_DEVELOPER),
            (Stage::AwaitingReviewer, DELEGATE_REVIEWER),
        ];

        let mut trace = Vec::with_capacity(6);
        let mut outputs: Vec<StageOutput> = Vec::with_capacity(3);
        let mut input = instruction.to_string();

        for (stage, delegate) in stages {
            trace.push(stage);
            notify(progress, stage).await;

            match self.call_delegate(router, delegate, &input).await {
                Ok(text) => {
                    debug!(stage = %stage, chars = text.len(), "stage completed");
                    outputs.push(StageOutput {
                        stage,
                        delegate: delegate.to_string(),
                        text: text.clone(),
                    });
                    input = text;
                }
                Err(error) => {
                    warn!(stage = %stage, error = %error, "stage failed, aborting pipeline");
                    trace.push(Stage::Failed);
                    return PipelineReport {
                        trace,
                        outputs,
                        outcome: Err(StageFailure { stage, error }),
                    };
                }
            }
        }

        trace.push(Stage::Summarizing);
        notify(progress, Stage::Summarizing).await;

        let summary = Message::agent(
            outputs
                .iter()
                .map(|o| o.text.as_str())
                .collect::<Vec<_>>()
                .join("\n\n"),
        );

        trace.push(Stage::Done);
        info!(stages = outputs.len(), "pipeline complete");

        PipelineReport {
            trace,
            outputs,
            outcome: Ok(summary),
        }
    }

    async fn call_delegate(
        &self,
        router: &DelegationRouter,
        name: &str,
        text: &str,
    ) -> Result<String, Error> {
        let card = router.resolve_delegate(name)?;
        let reply = self
            .client
            .send(card, Message::user(text), self.deadline)
            .await?;
        Ok(reply.text())
    }
}

async fn notify(progress: Option<&mpsc::Sender<TaskProgress>>, stage: Stage) {
    if let Some(tx) = progress {
        // An abandoned caller is not a reason to stop the pipeline.
        let _ = tx
            .send(TaskProgress::working(Message::agent(format!(
                "stage: {stage}"
            ))))
            .await;
    }
}

#[async_trait]
impl Capability for Coordinator {
    async fn respond(
        &self,
        message: Message,
        _history: Vec<Message>,
        router: Arc<DelegationRouter>,
    ) -> Result<Outcome, Error> {
        let instruction = message.text();
        let coordinator = self.clone();
        let (tx, rx) = mpsc::channel(16);

        tokio::spawn(async move {
            let report = coordinator.run(&router, &instruction, Some(&tx)).await;
            let terminal = match report.outcome {
                Ok(summary) => TaskProgress::completed(summary),
                Err(failure) => {
                    let mut text = String::new();
                    for output in &report.outputs {
                        text.push_str(&output.text);
                        text.push_str("\n\n");
                    }
                    text.push_str(&format!("ERROR: {failure}"));
                    TaskProgress::failed(Message::agent(text))
                }
            };
            let _ = tx.send(terminal).await;
        });

        Ok(Outcome::TaskStream(rx))
    }
}

//! Per-submission execution context shared by the stage components.

use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::agents::AgentKind;
use crate::events::{EventKind, EventSink};
use crate::task::{SubtaskId, TaskId};

/// Context passed to every stage of one task's run.
///
/// # Thread Safety
/// Cloning is cheap: the event sink shares its sequence counter and the
/// cancellation token is reference counted.
#[derive(Debug, Clone)]
pub struct RunContext {
    /// Ordered event stream of the task
    pub events: EventSink,

    /// Optional cancellation token for cooperative cancellation.
    pub cancel_token: Option<CancellationToken>,
}

impl RunContext {
    pub fn new(events: EventSink) -> Self {
        Self {
            events,
            cancel_token: None,
        }
    }

    /// Context that only logs events, for running a stage on its own.
    pub fn detached(task_id: TaskId) -> Self {
        Self::new(EventSink::new(task_id))
    }

    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel_token = Some(token);
        self
    }

    pub fn task_id(&self) -> TaskId {
        self.events.task_id()
    }

    /// Check if cooperative cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token
            .as_ref()
            .map(|t| t.is_cancelled())
            .unwrap_or(false)
    }

    pub fn emit_start(
        &self,
        agent: AgentKind,
        subtask: Option<SubtaskId>,
        message: impl Into<String>,
        detail: Value,
    ) {
        self.events.emit(agent, EventKind::Start, subtask, message, detail);
    }

    pub fn emit_success(
        &self,
        agent: AgentKind,
        subtask: Option<SubtaskId>,
        message: impl Into<String>,
        detail: Value,
    ) {
        self.events.emit(agent, EventKind::Success, subtask, message, detail);
    }

    pub fn emit_error(
        &self,
        agent: AgentKind,
        subtask: Option<SubtaskId>,
        message: impl Into<String>,
        detail: Value,
    ) {
        self.events.emit(agent, EventKind::Error, subtask, message, detail);
    }

    pub fn emit_replanning(&self, message: impl Into<String>, detail: Value) {
        self.events
            .emit(AgentKind::Coordinator, EventKind::Replanning, None, message, detail);
    }
}

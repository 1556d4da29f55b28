//! Lifecycle events streamed to dashboards and log viewers.
//!
//! Events of one task carry a strictly increasing `seq`, and are delivered
//! to every output in that order.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{broadcast, mpsc};

use crate::agents::AgentKind;
use crate::task::{SubtaskId, TaskId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Start,
    Success,
    Error,
    Replanning,
}

/// One entry of a task's event stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LifecycleEvent {
    /// Position in the task's stream, starting at 0
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    pub agent: AgentKind,
    pub task_id: TaskId,
    pub subtask_id: Option<SubtaskId>,
    pub kind: EventKind,
    pub message: String,
    #[serde(default)]
    pub detail: Value,
}

/// Per-task event emitter.
///
/// Cloning shares the sequence counter, so clones handed to different
/// stages still produce one ordered stream.
#[derive(Debug, Clone)]
pub struct EventSink {
    task_id: TaskId,
    seq: Arc<Mutex<u64>>,
    stream: Option<mpsc::UnboundedSender<LifecycleEvent>>,
    bus: Option<broadcast::Sender<LifecycleEvent>>,
}

impl EventSink {
    /// Sink that only logs.
    pub fn new(task_id: TaskId) -> Self {
        Self {
            task_id,
            seq: Arc::new(Mutex::new(0)),
            stream: None,
            bus: None,
        }
    }

    /// Also deliver events to a dedicated per-task stream.
    pub fn with_stream(mut self, tx: mpsc::UnboundedSender<LifecycleEvent>) -> Self {
        self.stream = Some(tx);
        self
    }

    /// Also publish events on a shared bus (e.g. for dashboards).
    pub fn with_bus(mut self, bus: broadcast::Sender<LifecycleEvent>) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    /// Emit an event.
    ///
    /// Delivery is best-effort: a dropped receiver never fails the task.
    pub fn emit(
        &self,
        agent: AgentKind,
        kind: EventKind,
        subtask_id: Option<SubtaskId>,
        message: impl Into<String>,
        detail: Value,
    ) {
        // Sequence assignment and delivery happen under one lock so that
        // receivers observe events in seq order.
        let mut seq = self.seq.lock().unwrap_or_else(|e| e.into_inner());
        let event = LifecycleEvent {
            seq: *seq,
            timestamp: Utc::now(),
            agent,
            task_id: self.task_id,
            subtask_id,
            kind,
            message: message.into(),
            detail,
        };
        *seq += 1;

        tracing::debug!(
            task_id = %event.task_id,
            agent = %event.agent,
            kind = ?event.kind,
            seq = event.seq,
            "{}",
            event.message
        );

        if let Some(ref bus) = self.bus {
            let _ = bus.send(event.clone());
        }
        if let Some(ref stream) = self.stream {
            let _ = stream.send(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_clones_share_sequence() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sink = EventSink::new(TaskId::new()).with_stream(tx);
        let other = sink.clone();

        sink.emit(AgentKind::Planner, EventKind::Start, None, "plan", Value::Null);
        other.emit(AgentKind::Executor, EventKind::Start, None, "exec", json!({"n": 1}));
        sink.emit(AgentKind::Executor, EventKind::Success, None, "done", Value::Null);

        let seqs: Vec<u64> = std::iter::from_fn(|| rx.try_recv().ok())
            .map(|e| e.seq)
            .collect();
        assert_eq!(seqs, vec![0, 1, 2]);
    }

    #[test]
    fn test_bus_and_stream_both_receive() {
        let (bus, mut bus_rx) = broadcast::channel(8);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let task_id = TaskId::new();
        let sink = EventSink::new(task_id).with_bus(bus).with_stream(tx);

        sink.emit(AgentKind::Coordinator, EventKind::Replanning, None, "again", Value::Null);

        let a = bus_rx.try_recv().unwrap();
        let b = rx.try_recv().unwrap();
        assert_eq!(a, b);
        assert_eq!(a.task_id, task_id);
        assert_eq!(a.kind, EventKind::Replanning);
    }

    #[test]
    fn test_dropped_receivers_are_ignored() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        let sink = EventSink::new(TaskId::new()).with_stream(tx);
        sink.emit(AgentKind::Verifier, EventKind::Error, None, "nobody listens", Value::Null);
    }
}

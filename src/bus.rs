//! The message bus: the Executor's observable output. A multicast channel of
//! [`BusEvent`]s with a bounded buffer; slow subscribers fall behind and see
//! a gap rather than blocking the producer (§5 ordering/backpressure).

use serde_json::Value;
use tokio::sync::broadcast;

use crate::types::{StreamChunk, ToolCall, ToolResult};

/// Default buffer capacity for a new bus (number of events, not bytes).
pub const DEFAULT_CAPACITY: usize = 256;

/// One observable event emitted by the Executor during a run.
#[derive(Debug, Clone)]
pub enum BusEvent {
    StepBegin { step: u32 },
    StepInterrupted { step: u32 },
    ContentPartMessage { step: u32, chunk: StreamChunk },
    ToolCallMessage { step: u32, call: ToolCall },
    ToolResultMessage { step: u32, call_id: String, result: ToolResultSummary },
    CompactionBegin { step: u32 },
    CompactionEnd { step: u32, success: bool },
    SkillsActivated { step: u32, names: Vec<String> },
    StatusUpdate { message: String },
    ApprovalRequest { action_kind: String, description: String },
}

/// A bus-friendly rendering of a [`ToolResult`] (avoids cloning large raw
/// tool output into every subscriber's queue twice).
#[derive(Debug, Clone)]
pub struct ToolResultSummary {
    pub is_error: bool,
    pub message: String,
    pub output: Option<Value>,
}

impl From<&ToolResult> for ToolResultSummary {
    fn from(result: &ToolResult) -> Self {
        match result {
            ToolResult::Ok { output, message } => Self {
                is_error: false,
                message: message.clone(),
                output: Some(output.clone()),
            },
            ToolResult::Error { output, message } => Self {
                is_error: true,
                message: message.clone(),
                output: output.clone(),
            },
            ToolResult::Rejected { reason } => Self {
                is_error: true,
                message: reason.clone(),
                output: None,
            },
        }
    }
}

/// Thin wrapper over a `tokio::sync::broadcast` sender. Cloning a `Bus`
/// shares the same channel (cheap, `Arc`-backed internally).
#[derive(Clone)]
pub struct Bus {
    tx: broadcast::Sender<BusEvent>,
}

impl Bus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Send one event to all current subscribers. Silently drops the event
    /// if there are no subscribers (matches `broadcast`'s semantics).
    pub fn send(&self, event: BusEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BusEvent> {
        self.tx.subscribe()
    }
}

impl Default for Bus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscriber_receives_events_in_order() {
        let bus = Bus::new(16);
        let mut rx = bus.subscribe();

        bus.send(BusEvent::StepBegin { step: 1 });
        bus.send(BusEvent::StatusUpdate {
            message: "working".into(),
        });

        match rx.recv().await.unwrap() {
            BusEvent::StepBegin { step } => assert_eq!(step, 1),
            other => panic!("unexpected first event: {other:?}"),
        }
        match rx.recv().await.unwrap() {
            BusEvent::StatusUpdate { message } => assert_eq!(message, "working"),
            other => panic!("unexpected second event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn lagging_subscriber_sees_lagged_error() {
        let bus = Bus::new(2);
        let mut rx = bus.subscribe();

        for i in 0..5 {
            bus.send(BusEvent::StepBegin { step: i });
        }

        let result = rx.recv().await;
        assert!(matches!(result, Err(broadcast::error::RecvError::Lagged(_))));
    }

    #[tokio::test]
    async fn send_without_subscribers_does_not_panic() {
        let bus = Bus::new(4);
        bus.send(BusEvent::StatusUpdate {
            message: "no one listening".into(),
        });
    }

    #[test]
    fn tool_result_summary_maps_variants() {
        let err = ToolResult::Error {
            output: None,
            message: "boom".into(),
        };
        let summary = ToolResultSummary::from(&err);
        assert!(summary.is_error);
        assert_eq!(summary.message, "boom");
    }
}

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::types::Phase;

// ---------------------------------------------------------------------------
// RunEvent
// ---------------------------------------------------------------------------

/// Lifecycle events fanned out to external consumers (dashboards,
/// notifiers). Delivery is best-effort; dropped events are never an error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunEvent {
    RunStarted { run_id: String },
    NodeStarted { run_id: String, phase: Phase },
    WaitingApproval { run_id: String, phase: Phase },
    RunCompleted { run_id: String },
    RunFailed { run_id: String, error: String },
    RunCancelled { run_id: String },
    CiFixAttempt { run_id: String, attempt: u32, max_attempts: u32 },
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Process-wide broadcast of run events.
///
/// Constructed once per worker and carried in the worker context — never a
/// module-level singleton.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<RunEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(256);
        Self { tx }
    }

    /// Emit an event. Silently drops when there are no subscribers.
    pub fn emit(&self, event: RunEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RunEvent> {
        self.tx.subscribe()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_emitted_events() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        bus.emit(RunEvent::RunStarted {
            run_id: "r1".into(),
        });
        bus.emit(RunEvent::NodeStarted {
            run_id: "r1".into(),
            phase: Phase::Analyze,
        });

        assert_eq!(
            rx.recv().await.unwrap(),
            RunEvent::RunStarted {
                run_id: "r1".into()
            }
        );
        assert_eq!(
            rx.recv().await.unwrap(),
            RunEvent::NodeStarted {
                run_id: "r1".into(),
                phase: Phase::Analyze,
            }
        );
    }

    #[test]
    fn emit_without_subscribers_is_fine() {
        let bus = EventBus::new();
        bus.emit(RunEvent::RunCompleted {
            run_id: "r1".into(),
        });
    }
}

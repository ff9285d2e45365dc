//! Pipeline event types and broadcast bus
//!
//! Events are broadcast via `EventBus` and serialized for SSE transmission
//! to operator tooling.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Operator-visible pipeline events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PipelineEvent {
    /// A sweep over the staging area started
    RunStarted {
        run_id: Uuid,
        staged_files: usize,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// One source file reached a terminal status
    FileProcessed {
        run_id: Uuid,
        path: String,
        outcome: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Sweep finished; counts per the exit/status contract
    RunCompleted {
        run_id: Uuid,
        applied: usize,
        ignored: usize,
        quarantined: usize,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Sweep aborted by the cancellation token
    RunCancelled {
        run_id: Uuid,
        timestamp: chrono::DateTime<chrono::Utc>,
    },
}

/// Broadcast bus for pipeline events
///
/// Wraps `tokio::sync::broadcast`: multiple subscribers, lagging receivers
/// drop oldest events rather than blocking the pipeline.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<PipelineEvent>,
}

impl EventBus {
    /// Create a bus with the given channel capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.sender.subscribe()
    }

    /// Broadcast an event; no-op when no subscriber is connected
    pub fn publish(&self, event: PipelineEvent) {
        // send() only fails with zero receivers, which is fine
        let _ = self.sender.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_without_subscribers_is_noop() {
        let bus = EventBus::new(16);
        bus.publish(PipelineEvent::RunCancelled {
            run_id: Uuid::new_v4(),
            timestamp: chrono::Utc::now(),
        });
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_subscriber_receives_event() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();
        let run_id = Uuid::new_v4();
        bus.publish(PipelineEvent::RunStarted {
            run_id,
            staged_files: 3,
            timestamp: chrono::Utc::now(),
        });
        match rx.recv().await.unwrap() {
            PipelineEvent::RunStarted {
                run_id: got,
                staged_files,
                ..
            } => {
                assert_eq!(got, run_id);
                assert_eq!(staged_files, 3);
            }
            other => panic!("Unexpected event: {:?}", other),
        }
    }
}

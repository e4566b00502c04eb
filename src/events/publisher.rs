//! In-process fan-out of trigger lifecycle notifications. Cross-service
//! publication (the CD success topic) goes through the NATS writer instead.

use tokio::sync::broadcast;

use crate::state_machine::StageKind;

use super::DeploymentEvent;

/// Notifications emitted by the trigger paths for in-process listeners
/// (notification hooks, cache invalidation).
#[derive(Debug, Clone, PartialEq)]
pub enum LifecycleEvent {
    /// A deploy completed and the release event was written.
    DeploymentTriggered {
        pipeline_id: i32,
        runner_id: i64,
        event: DeploymentEvent,
    },
    /// A pre/post stage workload was submitted to the cluster.
    StageTriggered {
        pipeline_id: i32,
        runner_id: i64,
        stage: StageKind,
        workflow_name: String,
    },
}

#[derive(Debug, Clone)]
pub struct EventPublisher {
    sender: broadcast::Sender<LifecycleEvent>,
}

impl EventPublisher {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Broadcast to whoever listens. No subscribers is not an error:
    /// lifecycle listeners are optional.
    pub fn publish(&self, event: LifecycleEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventPublisher {
    fn default() -> Self {
        Self::new(1000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_without_subscribers_is_ok() {
        let publisher = EventPublisher::new(8);
        publisher.publish(LifecycleEvent::StageTriggered {
            pipeline_id: 3,
            runner_id: 11,
            stage: StageKind::Pre,
            workflow_name: "7PRE-orders-abcde".to_string(),
        });
        assert_eq!(publisher.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_subscriber_receives_typed_event() {
        let publisher = EventPublisher::new(8);
        let mut rx = publisher.subscribe();
        publisher.publish(LifecycleEvent::StageTriggered {
            pipeline_id: 3,
            runner_id: 11,
            stage: StageKind::Post,
            workflow_name: "7POST-orders-abcde".to_string(),
        });
        let event = rx.recv().await.unwrap();
        let LifecycleEvent::StageTriggered {
            pipeline_id, stage, ..
        } = event
        else {
            panic!("expected stage event");
        };
        assert_eq!(pipeline_id, 3);
        assert_eq!(stage, StageKind::Post);
    }
}

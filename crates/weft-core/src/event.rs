use crate::types::RunId;

/// Progress notifications emitted while a workflow runs.
#[derive(Debug, Clone)]
pub enum WorkflowEvent {
    WorkflowStarted {
        workflow: String,
        run_id: RunId,
        depth: usize,
    },
    NodeStarted {
        workflow: String,
        node_id: String,
    },
    NodeFinished {
        workflow: String,
        node_id: String,
        success: bool,
        elapsed_ms: u64,
    },
    Rerouted {
        workflow: String,
        from_node: String,
        next_node: String,
    },
    WorkflowFinished {
        workflow: String,
        run_id: RunId,
        success: bool,
    },
}

/// Event bus using tokio broadcast channel.
/// All subscribers receive all events.
pub struct EventBus {
    tx: tokio::sync::broadcast::Sender<WorkflowEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = tokio::sync::broadcast::channel(capacity);
        Self { tx }
    }

    pub fn publish(&self, event: WorkflowEvent) {
        // Ignore error if no receivers
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<WorkflowEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscribers_receive_events() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();
        bus.publish(WorkflowEvent::NodeStarted {
            workflow: "wf".into(),
            node_id: "a".into(),
        });
        match rx.recv().await.unwrap() {
            WorkflowEvent::NodeStarted { node_id, .. } => assert_eq!(node_id, "a"),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_publish_without_subscribers() {
        let bus = EventBus::default();
        bus.publish(WorkflowEvent::WorkflowFinished {
            workflow: "wf".into(),
            run_id: RunId::new(),
            success: true,
        });
    }
}

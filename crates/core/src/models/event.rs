use serde::{Deserialize, Serialize};

use super::node::NodeStatus;
use super::operation::OperationType;
use super::routing::RoutingStrategy;

/// Structured lifecycle events emitted to the telemetry sink.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LifecycleEvent {
    OperationCreated {
        operation_id: String,
        session_id: String,
        operation_type: OperationType,
        strategy: RoutingStrategy,
        participants: usize,
    },
    OperationCompleted {
        operation_id: String,
        operation_type: OperationType,
        duration_ms: u64,
    },
    OperationFailed {
        operation_id: String,
        operation_type: OperationType,
        duration_ms: u64,
        error: String,
    },
    OperationCancelled {
        operation_id: String,
        operation_type: OperationType,
        duration_ms: u64,
        reason: String,
    },
    SubOperationRetried {
        operation_id: String,
        sub_operation_id: String,
        node_id: String,
        attempt: u32,
        error: String,
    },
    NodeRegistered {
        node_id: String,
    },
    NodeStatusChanged {
        node_id: String,
        from: NodeStatus,
        to: NodeStatus,
    },
    NodeRemoved {
        node_id: String,
        forced: bool,
    },
    OperationsCollected {
        count: usize,
    },
}

impl LifecycleEvent {
    pub fn name(&self) -> &'static str {
        match self {
            LifecycleEvent::OperationCreated { .. } => "operation_created",
            LifecycleEvent::OperationCompleted { .. } => "operation_completed",
            LifecycleEvent::OperationFailed { .. } => "operation_failed",
            LifecycleEvent::OperationCancelled { .. } => "operation_cancelled",
            LifecycleEvent::SubOperationRetried { .. } => "sub_operation_retried",
            LifecycleEvent::NodeRegistered { .. } => "node_registered",
            LifecycleEvent::NodeStatusChanged { .. } => "node_status_changed",
            LifecycleEvent::NodeRemoved { .. } => "node_removed",
            LifecycleEvent::OperationsCollected { .. } => "operations_collected",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serialization_is_tagged() {
        let event = LifecycleEvent::NodeStatusChanged {
            node_id: "node-1".to_string(),
            from: NodeStatus::Active,
            to: NodeStatus::Unavailable,
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["event"], "node_status_changed");
        assert_eq!(value["to"], "unavailable");
        assert_eq!(event.name(), "node_status_changed");
    }
}

//! Metrics collector for the operation coordinator
//!
//! Turns lifecycle events into `metrics` counters and histograms. Without an
//! installed recorder every call is a no-op.

use metrics::{counter, gauge, histogram, Counter, Gauge, Histogram};
use tracing::debug;

use coordinator_core::models::LifecycleEvent;

/// Metrics collector for the operation coordinator
pub struct MetricsCollector {
    // Operation metrics
    operations_created_total: Counter,
    operations_completed_total: Counter,
    operations_failed_total: Counter,
    operations_cancelled_total: Counter,
    operation_duration: Histogram,
    sub_operation_retries_total: Counter,
    operations_collected_total: Counter,

    // Node metrics
    nodes_registered_total: Counter,
    nodes_removed_total: Counter,
    node_status_changes_total: Counter,

    telemetry_dropped_events: Gauge,
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            operations_created_total: counter!("coordinator_operations_created_total"),
            operations_completed_total: counter!("coordinator_operations_completed_total"),
            operations_failed_total: counter!("coordinator_operations_failed_total"),
            operations_cancelled_total: counter!("coordinator_operations_cancelled_total"),
            operation_duration: histogram!("coordinator_operation_duration_seconds"),
            sub_operation_retries_total: counter!("coordinator_sub_operation_retries_total"),
            operations_collected_total: counter!("coordinator_operations_collected_total"),
            nodes_registered_total: counter!("coordinator_nodes_registered_total"),
            nodes_removed_total: counter!("coordinator_nodes_removed_total"),
            node_status_changes_total: counter!("coordinator_node_status_changes_total"),
            telemetry_dropped_events: gauge!("coordinator_telemetry_dropped_events"),
        }
    }

    /// Record one lifecycle event
    pub fn record(&self, event: &LifecycleEvent) {
        match event {
            LifecycleEvent::OperationCreated { .. } => self.operations_created_total.increment(1),
            LifecycleEvent::OperationCompleted { duration_ms, .. } => {
                self.operations_completed_total.increment(1);
                self.record_duration(*duration_ms);
            }
            LifecycleEvent::OperationFailed { duration_ms, .. } => {
                self.operations_failed_total.increment(1);
                self.record_duration(*duration_ms);
            }
            LifecycleEvent::OperationCancelled { duration_ms, .. } => {
                self.operations_cancelled_total.increment(1);
                self.record_duration(*duration_ms);
            }
            LifecycleEvent::SubOperationRetried { .. } => {
                self.sub_operation_retries_total.increment(1)
            }
            LifecycleEvent::NodeRegistered { .. } => self.nodes_registered_total.increment(1),
            LifecycleEvent::NodeStatusChanged { from, to, .. } => {
                self.node_status_changes_total.increment(1);
                counter!(
                    "coordinator_node_transitions_total",
                    "from" => from.as_str(),
                    "to" => to.as_str()
                )
                .increment(1);
            }
            LifecycleEvent::NodeRemoved { .. } => self.nodes_removed_total.increment(1),
            LifecycleEvent::OperationsCollected { count } => {
                self.operations_collected_total.increment(*count as u64)
            }
        }
        debug!(event = event.name(), "Lifecycle event recorded");
    }

    fn record_duration(&self, duration_ms: u64) {
        self.operation_duration.record(duration_ms as f64 / 1000.0);
    }

    pub fn update_dropped_events(&self, dropped: u64) {
        self.telemetry_dropped_events.set(dropped as f64);
    }
}

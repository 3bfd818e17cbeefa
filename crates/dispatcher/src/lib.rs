//! Operation dispatch for the coordinator.
//!
//! Holds the node registry and operation table, routes operations onto nodes,
//! executes sub-operations and runs the background health, drain and GC tasks.

pub mod coordinator;
pub mod drain;
pub mod executor;
pub mod garbage_collector;
pub mod health_monitor;
pub mod node_registry;
pub mod operation_store;
pub mod routing;
pub mod strategies;

#[cfg(test)]
pub mod test_utils;

#[cfg(test)]
mod strategies_test;

pub use coordinator::OperationCoordinator;
pub use drain::DrainController;
pub use executor::{ExecutionContext, ExecutionReport, RetryPolicy, SubOperationExecutor};
pub use garbage_collector::{GarbageCollector, GarbageCollectorConfig};
pub use health_monitor::{HealthMonitor, HealthMonitorConfig};
pub use node_registry::NodeRegistry;
pub use operation_store::OperationStore;
pub use routing::{DefaultRoutingPolicy, RESERVED_ARGS};
pub use strategies::*;

//! Node agent: executes sub-operations sent by the coordinator and keeps the
//! node registered through periodic heartbeats.

pub mod agent_client;
pub mod agent_service;
pub mod coordinator_client;
pub mod heartbeat_manager;

pub use agent_client::{HttpAgentClient, AGENT_EXECUTE_PATH};
pub use agent_service::{node_descriptor, AgentService};
pub use coordinator_client::CoordinatorClient;
pub use heartbeat_manager::HeartbeatManager;

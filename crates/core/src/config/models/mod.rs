pub mod agent;
pub mod api_observability;
pub mod app_config;
pub mod coordinator;

pub use agent::AgentConfig;
pub use api_observability::{ApiConfig, ObservabilityConfig};
pub use app_config::AppConfig;
pub use coordinator::CoordinatorConfig;

pub mod agent;
pub mod balancer;
pub mod routing;
pub mod telemetry;

pub use agent::*;
pub use balancer::*;
pub use routing::*;
pub use telemetry::*;

//! 分布式操作协调器的核心库：错误类型、配置、数据模型、镜像操作逻辑以及各组件之间的接口。

pub mod config;
pub mod errors;
pub mod models;
pub mod operations;
pub mod traits;

pub use config::AppConfig;
pub use errors::*;
pub use models::*;
pub use traits::{LoadBalancer, RemoteAgent, RoutingPolicy, TelemetrySink};

//! # 数据模型
//!
//! 协调器的核心数据结构：工作节点、分布式操作及其子操作、路由决策、
//! 节点代理的请求/响应以及生命周期事件。
//!
//! 所有模型都实现了序列化和反序列化，既用于HTTP接口，也用于节点代理之间的通信。
//! 注册表和操作表只对外返回这些结构的副本。

pub mod agent;
pub mod event;
pub mod node;
pub mod operation;
pub mod routing;

pub use agent::{AgentRequest, AgentResponse, HeartbeatRequest};
pub use event::LifecycleEvent;
pub use node::{Node, NodeMetrics, NodeResources, NodeStatus};
pub use operation::{
    DistributedOperation, Fault, OperationArgs, OperationStatus, OperationType, Outcome,
    SubOperation, SubOperationStatus,
};
pub use routing::{NodeRequirements, RoutingDecision, RoutingStrategy};

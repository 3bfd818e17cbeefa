use async_trait::async_trait;

use crate::{
    models::{AgentRequest, AgentResponse, Node},
    CoordinatorResult,
};

/// 远程执行边界：把一个子操作发送到目标节点的代理并等待结果
///
/// 实现需要区分可重试的传输错误（`Network`/`Timeout`）与代理返回的语义失败（`Remote`）。
#[async_trait]
pub trait RemoteAgent: Send + Sync {
    async fn execute(&self, node: &Node, request: &AgentRequest) -> CoordinatorResult<AgentResponse>;
}

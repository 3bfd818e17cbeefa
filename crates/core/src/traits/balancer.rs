use crate::{
    models::{Node, NodeRequirements, OperationType},
    CoordinatorResult,
};

/// 负载均衡策略接口
pub trait LoadBalancer: Send + Sync {
    /// 从候选节点中选择一个节点
    fn select_node(
        &self,
        operation_type: OperationType,
        requirements: &NodeRequirements,
        candidates: &[Node],
    ) -> CoordinatorResult<Node> {
        self.select_nodes(operation_type, requirements, candidates, 1)?
            .into_iter()
            .next()
            .ok_or_else(|| crate::CoordinatorError::no_eligible_nodes(operation_type.as_str()))
    }

    /// 按优先顺序选出最多 `count` 个节点
    fn select_nodes(
        &self,
        operation_type: OperationType,
        requirements: &NodeRequirements,
        candidates: &[Node],
        count: usize,
    ) -> CoordinatorResult<Vec<Node>>;

    /// 最近一次观测到的负载率
    fn report_load(&self, node_id: &str) -> f64;

    /// 节点注册、心跳或子操作结束后，用注册表中的最新副本刷新负载
    fn update_metrics(&self, node: &Node);

    /// 获取策略名称
    fn name(&self) -> &str;
}

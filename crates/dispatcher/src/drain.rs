use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use coordinator_core::{models::Node, CoordinatorError, CoordinatorResult};

use crate::node_registry::NodeRegistry;
use crate::operation_store::OperationStore;

/// 节点排空控制器
///
/// 先把节点标记为 draining，使路由和负载均衡不再选择它，也不再接受新的容量占用，
/// 再在超时时间内以有界退避轮询该节点上仍在执行的子操作，
/// 执行中的子操作和已占用的容量都归零后才从注册表移除。
/// 超时返回 `Timeout`，节点保持 draining，调用方可以重试或强制移除。
pub struct DrainController {
    registry: Arc<NodeRegistry>,
    operations: Arc<OperationStore>,
    poll_initial: Duration,
    poll_max: Duration,
}

impl DrainController {
    pub fn new(
        registry: Arc<NodeRegistry>,
        operations: Arc<OperationStore>,
        poll_initial: Duration,
        poll_max: Duration,
    ) -> Self {
        Self {
            registry,
            operations,
            poll_initial,
            poll_max: poll_max.max(poll_initial),
        }
    }

    pub async fn drain(&self, node_id: &str, timeout: Duration) -> CoordinatorResult<Node> {
        self.registry.mark_draining(node_id).await?;
        info!(node_id = %node_id, timeout = ?timeout, "开始排空节点");

        let deadline = Instant::now() + timeout;
        let mut delay = self.poll_initial;

        loop {
            let mut in_flight = self.operations.executing_on(node_id).await;
            if in_flight == 0 {
                match self.registry.remove_if_idle(node_id).await? {
                    Some(node) => {
                        info!(node_id = %node_id, "节点排空完成");
                        return Ok(node);
                    }
                    // 已占用容量但尚未进入执行状态的子操作
                    None => {
                        in_flight =
                            self.registry.get(node_id).await?.metrics.active_operations as usize;
                    }
                }
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                warn!(
                    node_id = %node_id,
                    in_flight,
                    "节点排空超时，保持draining状态"
                );
                return Err(CoordinatorError::timeout(format!(
                    "node {node_id} still has {in_flight} executing sub-operation(s) after {timeout:?}"
                )));
            }

            debug!(node_id = %node_id, in_flight, "等待 {:?} 后重新检查", delay.min(remaining));
            tokio::time::sleep(delay.min(remaining)).await;
            delay = (delay * 2).min(self.poll_max);
        }
    }
}

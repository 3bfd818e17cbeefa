use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use coordinator_core::{
    models::{LifecycleEvent, Node, NodeMetrics, NodeStatus},
    traits::TelemetrySink,
    CoordinatorError, CoordinatorResult,
};

#[derive(Default)]
struct RegistryState {
    nodes: HashMap<String, Node>,
    /// 已移除节点的ID及移除时间，重新注册或超过保留期后清除
    removed: HashMap<String, DateTime<Utc>>,
}

/// 节点注册表
///
/// 所有读写都经过同一把读写锁，对外只返回节点副本。
/// `active_operations` 只由 [`begin_operation`](Self::begin_operation)、
/// [`release_operation`](Self::release_operation) 和
/// [`complete_operation`](Self::complete_operation) 维护。
pub struct NodeRegistry {
    state: RwLock<RegistryState>,
    telemetry: Arc<dyn TelemetrySink>,
}

impl NodeRegistry {
    pub fn new(telemetry: Arc<dyn TelemetrySink>) -> Self {
        Self {
            state: RwLock::new(RegistryState::default()),
            telemetry,
        }
    }

    fn emit_status_change(&self, node_id: &str, from: NodeStatus, to: NodeStatus) {
        if from != to {
            self.telemetry.emit(LifecycleEvent::NodeStatusChanged {
                node_id: node_id.to_string(),
                from,
                to,
            });
        }
    }

    /// 注册或更新节点，并刷新 `last_seen`
    ///
    /// 重复注册会更新地址、容量等字段但保留协调器维护的计数；
    /// draining 和 maintenance 状态的节点保持原状态，unavailable 的节点恢复为 active。
    pub async fn register(&self, mut node: Node) -> CoordinatorResult<Node> {
        if node.id.trim().is_empty() {
            return Err(CoordinatorError::validation("node id must not be empty"));
        }
        if node.address.trim().is_empty() || node.port == 0 {
            return Err(CoordinatorError::validation(format!(
                "node {} has an invalid address {}:{}",
                node.id, node.address, node.port
            )));
        }

        let mut state = self.state.write().await;
        state.removed.remove(&node.id);
        node.last_seen = Utc::now();

        let previous = state.nodes.get(&node.id).map(|existing| {
            let mut metrics = existing.metrics.clone();
            metrics.merge_reported(&node.metrics);
            (existing.status, metrics)
        });

        let snapshot = match previous {
            Some((status, metrics)) => {
                node.metrics = metrics;
                node.status = match status {
                    NodeStatus::Draining | NodeStatus::Maintenance => status,
                    NodeStatus::Active | NodeStatus::Unavailable => NodeStatus::Active,
                };
                debug!(node_id = %node.id, status = %node.status, "节点重新注册");
                self.emit_status_change(&node.id, status, node.status);
                state.nodes.insert(node.id.clone(), node.clone());
                node
            }
            None => {
                let reported = node.metrics.clone();
                node.metrics = NodeMetrics::default();
                node.metrics.merge_reported(&reported);
                node.status = NodeStatus::Active;
                info!(
                    node_id = %node.id,
                    endpoint = %node.endpoint(),
                    capacity = node.resources.max_concurrent_ops,
                    "注册新节点"
                );
                state.nodes.insert(node.id.clone(), node.clone());
                node
            }
        };

        self.telemetry.emit(LifecycleEvent::NodeRegistered {
            node_id: snapshot.id.clone(),
        });
        Ok(snapshot)
    }

    /// 处理节点心跳
    pub async fn heartbeat(
        &self,
        node_id: &str,
        metrics: Option<&NodeMetrics>,
    ) -> CoordinatorResult<Node> {
        let mut state = self.state.write().await;
        let node = state
            .nodes
            .get_mut(node_id)
            .ok_or_else(|| CoordinatorError::node_not_found(node_id))?;

        node.last_seen = Utc::now();
        if let Some(metrics) = metrics {
            node.metrics.merge_reported(metrics);
        }

        if node.status == NodeStatus::Unavailable {
            node.status = NodeStatus::Active;
            info!(node_id = %node_id, "节点心跳恢复，重新标记为active");
            self.emit_status_change(node_id, NodeStatus::Unavailable, NodeStatus::Active);
        }

        Ok(node.clone())
    }

    pub async fn get(&self, node_id: &str) -> CoordinatorResult<Node> {
        self.state
            .read()
            .await
            .nodes
            .get(node_id)
            .cloned()
            .ok_or_else(|| CoordinatorError::node_not_found(node_id))
    }

    /// 所有节点，按ID排序
    pub async fn list(&self) -> Vec<Node> {
        let state = self.state.read().await;
        let mut nodes: Vec<Node> = state.nodes.values().cloned().collect();
        nodes.sort_by(|a, b| a.id.cmp(&b.id));
        nodes
    }

    pub async fn list_active(&self) -> Vec<Node> {
        let mut nodes = self.list().await;
        nodes.retain(|node| node.status == NodeStatus::Active);
        nodes
    }

    /// active 且未满载的节点
    pub async fn list_eligible(&self) -> Vec<Node> {
        let mut nodes = self.list().await;
        nodes.retain(Node::is_eligible);
        nodes
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.nodes.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn update_metrics(&self, node_id: &str, metrics: &NodeMetrics) -> CoordinatorResult<()> {
        let mut state = self.state.write().await;
        let node = state
            .nodes
            .get_mut(node_id)
            .ok_or_else(|| CoordinatorError::node_not_found(node_id))?;
        node.metrics.merge_reported(metrics);
        Ok(())
    }

    /// 为即将分发的子操作占用节点容量
    ///
    /// 节点已移除返回 `NodeNotFound`，正在排空返回 `InvalidState`。
    /// 占用成功后排空会一直等到对应的 `complete_operation` 或 `release_operation`。
    pub async fn begin_operation(&self, node_id: &str) -> CoordinatorResult<Node> {
        let mut state = self.state.write().await;
        let node = state
            .nodes
            .get_mut(node_id)
            .ok_or_else(|| CoordinatorError::node_not_found(node_id))?;
        if node.status == NodeStatus::Draining {
            return Err(CoordinatorError::invalid_state(format!(
                "node {node_id} is draining"
            )));
        }
        node.metrics.active_operations += 1;
        Ok(node.clone())
    }

    /// 归还未实际分发的占用，不计入完成统计
    pub async fn release_operation(&self, node_id: &str) -> Option<Node> {
        let mut state = self.state.write().await;
        state.nodes.get_mut(node_id).map(|node| {
            node.metrics.active_operations = node.metrics.active_operations.saturating_sub(1);
            node.clone()
        })
    }

    /// 子操作结束时调用，返回更新后的节点副本；节点已被移除时返回 `None`
    pub async fn complete_operation(
        &self,
        node_id: &str,
        success: bool,
        latency_ms: f64,
    ) -> Option<Node> {
        let mut state = self.state.write().await;
        match state.nodes.get_mut(node_id) {
            Some(node) => {
                node.metrics.record_completion(success, latency_ms);
                Some(node.clone())
            }
            None => {
                debug!(node_id = %node_id, "子操作完成时节点已不在注册表中");
                None
            }
        }
    }

    /// 设置节点状态，返回原状态
    pub async fn set_status(&self, node_id: &str, status: NodeStatus) -> CoordinatorResult<NodeStatus> {
        let mut state = self.state.write().await;
        let node = state
            .nodes
            .get_mut(node_id)
            .ok_or_else(|| CoordinatorError::node_not_found(node_id))?;
        let previous = node.status;
        node.status = status;
        if previous != status {
            info!(node_id = %node_id, from = %previous, to = %status, "节点状态变更");
            self.emit_status_change(node_id, previous, status);
        }
        Ok(previous)
    }

    /// 开始排空：已移除的节点返回 `InvalidState`，从未注册过的返回 `NodeNotFound`
    pub async fn mark_draining(&self, node_id: &str) -> CoordinatorResult<Node> {
        let mut state = self.state.write().await;
        if state.removed.contains_key(node_id) {
            return Err(CoordinatorError::invalid_state(format!(
                "node {node_id} has already been removed"
            )));
        }
        let node = state
            .nodes
            .get_mut(node_id)
            .ok_or_else(|| CoordinatorError::node_not_found(node_id))?;
        let previous = node.status;
        node.status = NodeStatus::Draining;
        let snapshot = node.clone();
        if previous != NodeStatus::Draining {
            info!(node_id = %node_id, from = %previous, "节点进入draining状态");
            self.emit_status_change(node_id, previous, NodeStatus::Draining);
        }
        Ok(snapshot)
    }

    /// 把超过阈值未上报心跳的active节点标记为unavailable，返回受影响的节点ID
    pub async fn mark_stale_unavailable(
        &self,
        now: DateTime<Utc>,
        threshold: chrono::Duration,
    ) -> Vec<String> {
        let mut state = self.state.write().await;
        let mut demoted = Vec::new();
        for node in state.nodes.values_mut() {
            if node.status == NodeStatus::Active && node.is_stale(now, threshold) {
                warn!(
                    node_id = %node.id,
                    last_seen = %node.last_seen.format("%Y-%m-%d %H:%M:%S UTC"),
                    "节点心跳超时，标记为unavailable"
                );
                node.status = NodeStatus::Unavailable;
                demoted.push(node.id.clone());
            }
        }
        for node_id in &demoted {
            self.emit_status_change(node_id, NodeStatus::Active, NodeStatus::Unavailable);
        }
        demoted.sort();
        demoted
    }

    /// 从注册表删除节点并记录墓碑
    pub async fn remove(&self, node_id: &str, forced: bool) -> CoordinatorResult<Node> {
        let mut state = self.state.write().await;
        self.remove_locked(&mut state, node_id, forced)
    }

    /// 节点上没有占用的容量时才删除；仍有占用返回 `Ok(None)`，检查和删除在同一把写锁内完成
    pub async fn remove_if_idle(&self, node_id: &str) -> CoordinatorResult<Option<Node>> {
        let mut state = self.state.write().await;
        let busy = state
            .nodes
            .get(node_id)
            .map(|node| node.metrics.active_operations)
            .unwrap_or(0);
        if busy > 0 {
            debug!(node_id = %node_id, active_operations = busy, "节点仍有占用，暂不移除");
            return Ok(None);
        }
        self.remove_locked(&mut state, node_id, false).map(Some)
    }

    /// 删除移除时间早于 `cutoff` 的墓碑，返回清除数量
    pub async fn purge_tombstones_before(&self, cutoff: DateTime<Utc>) -> usize {
        let mut state = self.state.write().await;
        let before = state.removed.len();
        state.removed.retain(|_, removed_at| *removed_at >= cutoff);
        before - state.removed.len()
    }

    fn remove_locked(
        &self,
        state: &mut RegistryState,
        node_id: &str,
        forced: bool,
    ) -> CoordinatorResult<Node> {
        if state.removed.contains_key(node_id) {
            return Err(CoordinatorError::invalid_state(format!(
                "node {node_id} has already been removed"
            )));
        }
        let node = state
            .nodes
            .remove(node_id)
            .ok_or_else(|| CoordinatorError::node_not_found(node_id))?;
        state.removed.insert(node_id.to_string(), Utc::now());

        if forced && node.metrics.active_operations > 0 {
            warn!(
                node_id = %node_id,
                active_operations = node.metrics.active_operations,
                "强制移除仍有进行中子操作的节点"
            );
        } else {
            info!(node_id = %node_id, forced, "节点已从注册表移除");
        }
        self.telemetry.emit(LifecycleEvent::NodeRemoved {
            node_id: node_id.to_string(),
            forced,
        });
        Ok(node)
    }
}

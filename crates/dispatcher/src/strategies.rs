use std::cmp::{Ordering as CmpOrdering, Reverse};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use tracing::debug;

use coordinator_core::{
    models::{Node, NodeRequirements, OperationType},
    traits::LoadBalancer,
    CoordinatorResult,
};

#[derive(Debug, Clone, Copy)]
struct ObservedLoad {
    active_operations: u32,
    max_concurrent_ops: u32,
}

impl ObservedLoad {
    fn of(node: &Node) -> Self {
        Self {
            active_operations: node.metrics.active_operations,
            max_concurrent_ops: node.resources.max_concurrent_ops,
        }
    }

    fn ratio(&self) -> f64 {
        if self.max_concurrent_ops == 0 {
            1.0
        } else {
            self.active_operations as f64 / self.max_concurrent_ops as f64
        }
    }
}

/// 记录策略最近观测到的节点负载，供 `report_load` 使用
#[derive(Default)]
struct LoadTracker {
    loads: RwLock<HashMap<String, ObservedLoad>>,
}

impl LoadTracker {
    fn observe(&self, nodes: &[Node]) {
        if let Ok(mut loads) = self.loads.write() {
            for node in nodes {
                loads.insert(node.id.clone(), ObservedLoad::of(node));
            }
        }
    }

    fn update(&self, node: &Node) {
        if let Ok(mut loads) = self.loads.write() {
            loads.insert(node.id.clone(), ObservedLoad::of(node));
        }
    }

    fn report(&self, node_id: &str) -> f64 {
        self.loads
            .read()
            .ok()
            .and_then(|loads| loads.get(node_id).map(ObservedLoad::ratio))
            .unwrap_or(0.0)
    }
}

fn suitable<'a>(candidates: &'a [Node], requirements: &NodeRequirements) -> Vec<&'a Node> {
    candidates
        .iter()
        .filter(|node| node.is_eligible() && node.satisfies(requirements))
        .collect()
}

/// 最小负载策略
///
/// 按 `active_operations / max_concurrent_ops` 升序选择；负载相同时依次比较
/// 平均延迟、区域偏好、节点ID，保证结果确定。
#[derive(Default)]
pub struct LeastLoadedStrategy {
    tracker: LoadTracker,
}

impl LeastLoadedStrategy {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LoadBalancer for LeastLoadedStrategy {
    fn select_nodes(
        &self,
        operation_type: OperationType,
        requirements: &NodeRequirements,
        candidates: &[Node],
        count: usize,
    ) -> CoordinatorResult<Vec<Node>> {
        self.tracker.observe(candidates);

        let mut ranked = suitable(candidates, requirements);
        if ranked.is_empty() {
            debug!("没有满足 {} 操作要求的可用节点", operation_type);
            return Ok(Vec::new());
        }

        ranked.sort_by(|a, b| {
            a.load_ratio()
                .partial_cmp(&b.load_ratio())
                .unwrap_or(CmpOrdering::Equal)
                .then_with(|| {
                    a.metrics
                        .average_latency_ms
                        .partial_cmp(&b.metrics.average_latency_ms)
                        .unwrap_or(CmpOrdering::Equal)
                })
                .then_with(|| {
                    Reverse(a.locality_score(requirements))
                        .cmp(&Reverse(b.locality_score(requirements)))
                })
                .then_with(|| a.id.cmp(&b.id))
        });

        let selected: Vec<Node> = ranked.into_iter().take(count).cloned().collect();
        debug!(
            "最小负载策略选择节点: {:?}",
            selected
                .iter()
                .map(|n| format!("{}({:.2})", n.id, n.load_ratio()))
                .collect::<Vec<_>>()
        );
        Ok(selected)
    }

    fn report_load(&self, node_id: &str) -> f64 {
        self.tracker.report(node_id)
    }

    fn update_metrics(&self, node: &Node) {
        self.tracker.update(node);
    }

    fn name(&self) -> &str {
        "LeastLoaded"
    }
}

/// 轮询策略
#[derive(Default)]
pub struct RoundRobinStrategy {
    counter: AtomicUsize,
    tracker: LoadTracker,
}

impl RoundRobinStrategy {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LoadBalancer for RoundRobinStrategy {
    fn select_nodes(
        &self,
        operation_type: OperationType,
        requirements: &NodeRequirements,
        candidates: &[Node],
        count: usize,
    ) -> CoordinatorResult<Vec<Node>> {
        self.tracker.observe(candidates);

        let mut ordered = suitable(candidates, requirements);
        if ordered.is_empty() {
            debug!("没有满足 {} 操作要求的可用节点", operation_type);
            return Ok(Vec::new());
        }
        ordered.sort_by(|a, b| a.id.cmp(&b.id));

        let start = self.counter.fetch_add(1, Ordering::Relaxed) % ordered.len();
        let selected: Vec<Node> = ordered
            .iter()
            .cycle()
            .skip(start)
            .take(count.min(ordered.len()))
            .map(|node| (*node).clone())
            .collect();

        debug!(
            "轮询策略选择节点: {:?} (起始索引: {}/{})",
            selected.iter().map(|n| n.id.as_str()).collect::<Vec<_>>(),
            start,
            ordered.len()
        );
        Ok(selected)
    }

    fn report_load(&self, node_id: &str) -> f64 {
        self.tracker.report(node_id)
    }

    fn update_metrics(&self, node: &Node) {
        self.tracker.update(node);
    }

    fn name(&self) -> &str {
        "RoundRobin"
    }
}

/// 按配置名称创建负载均衡策略
pub fn load_balancer_from_name(name: &str) -> Arc<dyn LoadBalancer> {
    match name {
        "round_robin" => Arc::new(RoundRobinStrategy::new()),
        _ => Arc::new(LeastLoadedStrategy::new()),
    }
}

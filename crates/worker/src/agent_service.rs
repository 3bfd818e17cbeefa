use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Instant;

use chrono::Utc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use coordinator_core::{
    config::AgentConfig,
    models::{AgentRequest, AgentResponse, Node, NodeMetrics},
    operations,
};

#[derive(Debug, Default)]
struct AgentStats {
    completed_ops: u64,
    failed_ops: u64,
    average_latency_ms: f64,
}

/// 节点代理的执行端
///
/// 在本节点上执行协调器下发的子操作，并统计完成数、失败数和平均延迟，
/// 这些统计随心跳上报给协调器。
pub struct AgentService {
    node_id: String,
    max_concurrent_ops: u32,
    active: AtomicU32,
    stats: RwLock<AgentStats>,
}

impl AgentService {
    pub fn new(node_id: impl Into<String>, max_concurrent_ops: u32) -> Self {
        Self {
            node_id: node_id.into(),
            max_concurrent_ops,
            active: AtomicU32::new(0),
            stats: RwLock::new(AgentStats::default()),
        }
    }

    pub fn from_config(config: &AgentConfig) -> Self {
        Self::new(config.node_id.clone(), config.max_concurrent_ops)
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn active_operations(&self) -> u32 {
        self.active.load(Ordering::SeqCst)
    }

    pub async fn execute(&self, request: AgentRequest) -> AgentResponse {
        if request.deadline <= Utc::now() {
            warn!(
                operation_id = %request.operation_id,
                sub_operation_id = %request.sub_operation_id,
                "请求到达时已超过截止时间"
            );
            return AgentResponse::failed("deadline exceeded before execution");
        }

        let previous = self.active.fetch_add(1, Ordering::SeqCst);
        if previous >= self.max_concurrent_ops {
            self.active.fetch_sub(1, Ordering::SeqCst);
            warn!(
                "Max concurrency limit {} reached, rejecting sub-operation {}",
                self.max_concurrent_ops, request.sub_operation_id
            );
            return AgentResponse::failed("agent reached max concurrency limit");
        }

        debug!(
            operation_id = %request.operation_id,
            sub_operation_id = %request.sub_operation_id,
            operation_type = %request.operation_type,
            "执行子操作"
        );
        let started = Instant::now();
        let result = operations::execute(request.operation_type, &request.args, &self.node_id);
        let latency_ms = started.elapsed().as_secs_f64() * 1000.0;
        self.active.fetch_sub(1, Ordering::SeqCst);
        self.record(result.is_ok(), latency_ms).await;

        match result {
            Ok(value) => {
                info!(
                    sub_operation_id = %request.sub_operation_id,
                    "子操作执行成功，耗时 {:.2}ms",
                    latency_ms
                );
                AgentResponse::ok(value)
            }
            Err(e) => {
                warn!(sub_operation_id = %request.sub_operation_id, "子操作执行失败: {}", e);
                AgentResponse::failed(e.to_string())
            }
        }
    }

    async fn record(&self, success: bool, latency_ms: f64) {
        let mut stats = self.stats.write().await;
        if success {
            stats.completed_ops += 1;
        } else {
            stats.failed_ops += 1;
        }
        let finished = stats.completed_ops + stats.failed_ops;
        stats.average_latency_ms = if finished <= 1 {
            latency_ms
        } else {
            stats.average_latency_ms * 0.8 + latency_ms * 0.2
        };
    }

    /// 心跳上报的指标快照
    pub async fn metrics(&self) -> NodeMetrics {
        let stats = self.stats.read().await;
        NodeMetrics {
            active_operations: self.active_operations(),
            completed_ops: stats.completed_ops,
            failed_ops: stats.failed_ops,
            average_latency_ms: stats.average_latency_ms,
            last_updated: Utc::now(),
            ..NodeMetrics::default()
        }
    }
}

/// 根据代理配置构造注册用的节点描述
pub fn node_descriptor(config: &AgentConfig) -> Node {
    let mut node = Node::new(config.node_id.clone(), config.advertise_address.clone(), config.port)
        .with_capacity(config.max_concurrent_ops)
        .with_location(config.region.clone(), config.zone.clone());
    for capability in &config.capabilities {
        node = node.with_capability(capability.clone());
    }
    node.tags = config.tags.clone();
    node.version = env!("CARGO_PKG_VERSION").to_string();
    node
}

use std::collections::{BTreeMap, HashMap};

use axum::extract::State;
use serde::{Deserialize, Serialize};

use crate::{error::ApiResult, response::success, routes::AppState};

#[derive(Debug, Serialize, Deserialize)]
pub struct SystemStats {
    pub operations: OperationStats,
    pub nodes: NodeStats,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct OperationStats {
    pub total: usize,
    pub by_status: HashMap<String, usize>,
    pub executing_sub_operations: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct NodeStats {
    pub total: usize,
    pub by_status: HashMap<String, usize>,
    pub total_capacity: u64,
    pub active_operations: u64,
    /// 负载均衡器记录的各节点负载
    pub load: BTreeMap<String, f64>,
}

/// 获取系统统计信息
pub async fn get_system_stats(
    State(state): State<AppState>,
) -> ApiResult<impl axum::response::IntoResponse> {
    let coordinator = &state.coordinator;

    let status_counts = coordinator.operations().status_counts().await;
    let operations = OperationStats {
        total: status_counts.values().sum(),
        by_status: status_counts
            .into_iter()
            .map(|(status, count)| (status.to_string(), count))
            .collect(),
        executing_sub_operations: coordinator.operations().executing_sub_operations().await,
    };

    let nodes = coordinator.node_status().await;
    let mut by_status: HashMap<String, usize> = HashMap::new();
    for node in &nodes {
        *by_status.entry(node.status.to_string()).or_insert(0) += 1;
    }
    let node_stats = NodeStats {
        total: nodes.len(),
        by_status,
        total_capacity: nodes
            .iter()
            .map(|n| n.resources.max_concurrent_ops as u64)
            .sum(),
        active_operations: nodes
            .iter()
            .map(|n| n.metrics.active_operations as u64)
            .sum(),
        load: nodes
            .iter()
            .map(|n| (n.id.clone(), coordinator.node_load(&n.id)))
            .collect(),
    };

    Ok(success(SystemStats {
        operations,
        nodes: node_stats,
        timestamp: chrono::Utc::now(),
    }))
}

use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

use axum::{
    extract::{Path, Query, State},
    Json,
};
use coordinator_core::models::{HeartbeatRequest, Node, NodeMetrics, NodeResources};
use serde::Deserialize;
use tracing::info;

use crate::{
    error::{ApiError, ApiResult},
    response::{created, success, success_with_message},
    routes::AppState,
};

/// 节点注册请求
///
/// 状态和 last_seen 由协调器维护，请求中出现时会被忽略。
#[derive(Debug, Deserialize)]
pub struct RegisterNodeRequest {
    pub id: String,
    pub address: String,
    pub port: u16,
    #[serde(default)]
    pub capabilities: BTreeSet<String>,
    #[serde(default)]
    pub resources: Option<NodeResources>,
    #[serde(default)]
    pub metrics: Option<NodeMetrics>,
    #[serde(default)]
    pub tags: HashMap<String, String>,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub region: String,
    #[serde(default)]
    pub zone: String,
}

impl RegisterNodeRequest {
    fn into_node(self) -> ApiResult<Node> {
        if self.id.trim().is_empty() {
            return Err(ApiError::BadRequest("节点ID不能为空".to_string()));
        }
        if self.address.trim().is_empty() || self.port == 0 {
            return Err(ApiError::BadRequest(format!(
                "节点地址无效: {}:{}",
                self.address, self.port
            )));
        }

        let mut node = Node::new(self.id, self.address, self.port);
        node.capabilities = self.capabilities;
        if let Some(resources) = self.resources {
            node.resources = resources;
        }
        if let Some(metrics) = self.metrics {
            node.metrics = metrics;
        }
        node.tags = self.tags;
        node.version = self.version;
        node.region = self.region;
        node.zone = self.zone;
        Ok(node)
    }
}

/// 注销参数
#[derive(Debug, Deserialize)]
pub struct UnregisterParams {
    pub timeout_seconds: Option<u64>,
    #[serde(default)]
    pub force: bool,
}

/// 获取节点列表
pub async fn list_nodes(State(state): State<AppState>) -> ApiResult<impl axum::response::IntoResponse> {
    Ok(success(state.coordinator.node_status().await))
}

/// 获取单个节点
pub async fn get_node(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<impl axum::response::IntoResponse> {
    Ok(success(state.coordinator.get_node(&id).await?))
}

/// 注册节点
pub async fn register_node(
    State(state): State<AppState>,
    Json(request): Json<RegisterNodeRequest>,
) -> ApiResult<impl axum::response::IntoResponse> {
    let node = state.coordinator.register_node(request.into_node()?).await?;
    info!(node_id = %node.id, status = %node.status, "节点注册成功");
    Ok(created(node))
}

/// 节点心跳
pub async fn heartbeat(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<HeartbeatRequest>,
) -> ApiResult<impl axum::response::IntoResponse> {
    let node = state.coordinator.heartbeat(&id, request.metrics).await?;
    Ok(success(node))
}

/// 注销节点：默认先排空，force=true 时直接移除
pub async fn unregister_node(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<UnregisterParams>,
) -> ApiResult<impl axum::response::IntoResponse> {
    let node = if params.force {
        state.coordinator.force_remove_node(&id).await?
    } else {
        state
            .coordinator
            .unregister_node(&id, params.timeout_seconds.map(Duration::from_secs))
            .await?
    };
    Ok(success_with_message(node, "节点已移除"))
}

/// 将节点置为维护状态
pub async fn set_maintenance(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<impl axum::response::IntoResponse> {
    Ok(success(state.coordinator.set_maintenance(&id).await?))
}

/// 恢复节点为可用状态
pub async fn activate_node(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<impl axum::response::IntoResponse> {
    Ok(success(state.coordinator.activate(&id).await?))
}

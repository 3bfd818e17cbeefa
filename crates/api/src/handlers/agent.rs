use std::sync::Arc;

use axum::{extract::State, Json};
use coordinator_core::models::{AgentRequest, AgentResponse};
use coordinator_worker::AgentService;
use serde_json::{json, Value};
use tracing::debug;

/// 执行协调器分发的子操作
///
/// 执行失败也以200返回，失败信息在 `success=false` 的响应体中。
pub async fn execute_sub_operation(
    State(agent): State<Arc<AgentService>>,
    Json(request): Json<AgentRequest>,
) -> Json<AgentResponse> {
    debug!(
        operation_id = %request.operation_id,
        sub_operation_id = %request.sub_operation_id,
        "收到子操作执行请求"
    );
    Json(agent.execute(request).await)
}

pub async fn agent_health(State(agent): State<Arc<AgentService>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "node_id": agent.node_id(),
        "active_operations": agent.active_operations(),
        "version": env!("CARGO_PKG_VERSION")
    }))
}

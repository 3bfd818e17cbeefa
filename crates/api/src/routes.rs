use std::sync::Arc;
use std::time::Duration;

use axum::{
    routing::{delete, get, post},
    Router,
};
use coordinator_dispatcher::OperationCoordinator;
use coordinator_infrastructure::MetricsExporter;
use coordinator_worker::{AgentService, AGENT_EXECUTE_PATH};
use tower_http::timeout::TimeoutLayer;

use crate::handlers::{
    agent::{agent_health, execute_sub_operation},
    health::health_check,
    metrics::prometheus_metrics,
    nodes::{
        activate_node, get_node, heartbeat, list_nodes, register_node, set_maintenance,
        unregister_node,
    },
    operations::{cancel_operation, get_operation, list_operations, submit_operation},
    system::get_system_stats,
};

/// API应用状态
#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<OperationCoordinator>,
    /// 未安装Prometheus导出器时为空
    pub metrics: Option<MetricsExporter>,
}

/// 创建API路由
///
/// 提交操作和排空节点会一直等到操作结束，它们的时长由协调器的操作超时和排空超时约束，
/// 其余接口受 `request_timeout` 限制。
pub fn create_routes(
    state: AppState,
    request_timeout: Duration,
    metrics_endpoint: Option<&str>,
) -> Router {
    let bounded = || TimeoutLayer::new(request_timeout);

    let router = Router::new()
        // 健康检查
        .route("/health", get(health_check))
        // 操作API
        .route(
            "/api/operations",
            post(submit_operation).merge(get(list_operations).layer(bounded())),
        )
        .route("/api/operations/{id}", get(get_operation).layer(bounded()))
        .route(
            "/api/operations/{id}/cancel",
            post(cancel_operation).layer(bounded()),
        )
        // 节点管理API
        .route(
            "/api/nodes",
            get(list_nodes).post(register_node).layer(bounded()),
        )
        .route(
            "/api/nodes/{id}",
            delete(unregister_node).merge(get(get_node).layer(bounded())),
        )
        .route("/api/nodes/{id}/heartbeat", post(heartbeat).layer(bounded()))
        .route(
            "/api/nodes/{id}/maintenance",
            post(set_maintenance).layer(bounded()),
        )
        .route("/api/nodes/{id}/activate", post(activate_node).layer(bounded()))
        // 系统监控API
        .route("/api/system/stats", get(get_system_stats).layer(bounded()));

    let router = match metrics_endpoint {
        Some(path) => router.route(path, get(prometheus_metrics)),
        None => router,
    };

    router.with_state(state)
}

/// 节点代理路由
pub fn agent_routes(agent: Arc<AgentService>) -> Router {
    Router::new()
        .route("/health", get(agent_health))
        .route(AGENT_EXECUTE_PATH, post(execute_sub_operation))
        .with_state(agent)
}

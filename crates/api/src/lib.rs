//! # Coordinator API
//!
//! 分布式操作协调器的HTTP接口，基于Axum构建：
//! - 操作管理（提交、查询、取消）
//! - 节点管理（注册、心跳、排空注销、维护）
//! - 系统统计与Prometheus指标
//!
//! 节点代理的执行接口也在这里，由 [`create_agent_app`] 创建。
//!
//! ## 响应格式
//!
//! 成功：`{"success": true, "data": ..., "message": null, "timestamp": ...}`
//!
//! 失败：`{"success": false, "error": {"code": "NODE_NOT_FOUND", "message": ...}, "timestamp": ...}`

pub mod error;
pub mod handlers;
pub mod middleware;
pub mod response;
pub mod routes;

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use coordinator_core::config::{ApiConfig, ObservabilityConfig};
use coordinator_worker::AgentService;
use tower::ServiceBuilder;

pub use error::{ApiError, ApiResult};
pub use routes::{create_routes, AppState};

use crate::middleware::{cors_layer, request_logging, trace_layer};

/// 创建协调器API应用
pub fn create_app(state: AppState, api: &ApiConfig, observability: &ObservabilityConfig) -> Router {
    let metrics_endpoint = observability
        .metrics_enabled
        .then_some(observability.metrics_endpoint.as_str());

    let app = create_routes(
        state,
        Duration::from_secs(api.request_timeout_seconds),
        metrics_endpoint,
    )
    .layer(
        ServiceBuilder::new()
            .layer(trace_layer())
            .layer(axum::middleware::from_fn(request_logging)),
    );

    if api.cors_enabled {
        app.layer(cors_layer())
    } else {
        app
    }
}

/// 创建节点代理应用
pub fn create_agent_app(agent: Arc<AgentService>) -> Router {
    routes::agent_routes(agent).layer(
        ServiceBuilder::new()
            .layer(trace_layer())
            .layer(axum::middleware::from_fn(request_logging)),
    )
}

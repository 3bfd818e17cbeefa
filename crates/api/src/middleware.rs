use axum::{extract::Request, http::Method, middleware::Next, response::Response};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
    LatencyUnit,
};
use tracing::{debug, info, warn, Level};

/// 请求所属的接口分组，作为日志字段
fn route_group(path: &str) -> &'static str {
    let mut segments = path.trim_start_matches('/').split('/');
    match (segments.next(), segments.next()) {
        (Some("api"), Some("operations")) => "operations",
        (Some("api"), Some("nodes")) => "nodes",
        (Some("api"), Some("system")) => "system",
        (Some("agent"), _) => "agent",
        (Some("health"), _) => "health",
        _ => "other",
    }
}

/// 节点相关接口路径中的节点ID，例如 `/api/nodes/node-1/heartbeat`
fn node_id_of(path: &str) -> Option<&str> {
    path.strip_prefix("/api/nodes/")
        .and_then(|rest| rest.split('/').next())
        .filter(|id| !id.is_empty())
}

pub async fn request_logging(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let group = route_group(&path);
    let start = std::time::Instant::now();

    debug!(method = %method, path = %path, group, "开始处理请求");

    let response = next.run(request).await;
    let elapsed_ms = start.elapsed().as_millis() as u64;
    let status = response.status();
    let node_id = node_id_of(&path).unwrap_or("-");

    if status.is_server_error() {
        warn!(
            method = %method,
            path = %path,
            group,
            node_id,
            status = status.as_u16(),
            elapsed_ms,
            "请求处理失败"
        );
    } else {
        info!(
            method = %method,
            path = %path,
            group,
            node_id,
            status = status.as_u16(),
            elapsed_ms,
            "完成请求处理"
        );
    }

    response
}

/// 协调器接口只使用 GET/POST/DELETE
pub fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers(Any)
}

pub fn trace_layer(
) -> TraceLayer<tower_http::classify::SharedClassifier<tower_http::classify::ServerErrorsAsFailures>>
{
    TraceLayer::new_for_http()
        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
        .on_response(
            DefaultOnResponse::new()
                .level(Level::DEBUG)
                .latency_unit(LatencyUnit::Millis),
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_route_group() {
        assert_eq!(route_group("/api/operations"), "operations");
        assert_eq!(route_group("/api/operations/distop-1/cancel"), "operations");
        assert_eq!(route_group("/api/nodes/node-1"), "nodes");
        assert_eq!(route_group("/api/system/stats"), "system");
        assert_eq!(route_group("/agent/v1/execute"), "agent");
        assert_eq!(route_group("/health"), "health");
        assert_eq!(route_group("/metrics"), "other");
    }

    #[test]
    fn test_node_id_of() {
        assert_eq!(node_id_of("/api/nodes/node-1/heartbeat"), Some("node-1"));
        assert_eq!(node_id_of("/api/nodes/node-2"), Some("node-2"));
        assert_eq!(node_id_of("/api/nodes"), None);
        assert_eq!(node_id_of("/api/nodes/"), None);
        assert_eq!(node_id_of("/api/operations/x"), None);
    }
}

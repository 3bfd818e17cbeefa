use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::State,
    http::StatusCode,
    routing::{delete, post},
    Json, Router,
};
use chrono::Utc;
use serde_json::json;

use coordinator_core::{
    models::{AgentRequest, Node, OperationArgs, OperationType},
    traits::RemoteAgent,
    CoordinatorError,
};
use coordinator_worker::{
    AgentService, CoordinatorClient, HeartbeatManager, HttpAgentClient, AGENT_EXECUTE_PATH,
};

async fn serve(router: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr
}

fn pull_request() -> AgentRequest {
    let mut args = OperationArgs::new();
    args.insert("image_ref".to_string(), json!("ghcr.io/acme/api:v2"));
    AgentRequest {
        operation_id: "distop-1".to_string(),
        sub_operation_id: "subop-1".to_string(),
        operation_type: OperationType::Pull,
        args,
        deadline: Utc::now() + chrono::Duration::seconds(30),
    }
}

fn client() -> HttpAgentClient {
    HttpAgentClient::new(Duration::from_secs(2)).unwrap()
}

#[tokio::test]
async fn test_execute_against_agent_endpoint() {
    let agent = Arc::new(AgentService::new("node-1", 4));
    let router = Router::new()
        .route(
            AGENT_EXECUTE_PATH,
            post(
                |State(agent): State<Arc<AgentService>>, Json(request): Json<AgentRequest>| async move {
                    Json(agent.execute(request).await)
                },
            ),
        )
        .with_state(agent.clone());
    let addr = serve(router).await;

    let node = Node::new("node-1", "127.0.0.1", addr.port());
    let response = client().execute(&node, &pull_request()).await.unwrap();

    assert!(response.success);
    let result = response.result.unwrap();
    assert_eq!(result["node_id"], "node-1");
    assert_eq!(result["canonical_ref"], "ghcr.io/acme/api:v2");
    assert_eq!(agent.metrics().await.completed_ops, 1);
}

#[tokio::test]
async fn test_server_errors_are_retryable() {
    let router = Router::new().route(
        AGENT_EXECUTE_PATH,
        post(|| async { (StatusCode::SERVICE_UNAVAILABLE, "overloaded") }),
    );
    let addr = serve(router).await;

    let node = Node::new("node-1", "127.0.0.1", addr.port());
    let err = client().execute(&node, &pull_request()).await.unwrap_err();
    assert!(matches!(err, CoordinatorError::Network(_)));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_client_errors_are_not_retryable() {
    let router = Router::new().route(
        AGENT_EXECUTE_PATH,
        post(|| async { (StatusCode::BAD_REQUEST, "malformed request") }),
    );
    let addr = serve(router).await;

    let node = Node::new("node-1", "127.0.0.1", addr.port());
    let err = client().execute(&node, &pull_request()).await.unwrap_err();
    assert!(matches!(err, CoordinatorError::Remote(_)));
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn test_unreachable_node_is_network_error() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let node = Node::new("node-1", "127.0.0.1", port);
    let err = client().execute(&node, &pull_request()).await.unwrap_err();
    assert!(err.is_retryable());
}

#[derive(Default)]
struct CoordinatorStub {
    registrations: AtomicUsize,
    heartbeats: AtomicUsize,
    unregistrations: AtomicUsize,
}

fn coordinator_stub(stub: Arc<CoordinatorStub>) -> Router {
    Router::new()
        .route(
            "/api/nodes",
            post(|State(stub): State<Arc<CoordinatorStub>>| async move {
                stub.registrations.fetch_add(1, Ordering::SeqCst);
                StatusCode::OK
            }),
        )
        .route(
            "/api/nodes/{id}/heartbeat",
            post(|State(stub): State<Arc<CoordinatorStub>>| async move {
                // 第一次心跳模拟协调器重启后丢失了节点
                if stub.heartbeats.fetch_add(1, Ordering::SeqCst) == 0 {
                    StatusCode::NOT_FOUND
                } else {
                    StatusCode::OK
                }
            }),
        )
        .route(
            "/api/nodes/{id}",
            delete(|State(stub): State<Arc<CoordinatorStub>>| async move {
                stub.unregistrations.fetch_add(1, Ordering::SeqCst);
                StatusCode::OK
            }),
        )
        .with_state(stub)
}

#[tokio::test]
async fn test_heartbeat_reregisters_unknown_node() {
    let stub = Arc::new(CoordinatorStub::default());
    let addr = serve(coordinator_stub(stub.clone())).await;

    let client = Arc::new(CoordinatorClient::new(format!("http://{addr}"), "node-1"));
    let manager = HeartbeatManager::new(
        client,
        Arc::new(AgentService::new("node-1", 4)),
        Node::new("node-1", "127.0.0.1", 7070),
        Duration::from_secs(10),
    );

    manager.beat().await.unwrap();
    assert_eq!(stub.registrations.load(Ordering::SeqCst), 1);

    manager.beat().await.unwrap();
    assert_eq!(stub.heartbeats.load(Ordering::SeqCst), 2);
    assert_eq!(stub.registrations.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_shutdown_unregisters_node() {
    let stub = Arc::new(CoordinatorStub::default());
    let addr = serve(coordinator_stub(stub.clone())).await;

    let client = Arc::new(CoordinatorClient::new(format!("http://{addr}/"), "node-1"));
    let manager = HeartbeatManager::new(
        client,
        Arc::new(AgentService::new("node-1", 4)),
        Node::new("node-1", "127.0.0.1", 7070),
        Duration::from_secs(3600),
    );

    let (shutdown_tx, shutdown_rx) = tokio::sync::broadcast::channel(1);
    let handle = manager.start(shutdown_rx);

    while stub.registrations.load(Ordering::SeqCst) == 0 {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    shutdown_tx.send(()).unwrap();
    handle.await.unwrap();

    assert_eq!(stub.unregistrations.load(Ordering::SeqCst), 1);
}

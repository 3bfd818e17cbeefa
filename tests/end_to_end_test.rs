use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use serde_json::{json, Value};
use tokio::{net::TcpListener, sync::broadcast};

use coordinator_api::{create_agent_app, create_app, AppState};
use coordinator_core::{
    config::{ApiConfig, AppConfig, CoordinatorConfig, ObservabilityConfig},
    models::Node,
    traits::{NoopTelemetry, TelemetrySink},
};
use coordinator_dispatcher::{NodeRegistry, OperationCoordinator, OperationStore};
use coordinator_worker::{AgentService, CoordinatorClient, HeartbeatManager, HttpAgentClient};

async fn spawn_server(app: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

async fn spawn_coordinator() -> (SocketAddr, Arc<OperationCoordinator>) {
    let telemetry: Arc<dyn TelemetrySink> = Arc::new(NoopTelemetry);
    let config = CoordinatorConfig {
        node_id: "coordinator".to_string(),
        operation_timeout_seconds: 10,
        rpc_timeout_seconds: 2,
        max_retries: 1,
        retry_base_delay_ms: 50,
        retry_max_delay_ms: 100,
        ..CoordinatorConfig::default()
    };
    let coordinator = Arc::new(OperationCoordinator::new(
        config,
        Arc::new(NodeRegistry::new(telemetry.clone())),
        Arc::new(OperationStore::new()),
        Arc::new(HttpAgentClient::new(Duration::from_secs(2)).unwrap()),
        telemetry,
    ));
    let state = AppState {
        coordinator: coordinator.clone(),
        metrics: None,
    };
    let app = create_app(state, &ApiConfig::default(), &ObservabilityConfig::default());
    (spawn_server(app).await, coordinator)
}

#[tokio::test]
async fn test_distributed_pull_over_http() {
    let (coordinator_addr, _) = spawn_coordinator().await;
    let coordinator_url = format!("http://{coordinator_addr}");

    let mut agent_ports = Vec::new();
    for id in ["node-a", "node-b"] {
        let agent_addr = spawn_server(create_agent_app(Arc::new(AgentService::new(id, 4)))).await;
        let client = CoordinatorClient::new(coordinator_url.clone(), id);
        client
            .register(&Node::new(id, "127.0.0.1", agent_addr.port()))
            .await
            .unwrap();
        agent_ports.push(agent_addr.port());
    }

    let http = reqwest::Client::new();
    let body: Value = http
        .post(format!("{coordinator_url}/api/operations"))
        .json(&json!({
            "session_id": "e2e",
            "operation_type": "pull",
            "args": {"image_ref": "quay.io/coreos/etcd:v3.5.9"}
        }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    let operation = &body["data"];
    assert_eq!(operation["status"], "completed", "{body}");
    assert_eq!(operation["strategy"], "distributed");
    let results = operation["outcome"]["ok"].as_object().unwrap();
    assert_eq!(results.len(), 2);
    assert_eq!(results["node-a"]["node_id"], "node-a");
    assert_eq!(results["node-b"]["success"], true);
}

#[tokio::test]
async fn test_unreachable_agent_fails_operation() {
    let (coordinator_addr, coordinator) = spawn_coordinator().await;

    // 绑定后立即释放端口，保证连接被拒绝
    let dead_port = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    };
    coordinator
        .register_node(Node::new("node-dead", "127.0.0.1", dead_port))
        .await
        .unwrap();

    let body: Value = reqwest::Client::new()
        .post(format!("http://{coordinator_addr}/api/operations"))
        .json(&json!({
            "operation_type": "push",
            "args": {"image_ref": "registry.local:5000/team/app:1.0"}
        }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    let operation = &body["data"];
    assert_eq!(operation["status"], "failed", "{body}");
    let message = operation["outcome"]["err"]["message"].as_str().unwrap();
    assert!(message.starts_with("1 of 1 nodes failed"), "{message}");

    let sub = operation["sub_operations"]
        .as_object()
        .unwrap()
        .values()
        .next()
        .unwrap();
    // 首次尝试加一次重试
    assert_eq!(sub["attempts"], 2);
}

#[tokio::test]
async fn test_heartbeat_manager_registers_and_unregisters() {
    let (coordinator_addr, coordinator) = spawn_coordinator().await;
    let agent = Arc::new(AgentService::new("node-hb", 2));
    let agent_addr = spawn_server(create_agent_app(agent.clone())).await;

    let client = Arc::new(CoordinatorClient::new(
        format!("http://{coordinator_addr}"),
        "node-hb",
    ));
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let handle = HeartbeatManager::new(
        client,
        agent,
        Node::new("node-hb", "127.0.0.1", agent_addr.port()),
        Duration::from_millis(50),
    )
    .with_unregister_timeout(1)
    .start(shutdown_rx);

    let mut registered = false;
    for _ in 0..100 {
        if coordinator.get_node("node-hb").await.is_ok() {
            registered = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(registered);

    shutdown_tx.send(()).unwrap();
    handle.await.unwrap();
    assert!(coordinator.node_status().await.is_empty());
}

#[test]
fn test_sample_config_loads() {
    let config = AppConfig::load(Some("config/coordinator.toml")).unwrap();
    assert_eq!(config.coordinator.node_id, "coordinator-1");
    assert_eq!(config.coordinator.load_balancing_strategy, "least_loaded");
    assert_eq!(config.coordinator.staleness_threshold(), Duration::from_secs(150));
    assert!(!config.agent.enabled);
    assert_eq!(config.observability.metrics_endpoint, "/metrics");
}

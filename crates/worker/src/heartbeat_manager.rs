use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::interval;
use tracing::{error, info, warn};

use coordinator_core::{models::Node, CoordinatorError, CoordinatorResult};

use crate::agent_service::AgentService;
use crate::coordinator_client::CoordinatorClient;

/// 节点代理的注册与心跳
///
/// 启动时注册；之后按间隔上报心跳，协调器返回 `NodeNotFound` 时重新注册；
/// 收到停止信号后向协调器注销本节点。
pub struct HeartbeatManager {
    client: Arc<CoordinatorClient>,
    agent: Arc<AgentService>,
    node: Node,
    heartbeat_interval: Duration,
    unregister_timeout_seconds: u64,
}

impl HeartbeatManager {
    pub fn new(
        client: Arc<CoordinatorClient>,
        agent: Arc<AgentService>,
        node: Node,
        heartbeat_interval: Duration,
    ) -> Self {
        Self {
            client,
            agent,
            node,
            heartbeat_interval,
            unregister_timeout_seconds: 30,
        }
    }

    pub fn with_unregister_timeout(mut self, seconds: u64) -> Self {
        self.unregister_timeout_seconds = seconds;
        self
    }

    pub async fn register(&self) -> CoordinatorResult<()> {
        let mut node = self.node.clone();
        node.metrics = self.agent.metrics().await;
        self.client.register(&node).await
    }

    /// 发送一次心跳，必要时重新注册
    pub async fn beat(&self) -> CoordinatorResult<()> {
        let metrics = self.agent.metrics().await;
        match self.client.send_heartbeat(metrics).await {
            Err(CoordinatorError::NodeNotFound { .. }) => {
                info!("协调器中没有节点 {}，重新注册", self.node.id);
                self.register().await
            }
            other => other,
        }
    }

    pub fn start(self, mut shutdown_rx: broadcast::Receiver<()>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            if let Err(e) = self.register().await {
                warn!("Initial registration failed, will retry on next heartbeat: {}", e);
            }

            let mut heartbeat_interval = interval(self.heartbeat_interval);
            heartbeat_interval.tick().await;

            loop {
                tokio::select! {
                    _ = heartbeat_interval.tick() => {
                        if let Err(e) = self.beat().await {
                            error!("Failed to send coordinator heartbeat: {}", e);
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        info!("Heartbeat task shutting down");
                        if let Err(e) = self.client.unregister(self.unregister_timeout_seconds).await {
                            warn!("注销节点失败: {}", e);
                        }
                        break;
                    }
                }
            }
        })
    }
}

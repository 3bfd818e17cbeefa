use reqwest::StatusCode;
use tracing::{debug, error, info, warn};

use coordinator_core::{
    models::{HeartbeatRequest, Node, NodeMetrics},
    CoordinatorError, CoordinatorResult,
};

/// 节点代理访问协调器API的客户端
pub struct CoordinatorClient {
    coordinator_url: String,
    node_id: String,
    http_client: reqwest::Client,
}

impl CoordinatorClient {
    pub fn new(coordinator_url: impl Into<String>, node_id: impl Into<String>) -> Self {
        Self {
            coordinator_url: coordinator_url.into().trim_end_matches('/').to_string(),
            node_id: node_id.into(),
            http_client: reqwest::Client::new(),
        }
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn coordinator_url(&self) -> &str {
        &self.coordinator_url
    }

    pub async fn register(&self, node: &Node) -> CoordinatorResult<()> {
        let url = format!("{}/api/nodes", self.coordinator_url);

        match self.http_client.post(&url).json(node).send().await {
            Ok(response) if response.status().is_success() => {
                info!("Successfully registered node {} with coordinator", self.node_id);
                Ok(())
            }
            Ok(response) => {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                error!("Failed to register node: HTTP {} - {}", status, body);
                Err(CoordinatorError::remote(format!(
                    "node registration failed: HTTP {status} - {body}"
                )))
            }
            Err(e) => {
                error!("Failed to connect to coordinator for registration: {}", e);
                Err(CoordinatorError::network(format!("coordinator connection error: {e}")))
            }
        }
    }

    /// 发送心跳；协调器不认识本节点时返回 `NodeNotFound`
    pub async fn send_heartbeat(&self, metrics: NodeMetrics) -> CoordinatorResult<()> {
        let url = format!("{}/api/nodes/{}/heartbeat", self.coordinator_url, self.node_id);
        let heartbeat = HeartbeatRequest {
            metrics: Some(metrics),
        };

        match self.http_client.post(&url).json(&heartbeat).send().await {
            Ok(response) if response.status().is_success() => {
                debug!("Heartbeat sent successfully for node {}", self.node_id);
                Ok(())
            }
            Ok(response) if response.status() == StatusCode::NOT_FOUND => {
                warn!("Coordinator does not know node {}", self.node_id);
                Err(CoordinatorError::node_not_found(&self.node_id))
            }
            Ok(response) => {
                let status = response.status();
                warn!("Heartbeat failed: HTTP {}", status);
                Err(CoordinatorError::remote(format!("heartbeat failed: HTTP {status}")))
            }
            Err(e) => {
                warn!("Failed to send heartbeat: {}", e);
                Err(CoordinatorError::network(format!("heartbeat connection error: {e}")))
            }
        }
    }

    /// 请求协调器排空并移除本节点，失败只记录日志
    pub async fn unregister(&self, timeout_seconds: u64) -> CoordinatorResult<()> {
        let url = format!("{}/api/nodes/{}", self.coordinator_url, self.node_id);

        match self
            .http_client
            .delete(&url)
            .query(&[("timeout_seconds", timeout_seconds)])
            .send()
            .await
        {
            Ok(response) if response.status().is_success() => {
                info!("Successfully unregistered node {} from coordinator", self.node_id);
            }
            Ok(response) => {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                warn!("Failed to unregister node: HTTP {} - {}", status, body);
            }
            Err(e) => {
                warn!("Failed to unregister node: {}", e);
            }
        }
        Ok(())
    }
}

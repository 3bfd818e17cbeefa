use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use tracing::{debug, warn};

use coordinator_core::{
    models::{AgentRequest, AgentResponse, Node},
    traits::RemoteAgent,
    CoordinatorError, CoordinatorResult,
};

pub const AGENT_EXECUTE_PATH: &str = "/agent/v1/execute";

/// 通过HTTP调用节点代理的远程执行客户端
///
/// 连接失败、请求超时和5xx响应映射为可重试的 `Network`/`Timeout`，
/// 4xx响应映射为不可重试的 `Remote`。
#[derive(Clone)]
pub struct HttpAgentClient {
    http_client: reqwest::Client,
}

impl HttpAgentClient {
    pub fn new(connect_timeout: Duration) -> CoordinatorResult<Self> {
        let http_client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| CoordinatorError::config_error(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { http_client })
    }

    fn map_send_error(node: &Node, e: reqwest::Error) -> CoordinatorError {
        if e.is_timeout() {
            CoordinatorError::timeout(format!("request to node {} timed out: {e}", node.id))
        } else {
            CoordinatorError::network(format!("failed to reach node {}: {e}", node.id))
        }
    }
}

#[async_trait]
impl RemoteAgent for HttpAgentClient {
    async fn execute(&self, node: &Node, request: &AgentRequest) -> CoordinatorResult<AgentResponse> {
        let url = format!("{}{}", node.endpoint(), AGENT_EXECUTE_PATH);
        debug!(
            node_id = %node.id,
            sub_operation_id = %request.sub_operation_id,
            "发送子操作到节点代理: {}",
            url
        );

        let response = self
            .http_client
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(|e| Self::map_send_error(node, e))?;

        let status = response.status();
        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            let body = response.text().await.unwrap_or_default();
            warn!(node_id = %node.id, "节点代理返回 HTTP {}: {}", status, body);
            return Err(CoordinatorError::network(format!(
                "node {} answered HTTP {status}: {body}",
                node.id
            )));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CoordinatorError::remote(format!(
                "node {} rejected the request with HTTP {status}: {body}",
                node.id
            )));
        }

        response.json::<AgentResponse>().await.map_err(|e| {
            CoordinatorError::remote(format!("invalid response from node {}: {e}", node.id))
        })
    }
}

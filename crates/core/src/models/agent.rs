use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::node::NodeMetrics;
use super::operation::{OperationArgs, OperationType};

/// 协调器发往节点代理的执行请求
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentRequest {
    pub operation_id: String,
    pub sub_operation_id: String,
    pub operation_type: OperationType,
    #[serde(default)]
    pub args: OperationArgs,
    pub deadline: DateTime<Utc>,
}

/// 节点代理的执行结果
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AgentResponse {
    pub fn ok(result: serde_json::Value) -> Self {
        Self {
            success: true,
            result: Some(result),
            error: None,
        }
    }

    pub fn failed<S: Into<String>>(error: S) -> Self {
        Self {
            success: false,
            result: None,
            error: Some(error.into()),
        }
    }
}

/// 节点心跳，可附带资源使用情况
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct HeartbeatRequest {
    #[serde(default)]
    pub metrics: Option<NodeMetrics>,
}

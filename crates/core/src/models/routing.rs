use std::collections::HashMap;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::{CoordinatorError, CoordinatorResult};

/// 操作扇出策略
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum RoutingStrategy {
    Local,
    Distributed,
    Replicated,
}

impl RoutingStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoutingStrategy::Local => "local",
            RoutingStrategy::Distributed => "distributed",
            RoutingStrategy::Replicated => "replicated",
        }
    }
}

impl FromStr for RoutingStrategy {
    type Err = CoordinatorError;

    fn from_str(s: &str) -> CoordinatorResult<Self> {
        match s {
            "local" => Ok(RoutingStrategy::Local),
            "distributed" => Ok(RoutingStrategy::Distributed),
            "replicated" => Ok(RoutingStrategy::Replicated),
            other => Err(CoordinatorError::validation(format!(
                "unknown routing strategy: {other}"
            ))),
        }
    }
}

impl std::fmt::Display for RoutingStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 节点选择要求
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct NodeRequirements {
    pub min_cpu: f64,
    pub min_memory: i64,
    pub min_storage: i64,
    pub required_capabilities: Vec<String>,
    pub preferred_region: Option<String>,
    pub preferred_zone: Option<String>,
    pub max_latency_ms: Option<u64>,
    /// 调用方指定的候选节点子集
    pub node_ids: Option<Vec<String>>,
    /// 扇出宽度上限
    pub max_nodes: Option<usize>,
}

/// 路由决策
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RoutingDecision {
    pub strategy: RoutingStrategy,
    pub target_nodes: Vec<String>,
    pub requirements: NodeRequirements,
    /// 达到成功所需的子操作数量
    pub quorum: usize,
    pub metadata: HashMap<String, serde_json::Value>,
}

impl RoutingDecision {
    pub fn local(coordinator_node: impl Into<String>, requirements: NodeRequirements) -> Self {
        Self {
            strategy: RoutingStrategy::Local,
            target_nodes: vec![coordinator_node.into()],
            requirements,
            quorum: 1,
            metadata: HashMap::new(),
        }
    }

    pub fn is_replicated(&self) -> bool {
        self.metadata
            .get("replication")
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }
}

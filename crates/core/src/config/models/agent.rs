use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::coordinator::default_node_id;

/// Per-node agent settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AgentConfig {
    pub enabled: bool,
    pub node_id: String,
    /// Address the coordinator uses to reach this agent.
    pub advertise_address: String,
    pub port: u16,
    pub coordinator_url: String,
    pub heartbeat_interval_seconds: u64,
    pub max_concurrent_ops: u32,
    pub capabilities: Vec<String>,
    pub region: String,
    pub zone: String,
    pub tags: HashMap<String, String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            node_id: default_node_id(),
            advertise_address: "127.0.0.1".to_string(),
            port: 7070,
            coordinator_url: "http://127.0.0.1:8080".to_string(),
            heartbeat_interval_seconds: 10,
            max_concurrent_ops: 4,
            capabilities: Vec::new(),
            region: String::new(),
            zone: String::new(),
            tags: HashMap::new(),
        }
    }
}

impl AgentConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.node_id.trim().is_empty() {
            return Err(anyhow::anyhow!("Agent节点ID不能为空"));
        }

        if self.advertise_address.is_empty() {
            return Err(anyhow::anyhow!("Agent通告地址不能为空"));
        }

        if self.port == 0 {
            return Err(anyhow::anyhow!("Agent端口必须大于0"));
        }

        if !self.coordinator_url.starts_with("http://")
            && !self.coordinator_url.starts_with("https://")
        {
            return Err(anyhow::anyhow!(
                "协调器地址格式无效: {}",
                self.coordinator_url
            ));
        }

        if self.heartbeat_interval_seconds == 0 {
            return Err(anyhow::anyhow!("心跳间隔必须大于0"));
        }

        if self.max_concurrent_ops == 0 {
            return Err(anyhow::anyhow!("最大并发操作数必须大于0"));
        }

        Ok(())
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_seconds)
    }

    pub fn bind_address(&self) -> String {
        format!("0.0.0.0:{}", self.port)
    }
}

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::routing::NodeRequirements;

/// 节点状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    Active,
    Draining,
    Unavailable,
    Maintenance,
}

impl NodeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeStatus::Active => "active",
            NodeStatus::Draining => "draining",
            NodeStatus::Unavailable => "unavailable",
            NodeStatus::Maintenance => "maintenance",
        }
    }
}

impl std::fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 节点资源容量
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeResources {
    pub cpu: f64,
    pub memory: i64,
    pub storage: i64,
    pub network_bandwidth: i64,
    pub max_concurrent_ops: u32,
}

impl Default for NodeResources {
    fn default() -> Self {
        Self {
            cpu: 1.0,
            memory: 0,
            storage: 0,
            network_bandwidth: 0,
            max_concurrent_ops: 4,
        }
    }
}

/// 节点实时指标
///
/// `active_operations` 由协调器在分发和完成子操作时维护，节点上报的指标不会覆盖它。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeMetrics {
    pub cpu_usage: f64,
    pub memory_usage: i64,
    pub storage_usage: i64,
    pub network_usage: i64,
    pub active_operations: u32,
    pub completed_ops: u64,
    pub failed_ops: u64,
    pub average_latency_ms: f64,
    pub last_updated: DateTime<Utc>,
}

impl Default for NodeMetrics {
    fn default() -> Self {
        Self {
            cpu_usage: 0.0,
            memory_usage: 0,
            storage_usage: 0,
            network_usage: 0,
            active_operations: 0,
            completed_ops: 0,
            failed_ops: 0,
            average_latency_ms: 0.0,
            last_updated: Utc::now(),
        }
    }
}

impl NodeMetrics {
    /// 合并节点上报的资源使用情况，保留协调器维护的计数
    pub fn merge_reported(&mut self, reported: &NodeMetrics) {
        self.cpu_usage = reported.cpu_usage;
        self.memory_usage = reported.memory_usage;
        self.storage_usage = reported.storage_usage;
        self.network_usage = reported.network_usage;
        if reported.average_latency_ms > 0.0 {
            self.average_latency_ms = reported.average_latency_ms;
        }
        self.last_updated = Utc::now();
    }

    /// 记录一次子操作完成，延迟使用指数移动平均
    pub fn record_completion(&mut self, success: bool, latency_ms: f64) {
        self.active_operations = self.active_operations.saturating_sub(1);
        if success {
            self.completed_ops += 1;
        } else {
            self.failed_ops += 1;
        }
        let finished = self.completed_ops + self.failed_ops;
        self.average_latency_ms = if finished <= 1 {
            latency_ms
        } else {
            self.average_latency_ms * 0.8 + latency_ms * 0.2
        };
        self.last_updated = Utc::now();
    }
}

/// 工作节点
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Node {
    pub id: String,
    pub address: String,
    pub port: u16,
    pub status: NodeStatus,
    #[serde(default)]
    pub capabilities: BTreeSet<String>,
    #[serde(default)]
    pub resources: NodeResources,
    #[serde(default)]
    pub metrics: NodeMetrics,
    pub last_seen: DateTime<Utc>,
    #[serde(default)]
    pub tags: HashMap<String, String>,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub region: String,
    #[serde(default)]
    pub zone: String,
}

impl Node {
    pub fn new(id: impl Into<String>, address: impl Into<String>, port: u16) -> Self {
        Self {
            id: id.into(),
            address: address.into(),
            port,
            status: NodeStatus::Active,
            capabilities: BTreeSet::new(),
            resources: NodeResources::default(),
            metrics: NodeMetrics::default(),
            last_seen: Utc::now(),
            tags: HashMap::new(),
            version: String::new(),
            region: String::new(),
            zone: String::new(),
        }
    }

    pub fn with_capacity(mut self, max_concurrent_ops: u32) -> Self {
        self.resources.max_concurrent_ops = max_concurrent_ops;
        self
    }

    pub fn with_capability<S: Into<String>>(mut self, capability: S) -> Self {
        self.capabilities.insert(capability.into());
        self
    }

    pub fn with_location<S: Into<String>>(mut self, region: S, zone: S) -> Self {
        self.region = region.into();
        self.zone = zone.into();
        self
    }

    /// 代理服务的基础URL
    pub fn endpoint(&self) -> String {
        format!("http://{}:{}", self.address, self.port)
    }

    /// 只有active且未满载的节点可以被选中
    pub fn is_eligible(&self) -> bool {
        self.status == NodeStatus::Active
            && self.metrics.active_operations < self.resources.max_concurrent_ops
    }

    /// 负载率：activeOperations / maxConcurrentOps，无容量的节点视为满载
    pub fn load_ratio(&self) -> f64 {
        if self.resources.max_concurrent_ops == 0 {
            1.0
        } else {
            self.metrics.active_operations as f64 / self.resources.max_concurrent_ops as f64
        }
    }

    pub fn is_stale(&self, now: DateTime<Utc>, threshold: chrono::Duration) -> bool {
        now - self.last_seen > threshold
    }

    /// 检查节点是否满足硬性要求（首选区域只影响排序）
    pub fn satisfies(&self, requirements: &NodeRequirements) -> bool {
        if let Some(ids) = &requirements.node_ids {
            if !ids.iter().any(|id| id == &self.id) {
                return false;
            }
        }
        if self.resources.cpu < requirements.min_cpu
            || self.resources.memory < requirements.min_memory
            || self.resources.storage < requirements.min_storage
        {
            return false;
        }
        if !requirements
            .required_capabilities
            .iter()
            .all(|c| self.capabilities.contains(c))
        {
            return false;
        }
        if let Some(max_latency_ms) = requirements.max_latency_ms {
            if self.metrics.average_latency_ms > max_latency_ms as f64 {
                return false;
            }
        }
        true
    }

    /// 区域/可用区偏好得分，越高越优先
    pub fn locality_score(&self, requirements: &NodeRequirements) -> u8 {
        let mut score = 0;
        if let Some(region) = &requirements.preferred_region {
            if &self.region == region {
                score += 2;
            }
        }
        if let Some(zone) = &requirements.preferred_zone {
            if &self.zone == zone {
                score += 1;
            }
        }
        score
    }
}

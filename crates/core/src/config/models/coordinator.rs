use std::time::Duration;

use serde::{Deserialize, Serialize};

pub(crate) fn default_node_id() -> String {
    hostname::get()
        .ok()
        .and_then(|name| name.into_string().ok())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| "coordinator-local".to_string())
}

/// 协调器配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// 协调器自身的节点ID，本地执行的子操作使用该ID
    pub node_id: String,
    pub health_check_interval_seconds: u64,
    /// 未设置时为健康检查间隔的5倍
    pub staleness_threshold_seconds: Option<u64>,
    pub operation_timeout_seconds: u64,
    /// 单次RPC超时，受操作剩余时间限制
    pub rpc_timeout_seconds: u64,
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    pub retry_backoff_multiplier: f64,
    pub retry_jitter_factor: f64,
    pub enable_failover: bool,
    pub load_balancing_strategy: String, // "least_loaded", "round_robin"
    /// replicated策略的默认法定数量，未设置时为全部目标节点
    pub default_replication_quorum: Option<usize>,
    pub gc_interval_seconds: u64,
    pub operation_retention_seconds: u64,
    pub drain_poll_initial_ms: u64,
    pub drain_poll_max_ms: u64,
    pub default_drain_timeout_seconds: u64,
    pub telemetry_buffer_size: usize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            node_id: default_node_id(),
            health_check_interval_seconds: 30,
            staleness_threshold_seconds: None,
            operation_timeout_seconds: 300,
            rpc_timeout_seconds: 30,
            max_retries: 3,
            retry_base_delay_ms: 1000,
            retry_max_delay_ms: 30_000,
            retry_backoff_multiplier: 2.0,
            retry_jitter_factor: 0.1,
            enable_failover: true,
            load_balancing_strategy: "least_loaded".to_string(),
            default_replication_quorum: None,
            gc_interval_seconds: 3600,
            operation_retention_seconds: 86_400,
            drain_poll_initial_ms: 250,
            drain_poll_max_ms: 1000,
            default_drain_timeout_seconds: 60,
            telemetry_buffer_size: 1024,
        }
    }
}

impl CoordinatorConfig {
    pub const LOAD_BALANCING_STRATEGIES: [&'static str; 2] = ["least_loaded", "round_robin"];

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.node_id.trim().is_empty() {
            return Err(anyhow::anyhow!("协调器节点ID不能为空"));
        }

        if self.health_check_interval_seconds == 0 {
            return Err(anyhow::anyhow!("健康检查间隔必须大于0"));
        }

        if let Some(threshold) = self.staleness_threshold_seconds {
            if threshold < self.health_check_interval_seconds {
                return Err(anyhow::anyhow!(
                    "节点过期阈值({}s)不能小于健康检查间隔({}s)",
                    threshold,
                    self.health_check_interval_seconds
                ));
            }
        }

        if self.operation_timeout_seconds == 0 {
            return Err(anyhow::anyhow!("操作超时时间必须大于0"));
        }

        if self.rpc_timeout_seconds == 0 {
            return Err(anyhow::anyhow!("RPC超时时间必须大于0"));
        }

        if self.retry_base_delay_ms > self.retry_max_delay_ms {
            return Err(anyhow::anyhow!("重试基础延迟不能大于最大延迟"));
        }

        if self.retry_backoff_multiplier < 1.0 {
            return Err(anyhow::anyhow!("退避倍数必须大于等于1.0"));
        }

        if !(0.0..=1.0).contains(&self.retry_jitter_factor) {
            return Err(anyhow::anyhow!("抖动因子必须在0.0到1.0之间"));
        }

        if !Self::LOAD_BALANCING_STRATEGIES.contains(&self.load_balancing_strategy.as_str()) {
            return Err(anyhow::anyhow!(
                "无效的负载均衡策略: {}，支持的策略: {:?}",
                self.load_balancing_strategy,
                Self::LOAD_BALANCING_STRATEGIES
            ));
        }

        if self.default_replication_quorum == Some(0) {
            return Err(anyhow::anyhow!("默认法定数量必须大于0"));
        }

        if self.gc_interval_seconds == 0 {
            return Err(anyhow::anyhow!("垃圾回收间隔必须大于0"));
        }

        if self.drain_poll_initial_ms == 0 || self.drain_poll_initial_ms > self.drain_poll_max_ms {
            return Err(anyhow::anyhow!("排空轮询间隔配置无效"));
        }

        if self.telemetry_buffer_size == 0 {
            return Err(anyhow::anyhow!("遥测缓冲区大小必须大于0"));
        }

        Ok(())
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_interval_seconds)
    }

    pub fn staleness_threshold(&self) -> Duration {
        Duration::from_secs(
            self.staleness_threshold_seconds
                .unwrap_or(self.health_check_interval_seconds * 5),
        )
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_secs(self.operation_timeout_seconds)
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_secs(self.rpc_timeout_seconds)
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }

    pub fn retry_max_delay(&self) -> Duration {
        Duration::from_millis(self.retry_max_delay_ms)
    }

    pub fn gc_interval(&self) -> Duration {
        Duration::from_secs(self.gc_interval_seconds)
    }

    pub fn operation_retention(&self) -> Duration {
        Duration::from_secs(self.operation_retention_seconds)
    }

    pub fn drain_poll_initial(&self) -> Duration {
        Duration::from_millis(self.drain_poll_initial_ms)
    }

    pub fn drain_poll_max(&self) -> Duration {
        Duration::from_millis(self.drain_poll_max_ms)
    }

    pub fn default_drain_timeout(&self) -> Duration {
        Duration::from_secs(self.default_drain_timeout_seconds)
    }
}

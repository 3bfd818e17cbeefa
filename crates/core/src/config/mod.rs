//! 配置管理
//!
//! 配置按 `coordinator`、`agent`、`api`、`observability` 四个段落组织。
//! 加载顺序为内置默认值、TOML配置文件、`COORDINATOR_` 前缀的环境变量。
//!
//! ```rust,no_run
//! use coordinator_core::config::AppConfig;
//!
//! let config = AppConfig::load(Some("config/coordinator.toml"))?;
//! println!("operation timeout: {:?}", config.coordinator.operation_timeout());
//! # Ok::<(), anyhow::Error>(())
//! ```

pub mod models;

#[cfg(test)]
mod tests;

pub use models::{AgentConfig, ApiConfig, AppConfig, CoordinatorConfig, ObservabilityConfig};

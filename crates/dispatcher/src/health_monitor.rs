use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::interval;
use tracing::{debug, info, warn};

use crate::node_registry::NodeRegistry;

/// 健康检查配置
#[derive(Debug, Clone)]
pub struct HealthMonitorConfig {
    /// 检测间隔
    pub check_interval: Duration,
    /// 超过该时间未上报心跳的active节点会被标记为unavailable
    pub staleness_threshold: Duration,
}

impl Default for HealthMonitorConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(30),
            staleness_threshold: Duration::from_secs(150), // 5倍检测间隔
        }
    }
}

/// 节点健康监控
///
/// 周期性扫描注册表，只做 active → unavailable 的降级；
/// 节点恢复只能通过重新注册或心跳完成。
pub struct HealthMonitor {
    registry: Arc<NodeRegistry>,
    config: HealthMonitorConfig,
    shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
    monitor_handle: Option<tokio::task::JoinHandle<()>>,
}

impl HealthMonitor {
    pub fn new(registry: Arc<NodeRegistry>, config: HealthMonitorConfig) -> Self {
        Self {
            registry,
            config,
            shutdown_tx: None,
            monitor_handle: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.monitor_handle.is_some()
    }

    /// 启动健康检查循环
    pub fn start(&mut self) {
        if self.is_running() {
            warn!("健康监控已在运行");
            return;
        }

        info!(
            interval = ?self.config.check_interval,
            threshold = ?self.config.staleness_threshold,
            "启动节点健康监控"
        );

        let (shutdown_tx, mut shutdown_rx) = tokio::sync::oneshot::channel();
        self.shutdown_tx = Some(shutdown_tx);

        let registry = self.registry.clone();
        let config = self.config.clone();

        let handle = tokio::spawn(async move {
            let mut check_interval = interval(config.check_interval);

            loop {
                tokio::select! {
                    _ = check_interval.tick() => {
                        Self::sweep(&registry, &config).await;
                    }
                    _ = &mut shutdown_rx => {
                        info!("收到停止信号，退出健康监控循环");
                        break;
                    }
                }
            }
        });

        self.monitor_handle = Some(handle);
    }

    /// 停止健康检查循环并等待其退出
    pub async fn stop(&mut self) {
        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            let _ = shutdown_tx.send(());
        }

        if let Some(handle) = self.monitor_handle.take() {
            if let Err(e) = handle.await {
                warn!("等待健康监控退出时出错: {}", e);
            }
        }

        info!("节点健康监控已停止");
    }

    /// 执行一次扫描，返回被降级的节点ID
    pub async fn check_once(&self) -> Vec<String> {
        Self::sweep(&self.registry, &self.config).await
    }

    async fn sweep(registry: &NodeRegistry, config: &HealthMonitorConfig) -> Vec<String> {
        let threshold = chrono::Duration::from_std(config.staleness_threshold)
            .unwrap_or_else(|_| chrono::Duration::seconds(150));
        let demoted = registry.mark_stale_unavailable(Utc::now(), threshold).await;

        if demoted.is_empty() {
            debug!("健康检查完成，所有active节点心跳正常");
        } else {
            warn!("检测到 {} 个心跳超时的节点: {:?}", demoted.len(), demoted);
        }
        demoted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::mocks::{test_node, RecordingTelemetry};
    use coordinator_core::models::{LifecycleEvent, NodeStatus};

    fn registry() -> (Arc<NodeRegistry>, Arc<RecordingTelemetry>) {
        let telemetry = Arc::new(RecordingTelemetry::default());
        (Arc::new(NodeRegistry::new(telemetry.clone())), telemetry)
    }

    #[tokio::test]
    async fn test_check_once_demotes_stale_nodes() {
        let (registry, telemetry) = registry();
        registry.register(test_node("node-1")).await.unwrap();

        let monitor = HealthMonitor::new(
            registry.clone(),
            HealthMonitorConfig {
                check_interval: Duration::from_secs(1),
                staleness_threshold: Duration::ZERO,
            },
        );
        tokio::time::sleep(Duration::from_millis(5)).await;

        let demoted = monitor.check_once().await;
        assert_eq!(demoted, vec!["node-1".to_string()]);
        assert_eq!(
            registry.get("node-1").await.unwrap().status,
            NodeStatus::Unavailable
        );
        assert_eq!(
            telemetry.count(|e| matches!(
                e,
                LifecycleEvent::NodeStatusChanged {
                    to: NodeStatus::Unavailable,
                    ..
                }
            )),
            1
        );

        // 监控不会自动恢复节点
        assert!(monitor.check_once().await.is_empty());
        assert_eq!(
            registry.get("node-1").await.unwrap().status,
            NodeStatus::Unavailable
        );
    }

    #[tokio::test]
    async fn test_fresh_nodes_stay_active() {
        let (registry, _) = registry();
        registry.register(test_node("node-1")).await.unwrap();

        let monitor = HealthMonitor::new(registry.clone(), HealthMonitorConfig::default());
        assert!(monitor.check_once().await.is_empty());
        assert_eq!(registry.get("node-1").await.unwrap().status, NodeStatus::Active);
    }

    #[tokio::test]
    async fn test_start_and_stop() {
        let (registry, _) = registry();
        let mut monitor = HealthMonitor::new(registry, HealthMonitorConfig::default());

        monitor.start();
        assert!(monitor.is_running());
        monitor.stop().await;
        assert!(!monitor.is_running());
    }
}

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::interval;
use tracing::{debug, error, info, warn};

use coordinator_core::{models::LifecycleEvent, traits::TelemetrySink};

use crate::node_registry::NodeRegistry;
use crate::operation_store::OperationStore;

/// Retention settings for terminal operations.
#[derive(Debug, Clone)]
pub struct GarbageCollectorConfig {
    pub interval: Duration,
    pub retention: Duration,
}

impl Default for GarbageCollectorConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(3600),
            retention: Duration::from_secs(86_400),
        }
    }
}

/// Periodically drops terminal operations whose end time is older than the
/// retention window. Non-terminal operations are never collected.
///
/// With a registry attached, removed-node tombstones past the same window are dropped too.
pub struct GarbageCollector {
    operations: Arc<OperationStore>,
    registry: Option<Arc<NodeRegistry>>,
    telemetry: Arc<dyn TelemetrySink>,
    config: GarbageCollectorConfig,
    shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
    gc_handle: Option<tokio::task::JoinHandle<()>>,
}

impl GarbageCollector {
    pub fn new(
        operations: Arc<OperationStore>,
        telemetry: Arc<dyn TelemetrySink>,
        config: GarbageCollectorConfig,
    ) -> Self {
        Self {
            operations,
            registry: None,
            telemetry,
            config,
            shutdown_tx: None,
            gc_handle: None,
        }
    }

    pub fn with_registry(mut self, registry: Arc<NodeRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn is_running(&self) -> bool {
        self.gc_handle.is_some()
    }

    pub fn start(&mut self) {
        if self.is_running() {
            warn!("Garbage collector is already running");
            return;
        }

        info!("Starting operation garbage collector with config: {:?}", self.config);

        let (shutdown_tx, mut shutdown_rx) = tokio::sync::oneshot::channel();
        self.shutdown_tx = Some(shutdown_tx);

        let operations = self.operations.clone();
        let registry = self.registry.clone();
        let telemetry = self.telemetry.clone();
        let config = self.config.clone();

        let handle = tokio::spawn(async move {
            let mut gc_interval = interval(config.interval);
            // 第一次tick立即返回，跳过启动时的空扫描
            gc_interval.tick().await;

            loop {
                tokio::select! {
                    _ = gc_interval.tick() => {
                        Self::collect(
                            &operations,
                            registry.as_deref(),
                            telemetry.as_ref(),
                            config.retention,
                        )
                        .await;
                    }
                    _ = &mut shutdown_rx => {
                        info!("Garbage collector shutdown requested");
                        break;
                    }
                }
            }
        });

        self.gc_handle = Some(handle);
    }

    pub async fn stop(&mut self) {
        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            let _ = shutdown_tx.send(());
        }

        if let Some(handle) = self.gc_handle.take() {
            if let Err(e) = handle.await {
                warn!("Error waiting for garbage collector to stop: {}", e);
            }
        }

        info!("Garbage collector stopped");
    }

    /// Runs one sweep and returns the number of collected operations.
    pub async fn collect_once(&self) -> usize {
        Self::collect(
            &self.operations,
            self.registry.as_deref(),
            self.telemetry.as_ref(),
            self.config.retention,
        )
        .await
    }

    async fn collect(
        operations: &OperationStore,
        registry: Option<&NodeRegistry>,
        telemetry: &dyn TelemetrySink,
        retention: Duration,
    ) -> usize {
        let retention = match chrono::Duration::from_std(retention) {
            Ok(retention) => retention,
            Err(e) => {
                error!("Invalid retention window {:?}: {}", retention, e);
                return 0;
            }
        };

        let cutoff = Utc::now() - retention;
        if let Some(registry) = registry {
            let purged = registry.purge_tombstones_before(cutoff).await;
            if purged > 0 {
                debug!(count = purged, "Dropped expired node tombstones");
            }
        }

        let collected = operations.purge_terminal_before(cutoff).await;
        if collected.is_empty() {
            debug!("No expired operations to collect");
            return 0;
        }

        info!(count = collected.len(), "Collected expired operations");
        telemetry.emit(LifecycleEvent::OperationsCollected {
            count: collected.len(),
        });
        collected.len()
    }
}

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use coordinator_core::{models::LifecycleEvent, traits::TelemetrySink};

use crate::metrics_collector::MetricsCollector;

/// 基于有界通道的事件出口
///
/// `emit` 使用 `try_send`，通道满或消费端已退出时丢弃事件并计数，调用方永远不会等待。
#[derive(Clone)]
pub struct ChannelTelemetrySink {
    tx: mpsc::Sender<LifecycleEvent>,
    dropped: Arc<AtomicU64>,
}

impl ChannelTelemetrySink {
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl TelemetrySink for ChannelTelemetrySink {
    fn emit(&self, event: LifecycleEvent) {
        if let Err(e) = self.tx.try_send(event) {
            let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            let reason = match e {
                mpsc::error::TrySendError::Full(_) => "channel full",
                mpsc::error::TrySendError::Closed(_) => "consumer stopped",
            };
            debug!(dropped, "丢弃生命周期事件: {}", reason);
        }
    }
}

/// 事件消费端：把事件写入指标并记录日志
pub struct TelemetryConsumer {
    rx: mpsc::Receiver<LifecycleEvent>,
    collector: Arc<MetricsCollector>,
    dropped: Arc<AtomicU64>,
}

/// 创建事件通道，返回发送端和消费端
pub fn telemetry_channel(
    buffer_size: usize,
    collector: Arc<MetricsCollector>,
) -> (ChannelTelemetrySink, TelemetryConsumer) {
    let (tx, rx) = mpsc::channel(buffer_size.max(1));
    let dropped = Arc::new(AtomicU64::new(0));
    (
        ChannelTelemetrySink {
            tx,
            dropped: dropped.clone(),
        },
        TelemetryConsumer {
            rx,
            collector,
            dropped,
        },
    )
}

impl TelemetryConsumer {
    fn handle(&self, event: &LifecycleEvent) {
        self.collector.record(event);
        self.collector
            .update_dropped_events(self.dropped.load(Ordering::Relaxed));
        info!(event = event.name(), detail = ?event, "lifecycle event");
    }

    /// 在后台消费事件，收到停止信号后处理完已排队的事件再退出
    pub fn start(mut self, mut shutdown_rx: broadcast::Receiver<()>) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    received = self.rx.recv() => match received {
                        Some(event) => self.handle(&event),
                        None => break,
                    },
                    _ = shutdown_rx.recv() => {
                        while let Ok(event) = self.rx.try_recv() {
                            self.handle(&event);
                        }
                        break;
                    }
                }
            }
            let dropped = self.dropped.load(Ordering::Relaxed);
            if dropped > 0 {
                warn!(dropped, "Telemetry consumer stopped, some events were dropped");
            } else {
                info!("Telemetry consumer stopped");
            }
        })
    }
}

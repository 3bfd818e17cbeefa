use crate::models::LifecycleEvent;

/// 生命周期事件出口
///
/// `emit` 不允许阻塞调用方，实现方在下游不可用时应直接丢弃事件。
pub trait TelemetrySink: Send + Sync {
    fn emit(&self, event: LifecycleEvent);
}

/// 丢弃所有事件
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTelemetry;

impl TelemetrySink for NoopTelemetry {
    fn emit(&self, _event: LifecycleEvent) {}
}

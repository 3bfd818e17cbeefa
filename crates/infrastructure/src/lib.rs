//! Observability plumbing for the coordinator: the non-blocking telemetry
//! sink, the metrics collector fed by lifecycle events and the Prometheus
//! exporter.

pub mod metrics_collector;
pub mod prometheus;
pub mod telemetry;

pub use metrics_collector::MetricsCollector;
pub use prometheus::{install_prometheus_recorder, MetricsExporter};
pub use telemetry::{telemetry_channel, ChannelTelemetrySink, TelemetryConsumer};

use anyhow::Result;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Renders the Prometheus text exposition of the global recorder.
#[derive(Clone)]
pub struct MetricsExporter {
    handle: PrometheusHandle,
}

impl MetricsExporter {
    pub fn render(&self) -> String {
        self.handle.render()
    }
}

/// Install the Prometheus recorder as the global `metrics` recorder
pub fn install_prometheus_recorder() -> Result<MetricsExporter> {
    let recorder = PrometheusBuilder::new().build_recorder();
    let handle = recorder.handle();

    metrics::set_global_recorder(recorder)
        .map_err(|e| anyhow::anyhow!("Failed to install metrics recorder: {}", e))?;

    info!("Prometheus metrics recorder installed");
    Ok(MetricsExporter { handle })
}

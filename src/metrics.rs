use metrics::{register_counter, register_histogram, Counter, Histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::ToolError;

/// Counters shared by every subcommand
///
/// Handles are registered against whatever recorder is installed when
/// [`Metrics::new`] runs, so install the exporter first.
pub struct Metrics {
    pub images_created: Counter,
    pub images_failed: Counter,
    pub captures_ok: Counter,
    pub captures_failed: Counter,
    pub captures_skipped: Counter,
    pub capture_retries: Counter,
    pub capture_duration: Histogram,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            images_created: register_counter!("images_created"),
            images_failed: register_counter!("images_failed"),
            captures_ok: register_counter!("captures_ok"),
            captures_failed: register_counter!("captures_failed"),
            captures_skipped: register_counter!("captures_skipped"),
            capture_retries: register_counter!("capture_retries"),
            capture_duration: register_histogram!("capture_duration_seconds"),
        }
    }

    pub fn record_images_created(&self, count: usize) {
        self.images_created.increment(count as u64);
    }

    pub fn record_image_failed(&self) {
        self.images_failed.increment(1);
    }

    pub fn record_capture(&self, duration: Duration, success: bool) {
        if success {
            self.captures_ok.increment(1);
        } else {
            self.captures_failed.increment(1);
        }

        self.capture_duration.record(duration.as_secs_f64());
    }

    pub fn record_skip(&self) {
        self.captures_skipped.increment(1);
    }

    pub fn record_retry(&self) {
        self.capture_retries.increment(1);
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Prometheus recorder whose text exposition is written to a file on exit
pub struct PrometheusExporter {
    handle: PrometheusHandle,
}

impl PrometheusExporter {
    pub fn install() -> Result<Self, ToolError> {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .map_err(|e| ToolError::ConfigurationError(format!("metrics recorder: {e}")))?;
        Ok(Self { handle })
    }

    pub fn render(&self) -> String {
        self.handle.render()
    }

    pub fn write_to(&self, path: &Path) -> Result<(), ToolError> {
        std::fs::write(path, self.render())?;
        info!("Metrics written to {}", path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_without_recorder_are_noops() {
        let metrics = Metrics::new();
        metrics.record_images_created(3);
        metrics.record_image_failed();
        metrics.record_capture(Duration::from_millis(120), true);
        metrics.record_capture(Duration::from_millis(80), false);
        metrics.record_skip();
        metrics.record_retry();
    }
}

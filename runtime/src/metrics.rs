//! Prometheus metrics for effect execution and storage access.
//!
//! Metric names:
//! - `data_effects_executed_total` / `data_effects_failed_total{kind}`
//! - `data_effect_duration_seconds`
//! - `data_transactions_committed_total` / `data_transactions_rolled_back_total`
//! - `data_queries_total{operation}`
//! - `data_retry_attempts_total`, `data_retry_successes_total`, `data_retry_exhausted_total`
//!
//! Storage adapters emit the transaction and query counters through the
//! `metrics` facade; this module describes them and installs the exporter.
//!
//! # Example
//!
//! ```rust,no_run
//! use composable_data_runtime::metrics::MetricsServer;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut server = MetricsServer::new("0.0.0.0:9090".parse()?);
//! server.start()?;
//!
//! // Serve `server.render()` at /metrics
//! # Ok(())
//! # }
//! ```

use composable_data_core::error::ErrorKind;
use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
    /// Failed to install metrics exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Prometheus metrics endpoint.
///
/// Installs a global recorder; the host application serves [`MetricsServer::render`]
/// at `addr` for scraping.
pub struct MetricsServer {
    addr: SocketAddr,
    handle: Option<PrometheusHandle>,
}

impl MetricsServer {
    /// Create a new metrics server.
    ///
    /// # Arguments
    ///
    /// * `addr` - Address the metrics endpoint is served on (e.g., `0.0.0.0:9090`)
    #[must_use]
    pub const fn new(addr: SocketAddr) -> Self {
        Self { addr, handle: None }
    }

    /// Describe metrics and install the exporter.
    ///
    /// # Errors
    ///
    /// Returns error if the exporter cannot be built or installed. A
    /// recorder that is already installed is not an error.
    pub fn start(&mut self) -> Result<(), MetricsError> {
        register_metrics();

        let builder = PrometheusBuilder::new()
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?;

        match builder.install_recorder() {
            Ok(handle) => {
                self.handle = Some(handle);
                tracing::info!(addr = %self.addr, "Metrics exporter installed");
                Ok(())
            },
            Err(e) => {
                let message = e.to_string();
                if message.contains("already initialized") {
                    tracing::warn!("Metrics recorder already initialized, skipping re-initialization");
                    Ok(())
                } else {
                    Err(MetricsError::Install(message))
                }
            },
        }
    }

    /// Render current metrics in Prometheus format.
    ///
    /// Returns `None` if this server did not install the recorder.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

/// Register all metric descriptions.
pub fn register_metrics() {
    describe_counter!("data_effects_executed_total", "Total number of effects executed");
    describe_counter!(
        "data_effects_failed_total",
        "Total number of effects that failed, by error kind"
    );
    describe_histogram!(
        "data_effect_duration_seconds",
        "Time taken to execute effects"
    );
    describe_counter!(
        "data_transactions_committed_total",
        "Total number of committed units of work"
    );
    describe_counter!(
        "data_transactions_rolled_back_total",
        "Total number of rolled back units of work"
    );
    describe_counter!(
        "data_queries_total",
        "Total number of repository operations, by operation"
    );
    describe_counter!("data_retry_attempts_total", "Total number of retry attempts");
    describe_counter!("data_retry_successes_total", "Total number of successful retries");
    describe_counter!(
        "data_retry_exhausted_total",
        "Total number of operations that exhausted their retries"
    );
}

/// Effect metrics recorder.
pub struct EffectMetrics;

impl EffectMetrics {
    /// Record a finished effect execution.
    pub fn record_execution(duration: Duration) {
        counter!("data_effects_executed_total").increment(1);
        histogram!("data_effect_duration_seconds").record(duration.as_secs_f64());
    }

    /// Record an effect failure.
    pub fn record_failure(kind: ErrorKind) {
        counter!("data_effects_failed_total", "kind" => kind.as_str()).increment(1);
    }
}

/// Retry metrics recorder.
pub struct RetryMetrics;

impl RetryMetrics {
    /// Record a retry attempt.
    pub fn record_attempt() {
        counter!("data_retry_attempts_total").increment(1);
    }

    /// Record a successful retry.
    pub fn record_success() {
        counter!("data_retry_successes_total").increment(1);
    }

    /// Record exhausted retries.
    pub fn record_exhausted() {
        counter!("data_retry_exhausted_total").increment(1);
    }
}

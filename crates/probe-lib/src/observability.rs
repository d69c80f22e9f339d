//! Observability infrastructure for the probe agent
//!
//! Provides:
//! - Prometheus metrics (probe latency, learner call latency, labels, failures)
//! - Structured JSON logging with tracing

use crate::models::Label;
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge,
    Histogram, IntCounter, IntCounterVec, IntGauge,
};
use std::sync::OnceLock;
use tracing::{info, warn};

/// Buckets for round trips through the proxy (in seconds)
const PROBE_BUCKETS: &[f64] = &[
    0.05, 0.1, 0.25, 0.5, 1.0, 2.0, 3.0, 5.0, 7.5, 10.0, 20.0, 30.0,
];

/// Buckets for in-process learner calls (in seconds)
const LEARNER_BUCKETS: &[f64] = &[
    0.00001, 0.00005, 0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5,
];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<ProbeMetricsInner> = OnceLock::new();

struct ProbeMetricsInner {
    probe_latency_seconds: Histogram,
    learner_call_seconds: Histogram,
    classifications: IntCounterVec,
    transport_errors: IntCounter,
    invalid_signals: IntCounter,
    persistence_failures: IntCounter,
    label_log_failures: IntCounter,
    model_samples: IntGauge,
    workers_active: IntGauge,
}

impl ProbeMetricsInner {
    fn new() -> Self {
        Self {
            probe_latency_seconds: register_histogram!(
                "latency_probe_round_trip_seconds",
                "Round trip time of probes through the proxy",
                PROBE_BUCKETS.to_vec()
            )
            .expect("Failed to register round_trip_seconds"),

            learner_call_seconds: register_histogram!(
                "latency_probe_learner_call_seconds",
                "Time the learner spends on one command, including persistence",
                LEARNER_BUCKETS.to_vec()
            )
            .expect("Failed to register learner_call_seconds"),

            classifications: register_int_counter_vec!(
                "latency_probe_classifications_total",
                "Classification decisions by label",
                &["label"]
            )
            .expect("Failed to register classifications_total"),

            transport_errors: register_int_counter!(
                "latency_probe_transport_errors_total",
                "Connection or probe failures through the proxy"
            )
            .expect("Failed to register transport_errors_total"),

            invalid_signals: register_int_counter!(
                "latency_probe_invalid_signals_total",
                "Probe cycles discarded because of an invalid latency or score"
            )
            .expect("Failed to register invalid_signals_total"),

            persistence_failures: register_int_counter!(
                "latency_probe_persistence_failures_total",
                "Failed attempts to save the model"
            )
            .expect("Failed to register persistence_failures_total"),

            label_log_failures: register_int_counter!(
                "latency_probe_label_log_failures_total",
                "Labels that could not be appended to the label log"
            )
            .expect("Failed to register label_log_failures_total"),

            model_samples: register_int_gauge!(
                "latency_probe_model_samples",
                "Number of samples the model has been trained on"
            )
            .expect("Failed to register model_samples"),

            workers_active: register_int_gauge!(
                "latency_probe_workers_active",
                "Number of probe workers currently running"
            )
            .expect("Failed to register workers_active"),
        }
    }
}

/// Lightweight handle to the global metrics instance.
/// Multiple clones share the same underlying metrics.
#[derive(Clone)]
pub struct ProbeMetrics {
    _private: (),
}

impl Default for ProbeMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl ProbeMetrics {
    /// Create a new metrics handle (initializes global metrics if needed)
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(ProbeMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &ProbeMetricsInner {
        GLOBAL_METRICS.get_or_init(ProbeMetricsInner::new)
    }

    pub fn observe_probe_latency(&self, duration_secs: f64) {
        self.inner().probe_latency_seconds.observe(duration_secs);
    }

    pub fn observe_learner_latency(&self, duration_secs: f64) {
        self.inner().learner_call_seconds.observe(duration_secs);
    }

    pub fn inc_classification(&self, label: Label) {
        self.inner()
            .classifications
            .with_label_values(&[label.as_str()])
            .inc();
    }

    pub fn inc_transport_errors(&self) {
        self.inner().transport_errors.inc();
    }

    pub fn inc_invalid_signals(&self) {
        self.inner().invalid_signals.inc();
    }

    pub fn inc_persistence_failures(&self) {
        self.inner().persistence_failures.inc();
    }

    pub fn inc_label_log_failures(&self) {
        self.inner().label_log_failures.inc();
    }

    pub fn set_model_samples(&self, count: u64) {
        self.inner()
            .model_samples
            .set(i64::try_from(count).unwrap_or(i64::MAX));
    }

    pub fn worker_started(&self) {
        self.inner().workers_active.inc();
    }

    pub fn worker_stopped(&self) {
        self.inner().workers_active.dec();
    }
}

/// Structured logger for probe events
///
/// Provides consistent JSON-formatted logging for classifications,
/// model lifecycle and other significant events.
#[derive(Clone)]
pub struct ProbeLogger {
    target: String,
}

impl ProbeLogger {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
        }
    }

    /// Log a classification decision
    pub fn log_classification(
        &self,
        worker_id: usize,
        label: Label,
        latency_ms: f64,
        score: f64,
        status: Option<u16>,
    ) {
        match label {
            Label::RateLimited => {
                warn!(
                    event = "traffic_classified",
                    probe_target = %self.target,
                    worker_id = worker_id,
                    label = %label,
                    latency_ms = latency_ms,
                    score = score,
                    status = ?status,
                    "Rate limiting detected"
                );
            }
            Label::Normal => {
                info!(
                    event = "traffic_classified",
                    probe_target = %self.target,
                    worker_id = worker_id,
                    label = %label,
                    latency_ms = latency_ms,
                    score = score,
                    status = ?status,
                    "No rate limiting detected"
                );
            }
        }
    }

    /// Log how the model was obtained at startup
    pub fn log_model_loaded(&self, sample_count: u64, from_disk: bool) {
        info!(
            event = "model_loaded",
            probe_target = %self.target,
            sample_count = sample_count,
            from_disk = from_disk,
            "Model ready"
        );
    }

    /// Log a failed model save
    pub fn log_persistence_failure(&self, error: &str) {
        warn!(
            event = "model_persist_failed",
            probe_target = %self.target,
            error = %error,
            "Model update kept in memory but not saved"
        );
    }

    /// Log a label that could not be written
    pub fn log_label_dropped(&self, label: Label, error: &str) {
        warn!(
            event = "label_dropped",
            probe_target = %self.target,
            label = %label,
            error = %error,
            "Failed to append label record"
        );
    }

    /// Log agent startup
    pub fn log_startup(&self, version: &str, worker_count: usize, threshold: f64) {
        info!(
            event = "agent_started",
            probe_target = %self.target,
            agent_version = %version,
            worker_count = worker_count,
            threshold = threshold,
            "Probe agent started"
        );
    }

    /// Log agent shutdown
    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "agent_shutdown",
            probe_target = %self.target,
            reason = %reason,
            "Probe agent shutting down"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_probe_metrics_creation() {
        let metrics = ProbeMetrics::new();

        metrics.observe_probe_latency(0.4);
        metrics.observe_learner_latency(0.0001);
        metrics.inc_classification(Label::Normal);
        metrics.inc_classification(Label::RateLimited);
        metrics.inc_transport_errors();
        metrics.set_model_samples(12);

        // Clones share the global registry
        let clone = metrics.clone();
        clone.inc_invalid_signals();
    }

    #[test]
    fn test_probe_logger_creation() {
        let logger = ProbeLogger::new("https://example.org:443");
        assert_eq!(logger.target, "https://example.org:443");
    }
}

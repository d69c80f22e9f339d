//! Fixed-size pool of probe workers sharing one target and one learner

use super::worker::{Worker, WorkerContext, WorkerStats};
use super::{BackoffConfig, TrainingTarget};
use crate::classifier::{Classifier, DEFAULT_THRESHOLD};
use crate::health::{components, HealthRegistry};
use crate::label_log::LabelSink;
use crate::learner::Learner;
use crate::models::{ProbeRequest, ProbeTarget};
use crate::observability::{ProbeLogger, ProbeMetrics};
use crate::transport::Transport;
use anyhow::Result;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Configuration for the probe pool
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Number of concurrent workers (default: 8)
    pub worker_count: usize,
    /// Scores above this are labelled rate limited (default: 2000)
    pub threshold: f64,
    pub backoff: BackoffConfig,
    /// Request path probed on the target (default: "/")
    pub probe_path: String,
    pub training_target: TrainingTarget,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            worker_count: 8,
            threshold: DEFAULT_THRESHOLD,
            backoff: BackoffConfig::default(),
            probe_path: "/".to_string(),
            training_target: TrainingTarget::default(),
        }
    }
}

/// Aggregated worker counters after shutdown
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolReport {
    pub workers: usize,
    pub cycles_completed: u64,
    pub cycles_discarded: u64,
    pub transport_failures: u64,
    pub labels_written: u64,
    pub labels_dropped: u64,
    pub sessions_opened: u64,
    pub sessions_closed: u64,
}

impl PoolReport {
    fn add(&mut self, stats: &WorkerStats) {
        self.workers += 1;
        self.cycles_completed += stats.cycles_completed;
        self.cycles_discarded += stats.cycles_discarded;
        self.transport_failures += stats.transport_failures;
        self.labels_written += stats.labels_written;
        self.labels_dropped += stats.labels_dropped;
        self.sessions_opened += stats.sessions_opened;
        self.sessions_closed += stats.sessions_closed;
    }
}

/// Running pool of workers
pub struct ProbePool {
    shutdown_tx: broadcast::Sender<()>,
    workers: Vec<JoinHandle<WorkerStats>>,
    health: HealthRegistry,
}

impl ProbePool {
    fn start(ctx: Arc<WorkerContext>, worker_count: usize) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        let workers = (0..worker_count)
            .map(|id| {
                let worker = Worker::new(id, Arc::clone(&ctx), shutdown_tx.subscribe());
                tokio::spawn(worker.run())
            })
            .collect();

        info!(
            worker_count = worker_count,
            probe_target = %ctx.target,
            "Probe pool started"
        );

        Self {
            shutdown_tx,
            workers,
            health: ctx.health.clone(),
        }
    }

    pub fn builder() -> ProbePoolBuilder {
        ProbePoolBuilder::new()
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// True once every worker has exited on its own (e.g. learner gone)
    pub fn is_finished(&self) -> bool {
        self.workers.iter().all(|handle| handle.is_finished())
    }

    /// Signal every worker and wait until all of them have stopped. Cycles
    /// already in flight finish first and close their sessions.
    pub async fn shutdown(self) -> PoolReport {
        info!("Shutting down probe pool");
        // Workers that already stopped have dropped their receivers
        let _ = self.shutdown_tx.send(());

        let mut report = PoolReport::default();
        for handle in self.workers {
            match handle.await {
                Ok(stats) => report.add(&stats),
                Err(e) => error!(error = %e, "Worker task failed"),
            }
        }

        self.health
            .set_unhealthy(components::POOL, "stopped")
            .await;
        self.health.set_ready(false).await;

        info!(
            workers = report.workers,
            cycles_completed = report.cycles_completed,
            transport_failures = report.transport_failures,
            "Probe pool stopped"
        );
        report
    }
}

/// Builder for creating and starting the probe pool
pub struct ProbePoolBuilder {
    transport: Option<Arc<dyn Transport>>,
    learner: Option<Learner>,
    label_log: Option<Arc<dyn LabelSink>>,
    target: Option<ProbeTarget>,
    health: Option<HealthRegistry>,
    config: PoolConfig,
}

impl ProbePoolBuilder {
    pub fn new() -> Self {
        Self {
            transport: None,
            learner: None,
            label_log: None,
            target: None,
            health: None,
            config: PoolConfig::default(),
        }
    }

    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn learner(mut self, learner: Learner) -> Self {
        self.learner = Some(learner);
        self
    }

    pub fn label_log(mut self, label_log: Arc<dyn LabelSink>) -> Self {
        self.label_log = Some(label_log);
        self
    }

    pub fn target(mut self, target: ProbeTarget) -> Self {
        self.target = Some(target);
        self
    }

    /// Share a health registry; a private one is created otherwise
    pub fn health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    pub fn config(mut self, config: PoolConfig) -> Self {
        self.config = config;
        self
    }

    pub fn worker_count(mut self, count: usize) -> Self {
        self.config.worker_count = count;
        self
    }

    pub fn threshold(mut self, threshold: f64) -> Self {
        self.config.threshold = threshold;
        self
    }

    pub fn backoff(mut self, backoff: BackoffConfig) -> Self {
        self.config.backoff = backoff;
        self
    }

    pub fn training_target(mut self, target: TrainingTarget) -> Self {
        self.config.training_target = target;
        self
    }

    /// Validate the configuration and spawn the workers
    pub async fn start(self) -> Result<ProbePool> {
        let transport = self
            .transport
            .ok_or_else(|| anyhow::anyhow!("Transport is required"))?;
        let learner = self
            .learner
            .ok_or_else(|| anyhow::anyhow!("Learner is required"))?;
        let label_log = self
            .label_log
            .ok_or_else(|| anyhow::anyhow!("Label log is required"))?;
        let target = self
            .target
            .ok_or_else(|| anyhow::anyhow!("Target is required"))?;

        if self.config.worker_count == 0 {
            anyhow::bail!("Worker count must be at least 1");
        }
        if !self.config.threshold.is_finite() || self.config.threshold < 0.0 {
            anyhow::bail!(
                "Threshold must be finite and non-negative, got {}",
                self.config.threshold
            );
        }
        if self.config.backoff.min.is_zero() || self.config.backoff.min > self.config.backoff.max {
            anyhow::bail!(
                "Backoff bounds invalid: min {:?}, max {:?}",
                self.config.backoff.min,
                self.config.backoff.max
            );
        }

        let health = match self.health {
            Some(health) => health,
            None => HealthRegistry::with_probe_components().await,
        };
        health.set_healthy(components::POOL).await;
        health.set_ready(true).await;

        let request = ProbeRequest::for_target(&target, self.config.probe_path.clone());
        let ctx = Arc::new(WorkerContext {
            transport,
            learner,
            label_log,
            classifier: Classifier::new(self.config.threshold),
            logger: ProbeLogger::new(target.to_string()),
            target,
            request,
            training_target: self.config.training_target,
            backoff: self.config.backoff,
            health,
            metrics: ProbeMetrics::new(),
        });

        Ok(ProbePool::start(ctx, self.config.worker_count))
    }
}

impl Default for ProbePoolBuilder {
    fn default() -> Self {
        Self::new()
    }
}

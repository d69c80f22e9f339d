//! Single probe worker
//!
//! `Connecting -> Measuring -> Predicting -> Classifying -> Logging ->
//! Training -> Connecting`, with `ErrorHandling` entered from `Connecting`
//! or `Measuring` on a transport failure.

use super::{Backoff, BackoffConfig, TrainingTarget};
use crate::classifier::Classifier;
use crate::error::{InvalidSignal, LearnerError, TransportError};
use crate::health::{components, HealthRegistry};
use crate::label_log::LabelSink;
use crate::learner::Learner;
use crate::models::{Label, LabelRecord, Observation, ProbeRequest, ProbeTarget};
use crate::observability::{ProbeLogger, ProbeMetrics};
use crate::transport::Transport;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::{self, error::TryRecvError};
use tracing::{debug, info, trace, warn};

/// Where a worker is in its cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Connecting,
    Measuring,
    Predicting,
    Classifying,
    Logging,
    Training,
    ErrorHandling,
    Stopped,
}

/// How a single cycle ended
#[derive(Debug)]
pub enum CycleOutcome {
    /// Labelled and trained
    Completed(Label),
    /// Latency or score could not be used; nothing logged or trained
    Discarded(InvalidSignal),
    TransportFailed(TransportError),
    /// The learner is gone; the worker cannot make progress
    LearnerStopped,
}

/// Counters returned when a worker stops
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerStats {
    pub cycles_completed: u64,
    pub cycles_discarded: u64,
    pub transport_failures: u64,
    pub labels_written: u64,
    pub labels_dropped: u64,
    pub sessions_opened: u64,
    pub sessions_closed: u64,
}

/// Everything workers in one pool share
pub(crate) struct WorkerContext {
    pub transport: Arc<dyn Transport>,
    pub learner: Learner,
    pub label_log: Arc<dyn LabelSink>,
    pub classifier: Classifier,
    pub target: ProbeTarget,
    pub request: ProbeRequest,
    pub training_target: TrainingTarget,
    pub backoff: BackoffConfig,
    pub health: HealthRegistry,
    pub metrics: ProbeMetrics,
    pub logger: ProbeLogger,
}

pub struct Worker {
    id: usize,
    ctx: Arc<WorkerContext>,
    state: WorkerState,
    backoff: Backoff,
    stats: WorkerStats,
    shutdown: broadcast::Receiver<()>,
}

impl Worker {
    pub(crate) fn new(
        id: usize,
        ctx: Arc<WorkerContext>,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        let backoff = Backoff::new(ctx.backoff);
        Self {
            id,
            ctx,
            state: WorkerState::Connecting,
            backoff,
            stats: WorkerStats::default(),
            shutdown,
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    /// Run cycles until shutdown is signalled or the learner stops
    pub async fn run(mut self) -> WorkerStats {
        debug!(worker_id = self.id, "Worker started");
        self.ctx.metrics.worker_started();

        loop {
            if self.shutdown_requested() {
                break;
            }

            match self.run_cycle().await {
                CycleOutcome::Completed(_) => {
                    self.stats.cycles_completed += 1;
                    if self.backoff.consecutive_failures() > 0 {
                        info!(
                            worker_id = self.id,
                            failures = self.backoff.consecutive_failures(),
                            "Transport recovered"
                        );
                        self.ctx.health.set_healthy(components::TRANSPORT).await;
                    }
                    self.backoff.reset();
                }
                CycleOutcome::Discarded(signal) => {
                    self.stats.cycles_discarded += 1;
                    self.ctx.metrics.inc_invalid_signals();
                    debug!(
                        worker_id = self.id,
                        value = signal.value,
                        "Cycle discarded"
                    );
                    // Nothing was trained, so the next cycle would repeat this one
                    if !self.pause(self.ctx.backoff.min).await {
                        break;
                    }
                }
                CycleOutcome::TransportFailed(error) => {
                    self.stats.transport_failures += 1;
                    if !self.handle_error(error).await {
                        break;
                    }
                }
                CycleOutcome::LearnerStopped => {
                    warn!(worker_id = self.id, "Learner unavailable, stopping worker");
                    break;
                }
            }
        }

        self.transition(WorkerState::Stopped);
        self.ctx.metrics.worker_stopped();
        debug!(worker_id = self.id, stats = ?self.stats, "Worker stopped");
        self.stats
    }

    /// One pass through the cycle. The session is closed before this returns.
    pub async fn run_cycle(&mut self) -> CycleOutcome {
        let ctx = Arc::clone(&self.ctx);

        self.transition(WorkerState::Connecting);
        let mut session = match ctx.transport.connect(&ctx.target).await {
            Ok(session) => session,
            Err(e) => return CycleOutcome::TransportFailed(e),
        };
        self.stats.sessions_opened += 1;

        self.transition(WorkerState::Measuring);
        let measured = session.probe(&ctx.request).await;
        session.close().await;
        self.stats.sessions_closed += 1;

        let response = match measured {
            Ok(response) => response,
            Err(e) => return CycleOutcome::TransportFailed(e),
        };
        ctx.metrics
            .observe_probe_latency(response.elapsed.as_secs_f64());

        let observation = match Observation::from_response(&response) {
            Ok(observation) => observation,
            Err(signal) => return CycleOutcome::Discarded(signal),
        };

        self.transition(WorkerState::Predicting);
        let score = match ctx.learner.predict(observation.latency_ms()).await {
            Ok(score) => score,
            Err(LearnerError::InvalidSignal(signal)) => return CycleOutcome::Discarded(signal),
            Err(_) => return CycleOutcome::LearnerStopped,
        };

        self.transition(WorkerState::Classifying);
        let label = match ctx.classifier.classify(score) {
            Ok(label) => label,
            Err(signal) => return CycleOutcome::Discarded(signal),
        };
        ctx.metrics.inc_classification(label);
        ctx.logger.log_classification(
            self.id,
            label,
            observation.latency_ms(),
            score,
            observation.status(),
        );

        self.transition(WorkerState::Logging);
        match ctx.label_log.append(&LabelRecord::now(label)).await {
            Ok(()) => {
                self.stats.labels_written += 1;
                ctx.health.set_healthy(components::LABEL_LOG).await;
            }
            Err(e) => {
                self.stats.labels_dropped += 1;
                ctx.metrics.inc_label_log_failures();
                ctx.logger.log_label_dropped(label, &e.to_string());
                ctx.health
                    .set_degraded(components::LABEL_LOG, e.to_string())
                    .await;
            }
        }

        self.transition(WorkerState::Training);
        let target = match ctx.training_target {
            TrainingTarget::Prediction => score,
            TrainingTarget::Latency => observation.latency_ms(),
        };
        match ctx.learner.train(observation.latency_ms(), target).await {
            Ok(_) => ctx.health.set_healthy(components::LEARNER).await,
            Err(LearnerError::Persistence(e)) => {
                ctx.logger.log_persistence_failure(&e.to_string());
                ctx.health
                    .set_degraded(components::LEARNER, e.to_string())
                    .await;
            }
            Err(LearnerError::InvalidSignal(signal)) => return CycleOutcome::Discarded(signal),
            Err(LearnerError::Unavailable) => return CycleOutcome::LearnerStopped,
        }

        CycleOutcome::Completed(label)
    }

    /// Wait out the backoff delay. Returns `false` if shutdown arrived
    /// while waiting.
    async fn handle_error(&mut self, error: TransportError) -> bool {
        self.transition(WorkerState::ErrorHandling);
        self.ctx.metrics.inc_transport_errors();

        let delay = self.backoff.next_delay();
        let failures = self.backoff.consecutive_failures();
        warn!(
            worker_id = self.id,
            error = %error,
            consecutive_failures = failures,
            retry_in_ms = delay.as_millis() as u64,
            "Probe failed"
        );
        self.ctx
            .health
            .set_degraded(
                components::TRANSPORT,
                format!("worker {}: {}", self.id, error),
            )
            .await;

        self.pause(delay).await
    }

    /// Sleep for `delay`. Returns `false` if shutdown arrived first.
    async fn pause(&mut self, delay: Duration) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(delay) => true,
            _ = self.shutdown.recv() => false,
        }
    }

    fn shutdown_requested(&mut self) -> bool {
        !matches!(self.shutdown.try_recv(), Err(TryRecvError::Empty))
    }

    fn transition(&mut self, next: WorkerState) {
        trace!(worker_id = self.id, from = ?self.state, to = ?next, "State change");
        self.state = next;
    }
}

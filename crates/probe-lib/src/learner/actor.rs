//! Single-writer owner of the model
//!
//! All predictions and training go through one task that handles commands
//! in arrival order, so a `Train` is never observed half-applied and no
//! update is lost between concurrent callers.

use super::{Hyperparameters, ModelState, ModelStore};
use crate::error::{InvalidSignal, LearnerError, PersistenceError};
use crate::observability::ProbeMetrics;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Configuration for the learner task
#[derive(Debug, Clone)]
pub struct LearnerConfig {
    pub hyperparameters: Hyperparameters,
    /// Save after this many training samples (1 = after every sample)
    pub persist_every: u64,
    /// Pending commands before callers wait for room
    pub mailbox_size: usize,
}

impl Default for LearnerConfig {
    fn default() -> Self {
        Self {
            hyperparameters: Hyperparameters::default(),
            persist_every: 1,
            mailbox_size: 256,
        }
    }
}

/// Result of a training call that was persisted (or did not need to be)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrainOutcome {
    pub sample_count: u64,
    pub loss: f64,
    pub persisted: bool,
}

enum Command {
    Predict {
        latency_ms: f64,
        reply: oneshot::Sender<f64>,
    },
    Train {
        latency_ms: f64,
        target: f64,
        reply: oneshot::Sender<Result<TrainOutcome, PersistenceError>>,
    },
    SampleCount {
        reply: oneshot::Sender<u64>,
    },
    Shutdown {
        reply: oneshot::Sender<Result<u64, PersistenceError>>,
    },
}

/// Cloneable handle to the learner task
#[derive(Clone)]
pub struct Learner {
    tx: mpsc::Sender<Command>,
}

impl Learner {
    /// Start the learner task owning `state`
    pub fn spawn(
        state: ModelState,
        store: Arc<dyn ModelStore>,
        config: LearnerConfig,
    ) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(config.mailbox_size.max(1));

        let actor = LearnerActor {
            state,
            store,
            config,
            unsaved: 0,
            metrics: ProbeMetrics::new(),
        };
        let handle = tokio::spawn(actor.run(rx));

        (Self { tx }, handle)
    }

    /// Current model output for `latency_ms`
    pub async fn predict(&self, latency_ms: f64) -> Result<f64, LearnerError> {
        let latency_ms = InvalidSignal::check(latency_ms)?;
        let (reply, rx) = oneshot::channel();
        self.send(Command::Predict { latency_ms, reply }).await?;
        rx.await.map_err(|_| LearnerError::Unavailable)
    }

    /// Apply one training sample. On `LearnerError::Persistence` the update
    /// is still live in memory.
    pub async fn train(&self, latency_ms: f64, target: f64) -> Result<TrainOutcome, LearnerError> {
        let latency_ms = InvalidSignal::check(latency_ms)?;
        let target = InvalidSignal::check(target)?;
        let (reply, rx) = oneshot::channel();
        self.send(Command::Train {
            latency_ms,
            target,
            reply,
        })
        .await?;

        let outcome = rx.await.map_err(|_| LearnerError::Unavailable)??;
        Ok(outcome)
    }

    pub async fn sample_count(&self) -> Result<u64, LearnerError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::SampleCount { reply }).await?;
        rx.await.map_err(|_| LearnerError::Unavailable)
    }

    /// Save any unsaved samples and stop the task. Returns the final sample
    /// count. Commands queued before this one are still processed.
    pub async fn shutdown(&self) -> Result<u64, LearnerError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Shutdown { reply }).await?;
        let count = rx.await.map_err(|_| LearnerError::Unavailable)??;
        Ok(count)
    }

    async fn send(&self, command: Command) -> Result<(), LearnerError> {
        self.tx
            .send(command)
            .await
            .map_err(|_| LearnerError::Unavailable)
    }
}

struct LearnerActor {
    state: ModelState,
    store: Arc<dyn ModelStore>,
    config: LearnerConfig,
    unsaved: u64,
    metrics: ProbeMetrics,
}

impl LearnerActor {
    async fn run(mut self, mut rx: mpsc::Receiver<Command>) {
        info!(
            sample_count = self.state.sample_count(),
            persist_every = self.config.persist_every,
            "Learner started"
        );
        self.metrics.set_model_samples(self.state.sample_count());

        while let Some(command) = rx.recv().await {
            let start = Instant::now();

            match command {
                Command::Predict { latency_ms, reply } => {
                    let _ = reply.send(self.state.predict(latency_ms));
                }
                Command::Train {
                    latency_ms,
                    target,
                    reply,
                } => {
                    let result = self.train(latency_ms, target).await;
                    let _ = reply.send(result);
                }
                Command::SampleCount { reply } => {
                    let _ = reply.send(self.state.sample_count());
                }
                Command::Shutdown { reply } => {
                    let result = self.flush().await.map(|_| self.state.sample_count());
                    let _ = reply.send(result);
                    info!(
                        sample_count = self.state.sample_count(),
                        "Learner stopped"
                    );
                    return;
                }
            }

            self.metrics
                .observe_learner_latency(start.elapsed().as_secs_f64());
        }

        // Every handle dropped without an explicit shutdown
        if let Err(e) = self.flush().await {
            warn!(error = %e, "Failed to save model after learner handles were dropped");
        }
    }

    async fn train(&mut self, latency_ms: f64, target: f64) -> Result<TrainOutcome, PersistenceError> {
        let loss = self
            .state
            .train(latency_ms, target, &self.config.hyperparameters);
        self.unsaved += 1;

        let sample_count = self.state.sample_count();
        self.metrics.set_model_samples(sample_count);

        debug!(
            latency_ms = latency_ms,
            target = target,
            loss = loss,
            sample_count = sample_count,
            "Model trained"
        );

        let persisted = if self.unsaved >= self.config.persist_every.max(1) {
            self.persist().await?;
            true
        } else {
            false
        };

        Ok(TrainOutcome {
            sample_count,
            loss,
            persisted,
        })
    }

    async fn flush(&mut self) -> Result<(), PersistenceError> {
        if self.unsaved == 0 {
            return Ok(());
        }
        self.persist().await
    }

    /// Save a snapshot off the async runtime. The next command is not taken
    /// until the write has finished.
    async fn persist(&mut self) -> Result<(), PersistenceError> {
        let store = Arc::clone(&self.store);
        let snapshot = self.state.clone();

        let result = tokio::task::spawn_blocking(move || store.save(&snapshot))
            .await
            .map_err(|e| PersistenceError::Task(e.to_string()))
            .and_then(|saved| saved);

        match result {
            Ok(()) => {
                self.unsaved = 0;
                Ok(())
            }
            Err(e) => {
                self.metrics.inc_persistence_failures();
                warn!(
                    error = %e,
                    unsaved = self.unsaved,
                    "Failed to persist model, keeping in-memory state"
                );
                Err(e)
            }
        }
    }
}

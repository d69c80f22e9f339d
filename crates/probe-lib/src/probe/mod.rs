//! Probe workers and the pool that runs them
//!
//! Each worker repeatedly opens a session through the transport, times one
//! request, asks the learner for a score, classifies it, records the label
//! and trains the model on the sample. Transport failures move the worker
//! into an error-handling state with exponential backoff.

mod backoff;
mod pool;
mod worker;


pub use backoff::{Backoff, BackoffConfig};
pub use pool::{PoolConfig, PoolReport, ProbePool, ProbePoolBuilder};
pub use worker::{CycleOutcome, Worker, WorkerState, WorkerStats};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Value the model is trained toward after each observation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrainingTarget {
    /// The model's own prediction for the sample
    #[default]
    Prediction,
    /// The observed latency in milliseconds
    Latency,
}

impl FromStr for TrainingTarget {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "prediction" => Ok(TrainingTarget::Prediction),
            "latency" => Ok(TrainingTarget::Latency),
            other => Err(format!(
                "unknown training target {:?}, expected \"prediction\" or \"latency\"",
                other
            )),
        }
    }
}

impl fmt::Display for TrainingTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrainingTarget::Prediction => f.write_str("prediction"),
            TrainingTarget::Latency => f.write_str("latency"),
        }
    }
}

//! Error types shared across the probe pipeline

use std::io;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// A latency or score that cannot be classified or trained on
#[derive(Debug, Clone, Copy, PartialEq, Error)]
#[error("Invalid signal value: {value}")]
pub struct InvalidSignal {
    pub value: f64,
}

impl InvalidSignal {
    /// Accept only finite, non-negative values
    pub fn check(value: f64) -> Result<f64, InvalidSignal> {
        if value.is_finite() && value >= 0.0 {
            Ok(value)
        } else {
            Err(InvalidSignal { value })
        }
    }
}

/// Failures of the anonymizing transport. All of these are transient.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Failed to reach proxy {addr}: {source}")]
    ProxyUnreachable {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("Proxy handshake failed: {0}")]
    ProxyHandshake(String),

    #[error("Proxy refused connection: {reason} (code {code})")]
    ProxyRejected { code: u8, reason: &'static str },

    #[error("TLS negotiation failed: {0}")]
    Tls(String),

    #[error("{stage} timed out after {after:?}")]
    Timeout { stage: &'static str, after: Duration },

    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    #[error("Session already closed")]
    SessionClosed,

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Durable save or load of the model failed
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("Failed to read model file {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to write model file {path:?}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Model file {path:?} is corrupt: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    #[error("Model serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Persistence task failed: {0}")]
    Task(String),
}

/// Appending to the label log failed
#[derive(Debug, Error)]
pub enum LabelLogError {
    #[error("Failed to open label log {path:?}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to append label: {0}")]
    Append(#[from] io::Error),

    #[error("Failed to encode label record: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Errors returned by the learner handle
#[derive(Debug, Error)]
pub enum LearnerError {
    #[error(transparent)]
    InvalidSignal(#[from] InvalidSignal),

    /// The update was applied in memory but could not be saved
    #[error("Model updated in memory but not persisted: {0}")]
    Persistence(#[from] PersistenceError),

    #[error("Learner is no longer running")]
    Unavailable,
}

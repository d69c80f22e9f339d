//! Library for latency probing and online rate-limit classification
//!
//! This crate provides the core functionality for:
//! - Timed probes through a SOCKS5 proxy (Tor by default)
//! - An online-trained latency regression model behind a single-writer learner
//! - Threshold classification and an append-only label log
//! - A worker pool with backoff and cooperative shutdown
//! - Health checks and observability

pub mod classifier;
pub mod error;
pub mod health;
pub mod label_log;
pub mod learner;
pub mod models;
pub mod observability;
pub mod probe;
pub mod transport;

pub use classifier::{classify, Classifier, DEFAULT_THRESHOLD};
pub use error::{InvalidSignal, LabelLogError, LearnerError, PersistenceError, TransportError};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use label_log::{FileLabelLog, LabelSink};
pub use learner::{FileModelStore, Learner, LearnerConfig, ModelState, ModelStore};
pub use models::*;
pub use observability::{ProbeLogger, ProbeMetrics};
pub use probe::{PoolConfig, PoolReport, ProbePool, TrainingTarget};
pub use transport::{ProxyTransport, Session, Transport, TransportConfig};

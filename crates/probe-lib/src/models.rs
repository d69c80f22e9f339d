//! Core data models for the latency probe

use crate::error::InvalidSignal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// One latency measurement taken from a completed probe
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    latency_ms: f64,
    observed_at: DateTime<Utc>,
    status: Option<u16>,
}

impl Observation {
    /// Create an observation, rejecting latencies the model cannot consume
    pub fn new(latency_ms: f64, observed_at: DateTime<Utc>) -> Result<Self, InvalidSignal> {
        InvalidSignal::check(latency_ms)?;
        Ok(Self {
            latency_ms,
            observed_at,
            status: None,
        })
    }

    /// Build an observation from a probe's measured round trip
    pub fn from_response(response: &ProbeResponse) -> Result<Self, InvalidSignal> {
        let latency_ms = response.elapsed.as_secs_f64() * 1000.0;
        let mut observation = Self::new(latency_ms, Utc::now())?;
        observation.status = Some(response.status);
        Ok(observation)
    }

    pub fn latency_ms(&self) -> f64 {
        self.latency_ms
    }

    pub fn observed_at(&self) -> DateTime<Utc> {
        self.observed_at
    }

    /// HTTP status of the probe response, if the observation came from one
    pub fn status(&self) -> Option<u16> {
        self.status
    }
}

/// Traffic regime derived from a predicted score
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Label {
    RateLimited,
    Normal,
}

impl Label {
    pub fn as_str(&self) -> &'static str {
        match self {
            Label::RateLimited => "rate_limited",
            Label::Normal => "normal",
        }
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classification decision as written to the label log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelRecord {
    pub label: Label,
    pub recorded_at: DateTime<Utc>,
}

impl LabelRecord {
    pub fn now(label: Label) -> Self {
        Self {
            label,
            recorded_at: Utc::now(),
        }
    }
}

/// Endpoint every worker in a pool probes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeTarget {
    pub host: String,
    pub port: u16,
    /// Wrap the tunnelled connection in TLS
    pub tls: bool,
}

impl ProbeTarget {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            tls: true,
        }
    }

    pub fn with_tls(mut self, tls: bool) -> Self {
        self.tls = tls;
        self
    }
}

impl fmt::Display for ProbeTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let scheme = if self.tls { "https" } else { "http" };
        write!(f, "{}://{}:{}", scheme, self.host, self.port)
    }
}

/// Request issued on an open session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeRequest {
    pub path: String,
    pub host_header: String,
    pub user_agent: String,
}

impl ProbeRequest {
    pub fn for_target(target: &ProbeTarget, path: impl Into<String>) -> Self {
        let default_port = if target.tls { 443 } else { 80 };
        let host_header = if target.port == default_port {
            target.host.clone()
        } else {
            format!("{}:{}", target.host, target.port)
        };
        let mut path = path.into();
        if !path.starts_with('/') {
            path.insert(0, '/');
        }

        Self {
            path,
            host_header,
            user_agent: format!("probe-agent/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// Outcome of one timed request/response round trip
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeResponse {
    pub status: u16,
    pub elapsed: Duration,
}

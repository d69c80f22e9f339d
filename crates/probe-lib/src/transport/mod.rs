//! Anonymizing transport
//!
//! Sessions are opened through a SOCKS5 proxy (Tor by default), optionally
//! wrapped in TLS, and used to time a single HTTP request.

mod http;
mod proxy;
mod socks;
mod tls;

pub use proxy::{ProxySession, ProxyTransport, ProxyTransportBuilder};

use crate::error::TransportError;
use crate::models::{ProbeRequest, ProbeResponse, ProbeTarget};
use async_trait::async_trait;
use std::time::Duration;

/// Default local Tor SOCKS port, with proxy-side name resolution
pub const DEFAULT_PROXY_URL: &str = "socks5h://127.0.0.1:9050";

/// Opens sessions to a probe target
#[async_trait]
pub trait Transport: Send + Sync {
    async fn connect(&self, target: &ProbeTarget) -> Result<Box<dyn Session>, TransportError>;
}

/// An open connection to the target.
///
/// Owned by exactly one worker. `close` releases the underlying connection
/// and may be called more than once.
#[async_trait]
pub trait Session: Send {
    /// Send `request` and time the round trip until the status line arrives
    async fn probe(&mut self, request: &ProbeRequest) -> Result<ProbeResponse, TransportError>;

    async fn close(&mut self);
}

/// Transport settings
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// SOCKS5 proxy URL; `None` connects directly
    pub proxy_url: Option<String>,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    /// Upper bound on the status line size
    pub max_status_line: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            proxy_url: Some(DEFAULT_PROXY_URL.to_string()),
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(10),
            max_status_line: 8192,
        }
    }
}

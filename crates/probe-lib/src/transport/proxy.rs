//! SOCKS5-tunnelled transport

use super::socks::{self, TargetAddr};
use super::{http, tls, Session, Transport, TransportConfig};
use crate::error::TransportError;
use crate::models::{ProbeRequest, ProbeResponse, ProbeTarget};
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::fmt;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{lookup_host, TcpStream};
use tokio::time::{timeout, Instant};
use tokio_rustls::TlsConnector;
use tracing::debug;

/// Byte stream a session runs over: plain TCP or TLS on top of it
trait ProbeIo: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> ProbeIo for T {}

/// Parsed proxy endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
struct ProxyAddr {
    host: String,
    port: u16,
    /// `socks5h`: the proxy resolves target names
    remote_dns: bool,
}

impl ProxyAddr {
    fn parse(raw: &str) -> Result<Self> {
        let url = url::Url::parse(raw).with_context(|| format!("Invalid proxy URL: {}", raw))?;

        let remote_dns = match url.scheme() {
            "socks5h" => true,
            "socks5" => false,
            other => anyhow::bail!("Unsupported proxy scheme {:?}, expected socks5 or socks5h", other),
        };
        let host = url
            .host_str()
            .ok_or_else(|| anyhow::anyhow!("Proxy URL has no host: {}", raw))?
            .trim_start_matches('[')
            .trim_end_matches(']')
            .to_string();

        Ok(Self {
            host,
            port: url.port().unwrap_or(1080),
            remote_dns,
        })
    }

    async fn target_addr(&self, target: &ProbeTarget) -> Result<TargetAddr, TransportError> {
        let addr = TargetAddr::from_host(&target.host, target.port);
        if self.remote_dns || matches!(addr, TargetAddr::Ip(_)) {
            return Ok(addr);
        }

        let resolved = lookup_host((target.host.as_str(), target.port))
            .await?
            .next()
            .ok_or_else(|| {
                TransportError::ProxyHandshake(format!("could not resolve {}", target.host))
            })?;
        Ok(TargetAddr::Ip(resolved))
    }
}

impl fmt::Display for ProxyAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let scheme = if self.remote_dns { "socks5h" } else { "socks5" };
        write!(f, "{}://{}:{}", scheme, self.host, self.port)
    }
}

/// Transport that reaches the target through a SOCKS5 proxy, or directly
/// when no proxy is configured
pub struct ProxyTransport {
    proxy: Option<ProxyAddr>,
    config: TransportConfig,
    tls: TlsConnector,
}

impl ProxyTransport {
    pub fn new(config: TransportConfig) -> Result<Self> {
        let proxy = config
            .proxy_url
            .as_deref()
            .map(ProxyAddr::parse)
            .transpose()?;

        Ok(Self {
            proxy,
            config,
            tls: tls::connector(),
        })
    }

    pub fn builder() -> ProxyTransportBuilder {
        ProxyTransportBuilder::new()
    }

    /// Where sessions are routed, for logging
    pub fn route(&self) -> String {
        match &self.proxy {
            Some(proxy) => proxy.to_string(),
            None => "direct".to_string(),
        }
    }

    async fn open(&self, target: &ProbeTarget) -> Result<Box<dyn Session>, TransportError> {
        let tcp = match &self.proxy {
            Some(proxy) => {
                let mut stream = TcpStream::connect((proxy.host.as_str(), proxy.port))
                    .await
                    .map_err(|source| TransportError::ProxyUnreachable {
                        addr: proxy.to_string(),
                        source,
                    })?;
                let addr = proxy.target_addr(target).await?;
                socks::connect(&mut stream, &addr).await?;
                stream
            }
            None => TcpStream::connect((target.host.as_str(), target.port)).await?,
        };
        tcp.set_nodelay(true)?;

        let stream: Box<dyn ProbeIo> = if target.tls {
            let name = tls::server_name(&target.host)?;
            let tls_stream = self
                .tls
                .connect(name, tcp)
                .await
                .map_err(|e| TransportError::Tls(e.to_string()))?;
            Box::new(tls_stream)
        } else {
            Box::new(tcp)
        };

        debug!(probe_target = %target, route = %self.route(), "Session opened");

        Ok(Box::new(ProxySession::new(
            stream,
            self.config.request_timeout,
            self.config.max_status_line,
        )))
    }
}

#[async_trait]
impl Transport for ProxyTransport {
    async fn connect(&self, target: &ProbeTarget) -> Result<Box<dyn Session>, TransportError> {
        let after = self.config.connect_timeout;
        timeout(after, self.open(target))
            .await
            .map_err(|_| TransportError::Timeout {
                stage: "connect",
                after,
            })?
    }
}

/// One open connection owned by a worker
pub struct ProxySession {
    stream: Option<BufReader<Box<dyn ProbeIo>>>,
    request_timeout: Duration,
    max_status_line: usize,
}

impl ProxySession {
    fn new(stream: Box<dyn ProbeIo>, request_timeout: Duration, max_status_line: usize) -> Self {
        Self {
            stream: Some(BufReader::new(stream)),
            request_timeout,
            max_status_line,
        }
    }
}

#[async_trait]
impl Session for ProxySession {
    async fn probe(&mut self, request: &ProbeRequest) -> Result<ProbeResponse, TransportError> {
        let stream = self.stream.as_mut().ok_or(TransportError::SessionClosed)?;
        let limit = self.max_status_line;
        let after = self.request_timeout;
        let raw = http::render_request(request);

        let start = Instant::now();
        let status = timeout(after, async {
            stream.write_all(raw.as_bytes()).await?;
            stream.flush().await?;
            let status = http::read_status(stream, limit).await?;
            Ok::<_, TransportError>(status)
        })
        .await
        .map_err(|_| TransportError::Timeout {
            stage: "probe",
            after,
        })??;

        Ok(ProbeResponse {
            status,
            elapsed: start.elapsed(),
        })
    }

    async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            if let Err(e) = stream.shutdown().await {
                debug!(error = %e, "Session shutdown was not clean");
            }
        }
    }
}

/// Builder for [`ProxyTransport`]
pub struct ProxyTransportBuilder {
    config: TransportConfig,
}

impl ProxyTransportBuilder {
    pub fn new() -> Self {
        Self {
            config: TransportConfig::default(),
        }
    }

    /// Route sessions through the SOCKS5 proxy at `url`
    pub fn proxy(mut self, url: impl Into<String>) -> Self {
        self.config.proxy_url = Some(url.into());
        self
    }

    /// Connect straight to the target without a proxy
    pub fn direct(mut self) -> Self {
        self.config.proxy_url = None;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    pub fn build(self) -> Result<ProxyTransport> {
        ProxyTransport::new(self.config)
    }
}

impl Default for ProxyTransportBuilder {
    fn default() -> Self {
        Self::new()
    }
}

//! Agent configuration

use crate::cli::Cli;
use anyhow::{Context, Result};
use probe_lib::learner::Hyperparameters;
use probe_lib::probe::{BackoffConfig, PoolConfig, TrainingTarget};
use probe_lib::transport::{TransportConfig, DEFAULT_PROXY_URL};
use probe_lib::LearnerConfig;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Agent configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    /// Number of concurrent probe workers
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,

    /// Classification threshold on the model's score
    #[serde(default = "default_threshold")]
    pub threshold: f64,

    #[serde(default = "default_backoff_min_ms")]
    pub backoff_min_ms: u64,

    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,

    /// SOCKS5 proxy, ignored when `direct` is set
    #[serde(default = "default_proxy_url")]
    pub proxy_url: String,

    #[serde(default)]
    pub direct: bool,

    #[serde(default = "default_tls")]
    pub tls: bool,

    #[serde(default = "default_probe_path")]
    pub probe_path: String,

    #[serde(default = "default_timeout_secs")]
    pub connect_timeout_secs: u64,

    #[serde(default = "default_timeout_secs")]
    pub request_timeout_secs: u64,

    #[serde(default = "default_model_path")]
    pub model_path: PathBuf,

    #[serde(default = "default_label_log_path")]
    pub label_log_path: PathBuf,

    /// Save the model after this many training samples
    #[serde(default = "default_persist_every")]
    pub persist_every: u64,

    #[serde(default = "default_learning_rate")]
    pub learning_rate: f64,

    #[serde(default = "default_epochs_per_sample")]
    pub epochs_per_sample: u32,

    #[serde(default)]
    pub training_target: TrainingTarget,

    /// Seed for initializing a fresh model
    #[serde(default = "default_seed")]
    pub seed: u64,

    /// API server port for health/metrics (0 disables)
    #[serde(default = "default_api_port")]
    pub api_port: u16,
}

fn default_worker_count() -> usize {
    8
}

fn default_threshold() -> f64 {
    probe_lib::DEFAULT_THRESHOLD
}

fn default_backoff_min_ms() -> u64 {
    500
}

fn default_backoff_max_ms() -> u64 {
    30_000
}

fn default_proxy_url() -> String {
    DEFAULT_PROXY_URL.to_string()
}

fn default_tls() -> bool {
    true
}

fn default_probe_path() -> String {
    "/".to_string()
}

fn default_timeout_secs() -> u64 {
    10
}

fn default_model_path() -> PathBuf {
    PathBuf::from("model.json")
}

fn default_label_log_path() -> PathBuf {
    PathBuf::from("labels.jsonl")
}

fn default_persist_every() -> u64 {
    1
}

fn default_learning_rate() -> f64 {
    0.001
}

fn default_epochs_per_sample() -> u32 {
    10
}

fn default_seed() -> u64 {
    42
}

fn default_api_port() -> u16 {
    9464
}

impl AgentConfig {
    /// Load configuration from an optional file and `PROBE_*` environment
    /// variables, the latter taking precedence. Values are not validated
    /// until command-line overrides are applied.
    pub fn load(file: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = file {
            builder = builder.add_source(config::File::from(path).required(true));
        }

        let config = builder
            .add_source(config::Environment::with_prefix("PROBE").try_parsing(true))
            .build()
            .context("Failed to read configuration")?;

        config
            .try_deserialize()
            .context("Invalid configuration")
    }

    /// Load, let command-line flags override, then validate the result
    pub fn from_cli(cli: &Cli) -> Result<Self> {
        let mut config = Self::load(cli.config.as_deref())?;
        config.apply_cli(cli);
        config.validate()?;
        Ok(config)
    }

    fn apply_cli(&mut self, cli: &Cli) {
        if let Some(workers) = cli.workers {
            self.worker_count = workers;
        }
        if let Some(threshold) = cli.threshold {
            self.threshold = threshold;
        }
        if let Some(proxy) = &cli.proxy {
            self.proxy_url = proxy.clone();
            self.direct = false;
        }
        if cli.direct {
            self.direct = true;
        }
        if cli.no_tls {
            self.tls = false;
        }
        if let Some(path) = &cli.path {
            self.probe_path = path.clone();
        }
        if let Some(path) = &cli.model_path {
            self.model_path = path.clone();
        }
        if let Some(path) = &cli.label_log {
            self.label_log_path = path.clone();
        }
        if let Some(port) = cli.api_port {
            self.api_port = port;
        }
    }

    fn validate(&self) -> Result<()> {
        if self.worker_count == 0 {
            anyhow::bail!("worker_count must be at least 1");
        }
        if !self.threshold.is_finite() || self.threshold < 0.0 {
            anyhow::bail!("threshold must be finite and non-negative");
        }
        if self.backoff_min_ms == 0 || self.backoff_min_ms > self.backoff_max_ms {
            anyhow::bail!(
                "backoff_min_ms ({}) must be positive and not above backoff_max_ms ({})",
                self.backoff_min_ms,
                self.backoff_max_ms
            );
        }
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            anyhow::bail!("learning_rate must be positive");
        }
        if self.connect_timeout_secs == 0 || self.request_timeout_secs == 0 {
            anyhow::bail!("connect_timeout_secs and request_timeout_secs must be at least 1");
        }
        if self.epochs_per_sample == 0 {
            anyhow::bail!("epochs_per_sample must be at least 1");
        }
        Ok(())
    }

    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            worker_count: self.worker_count,
            threshold: self.threshold,
            backoff: BackoffConfig {
                min: Duration::from_millis(self.backoff_min_ms),
                max: Duration::from_millis(self.backoff_max_ms),
            },
            probe_path: self.probe_path.clone(),
            training_target: self.training_target,
        }
    }

    pub fn transport_config(&self) -> TransportConfig {
        TransportConfig {
            proxy_url: (!self.direct).then(|| self.proxy_url.clone()),
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            request_timeout: Duration::from_secs(self.request_timeout_secs),
            ..TransportConfig::default()
        }
    }

    pub fn learner_config(&self) -> LearnerConfig {
        LearnerConfig {
            hyperparameters: Hyperparameters {
                learning_rate: self.learning_rate,
                epochs_per_sample: self.epochs_per_sample,
                ..Hyperparameters::default()
            },
            persist_every: self.persist_every.max(1),
            ..LearnerConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn cli(args: &[&str]) -> Cli {
        let mut full = vec!["probe-agent", "example.org", "443"];
        full.extend_from_slice(args);
        Cli::try_parse_from(full).unwrap()
    }

    fn config_file(contents: &str) -> NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_defaults_from_empty_file() {
        let file = config_file("");
        let config = AgentConfig::load(Some(file.path())).unwrap();

        assert_eq!(config.worker_count, 8);
        assert_eq!(config.threshold, 2000.0);
        assert_eq!(config.backoff_min_ms, 500);
        assert_eq!(config.backoff_max_ms, 30_000);
        assert_eq!(config.proxy_url, "socks5h://127.0.0.1:9050");
        assert!(config.tls);
        assert!(!config.direct);
        assert_eq!(config.persist_every, 1);
        assert_eq!(config.training_target, TrainingTarget::Prediction);
        assert_eq!(config.api_port, 9464);
    }

    #[test]
    fn test_file_values() {
        let file = config_file(
            r#"
worker_count = 3
threshold = 150.5
training_target = "latency"
model_path = "/var/lib/probe/model.json"
"#,
        );
        let config = AgentConfig::load(Some(file.path())).unwrap();

        assert_eq!(config.worker_count, 3);
        assert_eq!(config.threshold, 150.5);
        assert_eq!(config.training_target, TrainingTarget::Latency);
        assert_eq!(config.model_path, PathBuf::from("/var/lib/probe/model.json"));
    }

    fn from_file(contents: &str, args: &[&str]) -> Result<AgentConfig> {
        let file = config_file(contents);
        let path = file.path().to_string_lossy().into_owned();
        let mut full = vec!["--config", path.as_str()];
        full.extend_from_slice(args);
        AgentConfig::from_cli(&cli(&full))
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(from_file("worker_count = 0\n", &[]).is_err());
        assert!(from_file("backoff_min_ms = 5000\nbackoff_max_ms = 100\n", &[]).is_err());
    }

    #[test]
    fn test_zero_timeouts_rejected() {
        assert!(from_file("connect_timeout_secs = 0\n", &[]).is_err());
        assert!(from_file("request_timeout_secs = 0\n", &[]).is_err());
        assert!(from_file("connect_timeout_secs = 3\nrequest_timeout_secs = 5\n", &[]).is_ok());
    }

    #[test]
    fn test_cli_flag_replaces_invalid_file_value() {
        let config = from_file("worker_count = 0\n", &["--workers", "4"]).unwrap();
        assert_eq!(config.worker_count, 4);

        let config = from_file("threshold = -1.0\n", &["--threshold", "1500"]).unwrap();
        assert_eq!(config.threshold, 1500.0);
    }

    #[test]
    fn test_missing_file_is_an_error() {
        assert!(AgentConfig::load(Some(Path::new("/nonexistent/probe.toml"))).is_err());
    }

    #[test]
    fn test_cli_overrides() {
        let file = config_file("worker_count = 3\nproxy_url = \"socks5h://10.0.0.1:9050\"\n");
        let mut config = AgentConfig::load(Some(file.path())).unwrap();
        config.apply_cli(&cli(&["--workers", "12", "--direct", "--no-tls", "--threshold", "900"]));

        assert_eq!(config.worker_count, 12);
        assert_eq!(config.threshold, 900.0);
        assert!(config.direct);
        assert!(!config.tls);
        assert!(config.transport_config().proxy_url.is_none());
    }

    #[test]
    fn test_derived_configs() {
        let file = config_file("backoff_min_ms = 250\nrequest_timeout_secs = 4\npersist_every = 0\n");
        let config = AgentConfig::load(Some(file.path())).unwrap();

        let pool = config.pool_config();
        assert_eq!(pool.backoff.min, Duration::from_millis(250));
        assert_eq!(pool.worker_count, 8);

        let transport = config.transport_config();
        assert_eq!(transport.proxy_url.as_deref(), Some(DEFAULT_PROXY_URL));
        assert_eq!(transport.request_timeout, Duration::from_secs(4));

        assert_eq!(config.learner_config().persist_every, 1);
        assert_eq!(config.learner_config().hyperparameters.epochs_per_sample, 10);
    }
}

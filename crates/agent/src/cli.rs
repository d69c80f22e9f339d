//! Command-line arguments

use clap::Parser;
use std::path::PathBuf;

/// Probe a service through a SOCKS5 proxy and classify rate limiting from
/// request latency
#[derive(Debug, Parser)]
#[command(name = "probe-agent")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Target host name or address
    pub target_host: String,

    /// Target port
    pub target_port: u16,

    /// Optional configuration file (TOML, YAML or JSON)
    #[arg(long, short, env = "PROBE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Number of concurrent probe workers
    #[arg(long, short)]
    pub workers: Option<usize>,

    /// Scores above this value are labelled rate limited
    #[arg(long)]
    pub threshold: Option<f64>,

    /// SOCKS5 proxy URL, e.g. socks5h://127.0.0.1:9050
    #[arg(long, conflicts_with = "direct")]
    pub proxy: Option<String>,

    /// Connect to the target without a proxy
    #[arg(long)]
    pub direct: bool,

    /// Probe over plain HTTP instead of HTTPS
    #[arg(long)]
    pub no_tls: bool,

    /// Request path to probe
    #[arg(long)]
    pub path: Option<String>,

    /// Where the model is stored
    #[arg(long)]
    pub model_path: Option<PathBuf>,

    /// Where classification labels are appended
    #[arg(long)]
    pub label_log: Option<PathBuf>,

    /// Port for health and metrics endpoints (0 disables)
    #[arg(long)]
    pub api_port: Option<u16>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_positional_target() {
        let cli = Cli::try_parse_from(["probe-agent", "example.org", "443"]).unwrap();
        assert_eq!(cli.target_host, "example.org");
        assert_eq!(cli.target_port, 443);
        assert!(cli.workers.is_none());
        assert!(!cli.direct);
    }

    #[test]
    fn test_missing_port_is_rejected() {
        assert!(Cli::try_parse_from(["probe-agent", "example.org"]).is_err());
        assert!(Cli::try_parse_from(["probe-agent", "example.org", "http"]).is_err());
    }

    #[test]
    fn test_proxy_conflicts_with_direct() {
        let result = Cli::try_parse_from([
            "probe-agent",
            "example.org",
            "443",
            "--direct",
            "--proxy",
            "socks5h://127.0.0.1:9150",
        ]);
        assert!(result.is_err());
    }
}

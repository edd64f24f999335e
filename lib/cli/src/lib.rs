use clap::Parser;
use common::AgentConfig;
use getset::{CopyGetters, Getters};
use std::path::PathBuf;

/// telemetryd: collects host CPU and memory samples and forwards them to a
/// remote endpoint.
#[derive(Debug, Parser, Getters, CopyGetters)]
#[command(name = "telemetryd")]
#[command(about = "telemetryd: host telemetry collector and forwarder", long_about = None)]
pub struct Cli {
    /// Remote server receiving sample batches. Empty means samples are kept
    /// locally
    #[arg(short, long)]
    #[getset(get = "pub")]
    endpoint: Option<String>,
    /// Path to the local sample database [default: ./telemetry.db]
    #[arg(short, long)]
    #[getset(get = "pub")]
    db_path: Option<PathBuf>,
    /// Milliseconds between collector ticks [default: 1000]
    #[arg(long)]
    #[getset(get_copy = "pub")]
    collect_interval_ms: Option<u64>,
    /// Milliseconds between forwarder ticks [default: 10000]
    #[arg(long)]
    #[getset(get_copy = "pub")]
    forward_interval_ms: Option<u64>,
    /// Per-request delivery timeout in milliseconds [default: 10000]
    #[arg(long)]
    #[getset(get_copy = "pub")]
    request_timeout_ms: Option<u64>,
    /// Optional TOML configuration file
    #[arg(short, long)]
    #[getset(get = "pub")]
    config: Option<PathBuf>,
    /// Emit logs as JSON lines
    #[arg(long)]
    #[getset(get_copy = "pub")]
    log_json: bool,
}

impl Cli {
    /// Apply every flag that was given on the command line on top of `config`.
    /// Flags win over both the configuration file and the environment.
    pub fn apply_overrides(&self, config: &mut AgentConfig) {
        if let Some(endpoint) = &self.endpoint {
            config.set_endpoint(Some(endpoint.clone()));
        }
        if let Some(db_path) = &self.db_path {
            config.set_db_path(db_path.clone());
        }
        if let Some(ms) = self.collect_interval_ms {
            config.set_collect_interval_ms(ms);
        }
        if let Some(ms) = self.forward_interval_ms {
            config.set_forward_interval_ms(ms);
        }
        if let Some(ms) = self.request_timeout_ms {
            config.set_request_timeout_ms(ms);
        }
    }
}

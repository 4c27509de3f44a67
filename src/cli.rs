//! CLI argument definitions using clap

use clap::{Parser, Subcommand, ValueEnum};
use std::time::Duration;

use crate::config::{HealthPolicy, LinkConfig, DEFAULT_HANDSHAKE_ID};

#[derive(Parser)]
#[command(name = "ocp-link")]
#[command(author, version, about = "Serial bridge for the OCP control panel", long_about = None)]
pub struct Cli {
    /// Serial port device (e.g., /dev/ttyACM0). Skips auto-discovery.
    #[arg(short, long, global = true)]
    pub port: Option<String>,

    /// Baud rate
    #[arg(short, long, default_value = "115200", global = true)]
    pub baud: u32,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Identifier the device prints at the start of its lines
    #[arg(long, default_value = DEFAULT_HANDSHAKE_ID, global = true)]
    pub handshake_id: String,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List candidate serial ports
    Ports,

    /// Connect to the panel and stream settings until Ctrl+C
    Run(RunArgs),

    /// Decode a single message offline and print it as JSON
    Decode {
        /// Treat the input as a hex-encoded binary frame
        #[arg(long)]
        hex: bool,

        /// Text line, or hex frame with --hex
        input: String,
    },

    /// Find the panel, handshake once, and print its identity
    Probe,
}

#[derive(clap::Args, Debug, Clone)]
pub struct RunArgs {
    /// Health policy that triggers a reconnect
    #[arg(long, value_enum, default_value = "heartbeat")]
    pub policy: PolicyKind,

    /// Seconds without a decoded message before reconnecting
    #[arg(
        long,
        default_value_t = HealthPolicy::DEFAULT_HEARTBEAT_TIMEOUT.as_secs(),
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub heartbeat_timeout: u64,

    /// Consecutive empty reads before reconnecting
    #[arg(
        long,
        default_value_t = HealthPolicy::DEFAULT_FAILURE_THRESHOLD,
        value_parser = clap::value_parser!(u32).range(1..)
    )]
    pub failure_threshold: u32,

    /// Wait after opening a port while the device reboots (ms)
    #[arg(long, default_value = "2000")]
    pub reset_delay_ms: u64,

    /// Wait after losing the link before the first reconnect (ms)
    #[arg(long, default_value = "1000")]
    pub reconnect_delay_ms: u64,

    /// Wait between failed reconnect attempts (ms)
    #[arg(long, default_value = "5000")]
    pub retry_delay_ms: u64,

    /// Where decoded settings go
    #[arg(long, value_enum, default_value = "log")]
    pub output: OutputKind,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum PolicyKind {
    /// Reconnect when no message decodes for a while
    Heartbeat,
    /// Reconnect after N consecutive empty reads
    Failures,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum OutputKind {
    /// One log line per setting
    Log,
    /// One JSON object per message on stdout
    Json,
}

impl RunArgs {
    pub fn health_policy(&self) -> HealthPolicy {
        match self.policy {
            PolicyKind::Heartbeat => HealthPolicy::Heartbeat {
                timeout: Duration::from_secs(self.heartbeat_timeout),
            },
            PolicyKind::Failures => HealthPolicy::FailureCount {
                threshold: self.failure_threshold,
            },
        }
    }
}

impl Cli {
    /// Collapse the global options (and `run` options, if any) into a
    /// link configuration.
    pub fn link_config(&self, run: Option<&RunArgs>) -> LinkConfig {
        let mut config = LinkConfig {
            port: self.port.clone(),
            baud_rate: self.baud,
            handshake_id: self.handshake_id.clone(),
            ..LinkConfig::default()
        };

        if let Some(run) = run {
            config.health = run.health_policy();
            config.reset_delay = Duration::from_millis(run.reset_delay_ms);
            config.reconnect_delay = Duration::from_millis(run.reconnect_delay_ms);
            config.retry_delay = Duration::from_millis(run.retry_delay_ms);
        }
        config
    }
}

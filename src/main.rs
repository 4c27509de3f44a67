//! ocp-link - Host-side bridge for the OCP control panel.
//!
//! Finds the panel on a serial port by its identity handshake, decodes the
//! messages it sends into settings, and keeps the link alive across
//! unplugs and firmware resets.

mod bridge;
mod cli;
mod commands;
mod config;
mod decoder;
mod error;
mod frame;
mod handshake;
mod monitor;
mod ports;
mod serial;
mod settings;
mod shutdown;
mod sink;
#[cfg(test)]
mod testing;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use cli::{Cli, Commands};
use commands::{cmd_decode, cmd_list_ports, cmd_probe, cmd_run};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging; RUST_LOG wins over --verbose
    let default_filter = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let registry = tracing_subscriber::registry().with(filter);
    if cli.log_json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }

    match &cli.command {
        Commands::Ports => {
            cmd_list_ports(&cli.link_config(None))?;
        }
        Commands::Run(run) => {
            cmd_run(cli.link_config(Some(run)), run.output).await?;
        }
        Commands::Decode { hex, input } => {
            cmd_decode(&cli.link_config(None), input, *hex)?;
        }
        Commands::Probe => {
            cmd_probe(&cli.link_config(None)).await?;
        }
    }

    Ok(())
}

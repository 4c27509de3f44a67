//! One-shot discovery

use anyhow::{Context, Result};

use crate::config::LinkConfig;
use crate::handshake::discover_and_connect;

use super::system_driver;

/// Find the panel, print its identity, and disconnect
pub async fn cmd_probe(config: &LinkConfig) -> Result<()> {
    let driver = system_driver(config);
    let link = discover_and_connect(&driver, config)
        .await
        .context("Probe failed")?;

    println!("Found device:");
    println!("  Port:     {}", link.path());
    println!("  ID:       {}", link.identity().id);
    println!(
        "  Version:  {}",
        if link.identity().version.is_empty() {
            "unknown"
        } else {
            link.identity().version.as_str()
        }
    );

    link.close().await;
    Ok(())
}

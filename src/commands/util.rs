//! Utility commands

use anyhow::Result;

use crate::config::LinkConfig;
use crate::ports::{describe_ports, PortCatalog};
use crate::serial::SystemDriver;

/// List candidate serial ports
pub fn cmd_list_ports(config: &LinkConfig) -> Result<()> {
    println!("Candidate serial ports:\n");

    let ports = describe_ports(&catalog(config));

    if ports.is_empty() {
        println!("  No serial ports found");
        return Ok(());
    }

    for port in ports {
        println!("  {} ({})", port.name, port.description);
    }

    Ok(())
}

/// Platform catalog, pinned to `--port` when one was given
pub fn catalog(config: &LinkConfig) -> PortCatalog {
    PortCatalog::for_platform().pinned(config.port.clone())
}

/// Production driver for `config`
pub fn system_driver(config: &LinkConfig) -> SystemDriver {
    SystemDriver::new(catalog(config))
}

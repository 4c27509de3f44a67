//! Long-running bridge command

use anyhow::{Context, Result};

use crate::bridge::Bridge;
use crate::cli::OutputKind;
use crate::config::LinkConfig;
use crate::shutdown::Shutdown;
use crate::sink::{JsonLinesSink, LogSink, SettingsSink};

use super::system_driver;

/// Connect to the panel and forward settings until Ctrl+C
pub async fn cmd_run(config: LinkConfig, output: OutputKind) -> Result<()> {
    let (handle, shutdown) = Shutdown::channel();
    ctrlc::set_handler(move || {
        tracing::info!("Interrupt received");
        handle.trigger();
    })
    .context("Failed to install Ctrl+C handler")?;

    let sink: Box<dyn SettingsSink> = match output {
        OutputKind::Log => Box::new(LogSink),
        OutputKind::Json => Box::new(JsonLinesSink::new(std::io::stdout())),
    };

    let driver = Box::new(system_driver(&config));
    let mut bridge = Bridge::new(config, driver, sink);

    if let Err(e) = bridge.run(shutdown).await {
        tracing::error!("{}", e);
        return Err(e).context("No device found at startup");
    }

    let stats = bridge.stats();
    tracing::info!(
        "Stopped ({}) after {} messages, {} reconnects",
        bridge.state(),
        stats.messages,
        stats.reconnects
    );
    Ok(())
}

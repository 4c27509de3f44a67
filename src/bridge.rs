//! Connection lifecycle: read, decode, hand off, and reconnect.
//!
//! ```text
//!            discover ok
//! Disconnected ─────────▶ Connected ◀──────────────┐
//!                            │ link lost /          │ discover ok
//!                            │ health policy trips  │
//!                            ▼                      │
//!                       Reconnecting ───────────────┘
//!                            │  ▲
//!                            └──┘ discover failed, wait retry delay
//! ```
//!
//! There is no retry limit: the panel is an unattended field device and
//! the host keeps trying until it is shut down.

use crate::config::LinkConfig;
use crate::decoder::{keys, SettingsDecoder};
use crate::error::LinkError;
use crate::handshake::{discover_and_connect, DeviceIdentity, Link};
use crate::monitor::{ConnectionMonitor, ConnectionState, Trigger};
use crate::serial::PortDriver;
use crate::settings::SettingsMap;
use crate::shutdown::Shutdown;
use crate::sink::SettingsSink;

/// Counters for the lifetime of one [`Bridge`].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BridgeStats {
    /// Messages that decoded into settings.
    pub messages: u64,
    /// Reads that produced no settings.
    pub empty_reads: u64,
    pub reconnects: u64,
    pub failed_attempts: u64,
}

/// Owns the link and everything needed to keep it alive.
///
/// Passed by `&mut` through the loop; nothing here is global.
pub struct Bridge {
    config: LinkConfig,
    driver: Box<dyn PortDriver>,
    decoder: SettingsDecoder,
    monitor: ConnectionMonitor,
    sink: Box<dyn SettingsSink>,
    link: Option<Link>,
    state: ConnectionState,
    stats: BridgeStats,
}

impl Bridge {
    pub fn new(
        config: LinkConfig,
        driver: Box<dyn PortDriver>,
        sink: Box<dyn SettingsSink>,
    ) -> Self {
        let decoder = SettingsDecoder::new(config.handshake_id.clone(), config.step_sizes.clone());
        let monitor = ConnectionMonitor::new(config.health);
        Self {
            config,
            driver,
            decoder,
            monitor,
            sink,
            link: None,
            state: ConnectionState::Disconnected,
            stats: BridgeStats::default(),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn stats(&self) -> &BridgeStats {
        &self.stats
    }

    #[cfg(test)]
    pub fn identity(&self) -> Option<&DeviceIdentity> {
        self.link.as_ref().map(Link::identity)
    }

    /// Run until shutdown.
    ///
    /// Fails only if the initial discovery finds no device; later link
    /// losses are retried indefinitely.
    pub async fn run(&mut self, mut shutdown: Shutdown) -> Result<(), LinkError> {
        tracing::info!(
            "Looking for '{}' ({:?} policy)",
            self.config.handshake_id,
            self.config.health
        );

        let link = tokio::select! {
            result = discover_and_connect(self.driver.as_ref(), &self.config) => result?,
            _ = shutdown.cancelled() => return Ok(()),
        };
        self.attach(link);

        while !shutdown.is_triggered() {
            match self.state {
                ConnectionState::Connected => {
                    if let Some(trigger) = self.poll().await {
                        self.begin_reconnect(trigger, &mut shutdown).await;
                    }
                }
                ConnectionState::Reconnecting | ConnectionState::Disconnected => {
                    self.reconnect_attempt(&mut shutdown).await;
                }
            }
        }

        tracing::info!("Shutting down");
        self.detach().await;
        self.state = ConnectionState::Disconnected;
        Ok(())
    }

    /// One read → decode → hand-off cycle. Returns a trigger when the link
    /// must be re-established.
    async fn poll(&mut self) -> Option<Trigger> {
        let Some(link) = self.link.as_mut() else {
            return Some(Trigger::LinkLost("no link".to_string()));
        };
        if !link.is_open() {
            return Some(Trigger::LinkLost("port closed".to_string()));
        }

        match link.read_message().await {
            Ok(Some(message)) => match self.decoder.decode(&message) {
                Some(settings) => self.deliver(settings),
                None => self.record_empty(),
            },
            Ok(None) => self.record_empty(),
            Err(e) => return Some(Trigger::LinkLost(e.to_string())),
        }

        self.monitor.check()
    }

    fn deliver(&mut self, settings: SettingsMap) {
        self.monitor.record_decoded();
        self.stats.messages += 1;
        self.observe_identity(&settings);

        let report = self.sink.apply(settings);
        report.log();
    }

    fn record_empty(&mut self) {
        self.monitor.record_empty();
        self.stats.empty_reads += 1;
    }

    /// Keep the link's identity in step with what the device reports.
    fn observe_identity(&mut self, settings: &SettingsMap) {
        let Some(link) = self.link.as_mut() else {
            return;
        };
        let current = link.identity();
        let id = settings.text(keys::DEVICE_ID).unwrap_or(&current.id);
        let version = settings
            .text(keys::DEVICE_VERSION)
            .unwrap_or(&current.version);

        if id != current.id || version != current.version {
            let identity = DeviceIdentity {
                id: id.to_string(),
                version: version.to_string(),
            };
            tracing::info!("Device identity changed: {} -> {}", current, identity);
            link.set_identity(identity);
        }
    }

    fn attach(&mut self, link: Link) {
        tracing::info!("Connected to {} on {}", link.identity(), link.path());
        self.link = Some(link);
        self.monitor.reset();
        self.state = ConnectionState::Connected;
    }

    async fn detach(&mut self) {
        if let Some(link) = self.link.take() {
            tracing::debug!("Closing {}", link.path());
            link.close().await;
        }
    }

    async fn begin_reconnect(&mut self, trigger: Trigger, shutdown: &mut Shutdown) {
        tracing::warn!("Connection lost: {}. Reconnecting...", trigger);
        self.state = ConnectionState::Reconnecting;
        self.stats.reconnects += 1;
        self.detach().await;
        shutdown.sleep(self.config.reconnect_delay).await;
    }

    async fn reconnect_attempt(&mut self, shutdown: &mut Shutdown) {
        let result = tokio::select! {
            result = discover_and_connect(self.driver.as_ref(), &self.config) => result,
            _ = shutdown.cancelled() => return,
        };

        match result {
            Ok(link) => {
                tracing::info!("Reconnected");
                self.attach(link);
            }
            Err(e) => {
                self.stats.failed_attempts += 1;
                tracing::warn!(
                    "Reconnect attempt {} failed: {}. Retrying in {:?}",
                    self.stats.failed_attempts,
                    e,
                    self.config.retry_delay
                );
                shutdown.sleep(self.config.retry_delay).await;
            }
        }
    }
}

//! Port selection by identity handshake.
//!
//! The panel firmware reboots when its port is opened and, once up, prints
//! lines starting with its identifier (`TEENSY_OCP_001,<version>,...`).
//! A port is accepted only after such a line has been seen.

use std::fmt;
use std::time::Duration;

use crate::config::LinkConfig;
use crate::error::LinkError;
use crate::frame::{FrameReader, Message};
use crate::serial::{PortDriver, SerialLink};

/// Identity announced by the device.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceIdentity {
    pub id: String,
    pub version: String,
}

impl DeviceIdentity {
    /// Parse `id[,version[,...]]` from a handshake line.
    pub fn from_line(line: &str) -> Self {
        let mut fields = line.split(',').map(str::trim);
        Self {
            id: fields.next().unwrap_or_default().to_string(),
            version: fields.next().unwrap_or_default().to_string(),
        }
    }
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.version.is_empty() {
            write!(f, "{}", self.id)
        } else {
            write!(f, "{} v{}", self.id, self.version)
        }
    }
}

/// An open, identified connection to the panel.
pub struct Link {
    channel: Box<dyn SerialLink>,
    reader: FrameReader,
    read_timeout: Duration,
    identity: DeviceIdentity,
}

impl Link {
    pub fn path(&self) -> &str {
        self.channel.path()
    }

    pub fn is_open(&self) -> bool {
        self.channel.is_open()
    }

    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    /// Replace the identity, e.g. after the device reported a new version.
    pub fn set_identity(&mut self, identity: DeviceIdentity) {
        self.identity = identity;
    }

    /// Read one message using the steady-state read timeout.
    pub async fn read_message(&mut self) -> Result<Option<Message>, LinkError> {
        let timeout = self.read_timeout;
        self.reader
            .read_message(self.channel.as_mut(), timeout)
            .await
    }

    pub async fn close(mut self) {
        self.channel.close().await;
    }
}

/// Open `port` and wait for the identity line.
pub async fn try_connect(
    driver: &dyn PortDriver,
    port: &str,
    config: &LinkConfig,
) -> Result<Link, LinkError> {
    tracing::debug!("Opening {} at {} baud", port, config.baud_rate);
    let mut channel = driver
        .open(port, config.baud_rate, config.settle_timeout)
        .await?;

    // Device firmware reboots on open
    tokio::time::sleep(config.reset_delay).await;

    let mut reader = FrameReader::new();
    match wait_for_identity(channel.as_mut(), &mut reader, config).await {
        Ok(identity) => {
            tracing::info!("Handshake with {} succeeded: {}", port, identity);
            Ok(Link {
                channel,
                reader,
                read_timeout: config.read_timeout,
                identity,
            })
        }
        Err(e) => {
            tracing::debug!("Handshake with {} failed: {}", port, e);
            channel.close().await;
            Err(e)
        }
    }
}

async fn wait_for_identity(
    channel: &mut dyn SerialLink,
    reader: &mut FrameReader,
    config: &LinkConfig,
) -> Result<DeviceIdentity, LinkError> {
    for attempt in 1..=config.handshake_attempts {
        match reader
            .read_line(channel, config.handshake_read_timeout)
            .await?
        {
            Some(line) => {
                let line = line.trim();
                if line.starts_with(&config.handshake_id) {
                    return Ok(DeviceIdentity::from_line(line));
                }
                tracing::debug!("Handshake attempt {}: unexpected line {:?}", attempt, line);
            }
            None => {
                tracing::debug!("Handshake attempt {}: no data", attempt);
            }
        }
    }

    Err(LinkError::HandshakeFailed {
        port: channel.path().to_string(),
        attempts: config.handshake_attempts,
    })
}

/// Try every candidate port in order and return the first that answers.
pub async fn discover_and_connect(
    driver: &dyn PortDriver,
    config: &LinkConfig,
) -> Result<Link, LinkError> {
    let candidates = driver.enumerate();
    if candidates.is_empty() {
        tracing::warn!("No candidate serial ports found");
    }

    for port in &candidates {
        match try_connect(driver, port, config).await {
            Ok(link) => return Ok(link),
            Err(e) => tracing::debug!("Skipping {}: {}", port, e),
        }
    }

    Err(LinkError::DeviceNotFound {
        handshake_id: config.handshake_id.clone(),
        tried: candidates.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ScriptedDriver, ScriptedLink};

    fn fast_config() -> LinkConfig {
        LinkConfig {
            settle_timeout: Duration::from_millis(5),
            reset_delay: Duration::from_millis(1),
            handshake_attempts: 3,
            handshake_read_timeout: Duration::from_millis(10),
            read_timeout: Duration::from_millis(20),
            ..LinkConfig::default()
        }
    }

    #[test]
    fn test_identity_from_line() {
        let id = DeviceIdentity::from_line("TEENSY_OCP_001,1.2.0,0,0,0,0,1,25");
        assert_eq!(id.id, "TEENSY_OCP_001");
        assert_eq!(id.version, "1.2.0");
        assert_eq!(id.to_string(), "TEENSY_OCP_001 v1.2.0");

        let bare = DeviceIdentity::from_line("TEENSY_OCP_001");
        assert_eq!(bare.version, "");
        assert_eq!(bare.to_string(), "TEENSY_OCP_001");
    }

    #[tokio::test]
    async fn test_handshake_after_boot_noise() {
        let driver = ScriptedDriver::new().with_link(
            ScriptedLink::new("/dev/ttyACM0")
                .with_line("booting...")
                .with_line("TEENSY_OCP_001,1.0.0"),
        );
        let config = fast_config();

        let link = try_connect(&driver, "/dev/ttyACM0", &config).await.unwrap();
        assert_eq!(link.path(), "/dev/ttyACM0");
        assert_eq!(link.identity().version, "1.0.0");
        assert_eq!(link.read_timeout, config.read_timeout);
        assert!(link.is_open());
    }

    #[tokio::test]
    async fn test_handshake_gives_up_and_closes() {
        let port = ScriptedLink::new("/dev/ttyUSB0")
            .with_line("hello")
            .with_line("world")
            .with_line("again")
            .with_line("TEENSY_OCP_001,1.0.0");
        let closed = port.closed_flag();
        let driver = ScriptedDriver::new().with_link(port);

        let result = try_connect(&driver, "/dev/ttyUSB0", &fast_config()).await;
        assert!(matches!(
            result,
            Err(LinkError::HandshakeFailed { attempts: 3, .. })
        ));
        assert!(*closed.lock().unwrap());
    }

    #[tokio::test]
    async fn test_handshake_silent_device_fails() {
        let port = ScriptedLink::new("/dev/ttyUSB0");
        let closed = port.closed_flag();
        let driver = ScriptedDriver::new().with_link(port);

        let result = try_connect(&driver, "/dev/ttyUSB0", &fast_config()).await;
        assert!(result.is_err());
        assert!(*closed.lock().unwrap());
    }

    #[tokio::test]
    async fn test_discover_picks_first_answering_port() {
        let driver = ScriptedDriver::new()
            .with_link(ScriptedLink::new("/dev/ttyACM0").with_line("GPS,$GPGGA"))
            .with_port("/dev/ttyACM1")
            .with_link(ScriptedLink::new("/dev/ttyACM2").with_line("TEENSY_OCP_001,2.0.0"));

        let link = discover_and_connect(&driver, &fast_config()).await.unwrap();
        assert_eq!(link.path(), "/dev/ttyACM2");
        assert_eq!(
            driver.opened(),
            vec!["/dev/ttyACM0", "/dev/ttyACM1", "/dev/ttyACM2"]
        );
    }

    #[tokio::test]
    async fn test_discover_with_no_ports() {
        let driver = ScriptedDriver::new();
        let result = discover_and_connect(&driver, &fast_config()).await;
        assert!(matches!(
            result,
            Err(LinkError::DeviceNotFound { tried: 0, .. })
        ));
    }

    #[tokio::test]
    async fn test_link_reads_data_buffered_during_handshake() {
        let driver = ScriptedDriver::new().with_link(
            ScriptedLink::new("/dev/ttyACM0").with_chunk(b"TEENSY_OCP_001,1.0.0\nfeed=10\n"),
        );

        let mut link = try_connect(&driver, "/dev/ttyACM0", &fast_config())
            .await
            .unwrap();
        let msg = link.read_message().await.unwrap();
        assert_eq!(msg, Some(Message::Text("feed=10".to_string())));
    }
}

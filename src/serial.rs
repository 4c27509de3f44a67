//! Serial port transport layer.
//!
//! The core only needs four capabilities from a serial device: enumerate,
//! open, read with a timeout, and close (plus write for completeness).
//! They are expressed as traits so the orchestrator can be driven by the
//! real `tokio-serial` backend or by an in-memory script in tests.

use async_trait::async_trait;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_serial::SerialPortBuilderExt;

use crate::error::LinkError;
use crate::ports::PortCatalog;

/// An open serial channel.
#[async_trait]
pub trait SerialLink: Send {
    /// Device path this link was opened on.
    fn path(&self) -> &str;

    fn is_open(&self) -> bool;

    /// Read whatever is available, waiting at most `timeout`.
    ///
    /// Returns `Ok(None)` on timeout and `Ok(Some(n))` with `n > 0` when
    /// bytes arrived. End of stream is reported as [`LinkError::Closed`].
    async fn read_timeout(
        &mut self,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<Option<usize>, LinkError>;

    #[allow(dead_code)]
    async fn write(&mut self, data: &[u8]) -> Result<(), LinkError>;

    /// Release the port. Further reads fail with [`LinkError::Closed`].
    async fn close(&mut self);
}

/// Platform capability: list candidate ports and open one of them.
#[async_trait]
pub trait PortDriver: Send + Sync {
    /// Candidate ports in discovery order.
    fn enumerate(&self) -> Vec<String>;

    /// Open `path` at `baud_rate` with 8-N-1 framing.
    async fn open(
        &self,
        path: &str,
        baud_rate: u32,
        timeout: Duration,
    ) -> Result<Box<dyn SerialLink>, LinkError>;
}

/// Serial port backed by `tokio-serial`.
pub struct SerialPort {
    path: String,
    port: Option<tokio_serial::SerialStream>,
}

impl SerialPort {
    /// Open a serial port connection.
    pub async fn open(port_name: &str, baud_rate: u32, timeout: Duration) -> Result<Self, LinkError> {
        use tokio_serial::SerialPort as _;

        let mut port = tokio_serial::new(port_name, baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .stop_bits(tokio_serial::StopBits::One)
            .parity(tokio_serial::Parity::None)
            .flow_control(tokio_serial::FlowControl::None)
            .timeout(timeout)
            .open_native_async()
            .map_err(|e| LinkError::open(port_name, e.to_string()))?;

        // Assert DTR so USB CDC firmware sees the host and starts streaming.
        if let Err(e) = port.write_data_terminal_ready(true) {
            tracing::debug!("Could not assert DTR on {}: {}", port_name, e);
        }

        Ok(Self {
            path: port_name.to_string(),
            port: Some(port),
        })
    }
}

#[async_trait]
impl SerialLink for SerialPort {
    fn path(&self) -> &str {
        &self.path
    }

    fn is_open(&self) -> bool {
        self.port.is_some()
    }

    async fn read_timeout(
        &mut self,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<Option<usize>, LinkError> {
        let port = self.port.as_mut().ok_or(LinkError::Closed)?;
        match tokio::time::timeout(timeout, port.read(buf)).await {
            Ok(Ok(0)) => Err(LinkError::Closed),
            Ok(Ok(n)) => Ok(Some(n)),
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::TimedOut => Ok(None),
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Ok(None),
        }
    }

    async fn write(&mut self, data: &[u8]) -> Result<(), LinkError> {
        let port = self.port.as_mut().ok_or(LinkError::Closed)?;
        port.write_all(data).await?;
        port.flush().await?;
        Ok(())
    }

    async fn close(&mut self) {
        // Dropping the stream releases the file descriptor / handle.
        if self.port.take().is_some() {
            tracing::debug!("Closed serial port {}", self.path);
        }
    }
}

/// Production driver: platform port catalog plus `tokio-serial` ports.
pub struct SystemDriver {
    catalog: PortCatalog,
}

impl SystemDriver {
    pub fn new(catalog: PortCatalog) -> Self {
        Self { catalog }
    }
}

#[async_trait]
impl PortDriver for SystemDriver {
    fn enumerate(&self) -> Vec<String> {
        self.catalog.list_candidate_ports()
    }

    async fn open(
        &self,
        path: &str,
        baud_rate: u32,
        timeout: Duration,
    ) -> Result<Box<dyn SerialLink>, LinkError> {
        let port = SerialPort::open(path, baud_rate, timeout).await?;
        Ok(Box::new(port))
    }
}

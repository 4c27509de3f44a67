//! Candidate port discovery.
//!
//! Each host platform exposes serial devices differently, so raw listing is
//! delegated to a [`PortEnumerator`] chosen at startup. The catalog then
//! applies the same filtering everywhere:
//! - drop audio / Bluetooth virtual ports by name
//! - dedupe
//! - sort, so discovery order is reproducible across runs

use std::collections::BTreeSet;
use std::io;
use std::path::{Path, PathBuf};

/// Substrings (lowercase) marking ports that are never the panel.
const DENY_LIST: &[&str] = &[
    "bluetooth",
    "airpods",
    "headphones",
    "headset",
    "speaker",
    "beats",
    "bose",
    "wlan-debug",
    "debug-console",
    "rfcomm",
];

/// Device name prefixes under `/dev` on Linux.
const LINUX_PREFIXES: &[&str] = &["ttyUSB", "ttyACM", "ttyAMA", "rfcomm"];

/// Device name prefixes under `/dev` on macOS.
const MACOS_PREFIXES: &[&str] = &["cu.", "tty."];

/// Raw, unfiltered listing of serial devices on one platform.
pub trait PortEnumerator: Send + Sync {
    fn raw_ports(&self) -> io::Result<Vec<String>>;
}

/// Lists device nodes in a directory whose names start with known prefixes.
pub struct DevDirEnumerator {
    dir: PathBuf,
    prefixes: &'static [&'static str],
}

impl DevDirEnumerator {
    pub fn new(dir: impl Into<PathBuf>, prefixes: &'static [&'static str]) -> Self {
        Self {
            dir: dir.into(),
            prefixes,
        }
    }

    pub fn linux() -> Self {
        Self::new("/dev", LINUX_PREFIXES)
    }

    pub fn macos() -> Self {
        Self::new("/dev", MACOS_PREFIXES)
    }

    fn matches(&self, name: &str) -> bool {
        self.prefixes.iter().any(|p| name.starts_with(p))
    }
}

impl PortEnumerator for DevDirEnumerator {
    fn raw_ports(&self) -> io::Result<Vec<String>> {
        let mut ports = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if self.matches(name) {
                ports.push(join_path(&self.dir, name));
            }
        }
        Ok(ports)
    }
}

fn join_path(dir: &Path, name: &str) -> String {
    dir.join(name).to_string_lossy().into_owned()
}

/// Uses the `serialport` crate's native enumeration (Windows registry etc.).
pub struct SystemEnumerator;

impl PortEnumerator for SystemEnumerator {
    fn raw_ports(&self) -> io::Result<Vec<String>> {
        let ports = serialport::available_ports().map_err(io::Error::other)?;
        Ok(ports.into_iter().map(|p| p.port_name).collect())
    }
}

/// Pick the enumerator for the platform this binary runs on.
pub fn platform_enumerator() -> Box<dyn PortEnumerator> {
    match std::env::consts::OS {
        "linux" | "android" => Box::new(DevDirEnumerator::linux()),
        "macos" | "ios" => Box::new(DevDirEnumerator::macos()),
        _ => Box::new(SystemEnumerator),
    }
}

/// Check if a port name belongs to a known non-target device class.
pub fn is_denied(port_name: &str) -> bool {
    let lower = port_name.to_lowercase();
    DENY_LIST.iter().any(|d| lower.contains(d))
}

/// Filtered, ordered list of ports worth a handshake attempt.
pub struct PortCatalog {
    enumerator: Box<dyn PortEnumerator>,
    pinned: Option<String>,
}

impl PortCatalog {
    pub fn new(enumerator: Box<dyn PortEnumerator>) -> Self {
        Self {
            enumerator,
            pinned: None,
        }
    }

    /// Catalog for the current platform.
    pub fn for_platform() -> Self {
        Self::new(platform_enumerator())
    }

    /// Always offer exactly this port, skipping enumeration.
    pub fn pinned(mut self, port: Option<String>) -> Self {
        self.pinned = port;
        self
    }

    /// Candidate ports; empty (never an error) when nothing is attached.
    pub fn list_candidate_ports(&self) -> Vec<String> {
        if let Some(port) = &self.pinned {
            return vec![port.clone()];
        }

        let raw = match self.enumerator.raw_ports() {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!("Failed to enumerate serial ports: {}", e);
                return Vec::new();
            }
        };

        let ports: BTreeSet<String> = raw.into_iter().filter(|p| !is_denied(p)).collect();
        tracing::debug!("Candidate ports: {:?}", ports);
        ports.into_iter().collect()
    }
}

/// Human-readable port summary used by the `ports` command.
#[derive(Debug, Clone)]
pub struct PortSummary {
    pub name: String,
    pub description: String,
}

/// Describe the catalog's candidates, enriched with USB details when the
/// native enumerator knows them.
pub fn describe_ports(catalog: &PortCatalog) -> Vec<PortSummary> {
    let details = serialport::available_ports().unwrap_or_default();

    catalog
        .list_candidate_ports()
        .into_iter()
        .map(|name| {
            let description = details
                .iter()
                .find(|p| p.port_name == name)
                .map(|p| describe_type(&p.port_type))
                .unwrap_or_else(|| "Serial Port".to_string());
            PortSummary { name, description }
        })
        .collect()
}

fn describe_type(port_type: &serialport::SerialPortType) -> String {
    match port_type {
        serialport::SerialPortType::UsbPort(info) => format!(
            "USB {} {} (VID:{:04x} PID:{:04x})",
            info.manufacturer.as_deref().unwrap_or("Device"),
            info.product.as_deref().unwrap_or("Serial Port"),
            info.vid,
            info.pid
        ),
        serialport::SerialPortType::BluetoothPort => "Bluetooth Serial".to_string(),
        serialport::SerialPortType::PciPort => "PCI Serial".to_string(),
        _ => "Serial Port".to_string(),
    }
}

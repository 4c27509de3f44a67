//! Error types for the serial link and the settings decoder.

use thiserror::Error;

/// Failures of the serial link lifecycle.
///
/// Everything except [`LinkError::DeviceNotFound`] during initial startup
/// is recoverable: the orchestrator closes the link and rediscovers.
#[derive(Debug, Error)]
pub enum LinkError {
    /// The port could not be opened.
    #[error("Failed to open serial port '{port}': {reason}")]
    Open { port: String, reason: String },

    /// Read or write on an open port failed.
    #[error("Serial I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The port reported end of stream or was already closed.
    #[error("Serial link closed")]
    Closed,

    /// No line carrying the identity prefix arrived within the attempt budget.
    #[error("Handshake with '{port}' failed after {attempts} attempts")]
    HandshakeFailed { port: String, attempts: u32 },

    /// Every candidate port failed the handshake (or there were none).
    #[error("No device answering '{handshake_id}' found ({tried} ports tried)")]
    DeviceNotFound { handshake_id: String, tried: usize },
}

impl LinkError {
    /// Creates a new port open error.
    #[must_use]
    pub fn open(port: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Open {
            port: port.into(),
            reason: reason.into(),
        }
    }
}

/// Reasons a single message could not be turned into settings.
///
/// These never leave the decoder; they are logged and the message is dropped.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("Malformed JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Field '{field}' has invalid value '{value}'")]
    Field { field: &'static str, value: String },

    #[error("Binary frame field '{0}' is not a NUL-terminated string")]
    Unterminated(&'static str),
}

impl DecodeError {
    pub fn field(field: &'static str, value: impl Into<String>) -> Self {
        Self::Field {
            field,
            value: value.into(),
        }
    }
}

/// Why a sink could not apply one setting.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ApplyError {
    #[error("Non-finite value {0}")]
    NonFinite(f64),

    #[error("Failed to write settings: {0}")]
    Write(String),
}

impl From<std::io::Error> for ApplyError {
    fn from(e: std::io::Error) -> Self {
        Self::Write(e.to_string())
    }
}

impl From<serde_json::Error> for ApplyError {
    fn from(e: serde_json::Error) -> Self {
        Self::Write(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_error_display() {
        let err = LinkError::open("/dev/ttyACM0", "permission denied");
        assert_eq!(
            err.to_string(),
            "Failed to open serial port '/dev/ttyACM0': permission denied"
        );
    }

    #[test]
    fn test_io_error_converts() {
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "gone");
        let err: LinkError = io.into();
        assert!(matches!(err, LinkError::Io(_)));
    }

    #[test]
    fn test_apply_error_display() {
        assert_eq!(ApplyError::NonFinite(f64::INFINITY).to_string(), "Non-finite value inf");
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "closed");
        assert_eq!(
            ApplyError::from(io).to_string(),
            "Failed to write settings: closed"
        );
    }

    #[test]
    fn test_field_error_display() {
        let err = DecodeError::field("delta_x", "abc");
        assert_eq!(err.to_string(), "Field 'delta_x' has invalid value 'abc'");
    }
}

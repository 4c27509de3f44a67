//! Message framing on top of a raw serial byte stream.
//!
//! The panel sends either newline-terminated text or fixed 38-byte binary
//! frames. Text never contains NUL, while every binary frame starts with a
//! NUL-terminated identifier, so the position of the first NUL relative to
//! the first newline tells the two apart.
//!
//! ## Binary Frame Layout
//!
//! ```text
//! offset size  field
//!      0   16  identifier, NUL-terminated ASCII
//!     16    8  firmware version, NUL-terminated ASCII
//!     24    4  delta X, i32 little-endian
//!     28    4  delta Y, i32 little-endian
//!     32    4  delta Z, i32 little-endian
//!     36    1  status bits
//!     37    1  feedrate value
//! ```

use std::time::Duration;
use tokio::time::Instant;

use crate::error::LinkError;
use crate::serial::SerialLink;

pub const FRAME_LEN: usize = 38;
pub const ID_FIELD_LEN: usize = 16;
pub const VERSION_FIELD_LEN: usize = 8;
pub const DELTAS_OFFSET: usize = ID_FIELD_LEN + VERSION_FIELD_LEN;
pub const STATUS_OFFSET: usize = DELTAS_OFFSET + 12;
pub const VALUE_OFFSET: usize = STATUS_OFFSET + 1;

/// Accumulated bytes beyond this without a terminator are thrown away.
const MAX_BUFFER: usize = 1024;

/// One logical message read from the link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Text(String),
    Binary([u8; FRAME_LEN]),
}

/// Splits the incoming byte stream into [`Message`]s.
///
/// Holds partially received data between calls, so a single reader must be
/// used for the lifetime of one link.
#[derive(Debug, Default)]
pub struct FrameReader {
    buf: Vec<u8>,
}

impl FrameReader {
    pub fn new() -> Self {
        Self {
            buf: Vec::with_capacity(MAX_BUFFER),
        }
    }

    #[cfg(test)]
    /// Bytes received but not yet returned as a message.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Read one message, waiting at most `timeout`.
    ///
    /// `Ok(None)` means nothing complete arrived in time, which is a normal
    /// outcome. Errors mean the link itself is broken.
    pub async fn read_message(
        &mut self,
        link: &mut dyn SerialLink,
        timeout: Duration,
    ) -> Result<Option<Message>, LinkError> {
        let deadline = Instant::now() + timeout;

        loop {
            if let Some(msg) = self.extract() {
                return Ok(Some(msg));
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }

            let mut tmp = [0u8; 256];
            match link.read_timeout(&mut tmp, remaining).await? {
                Some(n) => self.push(&tmp[..n]),
                None => return Ok(None),
            }
        }
    }

    /// Read the next text line, skipping any binary frames in between.
    ///
    /// Used during the handshake, where only the identity line matters.
    pub async fn read_line(
        &mut self,
        link: &mut dyn SerialLink,
        timeout: Duration,
    ) -> Result<Option<String>, LinkError> {
        let deadline = Instant::now() + timeout;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.read_message(link, remaining).await? {
                Some(Message::Text(line)) => return Ok(Some(line)),
                Some(Message::Binary(_)) => continue,
                None => return Ok(None),
            }
        }
    }

    fn push(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Pull one complete message out of the buffer, if there is one.
    fn extract(&mut self) -> Option<Message> {
        loop {
            let nul = self.buf.iter().position(|&b| b == 0);
            let newline = self.buf.iter().position(|&b| b == b'\n');

            match (nul, newline) {
                (Some(z), nl) if nl.map_or(true, |n| z < n) => {
                    if !is_identifier(&self.buf[..z]) {
                        // Not a frame start: drop the noise through the NUL
                        tracing::debug!("Dropping {} unframed bytes", z + 1);
                        self.buf.drain(..=z);
                        continue;
                    }
                    // Text after the NUL means it was noise, not a header
                    let header = &self.buf[..self.buf.len().min(DELTAS_OFFSET)];
                    if header.contains(&b'\n') {
                        tracing::debug!("Dropping {} unframed bytes", z + 1);
                        self.buf.drain(..=z);
                        continue;
                    }
                    if self.buf.len() < FRAME_LEN {
                        return None;
                    }
                    if !is_version(&self.buf[ID_FIELD_LEN..DELTAS_OFFSET]) {
                        tracing::debug!("Dropping malformed frame header");
                        self.buf.drain(..=z);
                        continue;
                    }
                    let mut frame = [0u8; FRAME_LEN];
                    frame.copy_from_slice(&self.buf[..FRAME_LEN]);
                    self.buf.drain(..FRAME_LEN);
                    tracing::debug!("Binary frame {}", hex::encode(frame));
                    return Some(Message::Binary(frame));
                }
                (_, Some(n)) => {
                    let line: Vec<u8> = self.buf.drain(..=n).collect();
                    let text = String::from_utf8_lossy(&line[..n]).replace('\r', "");
                    return Some(Message::Text(text));
                }
                (None, None) => {
                    if self.buf.len() > MAX_BUFFER {
                        tracing::warn!(
                            "Discarding {} buffered bytes without terminator",
                            self.buf.len()
                        );
                        self.buf.clear();
                    }
                    return None;
                }
                // covered by the guarded arm
                (Some(_), None) => return None,
            }
        }
    }
}

/// Identifier field contents: 1..16 printable ASCII bytes.
fn is_identifier(bytes: &[u8]) -> bool {
    !bytes.is_empty() && bytes.len() < ID_FIELD_LEN && bytes.iter().all(u8::is_ascii_graphic)
}

/// Version field: 1..8 printable ASCII bytes, NUL-terminated inside the field.
fn is_version(field: &[u8]) -> bool {
    match field.iter().position(|&b| b == 0) {
        Some(end) => end > 0 && field[..end].iter().all(u8::is_ascii_graphic),
        None => false,
    }
}

#[cfg(test)]
pub(crate) fn build_frame(
    id: &str,
    version: &str,
    deltas: [i32; 3],
    status: u8,
    value: u8,
) -> [u8; FRAME_LEN] {
    let mut frame = [0u8; FRAME_LEN];
    frame[..id.len()].copy_from_slice(id.as_bytes());
    frame[ID_FIELD_LEN..ID_FIELD_LEN + version.len()].copy_from_slice(version.as_bytes());
    for (i, d) in deltas.iter().enumerate() {
        let off = DELTAS_OFFSET + i * 4;
        frame[off..off + 4].copy_from_slice(&d.to_le_bytes());
    }
    frame[STATUS_OFFSET] = status;
    frame[VALUE_OFFSET] = value;
    frame
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedLink;

    const TICK: Duration = Duration::from_millis(50);

    #[tokio::test]
    async fn test_reads_text_line_and_strips_cr() {
        let mut link = ScriptedLink::new("/dev/ttyACM0").with_chunk(b"hello,world\r\n");
        let mut reader = FrameReader::new();

        let msg = reader.read_message(&mut link, TICK).await.unwrap();
        assert_eq!(msg, Some(Message::Text("hello,world".to_string())));
        assert_eq!(reader.buffered(), 0);
    }

    #[tokio::test]
    async fn test_line_split_across_reads() {
        let mut link = ScriptedLink::new("p")
            .with_chunk(b"TEENSY_OCP")
            .with_chunk(b"_001,1.0.0\n");
        let mut reader = FrameReader::new();

        let msg = reader.read_message(&mut link, TICK).await.unwrap();
        assert_eq!(msg, Some(Message::Text("TEENSY_OCP_001,1.0.0".to_string())));
    }

    #[tokio::test]
    async fn test_timeout_returns_none() {
        let mut link = ScriptedLink::new("p").with_chunk(b"partial");
        let mut reader = FrameReader::new();

        let msg = reader.read_message(&mut link, TICK).await.unwrap();
        assert_eq!(msg, None);
        assert_eq!(reader.buffered(), 7);
    }

    #[tokio::test]
    async fn test_reads_binary_frame() {
        let frame = build_frame("TEENSY_OCP_001", "1.0.0", [1, -2, 3], 0b10, 128);
        let mut link = ScriptedLink::new("p").with_chunk(&frame);
        let mut reader = FrameReader::new();

        let msg = reader.read_message(&mut link, TICK).await.unwrap();
        assert_eq!(msg, Some(Message::Binary(frame)));
    }

    #[tokio::test]
    async fn test_binary_frame_containing_newline_byte() {
        // delta X = 10 encodes a 0x0A byte inside the frame
        let frame = build_frame("OCP", "2", [10, 0, 0], 0, 0);
        let mut link = ScriptedLink::new("p")
            .with_chunk(&frame[..20])
            .with_chunk(&frame[20..])
            .with_chunk(b"next\n");
        let mut reader = FrameReader::new();

        let first = reader.read_message(&mut link, TICK).await.unwrap();
        assert_eq!(first, Some(Message::Binary(frame)));
        let second = reader.read_message(&mut link, TICK).await.unwrap();
        assert_eq!(second, Some(Message::Text("next".to_string())));
    }

    #[tokio::test]
    async fn test_text_then_frame_in_one_chunk() {
        let frame = build_frame("OCP", "2", [0, 0, 0], 1, 2);
        let mut data = b"a=1\n".to_vec();
        data.extend_from_slice(&frame);
        let mut link = ScriptedLink::new("p").with_chunk(&data);
        let mut reader = FrameReader::new();

        assert_eq!(
            reader.read_message(&mut link, TICK).await.unwrap(),
            Some(Message::Text("a=1".to_string()))
        );
        assert_eq!(
            reader.read_message(&mut link, TICK).await.unwrap(),
            Some(Message::Binary(frame))
        );
    }

    #[tokio::test]
    async fn test_noise_before_nul_is_dropped() {
        let mut link = ScriptedLink::new("p").with_chunk(b"\x01\x02\x00ok\n");
        let mut reader = FrameReader::new();

        let msg = reader.read_message(&mut link, TICK).await.unwrap();
        assert_eq!(msg, Some(Message::Text("ok".to_string())));
    }

    #[tokio::test]
    async fn test_noise_nul_then_line_then_frame() {
        let frame = build_frame("OCP", "2", [7, 0, 0], 0b10, 51);
        let mut data = b"x\0a=1\n".to_vec();
        data.extend_from_slice(&frame);
        let mut link = ScriptedLink::new("p").with_chunk(&data);
        let mut reader = FrameReader::new();

        assert_eq!(
            reader.read_message(&mut link, TICK).await.unwrap(),
            Some(Message::Text("a=1".to_string()))
        );
        assert_eq!(
            reader.read_message(&mut link, TICK).await.unwrap(),
            Some(Message::Binary(frame))
        );
    }

    #[tokio::test]
    async fn test_noise_nul_does_not_hold_short_line() {
        let mut link = ScriptedLink::new("p").with_chunk(b"x\0a=1\n");
        let mut reader = FrameReader::new();

        let msg = reader.read_message(&mut link, TICK).await.unwrap();
        assert_eq!(msg, Some(Message::Text("a=1".to_string())));
        assert_eq!(reader.buffered(), 0);
    }

    #[tokio::test]
    async fn test_empty_version_is_not_a_frame() {
        let mut fake = build_frame("OCP", "", [0, 0, 0], 0, 0);
        fake[FRAME_LEN - 1] = b'\n';
        let mut link = ScriptedLink::new("p").with_chunk(&fake).with_chunk(b"ok\n");
        let mut reader = FrameReader::new();

        let mut seen = Vec::new();
        while let Some(msg) = reader.read_message(&mut link, TICK).await.unwrap() {
            seen.push(msg);
        }
        assert!(seen.iter().all(|m| matches!(m, Message::Text(_))));
        assert_eq!(seen.last(), Some(&Message::Text("ok".to_string())));
    }

    #[tokio::test]
    async fn test_oversized_garbage_is_discarded() {
        let garbage = vec![b'x'; MAX_BUFFER + 10];
        let mut link = ScriptedLink::new("p")
            .with_chunk(&garbage)
            .with_chunk(b"fresh\n");
        let mut reader = FrameReader::new();

        // The garbage arrives in 256-byte reads; once past the bound it is cleared.
        let msg = reader
            .read_message(&mut link, Duration::from_millis(200))
            .await
            .unwrap();
        assert_eq!(msg, Some(Message::Text("fresh".to_string())));
    }

    #[tokio::test]
    async fn test_eof_is_an_error() {
        let mut link = ScriptedLink::new("p").with_chunk(b"x").then_eof();
        let mut reader = FrameReader::new();

        let result = reader.read_message(&mut link, TICK).await;
        assert!(matches!(result, Err(LinkError::Closed)));
    }

    #[tokio::test]
    async fn test_read_line_skips_frames() {
        let frame = build_frame("OCP", "2", [0, 0, 0], 0, 0);
        let mut data = frame.to_vec();
        data.extend_from_slice(b"TEENSY_OCP_001\n");
        let mut link = ScriptedLink::new("p").with_chunk(&data);
        let mut reader = FrameReader::new();

        let line = reader.read_line(&mut link, TICK).await.unwrap();
        assert_eq!(line.as_deref(), Some("TEENSY_OCP_001"));
    }

    #[test]
    fn test_empty_line_is_a_message() {
        let mut reader = FrameReader::new();
        reader.push(b"\r\n");
        assert_eq!(reader.extract(), Some(Message::Text(String::new())));
    }
}

//! Offline decoding of a single message

use anyhow::{bail, Context, Result};

use crate::config::LinkConfig;
use crate::decoder::SettingsDecoder;
use crate::frame::{Message, FRAME_LEN};
use crate::settings::SettingsMap;

/// Decode `input` and print the settings as JSON
pub fn cmd_decode(config: &LinkConfig, input: &str, is_hex: bool) -> Result<()> {
    let message = parse_message(input, is_hex)?;
    let decoder = SettingsDecoder::new(config.handshake_id.clone(), config.step_sizes.clone());

    match decoder.decode(&message) {
        Some(settings) => println!("{}", render(&settings)?),
        None => println!("No settings decoded"),
    }
    Ok(())
}

fn parse_message(input: &str, is_hex: bool) -> Result<Message> {
    if !is_hex {
        return Ok(Message::Text(input.to_string()));
    }

    let compact: String = input.chars().filter(|c| !c.is_whitespace()).collect();
    let bytes = hex::decode(&compact).context("Invalid hex")?;
    let Ok(frame) = <[u8; FRAME_LEN]>::try_from(bytes.as_slice()) else {
        bail!("Binary frame must be {} bytes, got {}", FRAME_LEN, bytes.len());
    };
    Ok(Message::Binary(frame))
}

fn render(settings: &SettingsMap) -> Result<String> {
    Ok(serde_json::to_string_pretty(settings)?)
}

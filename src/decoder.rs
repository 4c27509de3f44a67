//! Multi-format settings decoder.
//!
//! Turns one [`Message`] into a [`SettingsMap`]. The panel firmware has
//! gone through several wire formats and the host accepts all of them:
//!
//! | Shape                         | Format                                   |
//! |-------------------------------|------------------------------------------|
//! | 38-byte binary frame          | fixed layout, see [`crate::frame`]       |
//! | text starting with `{`        | JSON, namespaced under `ocp` or flat     |
//! | text with `,` and id / 8+ fields | positional CSV, 8 or 11 fields        |
//! | text with `=`                 | `key=value` pairs split on `;` or `&`    |
//! | anything else                 | `command [value]`                        |
//!
//! Decoding never fails loudly: empty input, empty results and malformed
//! messages all come back as `None`, the latter with a logged diagnostic.

use serde_json::{Map, Value};

use crate::error::DecodeError;
use crate::frame::{
    Message, DELTAS_OFFSET, ID_FIELD_LEN, STATUS_OFFSET, VALUE_OFFSET, VERSION_FIELD_LEN,
};
use crate::settings::{SettingValue, SettingsMap, StepSizeTable};

pub mod keys {
    pub const DEVICE_ID: &str = "device_id";
    pub const DEVICE_VERSION: &str = "device_version";
    pub const DELTA_X: &str = "delta_x";
    pub const DELTA_Y: &str = "delta_y";
    pub const DELTA_Z: &str = "delta_z";
    pub const POS_X: &str = "pos_x";
    pub const POS_Y: &str = "pos_y";
    pub const POS_Z: &str = "pos_z";
    pub const SWITCH_ENABLED: &str = "switch_enabled";
    pub const SWITCH_FEEDHOLD: &str = "switch_feedhold";
    pub const SWITCH_CYCLE_START: &str = "switch_cycle_start";
    pub const SWITCH_CYCLE_STOP: &str = "switch_cycle_stop";
    pub const SWITCH_TOOL_CHECK: &str = "switch_tool_check";
    pub const STEP_INDEX: &str = "step_index";
    pub const STEP_SIZE: &str = "step_size";
    pub const FEEDRATE_VALUE: &str = "feedrate_value";
    pub const FEEDRATE_PERCENT: &str = "feedrate_percent";
    pub const FEEDRATE_MIN: &str = "feedrate_min";
    pub const FEEDRATE_MAX: &str = "feedrate_max";
    pub const COMMAND: &str = "command";
    pub const VALUE: &str = "value";
}

/// Switch keys in status-bit order (bit 0 first).
const SWITCH_KEYS: [&str; 5] = [
    keys::SWITCH_ENABLED,
    keys::SWITCH_FEEDHOLD,
    keys::SWITCH_CYCLE_START,
    keys::SWITCH_CYCLE_STOP,
    keys::SWITCH_TOOL_CHECK,
];

/// Binary status byte: step index lives above the switch bits.
const STEP_SHIFT: u8 = 5;
const STEP_MASK: u8 = 0b111;

/// CSV switch byte: bit 0 is the firmware alive flag, switches start at bit 1.
const CSV_SWITCH_SHIFT: u8 = 1;

const OLD_SCHEMA_FIELDS: usize = 8;
const NEW_SCHEMA_FIELDS: usize = 11;

/// `raw / 255 * 100`.
pub fn feedrate_percent(raw: i64) -> f64 {
    raw as f64 / 255.0 * 100.0
}

/// Stateless settings decoder.
#[derive(Debug, Clone)]
pub struct SettingsDecoder {
    handshake_id: String,
    step_sizes: StepSizeTable,
}

impl SettingsDecoder {
    pub fn new(handshake_id: impl Into<String>, step_sizes: StepSizeTable) -> Self {
        Self {
            handshake_id: handshake_id.into(),
            step_sizes,
        }
    }

    /// Decode one message. `None` means "no settings in this message".
    pub fn decode(&self, message: &Message) -> Option<SettingsMap> {
        let result = match message {
            Message::Binary(frame) => self.decode_frame(frame),
            Message::Text(line) => self.decode_text(line),
        };

        match result {
            Ok(map) if map.is_empty() => None,
            Ok(map) => Some(map),
            Err(e) => {
                tracing::warn!("Dropping undecodable message: {}", e);
                tracing::debug!("Undecodable message: {:?}", message);
                None
            }
        }
    }

    fn decode_frame(&self, frame: &[u8]) -> Result<SettingsMap, DecodeError> {
        let mut map = SettingsMap::new();

        let id = nul_terminated(&frame[..ID_FIELD_LEN]).ok_or(DecodeError::Unterminated("id"))?;
        let version = nul_terminated(&frame[ID_FIELD_LEN..ID_FIELD_LEN + VERSION_FIELD_LEN])
            .ok_or(DecodeError::Unterminated("version"))?;
        map.insert(keys::DEVICE_ID, id);
        map.insert(keys::DEVICE_VERSION, version);

        for (i, key) in [keys::DELTA_X, keys::DELTA_Y, keys::DELTA_Z].into_iter().enumerate() {
            let off = DELTAS_OFFSET + i * 4;
            let bytes = [frame[off], frame[off + 1], frame[off + 2], frame[off + 3]];
            map.insert(key, i64::from(i32::from_le_bytes(bytes)));
        }

        let status = frame[STATUS_OFFSET];
        insert_switches(&mut map, status);
        self.insert_step(&mut map, i64::from((status >> STEP_SHIFT) & STEP_MASK));
        insert_feedrate(&mut map, i64::from(frame[VALUE_OFFSET]));

        Ok(map)
    }

    fn decode_text(&self, line: &str) -> Result<SettingsMap, DecodeError> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(SettingsMap::new());
        }

        if line.starts_with('{') {
            return self.decode_json(line);
        }

        if line.contains(',') {
            let fields: Vec<&str> = line.split(',').map(str::trim).collect();
            let has_id = fields[0].starts_with(&self.handshake_id);
            if has_id || fields.len() >= OLD_SCHEMA_FIELDS {
                return self.decode_csv(&fields);
            }
        }

        if line.contains('=') {
            return Ok(decode_pairs(line));
        }

        Ok(decode_command(line))
    }

    fn decode_json(&self, line: &str) -> Result<SettingsMap, DecodeError> {
        let json: Value = serde_json::from_str(line)?;

        match json.get("ocp").and_then(Value::as_object) {
            Some(ocp) => Ok(self.decode_ocp(ocp)),
            None => Ok(flatten_json(&json)),
        }
    }

    /// `{"ocp": {"device": .., "switches": .., "feedrate": .., "encoders": ..}}`
    fn decode_ocp(&self, ocp: &Map<String, Value>) -> SettingsMap {
        let mut map = SettingsMap::new();

        if let Some(device) = ocp.get("device") {
            if let Some(id) = device.get("id").and_then(Value::as_str) {
                map.insert(keys::DEVICE_ID, id);
            }
            if let Some(version) = device.get("version").and_then(Value::as_str) {
                map.insert(keys::DEVICE_VERSION, version);
            }
        }

        if let Some(switches) = ocp.get("switches").and_then(Value::as_object) {
            for (name, value) in switches {
                if name == "stepIndex" {
                    if let Some(index) = value.as_i64() {
                        self.insert_step(&mut map, index);
                    }
                } else if let Some(on) = value.as_bool() {
                    map.insert(format!("switch_{}", snake_case(name)), on);
                }
            }
        }

        if let Some(feedrate) = ocp.get("feedrate") {
            if let Some(raw) = feedrate.get("value").and_then(Value::as_i64) {
                insert_feedrate(&mut map, raw);
            }
            if let Some(min) = feedrate.get("minValue").and_then(json_number) {
                map.insert(keys::FEEDRATE_MIN, min);
            }
            if let Some(max) = feedrate.get("maxValue").and_then(json_number) {
                map.insert(keys::FEEDRATE_MAX, max);
            }
        }

        if let Some(encoders) = ocp.get("encoders") {
            for (field, key) in [
                ("deltaX", keys::DELTA_X),
                ("deltaY", keys::DELTA_Y),
                ("deltaZ", keys::DELTA_Z),
            ] {
                if let Some(delta) = encoders.get(field).and_then(Value::as_i64) {
                    map.insert(key, delta);
                }
            }
            for (field, key) in [
                ("posX", keys::POS_X),
                ("posY", keys::POS_Y),
                ("posZ", keys::POS_Z),
            ] {
                if let Some(pos) = encoders.get(field).and_then(Value::as_f64) {
                    map.insert(key, pos);
                }
            }
        }

        map
    }

    /// Positional CSV, old (8) or new (11 fields, with absolute positions).
    fn decode_csv(&self, fields: &[&str]) -> Result<SettingsMap, DecodeError> {
        let mut map = SettingsMap::new();
        map.insert(keys::DEVICE_ID, fields[0]);
        if let Some(version) = fields.get(1) {
            map.insert(keys::DEVICE_VERSION, *version);
        }

        if fields.len() < OLD_SCHEMA_FIELDS {
            // Identity-only line, e.g. the handshake banner
            return Ok(map);
        }

        if fields.len() != OLD_SCHEMA_FIELDS && fields.len() != NEW_SCHEMA_FIELDS {
            tracing::debug!("CSV with {} fields, decoding best-effort", fields.len());
        }

        for (i, key) in [keys::DELTA_X, keys::DELTA_Y, keys::DELTA_Z].into_iter().enumerate() {
            map.insert(key, parse_int(key, fields[2 + i])?);
        }

        let tail = if fields.len() >= NEW_SCHEMA_FIELDS {
            for (i, key) in [keys::POS_X, keys::POS_Y, keys::POS_Z].into_iter().enumerate() {
                map.insert(key, parse_float(key, fields[5 + i])?);
            }
            8
        } else {
            5
        };

        let switches: u8 = fields[tail]
            .parse()
            .map_err(|_| DecodeError::field("switches", fields[tail]))?;
        insert_switches(&mut map, switches >> CSV_SWITCH_SHIFT);

        self.insert_step(&mut map, parse_int(keys::STEP_INDEX, fields[tail + 1])?);
        insert_feedrate(&mut map, parse_int(keys::FEEDRATE_VALUE, fields[tail + 2])?);

        Ok(map)
    }

    fn insert_step(&self, map: &mut SettingsMap, index: i64) {
        map.insert(keys::STEP_INDEX, index);
        map.insert(keys::STEP_SIZE, self.step_sizes.lookup(index));
    }
}

/// Unpack the five switch bits, bit 0 first.
fn insert_switches(map: &mut SettingsMap, bits: u8) {
    for (bit, key) in SWITCH_KEYS.iter().enumerate() {
        map.insert(*key, bits & (1 << bit) != 0);
    }
}

fn insert_feedrate(map: &mut SettingsMap, raw: i64) {
    map.insert(keys::FEEDRATE_VALUE, raw);
    map.insert(keys::FEEDRATE_PERCENT, feedrate_percent(raw));
}

/// One-level flatten of a generic JSON object.
fn flatten_json(json: &Value) -> SettingsMap {
    let mut map = SettingsMap::new();
    if let Value::Object(obj) = json {
        for (key, value) in obj {
            let setting = match value {
                Value::Number(n) => n.as_f64().map(SettingValue::Float),
                Value::String(s) => Some(SettingValue::Text(s.clone())),
                Value::Bool(b) => Some(SettingValue::Bool(*b)),
                other => Some(SettingValue::Text(other.to_string())),
            };
            if let Some(setting) = setting {
                map.insert(key.clone(), setting);
            }
        }
    }
    map
}

/// `a=1;b=true&c=text`
fn decode_pairs(line: &str) -> SettingsMap {
    let mut map = SettingsMap::new();
    for pair in line.split([';', '&']) {
        let Some((key, value)) = pair.split_once('=') else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        map.insert(key, typed_value(value.trim()));
    }
    map
}

/// `JOG 10` → command=JOG, value=10
fn decode_command(line: &str) -> SettingsMap {
    let mut map = SettingsMap::new();
    let mut tokens = line.split_whitespace();
    if let Some(command) = tokens.next() {
        map.insert(keys::COMMAND, command);
    }
    if let Some(value) = tokens.next().and_then(parse_finite) {
        map.insert(keys::VALUE, value);
    }
    map
}

fn typed_value(raw: &str) -> SettingValue {
    if let Ok(i) = raw.parse::<i64>() {
        return SettingValue::Int(i);
    }
    if let Some(f) = parse_finite(raw) {
        return SettingValue::Float(f);
    }
    match raw.to_ascii_lowercase().as_str() {
        "true" => SettingValue::Bool(true),
        "false" => SettingValue::Bool(false),
        _ => SettingValue::Text(raw.to_string()),
    }
}

fn parse_int(field: &'static str, raw: &str) -> Result<i64, DecodeError> {
    raw.parse().map_err(|_| DecodeError::field(field, raw))
}

fn parse_float(field: &'static str, raw: &str) -> Result<f64, DecodeError> {
    parse_finite(raw).ok_or_else(|| DecodeError::field(field, raw))
}

/// Numeric parse that rejects `nan` / `inf` spellings.
fn parse_finite(raw: &str) -> Option<f64> {
    raw.parse::<f64>().ok().filter(|f| f.is_finite())
}

fn json_number(value: &Value) -> Option<SettingValue> {
    value
        .as_i64()
        .map(SettingValue::Int)
        .or_else(|| value.as_f64().map(SettingValue::Float))
}

fn nul_terminated(field: &[u8]) -> Option<String> {
    let end = field.iter().position(|&b| b == 0)?;
    Some(String::from_utf8_lossy(&field[..end]).into_owned())
}

/// `cycleStart` → `cycle_start`
fn snake_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    for (i, c) in name.chars().enumerate() {
        if c.is_ascii_uppercase() {
            if i > 0 {
                out.push('_');
            }
            out.push(c.to_ascii_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

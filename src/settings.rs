//! Normalized settings produced by the decoder.

use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// A single decoded value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum SettingValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl SettingValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    #[cfg(test)]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    #[cfg(test)]
    /// Numeric view of `Int` and `Float`.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(i) => Some(*i as f64),
            Self::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for SettingValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Text(s) => write!(f, "{s}"),
        }
    }
}

impl From<bool> for SettingValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for SettingValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for SettingValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for SettingValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for SettingValue {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

/// Settings decoded from one message, keyed by semantic field name.
///
/// Keys are kept sorted so two maps with the same content compare and
/// print identically.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct SettingsMap(BTreeMap<String, SettingValue>);

impl SettingsMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<SettingValue>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&SettingValue> {
        self.0.get(key)
    }

    #[cfg(test)]
    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[cfg(test)]
    pub fn iter(&self) -> impl Iterator<Item = (&String, &SettingValue)> {
        self.0.iter()
    }

    #[cfg(test)]
    /// Convenience for `get(key).and_then(as_bool)`.
    pub fn bool(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(SettingValue::as_bool)
    }

    #[cfg(test)]
    pub fn int(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(SettingValue::as_int)
    }

    #[cfg(test)]
    pub fn float(&self, key: &str) -> Option<f64> {
        self.get(key).and_then(SettingValue::as_f64)
    }

    pub fn text(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(SettingValue::as_str)
    }
}

impl IntoIterator for SettingsMap {
    type Item = (String, SettingValue);
    type IntoIter = std::collections::btree_map::IntoIter<String, SettingValue>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

/// Jog step multipliers selected by the panel's step switch.
///
/// Lookup never fails: unmapped indices yield the table default.
#[derive(Debug, Clone, PartialEq)]
pub struct StepSizeTable {
    sizes: BTreeMap<i64, f64>,
    default: f64,
}

impl StepSizeTable {
    pub fn new(sizes: impl IntoIterator<Item = (i64, f64)>, default: f64) -> Self {
        Self {
            sizes: sizes.into_iter().collect(),
            default,
        }
    }

    pub fn lookup(&self, index: i64) -> f64 {
        self.sizes.get(&index).copied().unwrap_or(self.default)
    }
}

impl Default for StepSizeTable {
    fn default() -> Self {
        Self::new([(0, 1.0), (1, 10.0), (2, 100.0), (3, 1000.0)], 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_table_lookup() {
        let table = StepSizeTable::default();
        assert_eq!(table.lookup(0), 1.0);
        assert_eq!(table.lookup(2), 100.0);
        assert_eq!(table.lookup(3), 1000.0);
    }

    #[test]
    fn test_step_table_unknown_index_uses_default() {
        let table = StepSizeTable::new([(1, 0.5)], 0.25);
        for index in [-1, 0, 2, 7, i64::MAX, i64::MIN] {
            assert_eq!(table.lookup(index), 0.25);
        }
        assert_eq!(table.lookup(1), 0.5);
    }

    #[test]
    fn test_settings_map_typed_getters() {
        let mut map = SettingsMap::new();
        map.insert("switch_enabled", true);
        map.insert("delta_x", -4i64);
        map.insert("feedrate_percent", 50.0);
        map.insert("device_id", "TEENSY_OCP_001");

        assert_eq!(map.bool("switch_enabled"), Some(true));
        assert_eq!(map.int("delta_x"), Some(-4));
        assert_eq!(map.float("delta_x"), Some(-4.0));
        assert_eq!(map.float("feedrate_percent"), Some(50.0));
        assert_eq!(map.text("device_id"), Some("TEENSY_OCP_001"));
        assert_eq!(map.bool("device_id"), None);
        assert_eq!(map.len(), 4);
    }

    #[test]
    fn test_settings_map_serializes_flat() {
        let mut map = SettingsMap::new();
        map.insert("b", 2i64);
        map.insert("a", true);
        let json = serde_json::to_string(&map).unwrap();
        assert_eq!(json, r#"{"a":true,"b":2}"#);
    }
}

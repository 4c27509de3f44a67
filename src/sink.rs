//! Hand-off of decoded settings to the consumer.
//!
//! The motion-control backend is external; it only has to implement
//! [`SettingsSink`]. Each key is applied independently and the outcome
//! is reported per key, so one rejected value never blocks the rest.

use serde::Serialize;
use std::io::Write;

use crate::error::ApplyError;
use crate::settings::{SettingValue, SettingsMap};

/// Outcome of applying one settings map.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ApplyReport {
    pub applied: Vec<String>,
    pub failed: Vec<(String, ApplyError)>,
}

impl ApplyReport {
    pub fn record(&mut self, key: String, result: Result<(), ApplyError>) {
        match result {
            Ok(()) => self.applied.push(key),
            Err(reason) => self.failed.push((key, reason)),
        }
    }

    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }

    /// Log the report the way the main loop wants it.
    pub fn log(&self) {
        tracing::debug!("Applied {} settings", self.applied.len());
        if self.is_clean() {
            return;
        }
        for (key, reason) in &self.failed {
            tracing::warn!("Setting '{}' not applied: {}", key, reason);
        }
    }
}

/// Consumer of decoded settings.
pub trait SettingsSink: Send {
    fn apply(&mut self, settings: SettingsMap) -> ApplyReport;
}

/// Floats must be finite to reach the machine.
fn validate(value: &SettingValue) -> Result<(), ApplyError> {
    match value {
        SettingValue::Float(f) if !f.is_finite() => Err(ApplyError::NonFinite(*f)),
        _ => Ok(()),
    }
}

/// Logs every setting through `tracing`.
#[derive(Debug, Default)]
pub struct LogSink;

impl SettingsSink for LogSink {
    fn apply(&mut self, settings: SettingsMap) -> ApplyReport {
        let mut report = ApplyReport::default();
        for (key, value) in settings {
            let result = validate(&value);
            if result.is_ok() {
                tracing::info!("{} = {}", key, value);
            }
            report.record(key, result);
        }
        report
    }
}

#[derive(Serialize)]
struct JsonLine<'a> {
    timestamp: String,
    settings: &'a SettingsMap,
}

/// Writes one JSON object per message, e.g. to stdout for piping.
pub struct JsonLinesSink<W: Write + Send> {
    out: W,
}

impl<W: Write + Send> JsonLinesSink<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    #[cfg(test)]
    pub fn into_inner(self) -> W {
        self.out
    }

    fn write_line(&mut self, settings: &SettingsMap) -> Result<(), ApplyError> {
        let line = JsonLine {
            timestamp: chrono::Local::now().to_rfc3339(),
            settings,
        };
        let json = serde_json::to_string(&line)?;
        writeln!(self.out, "{json}")?;
        self.out.flush()?;
        Ok(())
    }
}

impl<W: Write + Send> SettingsSink for JsonLinesSink<W> {
    fn apply(&mut self, settings: SettingsMap) -> ApplyReport {
        let mut report = ApplyReport::default();
        let mut accepted = SettingsMap::new();

        for (key, value) in settings {
            match validate(&value) {
                Ok(()) => {
                    accepted.insert(key, value);
                }
                Err(reason) => report.record(key, Err(reason)),
            }
        }

        if accepted.is_empty() {
            return report;
        }

        let written = self.write_line(&accepted);
        for (key, _) in accepted {
            report.record(key, written.clone());
        }
        report
    }
}

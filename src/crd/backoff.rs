//! Exponential backoff settings carried in backup specs

use std::time::Duration;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub const DEFAULT_INITIAL_INTERVAL: Duration = Duration::from_millis(500);
pub const DEFAULT_MAX_INTERVAL: Duration = Duration::from_secs(60);
pub const DEFAULT_MAX_ELAPSED_TIME: Duration = Duration::from_secs(15 * 60);
pub const DEFAULT_MULTIPLIER: f64 = 1.5;

/// Backoff tuning for the status polling of a backup request
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ExponentialBackOffSpec {
    /// First retry interval, e.g. "500ms"
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub initial_interval: String,

    /// Upper bound for a single retry interval, e.g. "1m"
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub max_interval: String,

    /// Total time allowed since the backup object was created, e.g. "15m"
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub max_elapsed_time: String,
}

/// Parsed backoff settings
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BackoffSettings {
    pub initial_interval: Duration,
    pub max_interval: Duration,
    /// Zero disables the elapsed-time ceiling
    pub max_elapsed_time: Duration,
    pub multiplier: f64,
}

impl Default for BackoffSettings {
    fn default() -> Self {
        Self {
            initial_interval: DEFAULT_INITIAL_INTERVAL,
            max_interval: DEFAULT_MAX_INTERVAL,
            max_elapsed_time: DEFAULT_MAX_ELAPSED_TIME,
            multiplier: DEFAULT_MULTIPLIER,
        }
    }
}

impl BackoffSettings {
    /// Resolve settings from an optional spec; unset fields keep defaults
    pub fn from_spec(spec: Option<&ExponentialBackOffSpec>) -> Result<Self> {
        let mut settings = Self::default();
        let Some(spec) = spec else {
            return Ok(settings);
        };

        if !spec.initial_interval.is_empty() {
            settings.initial_interval = parse_field("initialInterval", &spec.initial_interval)?;
        }
        if !spec.max_interval.is_empty() {
            settings.max_interval = parse_field("maxInterval", &spec.max_interval)?;
        }
        if !spec.max_elapsed_time.is_empty() {
            settings.max_elapsed_time = parse_field("maxElapsedTime", &spec.max_elapsed_time)?;
        }

        Ok(settings)
    }

    /// Interval following `current`, capped at `max_interval`
    pub fn next_interval(&self, current: Duration) -> Duration {
        current.mul_f64(self.multiplier).min(self.max_interval)
    }
}

fn parse_field(field: &str, value: &str) -> Result<Duration> {
    parse_duration(value)
        .map_err(|e| Error::config(format!("failed to parse {}: {}", field, e)))
}

/// Parse a Go-style duration string such as "300ms", "1.5h" or "2h45m"
pub fn parse_duration(input: &str) -> Result<Duration> {
    let s = input.trim();
    if s.is_empty() {
        return Err(Error::config("invalid duration \"\""));
    }
    if s == "0" {
        return Ok(Duration::ZERO);
    }
    if s.starts_with('-') {
        return Err(Error::config(format!("negative duration {:?}", input)));
    }

    let invalid = || Error::config(format!("invalid duration {:?}", input));
    let mut rest = s.strip_prefix('+').unwrap_or(s);
    let mut total = 0f64;

    while !rest.is_empty() {
        let number_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .ok_or_else(|| Error::config(format!("missing unit in duration {:?}", input)))?;
        if number_len == 0 {
            return Err(invalid());
        }
        let value: f64 = rest[..number_len].parse().map_err(|_| invalid())?;
        rest = &rest[number_len..];

        let unit_len = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let nanos_per_unit = match &rest[..unit_len] {
            "ns" => 1.0,
            "us" | "µs" | "μs" => 1e3,
            "ms" => 1e6,
            "s" => 1e9,
            "m" => 60e9,
            "h" => 3600e9,
            unit => {
                return Err(Error::config(format!(
                    "unknown unit {:?} in duration {:?}",
                    unit, input
                )))
            }
        };
        total += value * nanos_per_unit;
        rest = &rest[unit_len..];
    }

    Ok(Duration::from_nanos(total.round() as u64))
}

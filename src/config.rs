//! Operator configuration from the environment

use std::time::Duration;

use crate::error::{Error, Result};

pub const DEFAULT_METRICS_PORT: u16 = 8080;
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Process-wide settings
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OperatorConfig {
    /// Port of the metrics and health server (`METRICS_PORT`)
    pub metrics_port: u16,
    /// Timeout of every call to a backup service (`HTTP_TIMEOUT_SECS`);
    /// for Dgraph exports it only bounds connecting
    pub http_timeout: Duration,
    /// Total timeout of a Dgraph export (`EXPORT_TIMEOUT_SECS`); `None` or 0
    /// waits until the export returns
    pub export_timeout: Option<Duration>,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            metrics_port: DEFAULT_METRICS_PORT,
            http_timeout: DEFAULT_HTTP_TIMEOUT,
            export_timeout: None,
        }
    }
}

impl OperatorConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the config from an arbitrary variable source
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(port) = lookup("METRICS_PORT") {
            config.metrics_port = port
                .trim()
                .parse()
                .map_err(|e| Error::config(format!("Invalid METRICS_PORT {:?}: {}", port, e)))?;
        }

        if let Some(secs) = lookup("HTTP_TIMEOUT_SECS") {
            let secs: u64 = secs
                .trim()
                .parse()
                .map_err(|e| Error::config(format!("Invalid HTTP_TIMEOUT_SECS {:?}: {}", secs, e)))?;
            if secs == 0 {
                return Err(Error::config("HTTP_TIMEOUT_SECS must be positive"));
            }
            config.http_timeout = Duration::from_secs(secs);
        }

        if let Some(secs) = lookup("EXPORT_TIMEOUT_SECS") {
            let secs: u64 = secs
                .trim()
                .parse()
                .map_err(|e| Error::config(format!("Invalid EXPORT_TIMEOUT_SECS {:?}: {}", secs, e)))?;
            config.export_timeout = (secs > 0).then(|| Duration::from_secs(secs));
        }

        Ok(config)
    }
}

//! Retry/backoff poller for asynchronous remote operations
//!
//! A probe is called until it succeeds, reports a permanent failure, the
//! elapsed-time ceiling would be crossed by the next wait, or the reconcile
//! is cancelled. Elapsed time is counted from an explicit origin so that the
//! ceiling bounds the whole workflow across reconcile calls.

use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::crd::BackoffSettings;

/// Outcome of a failed probe attempt
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProbeError {
    /// Not finished yet; retry after the next interval
    Transient(String),
    /// Finished with an error; stop retrying
    Permanent(String),
}

/// Why polling stopped without success
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PollFailure {
    /// The probe reported a permanent error
    Permanent(String),
    /// The elapsed-time ceiling was reached; carries the last transient error
    TimedOut(String),
    /// The surrounding reconcile was cancelled
    Cancelled,
}

impl std::fmt::Display for PollFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PollFailure::Permanent(msg) | PollFailure::TimedOut(msg) => f.write_str(msg),
            PollFailure::Cancelled => f.write_str("polling cancelled"),
        }
    }
}

/// Exponential backoff poller
#[derive(Clone, Debug)]
pub struct Poller {
    settings: BackoffSettings,
    origin: DateTime<Utc>,
}

impl Poller {
    /// Poller whose elapsed time starts now
    pub fn new(settings: BackoffSettings) -> Self {
        Self {
            settings,
            origin: Utc::now(),
        }
    }

    /// Count elapsed time from `origin` instead of now
    pub fn since(mut self, origin: DateTime<Utc>) -> Self {
        self.origin = origin;
        self
    }

    /// Time since the origin
    pub fn elapsed(&self) -> Duration {
        (Utc::now() - self.origin).to_std().unwrap_or_default()
    }

    /// True when the elapsed-time ceiling is already exceeded
    pub fn is_expired(&self) -> bool {
        let ceiling = self.settings.max_elapsed_time;
        !ceiling.is_zero() && self.elapsed() > ceiling
    }

    /// Run `probe` until it settles
    pub async fn retry<T, F, Fut>(
        &self,
        cancel: &CancellationToken,
        mut probe: F,
    ) -> Result<T, PollFailure>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ProbeError>>,
    {
        let ceiling = self.settings.max_elapsed_time;
        let mut interval = self.settings.initial_interval;
        let mut attempt: u32 = 0;

        loop {
            if cancel.is_cancelled() {
                return Err(PollFailure::Cancelled);
            }

            attempt += 1;
            let last = match probe().await {
                Ok(value) => return Ok(value),
                Err(ProbeError::Permanent(msg)) => return Err(PollFailure::Permanent(msg)),
                Err(ProbeError::Transient(msg)) => msg,
            };

            if !ceiling.is_zero() && self.elapsed() + interval > ceiling {
                debug!(attempt, error = %last, "Backoff elapsed time exhausted");
                return Err(PollFailure::TimedOut(last));
            }

            debug!(attempt, wait_ms = interval.as_millis() as u64, error = %last, "Retrying probe");

            tokio::select! {
                _ = cancel.cancelled() => return Err(PollFailure::Cancelled),
                _ = tokio::time::sleep(interval) => {}
            }

            interval = self.settings.next_interval(interval);
        }
    }
}

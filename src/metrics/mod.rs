//! Prometheus metrics for the backups operator

mod prometheus;

pub use prometheus::*;

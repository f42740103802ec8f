//! Backups Kubernetes Operator
//!
//! Drives ClickHouse and Dgraph backup requests through their lifecycles and
//! turns backup schedules into periodic backup requests with retention,
//! using Custom Resource Definitions (CRDs).

pub mod adapters;
pub mod config;
pub mod controllers;
pub mod crd;
pub mod error;
pub mod metrics;
pub mod reconcilers;
pub mod scheduler;
pub mod store;

pub use error::{Error, Result};

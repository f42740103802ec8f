//! Adapters for the external services the reconcilers drive

mod clickhouse;
mod dgraph;
mod export_storage;
mod resolver;
mod secrets;

pub use clickhouse::*;
pub use dgraph::*;
pub use export_storage::*;
pub use resolver::*;
pub use secrets::*;

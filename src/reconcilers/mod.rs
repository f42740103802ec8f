//! Reconcilers for the backup CRDs
//!
//! Reconcilers hold the business logic of each kind and talk to the cluster
//! only through [`crate::store::ObjectStore`] and the adapter traits:
//! - phase state machines for backup requests
//! - cron registration and retention for backup schedules
//! - finalizer-guarded remote cleanup

pub mod clickhouse_backup;
pub mod dgraph_backup;
pub mod endpoint;
pub mod finalizer;
pub mod poller;
pub mod schedule;
pub mod schedule_tasks;

use tracing::error;

use crate::crd::{Phase, PhaseEvent};
use crate::error::{Error, Result};

/// Move `phase` along the edge for `event`
///
/// Reconcilers only apply edges that exist for the phase they handle, so a
/// missing edge is a bug: it trips a debug assertion and leaves the phase as is.
pub(crate) fn advance(phase: &mut Phase, event: PhaseEvent) -> Result<()> {
    match phase.on(event) {
        Some(next) => {
            *phase = next;
            Ok(())
        }
        None => {
            error!(phase = %phase, event = ?event, "Rejected phase transition");
            debug_assert!(false, "no transition from {:?} on {:?}", phase, event);
            Err(Error::InvalidTransition(format!("{:?} on {:?}", phase, event)))
        }
    }
}

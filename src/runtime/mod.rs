//! # Runtime Layer
//!
//! Observation of live processes and reconciliation of those observations
//! with the declarative configuration.
//!
//! - [`ProcessCollaborator`] - narrow interface to whatever launches and
//!   inspects processes
//! - [`gather_facts`] - concurrent per-service observation with fault
//!   isolation
//! - [`RuntimeReconciler`] - folds [`LiveFacts`] into a snapshot
//! - [`spawn_poller`] - fixed-interval refresh with cancellation
//! - [`LocalProcessProbe`] - pid-file based collaborator for one host

mod local;
mod poller;
mod probe;
mod reconciler;

pub use local::{parse_lsof_ports, LocalProcessProbe};
pub use poller::{spawn_poller, PollerHandle};
pub use probe::{gather_facts, LiveFact, LiveFacts, ProbeError, ProcessCollaborator, ReconcileFault};
pub use reconciler::{Drift, PendingActions, Reconciled, RuntimeReconciler};

#[cfg(test)]
pub(crate) use probe::fake;

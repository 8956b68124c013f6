//! Suspension and resumption of runs.
//!
//! When a run cannot proceed because some inputs are missing, everything that
//! does not depend on them runs to completion and the remaining state is
//! captured in a [`SuspensionSnapshot`]. A later call to
//! [`Pipeline::resume`](crate::scheduler::Pipeline::resume) supplies the
//! missing inputs and finishes the run without re-executing completed work.

mod manager;
mod snapshot;
mod store;

pub use manager::SuspensionManager;
pub use snapshot::{SnapshotId, SuspensionSnapshot};
pub use store::{InMemorySuspensionStore, SuspensionStore};

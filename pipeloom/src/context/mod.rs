//! Per-run execution state.
//!
//! This module provides:
//! - Write-once slots that tasks await
//! - The execution context holding one slot per data node of a run

mod execution;
mod slot;

pub use execution::ExecutionContext;
pub use slot::{Slot, SlotState};

//! Running bound pipelines.
//!
//! A [`Runtime`] binds a [`Graph`](crate::graph::Graph) to module
//! implementations, producing a [`Pipeline`]. Each run spawns one task per
//! module node that has work to do; tasks wait on their input slots and run
//! as soon as the data arrives, so independent branches proceed in parallel.
//!
//! A run ends in one of three states:
//! - **Completed**: every requested output was produced or is unreachable
//! - **Failed**: a module node with the `Fail` policy returned an error
//! - **Suspended**: progress needs an input that was not supplied

mod plan;
mod result;
mod runtime;
#[cfg(test)]
mod scheduler_tests;
mod task;
mod worker_pool;

pub use result::{RunOptions, RunOutcome, RunResult, RunStatus};
pub use runtime::{Pipeline, Runtime};

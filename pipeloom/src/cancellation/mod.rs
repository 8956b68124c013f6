//! Cooperative cancellation.
//!
//! A [`CancellationToken`] is shared by every task of a run. Callers can hand
//! their own token to a run to abort it from outside.

mod token;

pub use token::{CancelCallback, CancellationToken, ChildToken};

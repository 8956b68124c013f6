//! Structural values and types that flow between modules.
//!
//! Every data node in a pipeline graph holds a [`Value`]. Values are
//! serializable and have a canonical byte form, which is what cache keys and
//! suspension snapshots are built from. [`Type`] describes the shape a value
//! must have and is used to validate remote module responses.

mod types;
mod repr;

pub use types::{Type, TypeMismatch};
pub use repr::Value;

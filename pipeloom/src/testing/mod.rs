//! Testing utilities for pipeloom pipelines.
//!
//! This module provides:
//! - Mock modules that count, fail, sleep or measure overlap
//! - Fixture modules and graphs
//! - A loopback transport for remote modules

mod fixtures;
mod mocks;
mod transport;

pub use fixtures::{add_graph, add_module, inputs, uppercase_graph, uppercase_module};
pub use mocks::{
    CountingModule, FailingModule, FlakyModule, GaugeModule, RecordingModule, SlowModule,
};
pub use transport::LoopbackTransport;

//! # Pipeloom
//!
//! A runtime for typed pipelines compiled ahead of time into a dataflow graph.
//!
//! Pipeloom provides:
//!
//! - **Graph execution**: module nodes run as soon as their inputs are
//!   written, so independent branches proceed in parallel
//! - **Resilient module calls**: retry, timeout, fallback, caching,
//!   throttling, concurrency limits and circuit breakers, configured per call
//! - **Suspend and resume**: runs missing an input pause into a portable
//!   snapshot and continue later without redoing finished work
//! - **Event-driven observability**: lifecycle events plus `tracing` spans
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use pipeloom::prelude::*;
//! use std::sync::Arc;
//!
//! let graph = GraphBuilder::new("greet", "1")
//!     .input("text", Type::String)
//!     .output("result", Type::String)
//!     .module(ModuleNode::new("upper", "Uppercase").input("text", "text").output("result"))
//!     .build()?;
//!
//! let runtime = Runtime::new(RuntimeConfig::from_env(), Arc::new(Registries::new()));
//! let pipeline = runtime.bind(Arc::new(graph), &ModuleBindings::new().with(uppercase))?;
//! let result = pipeline.run(inputs).await?;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod cancellation;
pub mod config;
pub mod context;
pub mod errors;
pub mod events;
pub mod graph;
pub mod module;
pub mod observability;
pub mod resilience;
pub mod scheduler;
pub mod suspension;
pub mod testing;
pub mod value;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::cancellation::CancellationToken;
    pub use crate::config::RuntimeConfig;
    pub use crate::errors::{
        ErrorClass, GraphError, ModuleError, NodeFailure, PipeloomError, StoreError,
    };
    pub use crate::events::{EventSink, LoggingEventSink, NoOpEventSink};
    pub use crate::graph::{
        CallOptions, ErrorPolicy, Graph, GraphBuilder, GraphDef, ModuleNode, NodeId,
    };
    pub use crate::module::{
        AsyncFnModule, FnModule, Module, ModuleBindings, ModuleDeclaration, RemoteModule,
        Transport,
    };
    pub use crate::observability::{init_logging, LoggingConfig};
    pub use crate::resilience::{
        BackoffStrategy, CacheBackend, InMemoryCacheBackend, JitterStrategy, Registries,
        RetryOptions,
    };
    pub use crate::scheduler::{Pipeline, RunOptions, RunOutcome, RunResult, RunStatus, Runtime};
    pub use crate::suspension::{
        InMemorySuspensionStore, SnapshotId, SuspensionSnapshot, SuspensionStore,
    };
    pub use crate::value::{Type, Value};
}

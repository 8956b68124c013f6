//! Pipeline graph representation.
//!
//! A pipeline is a directed acyclic graph of two node kinds: data nodes hold
//! single-assignment values and module nodes invoke named modules, reading
//! some data nodes and writing others. Graphs are immutable once built and
//! may be shared across concurrent runs.

mod builder;
mod node;
mod options;
mod topology;

pub use builder::GraphBuilder;
pub use node::{DataNode, InputEdge, ModuleNode, NodeId, OutputEdge};
pub use options::{
    CacheOptions, CallOptions, CircuitBreakerOptions, ConcurrencyOptions, ErrorPolicy,
    ThrottleOptions,
};
pub use topology::{Graph, GraphDef};

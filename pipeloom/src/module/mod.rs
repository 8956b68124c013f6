//! Module contract and bindings.
//!
//! A [`Module`] is the unit of work a module node invokes. Implementations
//! may run in-process ([`FnModule`], [`AsyncFnModule`]) or behind a
//! [`Transport`] ([`RemoteModule`]). [`ModuleBindings`] maps the names used in
//! a graph to implementations.

mod bindings;
mod contract;
mod remote;

pub use bindings::ModuleBindings;
pub use contract::{AsyncFnModule, FnModule, Module, ModuleDeclaration};
pub use remote::{RemoteModule, Transport, TransportError};

//! Mapping from module names to implementations.

use super::{Module, ModuleDeclaration};
use crate::graph::CallOptions;
use std::collections::HashMap;
use std::sync::Arc;

/// The set of module implementations a graph is bound against.
#[derive(Debug, Clone, Default)]
pub struct ModuleBindings {
    modules: HashMap<String, Arc<dyn Module>>,
    declarations: HashMap<String, ModuleDeclaration>,
}

impl ModuleBindings {
    /// Creates an empty set of bindings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds a module under its own name, replacing any previous binding.
    pub fn insert(&mut self, module: Arc<dyn Module>) {
        self.modules.insert(module.name().to_string(), module);
    }

    /// Binds a module and returns `self`.
    #[must_use]
    pub fn with(mut self, module: Arc<dyn Module>) -> Self {
        self.insert(module);
        self
    }

    /// Binds a module together with its declaration.
    #[must_use]
    pub fn with_declared(mut self, declaration: ModuleDeclaration, module: Arc<dyn Module>) -> Self {
        self.modules.insert(declaration.name.clone(), module);
        self.declarations
            .insert(declaration.name.clone(), declaration);
        self
    }

    /// Returns the implementation bound to a name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Arc<dyn Module>> {
        self.modules.get(name)
    }

    /// Returns the declaration for a name, if one was registered.
    #[must_use]
    pub fn declaration(&self, name: &str) -> Option<&ModuleDeclaration> {
        self.declarations.get(name)
    }

    /// Resolves the options a node should use.
    ///
    /// Nodes that leave every option at its default inherit the module's
    /// declared options.
    #[must_use]
    pub fn effective_options(&self, module: &str, node_options: &CallOptions) -> CallOptions {
        match self.declarations.get(module) {
            Some(decl) if *node_options == CallOptions::default() => decl.options.clone(),
            _ => node_options.clone(),
        }
    }

    /// Returns the number of bound modules.
    #[must_use]
    pub fn len(&self) -> usize {
        self.modules.len()
    }

    /// Returns true if nothing is bound.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}

//! Ready-made modules and graphs for pipeline tests.

use std::collections::HashMap;
use std::sync::Arc;

use crate::errors::{GraphError, ModuleError};
use crate::graph::{Graph, GraphBuilder, ModuleNode};
use crate::module::{FnModule, Module};
use crate::value::{Type, Value};

/// Builds a pipeline input map from `(name, value)` pairs.
#[must_use]
pub fn inputs<K, I>(pairs: I) -> HashMap<String, Value>
where
    K: Into<String>,
    I: IntoIterator<Item = (K, Value)>,
{
    pairs.into_iter().map(|(k, v)| (k.into(), v)).collect()
}

/// `Uppercase`: reads string field `text`, returns it uppercased.
#[must_use]
pub fn uppercase_module() -> Arc<dyn Module> {
    Arc::new(FnModule::new("Uppercase", |input: Value| {
        let text = input
            .field("text")
            .and_then(Value::as_str)
            .ok_or_else(|| ModuleError::validation("Uppercase", "field 'text' must be a string"))?;
        Ok(Value::from(text.to_uppercase()))
    }))
}

/// `Add`: reads int fields `a` and `b`, returns `{sum: a + b}`.
#[must_use]
pub fn add_module() -> Arc<dyn Module> {
    Arc::new(FnModule::new("Add", |input: Value| {
        let field = |name: &str| {
            input
                .field(name)
                .and_then(Value::as_int)
                .ok_or_else(|| ModuleError::validation("Add", format!("field '{name}' must be an int")))
        };
        let sum = field("a")?
            .checked_add(field("b")?)
            .ok_or_else(|| ModuleError::permanent("Add", "integer overflow"))?;
        Ok(Value::record([("sum", Value::Int(sum))]))
    }))
}

/// `text -> Uppercase -> result`.
///
/// # Errors
///
/// Never fails in practice; the graph is statically valid.
pub fn uppercase_graph() -> Result<Graph, GraphError> {
    GraphBuilder::new("uppercase", "1")
        .input("text", Type::String)
        .output("result", Type::String)
        .module(
            ModuleNode::new("upper", "Uppercase")
                .input("text", "text")
                .output("result"),
        )
        .build()
}

/// `(a, b) -> Add -> sum`, routing the `sum` field of the result.
///
/// # Errors
///
/// Never fails in practice; the graph is statically valid.
pub fn add_graph() -> Result<Graph, GraphError> {
    GraphBuilder::new("add", "1")
        .input("a", Type::Int)
        .input("b", Type::Int)
        .output("sum", Type::Int)
        .module(
            ModuleNode::new("add", "Add")
                .input("a", "a")
                .input("b", "b")
                .output_field("sum", "sum"),
        )
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_add_module() {
        let out = add_module()
            .execute(Value::record([("a", Value::Int(2)), ("b", Value::Int(3))]))
            .await
            .unwrap();
        assert_eq!(out.field("sum"), Some(&Value::Int(5)));
    }

    #[tokio::test]
    async fn test_uppercase_module_rejects_non_string() {
        let err = uppercase_module()
            .execute(Value::record([("text", Value::Int(1))]))
            .await
            .unwrap_err();
        assert!(matches!(err, ModuleError::Validation { .. }));
    }

    #[test]
    fn test_fixture_graphs_build() {
        assert_eq!(uppercase_graph().unwrap().topological_order().len(), 1);
        assert_eq!(add_graph().unwrap().inputs().len(), 2);
    }
}

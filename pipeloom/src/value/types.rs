//! Structural types and value checking.

use super::Value;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// The declared shape of a value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "of", rename_all = "snake_case")]
pub enum Type {
    /// Accepts any value.
    Any,
    /// The unit type.
    Null,
    /// Booleans.
    Bool,
    /// Integers.
    Int,
    /// Floats.
    Float,
    /// Strings.
    String,
    /// Lists whose items all have the given type.
    List(Box<Type>),
    /// String-keyed maps whose values all have the given type.
    Map(Box<Type>),
    /// Records that have at least the given fields.
    Record(BTreeMap<String, Type>),
    /// Tagged unions over the given cases.
    Union(BTreeMap<String, Type>),
    /// Optional values of the given type.
    Optional(Box<Type>),
}

/// A value did not match a type.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("at {path}: expected {expected}, found {found}")]
pub struct TypeMismatch {
    /// Where in the value the mismatch occurred, e.g. `$.items[2]`.
    pub path: String,
    /// The expected type.
    pub expected: String,
    /// What was found instead.
    pub found: String,
}

impl Type {
    /// Creates a list type.
    #[must_use]
    pub fn list(item: Type) -> Self {
        Self::List(Box::new(item))
    }

    /// Creates a map type.
    #[must_use]
    pub fn map(value: Type) -> Self {
        Self::Map(Box::new(value))
    }

    /// Creates an optional type.
    #[must_use]
    pub fn optional(inner: Type) -> Self {
        Self::Optional(Box::new(inner))
    }

    /// Creates a record type from `(field, type)` pairs.
    #[must_use]
    pub fn record<K, I>(fields: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Type)>,
    {
        Self::Record(fields.into_iter().map(|(k, t)| (k.into(), t)).collect())
    }

    /// Creates a union type from `(tag, type)` pairs.
    #[must_use]
    pub fn union<K, I>(cases: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Type)>,
    {
        Self::Union(cases.into_iter().map(|(k, t)| (k.into(), t)).collect())
    }

    /// Checks that a value has this type.
    ///
    /// Records are checked structurally: declared fields must be present and
    /// match, extra fields are allowed.
    ///
    /// # Errors
    ///
    /// Returns the first mismatch found, with its path inside the value.
    pub fn check(&self, value: &Value) -> Result<(), TypeMismatch> {
        self.check_at("$", value)
    }

    fn check_at(&self, path: &str, value: &Value) -> Result<(), TypeMismatch> {
        let mismatch = || TypeMismatch {
            path: path.to_string(),
            expected: self.to_string(),
            found: value.kind().to_string(),
        };

        match (self, value) {
            (Self::Any, _)
            | (Self::Null, Value::Null)
            | (Self::Bool, Value::Bool(_))
            | (Self::Int, Value::Int(_))
            | (Self::Float, Value::Float(_))
            | (Self::String, Value::String(_)) => Ok(()),
            (Self::List(item), Value::List(items)) => {
                for (i, v) in items.iter().enumerate() {
                    item.check_at(&format!("{path}[{i}]"), v)?;
                }
                Ok(())
            }
            (Self::Map(inner), Value::Map(entries)) => {
                for (k, v) in entries {
                    inner.check_at(&format!("{path}.{k}"), v)?;
                }
                Ok(())
            }
            (Self::Record(fields), Value::Record(values)) => {
                for (name, ty) in fields {
                    let field_path = format!("{path}.{name}");
                    match values.get(name) {
                        Some(v) => ty.check_at(&field_path, v)?,
                        None => {
                            return Err(TypeMismatch {
                                path: field_path,
                                expected: ty.to_string(),
                                found: "missing field".to_string(),
                            })
                        }
                    }
                }
                Ok(())
            }
            (Self::Union(cases), Value::Union { tag, value: inner }) => match cases.get(tag) {
                Some(ty) => ty.check_at(&format!("{path}<{tag}>"), inner),
                None => Err(TypeMismatch {
                    path: path.to_string(),
                    expected: self.to_string(),
                    found: format!("union case '{tag}'"),
                }),
            },
            (Self::Optional(_), Value::Optional(None) | Value::Null) => Ok(()),
            (Self::Optional(inner), Value::Optional(Some(v))) => inner.check_at(path, v),
            _ => Err(mismatch()),
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Any => write!(f, "Any"),
            Self::Null => write!(f, "Null"),
            Self::Bool => write!(f, "Bool"),
            Self::Int => write!(f, "Int"),
            Self::Float => write!(f, "Float"),
            Self::String => write!(f, "String"),
            Self::List(item) => write!(f, "List<{item}>"),
            Self::Map(value) => write!(f, "Map<{value}>"),
            Self::Optional(inner) => write!(f, "Optional<{inner}>"),
            Self::Record(fields) => {
                let parts: Vec<_> = fields.iter().map(|(k, t)| format!("{k}: {t}")).collect();
                write!(f, "Record{{{}}}", parts.join(", "))
            }
            Self::Union(cases) => {
                let parts: Vec<_> = cases.iter().map(|(k, t)| format!("{k}({t})")).collect();
                write!(f, "Union[{}]", parts.join(" | "))
            }
        }
    }
}

//! Modules executed across a transport boundary.

use super::{Module, ModuleDeclaration};
use crate::errors::ModuleError;
use crate::value::Value;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::warn;

/// Errors raised by a transport.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The remote side could not be reached.
    #[error("connection failed: {0}")]
    Connection(String),

    /// The remote side reported an error.
    #[error("remote error: {0}")]
    Remote(String),
}

/// Carries serialized requests to a remote module and returns the response.
#[async_trait]
pub trait Transport: Send + Sync + fmt::Debug {
    /// Sends a request payload for `module` and returns the response payload.
    async fn round_trip(&self, module: &str, payload: Vec<u8>) -> Result<Vec<u8>, TransportError>;
}

/// A module whose implementation lives behind a [`Transport`].
///
/// Requests and responses use the canonical value encoding. Responses are
/// checked against the declared output type because nothing else vouches for
/// what crossed the boundary.
#[derive(Debug, Clone)]
pub struct RemoteModule {
    declaration: ModuleDeclaration,
    transport: Arc<dyn Transport>,
}

impl RemoteModule {
    /// Creates a remote module.
    #[must_use]
    pub fn new(declaration: ModuleDeclaration, transport: Arc<dyn Transport>) -> Self {
        Self {
            declaration,
            transport,
        }
    }

    /// Returns the declaration.
    #[must_use]
    pub fn declaration(&self) -> &ModuleDeclaration {
        &self.declaration
    }
}

#[async_trait]
impl Module for RemoteModule {
    fn name(&self) -> &str {
        &self.declaration.name
    }

    async fn execute(&self, input: Value) -> Result<Value, ModuleError> {
        let name = self.name();
        let payload = input
            .to_canonical_bytes()
            .map_err(|e| ModuleError::validation(name, format!("cannot encode request: {e}")))?;

        let response = self
            .transport
            .round_trip(name, payload)
            .await
            .map_err(|e| ModuleError::execution(name, e.to_string()))?;

        let value = Value::from_canonical_bytes(&response)
            .map_err(|e| ModuleError::validation(name, format!("malformed response: {e}")))?;

        if let Err(mismatch) = self.declaration.output.check(&value) {
            warn!(module = %name, error = %mismatch, "Remote response failed type check");
            return Err(ModuleError::validation(
                name,
                format!("response does not match {}: {mismatch}", self.declaration.output),
            ));
        }

        Ok(value)
    }
}

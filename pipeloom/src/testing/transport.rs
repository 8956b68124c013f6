//! In-process transport for exercising remote modules.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;

use crate::module::{Module, Transport, TransportError};
use crate::value::Value;

#[derive(Debug)]
enum Behavior {
    Serve(Arc<dyn Module>),
    Respond(Vec<u8>),
    Refuse(String),
}

/// A transport that decodes requests and serves them from a local module.
///
/// It can also be configured to return fixed bytes or to refuse connections,
/// to test how remote modules handle bad peers.
#[derive(Debug)]
pub struct LoopbackTransport {
    behavior: Behavior,
    requests: Mutex<Vec<String>>,
}

impl LoopbackTransport {
    /// Serves every request from `module`.
    #[must_use]
    pub fn new(module: Arc<dyn Module>) -> Self {
        Self::with(Behavior::Serve(module))
    }

    /// Answers every request with `bytes`.
    #[must_use]
    pub fn responding(bytes: Vec<u8>) -> Self {
        Self::with(Behavior::Respond(bytes))
    }

    /// Fails every request with a connection error.
    #[must_use]
    pub fn refusing(reason: impl Into<String>) -> Self {
        Self::with(Behavior::Refuse(reason.into()))
    }

    fn with(behavior: Behavior) -> Self {
        Self {
            behavior,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Returns the module names requested so far.
    #[must_use]
    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl Transport for LoopbackTransport {
    async fn round_trip(&self, module: &str, payload: Vec<u8>) -> Result<Vec<u8>, TransportError> {
        self.requests.lock().push(module.to_string());
        match &self.behavior {
            Behavior::Serve(target) => {
                let input = Value::from_canonical_bytes(&payload)
                    .map_err(|e| TransportError::Remote(format!("bad request: {e}")))?;
                let output = target
                    .execute(input)
                    .await
                    .map_err(|e| TransportError::Remote(e.to_string()))?;
                output
                    .to_canonical_bytes()
                    .map_err(|e| TransportError::Remote(e.to_string()))
            }
            Behavior::Respond(bytes) => Ok(bytes.clone()),
            Behavior::Refuse(reason) => Err(TransportError::Connection(reason.clone())),
        }
    }
}

//! Result caching keyed by module name and input.

use super::{CallInfo, Decorator, Next};
use crate::errors::ModuleError;
use crate::events::{emit_event, EventSink};
use crate::value::Value;
use async_trait::async_trait;
use dashmap::DashMap;
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// Storage for cached module results.
#[async_trait]
pub trait CacheBackend: Send + Sync + fmt::Debug {
    /// Returns the cached value for a key if present and not expired.
    async fn get(&self, key: &str) -> Option<Value>;

    /// Stores a value for a key.
    async fn put(&self, key: &str, value: Value, ttl: Duration);

    /// Removes a key.
    async fn invalidate(&self, key: &str);
}

#[derive(Debug, Clone)]
struct CacheEntry {
    value: Value,
    expires_at: Instant,
}

/// An in-memory cache backend.
#[derive(Debug, Default)]
pub struct InMemoryCacheBackend {
    entries: DashMap<String, CacheEntry>,
}

impl InMemoryCacheBackend {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored entries, including expired ones.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Removes every entry.
    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Drops expired entries.
    pub fn purge_expired(&self) {
        let now = Instant::now();
        self.entries.retain(|_, entry| entry.expires_at > now);
    }
}

#[async_trait]
impl CacheBackend for InMemoryCacheBackend {
    async fn get(&self, key: &str) -> Option<Value> {
        let now = Instant::now();
        let hit = self.entries.get(key).and_then(|entry| {
            if entry.expires_at > now {
                Some(entry.value.clone())
            } else {
                None
            }
        });
        if hit.is_none() {
            self.entries.remove_if(key, |_, entry| entry.expires_at <= now);
        }
        hit
    }

    async fn put(&self, key: &str, value: Value, ttl: Duration) {
        self.entries.insert(
            key.to_string(),
            CacheEntry {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
    }

    async fn invalidate(&self, key: &str) {
        self.entries.remove(key);
    }
}

/// Computes the cache key for a call.
///
/// The key is the module name plus a SHA-256 digest of the input's canonical
/// serialization.
///
/// # Errors
///
/// Returns a validation error if the input cannot be serialized.
pub fn cache_key(module: &str, input: &Value) -> Result<String, ModuleError> {
    let bytes = input
        .to_canonical_bytes()
        .map_err(|e| ModuleError::validation(module, format!("cannot serialize input: {e}")))?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(format!("{module}:{}", hex::encode(hasher.finalize())))
}

/// Serves repeated calls from a cache backend.
pub struct CacheDecorator {
    backend: Arc<dyn CacheBackend>,
    ttl: Duration,
    events: Arc<dyn EventSink>,
}

impl CacheDecorator {
    /// Creates a cache decorator.
    #[must_use]
    pub fn new(backend: Arc<dyn CacheBackend>, ttl: Duration, events: Arc<dyn EventSink>) -> Self {
        Self {
            backend,
            ttl,
            events,
        }
    }
}

#[async_trait]
impl Decorator for CacheDecorator {
    fn name(&self) -> &'static str {
        "cache"
    }

    async fn call(
        &self,
        info: &CallInfo,
        input: Value,
        next: Next<'_>,
    ) -> Result<Value, ModuleError> {
        let key = cache_key(&info.module, &input)?;

        if let Some(value) = self.backend.get(&key).await {
            debug!(module = %info.module, node = %info.node, "Cache hit");
            emit_event(
                self.events.as_ref(),
                "cache.hit",
                serde_json::json!({
                    "run_id": info.run_id.to_string(),
                    "node": info.node.as_str(),
                    "module": info.module,
                }),
            );
            return Ok(value);
        }

        let value = next.run(input).await?;
        self.backend.put(&key, value.clone(), self.ttl).await;
        Ok(value)
    }
}

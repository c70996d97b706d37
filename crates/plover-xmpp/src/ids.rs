//! Stream and stanza id generation.
//!
//! Streams need fresh ids at several points (stream headers, bind
//! requests, dialback attempts). Generation is behind a capability so
//! embedders and tests can supply deterministic ids.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Id generation capability.
pub trait IdGenerator: Send + Sync {
    /// Produce a fresh unique id.
    fn generate(&self) -> String;
}

/// Default generator: random UUIDs.
#[derive(Debug, Default)]
pub struct UuidGenerator;

impl IdGenerator for UuidGenerator {
    fn generate(&self) -> String {
        uuid::Uuid::new_v4().to_string()
    }
}

/// Deterministic generator: a fixed prefix with a counter suffix.
#[derive(Debug)]
pub struct SequentialGenerator {
    prefix: String,
    counter: AtomicU64,
}

impl SequentialGenerator {
    /// Create a generator producing `prefix-1`, `prefix-2`, ...
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            counter: AtomicU64::new(0),
        }
    }
}

impl IdGenerator for SequentialGenerator {
    fn generate(&self) -> String {
        let n = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        format!("{}-{}", self.prefix, n)
    }
}

/// The default shared generator.
pub fn default_generator() -> Arc<dyn IdGenerator> {
    Arc::new(UuidGenerator)
}

/******************************************************************************
 * Copyright ContinuousC. Licensed under the "Elastic License 2.0".           *
 ******************************************************************************/

//! Engine cache: database engines are per-worker and cached per
//! `(dialect, credentials, endpoint)` tuple (spec.md §5's "Shared
//! resources"), so that two batches against the same source reuse one
//! connection instead of opening a fresh one each time. Interior
//! mutability follows the teacher's pervasive `parking_lot` use for
//! shared caches (`daemon/dual_versioned_data.rs`, `daemon/state.rs`).

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::sql::SqlSource;

/// Identifies one distinct engine connection: dialect plus the
/// credential/endpoint coordinates that would otherwise force a fresh
/// connection per call site.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EngineKey {
    pub dialect: String,
    pub endpoint: String,
    pub username: Option<String>,
}

impl EngineKey {
    pub fn new(dialect: impl Into<String>, endpoint: impl Into<String>, username: Option<String>) -> Self {
        Self {
            dialect: dialect.into(),
            endpoint: endpoint.into(),
            username,
        }
    }
}

/// A cache of already-opened engine handles, keyed by
/// `(dialect, credentials, endpoint)`. One `EngineCache` is owned per
/// worker; it is not shared across workers, matching spec.md's "the
/// engine cache must be per-worker" redesign note.
#[derive(Clone, Default)]
pub struct EngineCache {
    engines: Arc<Mutex<HashMap<EngineKey, Arc<dyn SqlSource>>>>,
}

impl EngineCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached engine for `key`, or open one via `open` and
    /// cache it. `open` only runs on a cache miss.
    pub fn get_or_open<F>(&self, key: EngineKey, open: F) -> Arc<dyn SqlSource>
    where
        F: FnOnce() -> Arc<dyn SqlSource>,
    {
        let mut engines = self.engines.lock();
        engines.entry(key).or_insert_with(open).clone()
    }

    pub fn len(&self) -> usize {
        self.engines.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.engines.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sql::memory::MemorySource;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn repeated_lookups_with_the_same_key_reuse_one_engine() {
        let cache = EngineCache::new();
        let opens = Arc::new(AtomicUsize::new(0));
        let key = EngineKey::new("generic", "db://host/a", Some("u".to_string()));

        for _ in 0..3 {
            let opens = opens.clone();
            cache.get_or_open(key.clone(), || {
                opens.fetch_add(1, Ordering::SeqCst);
                Arc::new(MemorySource::new("generic", vec![]))
            });
        }

        assert_eq!(opens.load(Ordering::SeqCst), 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn distinct_endpoints_get_distinct_engines() {
        let cache = EngineCache::new();
        cache.get_or_open(EngineKey::new("generic", "db://a", None), || {
            Arc::new(MemorySource::new("generic", vec![]))
        });
        cache.get_or_open(EngineKey::new("generic", "db://b", None), || {
            Arc::new(MemorySource::new("generic", vec![]))
        });
        assert_eq!(cache.len(), 2);
    }
}

//! LRU cache of compiled read plans.
//!
//! Keyed by `"<physical table>:<canonical request JSON>"`; the canonical form
//! comes from the request types' sorted-map serialization. Statement *handle*
//! lifetime is owned by rusqlite's per-connection prepared-statement cache
//! (finalize on evict); this cache only avoids re-running the query compiler.

use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

use lru::LruCache;

use crate::error::{Result, StorageError};
use crate::sqlite::client::Statement;

pub const PLAN_CACHE_CAPACITY: usize = 500;

pub struct PlanCache {
    inner: Mutex<LruCache<String, Arc<Statement>>>,
}

impl PlanCache {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(LruCache::new(
                NonZeroUsize::new(PLAN_CACHE_CAPACITY).expect("capacity is non-zero"),
            )),
        }
    }

    /// Cache key for a request against a physical table.
    pub fn key<R: serde::Serialize>(table: &str, request: &R) -> Result<String> {
        let canonical = serde_json::to_string(request)?;
        Ok(format!("{table}:{canonical}"))
    }

    /// Returns the cached plan, building and inserting it on a miss.
    pub fn get_or_build(
        &self,
        key: String,
        build: impl FnOnce() -> Result<Statement>,
    ) -> Result<Arc<Statement>> {
        let mut cache = self
            .inner
            .lock()
            .map_err(|e| StorageError::Internal(format!("plan cache mutex poisoned: {e}")))?;
        if let Some(plan) = cache.get(&key) {
            return Ok(Arc::clone(plan));
        }
        let plan = Arc::new(build()?);
        cache.put(key, Arc::clone(&plan));
        Ok(plan)
    }

    /// Drops every entry whose key starts with the given table prefix
    /// (migration / drop invalidation).
    pub fn invalidate_prefix(&self, prefix: &str) {
        let Ok(mut cache) = self.inner.lock() else {
            return;
        };
        let stale: Vec<String> = cache
            .iter()
            .filter(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect();
        for key in stale {
            cache.pop(&key);
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.inner.lock().map(|c| c.len()).unwrap_or(0)
    }
}

impl Default for PlanCache {
    fn default() -> Self {
        Self::new()
    }
}

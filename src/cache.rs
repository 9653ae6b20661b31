//! In-memory caching of resolved variants.
//! Uses moka for TTL-based caching with LRU eviction.

use crate::orm::flag_assignments::Variant;
use moka::sync::Cache;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Shared cache of persisted assignments, keyed by `(flag_id, user_id)`.
///
/// Only variants that are stored in the database go in here. Clones share the
/// same underlying cache, so the resolver and the admin surface can hold one
/// each and still see each other's invalidations.
///
/// Every invalidation bumps a generation counter. A reader takes
/// `generation()` before it reads the store and passes it to `insert`, so a
/// variant read before a reset can never outlive that reset in the cache.
#[derive(Clone)]
pub struct AssignmentCache {
    inner: Option<Cache<(i32, Uuid), Variant>>,
    generation: Arc<AtomicU64>,
}

impl AssignmentCache {
    /// A zero TTL disables caching entirely.
    pub fn new(ttl: Duration, max_capacity: u64) -> Self {
        if ttl.is_zero() {
            return Self::disabled();
        }
        Self {
            inner: Some(
                Cache::builder()
                    .time_to_live(ttl)
                    .max_capacity(max_capacity)
                    .build(),
            ),
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn disabled() -> Self {
        Self {
            inner: None,
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Current invalidation generation.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    pub fn get(&self, flag_id: i32, user_id: Uuid) -> Option<Variant> {
        self.inner.as_ref()?.get(&(flag_id, user_id))
    }

    /// Cache a variant that was read from the store at `generation`.
    ///
    /// The entry is dropped again if an invalidation happened since. An
    /// invalidation racing with the check below clears the entry itself,
    /// because the insert is already visible to it.
    pub fn insert(&self, generation: u64, flag_id: i32, user_id: Uuid, variant: Variant) {
        if let Some(cache) = &self.inner {
            let key = (flag_id, user_id);
            cache.insert(key, variant);
            if self.generation() != generation {
                cache.invalidate(&key);
            }
        }
    }

    /// Drop every cached variant. Called after resets and deletions; those are
    /// rare enough that clearing everything is cheaper than tracking per flag.
    pub fn invalidate_all(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        if let Some(cache) = &self.inner {
            cache.invalidate_all();
        }
    }
}

impl std::fmt::Debug for AssignmentCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AssignmentCache")
            .field("enabled", &self.inner.is_some())
            .finish()
    }
}

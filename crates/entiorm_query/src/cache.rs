//! Compiled query cache.

use crate::error::QueryResult;
use crate::execution::CompiledQuery;
use entiorm_core::QueryTrackingBehavior;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Identifies one compiled query: the printed query shape, the provider and
/// the default tracking behavior it was compiled under.
///
/// Parameter values are not part of the key, so the same shape executed
/// with different values reuses one compilation. Entity roots are keyed by
/// entity type name only, so a cache must not be shared between models.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    query: String,
    provider: &'static str,
    tracking: QueryTrackingBehavior,
}

impl CacheKey {
    /// Creates a key.
    pub fn new(query: impl Into<String>, provider: &'static str, tracking: QueryTrackingBehavior) -> Self {
        Self {
            query: query.into(),
            provider,
            tracking,
        }
    }
}

/// Cache hit/miss counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Lookups answered from the cache.
    pub hits: u64,
    /// Lookups that compiled.
    pub misses: u64,
}

/// Bounded map from [`CacheKey`] to compiled query.
///
/// When full, an arbitrary entry is evicted before inserting. A capacity of
/// zero disables caching.
#[derive(Debug)]
pub struct CompiledQueryCache {
    capacity: usize,
    entries: RwLock<HashMap<CacheKey, Arc<CompiledQuery>>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl CompiledQueryCache {
    /// Creates a cache holding at most `capacity` queries.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: RwLock::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Returns the cached query for `key`, compiling and caching it on a miss.
    ///
    /// Compilation runs without holding the lock; when two callers race on
    /// the same key the first insertion wins.
    pub fn get_or_compile(
        &self,
        key: CacheKey,
        compile: impl FnOnce() -> QueryResult<CompiledQuery>,
    ) -> QueryResult<Arc<CompiledQuery>> {
        if let Some(compiled) = self.entries.read().get(&key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(compiled.clone());
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        let compiled = Arc::new(compile()?);
        if self.capacity == 0 {
            return Ok(compiled);
        }

        let mut entries = self.entries.write();
        if let Some(existing) = entries.get(&key) {
            return Ok(existing.clone());
        }
        if entries.len() >= self.capacity {
            if let Some(evicted) = entries.keys().next().cloned() {
                entries.remove(&evicted);
                tracing::trace!(query = %evicted.query, "evicted compiled query");
            }
        }
        entries.insert(key, compiled.clone());
        Ok(compiled)
    }

    /// Returns the number of cached queries.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Returns true if nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Drops every cached query.
    pub fn clear(&self) {
        self.entries.write().clear();
    }

    /// Returns the hit/miss counters.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::ShaperFn;
    use crate::execution::QueryPlan;
    use crate::expression::Expression;
    use crate::in_memory::ServerQuery;
    use crate::materializer::Materialized;
    use crate::shaper::ResultCardinality;
    use entiorm_core::{EntityType, Property, ScalarType};

    fn compiled() -> QueryResult<CompiledQuery> {
        let et = EntityType::builder("Blog")
            .property(Property::new("Id", ScalarType::Integer).key())
            .build()
            .unwrap();
        let shaper: ShaperFn = Arc::new(|_, _| Ok(Materialized::Null));
        Ok(CompiledQuery::new(
            QueryPlan::InMemory(ServerQuery::Table(et)),
            shaper,
            Expression::constant(0),
            ResultCardinality::Enumerable,
            false,
        ))
    }

    fn key(query: &str) -> CacheKey {
        CacheKey::new(query, "InMemory", QueryTrackingBehavior::TrackAll)
    }

    #[test]
    fn second_lookup_hits() {
        let cache = CompiledQueryCache::new(4);
        let a = cache.get_or_compile(key("q"), compiled).unwrap();
        let b = cache
            .get_or_compile(key("q"), || panic!("must not recompile"))
            .unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(cache.stats(), CacheStats { hits: 1, misses: 1 });
    }

    #[test]
    fn capacity_bounds_entries() {
        let cache = CompiledQueryCache::new(2);
        for q in ["a", "b", "c"] {
            cache.get_or_compile(key(q), compiled).unwrap();
        }
        assert_eq!(cache.len(), 2);

        let disabled = CompiledQueryCache::new(0);
        disabled.get_or_compile(key("a"), compiled).unwrap();
        assert!(disabled.is_empty());
    }

    #[test]
    fn tracking_is_part_of_the_key() {
        let cache = CompiledQueryCache::new(4);
        cache.get_or_compile(key("q"), compiled).unwrap();
        cache
            .get_or_compile(
                CacheKey::new("q", "InMemory", QueryTrackingBehavior::NoTracking),
                compiled,
            )
            .unwrap();
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn compile_errors_are_not_cached() {
        let cache = CompiledQueryCache::new(4);
        let err = cache
            .get_or_compile(key("q"), || {
                Err(crate::error::QueryError::translation("q", "unsupported"))
            })
            .unwrap_err();
        assert!(err.is_translation());
        assert!(cache.is_empty());
    }
}

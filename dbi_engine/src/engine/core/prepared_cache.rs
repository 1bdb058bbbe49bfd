use crate::engine::statement::DbiStatement;
use crate::error::{DbiError, Result};
use lru::LruCache;
use std::num::NonZeroUsize;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StatementCacheMetrics {
    pub cache_size: usize,
    pub cache_max_size: usize,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub evictions: u64,
}

impl StatementCacheMetrics {
    pub fn hit_ratio(&self) -> f64 {
        let total = self.cache_hits + self.cache_misses;
        if total == 0 {
            0.0
        } else {
            self.cache_hits as f64 / total as f64
        }
    }
}

/// Host-side statements keyed by SQL text, least recently used first out.
///
/// Evicted statements are handed back so the caller can run PrepareClose
/// on them.
pub struct StatementCache {
    cache: LruCache<String, DbiStatement>,
    max_size: usize,
    cache_hits: u64,
    cache_misses: u64,
    evictions: u64,
}

impl StatementCache {
    pub fn new(max_size: usize) -> Self {
        let capacity = NonZeroUsize::new(max_size).unwrap_or(NonZeroUsize::MIN);
        Self {
            cache: LruCache::new(capacity),
            max_size: capacity.get(),
            cache_hits: 0,
            cache_misses: 0,
            evictions: 0,
        }
    }

    /// Returns the statement for `sql`, creating it on a miss, plus the
    /// statement that had to be evicted to make room.
    pub fn get_or_insert(
        &mut self,
        sql: &str,
    ) -> Result<(&mut DbiStatement, Option<DbiStatement>)> {
        let evicted = if self.cache.contains(sql) {
            self.cache_hits += 1;
            None
        } else {
            self.cache_misses += 1;
            let pushed = self.cache.push(sql.to_string(), DbiStatement::new(sql));
            pushed.map(|(_, stmt)| stmt)
        };
        if evicted.is_some() {
            self.evictions += 1;
        }
        let stmt = self.cache.get_mut(sql).ok_or_else(|| {
            DbiError::InternalError(format!("statement cache lost entry for {}", sql))
        })?;
        Ok((stmt, evicted))
    }

    pub fn get_mut(&mut self, sql: &str) -> Option<&mut DbiStatement> {
        self.cache.get_mut(sql)
    }

    pub fn remove(&mut self, sql: &str) -> Option<DbiStatement> {
        self.cache.pop(sql)
    }

    /// Empties the cache, returning every statement for PrepareClose.
    pub fn drain(&mut self) -> Vec<DbiStatement> {
        let mut out = Vec::with_capacity(self.cache.len());
        while let Some((_, stmt)) = self.cache.pop_lru() {
            out.push(stmt);
        }
        out
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn metrics(&self) -> StatementCacheMetrics {
        StatementCacheMetrics {
            cache_size: self.len(),
            cache_max_size: self.max_size,
            cache_hits: self.cache_hits,
            cache_misses: self.cache_misses,
            evictions: self.evictions,
        }
    }
}

//! The shared metadata cache: a single immutable snapshot pointer,
//! TTL-bounded with explicit invalidation (spec §4.3.3, §9 "Shared cache
//! without GC"). Readers take a reference to the current `Arc`; writers
//! publish a new one — no in-place mutation, no GC.

use std::time::{Duration, Instant};

use arc_swap::ArcSwapOption;
use serde::Serialize;

use crate::protocol::{CatalogEntry, TemplateEntry};

/// A built projection of the four catalog kinds, versioned so clients
/// can detect "no change since my last read".
#[derive(Debug, Clone, Serialize)]
pub struct CachedMetadata {
    pub tools: Vec<CatalogEntry>,
    pub prompts: Vec<CatalogEntry>,
    pub resources: Vec<CatalogEntry>,
    pub resource_templates: Vec<TemplateEntry>,
    pub version: u64,
    #[serde(skip)]
    pub built_at: Instant,
}

pub struct MetadataCache {
    ttl: Duration,
    current: ArcSwapOption<CachedMetadata>,
    version_counter: std::sync::atomic::AtomicU64,
}

impl MetadataCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            current: ArcSwapOption::empty(),
            version_counter: std::sync::atomic::AtomicU64::new(0),
        }
    }

    /// Returns the cached snapshot if present and fresh; `None` forces
    /// the caller to rebuild and `publish`.
    pub fn get_fresh(&self) -> Option<std::sync::Arc<CachedMetadata>> {
        let guard = self.current.load();
        match guard.as_ref() {
            Some(snapshot) if snapshot.built_at.elapsed() <= self.ttl => Some(snapshot.clone()),
            _ => None,
        }
    }

    /// Publish a freshly-built snapshot, bumping the monotonic version.
    pub fn publish(
        &self,
        tools: Vec<CatalogEntry>,
        prompts: Vec<CatalogEntry>,
        resources: Vec<CatalogEntry>,
        resource_templates: Vec<TemplateEntry>,
    ) -> std::sync::Arc<CachedMetadata> {
        let version = self.version_counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst) + 1;
        let snapshot = std::sync::Arc::new(CachedMetadata {
            tools,
            prompts,
            resources,
            resource_templates,
            version,
            built_at: Instant::now(),
        });
        self.current.store(Some(snapshot.clone()));
        snapshot
    }

    /// Drop the cache unconditionally; the next read rebuilds (spec:
    /// "Invalidation is explicit on any catalog mutation; TTL is a
    /// safety net").
    pub fn invalidate(&self) {
        self.current.store(None);
    }

    pub fn current_version(&self) -> Option<u64> {
        self.current.load().as_ref().map(|s| s.version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn empty_cache_has_no_fresh_snapshot() {
        let cache = MetadataCache::new(Duration::from_secs(30));
        assert!(cache.get_fresh().is_none());
    }

    #[test]
    fn published_snapshot_is_fresh_immediately() {
        let cache = MetadataCache::new(Duration::from_secs(30));
        cache.publish(vec![], vec![], vec![], vec![]);
        assert!(cache.get_fresh().is_some());
    }

    #[test]
    fn ttl_of_zero_makes_snapshot_immediately_stale() {
        let cache = MetadataCache::new(Duration::from_millis(0));
        cache.publish(vec![], vec![], vec![], vec![]);
        std::thread::sleep(Duration::from_millis(5));
        assert!(cache.get_fresh().is_none());
    }

    #[test]
    fn invalidate_forces_rebuild_even_within_ttl() {
        let cache = MetadataCache::new(Duration::from_secs(30));
        cache.publish(vec![], vec![], vec![], vec![]);
        cache.invalidate();
        assert!(cache.get_fresh().is_none());
    }

    #[test]
    fn version_is_monotonic_across_publishes() {
        let cache = MetadataCache::new(Duration::from_secs(30));
        let first = cache.publish(vec![], vec![], vec![], vec![]);
        let second = cache.publish(vec![], vec![], vec![], vec![]);
        assert_eq!(second.version, first.version + 1);
        assert_eq!(cache.current_version(), Some(second.version));
    }
}

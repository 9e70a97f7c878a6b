//! Cache manager - Registry of named regions
//!
//! Constructed explicitly and shared through `Arc`; there is no process-wide
//! instance. Regions are created lazily on first named access.

use parking_lot::RwLock;
use std::any::Any;
use std::collections::HashMap;
use std::hash::Hash;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use super::region::CacheRegion;
use super::stats::RegionStats;
use crate::core::config::{CacheConfig, RegionConfig};
use crate::core::{Error, Result};

/// Type-erased view of a region for manager-wide housekeeping.
trait Housekeeping: Send + Sync {
    fn cleanup_expired(&self) -> usize;
    fn stats(&self) -> RegionStats;
}

impl<K, V> Housekeeping for CacheRegion<K, V>
where
    K: Hash + Eq + Clone + Send + Sync,
    V: Clone + Send + Sync,
{
    fn cleanup_expired(&self) -> usize {
        CacheRegion::cleanup_expired(self)
    }

    fn stats(&self) -> RegionStats {
        CacheRegion::stats(self)
    }
}

struct RegionSlot {
    typed: Arc<dyn Any + Send + Sync>,
    erased: Arc<dyn Housekeeping>,
}

impl RegionSlot {
    fn new<K, V>(region: CacheRegion<K, V>) -> Self
    where
        K: Hash + Eq + Clone + Send + Sync + 'static,
        V: Clone + Send + Sync + 'static,
    {
        let region = Arc::new(region);
        Self {
            typed: region.clone(),
            erased: region,
        }
    }

    fn downcast<K, V>(&self, name: &str) -> Result<Arc<CacheRegion<K, V>>>
    where
        K: Hash + Eq + Clone + Send + Sync + 'static,
        V: Clone + Send + Sync + 'static,
    {
        Arc::clone(&self.typed)
            .downcast::<CacheRegion<K, V>>()
            .map_err(|_| {
                Error::Config(format!(
                    "cache region '{}' already exists with different key/value types",
                    name
                ))
            })
    }
}

/// Sizing applied when a region is created without explicit arguments.
#[derive(Debug, Clone)]
pub struct RegionDefaults {
    pub capacity: usize,
    pub ttl: Duration,
    pub overrides: Vec<RegionConfig>,
}

impl RegionDefaults {
    fn sizing_for(&self, name: &str) -> (usize, Duration) {
        self.overrides
            .iter()
            .find(|r| r.name == name)
            .map(|r| (r.capacity, r.ttl()))
            .unwrap_or((self.capacity, self.ttl))
    }
}

impl From<&CacheConfig> for RegionDefaults {
    fn from(config: &CacheConfig) -> Self {
        Self {
            capacity: config.default_capacity,
            ttl: config.default_ttl(),
            overrides: config.regions.clone(),
        }
    }
}

impl Default for RegionDefaults {
    fn default() -> Self {
        RegionDefaults::from(&CacheConfig::default())
    }
}

/// Registry of named cache regions.
pub struct CacheManager {
    regions: RwLock<HashMap<String, RegionSlot>>,
    defaults: RegionDefaults,
}

impl CacheManager {
    pub fn new(defaults: RegionDefaults) -> Self {
        Self {
            regions: RwLock::new(HashMap::new()),
            defaults,
        }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(RegionDefaults::from(config))
    }

    /// Return the region called `name`, creating it on first access.
    ///
    /// Idempotent by name: once a region exists, `capacity` and `ttl` of
    /// later calls are ignored.
    pub fn get_or_create_region<K, V>(
        &self,
        name: &str,
        capacity: usize,
        ttl: Duration,
    ) -> Result<Arc<CacheRegion<K, V>>>
    where
        K: Hash + Eq + Clone + Send + Sync + 'static,
        V: Clone + Send + Sync + 'static,
    {
        if name.is_empty() {
            return Err(Error::Config("cache region name must not be empty".into()));
        }
        let capacity = NonZeroUsize::new(capacity).ok_or_else(|| {
            Error::Config(format!("cache region '{}' capacity must be > 0", name))
        })?;

        if let Some(slot) = self.regions.read().get(name) {
            return slot.downcast(name);
        }

        let mut regions = self.regions.write();
        let slot = regions.entry(name.to_string()).or_insert_with(|| {
            info!(
                region = name,
                capacity = capacity.get(),
                ttl_ms = ttl.as_millis() as u64,
                "📦 Created cache region"
            );
            RegionSlot::new(CacheRegion::<K, V>::new(name, capacity, ttl))
        });
        slot.downcast(name)
    }

    /// [`get_or_create_region`](Self::get_or_create_region) with the
    /// configured sizing for `name` (per-region override, else defaults).
    pub fn configured_region<K, V>(&self, name: &str) -> Result<Arc<CacheRegion<K, V>>>
    where
        K: Hash + Eq + Clone + Send + Sync + 'static,
        V: Clone + Send + Sync + 'static,
    {
        let (capacity, ttl) = self.defaults.sizing_for(name);
        self.get_or_create_region(name, capacity, ttl)
    }

    /// Existing region lookup; never creates.
    pub fn region<K, V>(&self, name: &str) -> Option<Arc<CacheRegion<K, V>>>
    where
        K: Hash + Eq + Clone + Send + Sync + 'static,
        V: Clone + Send + Sync + 'static,
    {
        self.regions.read().get(name)?.downcast(name).ok()
    }

    /// Read through `region_name`, creating the region with configured
    /// sizing on first use.
    pub fn get_cached<K, V, E, F>(
        &self,
        region_name: &str,
        key: K,
        compute: F,
    ) -> std::result::Result<V, E>
    where
        K: Hash + Eq + Clone + Send + Sync + 'static,
        V: Clone + Send + Sync + 'static,
        E: From<Error>,
        F: FnOnce() -> std::result::Result<V, E>,
    {
        let region = self.configured_region::<K, V>(region_name)?;
        region.get(key, compute)
    }

    /// Sweep expired entries from every region. Never fails.
    pub fn cleanup_all(&self) -> usize {
        // Snapshot first so sweeping never blocks region creation.
        let regions: Vec<Arc<dyn Housekeeping>> = self
            .regions
            .read()
            .values()
            .map(|slot| Arc::clone(&slot.erased))
            .collect();

        let removed: usize = regions.iter().map(|r| r.cleanup_expired()).sum();
        debug!(regions = regions.len(), removed, "cache cleanup pass");
        removed
    }

    pub fn region_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.regions.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Stats for every region, ordered by name.
    pub fn stats(&self) -> Vec<RegionStats> {
        let mut stats: Vec<RegionStats> = self
            .regions
            .read()
            .values()
            .map(|slot| slot.erased.stats())
            .collect();
        stats.sort_by(|a, b| a.region.cmp(&b.region));
        stats
    }

    pub fn log_stats(&self) {
        for s in self.stats() {
            info!(
                "📊 {} size={}/{} hits={} misses={} hit_rate={:.2}% evicted={} expired={}",
                s.region,
                s.size,
                s.capacity,
                s.hits,
                s.misses,
                s.hit_rate * 100.0,
                s.evictions,
                s.expirations
            );
        }
    }

    pub fn remove_region(&self, name: &str) -> bool {
        self.regions.write().remove(name).is_some()
    }

    /// Drop every region. Handles already given out keep working but are
    /// no longer reachable through the manager.
    pub fn clear(&self) {
        self.regions.write().clear();
    }
}

impl Default for CacheManager {
    fn default() -> Self {
        Self::new(RegionDefaults::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn manager() -> CacheManager {
        CacheManager::new(RegionDefaults {
            capacity: 4,
            ttl: Duration::from_secs(60),
            overrides: vec![RegionConfig {
                name: "bars".into(),
                capacity: 2,
                ttl_ms: 20,
            }],
        })
    }

    #[test]
    fn test_get_or_create_is_idempotent() {
        let manager = manager();
        let first = manager
            .get_or_create_region::<String, u64>("quotes", 10, Duration::from_secs(1))
            .unwrap();
        let second = manager
            .get_or_create_region::<String, u64>("quotes", 999, Duration::from_secs(99))
            .unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(second.capacity(), 10);
        assert_eq!(second.ttl(), Duration::from_secs(1));
        assert_eq!(manager.region_names(), vec!["quotes".to_string()]);
    }

    #[test]
    fn test_rejects_invalid_arguments() {
        let manager = manager();
        assert!(
            manager
                .get_or_create_region::<String, u64>("", 10, Duration::ZERO)
                .is_err()
        );
        assert!(
            manager
                .get_or_create_region::<String, u64>("quotes", 0, Duration::ZERO)
                .is_err()
        );
    }

    #[test]
    fn test_type_mismatch_is_an_error() {
        let manager = manager();
        manager
            .get_or_create_region::<String, u64>("quotes", 10, Duration::from_secs(1))
            .unwrap();
        let err = manager
            .get_or_create_region::<u32, String>("quotes", 10, Duration::from_secs(1))
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert!(manager.region::<u32, String>("quotes").is_none());
        assert!(manager.region::<String, u64>("quotes").is_some());
    }

    #[test]
    fn test_get_cached_uses_configured_sizing() {
        let manager = manager();
        let v: Result<u64> = manager.get_cached("bars", "AAPL".to_string(), || Ok(1));
        assert_eq!(v.unwrap(), 1);
        let v: Result<u64> = manager.get_cached("positions", 7u32, || Ok(2));
        assert_eq!(v.unwrap(), 2);

        let bars = manager.region::<String, u64>("bars").unwrap();
        assert_eq!(bars.capacity(), 2);
        assert_eq!(bars.ttl(), Duration::from_millis(20));

        let positions = manager.region::<u32, u64>("positions").unwrap();
        assert_eq!(positions.capacity(), 4);
    }

    #[test]
    fn test_get_cached_propagates_compute_error() {
        let manager = manager();
        let v: Result<u64> = manager.get_cached("bars", "AAPL".to_string(), || {
            Err(Error::Connectivity("feed down".into()))
        });
        assert!(matches!(v, Err(Error::Connectivity(_))));
    }

    #[test]
    fn test_cleanup_all_sweeps_every_region() {
        let manager = manager();
        let bars = manager.configured_region::<String, u64>("bars").unwrap();
        let ticks = manager
            .get_or_create_region::<u64, u64>("ticks", 8, Duration::from_millis(20))
            .unwrap();
        let long = manager
            .get_or_create_region::<u64, u64>("long", 8, Duration::from_secs(60))
            .unwrap();

        bars.get_with("AAPL".into(), || 1);
        ticks.get_with(1, || 1);
        ticks.get_with(2, || 2);
        long.get_with(1, || 1);

        thread::sleep(Duration::from_millis(30));
        assert_eq!(manager.cleanup_all(), 3);
        assert_eq!(long.len(), 1);

        let stats = manager.stats();
        assert_eq!(
            stats.iter().map(|s| s.region.as_str()).collect::<Vec<_>>(),
            vec!["bars", "long", "ticks"]
        );
    }

    #[test]
    fn test_cleanup_concurrent_with_reads() {
        let manager = Arc::new(manager());
        let region = manager
            .get_or_create_region::<u64, u64>("ticks", 64, Duration::from_millis(1))
            .unwrap();

        let readers: Vec<_> = (0..4)
            .map(|t| {
                let region = Arc::clone(&region);
                thread::spawn(move || {
                    for i in 0..500u64 {
                        let v = region.get_with(i % 32, || i * t);
                        assert!(v <= 500 * 4);
                    }
                })
            })
            .collect();

        for _ in 0..50 {
            manager.cleanup_all();
        }
        for r in readers {
            r.join().unwrap();
        }
        assert!(region.len() <= 64);
    }

    #[test]
    fn test_clear_for_isolation() {
        let manager = manager();
        manager.configured_region::<String, u64>("bars").unwrap();
        assert!(manager.remove_region("bars"));
        assert!(!manager.remove_region("bars"));

        manager.configured_region::<String, u64>("quotes").unwrap();
        manager.clear();
        assert!(manager.region_names().is_empty());
    }
}

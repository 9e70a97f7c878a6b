//! Cache region - Bounded, TTL-aware, single-flight memoizing store
//!
//! Entry data lives in fixed shards, each behind its own lock together with
//! the shard's in-flight computations. Recency is tracked separately in a
//! key-only LRU list with O(1) touch/push/pop.
//!
//! Lock order is recency → shard. The hit path never holds both, and the
//! caller's compute function never runs under either.

use lru::LruCache;
use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use std::collections::hash_map::RandomState;
use std::convert::Infallible;
use std::fmt;
use std::hash::{BuildHasher, Hash};
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

use super::entry::CacheEntry;
use super::stats::{RegionCounters, RegionStats};

const SHARD_COUNT: usize = 16;

struct Shard<K, V> {
    entries: HashMap<K, CacheEntry<V>>,
    in_flight: HashMap<K, Arc<Flight<V>>>,
}

impl<K, V> Default for Shard<K, V> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
            in_flight: HashMap::new(),
        }
    }
}

enum FlightState<V> {
    Pending,
    /// `None` when the leading computation failed or panicked.
    Done(Option<V>),
}

/// One in-progress computation that concurrent missers wait on.
struct Flight<V> {
    state: Mutex<FlightState<V>>,
    ready: Condvar,
}

impl<V: Clone> Flight<V> {
    fn new() -> Self {
        Self {
            state: Mutex::new(FlightState::Pending),
            ready: Condvar::new(),
        }
    }

    fn finish(&self, value: Option<V>) {
        *self.state.lock() = FlightState::Done(value);
        self.ready.notify_all();
    }

    fn wait(&self) -> Option<V> {
        let mut state = self.state.lock();
        loop {
            if let FlightState::Done(value) = &*state {
                return value.clone();
            }
            self.ready.wait(&mut state);
        }
    }
}

enum Lookup<V> {
    Hit(V),
    Wait(Arc<Flight<V>>),
    Lead(Arc<Flight<V>>),
}

/// Named cache partition with its own capacity and TTL.
pub struct CacheRegion<K, V> {
    name: String,
    capacity: NonZeroUsize,
    ttl: Duration,
    shards: Box<[Mutex<Shard<K, V>>]>,
    recency: Mutex<LruCache<K, ()>>,
    hasher: RandomState,
    counters: RegionCounters,
}

impl<K, V> CacheRegion<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    pub fn new(name: impl Into<String>, capacity: NonZeroUsize, ttl: Duration) -> Self {
        let shards = (0..SHARD_COUNT)
            .map(|_| Mutex::new(Shard::default()))
            .collect::<Vec<_>>()
            .into_boxed_slice();

        Self {
            name: name.into(),
            capacity,
            ttl,
            shards,
            recency: Mutex::new(LruCache::new(capacity)),
            hasher: RandomState::new(),
            counters: RegionCounters::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn capacity(&self) -> usize {
        self.capacity.get()
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Physically present entries, expired-but-unswept ones included.
    pub fn len(&self) -> usize {
        self.recency.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Return the cached value for `key`, computing and storing it on a miss.
    ///
    /// Concurrent misses on the same key run `compute` once; the others block
    /// until it finishes and share its value. If the leading computation
    /// fails, its error goes to its own caller only and one of the waiters
    /// takes over with its own `compute`. Nothing is stored on failure.
    pub fn get<F, E>(&self, key: K, compute: F) -> Result<V, E>
    where
        F: FnOnce() -> Result<V, E>,
    {
        let mut counted = false;

        let flight = loop {
            match self.lookup(&key, &mut counted) {
                Lookup::Hit(value) => return Ok(value),
                Lookup::Wait(flight) => {
                    if let Some(value) = flight.wait() {
                        return Ok(value);
                    }
                    trace!(region = %self.name, "leading computation failed, contending again");
                }
                Lookup::Lead(flight) => break flight,
            }
        };

        let mut leader = LeaderGuard {
            region: self,
            key: &key,
            flight,
            finished: false,
        };

        let value = compute()?;
        self.insert_entry(key.clone(), value.clone(), Some(&leader.flight));
        leader.flight.finish(Some(value.clone()));
        leader.finished = true;

        Ok(value)
    }

    /// [`get`](Self::get) for computations that cannot fail.
    pub fn get_with<F>(&self, key: K, compute: F) -> V
    where
        F: FnOnce() -> V,
    {
        match self.get(key, || Ok::<V, Infallible>(compute())) {
            Ok(value) => value,
            Err(never) => match never {},
        }
    }

    /// Read without touching statistics or recency.
    pub fn peek(&self, key: &K) -> Option<V> {
        let shard = self.shard(key).lock();
        shard
            .entries
            .get(key)
            .filter(|entry| !entry.is_expired())
            .map(|entry| entry.value().clone())
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.peek(key).is_some()
    }

    /// Drop a single entry. Returns whether one was present.
    pub fn invalidate(&self, key: &K) -> bool {
        let mut recency = self.recency.lock();
        recency.pop(key);
        let mut shard = self.shard(key).lock();
        shard.entries.remove(key).is_some()
    }

    /// Drop every entry. Statistics are kept.
    pub fn clear(&self) {
        let mut recency = self.recency.lock();
        recency.clear();
        for shard in self.shards.iter() {
            shard.lock().entries.clear();
        }
        debug!(region = %self.name, "cleared");
    }

    /// Sweep expired entries. Returns how many were removed.
    pub fn cleanup_expired(&self) -> usize {
        let now = Instant::now();
        let mut removed = 0usize;

        for shard in self.shards.iter() {
            let mut recency = self.recency.lock();
            let mut shard = shard.lock();
            shard.entries.retain(|key, entry| {
                if entry.is_expired_at(now) {
                    recency.pop(key);
                    removed += 1;
                    false
                } else {
                    true
                }
            });
        }

        if removed > 0 {
            self.counters.record_expirations(removed as u64);
            debug!(region = %self.name, removed, "swept expired entries");
        }
        removed
    }

    pub fn stats(&self) -> RegionStats {
        self.counters
            .snapshot(&self.name, self.len(), self.capacity.get())
    }

    fn shard(&self, key: &K) -> &Mutex<Shard<K, V>> {
        let idx = (self.hasher.hash_one(key) as usize) % self.shards.len();
        &self.shards[idx]
    }

    /// Decide, under the shard lock, whether this call hits, waits, or leads.
    /// Each `get` call is counted exactly once as a hit or a miss.
    fn lookup(&self, key: &K, counted: &mut bool) -> Lookup<V> {
        let mut shard = self.shard(key).lock();

        let live = shard
            .entries
            .get(key)
            .filter(|entry| !entry.is_expired())
            .map(|entry| entry.value().clone());

        if let Some(value) = live {
            drop(shard);
            if !*counted {
                self.counters.record_hit();
                *counted = true;
            }
            self.touch(key);
            return Lookup::Hit(value);
        }

        if !*counted {
            self.counters.record_miss();
            *counted = true;
        }

        match shard.in_flight.get(key) {
            Some(flight) => Lookup::Wait(Arc::clone(flight)),
            None => {
                let flight = Arc::new(Flight::new());
                shard.in_flight.insert(key.clone(), Arc::clone(&flight));
                Lookup::Lead(flight)
            }
        }
    }

    fn touch(&self, key: &K) {
        // A key evicted since the read is simply absent here.
        self.recency.lock().get(key);
    }

    fn insert_entry(&self, key: K, value: V, flight: Option<&Arc<Flight<V>>>) {
        let mut recency = self.recency.lock();
        let evicted = match recency.push(key.clone(), ()) {
            Some((old, ())) if old != key => Some(old),
            _ => None,
        };

        {
            let mut shard = self.shard(&key).lock();
            shard
                .entries
                .insert(key.clone(), CacheEntry::new(value, self.ttl));
            if let Some(flight) = flight {
                release_flight(&mut shard.in_flight, &key, flight);
            }
        }

        if let Some(old) = evicted {
            let mut shard = self.shard(&old).lock();
            if shard.entries.remove(&old).is_some() {
                self.counters.record_eviction();
                trace!(region = %self.name, "evicted least-recently-used entry");
            }
        }
    }

    fn abandon(&self, key: &K, flight: &Arc<Flight<V>>) {
        {
            let mut shard = self.shard(key).lock();
            release_flight(&mut shard.in_flight, key, flight);
        }
        flight.finish(None);
    }
}

fn release_flight<K: Hash + Eq, V>(
    in_flight: &mut HashMap<K, Arc<Flight<V>>>,
    key: &K,
    flight: &Arc<Flight<V>>,
) {
    if in_flight.get(key).is_some_and(|f| Arc::ptr_eq(f, flight)) {
        in_flight.remove(key);
    }
}

impl<K, V> fmt::Debug for CacheRegion<K, V>
where
    K: Hash + Eq,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheRegion")
            .field("name", &self.name)
            .field("capacity", &self.capacity.get())
            .field("ttl", &self.ttl)
            .field("len", &self.recency.lock().len())
            .finish()
    }
}

/// Releases waiters when the leading computation errors or panics.
struct LeaderGuard<'a, K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    region: &'a CacheRegion<K, V>,
    key: &'a K,
    flight: Arc<Flight<V>>,
    finished: bool,
}

impl<K, V> Drop for LeaderGuard<'_, K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    fn drop(&mut self) {
        if !self.finished {
            self.region.abandon(self.key, &self.flight);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    fn region(capacity: usize, ttl: Duration) -> CacheRegion<String, u64> {
        CacheRegion::new("test", NonZeroUsize::new(capacity).unwrap(), ttl)
    }

    #[test]
    fn test_single_flight_under_stampede() {
        let region = Arc::new(region(16, Duration::from_secs(60)));
        let calls = Arc::new(AtomicUsize::new(0));
        let barrier = Arc::new(Barrier::new(16));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let region = Arc::clone(&region);
                let calls = Arc::clone(&calls);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    region.get_with("BTCUSDT".to_string(), || {
                        calls.fetch_add(1, Ordering::SeqCst);
                        thread::sleep(Duration::from_millis(50));
                        42
                    })
                })
            })
            .collect();

        for h in handles {
            assert_eq!(h.join().unwrap(), 42);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let stats = region.stats();
        assert_eq!(stats.hits + stats.misses, 16);
        assert!(stats.misses >= 1);
    }

    #[test]
    fn test_distinct_keys_compute_in_parallel() {
        let region = Arc::new(region(16, Duration::from_secs(60)));
        let (tx, rx) = crossbeam::channel::bounded::<()>(1);

        // A's computation only finishes once B's computation has started.
        let a = {
            let region = Arc::clone(&region);
            thread::spawn(move || {
                region.get("A".to_string(), || {
                    rx.recv_timeout(Duration::from_secs(2))
                        .map(|_| 1)
                        .map_err(|_| "B never started")
                })
            })
        };

        thread::sleep(Duration::from_millis(20));
        let b = region.get_with("B".to_string(), || {
            tx.send(()).unwrap();
            2
        });

        assert_eq!(b, 2);
        assert_eq!(a.join().unwrap(), Ok(1));
    }

    #[test]
    fn test_ttl_expiry() {
        let region = region(4, Duration::from_millis(50));
        assert_eq!(region.get_with("k".into(), || 1), 1);
        assert_eq!(region.get_with("k".into(), || 99), 1);

        thread::sleep(Duration::from_millis(60));
        assert_eq!(region.peek(&"k".to_string()), None);
        assert_eq!(region.get_with("k".into(), || 2), 2);
    }

    #[test]
    fn test_lru_eviction() {
        let region = region(2, Duration::from_secs(60));
        region.get_with("A".into(), || 1);
        region.get_with("B".into(), || 2);
        region.get_with("A".into(), || 100); // hit, A becomes most recent
        region.get_with("C".into(), || 3);

        assert_eq!(region.len(), 2);
        assert_eq!(region.peek(&"A".to_string()), Some(1));
        assert_eq!(region.peek(&"B".to_string()), None);
        assert_eq!(region.peek(&"C".to_string()), Some(3));
        assert_eq!(region.stats().evictions, 1);
    }

    #[test]
    fn test_hit_rate_math() {
        let region = region(16, Duration::from_secs(60));
        for i in 0..100u64 {
            let key = format!("sym-{}", i % 10);
            region.get_with(key, || i);
        }

        let stats = region.stats();
        assert_eq!(stats.misses, 10);
        assert_eq!(stats.hits, 90);
        assert!((stats.hit_rate - 0.9).abs() < 1e-9);
    }

    #[test]
    fn test_failed_compute_is_not_cached() {
        let region = region(4, Duration::from_secs(60));
        let err = region.get("k".to_string(), || Err::<u64, _>("feed down"));
        assert_eq!(err, Err("feed down"));
        assert!(region.is_empty());

        let ok = region.get("k".to_string(), || Ok::<_, &str>(7));
        assert_eq!(ok, Ok(7));
        assert_eq!(region.stats().misses, 2);
    }

    #[test]
    fn test_waiter_takes_over_after_leader_failure() {
        let region = Arc::new(region(4, Duration::from_secs(60)));

        let leader = {
            let region = Arc::clone(&region);
            thread::spawn(move || {
                region.get("k".to_string(), || {
                    thread::sleep(Duration::from_millis(50));
                    Err::<u64, _>("broker timeout")
                })
            })
        };

        thread::sleep(Duration::from_millis(10));
        let follower = region.get("k".to_string(), || Ok::<_, &str>(5));

        assert_eq!(leader.join().unwrap(), Err("broker timeout"));
        assert_eq!(follower, Ok(5));
        assert_eq!(region.peek(&"k".to_string()), Some(5));
    }

    #[test]
    fn test_panicking_compute_releases_key() {
        let region = Arc::new(region(4, Duration::from_secs(60)));

        let panicked = {
            let region = Arc::clone(&region);
            thread::spawn(move || {
                region.get_with("k".to_string(), || -> u64 { panic!("bad bar") })
            })
        };
        assert!(panicked.join().is_err());

        // No stale in-flight marker: the next caller computes normally.
        assert_eq!(region.get_with("k".into(), || 3), 3);
    }

    #[test]
    fn test_cleanup_expired() {
        let region = region(8, Duration::from_millis(20));
        for k in ["a", "b", "c"] {
            region.get_with(k.to_string(), || 1);
        }
        assert_eq!(region.len(), 3);

        thread::sleep(Duration::from_millis(30));
        assert_eq!(region.cleanup_expired(), 3);
        assert!(region.is_empty());
        assert_eq!(region.stats().expirations, 3);
        // stats survive expiry
        assert_eq!(region.stats().misses, 3);
    }

    #[test]
    fn test_invalidate_and_clear() {
        let region = region(8, Duration::from_secs(60));
        region.get_with("a".into(), || 1);
        region.get_with("b".into(), || 2);

        assert!(region.invalidate(&"a".to_string()));
        assert!(!region.invalidate(&"a".to_string()));
        assert_eq!(region.len(), 1);

        region.clear();
        assert!(region.is_empty());
        assert_eq!(region.stats().misses, 2);
    }

    #[test]
    fn test_debug_shows_name_capacity_and_len() {
        let region = region(8, Duration::from_secs(60));
        region.get_with("a".into(), || 1);

        let shown = format!("{:?}", region);
        assert!(shown.starts_with("CacheRegion"));
        assert!(shown.contains("name: \"test\""));
        assert!(shown.contains("capacity: 8"));
        assert!(shown.contains("ttl: 60s"));
        assert!(shown.contains("len: 1"));
    }
}

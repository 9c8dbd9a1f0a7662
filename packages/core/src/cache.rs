//! In-memory cache for computed values.
//!
//! [`CacheManager`] fronts expensive computations with a keyed store that
//! expires entries after a TTL (checked lazily on read), evicts the least
//! recently used entry once the configured capacity is reached, and runs at
//! most one computation per key at a time (single-flight).
//!
//! Failed computations are never stored. Invalidating a key detaches its
//! running computation: the callers already waiting still receive its
//! outcome, but it is not stored and later callers compute afresh.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::{Arc, Mutex as PlainMutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{watch, Mutex};
use tokio::time::Instant;

/// Default time-to-live for cached entries.
pub const DEFAULT_TTL: Duration = Duration::from_secs(300);

/// Default maximum number of cached entries.
pub const DEFAULT_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheSettings {
    pub ttl: Duration,
    /// Values below 1 are raised to 1.
    pub capacity: usize,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            ttl: DEFAULT_TTL,
            capacity: DEFAULT_CAPACITY,
        }
    }
}

/// Counters describing cache behaviour since `init`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub computations: u64,
    /// Callers answered by a computation another caller ran.
    pub coalesced: u64,
    pub evictions: u64,
    pub expirations: u64,
    pub entries: usize,
}

struct CacheEntry<V> {
    value: V,
    stored_at: Instant,
    tick: u64,
}

/// Entries plus an access-order index: the smallest tick is the least
/// recently used key.
struct CacheState<V> {
    entries: HashMap<String, CacheEntry<V>>,
    order: BTreeMap<u64, String>,
    next_tick: u64,
    open: bool,
    stats: CacheStats,
}

impl<V: Clone> CacheState<V> {
    fn new() -> Self {
        Self {
            entries: HashMap::new(),
            order: BTreeMap::new(),
            next_tick: 0,
            open: true,
            stats: CacheStats::default(),
        }
    }

    fn lookup(&mut self, key: &str, ttl: Duration, now: Instant) -> Option<V> {
        let expired = now.duration_since(self.entries.get(key)?.stored_at) > ttl;
        if expired {
            self.remove(key);
            self.stats.expirations += 1;
            return None;
        }

        let tick = self.next_tick;
        self.next_tick += 1;

        let entry = self.entries.get_mut(key)?;
        self.order.remove(&entry.tick);
        entry.tick = tick;
        self.order.insert(tick, key.to_string());
        Some(entry.value.clone())
    }

    fn insert(&mut self, key: &str, value: V, now: Instant, capacity: usize) {
        self.remove(key);

        while self.entries.len() >= capacity {
            let Some((_, lru_key)) = self.order.pop_first() else {
                break;
            };
            self.entries.remove(&lru_key);
            self.stats.evictions += 1;
            tracing::debug!(key = %lru_key, "Cache EVICT (lru)");
        }

        let tick = self.next_tick;
        self.next_tick += 1;
        self.order.insert(tick, key.to_string());
        self.entries.insert(
            key.to_string(),
            CacheEntry {
                value,
                stored_at: now,
                tick,
            },
        );
    }

    fn remove(&mut self, key: &str) -> bool {
        match self.entries.remove(key) {
            Some(entry) => {
                self.order.remove(&entry.tick);
                true
            }
            None => false,
        }
    }

    fn remove_prefix(&mut self, prefix: &str) -> usize {
        let doomed: Vec<String> = self
            .entries
            .keys()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect();
        for key in &doomed {
            self.remove(key);
        }
        doomed.len()
    }

    fn purge_expired(&mut self, ttl: Duration, now: Instant) -> usize {
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, entry)| now.duration_since(entry.stored_at) > ttl)
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            self.remove(key);
        }
        self.stats.expirations += expired.len() as u64;
        expired.len()
    }
}

/// Receiving end of one running computation. `None` until the leader
/// publishes its outcome.
type Outcome<V, E> = watch::Receiver<Option<Result<V, E>>>;

struct FlightMap<V, E> {
    running: HashMap<String, (u64, Outcome<V, E>)>,
    next_id: u64,
}

/// Computations in progress, one per key.
///
/// Plain mutex: it is taken from `Drop` and never held across an await.
struct FlightTable<V, E> {
    flights: PlainMutex<FlightMap<V, E>>,
}

/// What a caller does about a key that missed the cache.
enum Flight<V, E> {
    /// Run the computation and publish its outcome.
    Lead(FlightLeader<V, E>),
    /// Wait for the running computation's outcome.
    Follow(Outcome<V, E>),
}

impl<V, E> FlightTable<V, E> {
    fn new() -> Self {
        Self {
            flights: PlainMutex::new(FlightMap {
                running: HashMap::new(),
                next_id: 0,
            }),
        }
    }

    fn map(&self) -> MutexGuard<'_, FlightMap<V, E>> {
        self.flights.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn join(self: &Arc<Self>, key: &str) -> Flight<V, E> {
        let mut map = self.map();
        if let Some((_, outcome)) = map.running.get(key) {
            return Flight::Follow(outcome.clone());
        }

        let id = map.next_id;
        map.next_id += 1;
        let (sender, outcome) = watch::channel(None);
        map.running.insert(key.to_string(), (id, outcome));
        Flight::Lead(FlightLeader {
            table: Arc::clone(self),
            key: key.to_string(),
            id,
            sender,
        })
    }

    /// `true` while flight `id` is still the one registered for `key`.
    fn is_current(&self, key: &str, id: u64) -> bool {
        matches!(self.map().running.get(key), Some((current, _)) if *current == id)
    }

    fn forget(&self, key: &str, id: u64) {
        let mut map = self.map();
        if matches!(map.running.get(key), Some((current, _)) if *current == id) {
            map.running.remove(key);
        }
    }

    /// Unregister the flights of every key starting with `prefix`. They
    /// still answer the callers already waiting on them, but later callers
    /// start a new computation and the detached result is not stored.
    fn detach_prefix(&self, prefix: &str) {
        self.map().running.retain(|key, _| !key.starts_with(prefix));
    }

    fn detach(&self, key: &str) {
        self.map().running.remove(key);
    }

    fn len(&self) -> usize {
        self.map().running.len()
    }
}

/// Exclusive right to compute one key. Dropping it without publishing
/// (the computing caller was cancelled) closes the channel, and the
/// waiting callers elect a new leader.
struct FlightLeader<V, E> {
    table: Arc<FlightTable<V, E>>,
    key: String,
    id: u64,
    sender: watch::Sender<Option<Result<V, E>>>,
}

impl<V, E> FlightLeader<V, E> {
    fn is_current(&self) -> bool {
        self.table.is_current(&self.key, self.id)
    }

    fn publish(self, outcome: Result<V, E>) {
        self.table.forget(&self.key, self.id);
        self.sender.send_replace(Some(outcome));
    }
}

impl<V, E> Drop for FlightLeader<V, E> {
    fn drop(&mut self) {
        self.table.forget(&self.key, self.id);
    }
}

/// Bounded, single-flight TTL cache keyed by strings. `E` is the error
/// type of the computations it fronts.
///
/// Cloning is cheap and every clone shares the same store.
pub struct CacheManager<V, E> {
    state: Arc<Mutex<CacheState<V>>>,
    flights: Arc<FlightTable<V, E>>,
    settings: CacheSettings,
}

impl<V, E> Clone for CacheManager<V, E> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
            flights: Arc::clone(&self.flights),
            settings: self.settings,
        }
    }
}

impl<V, E> CacheManager<V, E>
where
    V: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    /// Create an open cache. Pair with [`CacheManager::shutdown`].
    pub fn init(settings: CacheSettings) -> Self {
        let settings = CacheSettings {
            capacity: settings.capacity.max(1),
            ..settings
        };

        tracing::debug!(
            capacity = settings.capacity,
            ttl_seconds = settings.ttl.as_secs(),
            "Cache manager initialised"
        );

        Self {
            state: Arc::new(Mutex::new(CacheState::new())),
            flights: Arc::new(FlightTable::new()),
            settings,
        }
    }

    /// Return the cached value for `key`, or run `compute` and cache its
    /// result.
    ///
    /// Concurrent callers for the same key share one computation and all
    /// observe its outcome, including an `Err`. Errors are never stored,
    /// so the next caller after a failure computes again. A key
    /// invalidated while its computation runs is not repopulated by it.
    pub async fn get_or_compute<F, Fut>(&self, key: &str, compute: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        {
            let mut state = self.state.lock().await;
            if !state.open {
                drop(state);
                return compute().await;
            }
            if let Some(value) = state.lookup(key, self.settings.ttl, Instant::now()) {
                state.stats.hits += 1;
                tracing::debug!(key, "Cache HIT");
                return Ok(value);
            }
            state.stats.misses += 1;
            tracing::debug!(key, "Cache MISS");
        }

        let leader = loop {
            match self.flights.join(key) {
                Flight::Lead(leader) => break leader,
                Flight::Follow(mut outcome) => {
                    let shared = outcome
                        .wait_for(Option::is_some)
                        .await
                        .ok()
                        .and_then(|published| published.clone());
                    if let Some(result) = shared {
                        self.state.lock().await.stats.coalesced += 1;
                        tracing::debug!(key, "Cache SHARED");
                        return result;
                    }
                    tracing::debug!(key, "Computing caller went away, taking over");
                }
            }
        };

        {
            let mut state = self.state.lock().await;
            if state.open {
                if let Some(value) = state.lookup(key, self.settings.ttl, Instant::now()) {
                    state.stats.hits += 1;
                    drop(state);
                    tracing::debug!(key, "Cache HIT after miss");
                    leader.publish(Ok(value.clone()));
                    return Ok(value);
                }
            }
            state.stats.computations += 1;
        }

        let result = compute().await;

        if let Ok(value) = &result {
            let mut state = self.state.lock().await;
            if state.open && leader.is_current() {
                state.insert(key, value.clone(), Instant::now(), self.settings.capacity);
                tracing::debug!(key, "Cache SET");
            } else {
                tracing::debug!(key, "Cache invalidated during computation, result not stored");
            }
        }

        leader.publish(result.clone());
        result
    }

    /// Cached value for `key` without computing anything.
    pub async fn get(&self, key: &str) -> Option<V> {
        let mut state = self.state.lock().await;
        if !state.open {
            return None;
        }
        let value = state.lookup(key, self.settings.ttl, Instant::now());
        if value.is_some() {
            state.stats.hits += 1;
        } else {
            state.stats.misses += 1;
        }
        value
    }

    /// Store `value` directly, evicting the least recently used entry if the
    /// cache is full. Ignored after shutdown.
    pub async fn insert(&self, key: &str, value: V) {
        let mut state = self.state.lock().await;
        if state.open {
            state.insert(key, value, Instant::now(), self.settings.capacity);
        }
    }

    /// Remove one key. Returns `true` when an entry was removed.
    pub async fn invalidate(&self, key: &str) -> bool {
        let mut state = self.state.lock().await;
        let removed = state.remove(key);
        self.flights.detach(key);
        tracing::debug!(key, removed, "Cache DEL");
        removed
    }

    /// Remove every key starting with `prefix`. Returns the number removed.
    pub async fn invalidate_prefix(&self, prefix: &str) -> usize {
        let mut state = self.state.lock().await;
        let removed = state.remove_prefix(prefix);
        self.flights.detach_prefix(prefix);
        tracing::debug!(prefix, removed, "Cache DEL prefix");
        removed
    }

    /// Remove every entry.
    pub async fn clear(&self) -> usize {
        self.invalidate_prefix("").await
    }

    /// Drop expired entries now instead of waiting for them to be read.
    pub async fn purge_expired(&self) -> usize {
        let mut state = self.state.lock().await;
        state.purge_expired(self.settings.ttl, Instant::now())
    }

    pub async fn stats(&self) -> CacheStats {
        let state = self.state.lock().await;
        CacheStats {
            entries: state.entries.len(),
            ..state.stats
        }
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn is_open(&self) -> bool {
        self.state.lock().await.open
    }

    /// Keys with a registered computation running.
    pub fn in_flight(&self) -> usize {
        self.flights.len()
    }

    pub fn settings(&self) -> CacheSettings {
        self.settings
    }

    /// Drop every entry and stop caching. Later `get_or_compute` calls
    /// compute directly and store nothing.
    pub async fn shutdown(&self) {
        let mut state = self.state.lock().await;
        if !state.open {
            return;
        }
        state.open = false;
        self.flights.detach_prefix("");
        let dropped = state.entries.len();
        state.entries.clear();
        state.order.clear();
        tracing::info!(dropped, "Cache manager shut down");
    }
}

//! Time-bounded cache with single-flight loading
//!
//! Every entry lives for a fixed TTL from the moment it was stored. Reading an
//! entry never extends its lifetime, so staleness is bounded no matter how hot
//! a key is.
//!
//! On a miss the registered loader runs once per key: concurrent callers for
//! the same key await the same in-flight load and all observe its outcome.
//! Failed loads are handed to every waiter and are not stored. A load is
//! dropped, origin call included, once its last waiter goes away.
//!
//! Expired entries are swept on insert at most once per TTL, so the map holds
//! roughly two TTLs worth of keys.

use crate::clock::{system_clock, SharedClock};
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

type LoadFuture<V, E> = Shared<BoxFuture<'static, Result<V, E>>>;
type Loader<K, V, E> = Arc<dyn Fn(K) -> BoxFuture<'static, Result<V, E>> + Send + Sync>;

struct Entry<V> {
    value: V,
    expires_at: Instant,
}

struct InFlight<V, E> {
    id: u64,
    load: LoadFuture<V, E>,
    waiters: usize,
}

struct State<K, V, E> {
    entries: HashMap<K, Entry<V>>,
    in_flight: HashMap<K, InFlight<V, E>>,
    next_load_id: u64,
    next_sweep: Instant,
}

impl<K: Eq + Hash, V, E> State<K, V, E> {
    fn insert(&mut self, key: K, value: V, now: Instant, ttl: Duration) {
        if now >= self.next_sweep {
            self.entries.retain(|_, entry| now < entry.expires_at);
            self.next_sweep = now + ttl;
        }
        self.entries.insert(
            key,
            Entry {
                value,
                expires_at: now + ttl,
            },
        );
    }
}

struct Inner<K, V, E> {
    state: Mutex<State<K, V, E>>,
    ttl: Duration,
    clock: SharedClock,
    loader: Loader<K, V, E>,
}

/// A key/value cache whose entries expire a fixed time after insertion.
///
/// Cloning is cheap and yields a handle to the same cache.
pub struct TtlCache<K, V, E> {
    inner: Arc<Inner<K, V, E>>,
}

impl<K, V, E> Clone for TtlCache<K, V, E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K, V, E> TtlCache<K, V, E>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    /// Create a cache backed by the system clock
    pub fn new<F, Fut>(ttl: Duration, loader: F) -> Self
    where
        F: Fn(K) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
    {
        Self::with_clock(ttl, system_clock(), loader)
    }

    /// Create a cache that reads time from `clock`
    pub fn with_clock<F, Fut>(ttl: Duration, clock: SharedClock, loader: F) -> Self
    where
        F: Fn(K) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
    {
        let loader: Loader<K, V, E> = Arc::new(move |key| loader(key).boxed());
        let next_sweep = clock.now() + ttl;
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State {
                    entries: HashMap::new(),
                    in_flight: HashMap::new(),
                    next_load_id: 0,
                    next_sweep,
                }),
                ttl,
                clock,
                loader,
            }),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.inner.ttl
    }

    /// Return the live value for `key`, loading it on a miss
    pub async fn get(&self, key: &K) -> Result<V, E> {
        let (load, _waiter) = {
            let mut guard = self.inner.state.lock();
            let state = &mut *guard;
            let now = self.inner.clock.now();

            let fresh = state
                .entries
                .get(key)
                .filter(|entry| now < entry.expires_at)
                .map(|entry| entry.value.clone());
            if let Some(value) = fresh {
                return Ok(value);
            }
            state.entries.remove(key);

            let (load, id) = match state.in_flight.get_mut(key) {
                Some(in_flight) => {
                    in_flight.waiters += 1;
                    (in_flight.load.clone(), in_flight.id)
                }
                None => {
                    let id = state.next_load_id;
                    state.next_load_id += 1;
                    let load = start_load(&self.inner, key.clone(), id);
                    state.in_flight.insert(
                        key.clone(),
                        InFlight {
                            id,
                            load: load.clone(),
                            waiters: 1,
                        },
                    );
                    (load, id)
                }
            };

            let waiter = Waiter {
                cache: Arc::downgrade(&self.inner),
                key: key.clone(),
                id,
            };
            (load, waiter)
        };

        load.await
    }

    /// Return the live value for `key` without loading
    pub fn peek(&self, key: &K) -> Option<V> {
        let state = self.inner.state.lock();
        let now = self.inner.clock.now();
        state
            .entries
            .get(key)
            .filter(|entry| now < entry.expires_at)
            .map(|entry| entry.value.clone())
    }

    /// Store `value` under `key` with a fresh TTL
    pub fn set(&self, key: K, value: V) {
        let now = self.inner.clock.now();
        let mut state = self.inner.state.lock();
        state.insert(key, value, now, self.inner.ttl);
    }

    /// Store `value` only if no live entry exists for `key`.
    ///
    /// Returns true when the value was stored.
    pub fn set_if_absent(&self, key: K, value: V) -> bool {
        let now = self.inner.clock.now();
        let mut state = self.inner.state.lock();
        if state
            .entries
            .get(&key)
            .is_some_and(|entry| now < entry.expires_at)
        {
            return false;
        }
        state.insert(key, value, now, self.inner.ttl);
        true
    }

    /// Remove `key` immediately. A load already running for it will not
    /// store its result.
    pub fn delete(&self, key: &K) {
        let mut state = self.inner.state.lock();
        state.entries.remove(key);
        state.in_flight.remove(key);
    }

    /// Snapshot of all stored keys, expired ones included
    pub fn keys(&self) -> Vec<K> {
        self.inner.state.lock().entries.keys().cloned().collect()
    }

    /// Number of stored entries, expired ones included
    pub fn len(&self) -> usize {
        self.inner.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of the values that have not expired yet
    pub fn live_values(&self) -> Vec<V> {
        let state = self.inner.state.lock();
        let now = self.inner.clock.now();
        state
            .entries
            .values()
            .filter(|entry| now < entry.expires_at)
            .map(|entry| entry.value.clone())
            .collect()
    }
}

/// One caller awaiting an in-flight load. The last one to leave before the
/// load finishes takes the load down with it.
struct Waiter<K: Eq + Hash, V, E> {
    cache: Weak<Inner<K, V, E>>,
    key: K,
    id: u64,
}

impl<K: Eq + Hash, V, E> Drop for Waiter<K, V, E> {
    fn drop(&mut self) {
        let Some(inner) = self.cache.upgrade() else {
            return;
        };
        let mut state = inner.state.lock();
        let abandoned = match state.in_flight.get_mut(&self.key) {
            Some(in_flight) if in_flight.id == self.id => {
                in_flight.waiters -= 1;
                in_flight.waiters == 0
            }
            _ => false,
        };
        if abandoned {
            state.in_flight.remove(&self.key);
        }
    }
}

fn start_load<K, V, E>(inner: &Arc<Inner<K, V, E>>, key: K, id: u64) -> LoadFuture<V, E>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    let origin = (inner.loader)(key.clone());
    // Weak so an abandoned load does not keep the cache alive
    let cache: Weak<Inner<K, V, E>> = Arc::downgrade(inner);

    async move {
        let result = origin.await;

        if let Some(inner) = cache.upgrade() {
            let mut state = inner.state.lock();
            let still_current = state
                .in_flight
                .get(&key)
                .is_some_and(|in_flight| in_flight.id == id);

            if still_current {
                state.in_flight.remove(&key);
                if let Ok(value) = &result {
                    let now = inner.clock.now();
                    state.insert(key, value.clone(), now, inner.ttl);
                }
            }
        }

        result
    }
    .boxed()
    .shared()
}

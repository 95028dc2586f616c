//! `MemoryStore<T>`: a TTL'd map with cost-based eviction (spec §4.1).
//!
//! Grounded on the reference crate's in-process `L1` layer (`src/image/cache/mod.rs`,
//! the `local`/session half of `LayeredCache`), generalized from a fixed `ImageData`
//! value to any `T: CacheCost`.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::SystemTime;

use parking_lot::Mutex;

use crate::clock::{SystemClock, TimeSource};
use crate::config::MemoryCacheOptions;
use crate::expiration::{CacheCost, ExpirationExtending, ExpirationPolicy};

struct Entry<T> {
    value: T,
    expiration: ExpirationPolicy,
    estimated_expiration: Option<SystemTime>,
    cost: usize,
}

#[derive(Default)]
struct State<T> {
    entries: HashMap<String, Entry<T>>,
    /// Eviction order, oldest-store-or-refresh first.
    order: VecDeque<String>,
    total_cost: usize,
    /// Superset of `entries`' keys; reconciled lazily by the periodic sweep rather than
    /// synchronously at eviction time, so `store` never pays for tracking-set upkeep.
    tracking_keys: HashSet<String>,
}

impl<T> State<T> {
    fn touch_order(&mut self, key: &str) {
        self.order.retain(|k| k != key);
        self.order.push_back(key.to_owned());
    }
}

struct Shared<T> {
    options: MemoryCacheOptions,
    clock: Arc<dyn TimeSource>,
    state: Mutex<State<T>>,
}

impl<T: CacheCost> Shared<T> {
    fn store(&self, key: String, value: T, expiration: Option<ExpirationPolicy>) {
        let now = self.clock.now();
        let policy = expiration.unwrap_or(self.options.default_expiration);
        if policy.is_already_past(now) {
            return;
        }
        let cost = value.cache_cost();
        let estimated_expiration = policy.estimated_expiration(now);

        let mut state = self.state.lock();
        if let Some(old) = state.entries.get(&key) {
            state.total_cost -= old.cost;
        }
        state.entries.insert(
            key.clone(),
            Entry {
                value,
                expiration: policy,
                estimated_expiration,
                cost,
            },
        );
        state.total_cost += cost;
        state.touch_order(&key);
        state.tracking_keys.insert(key);

        self.evict_over_limits(&mut state);
    }

    fn evict_over_limits(&self, state: &mut State<T>) {
        let cost_limit = self.options.total_cost_limit;
        let count_limit = self.options.count_limit;
        while (cost_limit != 0 && state.total_cost > cost_limit)
            || state.entries.len() > count_limit
        {
            let Some(oldest) = state.order.pop_front() else {
                break;
            };
            if let Some(entry) = state.entries.remove(&oldest) {
                state.total_cost -= entry.cost;
            }
            // `tracking_keys` is left untouched here; the next sweep reconciles it.
        }
    }

    fn value(&self, key: &str, extend: ExpirationExtending) -> Option<T>
    where
        T: Clone,
    {
        let now = self.clock.now();
        let mut state = self.state.lock();
        let is_expired = match state.entries.get(key) {
            Some(entry) => entry
                .estimated_expiration
                .map(|exp| exp <= now)
                .unwrap_or(false),
            None => return None,
        };
        if is_expired {
            if let Some(entry) = state.entries.remove(key) {
                state.total_cost -= entry.cost;
            }
            return None;
        }

        let result = {
            let entry = state.entries.get(key).expect("checked present above");
            entry.value.clone()
        };

        match extend {
            ExpirationExtending::None => {}
            ExpirationExtending::CacheTime => {
                let entry = state.entries.get_mut(key).expect("checked present above");
                let original = entry.expiration;
                entry.estimated_expiration = original.estimated_expiration(now);
            }
            ExpirationExtending::Expiration(policy) => {
                let entry = state.entries.get_mut(key).expect("checked present above");
                entry.expiration = policy;
                entry.estimated_expiration = policy.estimated_expiration(now);
            }
        }
        state.touch_order(key);
        Some(result)
    }

    fn is_cached(&self, key: &str) -> bool {
        let now = self.clock.now();
        let mut state = self.state.lock();
        match state.entries.get(key) {
            None => false,
            Some(entry) => {
                let expired = entry
                    .estimated_expiration
                    .map(|exp| exp <= now)
                    .unwrap_or(false);
                if expired {
                    if let Some(entry) = state.entries.remove(key) {
                        state.total_cost -= entry.cost;
                    }
                }
                !expired
            }
        }
    }

    fn remove(&self, key: &str) {
        let mut state = self.state.lock();
        if let Some(entry) = state.entries.remove(key) {
            state.total_cost -= entry.cost;
        }
        state.order.retain(|k| k != key);
        state.tracking_keys.remove(key);
    }

    fn remove_all(&self) {
        let mut state = self.state.lock();
        state.entries.clear();
        state.order.clear();
        state.tracking_keys.clear();
        state.total_cost = 0;
    }

    /// Walks `tracking_keys`: drops any key whose backing entry is gone or expired.
    fn sweep(&self) {
        let start = std::time::Instant::now();
        let now = self.clock.now();
        let mut state = self.state.lock();
        let stale: Vec<String> = state
            .tracking_keys
            .iter()
            .filter(|key| match state.entries.get(*key) {
                None => true,
                Some(entry) => entry
                    .estimated_expiration
                    .map(|exp| exp <= now)
                    .unwrap_or(false),
            })
            .cloned()
            .collect();
        for key in stale {
            if let Some(entry) = state.entries.remove(&key) {
                state.total_cost -= entry.cost;
            }
            state.order.retain(|k| k != &key);
            state.tracking_keys.remove(&key);
        }
        drop(state);
        crate::metrics::Tag::CacheMemorySweep.record(start.elapsed());
    }

    fn total_cost(&self) -> usize {
        self.state.lock().total_cost
    }

    fn len(&self) -> usize {
        self.state.lock().entries.len()
    }
}

/// A fast, TTL'd, cost-bounded in-memory cache.
pub struct MemoryStore<T: CacheCost + Clone + Send + Sync + 'static> {
    shared: Arc<Shared<T>>,
}

impl<T: CacheCost + Clone + Send + Sync + 'static> MemoryStore<T> {
    pub fn new(options: MemoryCacheOptions) -> Self {
        Self::with_clock(options, Arc::new(SystemClock))
    }

    pub fn with_clock(options: MemoryCacheOptions, clock: Arc<dyn TimeSource>) -> Self {
        let interval = options.clean_interval;
        let shared = Arc::new(Shared {
            options,
            clock,
            state: Mutex::new(State::default()),
        });

        let weak: Weak<Shared<T>> = Arc::downgrade(&shared);
        thread::Builder::new()
            .name("memory-store-sweep".into())
            .spawn(move || loop {
                thread::sleep(interval);
                match weak.upgrade() {
                    Some(shared) => shared.sweep(),
                    None => break,
                }
            })
            .expect("spawn memory store sweep thread");

        Self { shared }
    }

    pub fn store(&self, key: impl Into<String>, value: T, expiration: Option<ExpirationPolicy>) {
        self.shared.store(key.into(), value, expiration);
    }

    pub fn value(&self, key: &str, extend: ExpirationExtending) -> Option<T> {
        self.shared.value(key, extend)
    }

    pub fn is_cached(&self, key: &str) -> bool {
        self.shared.is_cached(key)
    }

    pub fn remove(&self, key: &str) {
        self.shared.remove(key);
    }

    pub fn remove_all(&self) {
        self.shared.remove_all();
    }

    pub fn remove_expired(&self) {
        self.shared.sweep();
    }

    pub fn total_cost(&self) -> usize {
        self.shared.total_cost()
    }

    pub fn len(&self) -> usize {
        self.shared.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

//! Bounded LRU cache of completed run logs.
//!
//! Completed runs are immutable, so an entry is written once and only leaves
//! through LRU eviction or an explicit `evict`/`clear`. Concurrent misses for
//! the same run share one fetch.

use futures::future::{BoxFuture, FutureExt, Shared};
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use threadline_types::{Event, Result, TransportError};

/// An immutable run log, cheap to clone.
pub type RunEvents = Arc<[Event]>;

type SharedFetch = Shared<BoxFuture<'static, Result<RunEvents>>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheStats {
    pub entries: usize,
    pub capacity: usize,
    pub in_flight: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<String, RunEvents>,
    /// Run ids, least recently used first.
    lru_queue: VecDeque<String>,
    in_flight: HashMap<String, SharedFetch>,
    hits: u64,
    misses: u64,
    evictions: u64,
}

impl CacheState {
    fn touch(&mut self, run_id: &str) {
        if let Some(pos) = self.lru_queue.iter().position(|id| id == run_id) {
            if let Some(id) = self.lru_queue.remove(pos) {
                self.lru_queue.push_back(id);
            }
        }
    }

    fn insert(&mut self, run_id: String, events: RunEvents, capacity: usize) {
        if self.entries.contains_key(&run_id) {
            self.touch(&run_id);
            return;
        }

        while self.entries.len() >= capacity {
            let Some(oldest) = self.lru_queue.pop_front() else {
                break;
            };
            self.entries.remove(&oldest);
            self.evictions += 1;
            tracing::debug!(run_id = %oldest, "evicted run events");
        }

        self.lru_queue.push_back(run_id.clone());
        self.entries.insert(run_id, events);
    }

    fn remove(&mut self, run_id: &str) -> bool {
        self.lru_queue.retain(|id| id != run_id);
        self.entries.remove(run_id).is_some()
    }
}

#[derive(Clone)]
pub struct RunEventCache {
    capacity: usize,
    state: Arc<Mutex<CacheState>>,
}

impl RunEventCache {
    /// A capacity of zero is treated as one.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            state: Arc::new(Mutex::new(CacheState::default())),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Cached log for `run_id`, refreshing its recency.
    pub fn get(&self, run_id: &str) -> Option<RunEvents> {
        let mut state = self.lock();
        let events = state.entries.get(run_id).cloned()?;
        state.touch(run_id);
        Some(events)
    }

    pub fn contains(&self, run_id: &str) -> bool {
        self.lock().entries.contains_key(run_id)
    }

    /// Return the cached log or run `fetch` to produce it.
    ///
    /// Only call this for completed runs. If a fetch for the same run is
    /// already in flight the caller joins it instead of starting another.
    /// A cancellation belongs to whoever started the fetch: a joiner that sees
    /// `Cancelled` starts over with its own `fetch`. Failures are not cached.
    pub async fn get_or_fetch<F, Fut>(&self, run_id: &str, fetch: F) -> Result<RunEvents>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Vec<Event>>> + Send + 'static,
    {
        let shared = loop {
            let pending = {
                let mut state = self.lock();

                if let Some(events) = state.entries.get(run_id).cloned() {
                    state.hits += 1;
                    state.touch(run_id);
                    return Ok(events);
                }

                match state.in_flight.get(run_id).cloned() {
                    Some(pending) => pending,
                    None => {
                        state.misses += 1;
                        let shared = self.start_fetch(run_id.to_string(), fetch());
                        state.in_flight.insert(run_id.to_string(), shared.clone());
                        break shared;
                    }
                }
            };

            tracing::debug!(run_id, "joining in-flight fetch");
            match pending.await {
                Err(TransportError::Cancelled) => {
                    tracing::debug!(run_id, "joined fetch was cancelled by its starter, retrying");
                }
                result => return result,
            }
        };

        shared.await
    }

    /// Whoever drives the shared future to completion also files the result,
    /// so bookkeeping survives the original caller being dropped.
    fn start_fetch<Fut>(&self, run_id: String, fetch: Fut) -> SharedFetch
    where
        Fut: Future<Output = Result<Vec<Event>>> + Send + 'static,
    {
        let cache_state = Arc::clone(&self.state);
        let capacity = self.capacity;

        async move {
            let result = fetch.await.map(RunEvents::from);

            let mut state = cache_state
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            state.in_flight.remove(&run_id);
            if let Ok(events) = &result {
                state.insert(run_id, events.clone(), capacity);
            }
            result
        }
        .boxed()
        .shared()
    }

    /// Drop one entry. Returns whether it was cached.
    pub fn evict(&self, run_id: &str) -> bool {
        self.lock().remove(run_id)
    }

    pub fn clear(&self) {
        let mut state = self.lock();
        state.entries.clear();
        state.lru_queue.clear();
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.lock();
        CacheStats {
            entries: state.entries.len(),
            capacity: self.capacity,
            in_flight: state.in_flight.len(),
            hits: state.hits,
            misses: state.misses,
            evictions: state.evictions,
        }
    }
}

//! Asset reader
//!
//! Resolves an id by consulting the local store, then the backend groups in
//! order. Concurrent reads of the same id share one remote fetch: the first
//! caller spawns it, later callers join it, and the fetch removes itself
//! from the flight table when it finishes.

use std::collections::HashMap;
use std::ops::BitOr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use assetvault_client::AssetServer;
use assetvault_common::{Asset, AssetId};
use assetvault_storage::DiskStore;
use futures::future::{BoxFuture, FutureExt, Shared};
use futures::stream::{FuturesUnordered, StreamExt};
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::topology::BackendTopology;

/// How a read interacts with the local store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheRule(u8);

impl CacheRule {
    /// Read and populate the local store
    pub const NORMAL: Self = Self(0);
    /// Go upstream even if the local store has the asset
    pub const SKIP_READ: Self = Self(1);
    /// Do not copy a remote result into the local store
    pub const SKIP_WRITE: Self = Self(1 << 1);

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for CacheRule {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Snapshot of reader counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReadStats {
    pub local_hits: u64,
    pub remote_hits: u64,
    pub misses: u64,
    /// Reads that joined a fetch started by another caller
    pub coalesced: u64,
}

#[derive(Default)]
struct Counters {
    local_hits: AtomicU64,
    remote_hits: AtomicU64,
    misses: AtomicU64,
    coalesced: AtomicU64,
}

type Flight = Shared<BoxFuture<'static, Option<Arc<Asset>>>>;

struct ReaderInner {
    store: Arc<DiskStore>,
    topology: Arc<BackendTopology>,
    flights: Mutex<HashMap<AssetId, Flight>>,
    counters: Counters,
}

/// Single-flight asset reader; cheap to clone
#[derive(Clone)]
pub struct AssetReader {
    inner: Arc<ReaderInner>,
}

impl AssetReader {
    pub fn new(store: Arc<DiskStore>, topology: Arc<BackendTopology>) -> Self {
        Self {
            inner: Arc::new(ReaderInner {
                store,
                topology,
                flights: Mutex::new(HashMap::new()),
                counters: Counters::default(),
            }),
        }
    }

    /// Resolve `id`; `None` when no tier has it
    pub async fn get(&self, id: AssetId, rule: CacheRule) -> Option<Arc<Asset>> {
        if id.is_nil() {
            return None;
        }

        let inner = &self.inner;
        let has_upstream = !inner.topology.is_empty();

        // Without an upstream the local store is the only source, whatever
        // the rule says.
        if !rule.contains(CacheRule::SKIP_READ) || !has_upstream {
            if let Some(asset) = inner.store.get(id) {
                inner.counters.local_hits.fetch_add(1, Ordering::Relaxed);
                debug!(%id, "local store hit");
                return Some(asset);
            }
        }

        if !has_upstream {
            inner.counters.misses.fetch_add(1, Ordering::Relaxed);
            debug!(%id, "asset not found and no upstream configured");
            return None;
        }

        let result = self.join_flight(id).await;
        match &result {
            Some(asset) => {
                inner.counters.remote_hits.fetch_add(1, Ordering::Relaxed);
                if !rule.contains(CacheRule::SKIP_WRITE)
                    && let Err(e) = inner.store.put(Arc::clone(asset))
                {
                    warn!(%id, error = %e, "failed to cache remote asset locally");
                }
            }
            None => {
                inner.counters.misses.fetch_add(1, Ordering::Relaxed);
                debug!(%id, "asset not found on any backend");
            }
        }
        result
    }

    /// Resolve `id` in the background and hand the result to `on_result`
    ///
    /// The callback runs on a runtime worker, not on the caller's task.
    pub fn get_async<F>(&self, id: AssetId, rule: CacheRule, on_result: F) -> JoinHandle<()>
    where
        F: FnOnce(Option<Arc<Asset>>) + Send + 'static,
    {
        let reader = self.clone();
        tokio::spawn(async move {
            let result = reader.get(id, rule).await;
            on_result(result);
        })
    }

    pub fn stats(&self) -> ReadStats {
        let counters = &self.inner.counters;
        ReadStats {
            local_hits: counters.local_hits.load(Ordering::Relaxed),
            remote_hits: counters.remote_hits.load(Ordering::Relaxed),
            misses: counters.misses.load(Ordering::Relaxed),
            coalesced: counters.coalesced.load(Ordering::Relaxed),
        }
    }

    /// Number of remote fetches currently running
    pub fn in_flight(&self) -> usize {
        self.inner.flights.lock().len()
    }

    pub fn store(&self) -> &Arc<DiskStore> {
        &self.inner.store
    }

    fn join_flight(&self, id: AssetId) -> Flight {
        let mut flights = self.inner.flights.lock();
        if let Some(flight) = flights.get(&id) {
            self.inner.counters.coalesced.fetch_add(1, Ordering::Relaxed);
            debug!(%id, "joining in-flight fetch");
            return flight.clone();
        }

        // The fetch runs as its own task so it completes even if every
        // waiter is dropped.
        let inner = Arc::clone(&self.inner);
        let task = tokio::spawn(async move {
            let _entry = FlightEntry {
                inner: Arc::clone(&inner),
                id,
            };
            inner.fetch_remote(id).await
        });

        let flight = async move {
            task.await.unwrap_or_else(|e| {
                error!(%id, error = %e, "asset fetch task failed");
                None
            })
        }
        .boxed()
        .shared();

        flights.insert(id, flight.clone());
        flight
    }
}

impl ReaderInner {
    async fn fetch_remote(&self, id: AssetId) -> Option<Arc<Asset>> {
        for (index, group) in self.topology.groups().iter().enumerate() {
            let found = match group.as_slice() {
                [backend] => backend.request(id).await,
                backends => race(backends, id).await,
            };
            if let Some(asset) = found {
                debug!(%id, group = index, "fetched asset from upstream");
                return Some(Arc::new(asset));
            }
            debug!(%id, group = index, "backend group does not have asset");
        }
        None
    }
}

/// First non-empty answer from any backend in the group
async fn race(backends: &[Arc<dyn AssetServer>], id: AssetId) -> Option<Asset> {
    let mut pending: FuturesUnordered<_> = backends
        .iter()
        .map(|backend| backend.request(id))
        .collect();

    while let Some(result) = pending.next().await {
        if result.is_some() {
            return result;
        }
    }
    None
}

/// Removes the flight when the fetch task ends, including on panic
struct FlightEntry {
    inner: Arc<ReaderInner>,
    id: AssetId,
}

impl Drop for FlightEntry {
    fn drop(&mut self) {
        self.inner.flights.lock().remove(&self.id);
    }
}

//! Read-through coordination with request coalescing.
//!
//! Every read for a key goes through [`ReadThroughCoordinator::request`]:
//!
//! 1. A fresh entry is returned without touching the remote.
//! 2. Otherwise, if a fetch for the key is already in flight, the caller
//!    joins it and receives the same outcome.
//! 3. Otherwise a new fetch is started, stamped at initiation, and
//!    registered as the key's in-flight fetch.
//!
//! When a fetch settles, its result is applied only if no newer write was
//! applied in the meantime (see [`WriteStamp`]). A transient failure with a
//! cached entry resolves to that entry, marked as a fallback. An
//! unauthorized failure never does.
//!
//! Lock order is in-flight map, then store. Neither lock is held across an
//! await.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures_util::future::{BoxFuture, FutureExt, Shared};
use serde::{de::DeserializeOwned, Serialize};
use taskflow_core::{CacheResult, ErrorClass, RemoteError, RemoteResult};

use super::freshness::{CacheEntry, CacheRead, KeyState};
use super::key::StoreKey;
use super::stamp::WriteStamp;
use super::store::CacheStore;

type SharedFetch<V> = Shared<BoxFuture<'static, CacheResult<CacheRead<V>>>>;

struct InFlight<V> {
    stamp: WriteStamp,
    fetch: SharedFetch<V>,
}

type InFlightMap<K, V> = Arc<Mutex<HashMap<K, InFlight<V>>>>;

/// Per-request knobs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RequestOptions {
    /// Skip the freshness check and go to the remote (still coalesced).
    pub force: bool,
    /// The request was started by a timer or revalidation, not by a caller
    /// waiting on it. Failures are logged quietly.
    pub background: bool,
    /// Override the store's TTL for this request's freshness check.
    pub ttl: Option<Duration>,
}

impl RequestOptions {
    pub fn background() -> Self {
        Self {
            background: true,
            ..Self::default()
        }
    }

    pub fn forced() -> Self {
        Self {
            force: true,
            ..Self::default()
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }
}

/// Read-through front of one [`CacheStore`].
pub struct ReadThroughCoordinator<K, V> {
    store: Arc<CacheStore<K, V>>,
    in_flight: InFlightMap<K, V>,
}

impl<K, V> Clone for ReadThroughCoordinator<K, V> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            in_flight: Arc::clone(&self.in_flight),
        }
    }
}

fn lock<K, V>(map: &Mutex<HashMap<K, InFlight<V>>>) -> MutexGuard<'_, HashMap<K, InFlight<V>>> {
    map.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<K, V> ReadThroughCoordinator<K, V>
where
    K: StoreKey,
    V: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    pub fn new(store: Arc<CacheStore<K, V>>) -> Self {
        Self {
            store,
            in_flight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn store(&self) -> &Arc<CacheStore<K, V>> {
        &self.store
    }

    /// Whatever is cached for `key`, fresh or not, hydrating from the mirror
    /// if memory is empty. Never touches the remote.
    pub fn peek(&self, key: &K) -> Option<CacheRead<V>> {
        self.store.hydrate(key).map(CacheRead::from_cache)
    }

    pub fn is_in_flight(&self, key: &K) -> bool {
        lock(&self.in_flight).contains_key(key)
    }

    pub fn state(&self, key: &K) -> KeyState {
        let refreshing = self.is_in_flight(key);
        self.store.state(key, refreshing)
    }

    /// Force the next request for `key` to go to the remote.
    pub fn invalidate(&self, key: &K) {
        self.store.invalidate(key);
    }

    /// Read `key` through the cache, calling `fetch` at most once per
    /// coalesced group of concurrent requests.
    pub async fn request<F, Fut>(
        &self,
        key: &K,
        fetch: F,
        options: RequestOptions,
    ) -> CacheResult<CacheRead<V>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = RemoteResult<V>> + Send + 'static,
    {
        let ttl = options.ttl.unwrap_or_else(|| self.store.ttl());
        let pending = {
            let mut in_flight = lock(&self.in_flight);
            self.store.hydrate(key);

            if !options.force {
                if let Some(entry) = self.store.fresh_entry(key, ttl) {
                    return Ok(CacheRead::from_cache(entry));
                }
            }

            if let Some(existing) = in_flight.get(key) {
                self.store.record_coalesced();
                tracing::debug!(
                    cache = self.store.label(),
                    key = %key,
                    stamp = %existing.stamp,
                    "Joining in-flight fetch"
                );
                existing.fetch.clone()
            } else {
                self.store.record_miss();
                let stamp = self.store.begin_write(key);
                tracing::debug!(
                    cache = self.store.label(),
                    key = %key,
                    stamp = %stamp,
                    background = options.background,
                    "Starting fetch"
                );
                let fetch = settle(
                    Arc::clone(&self.store),
                    Arc::clone(&self.in_flight),
                    key.clone(),
                    stamp,
                    fetch(),
                    options.background,
                )
                .boxed()
                .shared();
                in_flight.insert(
                    key.clone(),
                    InFlight {
                        stamp,
                        fetch: fetch.clone(),
                    },
                );
                fetch
            }
        };
        pending.await
    }

    /// Invalidate `key` and request it again. Joins a fetch already in
    /// flight rather than starting a second one.
    pub async fn refresh_now<F, Fut>(&self, key: &K, fetch: F) -> CacheResult<CacheRead<V>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = RemoteResult<V>> + Send + 'static,
    {
        self.store.invalidate(key);
        self.request(key, fetch, RequestOptions::default()).await
    }

    /// Stale-while-revalidate: return whatever is cached right away and, if
    /// it is not fresh, refresh it in the background.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn revalidate<F, Fut>(&self, key: &K, fetch: F) -> Option<CacheRead<V>>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = RemoteResult<V>> + Send + 'static,
    {
        let cached = self.peek(key);
        if !self.store.is_fresh(key) {
            let coordinator = self.clone();
            let key = key.clone();
            tokio::spawn(async move {
                if let Err(e) = coordinator
                    .request(&key, fetch, RequestOptions::background())
                    .await
                {
                    tracing::debug!(
                        cache = coordinator.store.label(),
                        key = %key,
                        error = %e,
                        "Background revalidation failed"
                    );
                }
            });
        }
        cached
    }
}

async fn settle<K, V, Fut>(
    store: Arc<CacheStore<K, V>>,
    in_flight: InFlightMap<K, V>,
    key: K,
    stamp: WriteStamp,
    fetch: Fut,
    background: bool,
) -> CacheResult<CacheRead<V>>
where
    K: StoreKey,
    V: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
    Fut: Future<Output = RemoteResult<V>> + Send + 'static,
{
    let outcome = fetch.await;

    let mut in_flight = lock(&in_flight);
    if in_flight.get(&key).is_some_and(|pending| pending.stamp == stamp) {
        in_flight.remove(&key);
    }

    match outcome {
        Ok(value) => {
            let entry = CacheEntry::new(value, store.now());
            if store.apply_entry_if_newer(&key, stamp, entry.clone()) {
                return Ok(CacheRead::from_remote(entry.value, entry.fetched_at));
            }
            tracing::debug!(
                cache = store.label(),
                key = %key,
                stamp = %stamp,
                "Discarding fetch superseded by a newer write"
            );
            match store.get(&key) {
                Some(current) => Ok(CacheRead::from_cache(current)),
                // The store was cleared while the fetch was in flight.
                None => Ok(CacheRead::from_remote(entry.value, entry.fetched_at)),
            }
        }
        Err(error) => {
            store.record_error(&key, &error);
            fallback(&store, &key, error, background)
        }
    }
}

fn fallback<K, V>(
    store: &CacheStore<K, V>,
    key: &K,
    error: RemoteError,
    background: bool,
) -> CacheResult<CacheRead<V>>
where
    K: StoreKey,
    V: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    match error.class() {
        ErrorClass::Transient => match store.get(key) {
            Some(entry) => {
                store.record_fallback();
                if background {
                    tracing::debug!(cache = store.label(), key = %key, error = %error, "Serving last known data");
                } else {
                    tracing::warn!(cache = store.label(), key = %key, error = %error, "Serving last known data");
                }
                Ok(CacheRead::stale_fallback(entry, error))
            }
            None => {
                tracing::warn!(cache = store.label(), key = %key, error = %error, "Fetch failed with nothing cached");
                Err(error.into())
            }
        },
        ErrorClass::Unauthorized => {
            tracing::info!(cache = store.label(), key = %key, "Fetch rejected: session not authorized");
            Err(error.into())
        }
        ErrorClass::Rejected => {
            tracing::warn!(cache = store.label(), key = %key, error = %error, "Fetch rejected");
            Err(error.into())
        }
    }
}

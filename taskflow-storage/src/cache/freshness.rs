//! Cache entries and the metadata returned alongside every read.

use chrono::Duration as ChronoDuration;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use taskflow_core::{RemoteError, Timestamp};

/// A cached value and the moment it was obtained.
///
/// `fetched_at` is when the remote produced the value, or when an optimistic
/// mutation last rewrote it. It is persisted verbatim to the mirror, so a
/// hydrated entry is exactly as fresh as it was when written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry<V> {
    pub value: V,
    pub fetched_at: Timestamp,
}

impl<V> CacheEntry<V> {
    pub fn new(value: V, fetched_at: Timestamp) -> Self {
        Self { value, fetched_at }
    }

    /// Age of this entry at `now`. Entries stamped in the future are age zero.
    pub fn age_at(&self, now: Timestamp) -> Duration {
        (now - self.fetched_at)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }

    /// Fresh iff strictly younger than `ttl`.
    pub fn is_fresh_at(&self, now: Timestamp, ttl: Duration) -> bool {
        match ChronoDuration::from_std(ttl) {
            Ok(ttl) => now - self.fetched_at < ttl,
            // A TTL too large to represent never expires.
            Err(_) => true,
        }
    }
}

/// Where the value of a read came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadSource {
    /// Served from the store without touching the remote.
    Cache,
    /// Fetched from the remote by this request (or the one it joined).
    Remote,
    /// The remote failed transiently; this is the last known good value.
    StaleFallback { cause: RemoteError },
}

/// Result of a cache read, carrying staleness metadata.
#[derive(Debug, Clone)]
pub struct CacheRead<V> {
    value: V,
    fetched_at: Timestamp,
    source: ReadSource,
}

impl<V> CacheRead<V> {
    pub fn from_cache(entry: CacheEntry<V>) -> Self {
        Self {
            value: entry.value,
            fetched_at: entry.fetched_at,
            source: ReadSource::Cache,
        }
    }

    pub fn from_remote(value: V, fetched_at: Timestamp) -> Self {
        Self {
            value,
            fetched_at,
            source: ReadSource::Remote,
        }
    }

    pub fn stale_fallback(entry: CacheEntry<V>, cause: RemoteError) -> Self {
        Self {
            value: entry.value,
            fetched_at: entry.fetched_at,
            source: ReadSource::StaleFallback { cause },
        }
    }

    pub fn value(&self) -> &V {
        &self.value
    }

    pub fn into_value(self) -> V {
        self.value
    }

    pub fn fetched_at(&self) -> Timestamp {
        self.fetched_at
    }

    pub fn source(&self) -> &ReadSource {
        &self.source
    }

    pub fn was_cache_hit(&self) -> bool {
        matches!(self.source, ReadSource::Cache)
    }

    /// True when the remote failed and this value is last-known-good.
    pub fn is_fallback(&self) -> bool {
        matches!(self.source, ReadSource::StaleFallback { .. })
    }

    /// The transient failure this read is covering for, if any.
    pub fn fallback_cause(&self) -> Option<&RemoteError> {
        match &self.source {
            ReadSource::StaleFallback { cause } => Some(cause),
            _ => None,
        }
    }

    pub fn staleness_at(&self, now: Timestamp) -> Duration {
        (now - self.fetched_at).to_std().unwrap_or(Duration::ZERO)
    }

    pub fn map<U>(self, f: impl FnOnce(V) -> U) -> CacheRead<U> {
        CacheRead {
            value: f(self.value),
            fetched_at: self.fetched_at,
            source: self.source,
        }
    }
}

/// Observable state of one key, derived from its entry and flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyState {
    /// Nothing cached and nothing in flight.
    Empty,
    /// Cached and younger than the TTL.
    Fresh,
    /// Cached but past the TTL.
    Stale,
    /// A fetch is in flight (the previous entry, if any, is still served).
    Refreshing,
    /// The last fetch failed transiently; the old entry is still served.
    StaleWithError,
    /// The last fetch failed and there is nothing to fall back to.
    Error,
    /// Holds the result of an optimistic mutation whose write has not settled.
    FreshOptimistic,
}

impl KeyState {
    pub fn has_value(&self) -> bool {
        !matches!(self, KeyState::Empty | KeyState::Error)
    }
}

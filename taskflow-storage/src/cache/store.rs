//! In-memory cache store with optional durable mirror.
//!
//! The store is the single source of truth for what the client currently
//! shows. All operations are synchronous and complete under one lock, so an
//! entry is never observed half-written. The mirror is written while the
//! lock is held to keep mirror order equal to apply order; mirror failures
//! are logged and otherwise ignored.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::{de::DeserializeOwned, Serialize};
use taskflow_core::{RemoteError, SharedClock, Timestamp};

use super::freshness::{CacheEntry, KeyState};
use super::key::StoreKey;
use super::mirror::{decode_entry, encode_entry, DurableMirror};
use super::stamp::{StampLedger, WriteStamp};

/// Counters for one logical cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Reads answered from a fresh entry.
    pub hits: u64,
    /// Reads that started a remote fetch.
    pub misses: u64,
    /// Reads that joined a fetch already in flight.
    pub coalesced: u64,
    /// Reads answered with last-known-good data after a transient failure.
    pub fallbacks: u64,
    /// Settled writes dropped because a newer write had been applied.
    pub discarded: u64,
    /// Optimistic mutations rolled back.
    pub rollbacks: u64,
    /// Entries currently held in memory.
    pub entry_count: u64,
}

impl CacheStats {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses + self.coalesced;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[derive(Debug)]
struct Slot<V> {
    entry: Option<CacheEntry<V>>,
    ledger: StampLedger,
    invalidated: bool,
    /// Last transient failure since the last applied write.
    last_error: Option<RemoteError>,
    /// Stamp of an optimistic write whose remote call has not settled.
    optimistic: Option<WriteStamp>,
}

impl<V> Slot<V> {
    fn new(epoch: u64) -> Self {
        Self {
            entry: None,
            ledger: StampLedger::new(epoch),
            invalidated: false,
            last_error: None,
            optimistic: None,
        }
    }
}

struct Inner<K, V> {
    /// Bumped by `clear`; stamps from an older epoch never apply.
    epoch: u64,
    slots: HashMap<K, Slot<V>>,
    stats: CacheStats,
}

impl<K: StoreKey, V> Inner<K, V> {
    fn slot(&mut self, key: &K) -> &mut Slot<V> {
        let epoch = self.epoch;
        self.slots
            .entry(key.clone())
            .or_insert_with(|| Slot::new(epoch))
    }

    fn recount(&mut self) {
        self.stats.entry_count = self.slots.values().filter(|s| s.entry.is_some()).count() as u64;
    }
}

/// Keyed store of cached values for one logical cache.
pub struct CacheStore<K, V> {
    label: &'static str,
    ttl: Duration,
    clock: SharedClock,
    inner: Mutex<Inner<K, V>>,
    mirror: Option<Arc<dyn DurableMirror>>,
}

impl<K, V> CacheStore<K, V>
where
    K: StoreKey,
    V: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    /// Create a store whose entries stay fresh for `ttl`.
    pub fn new(label: &'static str, ttl: Duration, clock: SharedClock) -> Self {
        Self {
            label,
            ttl,
            clock,
            inner: Mutex::new(Inner {
                epoch: 0,
                slots: HashMap::new(),
                stats: CacheStats::default(),
            }),
            mirror: None,
        }
    }

    /// Mirror every applied write to `mirror`.
    pub fn with_mirror(mut self, mirror: Arc<dyn DurableMirror>) -> Self {
        self.mirror = Some(mirror);
        self
    }

    pub fn label(&self) -> &'static str {
        self.label
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn now(&self) -> Timestamp {
        self.clock.now()
    }

    fn lock(&self) -> MutexGuard<'_, Inner<K, V>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // === Reads ===

    /// The current entry for `key`, if any.
    pub fn get(&self, key: &K) -> Option<CacheEntry<V>> {
        self.lock()
            .slots
            .get(key)
            .and_then(|slot| slot.entry.clone())
    }

    /// Fresh iff an entry exists, is younger than the store TTL and has not
    /// been invalidated.
    pub fn is_fresh(&self, key: &K) -> bool {
        self.is_fresh_within(key, self.ttl)
    }

    pub fn is_fresh_within(&self, key: &K, ttl: Duration) -> bool {
        let now = self.clock.now();
        let inner = self.lock();
        inner
            .slots
            .get(key)
            .is_some_and(|slot| slot_is_fresh(slot, now, ttl))
    }

    /// The entry for `key` if it is fresh within `ttl`; counts a hit.
    pub(crate) fn fresh_entry(&self, key: &K, ttl: Duration) -> Option<CacheEntry<V>> {
        let now = self.clock.now();
        let mut inner = self.lock();
        let entry = inner
            .slots
            .get(key)
            .filter(|slot| slot_is_fresh(slot, now, ttl))
            .and_then(|slot| slot.entry.clone());
        if entry.is_some() {
            inner.stats.hits += 1;
        }
        entry
    }

    /// Read the mirrored entry for `key` without touching memory.
    pub fn load(&self, key: &K) -> Option<CacheEntry<V>> {
        let mirror = self.mirror.as_ref()?;
        let mirror_key = key.mirror_key();
        match mirror.get(&mirror_key) {
            Ok(Some(bytes)) => match decode_entry(&bytes) {
                Ok(entry) => Some(entry),
                Err(e) => {
                    tracing::warn!(
                        cache = self.label,
                        key = %key,
                        error = %e,
                        "Discarding unreadable mirror entry"
                    );
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(cache = self.label, key = %key, error = %e, "Mirror read failed");
                None
            }
        }
    }

    /// Seed memory from the mirror if memory holds nothing for `key`.
    ///
    /// The mirrored `fetched_at` is kept, so an old entry hydrates as stale.
    /// Returns the entry now in memory.
    pub fn hydrate(&self, key: &K) -> Option<CacheEntry<V>> {
        if let Some(entry) = self.get(key) {
            return Some(entry);
        }
        let loaded = self.load(key)?;
        let mut inner = self.lock();
        let slot = inner.slot(key);
        if slot.entry.is_none() {
            slot.entry = Some(loaded);
            tracing::debug!(cache = self.label, key = %key, "Hydrated entry from mirror");
        }
        let entry = slot.entry.clone();
        inner.recount();
        entry
    }

    /// Derive the observable state of `key`.
    ///
    /// `refreshing` is supplied by the coordinator, which owns in-flight
    /// bookkeeping.
    pub fn state(&self, key: &K, refreshing: bool) -> KeyState {
        let now = self.clock.now();
        let inner = self.lock();
        let Some(slot) = inner.slots.get(key) else {
            return if refreshing {
                KeyState::Refreshing
            } else {
                KeyState::Empty
            };
        };
        if refreshing {
            return KeyState::Refreshing;
        }
        match (&slot.entry, &slot.last_error) {
            (None, Some(_)) => KeyState::Error,
            (None, None) => KeyState::Empty,
            (Some(_), _) if slot.optimistic.is_some() => KeyState::FreshOptimistic,
            (Some(_), Some(_)) => KeyState::StaleWithError,
            (Some(_), None) if slot_is_fresh(slot, now, self.ttl) => KeyState::Fresh,
            (Some(_), None) => KeyState::Stale,
        }
    }

    pub fn stats(&self) -> CacheStats {
        self.lock().stats
    }

    // === Writes ===

    /// Install `value` as the entry for `key`, fetched now.
    pub fn put(&self, key: &K, value: V) -> WriteStamp {
        let now = self.clock.now();
        let mut inner = self.lock();
        let epoch = inner.epoch;
        let slot = inner.slot(key);
        let stamp = slot.ledger.issue(epoch);
        slot.ledger.try_apply(stamp);
        let entry = CacheEntry::new(value, now);
        self.apply_entry(slot, key, entry);
        inner.recount();
        stamp
    }

    /// Hand out the stamp for a write being initiated now.
    pub fn begin_write(&self, key: &K) -> WriteStamp {
        let mut inner = self.lock();
        let epoch = inner.epoch;
        inner.slot(key).ledger.issue(epoch)
    }

    /// Apply a settled write if nothing newer has been applied since it was
    /// initiated. Returns false if the write was discarded.
    pub fn apply_if_newer(&self, key: &K, stamp: WriteStamp, value: V) -> bool {
        let entry = CacheEntry::new(value, self.clock.now());
        self.apply_entry_if_newer(key, stamp, entry)
    }

    /// Like [`apply_if_newer`](Self::apply_if_newer) with an explicit entry.
    pub fn apply_entry_if_newer(&self, key: &K, stamp: WriteStamp, entry: CacheEntry<V>) -> bool {
        let mut inner = self.lock();
        if stamp.epoch != inner.epoch {
            inner.stats.discarded += 1;
            return false;
        }
        let slot = inner.slot(key);
        if !slot.ledger.try_apply(stamp) {
            inner.stats.discarded += 1;
            return false;
        }
        self.apply_entry(slot, key, entry);
        inner.recount();
        true
    }

    /// Apply an optimistic value under a fresh stamp and mark it pending.
    pub(crate) fn put_optimistic(&self, key: &K, value: V) -> WriteStamp {
        let now = self.clock.now();
        let mut inner = self.lock();
        let epoch = inner.epoch;
        let slot = inner.slot(key);
        let stamp = slot.ledger.issue(epoch);
        slot.ledger.try_apply(stamp);
        self.apply_entry(slot, key, CacheEntry::new(value, now));
        slot.optimistic = Some(stamp);
        inner.recount();
        stamp
    }

    /// Rewrite the entry in place if `stamp` is still the last applied write.
    ///
    /// `fetched_at` is left untouched.
    pub(crate) fn update_if_current(
        &self,
        key: &K,
        stamp: WriteStamp,
        f: impl FnOnce(&V) -> V,
    ) -> bool {
        let mut inner = self.lock();
        if stamp.epoch != inner.epoch {
            return false;
        }
        let Some(slot) = inner.slots.get_mut(key) else {
            return false;
        };
        if !slot.ledger.is_current(stamp) {
            return false;
        }
        let Some(entry) = slot.entry.as_ref() else {
            return false;
        };
        let updated = CacheEntry::new(f(&entry.value), entry.fetched_at);
        self.apply_entry(slot, key, updated);
        true
    }

    /// Put `snapshot` back if `stamp` is still the last applied write.
    ///
    /// The snapshot is restored verbatim, including its `fetched_at`. The
    /// applied stamp stays at `stamp` so older in-flight writes remain
    /// discarded.
    pub(crate) fn restore_if_current(
        &self,
        key: &K,
        stamp: WriteStamp,
        snapshot: Option<CacheEntry<V>>,
    ) -> bool {
        let mut inner = self.lock();
        if stamp.epoch != inner.epoch {
            return false;
        }
        let Some(slot) = inner.slots.get_mut(key) else {
            return false;
        };
        if slot.optimistic == Some(stamp) {
            slot.optimistic = None;
        }
        if !slot.ledger.is_current(stamp) {
            return false;
        }
        match snapshot {
            Some(entry) => self.apply_entry(slot, key, entry),
            None => {
                slot.entry = None;
                self.mirror_remove(key);
            }
        }
        inner.stats.rollbacks += 1;
        inner.recount();
        true
    }

    /// True while `stamp` is the last write applied to `key`.
    pub(crate) fn is_current(&self, key: &K, stamp: WriteStamp) -> bool {
        let inner = self.lock();
        stamp.epoch == inner.epoch
            && inner
                .slots
                .get(key)
                .is_some_and(|slot| slot.ledger.is_current(stamp))
    }

    /// Mark an optimistic write as settled.
    pub(crate) fn settle_optimistic(&self, key: &K, stamp: WriteStamp) {
        let mut inner = self.lock();
        if let Some(slot) = inner.slots.get_mut(key) {
            if slot.optimistic == Some(stamp) {
                slot.optimistic = None;
            }
        }
    }

    /// Remember a failed fetch for state reporting.
    pub(crate) fn record_error(&self, key: &K, error: &RemoteError) {
        let mut inner = self.lock();
        inner.slot(key).last_error = Some(error.clone());
    }

    pub(crate) fn record_miss(&self) {
        self.lock().stats.misses += 1;
    }

    pub(crate) fn record_coalesced(&self) {
        self.lock().stats.coalesced += 1;
    }

    pub(crate) fn record_fallback(&self) {
        self.lock().stats.fallbacks += 1;
    }

    /// Force the next read of `key` to go to the remote.
    ///
    /// The entry stays readable as last-known-good.
    pub fn invalidate(&self, key: &K) {
        let mut inner = self.lock();
        if let Some(slot) = inner.slots.get_mut(key) {
            slot.invalidated = true;
        }
    }

    /// Drop the entry for `key`, in memory and in the mirror.
    ///
    /// Takes a write stamp, so fetches initiated before the removal are
    /// discarded when they settle.
    pub fn remove(&self, key: &K) -> bool {
        let mut inner = self.lock();
        let epoch = inner.epoch;
        let slot = inner.slot(key);
        let stamp = slot.ledger.issue(epoch);
        slot.ledger.try_apply(stamp);
        let removed = slot.entry.take().is_some();
        slot.invalidated = false;
        slot.last_error = None;
        slot.optimistic = None;
        self.mirror_remove(key);
        inner.recount();
        removed
    }

    /// Invalidate every key matching `predicate`.
    pub fn invalidate_where(&self, predicate: impl Fn(&K) -> bool) -> usize {
        let mut inner = self.lock();
        let mut count = 0;
        for (key, slot) in inner.slots.iter_mut() {
            if predicate(key) {
                slot.invalidated = true;
                count += 1;
            }
        }
        count
    }

    /// Drop everything, in memory and in the mirror.
    ///
    /// Writes initiated before the clear are discarded when they settle.
    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.epoch += 1;
        inner.slots.clear();
        inner.recount();
        if let Some(mirror) = &self.mirror {
            if let Err(e) = mirror.clear() {
                tracing::warn!(cache = self.label, error = %e, "Failed to clear mirror");
            }
        }
        tracing::debug!(cache = self.label, epoch = inner.epoch, "Cache cleared");
    }

    fn apply_entry(&self, slot: &mut Slot<V>, key: &K, entry: CacheEntry<V>) {
        self.mirror_write(key, &entry);
        slot.entry = Some(entry);
        slot.invalidated = false;
        slot.last_error = None;
    }

    fn mirror_write(&self, key: &K, entry: &CacheEntry<V>) {
        let Some(mirror) = &self.mirror else {
            return;
        };
        let result = encode_entry(entry).and_then(|bytes| mirror.set(&key.mirror_key(), &bytes));
        if let Err(e) = result {
            tracing::warn!(cache = self.label, key = %key, error = %e, "Mirror write failed");
        }
    }

    fn mirror_remove(&self, key: &K) {
        if let Some(mirror) = &self.mirror {
            if let Err(e) = mirror.remove(&key.mirror_key()) {
                tracing::warn!(cache = self.label, key = %key, error = %e, "Mirror remove failed");
            }
        }
    }
}

fn slot_is_fresh<V>(slot: &Slot<V>, now: Timestamp, ttl: Duration) -> bool {
    !slot.invalidated
        && slot
            .entry
            .as_ref()
            .is_some_and(|entry| entry.is_fresh_at(now, ttl))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::mirror::InMemoryMirror;
    use chrono::{TimeZone, Utc};
    use std::sync::atomic::{AtomicI64, Ordering};
    use taskflow_core::{Clock, MirrorError};

    #[derive(Debug, Clone, PartialEq, Eq, Hash)]
    struct Key(&'static str);

    impl std::fmt::Display for Key {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.write_str(self.0)
        }
    }

    impl StoreKey for Key {
        fn mirror_key(&self) -> String {
            format!("taskflow:test:{}", self.0)
        }
    }

    struct StepClock(AtomicI64);

    impl StepClock {
        fn advance(&self, secs: i64) {
            self.0.fetch_add(secs, Ordering::SeqCst);
        }
    }

    impl Clock for StepClock {
        fn now(&self) -> Timestamp {
            Utc.timestamp_opt(1_700_000_000 + self.0.load(Ordering::SeqCst), 0)
                .unwrap()
        }
    }

    struct BrokenMirror;

    impl DurableMirror for BrokenMirror {
        fn get(&self, _key: &str) -> Result<Option<Vec<u8>>, MirrorError> {
            Err(MirrorError::Io {
                reason: "disk gone".into(),
            })
        }
        fn set(&self, _key: &str, _bytes: &[u8]) -> Result<(), MirrorError> {
            Err(MirrorError::Io {
                reason: "disk full".into(),
            })
        }
        fn remove(&self, _key: &str) -> Result<(), MirrorError> {
            Err(MirrorError::Io {
                reason: "disk gone".into(),
            })
        }
        fn clear(&self) -> Result<(), MirrorError> {
            Err(MirrorError::Io {
                reason: "disk gone".into(),
            })
        }
    }

    fn store(ttl_secs: u64) -> (CacheStore<Key, Vec<u32>>, Arc<StepClock>) {
        let clock = Arc::new(StepClock(AtomicI64::new(0)));
        let store = CacheStore::new("test", Duration::from_secs(ttl_secs), clock.clone());
        (store, clock)
    }

    #[test]
    fn test_put_then_get() {
        let (store, _clock) = store(60);
        store.put(&Key("a"), vec![1, 2]);
        assert_eq!(store.get(&Key("a")).unwrap().value, vec![1, 2]);
        assert!(store.get(&Key("b")).is_none());
        assert_eq!(store.stats().entry_count, 1);
    }

    #[test]
    fn test_freshness_expires_with_clock() {
        let (store, clock) = store(60);
        store.put(&Key("a"), vec![1]);
        assert!(store.is_fresh(&Key("a")));
        assert_eq!(store.state(&Key("a"), false), KeyState::Fresh);

        clock.advance(60);
        assert!(!store.is_fresh(&Key("a")));
        assert_eq!(store.state(&Key("a"), false), KeyState::Stale);
    }

    #[test]
    fn test_invalidate_keeps_value_but_not_freshness() {
        let (store, _clock) = store(60);
        store.put(&Key("a"), vec![1]);
        store.invalidate(&Key("a"));
        assert!(!store.is_fresh(&Key("a")));
        assert_eq!(store.get(&Key("a")).unwrap().value, vec![1]);
    }

    #[test]
    fn test_apply_if_newer_discards_older_stamp() {
        let (store, _clock) = store(60);
        let early = store.begin_write(&Key("a"));
        let late = store.begin_write(&Key("a"));

        assert!(store.apply_if_newer(&Key("a"), late, vec![2]));
        assert!(!store.apply_if_newer(&Key("a"), early, vec![1]));
        assert_eq!(store.get(&Key("a")).unwrap().value, vec![2]);
        assert_eq!(store.stats().discarded, 1);
    }

    #[test]
    fn test_clear_discards_writes_started_before() {
        let (store, _clock) = store(60);
        let stamp = store.begin_write(&Key("a"));
        store.clear();
        assert!(!store.apply_if_newer(&Key("a"), stamp, vec![1]));
        assert!(store.get(&Key("a")).is_none());
    }

    #[test]
    fn test_remove_drops_entry_and_earlier_writes() {
        let clock = Arc::new(StepClock(AtomicI64::new(0)));
        let mirror = Arc::new(InMemoryMirror::new());
        let store: CacheStore<Key, Vec<u32>> =
            CacheStore::new("test", Duration::from_secs(60), clock).with_mirror(mirror.clone());
        store.put(&Key("a"), vec![1]);
        let in_flight = store.begin_write(&Key("a"));

        assert!(store.remove(&Key("a")));
        assert!(store.get(&Key("a")).is_none());
        assert!(mirror.is_empty());
        assert_eq!(store.stats().entry_count, 0);

        assert!(!store.apply_if_newer(&Key("a"), in_flight, vec![2]));
        assert!(store.get(&Key("a")).is_none());
        assert!(!store.remove(&Key("a")));
    }

    #[test]
    fn test_restore_keeps_original_fetched_at() {
        let (store, clock) = store(60);
        store.put(&Key("a"), vec![1]);
        let snapshot = store.get(&Key("a"));

        clock.advance(10);
        let stamp = store.put_optimistic(&Key("a"), vec![1, 2]);
        assert_eq!(store.state(&Key("a"), false), KeyState::FreshOptimistic);

        assert!(store.restore_if_current(&Key("a"), stamp, snapshot.clone()));
        assert_eq!(store.get(&Key("a")), snapshot);
        assert_eq!(store.state(&Key("a"), false), KeyState::Fresh);
        assert_eq!(store.stats().rollbacks, 1);
    }

    #[test]
    fn test_restore_skipped_after_newer_write() {
        let (store, _clock) = store(60);
        store.put(&Key("a"), vec![1]);
        let snapshot = store.get(&Key("a"));
        let stamp = store.put_optimistic(&Key("a"), vec![1, 2]);
        store.put(&Key("a"), vec![9]);

        assert!(!store.restore_if_current(&Key("a"), stamp, snapshot));
        assert_eq!(store.get(&Key("a")).unwrap().value, vec![9]);
    }

    #[test]
    fn test_error_states() {
        let (store, _clock) = store(60);
        store.record_error(&Key("a"), &RemoteError::Timeout);
        assert_eq!(store.state(&Key("a"), false), KeyState::Error);

        store.put(&Key("b"), vec![1]);
        store.record_error(&Key("b"), &RemoteError::Timeout);
        assert_eq!(store.state(&Key("b"), false), KeyState::StaleWithError);
        assert_eq!(store.state(&Key("b"), true), KeyState::Refreshing);
    }

    #[test]
    fn test_hydrate_keeps_mirrored_timestamp() {
        let clock = Arc::new(StepClock(AtomicI64::new(0)));
        let mirror = Arc::new(InMemoryMirror::new());

        let first: CacheStore<Key, Vec<u32>> =
            CacheStore::new("test", Duration::from_secs(60), clock.clone())
                .with_mirror(mirror.clone());
        first.put(&Key("a"), vec![7]);
        let written = first.get(&Key("a")).unwrap();

        clock.advance(120);
        let second: CacheStore<Key, Vec<u32>> =
            CacheStore::new("test", Duration::from_secs(60), clock.clone())
                .with_mirror(mirror);
        assert!(second.get(&Key("a")).is_none());

        let hydrated = second.hydrate(&Key("a")).unwrap();
        assert_eq!(hydrated, written);
        assert!(!second.is_fresh(&Key("a")));
    }

    #[test]
    fn test_hydrate_never_overwrites_memory() {
        let clock = Arc::new(StepClock(AtomicI64::new(0)));
        let mirror = Arc::new(InMemoryMirror::new());
        let stale = CacheEntry::new(vec![1u32], clock.now());
        mirror
            .set("taskflow:test:a", &encode_entry(&stale).unwrap())
            .unwrap();

        let store: CacheStore<Key, Vec<u32>> =
            CacheStore::new("test", Duration::from_secs(60), clock).with_mirror(mirror);
        store.put(&Key("a"), vec![2]);
        assert_eq!(store.hydrate(&Key("a")).unwrap().value, vec![2]);
    }

    #[test]
    fn test_mirror_failure_does_not_fail_put() {
        let clock = Arc::new(StepClock(AtomicI64::new(0)));
        let store: CacheStore<Key, Vec<u32>> =
            CacheStore::new("test", Duration::from_secs(60), clock)
                .with_mirror(Arc::new(BrokenMirror));
        store.put(&Key("a"), vec![3]);
        assert_eq!(store.get(&Key("a")).unwrap().value, vec![3]);
        assert!(store.hydrate(&Key("b")).is_none());
        store.clear();
        assert!(store.get(&Key("a")).is_none());
    }

    #[test]
    fn test_clear_wipes_mirror() {
        let clock = Arc::new(StepClock(AtomicI64::new(0)));
        let mirror = Arc::new(InMemoryMirror::new());
        let store: CacheStore<Key, Vec<u32>> =
            CacheStore::new("test", Duration::from_secs(60), clock).with_mirror(mirror.clone());
        store.put(&Key("a"), vec![3]);
        assert_eq!(mirror.len(), 1);

        store.clear();
        assert!(mirror.is_empty());
        assert!(store.load(&Key("a")).is_none());
    }

    #[test]
    fn test_hit_rate() {
        let stats = CacheStats {
            hits: 3,
            misses: 1,
            ..Default::default()
        };
        assert!((stats.hit_rate() - 0.75).abs() < f64::EPSILON);
        assert_eq!(CacheStats::default().hit_rate(), 0.0);
    }
}

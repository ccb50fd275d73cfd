//! Optimistic mutations over cached collections.
//!
//! A mutation rewrites the cached collection immediately, then runs the
//! remote write. On failure the collection is put back exactly as it was,
//! unless a newer write has been applied in the meantime, in which case the
//! newer write wins and nothing is restored.
//!
//! Mutations on the same key are serialized: the second one begins only
//! after the first has settled. Mutations on different keys are independent.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};

use taskflow_core::{CacheError, CacheRecord, CacheResult, RemoteResult};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use uuid::Uuid;

use super::freshness::CacheEntry;
use super::key::StoreKey;
use super::stamp::WriteStamp;
use super::store::CacheStore;

type Transform<T> = Box<dyn FnOnce(&[T]) -> Vec<T> + Send>;

/// One queue per key with a mutation pending or waiting.
type Queues<K> = Arc<Mutex<HashMap<K, Arc<AsyncMutex<()>>>>>;

/// Drop the queue for `key` once nobody holds or waits on it.
fn prune_queue<K: StoreKey>(queues: &Queues<K>, key: &K) {
    let mut queues = queues.lock().unwrap_or_else(PoisonError::into_inner);
    if queues.get(key).is_some_and(|q| Arc::strong_count(q) == 1) {
        queues.remove(key);
    }
}

/// A pure rewrite of a cached collection.
pub struct Mutation<T> {
    label: &'static str,
    target: Option<Uuid>,
    require_target: bool,
    transform: Transform<T>,
}

impl<T: CacheRecord> Mutation<T> {
    /// Rewrite the record with `id` in place.
    pub fn update(id: Uuid, f: impl FnOnce(&mut T) + Send + 'static) -> Self {
        Self {
            label: "update",
            target: Some(id),
            require_target: true,
            transform: Box::new(move |records| {
                let mut next = records.to_vec();
                if let Some(record) = next.iter_mut().find(|r| r.record_id() == id) {
                    f(record);
                }
                next
            }),
        }
    }

    /// Rewrite every record.
    pub fn update_all(f: impl Fn(&mut T) + Send + 'static) -> Self {
        Self {
            label: "update_all",
            target: None,
            require_target: false,
            transform: Box::new(move |records| {
                let mut next = records.to_vec();
                next.iter_mut().for_each(&f);
                next
            }),
        }
    }

    pub fn remove(id: Uuid) -> Self {
        Self {
            label: "remove",
            target: Some(id),
            require_target: true,
            transform: Box::new(move |records| {
                records
                    .iter()
                    .filter(|r| r.record_id() != id)
                    .cloned()
                    .collect()
            }),
        }
    }

    /// Move the record with `id` to `index`, shifting the others.
    pub fn move_to(id: Uuid, index: usize) -> Self {
        Self {
            label: "move",
            target: Some(id),
            require_target: true,
            transform: Box::new(move |records| {
                let mut next = records.to_vec();
                if let Some(from) = next.iter().position(|r| r.record_id() == id) {
                    let record = next.remove(from);
                    let to = index.min(next.len());
                    next.insert(to, record);
                }
                next
            }),
        }
    }

    /// Insert a placeholder record at `index`. A record returned by the
    /// remote write replaces the placeholder.
    pub fn insert(index: usize, record: T) -> Self {
        Self {
            label: "insert",
            target: Some(record.record_id()),
            require_target: false,
            transform: Box::new(move |records| {
                let mut next = records.to_vec();
                let at = index.min(next.len());
                next.insert(at, record);
                next
            }),
        }
    }

    /// Arbitrary rewrite. `target` names the record a returned server
    /// record should replace.
    pub fn custom(
        label: &'static str,
        target: Option<Uuid>,
        f: impl FnOnce(&[T]) -> Vec<T> + Send + 'static,
    ) -> Self {
        Self {
            label,
            target,
            require_target: false,
            transform: Box::new(f),
        }
    }

    pub fn label(&self) -> &'static str {
        self.label
    }

    pub fn target(&self) -> Option<Uuid> {
        self.target
    }
}

/// How a committed mutation settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationOutcome {
    /// The write succeeded; the optimistic state stands.
    Kept,
    /// The write succeeded and the server's record was merged in.
    Merged,
    /// The write succeeded but a newer write had already replaced the
    /// optimistic state, so nothing was merged.
    Superseded,
}

/// Applies optimistic mutations to one collection store.
pub struct OptimisticMutator<K, T> {
    store: Arc<CacheStore<K, Vec<T>>>,
    queues: Queues<K>,
}

impl<K, T> Clone for OptimisticMutator<K, T> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            queues: Arc::clone(&self.queues),
        }
    }
}

impl<K, T> OptimisticMutator<K, T>
where
    K: StoreKey,
    T: CacheRecord,
{
    pub fn new(store: Arc<CacheStore<K, Vec<T>>>) -> Self {
        Self {
            store,
            queues: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn queue(&self, key: &K) -> Arc<AsyncMutex<()>> {
        let mut queues = self.queues.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(queues.entry(key.clone()).or_default())
    }

    #[cfg(test)]
    fn queue_count(&self) -> usize {
        self.queues.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Apply `mutation` to the cached collection and return a handle that
    /// settles it. Waits for earlier mutations on the same key to settle.
    ///
    /// Dropping the handle without committing rolls the mutation back.
    pub async fn begin(
        &self,
        key: &K,
        mutation: Mutation<T>,
    ) -> CacheResult<PendingMutation<K, T>> {
        let permit = self.queue(key).lock_owned().await;

        let Some(snapshot) = self.store.hydrate(key) else {
            drop(permit);
            prune_queue(&self.queues, key);
            return Err(CacheError::NothingCached {
                key: key.to_string(),
            });
        };
        if let (true, Some(id)) = (mutation.require_target, mutation.target) {
            if !snapshot.value.iter().any(|r| r.record_id() == id) {
                drop(permit);
                prune_queue(&self.queues, key);
                return Err(CacheError::RecordMissing {
                    key: key.to_string(),
                    id,
                });
            }
        }

        let next = (mutation.transform)(snapshot.value.as_slice());
        let stamp = self.store.put_optimistic(key, next);
        tracing::debug!(
            cache = self.store.label(),
            key = %key,
            mutation = mutation.label,
            stamp = %stamp,
            "Applied optimistic mutation"
        );

        Ok(PendingMutation {
            store: Arc::clone(&self.store),
            key: key.clone(),
            stamp,
            label: mutation.label,
            target: mutation.target,
            snapshot: Some(snapshot),
            queues: Arc::clone(&self.queues),
            permit: Some(permit),
        })
    }

    /// Apply `mutation`, run `write`, and settle.
    ///
    /// `write` is not polled until the optimistic state is visible.
    pub async fn mutate<Fut>(
        &self,
        key: &K,
        mutation: Mutation<T>,
        write: Fut,
    ) -> CacheResult<MutationOutcome>
    where
        Fut: Future<Output = RemoteResult<Option<T>>>,
    {
        self.begin(key, mutation).await?.commit(write).await
    }
}

/// An applied optimistic mutation awaiting its remote write.
pub struct PendingMutation<K, T>
where
    K: StoreKey,
    T: CacheRecord,
{
    store: Arc<CacheStore<K, Vec<T>>>,
    key: K,
    stamp: WriteStamp,
    label: &'static str,
    target: Option<Uuid>,
    /// Pre-mutation entry; `None` once settled.
    snapshot: Option<CacheEntry<Vec<T>>>,
    queues: Queues<K>,
    permit: Option<OwnedMutexGuard<()>>,
}

impl<K, T> PendingMutation<K, T>
where
    K: StoreKey,
    T: CacheRecord,
{
    pub fn stamp(&self) -> WriteStamp {
        self.stamp
    }

    pub fn key(&self) -> &K {
        &self.key
    }

    /// Await the remote write and settle the mutation.
    ///
    /// On failure the snapshot is restored (if still current) and the
    /// write's error is returned.
    pub async fn commit<Fut>(mut self, write: Fut) -> CacheResult<MutationOutcome>
    where
        Fut: Future<Output = RemoteResult<Option<T>>>,
    {
        let outcome = write.await;
        let snapshot = self.snapshot.take();

        match outcome {
            Ok(Some(record)) => {
                let target = self.target.unwrap_or_else(|| record.record_id());
                let merged = self.store.update_if_current(&self.key, self.stamp, |records| {
                    merge_record(records, target, record)
                });
                self.store.settle_optimistic(&self.key, self.stamp);
                Ok(if merged {
                    MutationOutcome::Merged
                } else {
                    MutationOutcome::Superseded
                })
            }
            Ok(None) => {
                let current = self.store.is_current(&self.key, self.stamp);
                self.store.settle_optimistic(&self.key, self.stamp);
                Ok(if current {
                    MutationOutcome::Kept
                } else {
                    MutationOutcome::Superseded
                })
            }
            Err(error) => {
                let restored = self.store.restore_if_current(&self.key, self.stamp, snapshot);
                tracing::warn!(
                    cache = self.store.label(),
                    key = %self.key,
                    mutation = self.label,
                    rolled_back = restored,
                    error = %error,
                    "Optimistic mutation failed"
                );
                Err(error.into())
            }
        }
    }

    /// Abandon the mutation and restore the snapshot if still current.
    pub fn rollback(mut self) -> bool {
        match self.snapshot.take() {
            Some(snapshot) => self
                .store
                .restore_if_current(&self.key, self.stamp, Some(snapshot)),
            None => false,
        }
    }
}

impl<K, T> Drop for PendingMutation<K, T>
where
    K: StoreKey,
    T: CacheRecord,
{
    fn drop(&mut self) {
        if let Some(snapshot) = self.snapshot.take() {
            let restored = self
                .store
                .restore_if_current(&self.key, self.stamp, Some(snapshot));
            tracing::debug!(
                cache = self.store.label(),
                key = %self.key,
                mutation = self.label,
                rolled_back = restored,
                "Optimistic mutation abandoned"
            );
        }
        drop(self.permit.take());
        prune_queue(&self.queues, &self.key);
    }
}

/// Replace the record with id `target` (or, failing that, the record's own
/// id) with `record`, keeping its position.
fn merge_record<T: CacheRecord>(records: &[T], target: Uuid, record: T) -> Vec<T> {
    let mut next = records.to_vec();
    let position = next
        .iter()
        .position(|r| r.record_id() == target)
        .or_else(|| next.iter().position(|r| r.record_id() == record.record_id()));
    if let Some(at) = position {
        next[at] = record;
    }
    next
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};
    use std::time::Duration;
    use taskflow_core::{system_clock, RemoteError};

    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    struct Row {
        id: Uuid,
        name: String,
    }

    impl CacheRecord for Row {
        fn record_id(&self) -> Uuid {
            self.id
        }
    }

    #[derive(Debug, Clone, PartialEq, Eq, Hash)]
    struct Key;

    impl std::fmt::Display for Key {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.write_str("rows")
        }
    }

    impl StoreKey for Key {
        fn mirror_key(&self) -> String {
            "taskflow:test:rows".to_string()
        }
    }

    fn row(n: u128, name: &str) -> Row {
        Row {
            id: Uuid::from_u128(n),
            name: name.to_string(),
        }
    }

    fn mutator(rows: Vec<Row>) -> OptimisticMutator<Key, Row> {
        let store = Arc::new(CacheStore::new("rows", Duration::from_secs(60), system_clock()));
        store.put(&Key, rows);
        OptimisticMutator::new(store)
    }

    fn names(mutator: &OptimisticMutator<Key, Row>) -> Vec<String> {
        mutator
            .store
            .get(&Key)
            .unwrap()
            .value
            .into_iter()
            .map(|r| r.name)
            .collect()
    }

    #[tokio::test]
    async fn test_move_to_reorders() {
        let mutator = mutator(vec![row(1, "a"), row(2, "b"), row(3, "c")]);
        let outcome = mutator
            .mutate(&Key, Mutation::move_to(Uuid::from_u128(3), 0), async {
                Ok(None)
            })
            .await
            .unwrap();
        assert_eq!(outcome, MutationOutcome::Kept);
        assert_eq!(names(&mutator), ["c", "a", "b"]);
    }

    #[tokio::test]
    async fn test_move_past_end_clamps() {
        let mutator = mutator(vec![row(1, "a"), row(2, "b")]);
        mutator
            .mutate(&Key, Mutation::move_to(Uuid::from_u128(1), 9), async {
                Ok(None)
            })
            .await
            .unwrap();
        assert_eq!(names(&mutator), ["b", "a"]);
    }

    #[tokio::test]
    async fn test_failed_write_restores_snapshot() {
        let mutator = mutator(vec![row(1, "a"), row(2, "b")]);
        let before = mutator.store.get(&Key);

        let err = mutator
            .mutate(&Key, Mutation::remove(Uuid::from_u128(1)), async {
                Err(RemoteError::Validation {
                    reason: "constraint".into(),
                })
            })
            .await
            .unwrap_err();
        assert!(matches!(err, CacheError::Remote(RemoteError::Validation { .. })));
        assert_eq!(mutator.store.get(&Key), before);
    }

    #[tokio::test]
    async fn test_server_record_merged_at_target() {
        let mutator = mutator(vec![row(1, "a"), row(2, "b")]);
        let outcome = mutator
            .mutate(
                &Key,
                Mutation::update(Uuid::from_u128(2), |r: &mut Row| r.name = "b-local".into()),
                async { Ok(Some(row(2, "b-server"))) },
            )
            .await
            .unwrap();
        assert_eq!(outcome, MutationOutcome::Merged);
        assert_eq!(names(&mutator), ["a", "b-server"]);
    }

    #[tokio::test]
    async fn test_insert_placeholder_replaced_by_server_record() {
        let mutator = mutator(vec![row(1, "a")]);
        mutator
            .mutate(&Key, Mutation::insert(0, row(99, "draft")), async {
                Ok(Some(row(5, "created")))
            })
            .await
            .unwrap();
        assert_eq!(names(&mutator), ["created", "a"]);
    }

    #[tokio::test]
    async fn test_missing_target_is_rejected() {
        let mutator = mutator(vec![row(1, "a")]);
        let err = mutator
            .mutate(&Key, Mutation::remove(Uuid::from_u128(7)), async { Ok(None) })
            .await
            .unwrap_err();
        assert!(matches!(err, CacheError::RecordMissing { .. }));
    }

    #[tokio::test]
    async fn test_nothing_cached_is_rejected() {
        let store: Arc<CacheStore<Key, Vec<Row>>> =
            Arc::new(CacheStore::new("rows", Duration::from_secs(60), system_clock()));
        let mutator = OptimisticMutator::new(store);
        let err = mutator
            .mutate(&Key, Mutation::update_all(|r: &mut Row| r.name.clear()), async {
                Ok(None)
            })
            .await
            .unwrap_err();
        assert!(matches!(err, CacheError::NothingCached { .. }));
    }

    #[tokio::test]
    async fn test_dropped_handle_rolls_back() {
        let mutator = mutator(vec![row(1, "a")]);
        let pending = mutator
            .begin(&Key, Mutation::update_all(|r: &mut Row| r.name = "z".into()))
            .await
            .unwrap();
        assert_eq!(names(&mutator), ["z"]);
        drop(pending);
        assert_eq!(names(&mutator), ["a"]);
    }

    #[tokio::test]
    async fn test_settled_mutations_release_their_queue() {
        let mutator = mutator(vec![row(1, "a")]);
        let pending = mutator
            .begin(&Key, Mutation::update_all(|r: &mut Row| r.name = "b".into()))
            .await
            .unwrap();
        assert_eq!(mutator.queue_count(), 1);
        pending.commit(async { Ok(None) }).await.unwrap();
        assert_eq!(mutator.queue_count(), 0);

        mutator
            .mutate(&Key, Mutation::remove(Uuid::from_u128(1)), async {
                Err(RemoteError::Timeout)
            })
            .await
            .unwrap_err();
        mutator
            .mutate(&Key, Mutation::remove(Uuid::from_u128(7)), async { Ok(None) })
            .await
            .unwrap_err();
        assert_eq!(mutator.queue_count(), 0);
    }
}

//! The cached collections the app renders.
//!
//! Each feed resolves the active session on every call, reads through its
//! coordinator and writes through its mutator. Feeds are cheap handles;
//! all state lives in the service's stores.

mod notifications;
mod projects;
mod workspaces;

pub use notifications::NotificationFeed;
pub use projects::ProjectBoard;
pub use workspaces::WorkspaceBoard;

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use taskflow_core::{CacheRecord, RemoteResult, SharedClock};
use taskflow_storage::{CacheKey, CacheStore, DurableMirror, OptimisticMutator, ReadThroughCoordinator};

/// Boxed remote read that owns everything it needs.
pub(crate) type Fetch<T> = BoxFuture<'static, RemoteResult<Vec<T>>>;

/// One collection store with its read and write fronts.
pub(crate) struct Resource<T> {
    pub(crate) coordinator: ReadThroughCoordinator<CacheKey, Vec<T>>,
    pub(crate) mutator: OptimisticMutator<CacheKey, T>,
}

impl<T: CacheRecord> Resource<T> {
    pub(crate) fn new(
        label: &'static str,
        ttl: Duration,
        clock: SharedClock,
        mirror: Option<Arc<dyn DurableMirror>>,
    ) -> Self {
        let mut store = CacheStore::new(label, ttl, clock);
        if let Some(mirror) = mirror {
            store = store.with_mirror(mirror);
        }
        let store = Arc::new(store);
        Self {
            coordinator: ReadThroughCoordinator::new(Arc::clone(&store)),
            mutator: OptimisticMutator::new(store),
        }
    }

    pub(crate) fn clear(&self) {
        self.coordinator.store().clear();
    }
}

//! Taskflow Storage - Client Cache Layer
//!
//! In-memory store, durable LMDB mirror, read-through coordination and
//! optimistic mutations. See [`cache`] for the moving parts.

pub mod cache;

pub use cache::{
    CacheEntry, CacheKey, CacheRead, CacheStats, CacheStore, DurableMirror, InMemoryMirror,
    KeyState, LmdbMirror, Mutation, MutationOutcome, OptimisticMutator, PendingMutation,
    ReadSource, ReadThroughCoordinator, RefreshSchedule, Refreshable, RequestOptions,
    ResourceKind, SessionScope, StoreKey, Visibility, WriteStamp,
};

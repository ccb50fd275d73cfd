//! Client-side cache with explicit freshness and safe optimistic writes.
//!
//! # Layers
//!
//! - [`CacheStore`] holds one entry per key, mirrors it durably, and tracks
//!   the per-key [`WriteStamp`] that decides which settled write wins.
//! - [`ReadThroughCoordinator`] serves fresh entries, coalesces concurrent
//!   fetches, and falls back to last-known-good data on transient failures.
//! - [`OptimisticMutator`] rewrites cached collections ahead of the remote
//!   write and rolls back when the write fails.
//! - [`refresh_loop_task`] revalidates a feed on a visibility-dependent timer.
//!
//! # Session Scoping
//!
//! [`CacheKey`] cannot be built without a [`SessionScope`], so rows fetched
//! for one user are never served under another user's key.
//!
//! # Example
//!
//! ```ignore
//! let store = Arc::new(CacheStore::new("workspaces", ttls.workspaces, clock));
//! let coordinator = ReadThroughCoordinator::new(store.clone());
//!
//! let read = coordinator
//!     .request(&key, || backend.list_workspaces(&session), RequestOptions::default())
//!     .await?;
//! if read.is_fallback() {
//!     tracing::warn!("showing last known workspaces");
//! }
//! ```

pub mod coordinator;
pub mod freshness;
pub mod key;
pub mod lmdb_mirror;
pub mod mirror;
pub mod mutator;
pub mod schedule;
pub mod stamp;
pub mod store;

pub use coordinator::{ReadThroughCoordinator, RequestOptions};
pub use freshness::{CacheEntry, CacheRead, KeyState, ReadSource};
pub use key::{CacheKey, ResourceKind, SessionScope, StoreKey, MIRROR_PREFIX};
pub use lmdb_mirror::{LmdbMirror, DEFAULT_MAX_SIZE_MB};
pub use mirror::{decode_entry, encode_entry, DurableMirror, InMemoryMirror};
pub use mutator::{Mutation, MutationOutcome, OptimisticMutator, PendingMutation};
pub use schedule::{
    refresh_loop_task, spawn_refresh_loop, RefreshLoopMetrics, RefreshLoopSnapshot,
    RefreshSchedule, Refreshable, Visibility,
};
pub use stamp::WriteStamp;
pub use store::{CacheStats, CacheStore};

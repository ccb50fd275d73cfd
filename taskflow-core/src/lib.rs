//! Taskflow Core - Records, Errors and Collaborator Contracts
//!
//! Pure data types and traits shared by the cache layer and the client.
//! This crate performs no I/O.

pub mod clock;
pub mod config;
pub mod entities;
pub mod error;
pub mod identity;
pub mod remote;

pub use clock::{system_clock, Clock, SharedClock, SystemClock};
pub use config::{CacheTtls, RefreshIntervals};
pub use entities::{
    CacheRecord, Notification, Project, RelatedType, SessionUser, Workspace, WorkspaceVisibility,
};
pub use error::{
    CacheError, CacheResult, ErrorClass, MirrorError, RemoteError, TaskflowError, TaskflowResult,
};
pub use identity::{EntityIdType, NotificationId, ProjectId, Timestamp, UserId, WorkspaceId};
pub use remote::{
    AccessToken, AuthProvider, NewProject, NewWorkspace, RemoteBackend, RemoteResult, Session,
    NOTIFICATION_FETCH_LIMIT,
};

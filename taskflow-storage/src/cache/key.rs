//! Session-scoped cache keys.
//!
//! Every logical key names a resource *and* the session it was fetched for.
//! `CacheKey` has no public constructor that omits the scope, so one user's
//! cached rows can never be looked up under another user's key, even if the
//! in-memory store outlived a sign-out.

use std::fmt;
use std::hash::Hash;

use taskflow_core::{UserId, WorkspaceId};

/// Prefix of every durable mirror key.
pub const MIRROR_PREFIX: &str = "taskflow";

/// A key the store can hold.
///
/// Keys are compared in memory by value; `mirror_key` is the stable string
/// under which the entry is persisted.
pub trait StoreKey: Clone + Eq + Hash + fmt::Debug + fmt::Display + Send + Sync + 'static {
    fn mirror_key(&self) -> String;
}

/// Who a cached resource belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionScope {
    User(UserId),
    /// Used for lookups that happen before a user is known, e.g. resolving
    /// an access token to its user.
    Anonymous,
}

impl fmt::Display for SessionScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionScope::User(id) => write!(f, "user:{}", id),
            SessionScope::Anonymous => f.write_str("anon"),
        }
    }
}

/// What a cache entry holds.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Notifications,
    Workspaces,
    Projects(WorkspaceId),
    /// The user behind an access token, keyed by the token's digest.
    Identity { token_digest: String },
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceKind::Notifications => f.write_str("notifications"),
            ResourceKind::Workspaces => f.write_str("workspaces"),
            ResourceKind::Projects(workspace_id) => write!(f, "projects:{}", workspace_id),
            ResourceKind::Identity { token_digest } => write!(f, "identity:{}", token_digest),
        }
    }
}

/// A resource scoped to a session.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    scope: SessionScope,
    resource: ResourceKind,
}

impl CacheKey {
    pub fn new(scope: SessionScope, resource: ResourceKind) -> Self {
        Self { scope, resource }
    }

    pub fn notifications(user_id: UserId) -> Self {
        Self::new(SessionScope::User(user_id), ResourceKind::Notifications)
    }

    pub fn workspaces(user_id: UserId) -> Self {
        Self::new(SessionScope::User(user_id), ResourceKind::Workspaces)
    }

    pub fn projects(user_id: UserId, workspace_id: WorkspaceId) -> Self {
        Self::new(
            SessionScope::User(user_id),
            ResourceKind::Projects(workspace_id),
        )
    }

    pub fn identity(token_digest: impl Into<String>) -> Self {
        Self::new(
            SessionScope::Anonymous,
            ResourceKind::Identity {
                token_digest: token_digest.into(),
            },
        )
    }

    pub fn scope(&self) -> SessionScope {
        self.scope
    }

    pub fn resource(&self) -> &ResourceKind {
        &self.resource
    }

    /// Check if this key belongs to the given user.
    pub fn belongs_to(&self, user_id: UserId) -> bool {
        self.scope == SessionScope::User(user_id)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.resource, self.scope)
    }
}

impl StoreKey for CacheKey {
    fn mirror_key(&self) -> String {
        format!("{}:{}:{}", MIRROR_PREFIX, self.scope, self.resource)
    }
}

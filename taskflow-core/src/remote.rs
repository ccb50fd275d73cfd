//! Remote collaborator contracts.
//!
//! The cache layer never talks to the network itself. Reads and writes are
//! delegated to these traits, whose implementations must report
//! "unauthorized" distinctly from transient failures so the cache can
//! classify them.

use async_trait::async_trait;
use std::fmt;

use crate::entities::{Notification, Project, SessionUser, Workspace};
use crate::error::RemoteError;
use crate::identity::{NotificationId, ProjectId, WorkspaceId};

/// Result type for remote calls.
pub type RemoteResult<T> = Result<T, RemoteError>;

/// Most recent notifications fetched per refresh.
pub const NOTIFICATION_FETCH_LIMIT: usize = 50;

/// Bearer token issued by the auth provider.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct AccessToken(String);

impl AccessToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AccessToken(***)")
    }
}

/// An authenticated session: the resolved user plus the token that proves it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub user: SessionUser,
    pub access_token: AccessToken,
}

/// Payload for creating a workspace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewWorkspace {
    pub name: String,
    pub description: Option<String>,
    pub position: i32,
}

/// Payload for creating a project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewProject {
    pub workspace_id: WorkspaceId,
    pub name: String,
    pub description: Option<String>,
    pub due_date: Option<chrono::NaiveDate>,
}

/// Resolves the user behind an access token.
#[async_trait]
pub trait AuthProvider: Send + Sync {
    async fn current_user(&self, access_token: &AccessToken) -> RemoteResult<SessionUser>;
}

/// Reads and writes against the hosted relational store.
///
/// Write methods that return a record return the server's authoritative
/// representation of the row after the write.
#[async_trait]
pub trait RemoteBackend: Send + Sync {
    // === Notifications ===

    /// Notifications for the session user, newest first.
    async fn list_notifications(
        &self,
        session: &Session,
        limit: usize,
    ) -> RemoteResult<Vec<Notification>>;

    async fn mark_notification_read(
        &self,
        session: &Session,
        id: NotificationId,
    ) -> RemoteResult<Option<Notification>>;

    async fn mark_all_notifications_read(&self, session: &Session) -> RemoteResult<()>;

    // === Workspaces ===

    /// Workspaces visible to the session user, by position then newest.
    async fn list_workspaces(&self, session: &Session) -> RemoteResult<Vec<Workspace>>;

    async fn create_workspace(
        &self,
        session: &Session,
        workspace: &NewWorkspace,
    ) -> RemoteResult<Workspace>;

    async fn rename_workspace(
        &self,
        session: &Session,
        id: WorkspaceId,
        name: &str,
    ) -> RemoteResult<Workspace>;

    /// Persist a full ordering; `positions[i]` is `(workspace, i)`.
    async fn update_workspace_positions(
        &self,
        session: &Session,
        positions: &[(WorkspaceId, i32)],
    ) -> RemoteResult<()>;

    async fn delete_workspace(&self, session: &Session, id: WorkspaceId) -> RemoteResult<()>;

    // === Projects ===

    /// Non-archived projects of a workspace, newest first, with task counts.
    async fn list_projects(
        &self,
        session: &Session,
        workspace_id: WorkspaceId,
    ) -> RemoteResult<Vec<Project>>;

    async fn create_project(&self, session: &Session, project: &NewProject)
        -> RemoteResult<Project>;

    async fn set_project_completed(
        &self,
        session: &Session,
        id: ProjectId,
        completed: bool,
    ) -> RemoteResult<Project>;

    async fn delete_project(&self, session: &Session, id: ProjectId) -> RemoteResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_access_token_debug_is_redacted() {
        let token = AccessToken::new("eyJhbGciOi.secret");
        assert_eq!(format!("{:?}", token), "AccessToken(***)");
        assert_eq!(token.expose(), "eyJhbGciOi.secret");
    }
}

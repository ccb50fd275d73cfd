//! Records the client caches.
//!
//! Field names follow the hosted database's column names so the records
//! deserialize straight from REST responses and survive a round-trip through
//! the durable mirror.

use crate::identity::{
    EntityIdType, NotificationId, ProjectId, Timestamp, UserId, WorkspaceId,
};
use chrono::NaiveDate;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use uuid::Uuid;

/// A record that lives inside a cached collection.
///
/// Optimistic mutations address records by id, so every collection element
/// must expose a stable identifier.
pub trait CacheRecord: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Identifier of this record within its collection.
    fn record_id(&self) -> Uuid;
}

// ============================================================================
// NOTIFICATIONS
// ============================================================================

/// In-app notification delivered to a single user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub id: NotificationId,
    pub user_id: UserId,
    /// Free-form category, e.g. `task_assigned` or `mention`.
    #[serde(rename = "type")]
    pub kind: String,
    pub message: String,
    pub related_id: Option<Uuid>,
    pub related_type: Option<RelatedType>,
    pub read: bool,
    pub created_at: Timestamp,
}

/// What a notification points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelatedType {
    Task,
    Comment,
    Post,
    Project,
    Workspace,
}

impl CacheRecord for Notification {
    fn record_id(&self) -> Uuid {
        self.id.as_uuid()
    }
}

// ============================================================================
// WORKSPACES
// ============================================================================

/// Who can see a workspace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkspaceVisibility {
    #[default]
    All,
    AdminOnly,
    SpecificUser,
}

/// Top-level container of projects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workspace {
    pub id: WorkspaceId,
    pub name: String,
    pub description: Option<String>,
    pub created_at: Timestamp,
    pub created_by: UserId,
    /// A null column means the workspace is visible to everyone.
    #[serde(default)]
    pub visibility: Option<WorkspaceVisibility>,
    #[serde(default)]
    pub specific_user_id: Option<UserId>,
    /// Manual sort order; lower comes first.
    #[serde(default)]
    pub position: Option<i32>,
}

impl Workspace {
    pub fn effective_visibility(&self) -> WorkspaceVisibility {
        self.visibility.unwrap_or_default()
    }
}

impl CacheRecord for Workspace {
    fn record_id(&self) -> Uuid {
        self.id.as_uuid()
    }
}

// ============================================================================
// PROJECTS
// ============================================================================

/// A project inside a workspace, with task counters computed at fetch time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub id: ProjectId,
    pub workspace_id: WorkspaceId,
    pub name: String,
    pub description: Option<String>,
    pub completed: bool,
    #[serde(default)]
    pub archived: bool,
    #[serde(default)]
    pub due_date: Option<NaiveDate>,
    pub created_at: Timestamp,
    #[serde(default)]
    pub task_count: u32,
    #[serde(default)]
    pub completed_task_count: u32,
}

impl Project {
    /// Share of finished tasks, rounded to a whole percent.
    pub fn completion_percentage(&self) -> u32 {
        if self.task_count == 0 {
            return 0;
        }
        let ratio = self.completed_task_count.min(self.task_count) as f64 / self.task_count as f64;
        (ratio * 100.0).round() as u32
    }
}

impl CacheRecord for Project {
    fn record_id(&self) -> Uuid {
        self.id.as_uuid()
    }
}

// ============================================================================
// SESSION
// ============================================================================

/// The user behind an access token, as reported by the auth provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionUser {
    pub id: UserId,
    pub email: String,
    #[serde(default)]
    pub full_name: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use proptest::prelude::*;

    fn project(task_count: u32, completed_task_count: u32) -> Project {
        Project {
            id: ProjectId::now_v7(),
            workspace_id: WorkspaceId::now_v7(),
            name: "Launch".to_string(),
            description: None,
            completed: false,
            archived: false,
            due_date: None,
            created_at: Utc::now(),
            task_count,
            completed_task_count,
        }
    }

    #[test]
    fn test_completion_percentage() {
        assert_eq!(project(0, 0).completion_percentage(), 0);
        assert_eq!(project(3, 1).completion_percentage(), 33);
        assert_eq!(project(3, 2).completion_percentage(), 67);
        assert_eq!(project(4, 4).completion_percentage(), 100);
    }

    proptest! {
        #[test]
        fn prop_completion_percentage_bounded(tasks in 0u32..10_000, done in 0u32..20_000) {
            let pct = project(tasks, done).completion_percentage();
            prop_assert!(pct <= 100);
            if done >= tasks && tasks > 0 {
                prop_assert_eq!(pct, 100);
            }
        }
    }

    #[test]
    fn test_notification_deserializes_from_row() {
        let row = serde_json::json!({
            "id": "0190f0b4-7a1e-7c3a-9a55-3f0c1d2e4b6a",
            "user_id": "0190f0b4-7a1e-7c3a-9a55-3f0c1d2e4b6b",
            "type": "mention",
            "message": "You were mentioned",
            "related_id": null,
            "related_type": "post",
            "read": false,
            "created_at": "2024-05-01T10:00:00Z"
        });
        let notification: Notification = serde_json::from_value(row).unwrap();
        assert_eq!(notification.kind, "mention");
        assert_eq!(notification.related_type, Some(RelatedType::Post));
        assert!(!notification.read);
    }

    #[test]
    fn test_workspace_null_visibility_means_all() {
        let row = serde_json::json!({
            "id": "0190f0b4-7a1e-7c3a-9a55-3f0c1d2e4b6a",
            "name": "Marketing",
            "description": null,
            "created_at": "2024-05-01T10:00:00Z",
            "created_by": "0190f0b4-7a1e-7c3a-9a55-3f0c1d2e4b6b",
            "visibility": null
        });
        let workspace: Workspace = serde_json::from_value(row).unwrap();
        assert_eq!(workspace.effective_visibility(), WorkspaceVisibility::All);
        assert_eq!(workspace.position, None);
    }
}

//! Taskflow Test Utilities
//!
//! Centralized test infrastructure for the Taskflow workspace:
//! - A manual clock for freshness tests
//! - A scripted in-memory backend with call counters, failure injection
//!   and gates for holding calls open
//! - Proptest generators and fixtures for the cached records
//! - Assertions for cache reads

pub use taskflow_core::{
    AccessToken, AuthProvider, CacheError, CacheResult, Clock, EntityIdType, NewProject,
    NewWorkspace, Notification, NotificationId, Project, ProjectId, RelatedType, RemoteBackend,
    RemoteError, RemoteResult, Session, SessionUser, SharedClock, Timestamp, UserId, Workspace,
    WorkspaceId, WorkspaceVisibility,
};
pub use taskflow_storage::CacheRead;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;

// ============================================================================
// MANUAL CLOCK
// ============================================================================

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    millis: AtomicI64,
}

impl ManualClock {
    pub fn new(start: Timestamp) -> Self {
        Self {
            millis: AtomicI64::new(start.timestamp_millis()),
        }
    }

    /// A clock starting at 2024-05-01T10:00:00Z, wrapped for sharing.
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new(fixtures::epoch()))
    }

    pub fn advance(&self, by: Duration) {
        self.millis.fetch_add(by.as_millis() as i64, Ordering::SeqCst);
    }

    pub fn set(&self, to: Timestamp) {
        self.millis.store(to.timestamp_millis(), Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        let millis = self.millis.load(Ordering::SeqCst);
        DateTime::from_timestamp_millis(millis).unwrap_or_else(Utc::now)
    }
}

// ============================================================================
// SCRIPTED BACKEND
// ============================================================================

/// Remote operations, for counting and scripting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    CurrentUser,
    ListNotifications,
    MarkNotificationRead,
    MarkAllNotificationsRead,
    ListWorkspaces,
    CreateWorkspace,
    RenameWorkspace,
    UpdateWorkspacePositions,
    DeleteWorkspace,
    ListProjects,
    CreateProject,
    SetProjectCompleted,
    DeleteProject,
}

/// Holds calls to one operation open until released.
#[derive(Debug, Clone)]
pub struct Gate {
    open: Arc<watch::Sender<bool>>,
}

impl Gate {
    pub fn release(&self) {
        self.open.send_replace(true);
    }
}

#[derive(Debug, Default)]
struct BackendState {
    users: HashMap<String, SessionUser>,
    revoked: HashSet<String>,
    notifications: Vec<Notification>,
    workspaces: Vec<Workspace>,
    projects: Vec<Project>,
}

#[derive(Debug, Default)]
struct Script {
    calls: HashMap<Op, usize>,
    failures: HashMap<Op, VecDeque<RemoteError>>,
    sticky: HashMap<Op, RemoteError>,
    gates: HashMap<Op, watch::Receiver<bool>>,
}

/// In-memory stand-in for the hosted backend.
///
/// Data lives in plain vectors and every call is counted per [`Op`]. Tests
/// can queue failures (`fail_next`), make an operation fail until cleared
/// (`fail_always`), or hold calls open behind a [`Gate`] to force overlap.
#[derive(Debug, Default)]
pub struct ScriptedBackend {
    state: Mutex<BackendState>,
    script: Mutex<Script>,
    clock: Option<SharedClockHandle>,
}

#[derive(Clone)]
struct SharedClockHandle(SharedClock);

impl std::fmt::Debug for SharedClockHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SharedClock")
    }
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stamp created rows with `clock` instead of the system time.
    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = Some(SharedClockHandle(clock));
        self
    }

    fn now(&self) -> Timestamp {
        match &self.clock {
            Some(SharedClockHandle(clock)) => clock.now(),
            None => Utc::now(),
        }
    }

    fn state(&self) -> MutexGuard<'_, BackendState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn script(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // === Seeding ===

    /// Register `user` and return a session for them.
    pub fn sign_up(&self, user: SessionUser) -> Session {
        let token = format!("token-{}", user.id);
        self.state().users.insert(token.clone(), user.clone());
        Session {
            user,
            access_token: AccessToken::new(token),
        }
    }

    /// Make every call with `session`'s token fail as unauthorized.
    pub fn revoke(&self, session: &Session) {
        self.state()
            .revoked
            .insert(session.access_token.expose().to_string());
    }

    pub fn seed_notifications(&self, notifications: impl IntoIterator<Item = Notification>) {
        self.state().notifications.extend(notifications);
    }

    pub fn seed_workspaces(&self, workspaces: impl IntoIterator<Item = Workspace>) {
        self.state().workspaces.extend(workspaces);
    }

    pub fn seed_projects(&self, projects: impl IntoIterator<Item = Project>) {
        self.state().projects.extend(projects);
    }

    /// Change server-side data behind the client's back.
    pub fn edit<R>(&self, f: impl FnOnce(&mut Vec<Notification>, &mut Vec<Workspace>, &mut Vec<Project>) -> R) -> R {
        let mut state = self.state();
        let BackendState {
            notifications,
            workspaces,
            projects,
            ..
        } = &mut *state;
        f(notifications, workspaces, projects)
    }

    pub fn workspaces(&self) -> Vec<Workspace> {
        self.state().workspaces.clone()
    }

    pub fn projects(&self) -> Vec<Project> {
        self.state().projects.clone()
    }

    pub fn notifications(&self) -> Vec<Notification> {
        self.state().notifications.clone()
    }

    // === Scripting ===

    /// Number of calls made to `op` so far.
    pub fn calls(&self, op: Op) -> usize {
        self.script().calls.get(&op).copied().unwrap_or(0)
    }

    /// Fail the next call to `op` with `error`. Queued failures are used in
    /// order.
    pub fn fail_next(&self, op: Op, error: RemoteError) {
        self.script()
            .failures
            .entry(op)
            .or_default()
            .push_back(error);
    }

    /// Fail every call to `op` with `error` until [`clear_failures`](Self::clear_failures).
    pub fn fail_always(&self, op: Op, error: RemoteError) {
        self.script().sticky.insert(op, error);
    }

    pub fn clear_failures(&self) {
        let mut script = self.script();
        script.failures.clear();
        script.sticky.clear();
    }

    /// Hold every call to `op` until the returned gate is released.
    pub fn hold(&self, op: Op) -> Gate {
        let (tx, rx) = watch::channel(false);
        self.script().gates.insert(op, rx);
        Gate { open: Arc::new(tx) }
    }

    /// Count the call, wait on any gate, then apply scripted failures.
    async fn enter(&self, op: Op) -> RemoteResult<()> {
        let gate = {
            let mut script = self.script();
            *script.calls.entry(op).or_default() += 1;
            script.gates.get(&op).cloned()
        };
        if let Some(mut gate) = gate {
            // A dropped gate counts as released.
            let _ = gate.wait_for(|open| *open).await;
        }
        let mut script = self.script();
        if let Some(error) = script.failures.get_mut(&op).and_then(VecDeque::pop_front) {
            return Err(error);
        }
        match script.sticky.get(&op) {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }

    fn authorize(&self, session: &Session) -> RemoteResult<()> {
        let state = self.state();
        let token = session.access_token.expose();
        if state.revoked.contains(token) || !state.users.contains_key(token) {
            return Err(RemoteError::unauthorized("invalid session"));
        }
        Ok(())
    }
}

fn not_found(resource: &str, id: impl std::fmt::Display) -> RemoteError {
    RemoteError::NotFound {
        resource: format!("{}/{}", resource, id),
    }
}

#[async_trait]
impl AuthProvider for ScriptedBackend {
    async fn current_user(&self, access_token: &AccessToken) -> RemoteResult<SessionUser> {
        self.enter(Op::CurrentUser).await?;
        let state = self.state();
        if state.revoked.contains(access_token.expose()) {
            return Err(RemoteError::unauthorized("token revoked"));
        }
        state
            .users
            .get(access_token.expose())
            .cloned()
            .ok_or_else(|| RemoteError::unauthorized("unknown token"))
    }
}

#[async_trait]
impl RemoteBackend for ScriptedBackend {
    async fn list_notifications(
        &self,
        session: &Session,
        limit: usize,
    ) -> RemoteResult<Vec<Notification>> {
        self.enter(Op::ListNotifications).await?;
        self.authorize(session)?;
        let mut rows: Vec<Notification> = self
            .state()
            .notifications
            .iter()
            .filter(|n| n.user_id == session.user.id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        rows.truncate(limit);
        Ok(rows)
    }

    async fn mark_notification_read(
        &self,
        session: &Session,
        id: NotificationId,
    ) -> RemoteResult<Option<Notification>> {
        self.enter(Op::MarkNotificationRead).await?;
        self.authorize(session)?;
        let mut state = self.state();
        let row = state
            .notifications
            .iter_mut()
            .find(|n| n.id == id && n.user_id == session.user.id)
            .ok_or_else(|| not_found("notifications", id))?;
        row.read = true;
        Ok(Some(row.clone()))
    }

    async fn mark_all_notifications_read(&self, session: &Session) -> RemoteResult<()> {
        self.enter(Op::MarkAllNotificationsRead).await?;
        self.authorize(session)?;
        self.state()
            .notifications
            .iter_mut()
            .filter(|n| n.user_id == session.user.id)
            .for_each(|n| n.read = true);
        Ok(())
    }

    async fn list_workspaces(&self, session: &Session) -> RemoteResult<Vec<Workspace>> {
        self.enter(Op::ListWorkspaces).await?;
        self.authorize(session)?;
        let user = session.user.id;
        let mut rows: Vec<Workspace> = self
            .state()
            .workspaces
            .iter()
            .filter(|w| match w.effective_visibility() {
                WorkspaceVisibility::All => true,
                WorkspaceVisibility::AdminOnly => w.created_by == user,
                WorkspaceVisibility::SpecificUser => {
                    w.created_by == user || w.specific_user_id == Some(user)
                }
            })
            .cloned()
            .collect();
        rows.sort_by(|a, b| {
            let pa = a.position.unwrap_or(i32::MAX);
            let pb = b.position.unwrap_or(i32::MAX);
            pa.cmp(&pb).then(b.created_at.cmp(&a.created_at))
        });
        Ok(rows)
    }

    async fn create_workspace(
        &self,
        session: &Session,
        workspace: &NewWorkspace,
    ) -> RemoteResult<Workspace> {
        self.enter(Op::CreateWorkspace).await?;
        self.authorize(session)?;
        if workspace.name.trim().is_empty() {
            return Err(RemoteError::Validation {
                reason: "name must not be empty".into(),
            });
        }
        let row = Workspace {
            id: WorkspaceId::now_v7(),
            name: workspace.name.clone(),
            description: workspace.description.clone(),
            created_at: self.now(),
            created_by: session.user.id,
            visibility: None,
            specific_user_id: None,
            position: Some(workspace.position),
        };
        self.state().workspaces.push(row.clone());
        Ok(row)
    }

    async fn rename_workspace(
        &self,
        session: &Session,
        id: WorkspaceId,
        name: &str,
    ) -> RemoteResult<Workspace> {
        self.enter(Op::RenameWorkspace).await?;
        self.authorize(session)?;
        let mut state = self.state();
        let row = state
            .workspaces
            .iter_mut()
            .find(|w| w.id == id)
            .ok_or_else(|| not_found("workspaces", id))?;
        row.name = name.to_string();
        Ok(row.clone())
    }

    async fn update_workspace_positions(
        &self,
        session: &Session,
        positions: &[(WorkspaceId, i32)],
    ) -> RemoteResult<()> {
        self.enter(Op::UpdateWorkspacePositions).await?;
        self.authorize(session)?;
        let mut state = self.state();
        for (id, position) in positions {
            if let Some(row) = state.workspaces.iter_mut().find(|w| w.id == *id) {
                row.position = Some(*position);
            }
        }
        Ok(())
    }

    async fn delete_workspace(&self, session: &Session, id: WorkspaceId) -> RemoteResult<()> {
        self.enter(Op::DeleteWorkspace).await?;
        self.authorize(session)?;
        let mut state = self.state();
        state.workspaces.retain(|w| w.id != id);
        state.projects.retain(|p| p.workspace_id != id);
        Ok(())
    }

    async fn list_projects(
        &self,
        session: &Session,
        workspace_id: WorkspaceId,
    ) -> RemoteResult<Vec<Project>> {
        self.enter(Op::ListProjects).await?;
        self.authorize(session)?;
        let mut rows: Vec<Project> = self
            .state()
            .projects
            .iter()
            .filter(|p| p.workspace_id == workspace_id && !p.archived)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(rows)
    }

    async fn create_project(
        &self,
        session: &Session,
        project: &NewProject,
    ) -> RemoteResult<Project> {
        self.enter(Op::CreateProject).await?;
        self.authorize(session)?;
        let row = Project {
            id: ProjectId::now_v7(),
            workspace_id: project.workspace_id,
            name: project.name.clone(),
            description: project.description.clone(),
            completed: false,
            archived: false,
            due_date: project.due_date,
            created_at: self.now(),
            task_count: 0,
            completed_task_count: 0,
        };
        self.state().projects.push(row.clone());
        Ok(row)
    }

    async fn set_project_completed(
        &self,
        session: &Session,
        id: ProjectId,
        completed: bool,
    ) -> RemoteResult<Project> {
        self.enter(Op::SetProjectCompleted).await?;
        self.authorize(session)?;
        let mut state = self.state();
        let row = state
            .projects
            .iter_mut()
            .find(|p| p.id == id)
            .ok_or_else(|| not_found("projects", id))?;
        row.completed = completed;
        Ok(row.clone())
    }

    async fn delete_project(&self, session: &Session, id: ProjectId) -> RemoteResult<()> {
        self.enter(Op::DeleteProject).await?;
        self.authorize(session)?;
        self.state().projects.retain(|p| p.id != id);
        Ok(())
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for generating Taskflow records.

    use super::*;
    use proptest::prelude::*;
    use uuid::Uuid;

    /// Generate a random UUID.
    pub fn arb_uuid() -> impl Strategy<Value = Uuid> {
        any::<[u8; 16]>().prop_map(Uuid::from_bytes)
    }

    pub fn arb_user_id() -> impl Strategy<Value = UserId> {
        arb_uuid().prop_map(UserId::new)
    }

    /// Generate a Timestamp within 2020-2030, whole milliseconds.
    pub fn arb_timestamp() -> impl Strategy<Value = Timestamp> {
        (1_577_836_800_000i64..1_893_456_000_000i64)
            .prop_map(|millis| DateTime::from_timestamp_millis(millis).unwrap_or_else(Utc::now))
    }

    pub fn arb_related_type() -> impl Strategy<Value = RelatedType> {
        prop_oneof![
            Just(RelatedType::Task),
            Just(RelatedType::Comment),
            Just(RelatedType::Post),
            Just(RelatedType::Project),
            Just(RelatedType::Workspace),
        ]
    }

    pub fn arb_notification(user_id: UserId) -> impl Strategy<Value = Notification> {
        (
            arb_uuid(),
            "[a-z_]{3,16}",
            "[A-Za-z ]{1,64}",
            proptest::option::of((arb_uuid(), arb_related_type())),
            any::<bool>(),
            arb_timestamp(),
        )
            .prop_map(move |(id, kind, message, related, read, created_at)| Notification {
                id: NotificationId::new(id),
                user_id,
                kind,
                message,
                related_id: related.map(|(id, _)| id),
                related_type: related.map(|(_, kind)| kind),
                read,
                created_at,
            })
    }

    pub fn arb_workspace(created_by: UserId) -> impl Strategy<Value = Workspace> {
        (
            arb_uuid(),
            "[A-Za-z][A-Za-z ]{0,31}",
            proptest::option::of(0i32..1000),
            arb_timestamp(),
        )
            .prop_map(move |(id, name, position, created_at)| Workspace {
                id: WorkspaceId::new(id),
                name,
                description: None,
                created_at,
                created_by,
                visibility: None,
                specific_user_id: None,
                position,
            })
    }

    pub fn arb_project(workspace_id: WorkspaceId) -> impl Strategy<Value = Project> {
        (arb_uuid(), "[A-Za-z][A-Za-z ]{0,31}", any::<bool>(), arb_timestamp(), 0u32..50)
            .prop_flat_map(move |(id, name, completed, created_at, tasks)| {
                (0..=tasks).prop_map(move |done| Project {
                    id: ProjectId::new(id),
                    workspace_id,
                    name: name.clone(),
                    description: None,
                    completed,
                    archived: false,
                    due_date: None,
                    created_at,
                    task_count: tasks,
                    completed_task_count: done,
                })
            })
    }

    /// A list of workspaces with distinct ids.
    pub fn arb_workspace_list(
        created_by: UserId,
        size: std::ops::Range<usize>,
    ) -> impl Strategy<Value = Vec<Workspace>> {
        prop::collection::vec(arb_workspace(created_by), size).prop_map(|mut rows| {
            let mut seen = HashSet::new();
            rows.retain(|w| seen.insert(w.id));
            rows
        })
    }

    /// Failures the cache must absorb by serving last-known-good data.
    pub fn arb_transient_error() -> impl Strategy<Value = RemoteError> {
        prop_oneof![
            proptest::option::of(0u64..10_000).prop_map(|ms| RemoteError::RateLimited {
                retry_after: ms.map(Duration::from_millis)
            }),
            "[a-z ]{1,24}".prop_map(RemoteError::malformed),
            Just(RemoteError::Timeout),
            (500u16..600).prop_map(|status| RemoteError::Unavailable {
                status,
                message: "upstream".into()
            }),
            "[a-z ]{1,24}".prop_map(|reason| RemoteError::Network { reason }),
        ]
    }

    /// Any remote failure.
    pub fn arb_remote_error() -> impl Strategy<Value = RemoteError> {
        prop_oneof![
            4 => arb_transient_error(),
            1 => "[a-z ]{1,24}".prop_map(RemoteError::unauthorized),
            1 => "[a-z]{1,12}".prop_map(|resource| RemoteError::NotFound { resource }),
            1 => "[a-z ]{1,24}".prop_map(|reason| RemoteError::Validation { reason }),
            1 => "[a-z ]{1,24}".prop_map(|reason| RemoteError::PermissionDenied { reason }),
        ]
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built records for common testing scenarios.

    use super::*;

    /// 2024-05-01T10:00:00Z, the start of every [`ManualClock::shared`].
    pub fn epoch() -> Timestamp {
        Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0)
            .single()
            .unwrap_or_else(Utc::now)
    }

    /// `epoch() + offset` seconds.
    pub fn at(offset_secs: i64) -> Timestamp {
        epoch() + chrono::Duration::seconds(offset_secs)
    }

    pub fn user(email: &str) -> SessionUser {
        SessionUser {
            id: UserId::now_v7(),
            email: email.to_string(),
            full_name: None,
        }
    }

    pub fn notification(user_id: UserId, message: &str, read: bool, created_at: Timestamp) -> Notification {
        Notification {
            id: NotificationId::now_v7(),
            user_id,
            kind: "task_assigned".to_string(),
            message: message.to_string(),
            related_id: None,
            related_type: Some(RelatedType::Task),
            read,
            created_at,
        }
    }

    pub fn workspace(created_by: UserId, name: &str, position: i32) -> Workspace {
        Workspace {
            id: WorkspaceId::now_v7(),
            name: name.to_string(),
            description: None,
            created_at: at(position as i64),
            created_by,
            visibility: None,
            specific_user_id: None,
            position: Some(position),
        }
    }

    /// A project created `age_secs` before [`epoch`].
    pub fn project(workspace_id: WorkspaceId, name: &str, age_secs: i64) -> Project {
        Project {
            id: ProjectId::now_v7(),
            workspace_id,
            name: name.to_string(),
            description: None,
            completed: false,
            archived: false,
            due_date: None,
            created_at: at(-age_secs),
            task_count: 4,
            completed_task_count: 1,
        }
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions for cache reads and errors.

    use super::*;

    /// Assert that a read is last-known-good data covering for a failure.
    #[track_caller]
    pub fn assert_fallback<V: std::fmt::Debug>(result: &CacheResult<CacheRead<V>>) {
        match result {
            Ok(read) if read.is_fallback() => {}
            other => panic!("Expected fallback read, got: {:?}", other),
        }
    }

    /// Assert that a read came from the remote.
    #[track_caller]
    pub fn assert_remote<V: std::fmt::Debug>(result: &CacheResult<CacheRead<V>>) {
        match result {
            Ok(read) if !read.was_cache_hit() && !read.is_fallback() => {}
            other => panic!("Expected remote read, got: {:?}", other),
        }
    }

    /// Assert that an operation failed because the session is not authorized.
    #[track_caller]
    pub fn assert_requires_sign_in<T: std::fmt::Debug>(result: &CacheResult<T>) {
        match result {
            Err(e) if e.requires_sign_in() => {}
            other => panic!("Expected unauthorized error, got: {:?}", other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_advances() {
        let clock = ManualClock::shared();
        let start = clock.now();
        clock.advance(Duration::from_secs(90));
        assert_eq!(clock.now() - start, chrono::Duration::seconds(90));
    }

    #[tokio::test]
    async fn test_scripted_failures_are_consumed_in_order() {
        let backend = ScriptedBackend::new();
        let session = backend.sign_up(fixtures::user("a@example.com"));
        backend.fail_next(Op::ListWorkspaces, RemoteError::Timeout);

        assert_eq!(
            backend.list_workspaces(&session).await,
            Err(RemoteError::Timeout)
        );
        assert!(backend.list_workspaces(&session).await.is_ok());
        assert_eq!(backend.calls(Op::ListWorkspaces), 2);
    }

    #[tokio::test]
    async fn test_revoked_session_is_unauthorized() {
        let backend = ScriptedBackend::new();
        let session = backend.sign_up(fixtures::user("a@example.com"));
        backend.revoke(&session);
        let err = backend.list_notifications(&session, 10).await.unwrap_err();
        assert!(err.is_unauthorized());
        assert!(backend
            .current_user(&session.access_token)
            .await
            .unwrap_err()
            .is_unauthorized());
    }

    #[tokio::test]
    async fn test_workspaces_sorted_by_position_then_newest() {
        let backend = ScriptedBackend::new();
        let session = backend.sign_up(fixtures::user("a@example.com"));
        let owner = session.user.id;
        let mut unpositioned = fixtures::workspace(owner, "loose", 0);
        unpositioned.position = None;
        backend.seed_workspaces([
            fixtures::workspace(owner, "second", 2),
            unpositioned,
            fixtures::workspace(owner, "first", 1),
        ]);

        let names: Vec<String> = backend
            .list_workspaces(&session)
            .await
            .unwrap()
            .into_iter()
            .map(|w| w.name)
            .collect();
        assert_eq!(names, ["first", "second", "loose"]);
    }
}

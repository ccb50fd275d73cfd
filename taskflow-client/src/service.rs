//! The session-scoped cache service.
//!
//! `TaskflowCache` owns every store for the life of the process. Data is
//! keyed by the signed-in user; signing out, or signing in as someone else,
//! wipes memory and the durable mirror.

use std::sync::{Arc, Mutex, PoisonError};

use taskflow_core::{
    system_clock, AccessToken, AuthProvider, CacheResult, CacheTtls, RefreshIntervals,
    RemoteBackend, Session, SharedClock, UserId, WorkspaceId,
};
use taskflow_storage::cache::{spawn_refresh_loop, RefreshLoopMetrics};
use taskflow_storage::{CacheStats, DurableMirror, LmdbMirror, RefreshSchedule, Refreshable, Visibility};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::api::PostgrestBackend;
use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult};
use crate::feeds::{NotificationFeed, ProjectBoard, Resource, WorkspaceBoard};
use crate::identity::IdentityCache;

/// Mirror key recording whose data the mirror holds.
const MIRROR_OWNER_KEY: &str = "taskflow:owner";

pub(crate) struct Shared {
    pub(crate) backend: Arc<dyn RemoteBackend>,
    pub(crate) clock: SharedClock,
    pub(crate) identity: IdentityCache,
    pub(crate) notifications: Resource<taskflow_core::Notification>,
    pub(crate) workspaces: Resource<taskflow_core::Workspace>,
    pub(crate) projects: Resource<taskflow_core::Project>,
    mirror: Option<Arc<dyn DurableMirror>>,
    /// Whose rows the memory stores hold. Survives expiry, reset on sign-out.
    data_owner: Mutex<Option<UserId>>,
    session_tx: watch::Sender<Option<Session>>,
    schedule: RefreshSchedule,
}

impl Shared {
    /// The active session, or [`ClientError::NotSignedIn`].
    pub(crate) fn session(&self) -> ClientResult<Session> {
        self.session_tx
            .borrow()
            .clone()
            .ok_or(ClientError::NotSignedIn)
    }

    pub(crate) fn current_session(&self) -> Option<Session> {
        self.session_tx.borrow().clone()
    }

    /// Convert a cache result, dropping `session` if the backend rejected it.
    pub(crate) fn settle<T>(&self, session: &Session, result: CacheResult<T>) -> ClientResult<T> {
        result.map_err(|e| {
            if e.requires_sign_in() {
                self.expire(session);
            }
            ClientError::Cache(e)
        })
    }

    /// Drop `session` if it is still the active one. Cached data stays; it is
    /// scoped to the user and cleared if someone else signs in.
    pub(crate) fn expire(&self, session: &Session) {
        let expired = self.session_tx.send_if_modified(|current| {
            let matches = current
                .as_ref()
                .is_some_and(|s| s.access_token == session.access_token);
            if matches {
                *current = None;
            }
            matches
        });
        if expired {
            self.identity.forget(&session.access_token);
            tracing::warn!(user_id = %session.user.id, "Session expired; sign-in required");
        }
    }

    fn clear_data(&self) {
        self.notifications.clear();
        self.workspaces.clear();
        self.projects.clear();
    }

    /// Record `user_id` as the owner of cached data, returning the previous
    /// owner.
    fn take_data_owner(&self, user_id: Option<UserId>) -> Option<UserId> {
        let mut owner = self.data_owner.lock().unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *owner, user_id)
    }

    fn mirror_owner(&self) -> Option<String> {
        let mirror = self.mirror.as_ref()?;
        match mirror.get(MIRROR_OWNER_KEY) {
            Ok(bytes) => bytes.and_then(|b| String::from_utf8(b).ok()),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read mirror owner");
                None
            }
        }
    }

    fn set_mirror_owner(&self, user_id: UserId) {
        if let Some(mirror) = &self.mirror {
            if let Err(e) = mirror.set(MIRROR_OWNER_KEY, user_id.to_string().as_bytes()) {
                tracing::warn!(error = %e, "Failed to record mirror owner");
            }
        }
    }
}

/// Per-store counters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ServiceStats {
    pub identity: CacheStats,
    pub notifications: CacheStats,
    pub workspaces: CacheStats,
    pub projects: CacheStats,
}

#[derive(Clone)]
pub struct TaskflowCache {
    shared: Arc<Shared>,
}

impl TaskflowCache {
    pub fn new(
        backend: Arc<dyn RemoteBackend>,
        auth: Arc<dyn AuthProvider>,
        ttls: CacheTtls,
        intervals: RefreshIntervals,
        clock: SharedClock,
        mirror: Option<Arc<dyn DurableMirror>>,
    ) -> Self {
        let (session_tx, _) = watch::channel(None);
        let shared = Shared {
            backend,
            identity: IdentityCache::new(auth, ttls.identity, Arc::clone(&clock)),
            notifications: Resource::new(
                "notifications",
                ttls.notifications,
                Arc::clone(&clock),
                mirror.clone(),
            ),
            workspaces: Resource::new(
                "workspaces",
                ttls.workspaces,
                Arc::clone(&clock),
                mirror.clone(),
            ),
            projects: Resource::new("projects", ttls.projects, Arc::clone(&clock), mirror.clone()),
            clock,
            mirror,
            data_owner: Mutex::new(None),
            session_tx,
            schedule: intervals.into(),
        };
        Self {
            shared: Arc::new(shared),
        }
    }

    /// Build the HTTP backend and, if configured, the LMDB mirror.
    pub fn from_config(config: &ClientConfig) -> ClientResult<Self> {
        let backend = Arc::new(PostgrestBackend::new(config)?);
        let mirror = match &config.mirror_path {
            Some(path) => {
                let mirror = LmdbMirror::open(path, config.mirror_max_size_mb)?;
                tracing::info!(path = %path.display(), "Opened cache mirror");
                Some(Arc::new(mirror) as Arc<dyn DurableMirror>)
            }
            None => None,
        };
        Ok(Self::new(
            backend.clone(),
            backend,
            config.cache_ttls(),
            config.refresh_intervals(),
            system_clock(),
            mirror,
        ))
    }

    /// Resolve `token` and make it the active session.
    ///
    /// Cached data belonging to a different user is wiped first.
    pub async fn sign_in(&self, token: AccessToken) -> ClientResult<Session> {
        let read = self.shared.identity.resolve(&token).await?;
        if read.is_fallback() {
            tracing::warn!("Auth provider unavailable; using cached identity");
        }
        let session = Session {
            user: read.into_value(),
            access_token: token,
        };
        let user_id = session.user.id;

        let previous = self.shared.current_session().map(|s| s.user.id);
        let held_for = self.shared.take_data_owner(Some(user_id));
        let owner = self.shared.mirror_owner();
        let other_user = previous.is_some_and(|id| id != user_id)
            || held_for.is_some_and(|id| id != user_id)
            || owner.is_some_and(|owner| owner != user_id.to_string());
        if other_user {
            tracing::info!(user_id = %user_id, "Different user signed in; clearing cache");
            self.shared.clear_data();
        }
        self.shared.set_mirror_owner(user_id);

        self.shared.session_tx.send_replace(Some(session.clone()));
        tracing::info!(user_id = %user_id, "Signed in");
        Ok(session)
    }

    /// End the session and wipe every store, in memory and on disk.
    pub fn sign_out(&self) {
        let previous = self.shared.session_tx.send_replace(None);
        self.shared.take_data_owner(None);
        self.shared.identity.clear();
        self.shared.clear_data();
        if let Some(session) = previous {
            tracing::info!(user_id = %session.user.id, "Signed out");
        }
    }

    pub fn session(&self) -> Option<Session> {
        self.shared.current_session()
    }

    /// Observe sign-in, sign-out and expiry.
    pub fn subscribe_session(&self) -> watch::Receiver<Option<Session>> {
        self.shared.session_tx.subscribe()
    }

    pub fn notifications(&self) -> NotificationFeed {
        NotificationFeed::new(Arc::clone(&self.shared))
    }

    pub fn workspaces(&self) -> WorkspaceBoard {
        WorkspaceBoard::new(Arc::clone(&self.shared))
    }

    pub fn projects(&self, workspace_id: WorkspaceId) -> ProjectBoard {
        ProjectBoard::new(Arc::clone(&self.shared), workspace_id)
    }

    pub fn schedule(&self) -> RefreshSchedule {
        self.shared.schedule
    }

    pub fn stats(&self) -> ServiceStats {
        ServiceStats {
            identity: self.shared.identity.coordinator().store().stats(),
            notifications: self.shared.notifications.coordinator.store().stats(),
            workspaces: self.shared.workspaces.coordinator.store().stats(),
            projects: self.shared.projects.coordinator.store().stats(),
        }
    }

    /// Revalidate `feed` on the configured schedule until shutdown.
    pub fn spawn_refresh(
        &self,
        feed: Arc<dyn Refreshable>,
        visibility_rx: watch::Receiver<Visibility>,
        shutdown_rx: watch::Receiver<bool>,
    ) -> JoinHandle<Arc<RefreshLoopMetrics>> {
        spawn_refresh_loop(feed, self.shared.schedule, visibility_rx, shutdown_rx)
    }

    pub fn spawn_notification_refresh(
        &self,
        visibility_rx: watch::Receiver<Visibility>,
        shutdown_rx: watch::Receiver<bool>,
    ) -> JoinHandle<Arc<RefreshLoopMetrics>> {
        self.spawn_refresh(Arc::new(self.notifications()), visibility_rx, shutdown_rx)
    }
}

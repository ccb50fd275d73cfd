use std::sync::Arc;

use async_trait::async_trait;
use futures_util::FutureExt;
use taskflow_core::{
    CacheResult, EntityIdType, Notification, NotificationId, Session, NOTIFICATION_FETCH_LIMIT,
};
use taskflow_storage::{
    CacheKey, CacheRead, KeyState, Mutation, MutationOutcome, Refreshable, RequestOptions,
};

use super::Fetch;
use crate::error::ClientResult;
use crate::service::Shared;

/// The signed-in user's most recent notifications, newest first.
#[derive(Clone)]
pub struct NotificationFeed {
    shared: Arc<Shared>,
}

impl NotificationFeed {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    fn key(session: &Session) -> CacheKey {
        CacheKey::notifications(session.user.id)
    }

    fn fetch(&self, session: &Session) -> impl FnOnce() -> Fetch<Notification> + Send + 'static {
        let backend = Arc::clone(&self.shared.backend);
        let session = session.clone();
        move || {
            async move {
                backend
                    .list_notifications(&session, NOTIFICATION_FETCH_LIMIT)
                    .await
            }
            .boxed()
        }
    }

    pub async fn list(&self) -> ClientResult<CacheRead<Vec<Notification>>> {
        let session = self.shared.session()?;
        let result = self
            .shared
            .notifications
            .coordinator
            .request(&Self::key(&session), self.fetch(&session), RequestOptions::default())
            .await;
        self.shared.settle(&session, result)
    }

    /// Whatever is cached, without touching the network.
    pub fn cached(&self) -> ClientResult<Option<CacheRead<Vec<Notification>>>> {
        let session = self.shared.session()?;
        Ok(self.shared.notifications.coordinator.peek(&Self::key(&session)))
    }

    /// Cached notifications now; a background refresh if they are stale.
    pub fn revalidate(&self) -> ClientResult<Option<CacheRead<Vec<Notification>>>> {
        let session = self.shared.session()?;
        Ok(self
            .shared
            .notifications
            .coordinator
            .revalidate(&Self::key(&session), self.fetch(&session)))
    }

    pub async fn refresh_now(&self) -> ClientResult<CacheRead<Vec<Notification>>> {
        let session = self.shared.session()?;
        let result = self
            .shared
            .notifications
            .coordinator
            .refresh_now(&Self::key(&session), self.fetch(&session))
            .await;
        self.shared.settle(&session, result)
    }

    pub fn state(&self) -> ClientResult<KeyState> {
        let session = self.shared.session()?;
        Ok(self.shared.notifications.coordinator.state(&Self::key(&session)))
    }

    /// Unread notifications in the cached list; zero when nothing is cached.
    pub fn unread_count(&self) -> ClientResult<usize> {
        Ok(self
            .cached()?
            .map(|read| read.value().iter().filter(|n| !n.read).count())
            .unwrap_or(0))
    }

    pub async fn mark_read(&self, id: NotificationId) -> ClientResult<MutationOutcome> {
        let session = self.shared.session()?;
        let backend = &self.shared.backend;
        let result = self
            .shared
            .notifications
            .mutator
            .mutate(
                &Self::key(&session),
                Mutation::update(id.as_uuid(), |n: &mut Notification| n.read = true),
                backend.mark_notification_read(&session, id),
            )
            .await;
        self.shared.settle(&session, result)
    }

    pub async fn mark_all_read(&self) -> ClientResult<MutationOutcome> {
        let session = self.shared.session()?;
        let backend = &self.shared.backend;
        let write = async { backend.mark_all_notifications_read(&session).await.map(|_| None) };
        let result = self
            .shared
            .notifications
            .mutator
            .mutate(
                &Self::key(&session),
                Mutation::update_all(|n: &mut Notification| n.read = true),
                write,
            )
            .await;
        self.shared.settle(&session, result)
    }
}

#[async_trait]
impl Refreshable for NotificationFeed {
    fn name(&self) -> &'static str {
        "notifications"
    }

    async fn refresh(&self) -> CacheResult<()> {
        let Some(session) = self.shared.current_session() else {
            tracing::debug!("No session; skipping notification refresh");
            return Ok(());
        };
        let result = self
            .shared
            .notifications
            .coordinator
            .request(&Self::key(&session), self.fetch(&session), RequestOptions::background())
            .await;
        if let Err(e) = &result {
            if e.requires_sign_in() {
                self.shared.expire(&session);
            }
        }
        result.map(|_| ())
    }
}

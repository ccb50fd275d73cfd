use std::sync::Arc;

use async_trait::async_trait;
use futures_util::FutureExt;
use taskflow_core::{
    CacheError, CacheResult, EntityIdType, NewWorkspace, RemoteError, Session, Workspace,
    WorkspaceId,
};
use taskflow_storage::{
    CacheKey, CacheRead, KeyState, Mutation, MutationOutcome, Refreshable, RequestOptions,
};

use super::Fetch;
use crate::error::{ClientError, ClientResult};
use crate::service::Shared;

/// Workspaces visible to the signed-in user, in manual order.
#[derive(Clone)]
pub struct WorkspaceBoard {
    shared: Arc<Shared>,
}

impl WorkspaceBoard {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    fn key(session: &Session) -> CacheKey {
        CacheKey::workspaces(session.user.id)
    }

    fn fetch(&self, session: &Session) -> impl FnOnce() -> Fetch<Workspace> + Send + 'static {
        let backend = Arc::clone(&self.shared.backend);
        let session = session.clone();
        move || async move { backend.list_workspaces(&session).await }.boxed()
    }

    pub async fn list(&self) -> ClientResult<CacheRead<Vec<Workspace>>> {
        let session = self.shared.session()?;
        let result = self
            .shared
            .workspaces
            .coordinator
            .request(&Self::key(&session), self.fetch(&session), RequestOptions::default())
            .await;
        self.shared.settle(&session, result)
    }

    pub fn cached(&self) -> ClientResult<Option<CacheRead<Vec<Workspace>>>> {
        let session = self.shared.session()?;
        Ok(self.shared.workspaces.coordinator.peek(&Self::key(&session)))
    }

    pub fn revalidate(&self) -> ClientResult<Option<CacheRead<Vec<Workspace>>>> {
        let session = self.shared.session()?;
        Ok(self
            .shared
            .workspaces
            .coordinator
            .revalidate(&Self::key(&session), self.fetch(&session)))
    }

    pub async fn refresh_now(&self) -> ClientResult<CacheRead<Vec<Workspace>>> {
        let session = self.shared.session()?;
        let result = self
            .shared
            .workspaces
            .coordinator
            .refresh_now(&Self::key(&session), self.fetch(&session))
            .await;
        self.shared.settle(&session, result)
    }

    pub fn state(&self) -> ClientResult<KeyState> {
        let session = self.shared.session()?;
        Ok(self.shared.workspaces.coordinator.state(&Self::key(&session)))
    }

    /// Move a workspace to `index` and persist the whole ordering.
    ///
    /// Every workspace's position is rewritten to its new index. After the
    /// positions are saved the list is refetched so it matches the server.
    pub async fn reorder(&self, id: WorkspaceId, index: usize) -> ClientResult<MutationOutcome> {
        let session = self.shared.session()?;
        let key = Self::key(&session);
        let resource = &self.shared.workspaces;

        let unchanged = resource.coordinator.peek(&key).is_some_and(|read| {
            let last = read.value().len().saturating_sub(1);
            read.value().iter().position(|w| w.id == id) == Some(index.min(last))
        });
        if unchanged {
            return Ok(MutationOutcome::Kept);
        }

        let pending = self.shared.settle(
            &session,
            resource
                .mutator
                .begin(&key, Mutation::custom("reorder", Some(id.as_uuid()), move |records| {
                    reordered(records, id, index)
                }))
                .await,
        )?;

        let positions: Vec<(WorkspaceId, i32)> = resource
            .coordinator
            .store()
            .get(&key)
            .map(|entry| {
                entry
                    .value
                    .iter()
                    .map(|w| (w.id, w.position.unwrap_or_default()))
                    .collect()
            })
            .unwrap_or_default();

        let backend = &self.shared.backend;
        let write = async {
            backend
                .update_workspace_positions(&session, &positions)
                .await
                .map(|_| None)
        };
        let result = self.shared.settle(&session, pending.commit(write).await);

        if result.as_ref().is_err_and(ClientError::requires_sign_in) {
            return result;
        }
        // A failed write may have landed in part; resync either way.
        if let Err(e) = self.refresh_now().await {
            tracing::warn!(error = %e, "Failed to resync workspaces after reorder");
        }
        result
    }

    pub async fn rename(&self, id: WorkspaceId, name: &str) -> ClientResult<MutationOutcome> {
        let session = self.shared.session()?;
        let backend = &self.shared.backend;
        let new_name = name.to_string();
        let write = async {
            backend
                .rename_workspace(&session, id, name)
                .await
                .map(Some)
        };
        let result = self
            .shared
            .workspaces
            .mutator
            .mutate(
                &Self::key(&session),
                Mutation::update(id.as_uuid(), move |w: &mut Workspace| w.name = new_name),
                write,
            )
            .await;
        self.shared.settle(&session, result)
    }

    pub async fn delete(&self, id: WorkspaceId) -> ClientResult<MutationOutcome> {
        let session = self.shared.session()?;
        let backend = &self.shared.backend;
        let write = async { backend.delete_workspace(&session, id).await.map(|_| None) };
        let result = self
            .shared
            .workspaces
            .mutator
            .mutate(&Self::key(&session), Mutation::remove(id.as_uuid()), write)
            .await;
        // Projects of a deleted workspace are gone server-side too.
        if result.is_ok() {
            self.shared
                .projects
                .coordinator
                .store()
                .invalidate(&CacheKey::projects(session.user.id, id));
        }
        self.shared.settle(&session, result)
    }

    /// Create a workspace at the top of the list.
    ///
    /// A placeholder is shown immediately and replaced by the server's row.
    pub async fn create(&self, name: &str, description: Option<&str>) -> ClientResult<Workspace> {
        // The optimistic insert needs a cached list to insert into.
        self.list().await?;
        let session = self.shared.session()?;

        let draft = NewWorkspace {
            name: name.trim().to_string(),
            description: description
                .map(str::trim)
                .filter(|d| !d.is_empty())
                .map(str::to_string),
            position: 0,
        };
        let placeholder = Workspace {
            id: WorkspaceId::now_v7(),
            name: draft.name.clone(),
            description: draft.description.clone(),
            created_at: self.shared.clock.now(),
            created_by: session.user.id,
            visibility: None,
            specific_user_id: None,
            position: Some(draft.position),
        };

        let pending = self.shared.settle(
            &session,
            self.shared
                .workspaces
                .mutator
                .begin(&Self::key(&session), Mutation::insert(0, placeholder))
                .await,
        )?;

        let backend = &self.shared.backend;
        let mut created = None;
        let write = async {
            let workspace = backend.create_workspace(&session, &draft).await?;
            created = Some(workspace.clone());
            Ok::<_, RemoteError>(Some(workspace))
        };
        let outcome = self.shared.settle(&session, pending.commit(write).await)?;
        tracing::debug!(?outcome, "Workspace created");

        created.ok_or_else(|| {
            ClientError::Cache(CacheError::Remote(RemoteError::malformed(
                "create returned no workspace",
            )))
        })
    }
}

/// Move `id` to `index` and renumber every position to match.
fn reordered(records: &[Workspace], id: WorkspaceId, index: usize) -> Vec<Workspace> {
    let mut next = records.to_vec();
    if let Some(from) = next.iter().position(|w| w.id == id) {
        let workspace = next.remove(from);
        let to = index.min(next.len());
        next.insert(to, workspace);
    }
    for (position, workspace) in next.iter_mut().enumerate() {
        workspace.position = Some(position as i32);
    }
    next
}

#[async_trait]
impl Refreshable for WorkspaceBoard {
    fn name(&self) -> &'static str {
        "workspaces"
    }

    async fn refresh(&self) -> CacheResult<()> {
        let Some(session) = self.shared.current_session() else {
            return Ok(());
        };
        let result = self
            .shared
            .workspaces
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

#[cfg(test)]
mod tests {
    use super::*;
    use taskflow_core::{EntityIdType, UserId};
    use taskflow_test_utils::fixtures;

    #[test]
    fn test_reordered_renumbers_positions() {
        let owner = UserId::now_v7();
        let list = vec![
            fixtures::workspace(owner, "a", 3),
            fixtures::workspace(owner, "b", 7),
            fixtures::workspace(owner, "c", 9),
        ];
        let next = reordered(&list, list[2].id, 0);
        let names: Vec<_> = next.iter().map(|w| w.name.as_str()).collect();
        assert_eq!(names, ["c", "a", "b"]);
        let positions: Vec<_> = next.iter().map(|w| w.position).collect();
        assert_eq!(positions, [Some(0), Some(1), Some(2)]);
    }
}

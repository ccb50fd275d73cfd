use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use futures_util::FutureExt;
use taskflow_core::{
    CacheError, CacheResult, EntityIdType, NewProject, Project, ProjectId, RemoteError, Session,
    WorkspaceId,
};
use taskflow_storage::{
    CacheKey, CacheRead, KeyState, Mutation, MutationOutcome, Refreshable, RequestOptions,
};

use super::Fetch;
use crate::error::{ClientError, ClientResult};
use crate::service::Shared;

/// Non-archived projects of one workspace, newest first.
#[derive(Clone)]
pub struct ProjectBoard {
    shared: Arc<Shared>,
    workspace_id: WorkspaceId,
}

impl ProjectBoard {
    pub(crate) fn new(shared: Arc<Shared>, workspace_id: WorkspaceId) -> Self {
        Self {
            shared,
            workspace_id,
        }
    }

    pub fn workspace_id(&self) -> WorkspaceId {
        self.workspace_id
    }

    fn key(&self, session: &Session) -> CacheKey {
        CacheKey::projects(session.user.id, self.workspace_id)
    }

    fn fetch(&self, session: &Session) -> impl FnOnce() -> Fetch<Project> + Send + 'static {
        let backend = Arc::clone(&self.shared.backend);
        let session = session.clone();
        let workspace_id = self.workspace_id;
        move || async move { backend.list_projects(&session, workspace_id).await }.boxed()
    }

    pub async fn list(&self) -> ClientResult<CacheRead<Vec<Project>>> {
        let session = self.shared.session()?;
        let result = self
            .shared
            .projects
            .coordinator
            .request(&self.key(&session), self.fetch(&session), RequestOptions::default())
            .await;
        self.shared.settle(&session, result)
    }

    pub fn cached(&self) -> ClientResult<Option<CacheRead<Vec<Project>>>> {
        let session = self.shared.session()?;
        Ok(self.shared.projects.coordinator.peek(&self.key(&session)))
    }

    pub fn revalidate(&self) -> ClientResult<Option<CacheRead<Vec<Project>>>> {
        let session = self.shared.session()?;
        Ok(self
            .shared
            .projects
            .coordinator
            .revalidate(&self.key(&session), self.fetch(&session)))
    }

    pub async fn refresh_now(&self) -> ClientResult<CacheRead<Vec<Project>>> {
        let session = self.shared.session()?;
        let result = self
            .shared
            .projects
            .coordinator
            .refresh_now(&self.key(&session), self.fetch(&session))
            .await;
        self.shared.settle(&session, result)
    }

    pub fn state(&self) -> ClientResult<KeyState> {
        let session = self.shared.session()?;
        Ok(self.shared.projects.coordinator.state(&self.key(&session)))
    }

    /// Flip a project's completion flag, then resync the list.
    pub async fn toggle_completion(&self, id: ProjectId) -> ClientResult<MutationOutcome> {
        let session = self.shared.session()?;
        let key = self.key(&session);
        let resource = &self.shared.projects;

        let pending = self.shared.settle(
            &session,
            resource
                .mutator
                .begin(
                    &key,
                    Mutation::update(id.as_uuid(), |p: &mut Project| p.completed = !p.completed),
                )
                .await,
        )?;
        let completed = resource
            .coordinator
            .store()
            .get(&key)
            .and_then(|entry| entry.value.into_iter().find(|p| p.id == id))
            .is_some_and(|p| p.completed);

        let backend = &self.shared.backend;
        let write = async {
            backend
                .set_project_completed(&session, id, completed)
                .await
                .map(|_| None)
        };
        let result = self.shared.settle(&session, pending.commit(write).await);

        if result.as_ref().is_err_and(ClientError::requires_sign_in) {
            return result;
        }
        // A failed write may have landed in part; resync either way.
        if let Err(e) = self.refresh_now().await {
            tracing::warn!(error = %e, "Failed to resync projects after completion toggle");
        }
        result
    }

    pub async fn delete(&self, id: ProjectId) -> ClientResult<MutationOutcome> {
        let session = self.shared.session()?;
        let backend = &self.shared.backend;
        let write = async { backend.delete_project(&session, id).await.map(|_| None) };
        let result = self
            .shared
            .projects
            .mutator
            .mutate(&self.key(&session), Mutation::remove(id.as_uuid()), write)
            .await;
        self.shared.settle(&session, result)
    }

    /// Create a project at the top of the list.
    pub async fn create(
        &self,
        name: &str,
        description: Option<&str>,
        due_date: Option<NaiveDate>,
    ) -> ClientResult<Project> {
        self.list().await?;
        let session = self.shared.session()?;

        let draft = NewProject {
            workspace_id: self.workspace_id,
            name: name.trim().to_string(),
            description: description
                .map(str::trim)
                .filter(|d| !d.is_empty())
                .map(str::to_string),
            due_date,
        };
        let placeholder = Project {
            id: ProjectId::now_v7(),
            workspace_id: self.workspace_id,
            name: draft.name.clone(),
            description: draft.description.clone(),
            completed: false,
            archived: false,
            due_date,
            created_at: self.shared.clock.now(),
            task_count: 0,
            completed_task_count: 0,
        };

        let pending = self.shared.settle(
            &session,
            self.shared
                .projects
                .mutator
                .begin(&self.key(&session), Mutation::insert(0, placeholder))
                .await,
        )?;

        let backend = &self.shared.backend;
        let mut created = None;
        let write = async {
            let project = backend.create_project(&session, &draft).await?;
            created = Some(project.clone());
            Ok::<_, RemoteError>(Some(project))
        };
        let outcome = self.shared.settle(&session, pending.commit(write).await)?;
        tracing::debug!(?outcome, workspace_id = %self.workspace_id, "Project created");

        created.ok_or_else(|| {
            ClientError::Cache(CacheError::Remote(RemoteError::malformed(
                "create returned no project",
            )))
        })
    }
}

#[async_trait]
impl Refreshable for ProjectBoard {
    fn name(&self) -> &'static str {
        "projects"
    }

    async fn refresh(&self) -> CacheResult<()> {
        let Some(session) = self.shared.current_session() else {
            return Ok(());
        };
        let result = self
            .shared
            .projects
            .coordinator
            .request(&self.key(&session), self.fetch(&session), RequestOptions::background())
            .await;
        if let Err(e) = &result {
            if e.requires_sign_in() {
                self.shared.expire(&session);
            }
        }
        result.map(|_| ())
    }
}

//! HTTP backend for the hosted relational store and auth provider.
//!
//! Tables are reached through the PostgREST surface (`/rest/v1/<table>`),
//! the current user through `/auth/v1/user`. Every response status is mapped
//! onto [`RemoteError`] so the cache layer can tell transient failures from
//! an expired session.

use crate::config::ClientConfig;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, RETRY_AFTER};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use taskflow_core::{
    AccessToken, AuthProvider, EntityIdType, NewProject, NewWorkspace, Notification,
    NotificationId, Project, ProjectId, RemoteBackend, RemoteError, RemoteResult, Session,
    SessionUser, Timestamp, UserId, Workspace, WorkspaceId,
};
use uuid::Uuid;

const REST_PREFIX: &str = "/rest/v1";
const AUTH_USER_PATH: &str = "/auth/v1/user";
const PROJECT_SELECT: &str = "*,tasks(status)";
const DONE_STATUS: &str = "done";

/// Failures building the client itself. Request failures are [`RemoteError`]s.
#[derive(Debug, thiserror::Error)]
pub enum ApiClientError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Config error: {0}")]
    Config(String),
}

#[derive(Clone)]
pub struct PostgrestBackend {
    client: reqwest::Client,
    base_url: String,
    anon_key: HeaderValue,
}

impl PostgrestBackend {
    pub fn new(config: &ClientConfig) -> Result<Self, ApiClientError> {
        Self::from_parts(&config.api_base_url, &config.anon_key, config.request_timeout())
    }

    pub fn from_parts(
        base_url: &str,
        anon_key: &str,
        timeout: Duration,
    ) -> Result<Self, ApiClientError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        let anon_key =
            HeaderValue::from_str(anon_key).map_err(|e| ApiClientError::Config(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            anon_key,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}{}/{}", self.base_url, REST_PREFIX, table)
    }

    /// `apikey` plus a bearer token: the session's when there is one, the
    /// anon key otherwise.
    fn auth_headers(&self, token: Option<&AccessToken>) -> RemoteResult<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(HeaderName::from_static("apikey"), self.anon_key.clone());
        let bearer = match token {
            Some(token) => HeaderValue::from_str(&format!("Bearer {}", token.expose()))
                .map_err(|_| RemoteError::unauthorized("access token is not a valid header value"))?,
            None => {
                let anon = self.anon_key.to_str().unwrap_or_default();
                HeaderValue::from_str(&format!("Bearer {}", anon))
                    .map_err(|e| RemoteError::Validation {
                        reason: e.to_string(),
                    })?
            }
        };
        headers.insert(AUTHORIZATION, bearer);
        Ok(headers)
    }

    async fn select<T: DeserializeOwned>(
        &self,
        session: &Session,
        table: &str,
        query: &[(&str, String)],
    ) -> RemoteResult<T> {
        let response = self
            .client
            .get(self.table_url(table))
            .headers(self.auth_headers(Some(&session.access_token))?)
            .query(query)
            .send()
            .await
            .map_err(transport_error)?;
        parse_response(response).await
    }

    async fn insert<T, B>(&self, session: &Session, table: &str, query: &[(&str, String)], body: &B) -> RemoteResult<Vec<T>>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let response = self
            .client
            .post(self.table_url(table))
            .headers(self.auth_headers(Some(&session.access_token))?)
            .header("Prefer", "return=representation")
            .query(query)
            .json(body)
            .send()
            .await
            .map_err(transport_error)?;
        parse_response(response).await
    }

    async fn update<T, B>(
        &self,
        session: &Session,
        table: &str,
        query: &[(&str, String)],
        body: &B,
    ) -> RemoteResult<Vec<T>>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let response = self
            .client
            .patch(self.table_url(table))
            .headers(self.auth_headers(Some(&session.access_token))?)
            .header("Prefer", "return=representation")
            .query(query)
            .json(body)
            .send()
            .await
            .map_err(transport_error)?;
        parse_response(response).await
    }

    async fn update_quietly<B>(
        &self,
        session: &Session,
        table: &str,
        query: &[(&str, String)],
        body: &B,
    ) -> RemoteResult<()>
    where
        B: Serialize + ?Sized,
    {
        let response = self
            .client
            .patch(self.table_url(table))
            .headers(self.auth_headers(Some(&session.access_token))?)
            .header("Prefer", "return=minimal")
            .query(query)
            .json(body)
            .send()
            .await
            .map_err(transport_error)?;
        expect_success(response).await
    }

    async fn delete(&self, session: &Session, table: &str, query: &[(&str, String)]) -> RemoteResult<()> {
        let response = self
            .client
            .delete(self.table_url(table))
            .headers(self.auth_headers(Some(&session.access_token))?)
            .query(query)
            .send()
            .await
            .map_err(transport_error)?;
        expect_success(response).await
    }
}

fn eq(value: impl std::fmt::Display) -> String {
    format!("eq.{}", value)
}

/// The single row a write with `return=representation` must produce.
fn single<T>(mut rows: Vec<T>, resource: String) -> RemoteResult<T> {
    if rows.is_empty() {
        return Err(RemoteError::NotFound { resource });
    }
    Ok(rows.swap_remove(0))
}

#[async_trait]
impl AuthProvider for PostgrestBackend {
    async fn current_user(&self, access_token: &AccessToken) -> RemoteResult<SessionUser> {
        let response = self
            .client
            .get(format!("{}{}", self.base_url, AUTH_USER_PATH))
            .headers(self.auth_headers(Some(access_token))?)
            .send()
            .await
            .map_err(transport_error)?;
        let user: AuthUser = parse_response(response).await?;
        Ok(user.into())
    }
}

#[async_trait]
impl RemoteBackend for PostgrestBackend {
    async fn list_notifications(
        &self,
        session: &Session,
        limit: usize,
    ) -> RemoteResult<Vec<Notification>> {
        self.select(
            session,
            "notifications",
            &[
                ("select", "*".to_string()),
                ("user_id", eq(session.user.id)),
                ("order", "created_at.desc".to_string()),
                ("limit", limit.to_string()),
            ],
        )
        .await
    }

    async fn mark_notification_read(
        &self,
        session: &Session,
        id: NotificationId,
    ) -> RemoteResult<Option<Notification>> {
        let rows: Vec<Notification> = self
            .update(
                session,
                "notifications",
                &[("id", eq(id)), ("user_id", eq(session.user.id))],
                &ReadPatch { read: true },
            )
            .await?;
        Ok(rows.into_iter().next())
    }

    async fn mark_all_notifications_read(&self, session: &Session) -> RemoteResult<()> {
        self.update_quietly(
            session,
            "notifications",
            &[("user_id", eq(session.user.id)), ("read", eq(false))],
            &ReadPatch { read: true },
        )
        .await
    }

    async fn list_workspaces(&self, session: &Session) -> RemoteResult<Vec<Workspace>> {
        let user = session.user.id;
        self.select(
            session,
            "workspaces",
            &[
                ("select", "*".to_string()),
                (
                    "or",
                    format!(
                        "(visibility.eq.all,visibility.is.null,created_by.eq.{},specific_user_id.eq.{})",
                        user, user
                    ),
                ),
                ("order", "position.asc.nullslast,created_at.desc".to_string()),
            ],
        )
        .await
    }

    async fn create_workspace(
        &self,
        session: &Session,
        workspace: &NewWorkspace,
    ) -> RemoteResult<Workspace> {
        let body = WorkspaceInsert {
            name: &workspace.name,
            description: workspace.description.as_deref(),
            position: workspace.position,
            created_by: session.user.id,
        };
        let rows = self
            .insert(session, "workspaces", &[("select", "*".to_string())], &body)
            .await?;
        single(rows, "workspaces".to_string())
    }

    async fn rename_workspace(
        &self,
        session: &Session,
        id: WorkspaceId,
        name: &str,
    ) -> RemoteResult<Workspace> {
        let rows = self
            .update(session, "workspaces", &[("id", eq(id))], &NamePatch { name })
            .await?;
        single(rows, format!("workspaces/{}", id))
    }

    async fn update_workspace_positions(
        &self,
        session: &Session,
        positions: &[(WorkspaceId, i32)],
    ) -> RemoteResult<()> {
        // One row per request; stop at the first failure.
        for (id, position) in positions {
            self.update_quietly(
                session,
                "workspaces",
                &[("id", eq(id))],
                &PositionPatch { position: *position },
            )
            .await?;
        }
        Ok(())
    }

    async fn delete_workspace(&self, session: &Session, id: WorkspaceId) -> RemoteResult<()> {
        self.delete(session, "workspaces", &[("id", eq(id))]).await
    }

    async fn list_projects(
        &self,
        session: &Session,
        workspace_id: WorkspaceId,
    ) -> RemoteResult<Vec<Project>> {
        let rows: Vec<ProjectRow> = self
            .select(
                session,
                "projects",
                &[
                    ("select", PROJECT_SELECT.to_string()),
                    ("workspace_id", eq(workspace_id)),
                    ("archived", eq(false)),
                    ("order", "created_at.desc".to_string()),
                ],
            )
            .await?;
        Ok(rows.into_iter().map(Project::from).collect())
    }

    async fn create_project(
        &self,
        session: &Session,
        project: &NewProject,
    ) -> RemoteResult<Project> {
        let body = ProjectInsert {
            name: &project.name,
            description: project.description.as_deref(),
            due_date: project.due_date,
            workspace_id: project.workspace_id,
            created_by: session.user.id,
        };
        let rows: Vec<ProjectRow> = self
            .insert(
                session,
                "projects",
                &[("select", PROJECT_SELECT.to_string())],
                &body,
            )
            .await?;
        single(rows, "projects".to_string()).map(Project::from)
    }

    async fn set_project_completed(
        &self,
        session: &Session,
        id: ProjectId,
        completed: bool,
    ) -> RemoteResult<Project> {
        let rows: Vec<ProjectRow> = self
            .update(
                session,
                "projects",
                &[("id", eq(id)), ("select", PROJECT_SELECT.to_string())],
                &CompletedPatch { completed },
            )
            .await?;
        single(rows, format!("projects/{}", id)).map(Project::from)
    }

    async fn delete_project(&self, session: &Session, id: ProjectId) -> RemoteResult<()> {
        self.delete(session, "projects", &[("id", eq(id))]).await
    }
}

// ============================================================================
// WIRE TYPES
// ============================================================================

#[derive(Serialize)]
struct ReadPatch {
    read: bool,
}

#[derive(Serialize)]
struct NamePatch<'a> {
    name: &'a str,
}

#[derive(Serialize)]
struct PositionPatch {
    position: i32,
}

#[derive(Serialize)]
struct CompletedPatch {
    completed: bool,
}

#[derive(Serialize)]
struct WorkspaceInsert<'a> {
    name: &'a str,
    description: Option<&'a str>,
    position: i32,
    created_by: UserId,
}

#[derive(Serialize)]
struct ProjectInsert<'a> {
    name: &'a str,
    description: Option<&'a str>,
    due_date: Option<chrono::NaiveDate>,
    workspace_id: WorkspaceId,
    created_by: UserId,
}

#[derive(Deserialize)]
struct TaskRow {
    #[serde(default)]
    status: Option<String>,
}

/// A project row with its embedded tasks.
#[derive(Deserialize)]
struct ProjectRow {
    id: ProjectId,
    workspace_id: WorkspaceId,
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    completed: bool,
    #[serde(default)]
    archived: bool,
    #[serde(default)]
    due_date: Option<chrono::NaiveDate>,
    created_at: Timestamp,
    #[serde(default)]
    tasks: Vec<TaskRow>,
}

impl From<ProjectRow> for Project {
    fn from(row: ProjectRow) -> Self {
        let task_count = row.tasks.len() as u32;
        let completed_task_count = row
            .tasks
            .iter()
            .filter(|t| t.status.as_deref() == Some(DONE_STATUS))
            .count() as u32;
        Project {
            id: row.id,
            workspace_id: row.workspace_id,
            name: row.name,
            description: row.description,
            completed: row.completed,
            archived: row.archived,
            due_date: row.due_date,
            created_at: row.created_at,
            task_count,
            completed_task_count,
        }
    }
}

#[derive(Deserialize)]
struct AuthUser {
    id: Uuid,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    user_metadata: AuthUserMetadata,
}

#[derive(Default, Deserialize)]
struct AuthUserMetadata {
    #[serde(default)]
    full_name: Option<String>,
}

impl From<AuthUser> for SessionUser {
    fn from(user: AuthUser) -> Self {
        SessionUser {
            id: UserId::new(user.id),
            email: user.email.unwrap_or_default(),
            full_name: user.user_metadata.full_name,
        }
    }
}

/// Error bodies from PostgREST (`message`) and the auth service
/// (`msg` / `error_description`).
#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    msg: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
}

fn error_message(body: &str) -> String {
    serde_json::from_str::<ErrorBody>(body)
        .ok()
        .and_then(|b| b.message.or(b.msg).or(b.error_description))
        .unwrap_or_else(|| body.trim().to_string())
}

// ============================================================================
// RESPONSE CLASSIFICATION
// ============================================================================

fn transport_error(err: reqwest::Error) -> RemoteError {
    if err.is_timeout() {
        RemoteError::Timeout
    } else if err.is_decode() {
        RemoteError::malformed(err.to_string())
    } else {
        RemoteError::Network {
            reason: err.to_string(),
        }
    }
}

fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

/// Map a non-success status onto the remote error taxonomy.
pub(crate) fn classify_status(status: u16, retry_after: Option<Duration>, body: &str) -> RemoteError {
    let message = error_message(body);
    match status {
        429 => RemoteError::RateLimited { retry_after },
        401 => RemoteError::Unauthorized { reason: message },
        403 => RemoteError::PermissionDenied { reason: message },
        404 => RemoteError::NotFound { resource: message },
        408 => RemoteError::Timeout,
        500..=599 => RemoteError::Unavailable { status, message },
        _ => RemoteError::Validation {
            reason: format!("HTTP {}: {}", status, message),
        },
    }
}

async fn failure(response: reqwest::Response) -> RemoteError {
    let status = response.status().as_u16();
    let retry = retry_after(response.headers());
    let body = response.text().await.unwrap_or_default();
    classify_status(status, retry, &body)
}

async fn parse_response<T: DeserializeOwned>(response: reqwest::Response) -> RemoteResult<T> {
    if !response.status().is_success() {
        return Err(failure(response).await);
    }
    let text = response.text().await.map_err(transport_error)?;
    serde_json::from_str(&text).map_err(|e| RemoteError::malformed(e.to_string()))
}

async fn expect_success(response: reqwest::Response) -> RemoteResult<()> {
    if response.status().is_success() {
        Ok(())
    } else {
        Err(failure(response).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskflow_core::ErrorClass;

    #[test]
    fn test_status_classification() {
        assert_eq!(
            classify_status(429, Some(Duration::from_secs(2)), ""),
            RemoteError::RateLimited {
                retry_after: Some(Duration::from_secs(2))
            }
        );
        assert_eq!(classify_status(401, None, "").class(), ErrorClass::Unauthorized);
        assert_eq!(classify_status(403, None, "").class(), ErrorClass::Rejected);
        assert_eq!(classify_status(404, None, "").class(), ErrorClass::Rejected);
        assert_eq!(classify_status(409, None, "").class(), ErrorClass::Rejected);
        assert_eq!(classify_status(422, None, "").class(), ErrorClass::Rejected);
        assert_eq!(classify_status(408, None, ""), RemoteError::Timeout);
        assert_eq!(classify_status(503, None, "").class(), ErrorClass::Transient);
    }

    #[test]
    fn test_error_message_extraction() {
        let err = classify_status(401, None, r#"{"msg":"invalid JWT: token is expired"}"#);
        assert_eq!(err, RemoteError::unauthorized("invalid JWT: token is expired"));

        let err = classify_status(
            400,
            None,
            r#"{"code":"22P02","message":"invalid input syntax for type uuid"}"#,
        );
        assert_eq!(
            err,
            RemoteError::Validation {
                reason: "HTTP 400: invalid input syntax for type uuid".into()
            }
        );

        let err = classify_status(502, None, "<html>Bad Gateway</html>");
        assert_eq!(
            err,
            RemoteError::Unavailable {
                status: 502,
                message: "<html>Bad Gateway</html>".into()
            }
        );
    }

    #[test]
    fn test_retry_after_header() {
        let mut headers = HeaderMap::new();
        assert_eq!(retry_after(&headers), None);
        headers.insert(RETRY_AFTER, HeaderValue::from_static("30"));
        assert_eq!(retry_after(&headers), Some(Duration::from_secs(30)));
        headers.insert(RETRY_AFTER, HeaderValue::from_static("Wed, 21 Oct 2015 07:28:00 GMT"));
        assert_eq!(retry_after(&headers), None);
    }

    #[test]
    fn test_project_row_counts_done_tasks() {
        let row: ProjectRow = serde_json::from_str(
            r#"{
                "id": "0190a1b2-0000-7000-8000-000000000001",
                "workspace_id": "0190a1b2-0000-7000-8000-000000000002",
                "name": "Launch",
                "description": null,
                "completed": false,
                "archived": false,
                "due_date": "2024-06-01",
                "created_at": "2024-05-01T10:00:00Z",
                "created_by": "0190a1b2-0000-7000-8000-000000000003",
                "tasks": [
                    {"id": "0190a1b2-0000-7000-8000-00000000000a", "status": "done"},
                    {"id": "0190a1b2-0000-7000-8000-00000000000b", "status": "in_progress"},
                    {"id": "0190a1b2-0000-7000-8000-00000000000c", "status": null}
                ]
            }"#,
        )
        .unwrap();
        let project = Project::from(row);
        assert_eq!(project.task_count, 3);
        assert_eq!(project.completed_task_count, 1);
        assert_eq!(project.completion_percentage(), 33);
    }

    #[test]
    fn test_auth_user_maps_metadata() {
        let user: AuthUser = serde_json::from_str(
            r#"{
                "id": "0190a1b2-0000-7000-8000-000000000003",
                "email": "ada@example.com",
                "aud": "authenticated",
                "user_metadata": {"full_name": "Ada Lovelace"}
            }"#,
        )
        .unwrap();
        let user = SessionUser::from(user);
        assert_eq!(user.email, "ada@example.com");
        assert_eq!(user.full_name.as_deref(), Some("Ada Lovelace"));
    }

    #[test]
    fn test_backend_trims_base_url() {
        let backend =
            PostgrestBackend::from_parts("https://example.supabase.co/", "anon", Duration::from_secs(5))
                .unwrap();
        assert_eq!(backend.base_url(), "https://example.supabase.co");
        assert_eq!(
            backend.table_url("projects"),
            "https://example.supabase.co/rest/v1/projects"
        );
    }

    #[test]
    fn test_anon_requests_use_anon_bearer() {
        let backend =
            PostgrestBackend::from_parts("https://example.supabase.co", "anon-key", Duration::from_secs(5))
                .unwrap();
        let headers = backend.auth_headers(None).unwrap();
        assert_eq!(headers.get("apikey").unwrap(), "anon-key");
        assert_eq!(headers.get(AUTHORIZATION).unwrap(), "Bearer anon-key");

        let headers = backend
            .auth_headers(Some(&AccessToken::new("user-jwt")))
            .unwrap();
        assert_eq!(headers.get(AUTHORIZATION).unwrap(), "Bearer user-jwt");
    }
}

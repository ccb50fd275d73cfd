//! Error types for the client.

use crate::api::ApiClientError;
use crate::config::ConfigError;
use taskflow_core::{CacheError, MirrorError, TaskflowError};

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Api(#[from] ApiClientError),
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error(transparent)]
    Mirror(#[from] MirrorError),
    #[error("No active session")]
    NotSignedIn,
}

pub type ClientResult<T> = Result<T, ClientError>;

impl ClientError {
    /// The caller must send the user through sign-in again.
    pub fn requires_sign_in(&self) -> bool {
        match self {
            ClientError::NotSignedIn => true,
            ClientError::Cache(e) => e.requires_sign_in(),
            _ => false,
        }
    }
}

impl From<TaskflowError> for ClientError {
    fn from(err: TaskflowError) -> Self {
        match err {
            TaskflowError::Remote(e) => ClientError::Cache(CacheError::Remote(e)),
            TaskflowError::Cache(e) => ClientError::Cache(e),
            TaskflowError::Mirror(e) => ClientError::Mirror(e),
        }
    }
}

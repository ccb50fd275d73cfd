//! Taskflow Client - Cached Feeds for the Hosted Backend
//!
//! Wires the cache layer to the hosted REST and auth endpoints and exposes
//! the three collections the app renders:
//!
//! - [`NotificationFeed`]: the signed-in user's recent notifications.
//! - [`WorkspaceBoard`]: visible workspaces in manual order.
//! - [`ProjectBoard`]: non-archived projects of one workspace.
//!
//! Everything hangs off a [`TaskflowCache`], which owns the stores and the
//! active session.
//!
//! ```ignore
//! let config = ClientConfig::load()?;
//! let cache = TaskflowCache::from_config(&config)?;
//! cache.sign_in(AccessToken::new(token)).await?;
//!
//! let notifications = cache.notifications();
//! let read = notifications.list().await?;
//! println!("{} unread", notifications.unread_count()?);
//! ```

pub mod api;
pub mod config;
pub mod error;
pub mod feeds;
pub mod identity;
pub mod service;
pub mod telemetry;

pub use api::{ApiClientError, PostgrestBackend};
pub use config::{ClientConfig, ConfigError, CONFIG_ENV_VAR};
pub use error::{ClientError, ClientResult};
pub use feeds::{NotificationFeed, ProjectBoard, WorkspaceBoard};
pub use identity::{token_digest, IdentityCache};
pub use service::{ServiceStats, TaskflowCache};
pub use telemetry::init_tracing;

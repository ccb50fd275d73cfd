//! Cached resolution of access tokens to users.
//!
//! Resolving the user behind a token costs a round-trip to the auth
//! provider on every page of the app, so the result is cached per token for
//! a short TTL. When the provider rate-limits or answers with garbage, the
//! last resolved identity is served instead. An unauthorized answer is never
//! papered over.

use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use taskflow_core::{AccessToken, AuthProvider, CacheResult, SessionUser, SharedClock};
use taskflow_storage::{CacheKey, CacheRead, CacheStore, ReadThroughCoordinator, RequestOptions};

/// Hex SHA-256 of a token. Tokens never appear in keys or logs.
pub fn token_digest(token: &AccessToken) -> String {
    hex::encode(Sha256::digest(token.expose().as_bytes()))
}

#[derive(Clone)]
pub struct IdentityCache {
    auth: Arc<dyn AuthProvider>,
    coordinator: ReadThroughCoordinator<CacheKey, SessionUser>,
}

impl IdentityCache {
    /// Identity entries are memory-only; they are never mirrored to disk.
    pub fn new(auth: Arc<dyn AuthProvider>, ttl: Duration, clock: SharedClock) -> Self {
        let store = Arc::new(CacheStore::new("identity", ttl, clock));
        Self {
            auth,
            coordinator: ReadThroughCoordinator::new(store),
        }
    }

    pub fn coordinator(&self) -> &ReadThroughCoordinator<CacheKey, SessionUser> {
        &self.coordinator
    }

    /// The user behind `token`, from cache while fresh.
    pub async fn resolve(&self, token: &AccessToken) -> CacheResult<CacheRead<SessionUser>> {
        let key = CacheKey::identity(token_digest(token));
        let auth = Arc::clone(&self.auth);
        let token = token.clone();
        self.coordinator
            .request(
                &key,
                move || async move { auth.current_user(&token).await },
                RequestOptions::default(),
            )
            .await
    }

    /// Drop the identity resolved for `token`.
    ///
    /// The next resolve asks the auth provider, and a transient failure there
    /// has nothing to fall back on.
    pub fn forget(&self, token: &AccessToken) {
        let key = CacheKey::identity(token_digest(token));
        self.coordinator.store().remove(&key);
    }

    pub fn clear(&self) {
        self.coordinator.store().clear();
    }
}

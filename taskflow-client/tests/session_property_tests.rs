//! Session Scoping Tests
//!
//! Cached rows belong to the user who fetched them. Signing out wipes
//! memory and the mirror; signing in as someone else does the same, even
//! across a restart. An expired session is dropped but its data is kept.

use std::time::Duration;

use proptest::prelude::*;
use taskflow_client::ClientError;
use taskflow_core::AccessToken;
use taskflow_storage::{CacheKey, DurableMirror, KeyState, StoreKey};
use taskflow_test_utils::generators::arb_transient_error;
use taskflow_test_utils::{fixtures, Op, RemoteError};
use tokio::runtime::Runtime;

mod test_support;
use test_support::TestApp;

// ============================================================================
// TEST CONFIGURATION
// ============================================================================

fn test_runtime() -> Result<Runtime, TestCaseError> {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| TestCaseError::fail(format!("Failed to create runtime: {}", e)))
}

// ============================================================================
// PROPERTIES
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Once the identity TTL has passed, a transient auth failure still signs
    /// the user in with the last resolved identity.
    #[test]
    fn prop_identity_survives_transient_auth_failure(
        error in arb_transient_error(),
        idle_secs in 61u64..3600,
    ) {
        let rt = test_runtime()?;
        rt.block_on(async {
            let app = TestApp::new();
            let alice = app.signed_in("alice@example.com").await;
            app.clock.advance(Duration::from_secs(idle_secs));
            app.backend.fail_next(Op::CurrentUser, error);

            let session = app
                .cache
                .sign_in(alice.access_token.clone())
                .await
                .map_err(|e| TestCaseError::fail(e.to_string()))?;
            prop_assert_eq!(session.user, alice.user);
            prop_assert_eq!(app.backend.calls(Op::CurrentUser), 2);
            prop_assert_eq!(app.cache.stats().identity.fallbacks, 1);
            Ok(())
        })?;
    }
}

// ============================================================================
// SCENARIOS
// ============================================================================

#[tokio::test]
async fn test_sign_in_within_identity_ttl_skips_auth_provider() {
    let app = TestApp::new();
    let alice = app.signed_in("alice@example.com").await;
    app.clock.advance(Duration::from_secs(30));
    app.cache.sign_in(alice.access_token.clone()).await.unwrap();
    assert_eq!(app.backend.calls(Op::CurrentUser), 1);
}

#[tokio::test]
async fn test_unknown_token_is_rejected() {
    let app = TestApp::new();
    let err = app
        .cache
        .sign_in(AccessToken::new("forged"))
        .await
        .unwrap_err();
    assert!(err.requires_sign_in());
    assert!(app.cache.session().is_none());
}

#[tokio::test]
async fn test_feeds_require_a_session() {
    let app = TestApp::new();
    assert!(matches!(
        app.cache.notifications().list().await,
        Err(ClientError::NotSignedIn)
    ));
    assert!(matches!(app.cache.workspaces().cached(), Err(ClientError::NotSignedIn)));
    assert_eq!(app.backend.calls(Op::ListNotifications), 0);
}

#[tokio::test]
async fn test_sign_out_wipes_memory_and_mirror() {
    let app = TestApp::new();
    let alice = app.signed_in("alice@example.com").await;
    app.backend.seed_notifications([fixtures::notification(
        alice.user.id,
        "assigned",
        false,
        fixtures::at(0),
    )]);
    app.backend
        .seed_workspaces([fixtures::workspace(alice.user.id, "Design", 0)]);

    app.cache.notifications().list().await.unwrap();
    app.cache.workspaces().list().await.unwrap();
    assert!(!app.mirror.is_empty());

    let mut session_rx = app.cache.subscribe_session();
    app.cache.sign_out();

    assert!(session_rx.borrow_and_update().is_none());
    assert!(app.cache.session().is_none());
    assert!(app.mirror.is_empty());
    let stats = app.cache.stats();
    assert_eq!(stats.notifications.entry_count, 0);
    assert_eq!(stats.workspaces.entry_count, 0);
    assert_eq!(stats.identity.entry_count, 0);
}

#[tokio::test]
async fn test_different_user_sign_in_drops_previous_rows() {
    let app = TestApp::new();
    let alice = app.signed_in("alice@example.com").await;
    app.backend.seed_notifications([fixtures::notification(
        alice.user.id,
        "for alice",
        false,
        fixtures::at(0),
    )]);
    app.cache.notifications().list().await.unwrap();
    let alice_key = CacheKey::notifications(alice.user.id);
    assert!(app.mirror.get(&alice_key.mirror_key()).unwrap().is_some());

    let bob = app.register("bob@example.com");
    app.cache.sign_in(bob.access_token.clone()).await.unwrap();

    assert_eq!(app.cache.session().map(|s| s.user.id), Some(bob.user.id));
    assert!(app.mirror.get(&alice_key.mirror_key()).unwrap().is_none());
    assert_eq!(app.cache.stats().notifications.entry_count, 0);
    assert!(app.cache.notifications().cached().unwrap().is_none());
}

#[tokio::test]
async fn test_restart_as_same_user_shows_mirrored_rows() {
    let app = TestApp::new();
    let alice = app.signed_in("alice@example.com").await;
    app.backend
        .seed_workspaces([fixtures::workspace(alice.user.id, "Design", 0)]);
    app.cache.workspaces().list().await.unwrap();

    let restarted = app.restart();
    restarted
        .cache
        .sign_in(alice.access_token.clone())
        .await
        .unwrap();
    let board = restarted.cache.workspaces();
    let cached = board.cached().unwrap().unwrap();
    assert_eq!(cached.value()[0].name, "Design");
    assert_eq!(board.state().unwrap(), KeyState::Fresh);

    restarted.clock.advance(Duration::from_secs(181));
    assert_eq!(board.state().unwrap(), KeyState::Stale);
    assert_eq!(app.backend.calls(Op::ListWorkspaces), 1);
}

#[tokio::test]
async fn test_restart_as_different_user_clears_mirror() {
    let app = TestApp::new();
    let alice = app.signed_in("alice@example.com").await;
    app.backend
        .seed_workspaces([fixtures::workspace(alice.user.id, "Private", 0)]);
    app.cache.workspaces().list().await.unwrap();
    let alice_key = CacheKey::workspaces(alice.user.id);

    let restarted = app.restart();
    let bob = restarted.register("bob@example.com");
    restarted
        .cache
        .sign_in(bob.access_token.clone())
        .await
        .unwrap();

    assert!(restarted.mirror.get(&alice_key.mirror_key()).unwrap().is_none());
    // Only the owner marker for bob remains.
    assert_eq!(restarted.mirror.len(), 1);
}

#[tokio::test]
async fn test_revoked_session_expires_and_keeps_data() {
    let app = TestApp::new();
    let alice = app.signed_in("alice@example.com").await;
    app.backend.seed_notifications([fixtures::notification(
        alice.user.id,
        "assigned",
        false,
        fixtures::at(0),
    )]);
    let feed = app.cache.notifications();
    feed.list().await.unwrap();
    let mut session_rx = app.cache.subscribe_session();

    app.backend.revoke(&alice);
    app.clock.advance(Duration::from_secs(121));
    let err = feed.list().await.unwrap_err();

    assert!(err.requires_sign_in());
    assert!(matches!(
        err,
        ClientError::Cache(taskflow_core::CacheError::Remote(RemoteError::Unauthorized { .. }))
    ));
    session_rx.changed().await.unwrap();
    assert!(session_rx.borrow().is_none());
    assert!(matches!(feed.list().await, Err(ClientError::NotSignedIn)));
    // Kept for a later sign-in by the same user.
    let key = CacheKey::notifications(alice.user.id);
    assert!(app.mirror.get(&key.mirror_key()).unwrap().is_some());
}

#[tokio::test]
async fn test_revoked_token_is_refused_while_auth_provider_is_down() {
    let app = TestApp::new();
    let alice = app.signed_in("alice@example.com").await;
    app.backend.seed_notifications([fixtures::notification(
        alice.user.id,
        "assigned",
        false,
        fixtures::at(0),
    )]);
    let feed = app.cache.notifications();
    feed.list().await.unwrap();

    app.backend.revoke(&alice);
    app.clock.advance(Duration::from_secs(121));
    assert!(feed.list().await.unwrap_err().requires_sign_in());
    assert!(app.cache.session().is_none());

    app.backend
        .fail_always(Op::CurrentUser, RemoteError::RateLimited { retry_after: None });
    let err = app
        .cache
        .sign_in(alice.access_token.clone())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        ClientError::Cache(taskflow_core::CacheError::Remote(RemoteError::RateLimited { .. }))
    ));
    assert!(app.cache.session().is_none());
    assert_eq!(app.cache.stats().identity.entry_count, 0);
    assert_eq!(app.cache.stats().identity.fallbacks, 0);
}

#[tokio::test]
async fn test_user_switch_after_expiry_without_mirror_drops_rows() {
    let app = TestApp::memory_only();
    let alice = app.signed_in("alice@example.com").await;
    app.backend.seed_notifications([fixtures::notification(
        alice.user.id,
        "for alice",
        false,
        fixtures::at(0),
    )]);
    let feed = app.cache.notifications();
    feed.list().await.unwrap();

    app.backend.revoke(&alice);
    app.clock.advance(Duration::from_secs(121));
    feed.list().await.unwrap_err();
    assert!(app.cache.session().is_none());
    assert_eq!(app.cache.stats().notifications.entry_count, 1);

    let bob = app.register("bob@example.com");
    app.cache.sign_in(bob.access_token.clone()).await.unwrap();

    assert!(app.mirror.is_empty());
    assert_eq!(app.cache.stats().notifications.entry_count, 0);
}

#[tokio::test]
async fn test_same_user_after_expiry_without_mirror_keeps_rows() {
    let app = TestApp::memory_only();
    let alice = app.signed_in("alice@example.com").await;
    app.backend
        .seed_workspaces([fixtures::workspace(alice.user.id, "Design", 0)]);
    let board = app.cache.workspaces();
    board.list().await.unwrap();

    app.backend
        .fail_next(Op::ListWorkspaces, RemoteError::unauthorized("jwt expired"));
    board.refresh_now().await.unwrap_err();
    assert!(app.cache.session().is_none());

    app.cache.sign_in(alice.access_token.clone()).await.unwrap();

    assert_eq!(app.backend.calls(Op::CurrentUser), 2);
    assert_eq!(board.cached().unwrap().unwrap().value()[0].name, "Design");
}

//! Watch the signed-in user's notifications from the terminal.
//!
//! Usage: `taskflow-watch --config taskflow.toml` with the access token in
//! `TASKFLOW_ACCESS_TOKEN`.

use std::time::Duration;

use taskflow_client::{init_tracing, ClientConfig, ClientError, TaskflowCache};
use taskflow_core::AccessToken;
use taskflow_storage::Visibility;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

const TOKEN_ENV_VAR: &str = "TASKFLOW_ACCESS_TOKEN";

#[tokio::main]
async fn main() -> Result<(), ClientError> {
    let config = ClientConfig::load()?;
    if let Err(e) = init_tracing(config.logging.json) {
        eprintln!("Failed to initialize tracing: {}", e);
    }

    let cache = TaskflowCache::from_config(&config)?;
    let Ok(token) = std::env::var(TOKEN_ENV_VAR) else {
        tracing::error!(var = TOKEN_ENV_VAR, "No access token in environment");
        return Err(ClientError::NotSignedIn);
    };
    let session = cache.sign_in(AccessToken::new(token)).await?;

    let feed = cache.notifications();
    if let Some(cached) = feed.revalidate()? {
        tracing::info!(
            count = cached.value().len(),
            fetched_at = %cached.fetched_at(),
            "Showing cached notifications"
        );
    }

    let (_visibility_tx, visibility_rx) = watch::channel(Visibility::Visible);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let refresh = cache.spawn_notification_refresh(visibility_rx, shutdown_rx);

    let mut session_rx = cache.subscribe_session();
    let mut report = tokio::time::interval(Duration::from_secs(10));
    report.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut last_unread = None;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted");
                break;
            }
            changed = session_rx.changed() => {
                if changed.is_err() || session_rx.borrow_and_update().is_none() {
                    tracing::warn!(user_id = %session.user.id, "Session ended; sign in again");
                    break;
                }
            }
            _ = report.tick() => {
                match (feed.unread_count(), feed.state()) {
                    (Ok(unread), Ok(state)) if last_unread != Some(unread) => {
                        tracing::info!(unread, ?state, "Notifications");
                        last_unread = Some(unread);
                    }
                    (Err(e), _) | (_, Err(e)) => tracing::debug!(error = %e, "Skipping report"),
                    _ => {}
                }
            }
        }
    }

    let _ = shutdown_tx.send(true);
    match refresh.await {
        Ok(metrics) => {
            let metrics = metrics.snapshot();
            tracing::info!(
                refreshes = metrics.refreshes,
                failures = metrics.failures,
                "Refresh loop stopped"
            );
        }
        Err(e) => tracing::warn!(error = %e, "Refresh loop panicked"),
    }
    let stats = cache.stats();
    tracing::info!(
        hit_rate = stats.notifications.hit_rate(),
        fallbacks = stats.notifications.fallbacks,
        "Notification cache stats"
    );
    Ok(())
}

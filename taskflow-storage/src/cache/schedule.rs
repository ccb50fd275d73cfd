//! Timer-driven background refresh.
//!
//! A refresh loop periodically asks one feed to revalidate. The period
//! depends on whether the view showing the feed is visible; switching
//! visibility restarts the timer at the new period.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use taskflow_core::{CacheResult, RefreshIntervals};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};

/// Whether the view backed by a feed is on screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Visibility {
    Visible,
    #[default]
    Hidden,
}

/// Refresh period per visibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshSchedule {
    pub visible: Duration,
    pub hidden: Duration,
}

impl RefreshSchedule {
    pub fn new(visible: Duration, hidden: Duration) -> Self {
        Self { visible, hidden }
    }

    pub fn period(&self, visibility: Visibility) -> Duration {
        match visibility {
            Visibility::Visible => self.visible,
            Visibility::Hidden => self.hidden,
        }
    }
}

impl Default for RefreshSchedule {
    fn default() -> Self {
        RefreshIntervals::default().into()
    }
}

impl From<RefreshIntervals> for RefreshSchedule {
    fn from(intervals: RefreshIntervals) -> Self {
        Self::new(intervals.visible, intervals.hidden)
    }
}

/// Something a refresh loop can revalidate.
#[async_trait]
pub trait Refreshable: Send + Sync {
    fn name(&self) -> &'static str;

    /// Revalidate, going to the remote if the cached data is not fresh.
    async fn refresh(&self) -> CacheResult<()>;
}

/// Counters for one refresh loop.
#[derive(Debug, Default)]
pub struct RefreshLoopMetrics {
    pub refreshes: AtomicU64,
    pub failures: AtomicU64,
    pub visibility_changes: AtomicU64,
}

impl RefreshLoopMetrics {
    pub fn snapshot(&self) -> RefreshLoopSnapshot {
        RefreshLoopSnapshot {
            refreshes: self.refreshes.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            visibility_changes: self.visibility_changes.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshLoopSnapshot {
    pub refreshes: u64,
    pub failures: u64,
    pub visibility_changes: u64,
}

fn ticker(period: Duration) -> Interval {
    // A zero period would make `interval_at` panic.
    let period = period.max(Duration::from_millis(1));
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ticker
}

/// Refresh `target` on a visibility-dependent period until shutdown.
///
/// The first refresh happens one full period after start; callers that want
/// data immediately request it themselves. The loop ends when `shutdown_rx`
/// turns true or its sender is dropped.
pub async fn refresh_loop_task(
    target: Arc<dyn Refreshable>,
    schedule: RefreshSchedule,
    mut visibility_rx: watch::Receiver<Visibility>,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Arc<RefreshLoopMetrics> {
    let metrics = Arc::new(RefreshLoopMetrics::default());
    let mut visibility = *visibility_rx.borrow_and_update();
    let mut visibility_open = true;
    let mut timer = ticker(schedule.period(visibility));

    tracing::info!(
        feed = target.name(),
        visible_ms = schedule.visible.as_millis() as u64,
        hidden_ms = schedule.hidden.as_millis() as u64,
        ?visibility,
        "Refresh loop started"
    );

    if *shutdown_rx.borrow() {
        return metrics;
    }

    loop {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    tracing::info!(feed = target.name(), "Refresh loop shutting down");
                    break;
                }
            }

            changed = visibility_rx.changed(), if visibility_open => {
                if changed.is_err() {
                    // Nobody can change visibility any more; keep the current period.
                    visibility_open = false;
                    continue;
                }
                let next = *visibility_rx.borrow_and_update();
                if next != visibility {
                    visibility = next;
                    timer = ticker(schedule.period(visibility));
                    metrics.visibility_changes.fetch_add(1, Ordering::Relaxed);
                    tracing::debug!(feed = target.name(), ?visibility, "Refresh period changed");
                }
            }

            _ = timer.tick() => {
                metrics.refreshes.fetch_add(1, Ordering::Relaxed);
                if let Err(e) = target.refresh().await {
                    metrics.failures.fetch_add(1, Ordering::Relaxed);
                    if e.requires_sign_in() {
                        tracing::warn!(feed = target.name(), error = %e, "Background refresh needs sign-in");
                    } else {
                        tracing::debug!(feed = target.name(), error = %e, "Background refresh failed");
                    }
                }
            }
        }
    }

    let snapshot = metrics.snapshot();
    tracing::info!(
        feed = target.name(),
        refreshes = snapshot.refreshes,
        failures = snapshot.failures,
        "Refresh loop completed"
    );
    metrics
}

/// Spawn [`refresh_loop_task`] on the current runtime.
pub fn spawn_refresh_loop(
    target: Arc<dyn Refreshable>,
    schedule: RefreshSchedule,
    visibility_rx: watch::Receiver<Visibility>,
    shutdown_rx: watch::Receiver<bool>,
) -> JoinHandle<Arc<RefreshLoopMetrics>> {
    tokio::spawn(refresh_loop_task(
        target,
        schedule,
        visibility_rx,
        shutdown_rx,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskflow_core::{CacheError, RemoteError};

    struct Counting {
        calls: AtomicU64,
        fail: bool,
    }

    #[async_trait]
    impl Refreshable for Counting {
        fn name(&self) -> &'static str {
            "counting"
        }

        async fn refresh(&self) -> CacheResult<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(CacheError::Remote(RemoteError::Timeout))
            } else {
                Ok(())
            }
        }
    }

    fn counting(fail: bool) -> Arc<Counting> {
        Arc::new(Counting {
            calls: AtomicU64::new(0),
            fail,
        })
    }

    #[test]
    fn test_period_by_visibility() {
        let schedule = RefreshSchedule::default();
        assert_eq!(schedule.period(Visibility::Visible), Duration::from_secs(30));
        assert_eq!(schedule.period(Visibility::Hidden), Duration::from_secs(300));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_are_counted_not_fatal() {
        let target = counting(true);
        let (_vis_tx, vis_rx) = watch::channel(Visibility::Visible);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = spawn_refresh_loop(
            target.clone(),
            RefreshSchedule::new(Duration::from_secs(10), Duration::from_secs(100)),
            vis_rx,
            shutdown_rx,
        );

        tokio::time::sleep(Duration::from_secs(35)).await;
        shutdown_tx.send(true).unwrap();
        let metrics = handle.await.unwrap().snapshot();
        assert_eq!(metrics.refreshes, 3);
        assert_eq!(metrics.failures, 3);
        assert_eq!(target.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_shutdown_sender_stops_loop() {
        let (_vis_tx, vis_rx) = watch::channel(Visibility::Hidden);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = spawn_refresh_loop(counting(false), RefreshSchedule::default(), vis_rx, shutdown_rx);
        drop(shutdown_tx);
        let metrics = handle.await.unwrap().snapshot();
        assert_eq!(metrics.refreshes, 0);
    }
}

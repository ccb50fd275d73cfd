use std::sync::Arc;

use taskflow_client::TaskflowCache;
use taskflow_core::{CacheTtls, RefreshIntervals};
use taskflow_storage::{DurableMirror, InMemoryMirror};
use taskflow_test_utils::{fixtures, ManualClock, ScriptedBackend, Session, SharedClock};

/// A cache wired to a scripted backend, a manual clock and an in-memory
/// mirror.
pub struct TestApp {
    pub clock: Arc<ManualClock>,
    pub backend: Arc<ScriptedBackend>,
    pub mirror: Arc<InMemoryMirror>,
    pub cache: TaskflowCache,
}

impl TestApp {
    pub fn new() -> Self {
        let clock = ManualClock::shared();
        let shared: SharedClock = clock.clone();
        let backend = Arc::new(ScriptedBackend::new().with_clock(shared));
        Self::with_parts(clock, backend, Arc::new(InMemoryMirror::new()), true)
    }

    /// No durable mirror; `mirror` stays empty.
    pub fn memory_only() -> Self {
        let clock = ManualClock::shared();
        let shared: SharedClock = clock.clone();
        let backend = Arc::new(ScriptedBackend::new().with_clock(shared));
        Self::with_parts(clock, backend, Arc::new(InMemoryMirror::new()), false)
    }

    /// A second process over the same backend and mirror.
    pub fn restart(&self) -> Self {
        Self::with_parts(
            Arc::clone(&self.clock),
            Arc::clone(&self.backend),
            Arc::clone(&self.mirror),
            true,
        )
    }

    fn with_parts(
        clock: Arc<ManualClock>,
        backend: Arc<ScriptedBackend>,
        mirror: Arc<InMemoryMirror>,
        mirrored: bool,
    ) -> Self {
        let durable = mirrored.then(|| mirror.clone() as Arc<dyn DurableMirror>);
        let cache = TaskflowCache::new(
            backend.clone(),
            backend.clone(),
            CacheTtls::default(),
            RefreshIntervals::default(),
            clock.clone(),
            durable,
        );
        Self {
            clock,
            backend,
            mirror,
            cache,
        }
    }

    /// Register a user with the backend.
    pub fn register(&self, email: &str) -> Session {
        self.backend.sign_up(fixtures::user(email))
    }

    /// Register a user and sign them in.
    pub async fn signed_in(&self, email: &str) -> Session {
        let session = self.register(email);
        self.cache
            .sign_in(session.access_token.clone())
            .await
            .expect("sign in");
        session
    }
}

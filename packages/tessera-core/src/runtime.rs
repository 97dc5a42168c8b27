//! Where the stack runs its background work.
//!
//! SSDP loops, description fetches, renewals and event queues all go through
//! a [`TokioSpawner`]. An embedder that owns its runtime passes that
//! runtime's handle to the services, so tasks land on it even when the
//! services are driven from another thread.

use std::future::Future;

/// Spawns detached tasks on a fixed Tokio runtime.
#[derive(Clone)]
pub struct TokioSpawner {
    handle: tokio::runtime::Handle,
}

impl TokioSpawner {
    #[must_use]
    pub fn new(handle: tokio::runtime::Handle) -> Self {
        Self { handle }
    }

    /// Spawner for the runtime the caller is running on.
    ///
    /// # Panics
    ///
    /// Panics outside a Tokio runtime.
    #[must_use]
    pub fn current() -> Self {
        Self::new(tokio::runtime::Handle::current())
    }

    /// Runs `future` in the background. Stopping it is up to the future,
    /// usually through a cancellation token it watches.
    pub fn spawn<F>(&self, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.handle.spawn(future);
    }
}

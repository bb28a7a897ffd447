//! Readiness flag shared between the server thread and its observers

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Set once the listener is bound and accepting connections
///
/// Clones share the same flag. Read by the health endpoint and by
/// `TestServer::is_ready`.
#[derive(Debug, Clone, Default)]
pub struct ReadinessState {
    ready: Arc<AtomicBool>,
}

impl ReadinessState {
    /// Create a new readiness state (initially not ready)
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the server as ready
    ///
    /// Returns `true` only for the call that made the transition.
    pub fn set_ready(&self) -> bool {
        !self.ready.swap(true, Ordering::SeqCst)
    }

    /// Mark the server as not ready (listener is going away)
    pub fn set_not_ready(&self) {
        self.ready.store(false, Ordering::SeqCst);
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }
}

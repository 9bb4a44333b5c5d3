use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio_util::sync::CancellationToken;

/// Cancellation handle for one in-flight request.
///
/// Cloning shares the underlying token, so any clone can observe or
/// trigger cancellation.
#[derive(Debug, Clone)]
pub struct RequestHandle {
    id: u64,
    token: CancellationToken,
}

impl RequestHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once the handle is cancelled. Meant for `tokio::select!`
    /// against the request future.
    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }
}

/// Tracks the cancellation handles of every in-flight request.
///
/// Handles live in the general set; requests matching the throttle path
/// are additionally tracked in a second set so navigation can cancel
/// just those without tearing down everything else.
#[derive(Debug, Default)]
pub struct RequestRegistry {
    next_id: AtomicU64,
    active: Mutex<HashMap<u64, CancellationToken>>,
    throttled: Mutex<HashMap<u64, CancellationToken>>,
}

impl RequestRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a fresh handle and track it in the general set.
    pub fn register(&self) -> RequestHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let token = CancellationToken::new();
        self.lock_active().insert(id, token.clone());
        RequestHandle { id, token }
    }

    /// Additionally track an already registered handle in the throttled set.
    pub fn mark_throttled(&self, handle: &RequestHandle) {
        self.lock_throttled().insert(handle.id, handle.token.clone());
    }

    /// Drop a handle from both sets. Unknown handles are a silent no-op.
    pub fn unregister(&self, handle: &RequestHandle) {
        self.lock_active().remove(&handle.id);
        self.lock_throttled().remove(&handle.id);
    }

    /// Cancel every tracked request and clear both sets.
    pub fn cancel_all(&self) {
        for (_, token) in self.lock_active().drain() {
            token.cancel();
        }
        for (_, token) in self.lock_throttled().drain() {
            token.cancel();
        }
    }

    /// Cancel only the requests tracked in the throttled set.
    pub fn cancel_throttled(&self) {
        for (_, token) in self.lock_throttled().drain() {
            token.cancel();
        }
    }

    pub fn active_count(&self) -> usize {
        self.lock_active().len()
    }

    pub fn throttled_count(&self) -> usize {
        self.lock_throttled().len()
    }

    fn lock_active(&self) -> MutexGuard<'_, HashMap<u64, CancellationToken>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_throttled(&self) -> MutexGuard<'_, HashMap<u64, CancellationToken>> {
        self.throttled
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

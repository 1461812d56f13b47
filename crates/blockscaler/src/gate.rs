//! Process wide single flight gate shared by the monitor and the reconciler

use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::sync::OwnedMutexGuard;

/// Non blocking mutual exclusion between long running operations.
///
/// Callers never wait: a busy gate is reported right away and the caller
/// decides whether to retry later or skip its work. Only shutdown waits, see
/// [`OperationGate::drain`].
#[derive(Clone, Default)]
pub struct OperationGate {
    lock: Arc<Mutex<()>>,
    held: Arc<AtomicBool>,
}

/// Holds the gate until dropped.
pub struct GateGuard {
    _guard: OwnedMutexGuard<()>,
    held: Arc<AtomicBool>,
    holder: &'static str,
}

impl Drop for GateGuard {
    fn drop(&mut self) {
        // cleared before the mutex guard field is dropped
        self.held.store(false, Ordering::Release);
        tracing::debug!(holder = self.holder, "operation gate released");
    }
}

impl OperationGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquires the gate for `holder`, `None` when another operation holds it.
    pub fn try_acquire(&self, holder: &'static str) -> Option<GateGuard> {
        let guard = self.lock.clone().try_lock_owned().ok()?;
        tracing::debug!(holder, "operation gate acquired");

        Some(self.guard(guard, holder))
    }

    /// Waits up to `grace` for the running operation to finish, then holds the
    /// gate so that nothing new starts.
    ///
    /// Returns `None` when the operation outlives `grace`.
    pub async fn drain(&self, holder: &'static str, grace: Duration) -> Option<GateGuard> {
        let guard = tokio::time::timeout(grace, self.lock.clone().lock_owned())
            .await
            .ok()?;
        tracing::debug!(holder, "operation gate drained");

        Some(self.guard(guard, holder))
    }

    /// Whether an operation currently holds the gate.
    ///
    /// Only reads a flag, so it never makes a concurrent `try_acquire` fail.
    pub fn is_busy(&self) -> bool {
        self.held.load(Ordering::Acquire)
    }

    fn guard(&self, guard: OwnedMutexGuard<()>, holder: &'static str) -> GateGuard {
        self.held.store(true, Ordering::Release);
        GateGuard {
            _guard: guard,
            held: self.held.clone(),
            holder,
        }
    }
}

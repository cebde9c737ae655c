//! The single re-entrant lock held for the duration of any apply-batch, so
//! an upload batch and a download batch can never interleave.

use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{Mutex, OwnedMutexGuard};

/// A re-entrant async mutex keyed by the current Tokio task.
///
/// Unlike [`parking_lot::ReentrantMutex`], which tracks the owning OS
/// thread, this tracks the owning *task*, since the same logical operation
/// (an apply-batch) runs entirely on one task even though the runtime is
/// multi-threaded. A task that already holds the lock can call back into
/// code that acquires it again without deadlocking itself; the lock is only
/// actually released to other tasks once the outermost guard drops.
pub struct SyncLock {
    inner: Mutex<()>,
    owner: AtomicU64,
    depth: AtomicU64,
}

const NO_OWNER: u64 = u64::MAX;

impl Default for SyncLock {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncLock {
    /// Creates an unheld lock.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(()),
            owner: AtomicU64::new(NO_OWNER),
            depth: AtomicU64::new(0),
        }
    }

    /// Acquires the lock, blocking (asynchronously) until available, unless
    /// the current task already holds it, in which case this returns
    /// immediately with a nested guard.
    pub async fn lock(self: &std::sync::Arc<Self>) -> SyncLockGuard {
        let current = current_task_key();

        if self.owner.load(Ordering::Acquire) == current {
            self.depth.fetch_add(1, Ordering::AcqRel);
            return SyncLockGuard {
                lock: std::sync::Arc::clone(self),
                held: None,
                nested: true,
            };
        }

        let guard = std::sync::Arc::clone(&self.inner).lock_owned().await;
        self.owner.store(current, Ordering::Release);
        self.depth.store(1, Ordering::Release);
        SyncLockGuard {
            lock: std::sync::Arc::clone(self),
            held: Some(guard),
            nested: false,
        }
    }
}

/// A distinguishing key for the current task. Tasks spawned with
/// `tokio::spawn` have a stable [`tokio::task::Id`]; code running outside a
/// task (for instance a unit test's top-level future under
/// `#[tokio::test]`, which *is* itself a task) always has one, so this never
/// falls back silently to treating unrelated callers as the same owner.
fn current_task_key() -> u64 {
    tokio::task::try_id()
        .map(|id| {
            // `Id` does not expose its integer value publicly; hash its
            // debug representation into a stable key instead.
            use std::hash::{Hash, Hasher};
            let mut hasher = std::collections::hash_map::DefaultHasher::new();
            format!("{id:?}").hash(&mut hasher);
            hasher.finish()
        })
        .unwrap_or(NO_OWNER.wrapping_sub(1))
}

/// Held while a task is inside a locked section. Dropping the outermost
/// guard releases the lock for other tasks.
pub struct SyncLockGuard {
    lock: std::sync::Arc<SyncLock>,
    held: Option<OwnedMutexGuard<()>>,
    nested: bool,
}

impl Drop for SyncLockGuard {
    fn drop(&mut self) {
        let remaining = self.lock.depth.fetch_sub(1, Ordering::AcqRel) - 1;
        if !self.nested && remaining == 0 {
            self.lock.owner.store(NO_OWNER, Ordering::Release);
        }
        // `held` drops here, releasing the underlying mutex only for the
        // outermost guard (nested guards never populate `held`).
    }
}

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Number of permits backing each path. A shared holder takes one, an
/// exclusive holder takes all of them.
const MAX_SHARED_HOLDERS: u32 = 1 << 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Shared,
    Exclusive,
}

impl LockMode {
    fn permits(self) -> u32 {
        match self {
            LockMode::Shared => 1,
            LockMode::Exclusive => MAX_SHARED_HOLDERS,
        }
    }
}

impl fmt::Display for LockMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockMode::Shared => write!(f, "shared"),
            LockMode::Exclusive => write!(f, "exclusive"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LockError {
    #[error("lock registry is closed, cannot lock {0}")]
    Closed(PathBuf),
}

/// Per-path reader/writer locks for resources in the store.
///
/// Entries are created on first use and kept for the life of the registry.
/// Waiters are served in FIFO order, so a queued exclusive holder is not
/// starved by a stream of readers.
#[derive(Debug, Default)]
pub struct LockRegistry {
    locks: Mutex<HashMap<PathBuf, Arc<Semaphore>>>,
    closed: AtomicBool,
}

impl LockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait until `path` can be held in `mode`.
    pub async fn acquire(&self, path: &Path, mode: LockMode) -> Result<ResourceLock, LockError> {
        if self.is_closed() {
            return Err(LockError::Closed(path.to_path_buf()));
        }

        let semaphore = self.semaphore_for(path);
        tracing::trace!(path = %path.display(), %mode, "waiting for lock");

        let permit = semaphore
            .acquire_many_owned(mode.permits())
            .await
            .map_err(|_| LockError::Closed(path.to_path_buf()))?;

        tracing::trace!(path = %path.display(), %mode, "lock acquired");
        Ok(ResourceLock {
            path: path.to_path_buf(),
            mode,
            _permit: permit,
        })
    }

    /// Fail every pending and future acquisition with [`LockError::Closed`].
    ///
    /// Locks already granted stay valid until their holders release them.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        for semaphore in self.locks.lock().values() {
            semaphore.close();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn semaphore_for(&self, path: &Path) -> Arc<Semaphore> {
        let mut locks = self.locks.lock();
        let semaphore = locks
            .entry(path.to_path_buf())
            .or_insert_with(|| Arc::new(Semaphore::new(MAX_SHARED_HOLDERS as usize)));

        // close() may have run between the flag check and this insert
        if self.is_closed() {
            semaphore.close();
        }
        semaphore.clone()
    }
}

/// A granted lock on one resource. Dropping it releases the lock.
#[derive(Debug)]
pub struct ResourceLock {
    path: PathBuf,
    mode: LockMode,
    _permit: OwnedSemaphorePermit,
}

impl ResourceLock {
    pub fn release(self) {
        drop(self);
    }
}

impl Drop for ResourceLock {
    fn drop(&mut self) {
        tracing::trace!(path = %self.path.display(), mode = %self.mode, "lock released");
    }
}

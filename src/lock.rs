//! Per-user reader-writer locks.
//!
//! Every operation that touches a user's storage tree holds that user's lock
//! for its whole duration: mutations (upload, delete, move, create folder)
//! take it exclusively, reads (listing, download) take it shared. Locks for
//! different users are independent.
//!
//! Locks are created on first use and live for the lifetime of the registry.
//! Release happens when the returned guard is dropped.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock as AsyncRwLock};

/// Lock protecting a single user's storage.
pub type UserLock = Arc<AsyncRwLock<()>>;

/// Shared access to a user's storage, released on drop.
pub type UserReadGuard = OwnedRwLockReadGuard<()>;

/// Exclusive access to a user's storage, released on drop.
pub type UserWriteGuard = OwnedRwLockWriteGuard<()>;

/// Registry handing out one lock per username.
///
/// The registry's own map lock only guards the get-or-create step and is
/// never held while a caller waits on, or holds, a user lock.
///
/// The per-user locks are tokio's fair (FIFO) reader-writer locks, so a
/// queued writer is not starved by a stream of new readers.
#[derive(Debug, Default)]
pub struct UserLockRegistry {
    locks: RwLock<HashMap<String, UserLock>>,
}

impl UserLockRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the lock for `username`, creating it if this is the first reference.
    ///
    /// Concurrent first references for the same username always observe the
    /// same lock instance.
    pub fn lock_for(&self, username: &str) -> UserLock {
        {
            let read_guard = self.locks.read().unwrap_or_else(|e| e.into_inner());
            if let Some(lock) = read_guard.get(username) {
                return Arc::clone(lock);
            }
        }

        let mut write_guard = self.locks.write().unwrap_or_else(|e| e.into_inner());

        // Double-check: another caller may have inserted it in between.
        Arc::clone(
            write_guard
                .entry(username.to_string())
                .or_insert_with(|| Arc::new(AsyncRwLock::new(()))),
        )
    }

    /// Acquire exclusive access to `username`'s storage.
    pub async fn write(&self, username: &str) -> UserWriteGuard {
        self.lock_for(username).write_owned().await
    }

    /// Acquire shared access to `username`'s storage.
    pub async fn read(&self, username: &str) -> UserReadGuard {
        self.lock_for(username).read_owned().await
    }

    /// Number of usernames that have been referenced so far.
    pub fn len(&self) -> usize {
        self.locks.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Whether no lock has been created yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

//! Configuration lock.
//!
//! # Responsibilities
//! - Serialize every mutation of the live configuration
//! - Grant the lock to waiters in arrival order
//! - Expose whether the lock is currently held (for statistics)
//!
//! # Design Decisions
//! - Built on `tokio::sync::Mutex`, whose waiter queue is FIFO
//! - Release happens in the guard's `Drop`, so every exit path (early
//!   return, `?`, panic unwinding) hands the lock to the next waiter

use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::{Mutex, MutexGuard};

/// FIFO async mutex guarding the configuration value.
#[derive(Debug, Default)]
pub struct ConfigurationLock {
    inner: Mutex<()>,
    held: AtomicBool,
}

/// RAII guard returned by [`ConfigurationLock::acquire`].
#[derive(Debug)]
pub struct ConfigurationLockGuard<'a> {
    _guard: MutexGuard<'a, ()>,
    held: &'a AtomicBool,
}

impl ConfigurationLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait until the lock is free and take it.
    pub async fn acquire(&self) -> ConfigurationLockGuard<'_> {
        let guard = self.inner.lock().await;
        self.held.store(true, Ordering::Release);
        ConfigurationLockGuard {
            _guard: guard,
            held: &self.held,
        }
    }

    /// Take the lock only if nobody holds it.
    pub fn try_acquire(&self) -> Option<ConfigurationLockGuard<'_>> {
        let guard = self.inner.try_lock().ok()?;
        self.held.store(true, Ordering::Release);
        Some(ConfigurationLockGuard {
            _guard: guard,
            held: &self.held,
        })
    }

    /// Whether a mutation currently holds the lock.
    pub fn is_locked(&self) -> bool {
        self.held.load(Ordering::Acquire)
    }
}

impl Drop for ConfigurationLockGuard<'_> {
    fn drop(&mut self) {
        // Runs before `_guard` drops, so the next holder's `true` is never overwritten.
        self.held.store(false, Ordering::Release);
    }
}

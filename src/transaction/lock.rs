//! Lock Manager
//!
//! Grants a statement's whole resource set at once or not at all. Resources
//! are checked in lexicographic order of id, and a request that cannot be
//! fully granted holds nothing while it waits, so statements never deadlock
//! on each other.
//!
//! # Compatibility
//!
//! ```text
//!          │ S  │ X  │
//! ─────────┼────┼────┤
//!     S    │ ✓  │ ✗  │
//!     X    │ ✗  │ ✗  │
//! ```

use std::collections::HashMap;
use std::fmt;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::debug;

use super::resources::Resource;
use super::transaction::CancelFlag;
use crate::error::{Error, Result};

/// Lock mode for a resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockMode {
    /// Shared lock (read lock)
    Shared,
    /// Exclusive lock (write lock)
    Exclusive,
}

impl LockMode {
    pub fn of(resource: &Resource) -> Self {
        if resource.write {
            LockMode::Exclusive
        } else {
            LockMode::Shared
        }
    }
}

impl fmt::Display for LockMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockMode::Shared => write!(f, "S"),
            LockMode::Exclusive => write!(f, "X"),
        }
    }
}

#[derive(Debug, Default)]
struct LockState {
    shared: usize,
    exclusive: bool,
}

impl LockState {
    fn can_grant(&self, mode: LockMode) -> bool {
        match mode {
            LockMode::Shared => !self.exclusive,
            LockMode::Exclusive => !self.exclusive && self.shared == 0,
        }
    }

    fn grant(&mut self, mode: LockMode) {
        match mode {
            LockMode::Shared => self.shared += 1,
            LockMode::Exclusive => self.exclusive = true,
        }
    }

    fn release(&mut self, mode: LockMode) {
        match mode {
            LockMode::Shared => self.shared = self.shared.saturating_sub(1),
            LockMode::Exclusive => self.exclusive = false,
        }
    }

    fn is_free(&self) -> bool {
        self.shared == 0 && !self.exclusive
    }
}

/// Table and index lock manager
#[derive(Debug, Default)]
pub struct LockManager {
    locks: Mutex<HashMap<String, LockState>>,
    released: Condvar,
}

impl LockManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Grants every resource if all are free right now
    pub fn try_acquire(&self, resources: &[Resource]) -> Option<LockGuard<'_>> {
        let mut locks = self.locks.lock();
        self.grant_all(&mut locks, resources)
            .then(|| self.guard(resources))
    }

    /// Blocks until every resource is granted. Waiting stops when `cancel`
    /// is raised or `timeout` passes; a timeout raises `cancel` itself.
    pub fn acquire(
        &self,
        resources: &[Resource],
        cancel: &CancelFlag,
        timeout: Option<Duration>,
        poll_interval: Duration,
    ) -> Result<LockGuard<'_>> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut locks = self.locks.lock();
        loop {
            cancel.check()?;
            if self.grant_all(&mut locks, resources) {
                debug!(count = resources.len(), "acquired locks");
                return Ok(self.guard(resources));
            }
            let mut wait = poll_interval;
            if let Some(deadline) = deadline {
                let now = Instant::now();
                if now >= deadline {
                    debug!("lock wait timed out");
                    cancel.cancel();
                    return Err(Error::Cancelled);
                }
                wait = wait.min(deadline - now);
            }
            self.released.wait_for(&mut locks, wait);
        }
    }

    fn grant_all(&self, locks: &mut HashMap<String, LockState>, resources: &[Resource]) -> bool {
        let grantable = resources.iter().all(|r| {
            locks
                .get(&r.id)
                .map_or(true, |state| state.can_grant(LockMode::of(r)))
        });
        if grantable {
            for r in resources {
                locks.entry(r.id.clone()).or_default().grant(LockMode::of(r));
            }
        }
        grantable
    }

    fn guard(&self, resources: &[Resource]) -> LockGuard<'_> {
        LockGuard {
            manager: self,
            resources: resources.to_vec(),
        }
    }

    fn release(&self, resources: &[Resource]) {
        let mut locks = self.locks.lock();
        for r in resources {
            if let Some(state) = locks.get_mut(&r.id) {
                state.release(LockMode::of(r));
                if state.is_free() {
                    locks.remove(&r.id);
                }
            }
        }
        drop(locks);
        self.released.notify_all();
    }

    /// Number of resources currently held by anyone
    pub fn held_count(&self) -> usize {
        self.locks.lock().len()
    }
}

/// Releases its resources when dropped
#[derive(Debug)]
pub struct LockGuard<'a> {
    manager: &'a LockManager,
    resources: Vec<Resource>,
}

impl LockGuard<'_> {
    pub fn resources(&self) -> &[Resource] {
        &self.resources
    }
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        self.manager.release(&self.resources);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn read(id: &str) -> Resource {
        Resource {
            id: id.to_string(),
            write: false,
        }
    }

    fn write(id: &str) -> Resource {
        Resource {
            id: id.to_string(),
            write: true,
        }
    }

    #[test]
    fn test_shared_locks_are_compatible() {
        let manager = LockManager::new();
        let a = manager.try_acquire(&[read("t1")]).unwrap();
        let b = manager.try_acquire(&[read("t1")]).unwrap();
        assert!(manager.try_acquire(&[write("t1")]).is_none());
        drop(a);
        drop(b);
        assert!(manager.try_acquire(&[write("t1")]).is_some());
        assert_eq!(manager.held_count(), 0);
    }

    #[test]
    fn test_all_or_nothing() {
        let manager = LockManager::new();
        let _held = manager.try_acquire(&[write("t2")]).unwrap();
        assert!(manager.try_acquire(&[write("t1"), write("t2")]).is_none());
        // t1 was not left behind by the failed request
        assert!(manager.try_acquire(&[write("t1")]).is_some());
    }

    #[test]
    fn test_timeout_cancels() {
        let manager = LockManager::new();
        let _held = manager.try_acquire(&[write("t1")]).unwrap();
        let cancel = CancelFlag::new();
        let result = manager.acquire(
            &[read("t1")],
            &cancel,
            Some(Duration::from_millis(20)),
            Duration::from_millis(5),
        );
        assert!(matches!(result, Err(Error::Cancelled)));
        assert!(cancel.is_cancelled());
    }

    #[test]
    fn test_waiter_wakes_on_release() {
        let manager = Arc::new(LockManager::new());
        let held = manager.try_acquire(&[write("t1")]).unwrap();

        let waiter = {
            let manager = manager.clone();
            thread::spawn(move || {
                let cancel = CancelFlag::new();
                manager
                    .acquire(&[write("t1")], &cancel, None, Duration::from_millis(10))
                    .map(|guard| guard.resources().len())
            })
        };
        thread::sleep(Duration::from_millis(30));
        drop(held);
        assert_eq!(waiter.join().unwrap().unwrap(), 1);
    }

    #[test]
    fn test_cancel_stops_waiting() {
        let manager = Arc::new(LockManager::new());
        let _held = manager.try_acquire(&[write("t1")]).unwrap();
        let cancel = CancelFlag::new();

        let waiter = {
            let manager = manager.clone();
            let cancel = cancel.clone();
            thread::spawn(move || {
                manager
                    .acquire(&[read("t1")], &cancel, None, Duration::from_millis(5))
                    .is_err()
            })
        };
        thread::sleep(Duration::from_millis(20));
        cancel.cancel();
        assert!(waiter.join().unwrap());
    }
}

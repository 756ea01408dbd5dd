//! Service Repository (SPEC_FULL.md §4.1): a thread-safe map from pid to
//! the [`LaunchedService`] this manager spawned for it.

use std::collections::HashMap;
use std::process::Child;
use std::sync::{Arc, Mutex};

use tracing::info;

use crate::error::LaunchError;
use crate::types::{LaunchedService, ServiceSpec};

/// Cheaply `Clone`-able handle shared between the launcher and the
/// supervisor. Membership is monotonic during normal operation: adds only
/// happen during startup, removes only happen once per pid (on reap, or
/// during shutdown wind-down).
#[derive(Debug, Clone, Default)]
pub struct ServiceRepository {
    inner: Arc<Mutex<HashMap<i32, LaunchedService>>>,
}

impl ServiceRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// The launcher guarantees unique pids; a duplicate add silently
    /// overwrites, matching the "idempotent-on-pid is not required"
    /// contract in SPEC_FULL.md §4.1.
    pub fn add(&self, pid: i32, service: LaunchedService) {
        let mut guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        guard.insert(pid, service);
    }

    /// Run `spawn` and register the resulting pid without ever releasing
    /// the repository's lock in between. A child that exits the instant it
    /// is spawned can have its SIGCHLD reaped by a concurrent
    /// reap-dispatch thread calling `remove`; holding the same lock across
    /// spawn and insert forces that `remove` to wait until the pid is
    /// actually present, instead of observing it as foreign and discarding
    /// it while a stale entry is inserted behind it (SPEC_FULL.md §3's
    /// monotonic-membership invariant).
    pub fn spawn_and_register(
        &self,
        spec: ServiceSpec,
        spawn: impl FnOnce(&ServiceSpec) -> std::io::Result<Child>,
    ) -> Result<i32, LaunchError> {
        let mut guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());

        let child = spawn(&spec).map_err(|source| LaunchError::Spawn {
            path: spec.path.clone(),
            args: spec.args.clone(),
            source,
        })?;
        let pid = child.id() as i32;
        drop(child);

        info!(pid, path = %spec.path.display(), "launched service");
        guard.insert(pid, LaunchedService { spec, pid });
        Ok(pid)
    }

    /// Atomically remove and return the entry for `pid`, or `None` if it
    /// was never registered (a re-parented orphan). This is the sole
    /// managed-vs-foreign classification signal.
    pub fn remove(&self, pid: i32) -> Option<LaunchedService> {
        let mut guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        guard.remove(&pid)
    }

    /// An order-unspecified snapshot, safe to iterate without holding the
    /// repository's lock.
    pub fn pids(&self) -> Vec<i32> {
        let guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        guard.keys().copied().collect()
    }

    pub fn count(&self) -> usize {
        let guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        guard.len()
    }
}

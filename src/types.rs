//! Data types shared between the repository, launcher, reaper, and
//! supervisor.

use std::path::PathBuf;

/// An executable path plus its argument vector. Immutable, consumed once by
/// the [`crate::launcher`].
#[derive(Debug, Clone)]
pub struct ServiceSpec {
    pub path: PathBuf,
    pub args: Vec<String>,
}

impl ServiceSpec {
    pub fn new(path: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            path: path.into(),
            args,
        }
    }
}

/// A service this manager spawned directly. Immutable after creation;
/// removed from the repository once its pid is reaped.
#[derive(Debug, Clone)]
pub struct LaunchedService {
    pub spec: ServiceSpec,
    pub pid: i32,
}

/// Outcome of a single non-blocking `waitpid` in the reaper's drain loop.
#[derive(Debug, Clone, Copy)]
pub struct ReapedProc {
    pub pid: i32,
    pub wait_status: nix::sys::wait::WaitStatus,
    /// The exited-normally exit status, or `0` for any other termination
    /// reason (signaled, stopped, continued). See SPEC_FULL.md §6.
    pub exit_status: i32,
}

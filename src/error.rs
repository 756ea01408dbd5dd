//! Error taxonomy (SPEC_FULL.md §7). Only `LaunchError` and
//! `SupervisorError` are user-visible; everything else is logged and
//! absorbed by the component that owns it.

use std::path::PathBuf;

/// Fatal to startup: surfaces from [`crate::launcher::launch`].
#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    #[error("spawn {path:?} {args:?}: {source}")]
    Spawn {
        path: PathBuf,
        args: Vec<String>,
        #[source]
        source: std::io::Error,
    },
}

/// Recovered locally by the reaper; never propagated past `reap()`'s
/// internal loop.
#[derive(Debug, thiserror::Error)]
pub enum ReapError {
    #[error("waitpid: {0}")]
    Wait(#[source] nix::Error),
}

/// Fatal to [`crate::supervisor::Supervisor::new`]: the signal subscription
/// itself could not be installed.
#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    #[error("install signal handlers: {0}")]
    SignalInstall(#[source] std::io::Error),
}

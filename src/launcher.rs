//! Service Launcher (SPEC_FULL.md §4.3): spawns the initial batch of
//! services and registers each launched pid in the repository.
//!
//! Process attributes beyond the executable path and argv are policy of
//! the surrounding collaborator (SPEC_FULL.md §4.3); this stand-in
//! inherits the manager's own stdio and environment, which is the
//! reasonable default for a container entry process.

use std::process::Command;

use crate::error::LaunchError;
use crate::repository::ServiceRepository;
use crate::types::ServiceSpec;

/// Spawn each spec in sequence, registering its pid in `repo` on success.
///
/// On the first failed spawn this returns immediately without rolling back
/// already-successful spawns — the caller is responsible for draining
/// those via the supervisor's shutdown protocol.
///
/// Spawning and registering a given spec happen under the repository's
/// own lock (`ServiceRepository::spawn_and_register`): a child that exits
/// before its pid would otherwise have been inserted can still only be
/// reaped after the insert completes.
pub fn launch(specs: Vec<ServiceSpec>, repo: &ServiceRepository) -> Result<(), LaunchError> {
    for spec in specs {
        repo.spawn_and_register(spec, |spec| {
            Command::new(&spec.path).args(&spec.args).spawn()
        })?;
        // All reaping goes through the zombie reaper's waitpid(-1, ...);
        // the Child handle is never wait()ed on directly.
    }
    Ok(())
}

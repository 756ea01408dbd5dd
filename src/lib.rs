//! Minimal PID 1: zombie reaping, signal forwarding, and bounded
//! multi-service shutdown. See `SPEC_FULL.md` for the full component
//! breakdown this module layout mirrors.

pub mod error;
pub mod launcher;
pub mod reaper;
pub mod repository;
pub mod supervisor;
pub mod types;

pub use error::{LaunchError, ReapError, SupervisorError};
pub use repository::ServiceRepository;
pub use supervisor::Supervisor;
pub use types::{LaunchedService, ReapedProc, ServiceSpec};

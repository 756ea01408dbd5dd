//! CLI entry point (SPEC_FULL.md §10.1). Argv only, no config file: every
//! argument after the binary name is split into service command groups on
//! a literal `--` separator, e.g.
//!
//!     tinit /usr/sbin/sshd -D -- /usr/bin/nginx -g 'daemon off;'

use std::process::ExitCode;

use tracing_subscriber::EnvFilter;

use tinit::{launcher, ServiceSpec, Supervisor};

fn service_specs_from_args(args: Vec<String>) -> Vec<ServiceSpec> {
    args.split(|arg| arg == "--")
        .filter(|group| !group.is_empty())
        .filter_map(|group| {
            let (path, rest) = group.split_first()?;
            Some(ServiceSpec::new(path.clone(), rest.to_vec()))
        })
        .collect()
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let specs = service_specs_from_args(std::env::args().skip(1).collect());
    if specs.is_empty() {
        tracing::error!("usage: tinit <path> [args...] [-- <path> [args...]]...");
        return ExitCode::from(64); // EX_USAGE
    }

    let repo = tinit::ServiceRepository::new();
    let multi_service_mode = specs.len() > 1;

    let supervisor = match Supervisor::new(repo.clone(), multi_service_mode) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(error = %e, "failed to install signal handlers");
            return ExitCode::from(1);
        }
    };

    match launcher::launch(specs, &repo) {
        Ok(()) => supervisor.mark_running(),
        Err(e) => {
            tracing::error!(error = %e, "bootstrap failed, draining already-launched services");
            supervisor.shutdown_after_bootstrap_failure();
        }
    }

    let code = supervisor.wait();
    ExitCode::from(code as u8)
}

//! The Supervisor (SPEC_FULL.md §4.4): owns the signal pump, dispatches
//! reaped processes through the repository, computes the final exit code,
//! and drives the bounded shutdown escalation.

use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use signal_hook::iterator::{Handle, Signals};
use tracing::{debug, error, info, warn};

use crate::error::SupervisorError;
use crate::reaper::ZombieReaper;
use crate::repository::ServiceRepository;
use crate::types::LaunchedService;

/// Signals considered forwardable in principle (SPEC_FULL.md §6). SIGKILL
/// and SIGSTOP are omitted here too: the kernel never delivers them to a
/// handler, so subscribing to them is dead code.
const CANDIDATE_SIGNALS: &[libc::c_int] = &[
    libc::SIGHUP,
    libc::SIGINT,
    libc::SIGQUIT,
    libc::SIGILL,
    libc::SIGTRAP,
    libc::SIGABRT,
    libc::SIGBUS,
    libc::SIGFPE,
    libc::SIGUSR1,
    libc::SIGSEGV,
    libc::SIGUSR2,
    libc::SIGPIPE,
    libc::SIGALRM,
    libc::SIGTERM,
    libc::SIGSTKFLT,
    libc::SIGCHLD,
    libc::SIGCONT,
    libc::SIGTSTP,
    libc::SIGTTIN,
    libc::SIGTTOU,
    libc::SIGXCPU,
    libc::SIGXFSZ,
    libc::SIGVTALRM,
    libc::SIGPROF,
    libc::SIGWINCH,
    libc::SIGIO,
    libc::SIGPWR,
    libc::SIGSYS,
];

/// `CANDIDATE_SIGNALS` minus whatever `signal_hook` itself refuses to
/// register a handler for — the synchronous fault signals (SIGILL,
/// SIGTRAP, SIGABRT, SIGBUS, SIGFPE, SIGSEGV, SIGSYS) are delivered to the
/// faulting thread itself and aren't meaningfully forwardable from an
/// init process anyway. Filtering against `FORBIDDEN` directly, rather
/// than hand-omitting them, keeps this correct if that set ever changes.
fn allowed_signals() -> impl Iterator<Item = libc::c_int> {
    CANDIDATE_SIGNALS
        .iter()
        .copied()
        .filter(|sig| !signal_hook::consts::FORBIDDEN.contains(sig))
}

/// The shutdown escalation table from SPEC_FULL.md §4.4.4.
const SHUTDOWN_PHASES: [Signal; 4] = [Signal::SIGTERM, Signal::SIGTERM, Signal::SIGTERM, Signal::SIGKILL];
const PHASE_BUDGET: Duration = Duration::from_secs(5);
const POLL_INTERVAL: Duration = Duration::from_millis(10);
const PUMP_TEARDOWN_GRACE: Duration = Duration::from_millis(100);

/// Sentinel returned by `wait()` when no managed service ever sets a
/// more specific code (bootstrap failure, or — defensively — a `wait()`
/// that returns without ever observing a termination).
const NO_USEFUL_CHILD_CODE: i32 = 77;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SupervisorState {
    Starting,
    Running,
    Draining,
    Terminated,
}

pub struct Supervisor {
    repo: ServiceRepository,
    reaper: Arc<ZombieReaper>,
    multi_service_mode: bool,

    shutting_down: AtomicBool,
    final_exit_code: AtomicI32,
    state: Mutex<SupervisorState>,

    term_tx: Sender<()>,
    term_rx: Mutex<Receiver<()>>,

    signals_handle: Handle,
    pump_done_rx: Mutex<Receiver<()>>,
    pump_thread: Mutex<Option<JoinHandle<()>>>,
}

impl Supervisor {
    /// Install the signal subscription and start the pump thread.
    /// `multi_service_mode` is `specs.len() > 1` as observed by the caller
    /// at launch time (SPEC_FULL.md §3).
    pub fn new(
        repo: ServiceRepository,
        multi_service_mode: bool,
    ) -> Result<Arc<Self>, SupervisorError> {
        let mut signals = Signals::new(allowed_signals()).map_err(SupervisorError::SignalInstall)?;
        let signals_handle = signals.handle();

        let (term_tx, term_rx) = mpsc::channel();
        let (pump_done_tx, pump_done_rx) = mpsc::channel();

        let supervisor = Arc::new(Self {
            repo,
            reaper: Arc::new(ZombieReaper::new()),
            multi_service_mode,
            shutting_down: AtomicBool::new(false),
            final_exit_code: AtomicI32::new(NO_USEFUL_CHILD_CODE),
            state: Mutex::new(SupervisorState::Starting),
            term_tx,
            term_rx: Mutex::new(term_rx),
            signals_handle,
            pump_done_rx: Mutex::new(pump_done_rx),
            pump_thread: Mutex::new(None),
        });

        let pump_supervisor = Arc::clone(&supervisor);
        let handle = thread::spawn(move || {
            for raw_sig in signals.forever() {
                Self::dispatch_signal(&pump_supervisor, raw_sig);
            }
            let _ = pump_done_tx.send(());
        });
        *supervisor.pump_thread.lock().unwrap_or_else(|e| e.into_inner()) = Some(handle);

        Ok(supervisor)
    }

    /// Transition STARTING -> RUNNING once the launcher has spawned every
    /// service successfully (SPEC_FULL.md §4.4.5).
    pub fn mark_running(&self) {
        self.transition(SupervisorState::Starting, SupervisorState::Running);
    }

    fn transition(&self, from: SupervisorState, to: SupervisorState) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if *state == from {
            debug!(?from, ?to, "supervisor state transition");
            *state = to;
        }
    }

    fn dispatch_signal(self: &Arc<Self>, raw_sig: libc::c_int) {
        if raw_sig == libc::SIGCHLD {
            // Reap-dispatch runs on its own thread so the pump stays free
            // to receive the next signal; the reaper's own mutex still
            // serializes the actual waitpid drain (SPEC_FULL.md §5).
            let supervisor = Arc::clone(self);
            thread::spawn(move || supervisor.run_reap_dispatch());
            return;
        }

        let Ok(signal) = Signal::try_from(raw_sig) else {
            warn!(raw_sig, "received unrecognized signal, ignoring");
            return;
        };
        self.multicast(signal);
    }

    fn run_reap_dispatch(&self) {
        let batch = self.reaper.reap();
        for reaped in batch {
            let Some(service) = self.repo.remove(reaped.pid) else {
                debug!(pid = reaped.pid, "reaped a foreign (orphaned) process");
                continue;
            };
            handle_service_termination(
                service,
                reaped.exit_status,
                self.multi_service_mode,
                &self.shutting_down,
                &self.final_exit_code,
                &self.state,
                &self.term_tx,
            );
        }
    }

    fn multicast(&self, signal: Signal) {
        for pid in self.repo.pids() {
            if let Err(e) = kill(Pid::from_raw(pid), signal) {
                warn!(pid, ?signal, error = %e, "signal delivery failed, ignoring");
            }
        }
    }

    /// Block until the shutdown protocol has driven the repository to
    /// zero (or the phase-4 budget has elapsed), then return the final
    /// exit code.
    pub fn wait(&self) -> i32 {
        {
            let rx = self.term_rx.lock().unwrap_or_else(|e| e.into_inner());
            // A second termination racing in behind the first is fine:
            // it only ever attempts one send (the latch guarantees that),
            // so this recv always corresponds to the winner.
            let _ = rx.recv();
        }

        self.transition(SupervisorState::Starting, SupervisorState::Draining);
        self.transition(SupervisorState::Running, SupervisorState::Draining);

        self.run_shutdown_protocol();
        self.teardown_pump();

        self.transition(SupervisorState::Draining, SupervisorState::Terminated);

        self.final_exit_code.load(Ordering::SeqCst)
    }

    /// Wake `wait()` directly for a bootstrap failure: the launcher never
    /// spawned any managed service, so there is no termination event to
    /// dispatch, only the exit code 77 already latched at construction
    /// (SPEC_FULL.md §6, bootstrap failure).
    pub fn shutdown_after_bootstrap_failure(&self) {
        if self.shutting_down.compare_exchange(
            false,
            true,
            Ordering::SeqCst,
            Ordering::SeqCst,
        ).is_err()
        {
            return;
        }
        error!("bootstrap failed before any service ran, draining and exiting 77");
        let _ = self.term_tx.send(());
    }

    fn run_shutdown_protocol(&self) {
        'phases: for (phase_idx, signal) in SHUTDOWN_PHASES.iter().enumerate() {
            let pids = self.repo.pids();
            if pids.is_empty() {
                break 'phases;
            }

            info!(phase = phase_idx + 1, ?signal, targets = pids.len(), "shutdown phase");
            for pid in pids {
                if let Err(e) = kill(Pid::from_raw(pid), *signal) {
                    warn!(pid, ?signal, error = %e, "shutdown signal delivery failed, ignoring");
                }
            }

            let deadline = Instant::now() + PHASE_BUDGET;
            loop {
                if self.repo.count() == 0 {
                    break 'phases;
                }
                if Instant::now() >= deadline {
                    break;
                }
                thread::sleep(POLL_INTERVAL);
            }
        }
    }

    fn teardown_pump(&self) {
        self.signals_handle.close();

        let done = self.pump_done_rx.lock().unwrap_or_else(|e| e.into_inner());
        if done.recv_timeout(PUMP_TEARDOWN_GRACE).is_err() {
            debug!("signal pump did not acknowledge teardown within the grace period");
        }
        // PumpTeardownTimeout is not an error (SPEC_FULL.md §7): proceed
        // with process exit regardless of whether the pump acknowledged.

        if let Some(handle) = self.pump_thread.lock().unwrap_or_else(|e| e.into_inner()).take() {
            let _ = handle.join();
        }
    }
}

/// Attempt to latch `shutting_down` and, on success, compute and publish
/// the final exit code (SPEC_FULL.md §4.4.3). A losing caller (`LatchLost`
/// in the error taxonomy) returns silently — the first death's exit code
/// wins.
#[allow(clippy::too_many_arguments)]
fn handle_service_termination(
    service: LaunchedService,
    exit_status: i32,
    multi_service_mode: bool,
    shutting_down: &AtomicBool,
    final_exit_code: &AtomicI32,
    state: &Mutex<SupervisorState>,
    term_tx: &Sender<()>,
) {
    if shutting_down
        .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
        .is_err()
    {
        debug!(pid = service.pid, "termination observed after shutdown already latched, discarding");
        return;
    }

    let code = if multi_service_mode {
        if exit_status != 0 {
            exit_status
        } else {
            NO_USEFUL_CHILD_CODE
        }
    } else {
        exit_status
    };
    final_exit_code.store(code, Ordering::SeqCst);

    {
        let mut guard = state.lock().unwrap_or_else(|e| e.into_inner());
        *guard = SupervisorState::Draining;
    }

    info!(
        pid = service.pid,
        path = %service.spec.path.display(),
        exit_status,
        final_exit_code = code,
        "managed service terminated, entering shutdown"
    );

    let _ = term_tx.send(());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::launcher::launch;
    use crate::types::ServiceSpec;
    use std::io::Write;

    fn script(body: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, "#!/bin/sh\n{body}").unwrap();
        let mut perms = f.as_file().metadata().unwrap().permissions();
        std::os::unix::fs::PermissionsExt::set_mode(&mut perms, 0o755);
        f.as_file().set_permissions(perms).unwrap();
        f
    }

    #[test]
    fn single_service_clean_exit_returns_zero() {
        let repo = ServiceRepository::new();
        let sup = Supervisor::new(repo.clone(), false).unwrap();
        launch(vec![ServiceSpec::new("/bin/true", vec![])], &repo).unwrap();
        sup.mark_running();

        assert_eq!(sup.wait(), 0);
    }

    #[test]
    fn single_service_nonzero_exit_is_passed_through() {
        let repo = ServiceRepository::new();
        let sup = Supervisor::new(repo.clone(), false).unwrap();
        let f = script("exit 42");
        launch(
            vec![ServiceSpec::new(f.path().to_path_buf(), vec![])],
            &repo,
        )
        .unwrap();
        sup.mark_running();

        assert_eq!(sup.wait(), 42);
    }

    #[test]
    fn multi_service_mode_maps_zero_exit_to_77() {
        let repo = ServiceRepository::new();
        let sup = Supervisor::new(repo.clone(), true).unwrap();
        let quick = script("exit 0");
        let slow = script("sleep 60");
        launch(
            vec![
                ServiceSpec::new(quick.path().to_path_buf(), vec![]),
                ServiceSpec::new(slow.path().to_path_buf(), vec![]),
            ],
            &repo,
        )
        .unwrap();
        sup.mark_running();

        assert_eq!(sup.wait(), 77);
    }

    #[test]
    fn multi_service_mode_propagates_nonzero_exit() {
        let repo = ServiceRepository::new();
        let sup = Supervisor::new(repo.clone(), true).unwrap();
        let quick = script("exit 7");
        let slow = script("sleep 60");
        launch(
            vec![
                ServiceSpec::new(quick.path().to_path_buf(), vec![]),
                ServiceSpec::new(slow.path().to_path_buf(), vec![]),
            ],
            &repo,
        )
        .unwrap();
        sup.mark_running();

        assert_eq!(sup.wait(), 7);
    }

    #[test]
    fn bootstrap_failure_yields_77_and_drains_already_launched() {
        let repo = ServiceRepository::new();
        let sup = Supervisor::new(repo.clone(), true).unwrap();
        let slow = script("sleep 60");
        launch(vec![ServiceSpec::new(slow.path().to_path_buf(), vec![])], &repo).unwrap();

        sup.shutdown_after_bootstrap_failure();
        assert_eq!(sup.wait(), 77);
        assert_eq!(repo.count(), 0);
    }
}

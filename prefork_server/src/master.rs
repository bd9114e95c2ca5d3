//! Master process: accept connections and supervise workers.
//!
//! The master is single-threaded. It owns the listening socket (bound
//! with address reuse, non-blocking, edge-triggered in epoll), creates
//! the shared job channel and statistics region, forks the workers, and
//! then loops: drain accepts on readiness, distribute each descriptor
//! through the job channel, and every supervision interval probe child
//! status with a non-blocking waitpid, re-forking crashed workers into
//! their original slot.
//!
//! SIGTERM/SIGINT set a flag checked every loop turn. Shutdown closes
//! the listener first, SIGTERMs the workers, polls for their exit up to
//! a deadline, SIGKILLs stragglers, and finally unlinks the named IPC
//! objects.

use std::os::unix::io::{AsRawFd, OwnedFd, RawFd};
use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use nix::errno::Errno;
use nix::sys::epoll::{Epoll, EpollCreateFlags, EpollEvent, EpollFlags, EpollTimeout};
use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, Signal};
use nix::sys::socket::{self, sockopt, AddressFamily, Backlog, SockFlag, SockType, SockaddrIn};
use nix::sys::wait::{self, WaitPidFlag, WaitStatus};
use nix::unistd::{self, ForkResult, Pid};
use tracing::{debug, error, info, warn};

use prefork_common::consts::{LISTEN_BACKLOG, MAX_WORKERS, SHUTDOWN_POLL_INTERVAL};
use prefork_common::stats::WorkerStatus;
use prefork_ipc::FifoChannel;

use crate::config::Config;
use crate::error::ServerResult;
use crate::fdpass::{self, FdReceiver, FdSender};
use crate::router::Router;
use crate::stats::StatsRegion;
use crate::worker::WorkerProcess;

/// Epoll event buffer size per wait.
const MAX_EVENTS: usize = 64;

/// Epoll wait timeout, so signals and the supervision clock are observed
/// even with no traffic.
const EPOLL_TIMEOUT_MS: u16 = 1000;

static SHUTDOWN: AtomicBool = AtomicBool::new(false);

extern "C" fn on_shutdown_signal(_: libc::c_int) {
    SHUTDOWN.store(true, Ordering::SeqCst);
}

/// One supervised worker, as the master tracks it.
struct WorkerEntry {
    pid: Pid,
    alive: bool,
}

/// Runtime state owned by a running master.
struct MasterState {
    listener: OwnedFd,
    epoll: Epoll,
    jobs: FifoChannel<RawFd>,
    fd_tx: FdSender,
    fd_rx: FdReceiver,
    stats: Arc<StatsRegion>,
    workers: Vec<WorkerEntry>,
}

/// The master process.
pub struct Master {
    config: Config,
    router: Arc<Router>,
}

impl Master {
    /// Build a master from a finished route table.
    ///
    /// The worker count is clamped to `1..=MAX_WORKERS`.
    pub fn new(mut config: Config, router: Router) -> Self {
        if config.workers > MAX_WORKERS {
            warn!(
                requested = config.workers,
                max = MAX_WORKERS,
                "clamping worker count"
            );
            config.workers = MAX_WORKERS;
        }
        if config.workers == 0 {
            config.workers = 1;
        }
        Self {
            config,
            router: Arc::new(router),
        }
    }

    /// Run until a shutdown signal arrives, then drain and clean up.
    pub fn run(&self) -> ServerResult<()> {
        SHUTDOWN.store(false, Ordering::SeqCst);
        install_signal_handlers()?;

        let listener = self.setup_listener()?;
        let epoll = Epoll::new(EpollCreateFlags::empty())?;
        epoll.add(
            &listener,
            EpollEvent::new(
                EpollFlags::EPOLLIN | EpollFlags::EPOLLET,
                listener.as_raw_fd() as u64,
            ),
        )?;

        let jobs =
            FifoChannel::<RawFd>::create(&self.config.jobs_channel_name, self.config.queue_capacity)?;
        let (fd_tx, fd_rx) = fdpass::channel()?;
        let stats = Arc::new(StatsRegion::create(&self.config.stats_region_name)?);

        let mut state = MasterState {
            listener,
            epoll,
            jobs,
            fd_tx,
            fd_rx,
            stats,
            workers: Vec::with_capacity(self.config.workers),
        };

        for slot in 0..self.config.workers {
            let pid = self.fork_into_slot(&mut state, slot)?;
            state.workers.push(WorkerEntry { pid, alive: true });
        }

        info!(
            port = self.config.port,
            workers = state.workers.len(),
            "master accepting connections"
        );

        let result = self.accept_loop(&mut state);
        self.graceful_shutdown(state);
        result
    }

    /// Create the listening socket: address-reusable, bound, listening,
    /// non-blocking for the edge-triggered accept drain.
    fn setup_listener(&self) -> ServerResult<OwnedFd> {
        let listener = socket::socket(
            AddressFamily::Inet,
            SockType::Stream,
            SockFlag::SOCK_NONBLOCK,
            None,
        )?;
        socket::setsockopt(&listener, sockopt::ReuseAddr, &true)?;

        let addr = SockaddrIn::new(0, 0, 0, 0, self.config.port);
        socket::bind(listener.as_raw_fd(), &addr)?;
        socket::listen(&listener, Backlog::new(LISTEN_BACKLOG)?)?;

        debug!(port = self.config.port, "listener bound");
        Ok(listener)
    }

    /// Fork a worker occupying `slot`. The child never returns from here.
    fn fork_into_slot(&self, state: &MasterState, slot: usize) -> ServerResult<Pid> {
        // SAFETY: the master is single-threaded, and the child calls
        // nothing but the worker loop before process::exit.
        match unsafe { unistd::fork() }? {
            ForkResult::Child => {
                // The accept side stays with the master.
                let _ = unistd::close(state.listener.as_raw_fd());
                let _ = unistd::close(state.epoll.0.as_raw_fd());

                state.stats.stats().worker(slot).reset(process::id());
                let worker = WorkerProcess::new(
                    slot,
                    Arc::clone(&self.router),
                    Arc::clone(&state.stats),
                    self.config.threads_per_worker,
                );
                let code = match worker.run(&state.jobs, &state.fd_rx) {
                    Ok(()) => 0,
                    Err(e) => {
                        error!(slot, "worker terminating: {e}");
                        1
                    }
                };
                // Exit without unwinding into the master's state.
                process::exit(code);
            }
            ForkResult::Parent { child } => {
                state.stats.stats().worker(slot).reset(child.as_raw() as u32);
                info!(slot, pid = child.as_raw(), "worker forked");
                Ok(child)
            }
        }
    }

    /// Readiness-driven accept drain plus periodic supervision.
    fn accept_loop(&self, state: &mut MasterState) -> ServerResult<()> {
        let mut events = [EpollEvent::empty(); MAX_EVENTS];
        let mut last_sweep = Instant::now();

        while !SHUTDOWN.load(Ordering::SeqCst) {
            let ready = match state
                .epoll
                .wait(&mut events, EpollTimeout::from(EPOLL_TIMEOUT_MS))
            {
                Ok(n) => n,
                Err(Errno::EINTR) => 0,
                Err(e) => return Err(e.into()),
            };

            for event in &events[..ready] {
                if event.data() == state.listener.as_raw_fd() as u64 {
                    self.drain_accepts(state);
                }
            }

            if last_sweep.elapsed() >= self.config.supervision_interval {
                self.supervise(state);
                last_sweep = Instant::now();
            }
        }
        Ok(())
    }

    /// Accept until the socket would block (edge-triggered drain).
    fn drain_accepts(&self, state: &MasterState) {
        loop {
            match socket::accept(state.listener.as_raw_fd()) {
                Ok(fd) => self.distribute(state, fd),
                Err(Errno::EAGAIN) => break,
                Err(Errno::EINTR) => continue,
                Err(e) => {
                    error!("accept failed: {e}");
                    break;
                }
            }
        }
    }

    /// Hand one accepted descriptor to the workers.
    ///
    /// A refused enqueue closes the descriptor and counts an error; the
    /// master never retries.
    fn distribute(&self, state: &MasterState, fd: RawFd) {
        let stats = state.stats.stats();
        match state.jobs.enqueue(fd) {
            Ok(()) => {
                if let Err(e) = state.fd_tx.send(fd) {
                    // The queue token is stranded; workers pair tokens and
                    // descriptors one to one, so this desyncs labelling
                    // until the channel is recreated.
                    error!(fd, "descriptor transfer failed: {e}");
                    stats.total_errors.fetch_add(1, Ordering::Relaxed);
                } else {
                    stats.total_requests.fetch_add(1, Ordering::Relaxed);
                    stats.active_connections.fetch_add(1, Ordering::Relaxed);
                    debug!(fd, "connection distributed");
                }
                // The worker holds its own reference now.
                let _ = unistd::close(fd);
            }
            Err(e) => {
                warn!(fd, "connection refused: {e}");
                let _ = unistd::close(fd);
                stats.total_errors.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Non-blocking child-status probe over every tracked worker.
    fn supervise(&self, state: &mut MasterState) {
        for slot in 0..state.workers.len() {
            if !state.workers[slot].alive {
                continue;
            }
            let pid = state.workers[slot].pid;
            match wait::waitpid(pid, Some(WaitPidFlag::WNOHANG)) {
                Ok(WaitStatus::StillAlive) => {}
                Ok(WaitStatus::Exited(_, code)) => {
                    warn!(slot, pid = pid.as_raw(), code, "worker exited");
                    self.replace_worker(state, slot);
                }
                Ok(WaitStatus::Signaled(_, sig, _)) => {
                    warn!(slot, pid = pid.as_raw(), signal = %sig, "worker killed by signal");
                    self.replace_worker(state, slot);
                }
                Ok(_) => {}
                Err(Errno::ECHILD) => {
                    state.workers[slot].alive = false;
                }
                Err(e) => warn!(slot, "waitpid failed: {e}"),
            }
        }
    }

    /// Fork a replacement into the same slot, unless shutting down.
    fn replace_worker(&self, state: &mut MasterState, slot: usize) {
        if SHUTDOWN.load(Ordering::SeqCst) {
            state.workers[slot].alive = false;
            state.stats.stats().worker(slot).set_status(WorkerStatus::Dead);
            return;
        }
        match self.fork_into_slot(state, slot) {
            Ok(pid) => {
                state.workers[slot] = WorkerEntry { pid, alive: true };
            }
            Err(e) => {
                error!(slot, "failed to restart worker: {e}");
                state.workers[slot].alive = false;
                state.stats.stats().worker(slot).set_status(WorkerStatus::Dead);
            }
        }
    }

    /// Stop accepting, drain the workers, escalate past the deadline,
    /// unlink the named IPC objects.
    fn graceful_shutdown(&self, state: MasterState) {
        info!("graceful shutdown initiated");

        let MasterState {
            listener,
            epoll,
            jobs,
            fd_tx,
            fd_rx,
            stats,
            mut workers,
        } = state;

        // 1. Stop accepting.
        let _ = epoll.delete(&listener);
        drop(epoll);
        drop(listener);

        // 2. Ask every live worker to drain.
        for entry in workers.iter().filter(|w| w.alive) {
            debug!(pid = entry.pid.as_raw(), "sending SIGTERM");
            let _ = signal::kill(entry.pid, Signal::SIGTERM);
        }

        // 3. Bounded reap loop.
        let deadline = Instant::now() + self.config.shutdown_timeout;
        while workers.iter().any(|w| w.alive) {
            for slot in 0..workers.len() {
                if !workers[slot].alive {
                    continue;
                }
                match wait::waitpid(workers[slot].pid, Some(WaitPidFlag::WNOHANG)) {
                    Ok(WaitStatus::StillAlive) => {}
                    Ok(WaitStatus::Exited(..)) | Ok(WaitStatus::Signaled(..)) | Err(_) => {
                        info!(slot, "worker drained");
                        workers[slot].alive = false;
                        stats.stats().worker(slot).set_status(WorkerStatus::Dead);
                    }
                    Ok(_) => {}
                }
            }

            if !workers.iter().any(|w| w.alive) {
                break;
            }
            if Instant::now() >= deadline {
                warn!("shutdown deadline reached; escalating to SIGKILL");
                for slot in 0..workers.len() {
                    if !workers[slot].alive {
                        continue;
                    }
                    let _ = signal::kill(workers[slot].pid, Signal::SIGKILL);
                    let _ = wait::waitpid(workers[slot].pid, None);
                    workers[slot].alive = false;
                    stats.stats().worker(slot).set_status(WorkerStatus::Dead);
                }
                break;
            }
            thread::sleep(SHUTDOWN_POLL_INTERVAL);
        }

        drop(fd_tx);
        drop(fd_rx);

        // 4. Remove the names; mappings in any surviving observer stay
        // valid until they detach.
        if let Err(e) = jobs.unlink() {
            warn!("failed to unlink job channel: {e}");
        }
        if let Err(e) = stats.unlink() {
            warn!("failed to unlink stats region: {e}");
        }
        info!("shutdown complete");
    }
}

/// Install the master's signal dispositions: shutdown flag on
/// SIGTERM/SIGINT, SIGPIPE ignored. SIGCHLD stays default; children are
/// reaped by the non-blocking waitpid sweeps.
fn install_signal_handlers() -> ServerResult<()> {
    let shutdown = SigAction::new(
        SigHandler::Handler(on_shutdown_signal),
        SaFlags::empty(),
        SigSet::empty(),
    );
    let ignore = SigAction::new(SigHandler::SigIgn, SaFlags::empty(), SigSet::empty());

    // SAFETY: the handler only performs an atomic store.
    unsafe {
        signal::sigaction(Signal::SIGTERM, &shutdown)?;
        signal::sigaction(Signal::SIGINT, &shutdown)?;
        signal::sigaction(Signal::SIGPIPE, &ignore)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_count_clamped() {
        let config = Config {
            workers: MAX_WORKERS + 10,
            ..Config::default()
        };
        let master = Master::new(config, Router::new());
        assert_eq!(master.config.workers, MAX_WORKERS);

        let config = Config {
            workers: 0,
            ..Config::default()
        };
        let master = Master::new(config, Router::new());
        assert_eq!(master.config.workers, 1);
    }
}

//! Worker process: consume accepted connections and service them.
//!
//! Each worker runs the same loop: block on the shared job channel,
//! adopt the transferred descriptor, and hand it to the in-process
//! thread pool. The pool task reads the request, routes it, writes the
//! response, and closes the connection, keeping the slot's status and
//! counters in the shared statistics region current.
//!
//! SIGTERM/SIGINT set a process-local flag; the blocking dequeue returns
//! with `Interrupted` and the loop winds down: the pool drains its
//! in-flight tasks, the slot is marked dead, and the caller exits the
//! process. A signal landing in the sliver between the flag check and
//! re-entering the wait parks the worker until the master's shutdown
//! deadline SIGKILLs it; the escalation ladder exists for exactly that.

use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::os::unix::io::{OwnedFd, RawFd};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde_json::json;
use tracing::{error, info, trace, warn};

use prefork_common::consts::{MAX_REQUEST_SIZE, READ_BUF_SIZE};
use prefork_common::stats::WorkerStatus;
use prefork_ipc::{FifoChannel, IpcError};

use crate::error::{ServerError, ServerResult};
use crate::fdpass::FdReceiver;
use crate::http::{Request, Response};
use crate::pool::ThreadPool;
use crate::router::Router;
use crate::stats::StatsRegion;

static SHUTDOWN: AtomicBool = AtomicBool::new(false);

extern "C" fn on_shutdown_signal(_: libc::c_int) {
    SHUTDOWN.store(true, Ordering::SeqCst);
}

/// One pre-forked worker.
pub struct WorkerProcess {
    slot: usize,
    router: Arc<Router>,
    stats: Arc<StatsRegion>,
    threads: usize,
}

impl WorkerProcess {
    /// Bind a worker to its stats slot and shared collaborators.
    pub fn new(
        slot: usize,
        router: Arc<Router>,
        stats: Arc<StatsRegion>,
        threads: usize,
    ) -> Self {
        Self {
            slot,
            router,
            stats,
            threads,
        }
    }

    /// Main loop; returns when shutdown is requested or the job channel
    /// fails fatally. The caller exits the process afterwards.
    pub fn run(&self, jobs: &FifoChannel<RawFd>, incoming: &FdReceiver) -> ServerResult<()> {
        install_signal_handlers()?;

        let mut pool = ThreadPool::new(self.threads);
        self.slot_stats().set_status(WorkerStatus::Idle);
        info!(
            slot = self.slot,
            pid = std::process::id(),
            threads = self.threads,
            "worker started"
        );

        let result = loop {
            if SHUTDOWN.load(Ordering::SeqCst) {
                break Ok(());
            }

            let token = match jobs.dequeue() {
                Ok(token) => token,
                Err(IpcError::Interrupted { .. }) => continue,
                Err(e) => {
                    error!(slot = self.slot, "job channel failed: {e}");
                    break Err(ServerError::from(e));
                }
            };

            let (conn, _) = match incoming.recv() {
                Ok(pair) => pair,
                Err(e) => {
                    error!(slot = self.slot, "descriptor transfer failed: {e}");
                    break Err(e);
                }
            };
            trace!(slot = self.slot, token, "connection dequeued");

            self.schedule(&pool, conn);
        };

        // Drain in-flight requests before reporting the slot dead.
        pool.stop();
        self.slot_stats().set_status(WorkerStatus::Dead);
        info!(slot = self.slot, "worker stopped");
        result
    }

    fn slot_stats(&self) -> &prefork_common::stats::WorkerSlot {
        self.stats.stats().worker(self.slot)
    }

    fn schedule(&self, pool: &ThreadPool, conn: OwnedFd) {
        let router = Arc::clone(&self.router);
        let stats = Arc::clone(&self.stats);
        let slot = self.slot;
        let scheduled = pool.execute(move || handle_connection(conn, slot, &router, &stats));
        if scheduled.is_err() {
            // Dropping the descriptor closes the connection.
            self.slot_stats()
                .record_failed("connection rejected: pool stopped");
        }
    }
}

/// Outcome of servicing one connection.
enum ServeOutcome {
    /// A response was written (including 404s).
    Handled,
    /// The request failed somewhere; counted against the slot.
    Failed(String),
    /// The client sent nothing; closed silently.
    Closed,
}

/// Pool task: service one adopted connection end to end.
fn handle_connection(conn: OwnedFd, slot: usize, router: &Router, stats: &StatsRegion) {
    let global = stats.stats();
    let worker = global.worker(slot);
    worker.set_status(WorkerStatus::Busy);

    let mut stream = TcpStream::from(conn);
    match serve(&mut stream, router) {
        ServeOutcome::Handled => worker.record_handled(),
        ServeOutcome::Failed(message) => {
            warn!(slot, "request failed: {message}");
            worker.record_failed(&message);
            global.total_errors.fetch_add(1, Ordering::Relaxed);
        }
        ServeOutcome::Closed => {}
    }

    global.active_connections.fetch_sub(1, Ordering::Relaxed);
    worker.set_status(WorkerStatus::Idle);
    // stream drops here, closing the descriptor.
}

/// Read, parse, route, respond.
fn serve(stream: &mut TcpStream, router: &Router) -> ServeOutcome {
    let raw = match read_request(stream) {
        Ok(raw) => raw,
        Err(e) => return ServeOutcome::Failed(format!("read failed: {e}")),
    };
    if raw.is_empty() {
        return ServeOutcome::Closed;
    }

    let (bytes, error) = match Request::parse(&raw) {
        Ok(request) => {
            let outcome = router.handle(&request);
            (outcome.response.into_bytes(), outcome.error)
        }
        Err(e) => {
            let response = Response::json(400, json!({ "error": e.to_string() }).to_string());
            (response.into_bytes(), Some(format!("bad request: {e}")))
        }
    };

    if let Err(e) = stream.write_all(&bytes) {
        return ServeOutcome::Failed(format!("write failed: {e}"));
    }
    let _ = stream.shutdown(Shutdown::Both);

    match error {
        Some(message) => ServeOutcome::Failed(message),
        None => ServeOutcome::Handled,
    }
}

/// Read a bounded request: one 8 KiB buffer up front, grown incrementally
/// to the configured maximum only when it fills.
fn read_request(stream: &mut TcpStream) -> io::Result<Vec<u8>> {
    let mut buf = vec![0u8; READ_BUF_SIZE];
    let mut filled = 0;
    loop {
        match stream.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => {
                filled += n;
                if filled < buf.len() {
                    // Short read: the request fit.
                    break;
                }
                if buf.len() >= MAX_REQUEST_SIZE {
                    break;
                }
                let grown = (buf.len() * 2).min(MAX_REQUEST_SIZE);
                buf.resize(grown, 0);
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    buf.truncate(filled);
    Ok(buf)
}

/// Install the worker's signal dispositions.
///
/// SA_RESTART is deliberately absent: a shutdown signal must interrupt
/// the blocking dequeue. SIGPIPE is ignored so a client hanging up
/// mid-write surfaces as a write error instead of killing the process.
fn install_signal_handlers() -> ServerResult<()> {
    use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};

    let shutdown = SigAction::new(
        SigHandler::Handler(on_shutdown_signal),
        SaFlags::empty(),
        SigSet::empty(),
    );
    let ignore = SigAction::new(SigHandler::SigIgn, SaFlags::empty(), SigSet::empty());

    // SAFETY: the handler only performs an atomic store.
    unsafe {
        sigaction(Signal::SIGTERM, &shutdown)?;
        sigaction(Signal::SIGINT, &shutdown)?;
        sigaction(Signal::SIGPIPE, &ignore)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::thread;

    fn connected_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).unwrap();
        let (server, _) = listener.accept().unwrap();
        (client, server)
    }

    #[test]
    fn test_read_request_single_read() {
        let (mut client, mut server) = connected_pair();
        client.write_all(b"GET / HTTP/1.1\r\n\r\n").unwrap();

        let raw = read_request(&mut server).unwrap();
        assert_eq!(raw, b"GET / HTTP/1.1\r\n\r\n");
    }

    #[test]
    fn test_read_request_grows_past_initial_buffer() {
        let (mut client, mut server) = connected_pair();
        let big_header = "X-Filler: ".to_string() + &"a".repeat(READ_BUF_SIZE);
        let request = format!("GET / HTTP/1.1\r\n{big_header}\r\n\r\n");

        // Write everything and half-close before the server reads, so the
        // whole request is buffered and EOF bounds the final read.
        client.write_all(request.as_bytes()).unwrap();
        client.shutdown(Shutdown::Write).unwrap();

        let raw = read_request(&mut server).unwrap();
        assert_eq!(raw.len(), request.len());
        assert!(raw.ends_with(b"\r\n\r\n"));
    }

    #[test]
    fn test_serve_routes_and_responds() {
        let mut router = Router::new();
        router.add_route("GET", "/ping", |_, _| Ok(Response::text(200, "pong")));

        let (mut client, mut server) = connected_pair();
        let client_side = thread::spawn(move || {
            client.write_all(b"GET /ping HTTP/1.1\r\nHost: t\r\n\r\n").unwrap();
            let mut response = String::new();
            client.read_to_string(&mut response).unwrap();
            response
        });

        assert!(matches!(serve(&mut server, &router), ServeOutcome::Handled));
        drop(server);

        let response = client_side.join().unwrap();
        assert!(response.starts_with("HTTP/1.1 200 OK"));
        assert!(response.ends_with("pong"));
    }

    #[test]
    fn test_serve_answers_400_for_garbage() {
        let router = Router::new();
        let (mut client, mut server) = connected_pair();
        let client_side = thread::spawn(move || {
            client.write_all(b"NOT-HTTP\r\n\r\n").unwrap();
            let mut response = String::new();
            client.read_to_string(&mut response).unwrap();
            response
        });

        assert!(matches!(
            serve(&mut server, &router),
            ServeOutcome::Failed(_)
        ));
        drop(server);

        let response = client_side.join().unwrap();
        assert!(response.starts_with("HTTP/1.1 400 Bad Request"));
    }

    #[test]
    fn test_serve_empty_connection_closes_silently() {
        let (client, mut server) = connected_pair();
        client.shutdown(Shutdown::Write).unwrap();
        assert!(matches!(serve(&mut server, &router_stub()), ServeOutcome::Closed));
    }

    fn router_stub() -> Router {
        Router::new()
    }
}

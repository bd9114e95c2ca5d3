//! Engine-wide constants.
//!
//! All runtime tuning that is not exposed on the command line is fixed at
//! compile time here. The master, the workers, and the external observer
//! binaries must agree on these values, so they are defined once.

use std::time::Duration;

/// Default TCP port the master listens on.
pub const DEFAULT_PORT: u16 = 8080;

/// Default number of pre-forked worker processes.
pub const DEFAULT_WORKERS: usize = 4;

/// Hard upper bound on worker processes.
///
/// The statistics region reserves one slot per possible worker, so this
/// value fixes the region size at compile time.
pub const MAX_WORKERS: usize = 32;

/// Listen backlog for the accept socket.
pub const LISTEN_BACKLOG: i32 = 128;

/// Capacity of the shared-memory connection queue (accepted descriptors
/// waiting for a worker).
pub const JOB_QUEUE_CAPACITY: u32 = 1024;

/// Threads in each worker's request-handling pool.
pub const THREADS_PER_WORKER: usize = 8;

/// How long the master waits for workers to drain before escalating to
/// SIGKILL.
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Sleep between child-status polls during graceful shutdown.
pub const SHUTDOWN_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Interval between supervision sweeps (reap + restart of dead workers).
pub const SUPERVISION_INTERVAL: Duration = Duration::from_secs(10);

/// Initial read buffer for an incoming request.
pub const READ_BUF_SIZE: usize = 8192;

/// Upper bound on a single request; reads grow incrementally up to this.
pub const MAX_REQUEST_SIZE: usize = 65536;

/// Bytes reserved per worker slot for the last recorded error message.
pub const LAST_ERROR_LEN: usize = 256;

/// Well-known name of the connection-distribution queue region.
///
/// The queue's semaphores derive from this name with the `_mutex` and
/// `_items` suffixes.
pub const JOBS_CHANNEL_NAME: &str = "/prefork_jobs";

/// Well-known name of the statistics region.
pub const STATS_REGION_NAME: &str = "/prefork_stats";

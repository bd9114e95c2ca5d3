//! Server configuration.
//!
//! Only the port and the worker count are runtime-tunable from the CLI;
//! everything else defaults to the compile-time values in
//! `prefork_common::consts`. The IPC object names are overridable so
//! tests can run isolated instances side by side.

use std::time::Duration;

use prefork_common::consts;

/// Master/worker runtime configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// TCP port the master listens on.
    pub port: u16,
    /// Number of pre-forked workers (clamped to `MAX_WORKERS`).
    pub workers: usize,
    /// Threads in each worker's request pool.
    pub threads_per_worker: usize,
    /// Capacity of the connection-distribution queue.
    pub queue_capacity: u32,
    /// Deadline for graceful worker drain before SIGKILL.
    pub shutdown_timeout: Duration,
    /// Interval between supervision sweeps.
    pub supervision_interval: Duration,
    /// Name of the connection queue region.
    pub jobs_channel_name: String,
    /// Name of the statistics region.
    pub stats_region_name: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: consts::DEFAULT_PORT,
            workers: consts::DEFAULT_WORKERS,
            threads_per_worker: consts::THREADS_PER_WORKER,
            queue_capacity: consts::JOB_QUEUE_CAPACITY,
            shutdown_timeout: consts::SHUTDOWN_TIMEOUT,
            supervision_interval: consts::SUPERVISION_INTERVAL,
            jobs_channel_name: consts::JOBS_CHANNEL_NAME.to_string(),
            stats_region_name: consts::STATS_REGION_NAME.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_come_from_consts() {
        let config = Config::default();
        assert_eq!(config.port, consts::DEFAULT_PORT);
        assert_eq!(config.queue_capacity, consts::JOB_QUEUE_CAPACITY);
        assert!(config.workers <= consts::MAX_WORKERS);
    }
}

//! The shared statistics region.
//!
//! Binds a [`GlobalStats`] block (see `prefork_common::stats`) into a
//! named [`SharedRegion`]. The master creates the region before forking;
//! workers reach it through the inherited mapping, and external observers
//! attach read-only through [`StatsRegion::attach`].

use std::mem;

use serde::Serialize;
use tracing::debug;

use prefork_common::stats::{GlobalStats, WorkerStatus};
use prefork_ipc::{IpcError, IpcResult, SharedRegion};

/// Handle to the statistics block inside a shared region.
pub struct StatsRegion {
    region: SharedRegion,
}

impl StatsRegion {
    /// Create the region. The kernel zero-fills it, which is the valid
    /// initial state: all counters zero, every slot Dead.
    pub fn create(name: &str) -> IpcResult<Self> {
        let region = SharedRegion::create(name, GlobalStats::SIZE)?;
        debug!(name, size = GlobalStats::SIZE, "stats region created");
        Ok(Self { region })
    }

    /// Attach to an existing region (observers, tests).
    pub fn attach(name: &str) -> IpcResult<Self> {
        let region = SharedRegion::attach(name)?;
        if region.len() < GlobalStats::SIZE {
            return Err(IpcError::RegionTooSmall {
                name: name.to_string(),
                expected: GlobalStats::SIZE,
                actual: region.len(),
            });
        }
        Ok(Self { region })
    }

    /// Access the statistics block.
    pub fn stats(&self) -> &GlobalStats {
        debug_assert_eq!(
            self.region.as_ptr().align_offset(mem::align_of::<GlobalStats>()),
            0
        );
        // SAFETY: the region is at least GlobalStats::SIZE bytes, page
        // aligned by mmap, and GlobalStats is valid for any byte content
        // (atomics plus a byte buffer).
        unsafe { &*self.region.as_ptr().cast::<GlobalStats>() }
    }

    /// Region name.
    pub fn name(&self) -> &str {
        self.region.name()
    }

    /// Unlink the region (creator, clean shutdown).
    pub fn unlink(&self) -> IpcResult<()> {
        self.region.unlink()
    }

    /// Copy the current values into a serializable snapshot.
    ///
    /// Best-effort: concurrent updates may interleave.
    pub fn snapshot(&self) -> StatsSnapshot {
        let stats = self.stats();
        use std::sync::atomic::Ordering;

        let workers = stats
            .workers()
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.pid() != 0)
            .map(|(index, slot)| WorkerSnapshot {
                slot: index,
                pid: slot.pid(),
                status: status_label(slot.status()),
                handled: slot.handled(),
                failed: slot.failed(),
                last_error: slot.last_error(),
            })
            .collect();

        StatsSnapshot {
            total_requests: stats.total_requests.load(Ordering::Relaxed),
            total_errors: stats.total_errors.load(Ordering::Relaxed),
            active_connections: stats.active_connections.load(Ordering::Relaxed),
            workers,
        }
    }
}

fn status_label(status: WorkerStatus) -> &'static str {
    match status {
        WorkerStatus::Dead => "dead",
        WorkerStatus::Idle => "idle",
        WorkerStatus::Busy => "busy",
    }
}

/// Point-in-time view of one occupied worker slot.
#[derive(Debug, Serialize)]
pub struct WorkerSnapshot {
    /// Slot index in the stats region.
    pub slot: usize,
    /// Process id occupying the slot.
    pub pid: u32,
    /// Slot status label.
    pub status: &'static str,
    /// Requests handled by the current process.
    pub handled: u64,
    /// Requests failed in the current process.
    pub failed: u64,
    /// Last recorded error, if any.
    pub last_error: Option<String>,
}

/// Point-in-time view of the whole statistics block.
#[derive(Debug, Serialize)]
pub struct StatsSnapshot {
    /// Connections handed to the worker queue.
    pub total_requests: u64,
    /// Errors observed in the request path.
    pub total_errors: u64,
    /// Accepted connections not yet closed.
    pub active_connections: i64,
    /// Occupied worker slots.
    pub workers: Vec<WorkerSnapshot>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use prefork_common::stats::WorkerStatus;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn test_name(suffix: &str) -> String {
        static CTR: AtomicU32 = AtomicU32::new(0);
        let id = CTR.fetch_add(1, Ordering::Relaxed);
        format!("/pfk_stats_{}_{id}_{suffix}", std::process::id())
    }

    #[test]
    fn test_create_starts_zeroed() {
        let name = test_name("zero");
        let region = StatsRegion::create(&name).unwrap();
        let stats = region.stats();

        assert_eq!(stats.total_requests.load(Ordering::Relaxed), 0);
        for slot in stats.workers() {
            assert_eq!(slot.status(), WorkerStatus::Dead);
        }

        region.unlink().unwrap();
    }

    #[test]
    fn test_attacher_sees_updates() {
        let name = test_name("share");
        let creator = StatsRegion::create(&name).unwrap();
        let observer = StatsRegion::attach(&name).unwrap();

        creator.stats().worker(3).reset(999);
        creator.stats().worker(3).record_handled();
        creator
            .stats()
            .total_requests
            .fetch_add(5, Ordering::Relaxed);

        let snapshot = observer.snapshot();
        assert_eq!(snapshot.total_requests, 5);
        assert_eq!(snapshot.workers.len(), 1);
        assert_eq!(snapshot.workers[0].slot, 3);
        assert_eq!(snapshot.workers[0].pid, 999);
        assert_eq!(snapshot.workers[0].status, "idle");
        assert_eq!(snapshot.workers[0].handled, 1);

        creator.unlink().unwrap();
    }

    #[test]
    fn test_snapshot_serializes() {
        let name = test_name("json");
        let region = StatsRegion::create(&name).unwrap();
        region.stats().worker(0).reset(1234);

        let text = serde_json::to_string(&region.snapshot()).unwrap();
        assert!(text.contains("\"pid\":1234"));
        assert!(text.contains("\"total_requests\":0"));

        region.unlink().unwrap();
    }
}

//! Statistics records shared between the master, the workers, and
//! external observers.
//!
//! A single [`GlobalStats`] struct is placed at the start of a named
//! shared-memory region. All counters are atomic read-modify-write and all
//! status fields are whole-word stores, so the block stays usable across
//! process crashes. The view is intentionally best-effort: concurrent
//! writers may interleave, no cross-counter invariant holds, and the
//! per-slot error buffer may tear. Readers must treat every value as
//! approximate.
//!
//! The region creator maps a zero-filled object; all-zeroes is the valid
//! initial state (every counter zero, every slot [`WorkerStatus::Dead`]).

use std::cell::UnsafeCell;
use std::mem;
use std::sync::atomic::{AtomicI64, AtomicU32, AtomicU64, Ordering};

use static_assertions::const_assert_eq;

use crate::consts::{LAST_ERROR_LEN, MAX_WORKERS};

/// Lifecycle state of one worker slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum WorkerStatus {
    /// No live process occupies the slot.
    Dead = 0,
    /// Worker is waiting for work.
    Idle = 1,
    /// Worker has at least one request in flight.
    Busy = 2,
}

impl WorkerStatus {
    /// Convert from the raw stored word. Returns `None` for invalid values.
    #[inline]
    pub const fn from_u32(value: u32) -> Option<Self> {
        match value {
            0 => Some(Self::Dead),
            1 => Some(Self::Idle),
            2 => Some(Self::Busy),
            _ => None,
        }
    }
}

/// Per-worker slot inside the statistics region.
///
/// The worker occupying the slot writes status and counters; the master
/// writes only when re-forking the slot or marking it dead at shutdown.
/// No other process writes here.
#[repr(C)]
pub struct WorkerSlot {
    pid: AtomicU32,
    status: AtomicU32,
    handled: AtomicU64,
    failed: AtomicU64,
    last_error: UnsafeCell<[u8; LAST_ERROR_LEN]>,
}

// SAFETY: all fields except `last_error` are atomics. `last_error` is a
// best-effort diagnostic buffer; concurrent access may tear, which the
// block's contract explicitly tolerates.
unsafe impl Sync for WorkerSlot {}

const_assert_eq!(mem::size_of::<WorkerSlot>(), 24 + LAST_ERROR_LEN);

impl WorkerSlot {
    /// Process id of the worker occupying the slot (0 when never forked).
    pub fn pid(&self) -> u32 {
        self.pid.load(Ordering::Acquire)
    }

    /// Current slot status; invalid stored words read as `Dead`.
    pub fn status(&self) -> WorkerStatus {
        WorkerStatus::from_u32(self.status.load(Ordering::Acquire)).unwrap_or(WorkerStatus::Dead)
    }

    /// Whole-word status store.
    pub fn set_status(&self, status: WorkerStatus) {
        self.status.store(status as u32, Ordering::Release);
    }

    /// Requests completed successfully by this slot's current process.
    pub fn handled(&self) -> u64 {
        self.handled.load(Ordering::Relaxed)
    }

    /// Requests that failed in this slot's current process.
    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    /// Count one successfully handled request.
    pub fn record_handled(&self) {
        self.handled.fetch_add(1, Ordering::Relaxed);
    }

    /// Count one failed request and store a bounded excerpt of the error.
    pub fn record_failed(&self, message: &str) {
        self.failed.fetch_add(1, Ordering::Relaxed);
        let excerpt = message.as_bytes();
        let len = excerpt.len().min(LAST_ERROR_LEN - 1);
        // SAFETY: best-effort write; a concurrent reader may observe a torn
        // message, never out-of-bounds memory.
        unsafe {
            let buf = &mut *self.last_error.get();
            buf[..len].copy_from_slice(&excerpt[..len]);
            buf[len] = 0;
        }
    }

    /// Last recorded error message, if any.
    pub fn last_error(&self) -> Option<String> {
        // SAFETY: see `record_failed`; a torn read yields garbage text, not UB.
        let buf = unsafe { &*self.last_error.get() };
        let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
        if end == 0 {
            None
        } else {
            Some(String::from_utf8_lossy(&buf[..end]).into_owned())
        }
    }

    /// Re-initialize the slot for a fresh process.
    ///
    /// Called on both sides of a fork: counter history belongs to the
    /// process that produced it, so a replacement starts from zero.
    pub fn reset(&self, pid: u32) {
        self.handled.store(0, Ordering::Relaxed);
        self.failed.store(0, Ordering::Relaxed);
        // SAFETY: same tearing contract as `record_failed`.
        unsafe {
            (*self.last_error.get())[0] = 0;
        }
        self.pid.store(pid, Ordering::Release);
        self.set_status(WorkerStatus::Idle);
    }
}

/// Global statistics block at the start of the stats region.
#[repr(C)]
pub struct GlobalStats {
    /// Connections successfully handed to the worker queue.
    pub total_requests: AtomicU64,
    /// Errors observed anywhere in the request path.
    pub total_errors: AtomicU64,
    /// Connections accepted and not yet closed by a worker.
    pub active_connections: AtomicI64,
    workers: [WorkerSlot; MAX_WORKERS],
}

const_assert_eq!(
    mem::size_of::<GlobalStats>(),
    24 + MAX_WORKERS * (24 + LAST_ERROR_LEN)
);

impl GlobalStats {
    /// Byte size of the block, used to size the backing region.
    pub const SIZE: usize = mem::size_of::<GlobalStats>();

    /// Access one worker slot.
    ///
    /// # Panics
    /// Panics if `slot >= MAX_WORKERS`.
    pub fn worker(&self, slot: usize) -> &WorkerSlot {
        &self.workers[slot]
    }

    /// All worker slots, including unoccupied ones.
    pub fn workers(&self) -> &[WorkerSlot] {
        &self.workers
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_roundtrip() {
        assert_eq!(WorkerStatus::from_u32(0), Some(WorkerStatus::Dead));
        assert_eq!(WorkerStatus::from_u32(1), Some(WorkerStatus::Idle));
        assert_eq!(WorkerStatus::from_u32(2), Some(WorkerStatus::Busy));
        assert_eq!(WorkerStatus::from_u32(3), None);
    }

    #[test]
    fn test_slot_counters() {
        let slot: WorkerSlot = unsafe { mem::zeroed() };
        assert_eq!(slot.status(), WorkerStatus::Dead);
        assert_eq!(slot.handled(), 0);

        slot.reset(4242);
        assert_eq!(slot.pid(), 4242);
        assert_eq!(slot.status(), WorkerStatus::Idle);

        slot.record_handled();
        slot.record_handled();
        slot.record_failed("boom");
        assert_eq!(slot.handled(), 2);
        assert_eq!(slot.failed(), 1);
        assert_eq!(slot.last_error().as_deref(), Some("boom"));
    }

    #[test]
    fn test_error_excerpt_is_bounded() {
        let slot: WorkerSlot = unsafe { mem::zeroed() };
        let long = "x".repeat(LAST_ERROR_LEN * 2);
        slot.record_failed(&long);
        let stored = slot.last_error().unwrap();
        assert_eq!(stored.len(), LAST_ERROR_LEN - 1);
    }

    #[test]
    fn test_reset_clears_history() {
        let slot: WorkerSlot = unsafe { mem::zeroed() };
        slot.record_failed("old error");
        slot.reset(7);
        assert_eq!(slot.failed(), 0);
        assert_eq!(slot.last_error(), None);
    }

    #[test]
    fn test_zeroed_block_is_valid() {
        let stats: GlobalStats = unsafe { mem::zeroed() };
        assert_eq!(stats.total_requests.load(Ordering::Relaxed), 0);
        for slot in stats.workers() {
            assert_eq!(slot.status(), WorkerStatus::Dead);
            assert_eq!(slot.pid(), 0);
        }
    }
}

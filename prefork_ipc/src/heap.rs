//! Bounded priority heap in shared memory.
//!
//! Same regional and semaphore structure as the FIFO channel, but the
//! element array is a binary max-heap of tagged messages:
//!
//! ```text
//! [ len | capacity | next_seq ][ Envelope<T>; capacity ]
//! ```
//!
//! Every enqueue stamps the message with a monotonically increasing
//! sequence number from the header. Ordering is by priority class first
//! (Urgent > High > Normal > Low), then by smaller sequence, so dequeue
//! order within one class equals enqueue order, while a higher-priority
//! message overtakes anything queued below it.
//!
//! The heap lives at index 0 with children at `2i+1` and `2i+2`. The
//! channel mutex covers whole enqueue/dequeue operations and never calls
//! user code; a process dying inside that critical section leaves the
//! heap unusable and the channel must be recreated.

use std::marker::PhantomData;
use std::mem;
use std::time::Duration;

use static_assertions::const_assert_eq;

use crate::error::{IpcError, IpcResult};
use crate::region::SharedRegion;
use crate::sem::Semaphore;

/// Priority class of a message, highest value wins.
///
/// Encoded directly as ordered integers so comparisons are a single
/// integer compare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u32)]
pub enum Priority {
    /// Background traffic.
    Low = 0,
    /// Default class.
    Normal = 1,
    /// Elevated class.
    High = 2,
    /// Processed before everything else.
    Urgent = 3,
}

impl Priority {
    /// Convert from the raw stored word. Returns `None` for invalid values.
    #[inline]
    pub const fn from_u32(value: u32) -> Option<Self> {
        match value {
            0 => Some(Self::Low),
            1 => Some(Self::Normal),
            2 => Some(Self::High),
            3 => Some(Self::Urgent),
            _ => None,
        }
    }
}

/// Heap bookkeeping at the start of the backing region.
#[repr(C)]
struct HeapHeader {
    len: u32,
    capacity: u32,
    next_seq: u64,
}

const_assert_eq!(mem::size_of::<HeapHeader>(), 16);

/// Stored heap element: sequence stamp, raw priority word, payload.
#[repr(C)]
#[derive(Clone, Copy)]
struct Envelope<T> {
    seq: u64,
    priority: u32,
    payload: T,
}

/// A dequeued message returned to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Message<T> {
    /// The enqueued payload.
    pub payload: T,
    /// Priority class it was enqueued with.
    pub priority: Priority,
    /// Sequence number assigned at enqueue.
    pub seq: u64,
}

/// A bounded multi-process priority heap of `Copy` payloads.
pub struct PriorityHeap<T: Copy> {
    region: SharedRegion,
    mutex: Semaphore,
    items: Semaphore,
    _marker: PhantomData<T>,
}

// SAFETY: as for the FIFO channel: every heap access is serialized by
// the channel mutex.
unsafe impl<T: Copy + Send> Send for PriorityHeap<T> {}
unsafe impl<T: Copy + Send> Sync for PriorityHeap<T> {}

/// `a` outranks `b`: strictly higher class, or same class and older stamp.
fn outranks<T>(a: &Envelope<T>, b: &Envelope<T>) -> bool {
    a.priority > b.priority || (a.priority == b.priority && a.seq < b.seq)
}

impl<T: Copy> PriorityHeap<T> {
    fn region_size(capacity: u32) -> usize {
        mem::size_of::<HeapHeader>() + capacity as usize * mem::size_of::<Envelope<T>>()
    }

    /// Create the heap and its semaphores.
    pub fn create(name: &str, capacity: u32) -> IpcResult<Self> {
        if capacity == 0 {
            return Err(IpcError::InvalidCapacity { capacity });
        }

        let region = SharedRegion::create(name, Self::region_size(capacity))?;
        // SAFETY: fresh, exclusively owned, header-sized region.
        unsafe {
            (*region.as_ptr().cast::<HeapHeader>()).capacity = capacity;
        }

        let mutex = Semaphore::open(&format!("{name}_mutex"), 1)?;
        let items = Semaphore::open(&format!("{name}_items"), 0)?;

        Ok(Self {
            region,
            mutex,
            items,
            _marker: PhantomData,
        })
    }

    /// Attach to an existing heap.
    pub fn attach(name: &str) -> IpcResult<Self> {
        let region = SharedRegion::attach(name)?;
        if region.len() < mem::size_of::<HeapHeader>() {
            return Err(IpcError::RegionTooSmall {
                name: name.to_string(),
                expected: mem::size_of::<HeapHeader>(),
                actual: region.len(),
            });
        }

        // SAFETY: checked above that the header fits.
        let capacity = unsafe { (*region.as_ptr().cast::<HeapHeader>()).capacity };
        if capacity == 0 || region.len() < Self::region_size(capacity) {
            return Err(IpcError::Corrupted {
                name: name.to_string(),
            });
        }

        let mutex = Semaphore::open(&format!("{name}_mutex"), 1)?;
        let items = Semaphore::open(&format!("{name}_items"), 0)?;

        Ok(Self {
            region,
            mutex,
            items,
            _marker: PhantomData,
        })
    }

    fn header(&self) -> *mut HeapHeader {
        self.region.as_ptr().cast()
    }

    fn slot(&self, index: u32) -> *mut Envelope<T> {
        // SAFETY: callers only pass indices < capacity.
        unsafe {
            self.region
                .as_ptr()
                .add(mem::size_of::<HeapHeader>())
                .cast::<Envelope<T>>()
                .add(index as usize)
        }
    }

    /// Add a message with the given priority.
    ///
    /// Fails with [`IpcError::QueueFull`] at capacity without posting the
    /// items semaphore.
    pub fn enqueue(&self, payload: T, priority: Priority) -> IpcResult<()> {
        self.mutex.wait_uninterruptible()?;

        // SAFETY: header and slots are valid and the mutex is held.
        let full = unsafe {
            let hdr = self.header();
            if (*hdr).len >= (*hdr).capacity {
                true
            } else {
                let seq = (*hdr).next_seq;
                (*hdr).next_seq += 1;
                let index = (*hdr).len;
                self.slot(index).write(Envelope {
                    seq,
                    priority: priority as u32,
                    payload,
                });
                self.sift_up(index);
                (*hdr).len = index + 1;
                false
            }
        };

        self.mutex.post()?;

        if full {
            return Err(IpcError::QueueFull {
                name: self.region.name().to_string(),
            });
        }
        self.items.post()
    }

    /// Remove and return the highest-ranked message, blocking while empty.
    pub fn dequeue(&self) -> IpcResult<Message<T>> {
        self.items.wait()?;
        self.take_root()
    }

    /// Remove the highest-ranked message, waiting at most `timeout`.
    pub fn try_dequeue(&self, timeout: Duration) -> IpcResult<Message<T>> {
        if !self.items.timed_wait(timeout)? {
            return Err(IpcError::QueueEmpty {
                name: self.region.name().to_string(),
            });
        }
        self.take_root()
    }

    fn take_root(&self) -> IpcResult<Message<T>> {
        self.mutex.wait_uninterruptible()?;

        // SAFETY: as in `enqueue`.
        let taken = unsafe {
            let hdr = self.header();
            if (*hdr).len == 0 {
                None
            } else {
                let root = self.slot(0).read();
                let last = (*hdr).len - 1;
                (*hdr).len = last;
                if last > 0 {
                    self.slot(0).write(self.slot(last).read());
                    self.sift_down(0);
                }
                Some(root)
            }
        };

        self.mutex.post()?;

        let envelope = taken.ok_or_else(|| IpcError::Corrupted {
            name: self.region.name().to_string(),
        })?;
        let priority =
            Priority::from_u32(envelope.priority).ok_or_else(|| IpcError::Corrupted {
                name: self.region.name().to_string(),
            })?;
        Ok(Message {
            payload: envelope.payload,
            priority,
            seq: envelope.seq,
        })
    }

    /// Restore the heap property upward from `index`.
    ///
    /// # Safety
    /// Caller holds the mutex and `index` is within the live heap.
    unsafe fn sift_up(&self, mut index: u32) {
        while index > 0 {
            let parent = (index - 1) / 2;
            // SAFETY: both indices are within the live heap.
            unsafe {
                if outranks(&*self.slot(index), &*self.slot(parent)) {
                    let tmp = self.slot(parent).read();
                    self.slot(parent).write(self.slot(index).read());
                    self.slot(index).write(tmp);
                    index = parent;
                } else {
                    break;
                }
            }
        }
    }

    /// Restore the heap property downward from `index`.
    ///
    /// # Safety
    /// Caller holds the mutex and the header length is already updated.
    unsafe fn sift_down(&self, mut index: u32) {
        // SAFETY: len is read under the mutex; all slot accesses below
        // are bounds-checked against it.
        let len = unsafe { (*self.header()).len };
        loop {
            let left = 2 * index + 1;
            let right = 2 * index + 2;
            let mut best = index;

            // SAFETY: indices checked against len before dereference.
            unsafe {
                if left < len && outranks(&*self.slot(left), &*self.slot(best)) {
                    best = left;
                }
                if right < len && outranks(&*self.slot(right), &*self.slot(best)) {
                    best = right;
                }
                if best == index {
                    break;
                }
                let tmp = self.slot(index).read();
                self.slot(index).write(self.slot(best).read());
                self.slot(best).write(tmp);
            }
            index = best;
        }
    }

    /// Current message count (racy snapshot).
    pub fn len(&self) -> u32 {
        // SAFETY: plain u32 load; staleness is acceptable.
        unsafe { (*self.header()).len }
    }

    /// Whether the heap is currently empty (racy snapshot).
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the heap is currently full (racy snapshot).
    pub fn is_full(&self) -> bool {
        // SAFETY: as in `len`.
        unsafe {
            let hdr = self.header();
            (*hdr).len >= (*hdr).capacity
        }
    }

    /// Fixed capacity.
    pub fn capacity(&self) -> u32 {
        // SAFETY: written once at creation.
        unsafe { (*self.header()).capacity }
    }

    /// Channel name.
    pub fn name(&self) -> &str {
        self.region.name()
    }

    /// Unlink the region and both semaphores (creator, clean shutdown).
    pub fn unlink(&self) -> IpcResult<()> {
        self.region.unlink()?;
        self.mutex.unlink()?;
        self.items.unlink()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn test_name(suffix: &str) -> String {
        static CTR: AtomicU32 = AtomicU32::new(0);
        let id = CTR.fetch_add(1, Ordering::Relaxed);
        format!("/pfk_heap_{}_{id}_{suffix}", std::process::id())
    }

    #[test]
    fn test_priority_classes_are_ordered() {
        assert!(Priority::Urgent > Priority::High);
        assert!(Priority::High > Priority::Normal);
        assert!(Priority::Normal > Priority::Low);
        assert_eq!(Priority::from_u32(4), None);
    }

    #[test]
    fn test_higher_priority_overtakes() {
        let name = test_name("overtake");
        let heap = PriorityHeap::<[u8; 4]>::create(&name, 16).unwrap();

        heap.enqueue(*b"aaaa", Priority::Low).unwrap();
        heap.enqueue(*b"bbbb", Priority::Normal).unwrap();
        heap.enqueue(*b"cccc", Priority::Urgent).unwrap();
        heap.enqueue(*b"dddd", Priority::High).unwrap();

        let order: Vec<[u8; 4]> = (0..4).map(|_| heap.dequeue().unwrap().payload).collect();
        assert_eq!(order, vec![*b"cccc", *b"dddd", *b"bbbb", *b"aaaa"]);

        heap.unlink().unwrap();
    }

    #[test]
    fn test_fifo_within_one_class() {
        let name = test_name("stable");
        let heap = PriorityHeap::<u32>::create(&name, 16).unwrap();

        for v in [1, 2, 3] {
            heap.enqueue(v, Priority::Normal).unwrap();
        }
        for expected in [1, 2, 3] {
            let msg = heap.dequeue().unwrap();
            assert_eq!(msg.payload, expected);
            assert_eq!(msg.priority, Priority::Normal);
        }

        heap.unlink().unwrap();
    }

    #[test]
    fn test_sequence_is_monotonic() {
        let name = test_name("seq");
        let heap = PriorityHeap::<u32>::create(&name, 8).unwrap();

        heap.enqueue(10, Priority::Low).unwrap();
        heap.enqueue(11, Priority::Low).unwrap();
        let first = heap.dequeue().unwrap();
        let second = heap.dequeue().unwrap();
        assert!(first.seq < second.seq);

        // The counter keeps rising after the heap drains.
        heap.enqueue(12, Priority::Low).unwrap();
        assert!(heap.dequeue().unwrap().seq > second.seq);

        heap.unlink().unwrap();
    }

    #[test]
    fn test_full_heap_rejects_without_signal() {
        let name = test_name("full");
        let heap = PriorityHeap::<u8>::create(&name, 2).unwrap();

        heap.enqueue(1, Priority::Normal).unwrap();
        heap.enqueue(2, Priority::Urgent).unwrap();
        assert!(matches!(
            heap.enqueue(3, Priority::Urgent),
            Err(IpcError::QueueFull { .. })
        ));

        assert_eq!(heap.dequeue().unwrap().payload, 2);
        assert_eq!(heap.dequeue().unwrap().payload, 1);
        assert!(matches!(
            heap.try_dequeue(Duration::from_millis(20)),
            Err(IpcError::QueueEmpty { .. })
        ));

        heap.unlink().unwrap();
    }

    #[test]
    fn test_interleaved_classes_stay_stable() {
        let name = test_name("mixed");
        let heap = PriorityHeap::<u32>::create(&name, 32).unwrap();

        heap.enqueue(100, Priority::Normal).unwrap();
        heap.enqueue(200, Priority::High).unwrap();
        heap.enqueue(101, Priority::Normal).unwrap();
        heap.enqueue(201, Priority::High).unwrap();
        heap.enqueue(300, Priority::Low).unwrap();
        heap.enqueue(102, Priority::Normal).unwrap();

        let order: Vec<u32> = (0..6).map(|_| heap.dequeue().unwrap().payload).collect();
        assert_eq!(order, vec![200, 201, 100, 101, 102, 300]);

        heap.unlink().unwrap();
    }

    #[test]
    fn test_try_dequeue_empty_times_out() {
        let name = test_name("timeout");
        let heap = PriorityHeap::<u8>::create(&name, 4).unwrap();
        assert!(matches!(
            heap.try_dequeue(Duration::from_millis(30)),
            Err(IpcError::QueueEmpty { .. })
        ));
        heap.unlink().unwrap();
    }
}

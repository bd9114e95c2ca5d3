//! Bounded FIFO channel in shared memory.
//!
//! Fixed capacity, fixed element size, strict FIFO. The backing region
//! holds a [`FifoHeader`] followed by the element array:
//!
//! ```text
//! [ head | tail | len | capacity ][ T; capacity ]
//! ```
//!
//! `head` and `tail` are indices modulo `capacity`; `len` is the current
//! element count. The `<name>_mutex` semaphore (initial value 1) guards
//! every header and element update; the `<name>_items` semaphore counts
//! available elements and is posted exactly once per successful enqueue,
//! after the mutex is released.
//!
//! Enqueue never blocks: a full channel fails with
//! [`IpcError::QueueFull`] and the caller decides what to do with the
//! element (the master closes the descriptor and counts an error).
//! Dequeue blocks on items, or bounds the wait via
//! [`FifoChannel::try_dequeue`].

use std::marker::PhantomData;
use std::mem;
use std::time::Duration;

use static_assertions::const_assert_eq;

use crate::error::{IpcError, IpcResult};
use crate::region::SharedRegion;
use crate::sem::Semaphore;

/// Channel bookkeeping at the start of the backing region.
///
/// Mutated only under the channel mutex.
#[repr(C)]
struct FifoHeader {
    head: u32,
    tail: u32,
    len: u32,
    capacity: u32,
}

const_assert_eq!(mem::size_of::<FifoHeader>(), 16);

/// Derive the mutex semaphore name for a channel.
fn mutex_name(name: &str) -> String {
    format!("{name}_mutex")
}

/// Derive the items semaphore name for a channel.
fn items_name(name: &str) -> String {
    format!("{name}_items")
}

/// A bounded multi-process FIFO of `Copy` elements.
///
/// `T` must be `#[repr(C)]`-compatible plain data: it is copied byte-wise
/// through shared memory and read back by other processes running the
/// same binary layout.
pub struct FifoChannel<T: Copy> {
    region: SharedRegion,
    mutex: Semaphore,
    items: Semaphore,
    _marker: PhantomData<T>,
}

// SAFETY: all header/element access goes through the channel mutex; the
// semaphore wait/post pairs order the memory accesses between processes
// and threads.
unsafe impl<T: Copy + Send> Send for FifoChannel<T> {}
unsafe impl<T: Copy + Send> Sync for FifoChannel<T> {}

impl<T: Copy> FifoChannel<T> {
    /// Byte size of a channel region for `capacity` elements.
    fn region_size(capacity: u32) -> usize {
        mem::size_of::<FifoHeader>() + capacity as usize * mem::size_of::<T>()
    }

    /// Create the channel and its semaphores.
    pub fn create(name: &str, capacity: u32) -> IpcResult<Self> {
        if capacity == 0 {
            return Err(IpcError::InvalidCapacity { capacity });
        }

        let region = SharedRegion::create(name, Self::region_size(capacity))?;
        // The region arrives zero-filled; only capacity needs a store.
        // SAFETY: the region is at least header-sized and freshly created,
        // so no other process can be touching it yet.
        unsafe {
            (*region.as_ptr().cast::<FifoHeader>()).capacity = capacity;
        }

        let mutex = Semaphore::open(&mutex_name(name), 1)?;
        let items = Semaphore::open(&items_name(name), 0)?;

        Ok(Self {
            region,
            mutex,
            items,
            _marker: PhantomData,
        })
    }

    /// Attach to an existing channel.
    pub fn attach(name: &str) -> IpcResult<Self> {
        let region = SharedRegion::attach(name)?;
        if region.len() < mem::size_of::<FifoHeader>() {
            return Err(IpcError::RegionTooSmall {
                name: name.to_string(),
                expected: mem::size_of::<FifoHeader>(),
                actual: region.len(),
            });
        }

        // SAFETY: checked above that the header fits.
        let capacity = unsafe { (*region.as_ptr().cast::<FifoHeader>()).capacity };
        let expected = Self::region_size(capacity);
        if capacity == 0 || region.len() < expected {
            return Err(IpcError::Corrupted {
                name: name.to_string(),
            });
        }

        let mutex = Semaphore::open(&mutex_name(name), 1)?;
        let items = Semaphore::open(&items_name(name), 0)?;

        Ok(Self {
            region,
            mutex,
            items,
            _marker: PhantomData,
        })
    }

    fn header(&self) -> *mut FifoHeader {
        self.region.as_ptr().cast()
    }

    fn slot(&self, index: u32) -> *mut T {
        // SAFETY: callers only pass indices < capacity, which the region
        // was sized for at creation.
        unsafe {
            self.region
                .as_ptr()
                .add(mem::size_of::<FifoHeader>())
                .cast::<T>()
                .add(index as usize)
        }
    }

    /// Add an element at the tail.
    ///
    /// Fails with [`IpcError::QueueFull`] at capacity; the items semaphore
    /// is not posted in that case.
    pub fn enqueue(&self, value: T) -> IpcResult<()> {
        self.mutex.wait_uninterruptible()?;

        // SAFETY: header and slots are valid for the region's lifetime and
        // we hold the channel mutex.
        let full = unsafe {
            let hdr = self.header();
            if (*hdr).len >= (*hdr).capacity {
                true
            } else {
                let tail = (*hdr).tail;
                self.slot(tail).write(value);
                (*hdr).tail = (tail + 1) % (*hdr).capacity;
                (*hdr).len += 1;
                false
            }
        };

        self.mutex.post()?;

        if full {
            return Err(IpcError::QueueFull {
                name: self.region.name().to_string(),
            });
        }
        // Signal outside the critical section, exactly once per element.
        self.items.post()
    }

    /// Remove and return the head element, blocking while empty.
    ///
    /// Returns [`IpcError::Interrupted`] if a signal lands during the
    /// wait, so consumers can observe shutdown flags.
    pub fn dequeue(&self) -> IpcResult<T> {
        self.items.wait()?;
        self.take_head()
    }

    /// Remove and return the head element, waiting at most `timeout`.
    pub fn try_dequeue(&self, timeout: Duration) -> IpcResult<T> {
        if !self.items.timed_wait(timeout)? {
            return Err(IpcError::QueueEmpty {
                name: self.region.name().to_string(),
            });
        }
        self.take_head()
    }

    fn take_head(&self) -> IpcResult<T> {
        self.mutex.wait_uninterruptible()?;

        // SAFETY: as in `enqueue`.
        let taken = unsafe {
            let hdr = self.header();
            if (*hdr).len == 0 {
                None
            } else {
                let head = (*hdr).head;
                let value = self.slot(head).read();
                (*hdr).head = (head + 1) % (*hdr).capacity;
                (*hdr).len -= 1;
                Some(value)
            }
        };

        self.mutex.post()?;

        // The items count guarantees an element; an empty channel here
        // means the header was clobbered externally.
        taken.ok_or_else(|| IpcError::Corrupted {
            name: self.region.name().to_string(),
        })
    }

    /// Current element count (racy snapshot).
    pub fn len(&self) -> u32 {
        // SAFETY: a plain u32 load; staleness is acceptable for snapshots.
        unsafe { (*self.header()).len }
    }

    /// Whether the channel is currently empty (racy snapshot).
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the channel is currently full (racy snapshot).
    pub fn is_full(&self) -> bool {
        // SAFETY: as in `len`.
        unsafe {
            let hdr = self.header();
            (*hdr).len >= (*hdr).capacity
        }
    }

    /// Fixed capacity.
    pub fn capacity(&self) -> u32 {
        // SAFETY: capacity is written once at creation.
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
    use std::sync::Arc;

    fn test_name(suffix: &str) -> String {
        static CTR: AtomicU32 = AtomicU32::new(0);
        let id = CTR.fetch_add(1, Ordering::Relaxed);
        format!("/pfk_fifo_{}_{id}_{suffix}", std::process::id())
    }

    #[test]
    fn test_fifo_order() {
        let name = test_name("order");
        let chan = FifoChannel::<i32>::create(&name, 8).unwrap();

        for v in [3, 1, 4, 1, 5] {
            chan.enqueue(v).unwrap();
        }
        let drained: Vec<i32> = (0..5).map(|_| chan.dequeue().unwrap()).collect();
        assert_eq!(drained, vec![3, 1, 4, 1, 5]);

        chan.unlink().unwrap();
    }

    #[test]
    fn test_wraps_around_capacity() {
        let name = test_name("wrap");
        let chan = FifoChannel::<u64>::create(&name, 4).unwrap();

        // Cycle well past the capacity so head/tail wrap several times.
        for round in 0u64..5 {
            for i in 0..4 {
                chan.enqueue(round * 10 + i).unwrap();
            }
            for i in 0..4 {
                assert_eq!(chan.dequeue().unwrap(), round * 10 + i);
            }
        }
        assert!(chan.is_empty());

        chan.unlink().unwrap();
    }

    #[test]
    fn test_full_channel_rejects() {
        let name = test_name("full");
        let chan = FifoChannel::<i32>::create(&name, 2).unwrap();

        chan.enqueue(1).unwrap();
        chan.enqueue(2).unwrap();
        assert!(chan.is_full());
        assert!(matches!(chan.enqueue(3), Err(IpcError::QueueFull { .. })));

        // The refused element must not have posted items.
        assert_eq!(chan.dequeue().unwrap(), 1);
        assert_eq!(chan.dequeue().unwrap(), 2);
        assert!(matches!(
            chan.try_dequeue(Duration::from_millis(20)),
            Err(IpcError::QueueEmpty { .. })
        ));

        chan.unlink().unwrap();
    }

    #[test]
    fn test_try_dequeue_times_out() {
        let name = test_name("timeout");
        let chan = FifoChannel::<i32>::create(&name, 4).unwrap();
        let start = std::time::Instant::now();
        assert!(matches!(
            chan.try_dequeue(Duration::from_millis(50)),
            Err(IpcError::QueueEmpty { .. })
        ));
        assert!(start.elapsed() >= Duration::from_millis(40));
        chan.unlink().unwrap();
    }

    #[test]
    fn test_attach_sees_elements() {
        let name = test_name("attach");
        let creator = FifoChannel::<i32>::create(&name, 8).unwrap();
        creator.enqueue(7).unwrap();

        let attacher = FifoChannel::<i32>::attach(&name).unwrap();
        assert_eq!(attacher.capacity(), 8);
        assert_eq!(attacher.dequeue().unwrap(), 7);

        creator.unlink().unwrap();
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let name = test_name("zerocap");
        assert!(matches!(
            FifoChannel::<i32>::create(&name, 0),
            Err(IpcError::InvalidCapacity { .. })
        ));
    }

    #[test]
    fn test_blocked_consumer_wakes_on_enqueue() {
        let name = test_name("wake");
        let chan = Arc::new(FifoChannel::<i32>::create(&name, 4).unwrap());

        let consumer = {
            let chan = chan.clone();
            std::thread::spawn(move || chan.dequeue())
        };
        std::thread::sleep(Duration::from_millis(20));
        chan.enqueue(99).unwrap();
        assert_eq!(consumer.join().unwrap().unwrap(), 99);

        chan.unlink().unwrap();
    }
}

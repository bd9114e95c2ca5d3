//! Named POSIX shared-memory regions.
//!
//! A [`SharedRegion`] is a fixed-size byte range backed by a POSIX shm
//! object under `/dev/shm/`. The creator fixes the size with `ftruncate`
//! exactly once; attachers take the size from `fstat`, so both sides
//! always observe the same length. The kernel zero-fills fresh objects,
//! which every structure placed in a region relies on for its initial
//! state.

use std::num::NonZeroUsize;
use std::os::unix::io::OwnedFd;
use std::ptr::NonNull;

use nix::errno::Errno;
use nix::fcntl::OFlag;
use nix::sys::mman::{self, MapFlags, ProtFlags};
use nix::sys::stat::Mode;
use nix::unistd;
use tracing::debug;

use crate::error::{IpcError, IpcResult};

/// Attach mode of a region handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachMode {
    /// This handle created the object and fixed its size.
    Creator,
    /// This handle attached to an existing object.
    Attacher,
}

/// A named shared-memory region mapped read-write into this process.
pub struct SharedRegion {
    /// Kept open for the lifetime of the mapping.
    _fd: OwnedFd,
    ptr: NonNull<libc::c_void>,
    len: usize,
    name: String,
    mode: AttachMode,
}

// SAFETY: the mapping itself is just memory shared between processes;
// synchronization of its contents is the responsibility of the structures
// placed inside it (semaphore-guarded headers, atomics).
unsafe impl Send for SharedRegion {}
unsafe impl Sync for SharedRegion {}

impl SharedRegion {
    /// Create a new region of exactly `len` bytes.
    ///
    /// Fails with [`IpcError::AlreadyExists`] if the name is taken; a
    /// leftover object from an unclean shutdown must be unlinked first.
    pub fn create(name: &str, len: usize) -> IpcResult<Self> {
        let byte_len = NonZeroUsize::new(len).ok_or(IpcError::InvalidCapacity { capacity: 0 })?;

        let fd = mman::shm_open(
            name,
            OFlag::O_CREAT | OFlag::O_EXCL | OFlag::O_RDWR,
            Mode::S_IRUSR | Mode::S_IWUSR,
        )
        .map_err(|e| match e {
            Errno::EEXIST => IpcError::AlreadyExists {
                name: name.to_string(),
            },
            e => IpcError::os(name, e),
        })?;

        if let Err(e) = unistd::ftruncate(&fd, len as libc::off_t) {
            let _ = mman::shm_unlink(name);
            return Err(IpcError::os(name, e));
        }

        let mapped = unsafe {
            mman::mmap(
                None,
                byte_len,
                ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
                MapFlags::MAP_SHARED,
                &fd,
                0,
            )
        };
        let ptr = match mapped {
            Ok(ptr) => ptr,
            Err(e) => {
                // Don't leave a half-created object behind.
                let _ = mman::shm_unlink(name);
                return Err(IpcError::os(name, e));
            }
        };

        debug!(name, len, "shared region created");

        Ok(Self {
            _fd: fd,
            ptr,
            len,
            name: name.to_string(),
            mode: AttachMode::Creator,
        })
    }

    /// Attach to an existing region read-write.
    pub fn attach(name: &str) -> IpcResult<Self> {
        let fd = mman::shm_open(name, OFlag::O_RDWR, Mode::empty()).map_err(|e| match e {
            Errno::ENOENT => IpcError::NotFound {
                name: name.to_string(),
            },
            e => IpcError::os(name, e),
        })?;

        let stat = nix::sys::stat::fstat(std::os::fd::AsRawFd::as_raw_fd(&fd))
            .map_err(|e| IpcError::os(name, e))?;
        let len = stat.st_size as usize;
        let byte_len = NonZeroUsize::new(len).ok_or_else(|| IpcError::RegionTooSmall {
            name: name.to_string(),
            expected: 1,
            actual: 0,
        })?;

        let ptr = unsafe {
            mman::mmap(
                None,
                byte_len,
                ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
                MapFlags::MAP_SHARED,
                &fd,
                0,
            )
            .map_err(|e| IpcError::os(name, e))?
        };

        debug!(name, len, "shared region attached");

        Ok(Self {
            _fd: fd,
            ptr,
            len,
            name: name.to_string(),
            mode: AttachMode::Attacher,
        })
    }

    /// Region name (a `/`-prefixed shm object name).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Mapped length in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// True for a zero-length mapping (never constructed here).
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Whether this handle created the object.
    pub fn mode(&self) -> AttachMode {
        self.mode
    }

    /// Base address of the mapping.
    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr().cast()
    }

    /// Remove the name from the system.
    ///
    /// Called by the creator on clean shutdown. Existing mappings stay
    /// valid until each process unmaps.
    pub fn unlink(&self) -> IpcResult<()> {
        mman::shm_unlink(self.name.as_str()).map_err(|e| IpcError::os(&self.name, e))
    }
}

impl Drop for SharedRegion {
    fn drop(&mut self) {
        // Unmap only; the name outlives the handle until unlink().
        unsafe {
            let _ = mman::munmap(self.ptr, self.len);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn test_name(suffix: &str) -> String {
        static CTR: AtomicU32 = AtomicU32::new(0);
        let id = CTR.fetch_add(1, Ordering::Relaxed);
        format!("/pfk_region_{}_{id}_{suffix}", std::process::id())
    }

    #[test]
    fn test_create_attach_share_bytes() {
        let name = test_name("share");
        let creator = SharedRegion::create(&name, 4096).unwrap();
        let attacher = SharedRegion::attach(&name).unwrap();

        assert_eq!(creator.len(), attacher.len());
        assert_eq!(attacher.mode(), AttachMode::Attacher);

        unsafe {
            creator.as_ptr().write(0xAB);
            assert_eq!(attacher.as_ptr().read(), 0xAB);
        }

        creator.unlink().unwrap();
    }

    #[test]
    fn test_create_twice_fails() {
        let name = test_name("dup");
        let first = SharedRegion::create(&name, 4096).unwrap();
        let second = SharedRegion::create(&name, 4096);
        assert!(matches!(second, Err(IpcError::AlreadyExists { .. })));
        first.unlink().unwrap();
    }

    #[test]
    fn test_attach_missing_fails() {
        let result = SharedRegion::attach("/pfk_region_does_not_exist");
        assert!(matches!(result, Err(IpcError::NotFound { .. })));
    }

    #[test]
    fn test_fresh_region_is_zeroed() {
        let name = test_name("zero");
        let region = SharedRegion::create(&name, 4096).unwrap();
        let bytes = unsafe { std::slice::from_raw_parts(region.as_ptr(), region.len()) };
        assert!(bytes.iter().all(|&b| b == 0));
        region.unlink().unwrap();
    }
}

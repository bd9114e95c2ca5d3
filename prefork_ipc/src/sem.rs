//! Named POSIX counting semaphores.
//!
//! nix has no wrapper for `sem_open` and friends, so this module calls
//! libc directly. Every participant opens with `O_CREAT`: the first opener
//! fixes the initial value, later openers get the existing semaphore
//! regardless of the value they pass (POSIX semantics). Handles close on
//! drop; the name is removed only by an explicit [`Semaphore::unlink`]
//! from the creating process.

use std::ffi::CString;
use std::time::Duration;

use nix::errno::Errno;

use crate::error::{IpcError, IpcResult};

/// A named counting semaphore shared between processes.
pub struct Semaphore {
    sem: *mut libc::sem_t,
    name: String,
}

// SAFETY: POSIX semaphore operations are thread-safe and async-signal-safe;
// the raw pointer is only handed to sem_* calls.
unsafe impl Send for Semaphore {}
unsafe impl Sync for Semaphore {}

impl Semaphore {
    /// Open (creating if necessary) the named semaphore.
    pub fn open(name: &str, initial: u32) -> IpcResult<Self> {
        let c_name =
            CString::new(name).map_err(|_| IpcError::os(name, Errno::EINVAL))?;
        // SAFETY: c_name outlives the call; mode/value follow the variadic
        // O_CREAT form of sem_open.
        let sem = unsafe {
            libc::sem_open(
                c_name.as_ptr(),
                libc::O_CREAT,
                0o600 as libc::mode_t,
                initial as libc::c_uint,
            )
        };
        if sem == libc::SEM_FAILED {
            return Err(IpcError::os(name, Errno::last()));
        }
        Ok(Self {
            sem,
            name: name.to_string(),
        })
    }

    /// Decrement, blocking until the value is positive.
    ///
    /// Returns [`IpcError::Interrupted`] on EINTR so callers can observe
    /// signal-driven shutdown flags.
    pub fn wait(&self) -> IpcResult<()> {
        // SAFETY: sem is a valid open semaphore for the handle's lifetime.
        if unsafe { libc::sem_wait(self.sem) } == 0 {
            return Ok(());
        }
        match Errno::last() {
            Errno::EINTR => Err(IpcError::Interrupted {
                name: self.name.clone(),
            }),
            e => Err(IpcError::os(&self.name, e)),
        }
    }

    /// Decrement, retrying EINTR.
    ///
    /// For mutex-style use where the hold time is a short critical section
    /// and losing the acquisition to a signal would strand channel state.
    pub fn wait_uninterruptible(&self) -> IpcResult<()> {
        loop {
            match self.wait() {
                Err(IpcError::Interrupted { .. }) => continue,
                other => return other,
            }
        }
    }

    /// Increment, waking one waiter.
    pub fn post(&self) -> IpcResult<()> {
        // SAFETY: as in `wait`.
        if unsafe { libc::sem_post(self.sem) } == 0 {
            Ok(())
        } else {
            Err(IpcError::os(&self.name, Errno::last()))
        }
    }

    /// Non-blocking decrement. Returns `false` if the value was zero.
    pub fn try_wait(&self) -> IpcResult<bool> {
        // SAFETY: as in `wait`.
        if unsafe { libc::sem_trywait(self.sem) } == 0 {
            return Ok(true);
        }
        match Errno::last() {
            Errno::EAGAIN => Ok(false),
            e => Err(IpcError::os(&self.name, e)),
        }
    }

    /// Decrement, waiting at most `timeout`. Returns `false` on timeout.
    pub fn timed_wait(&self, timeout: Duration) -> IpcResult<bool> {
        let mut now = libc::timespec {
            tv_sec: 0,
            tv_nsec: 0,
        };
        // SAFETY: now is a valid timespec out-parameter.
        if unsafe { libc::clock_gettime(libc::CLOCK_REALTIME, &mut now) } != 0 {
            return Err(IpcError::os(&self.name, Errno::last()));
        }

        let mut deadline = libc::timespec {
            tv_sec: now.tv_sec + timeout.as_secs() as libc::time_t,
            tv_nsec: now.tv_nsec + timeout.subsec_nanos() as libc::c_long,
        };
        if deadline.tv_nsec >= 1_000_000_000 {
            deadline.tv_sec += 1;
            deadline.tv_nsec -= 1_000_000_000;
        }

        // SAFETY: sem and deadline are valid for the call.
        if unsafe { libc::sem_timedwait(self.sem, &deadline) } == 0 {
            return Ok(true);
        }
        match Errno::last() {
            Errno::ETIMEDOUT => Ok(false),
            Errno::EINTR => Err(IpcError::Interrupted {
                name: self.name.clone(),
            }),
            e => Err(IpcError::os(&self.name, e)),
        }
    }

    /// Current value (racy snapshot).
    pub fn value(&self) -> IpcResult<i32> {
        let mut value: libc::c_int = 0;
        // SAFETY: value is a valid out-parameter.
        if unsafe { libc::sem_getvalue(self.sem, &mut value) } == 0 {
            Ok(value)
        } else {
            Err(IpcError::os(&self.name, Errno::last()))
        }
    }

    /// Semaphore name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Remove the name from the system (creator, on clean shutdown).
    pub fn unlink(&self) -> IpcResult<()> {
        let c_name =
            CString::new(self.name.as_str()).map_err(|_| IpcError::os(&self.name, Errno::EINVAL))?;
        // SAFETY: c_name is a valid NUL-terminated string.
        if unsafe { libc::sem_unlink(c_name.as_ptr()) } == 0 {
            Ok(())
        } else {
            Err(IpcError::os(&self.name, Errno::last()))
        }
    }
}

impl Drop for Semaphore {
    fn drop(&mut self) {
        // SAFETY: closes this process's handle; the name persists.
        unsafe {
            let _ = libc::sem_close(self.sem);
        }
    }
}

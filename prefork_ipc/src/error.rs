//! Error types for the shared-memory IPC primitives.

use nix::errno::Errno;
use thiserror::Error;

/// Errors that can occur on regions, semaphores, and channels.
#[derive(Debug, Error)]
pub enum IpcError {
    /// Channel is at capacity; the element was not enqueued.
    #[error("channel '{name}' is full")]
    QueueFull {
        /// Channel name.
        name: String,
    },

    /// Channel had no element within the allowed wait.
    #[error("channel '{name}' is empty")]
    QueueEmpty {
        /// Channel name.
        name: String,
    },

    /// A blocking wait was interrupted by a signal.
    ///
    /// Surfaced instead of retried so callers can observe shutdown flags
    /// set from signal handlers.
    #[error("wait on '{name}' interrupted by signal")]
    Interrupted {
        /// Object name.
        name: String,
    },

    /// Creation failed because the named object already exists.
    #[error("shared object already exists: '{name}'")]
    AlreadyExists {
        /// Object name.
        name: String,
    },

    /// Attach failed because the named object does not exist.
    #[error("shared object not found: '{name}'")]
    NotFound {
        /// Object name.
        name: String,
    },

    /// Channel capacity outside the supported range.
    #[error("invalid channel capacity: {capacity}")]
    InvalidCapacity {
        /// Requested capacity.
        capacity: u32,
    },

    /// Attached region is smaller than the layout requires.
    #[error("region '{name}' too small: need {expected} bytes, got {actual}")]
    RegionTooSmall {
        /// Region name.
        name: String,
        /// Minimum byte size the layout needs.
        expected: usize,
        /// Actual region size.
        actual: usize,
    },

    /// Stored channel state failed validation (e.g. an unknown priority
    /// tag). The channel must be recreated.
    #[error("channel '{name}' is corrupted")]
    Corrupted {
        /// Channel name.
        name: String,
    },

    /// OS-level error from a system call.
    #[error("OS error on '{name}': {source}")]
    Os {
        /// Object name.
        name: String,
        /// Underlying errno.
        source: Errno,
    },
}

impl IpcError {
    /// Shorthand for wrapping an errno with the object name.
    pub(crate) fn os(name: &str, source: Errno) -> Self {
        Self::Os {
            name: name.to_string(),
            source,
        }
    }
}

/// Result type for IPC operations.
pub type IpcResult<T> = Result<T, IpcError>;

//! Server-level error types.

use thiserror::Error;

use prefork_ipc::IpcError;

/// Errors surfaced from the master/worker machinery.
///
/// Per-request failures never reach this type; they are converted into
/// HTTP error responses and per-slot counters inside the worker.
#[derive(Debug, Error)]
pub enum ServerError {
    /// A shared-memory channel or region operation failed.
    #[error("IPC failure: {0}")]
    Ipc(#[from] IpcError),

    /// Socket or file I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A system call failed.
    #[error("system call failed: {0}")]
    Os(#[from] nix::errno::Errno),
}

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

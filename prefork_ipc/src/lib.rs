//! # prefork IPC
//!
//! Shared-memory inter-process primitives for the prefork engine:
//!
//! - [`SharedRegion`]: a named, fixed-size byte region mappable by
//!   multiple processes ([`region`]).
//! - [`Semaphore`]: a named counting semaphore ([`sem`]).
//! - [`FifoChannel`]: a bounded ring of fixed-size elements, used by the
//!   master to distribute accepted connection descriptors ([`fifo`]).
//! - [`PriorityHeap`]: a bounded max-heap of tagged messages with stable
//!   FIFO ordering inside each priority class ([`heap`]).
//!
//! ## Coordination protocol
//!
//! Both channels follow the same discipline: one named semaphore with
//! initial value 1 guards the channel header and element array, and one
//! counting semaphore signals available items. The mutex is held only for
//! short header/element updates that never call user code; the items
//! semaphore is posted outside the critical section, exactly once per
//! successful enqueue. Consumers wait on items before taking the mutex,
//! so a reader never spins on an empty channel.
//!
//! ## Lifecycle
//!
//! The creating process fixes a region's size exactly once; attachers
//! observe the same size. Dropping a handle unmaps and closes but never
//! unlinks: the creator unlinks explicitly on clean shutdown, and live
//! mappings in other processes survive until they detach. All queues are
//! volatile: nothing persists across a full teardown.

#![deny(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod fifo;
pub mod heap;
pub mod region;
pub mod sem;

pub use error::{IpcError, IpcResult};
pub use fifo::FifoChannel;
pub use heap::{Message, Priority, PriorityHeap};
pub use region::SharedRegion;
pub use sem::Semaphore;

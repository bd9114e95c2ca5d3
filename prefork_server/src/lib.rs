//! # prefork server core
//!
//! The request-serving engine built on top of [`prefork_ipc`]:
//!
//! - [`master`]: owns the listening socket, accepts connections via epoll,
//!   distributes descriptors through the shared FIFO channel, and
//!   supervises the worker processes (restart on crash, graceful drain).
//! - [`worker`]: consumes descriptors, schedules each onto an in-process
//!   thread pool, and runs read → parse → route → respond → close.
//! - [`pool`]: the fixed-size cooperative thread pool.
//! - [`router`]: registration-ordered route table with `:name` path
//!   parameters.
//! - [`http`]: the minimal request/response surface the core depends on.
//! - [`stats`]: the shared statistics region (worker health, counters).
//! - [`fdpass`]: descriptor transfer to workers over a unix-domain
//!   control channel.
//!
//! ## Process model
//!
//! The master forks N workers at startup; every worker inherits the
//! shared channel and stats mappings. Connections flow
//! master → FIFO channel → one worker → thread pool → handler. A crashed
//! worker is detected by the periodic supervision sweep and replaced in
//! the same slot. SIGTERM/SIGINT trigger a graceful drain bounded by a
//! deadline, after which stragglers are SIGKILLed and the named IPC
//! objects are unlinked.

#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod fdpass;
pub mod http;
pub mod master;
pub mod pool;
pub mod router;
pub mod stats;
pub mod worker;

pub use config::Config;
pub use error::{ServerError, ServerResult};
pub use http::{Request, Response};
pub use master::Master;
pub use router::{Router, RouteParams};
pub use stats::StatsRegion;

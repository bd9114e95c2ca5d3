//! # prefork common
//!
//! Single source of truth for the prefork engine: compile-time tuning
//! constants and the `#[repr(C)]` record types that live inside the shared
//! statistics region. Every other crate in the workspace imports these
//! definitions instead of redeclaring them.

#![deny(missing_docs)]
#![warn(clippy::all)]

pub mod consts;
pub mod stats;

pub use stats::{GlobalStats, WorkerSlot, WorkerStatus};

//! Minimal HTTP/1.1 surface.
//!
//! The engine does no byte-level HTTP beyond what the routing contract
//! needs: the request line is split on whitespace, the path is the target
//! up to `?`, headers go into a map, and responses always carry
//! `Content-Length` and `Connection: close`.

pub mod request;
pub mod response;

pub use request::{ParseError, Request};
pub use response::Response;

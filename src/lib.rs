//! Scalecast: a serial-to-TCP bridge for scales and similar line-oriented
//! sensors.
//!
//! A [`PortSession`] reads lines from a serial port, extracts and validates
//! a numeric reading from each, and serves the most recent valid reading to
//! every TCP client that connects (one payload per connection, then close).
//! The [`core::SessionRegistry`] manages several ports side by side and the
//! `scalecast` binary wraps it all in a command line tool.
//!
//! Parsing rules and settings live in `protocol`, the threads and sockets in
//! `api`. The boot helpers are placed in a separate, hidden module to keep
//! implementation details out of the generated documentation.

pub mod api;
#[doc(hidden)]
pub mod boot;
pub mod cli;
pub mod core;
pub mod protocol;

pub use api::*;

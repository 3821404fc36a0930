//! Shared utilities for the hiroba workspace.
//!
//! Logging setup and the clock abstraction used by the relay client library
//! and its binaries.

pub mod logger;
pub mod time;

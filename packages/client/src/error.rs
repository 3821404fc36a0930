//! Error types for the relay chat client.

use thiserror::Error;

/// Client-specific errors
#[derive(Debug, Error)]
pub enum ClientError {
    /// `connect()` was called outside a tokio runtime, so no driver task
    /// could be spawned.
    #[error("no tokio runtime available to drive the connection")]
    NoRuntime,
}

//! Error types for the chat relay
//!
//! Application-level errors; the queue defines its own error enums in
//! `queue.rs`. Uses thiserror for ergonomic error definitions.

use thiserror::Error;

/// Application-level errors
#[derive(Debug, Error)]
pub enum AppError {
    /// IO error (fatal for the operation that raised it)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// New registrations are rejected once a shutdown has begun
    #[error("server is shutting down")]
    AlreadyShuttingDown,
}

//! Error types for mckeys.

use thiserror::Error;

/// Result type alias for mckeys operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// Live capture failed (device lookup, filter, read).
    #[error("capture error: {0}")]
    Capture(#[from] pcap::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The capture engine no longer accepts frames.
    #[error("capture engine is shut down")]
    ShutDown,
}

//! Error types for the transfer endpoints.
//!
//! Recoverable conditions (corruption, reordering, transient loss) never
//! surface here; they are absorbed by the protocol.  Everything in [`Error`]
//! ends the transfer.

use thiserror::Error;

/// Result type alias for endpoint operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that terminate a transfer.
#[derive(Error, Debug)]
pub enum Error {
    /// Socket setup or datagram I/O failed.
    #[error("network error: {0}")]
    Network(#[from] std::io::Error),

    /// Parameters rejected before any protocol activity.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// A segment went unacknowledged through every allowed retransmission.
    #[error("segment {seq} still unacknowledged after {attempts} transmissions")]
    RetransmitLimit { seq: u32, attempts: u32 },

    /// Reading the source failed.
    #[error("failed to read source: {0}")]
    SourceRead(#[source] std::io::Error),

    /// Writing or closing the output sink failed.
    #[error("failed to write output: {0}")]
    SinkWrite(#[source] std::io::Error),

    /// An endpoint task stopped without reporting an outcome.
    #[error("transfer aborted")]
    Aborted,
}

impl Error {
    /// Create a new configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }
}

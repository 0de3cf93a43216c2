//! Error types for the SSDB client

use thiserror::Error;

/// Error type for SSDB client operations
#[derive(Debug, Error)]
pub enum Error {
    /// Dial failed or the remote address could not be used
    #[error("Connection error: {0}")]
    Connection(String),

    /// Malformed framing on the wire; the socket it came from is discarded
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// A read or write deadline fired
    #[error("Operation timed out: {0}")]
    Timeout(#[from] tokio::time::error::Elapsed),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid argument provided
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The reconnect policy gave up
    #[error("Gave up after {attempts} reconnect attempts: {source}")]
    RetriesExhausted {
        /// Number of redial attempts made
        attempts: u32,
        /// The last failure observed
        #[source]
        source: Box<Error>,
    },

    /// The pool has been closed
    #[error("Connection pool is closed")]
    PoolClosed,
}

impl Error {
    /// Create a connection error
    pub fn connection<S: Into<String>>(msg: S) -> Self {
        Error::Connection(msg.into())
    }

    /// Create a protocol error
    pub fn protocol<S: Into<String>>(msg: S) -> Self {
        Error::Protocol(msg.into())
    }

    /// Create an invalid argument error
    pub fn invalid_argument<S: Into<String>>(msg: S) -> Self {
        Error::InvalidArgument(msg.into())
    }

    /// Whether a redial may cure this error.
    ///
    /// Framing and argument errors are never recoverable: the byte stream
    /// cannot be trusted, or the request never reached the network.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::Io(_) | Error::Timeout(_) | Error::Connection(_)
        )
    }
}

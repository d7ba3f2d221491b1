//! Protocol errors

use thiserror::Error;

/// Errors that can occur during device communication
///
/// Most transient faults (device absent, port open failure, shell not ready,
/// unknown command) are retried inside the client and never reach callers.
/// What does surface is listed here.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// Serial driver failure
    #[error("Serial port error: {0}")]
    SerialError(String),

    /// Read deadline elapsed without a terminator match
    #[error("Timed out waiting for device output")]
    Timeout,

    /// Channel closed locally or by the device
    #[error("Serial channel closed")]
    Closed,

    /// Port vanished before it could be opened
    #[error("Port not found: {0}")]
    PortNotFound(String),

    /// Terminator regex failed to compile
    #[error("Invalid response pattern: {0}")]
    InvalidPattern(#[from] regex::Error),

    /// Unusable configuration or options
    #[error("Configuration error: {0}")]
    Config(String),

    /// Other I/O failure
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

impl ProtocolError {
    /// Whether the error means the underlying channel is gone and the session
    /// must be re-established before the next command.
    pub fn is_disconnect(&self) -> bool {
        match self {
            ProtocolError::Closed | ProtocolError::PortNotFound(_) => true,
            ProtocolError::SerialError(_) => true,
            ProtocolError::IoError(e) => !matches!(
                e.kind(),
                std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock
            ),
            _ => false,
        }
    }
}

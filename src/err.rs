//! Driver error types.

use std::result::Result as CoreResult;

/// Failures reported by the [`crate::transport::UsbTransport`] boundary.
///
/// Kept distinct from [`Error`] because a transport failure is not yet a
/// driver-level outcome: a stall on `GET_MAX_LUN` is expected and handled,
/// not an error that should ever reach a caller.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The endpoint returned a protocol stall.
    #[error("endpoint stalled")]
    Stall,
    /// The transport reported a timeout waiting for completion.
    #[error("transfer timed out")]
    Timeout,
    /// The device was removed or the transport otherwise can no longer reach it.
    #[error("device not present")]
    NotPresent,
    /// Any other transport-layer failure, carrying the transport's own status code.
    #[error("transfer failed with status {0}")]
    Failed(u32),
}

/// Driver-level error kinds.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A requested block range falls outside the logical unit's extent.
    #[error("block range out of range")]
    OutOfRange,
    /// The command completed with CSW status FAILED; sense data may clarify why.
    #[error("command failed")]
    BadState,
    /// A data phase transferred fewer bytes than requested, or a read/write
    /// left nonzero residue.
    #[error("i/o error")]
    Io,
    /// The BOT state machine desynchronized (bad signature, tag mismatch, or
    /// phase error) and reset recovery was performed.
    #[error("internal protocol error")]
    Internal,
    /// The device was torn down while the operation was queued or in flight.
    #[error("device no longer present")]
    IoNotPresent,
    /// The device's endpoint layout or descriptors cannot be driven by this crate.
    #[error("device not supported")]
    Unsupported,
    /// An allocation failed during bind.
    #[error("out of memory")]
    NoMemory,
    /// A caller-supplied argument was structurally invalid (e.g. zero block size).
    #[error("invalid argument")]
    InvalidArgs,
}

impl From<TransportError> for Error {
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::Stall => Error::Io,
            TransportError::Timeout => Error::Io,
            TransportError::NotPresent => Error::IoNotPresent,
            TransportError::Failed(_) => Error::Io,
        }
    }
}

/// Result type for driver operations.
pub type Result<T> = CoreResult<T, Error>;

/// Result type for transport-boundary operations.
pub type TransportResult<T> = CoreResult<T, TransportError>;

use std::io;

use thiserror::Error;

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the messaging and IPC primitives.
///
/// Transient unavailability (EAGAIN/EWOULDBLOCK/EINTR) is never an error:
/// the non-blocking operations report it as `Ok(false)`, `Ok(0)` or
/// `Ok(None)` and the caller retries through its reactor.
#[derive(Debug, Error)]
pub enum Error {
    /// Failure reported by the messaging transport. Fatal to the handle,
    /// not to the process: discard the socket and create a new one.
    #[error("transport error: {0}")]
    Transport(#[from] zmq::Error),

    /// OS-level failure on a pipe or acceptor descriptor.
    #[error("unable to {op}: {source}")]
    Io {
        /// The operation that failed, e.g. "connect a pipe".
        op:     &'static str,
        source: io::Error,
    },

    /// The received bytes do not parse as the expected wire encoding.
    /// Recoverable at the message boundary: the socket stays usable and
    /// only the offending message is lost.
    #[error("corrupt payload: {reason}")]
    CorruptPayload {
        /// Why the bytes were rejected.
        reason: String,
    },

    /// The bytes parse as valid wire data, but the decoded shape does not
    /// match the statically expected type. Same recoverability as
    /// [`Error::CorruptPayload`].
    #[error("schema mismatch: expected {expected}, found {found}")]
    SchemaMismatch {
        /// What the caller's type expected.
        expected: String,
        /// What the buffer actually encoded.
        found:    String,
    },
}

impl Error {
    pub(crate) fn io(op: &'static str, source: io::Error) -> Self {
        Error::Io { op, source }
    }

    pub(crate) fn corrupt(reason: impl Into<String>) -> Self {
        Error::CorruptPayload {
            reason: reason.into(),
        }
    }

    pub(crate) fn mismatch(expected: impl Into<String>, found: impl Into<String>) -> Self {
        Error::SchemaMismatch {
            expected: expected.into(),
            found:    found.into(),
        }
    }
}

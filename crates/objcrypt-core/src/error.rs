use std::fmt;

use thiserror::Error;

pub type TransformResult<T> = Result<T, TransformError>;

/// An end-of-stream integrity failure: the accumulated checksum disagrees
/// with the reference value.
///
/// Travels inside `std::io::Error` (kind `InvalidData`) when raised from a
/// `Read` implementation; `TransformError::from(io::Error)` recovers it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChecksumMismatch {
    pub expected: String,
    pub actual: String,
}

impl fmt::Display for ChecksumMismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "checksum mismatch: expected {}, actual {}",
            self.expected, self.actual
        )
    }
}

impl std::error::Error for ChecksumMismatch {}

impl From<ChecksumMismatch> for std::io::Error {
    fn from(mismatch: ChecksumMismatch) -> Self {
        std::io::Error::new(std::io::ErrorKind::InvalidData, mismatch)
    }
}

#[derive(Debug, Error)]
pub enum TransformError {
    /// Unknown fingerprint, unsupported key type/size, no active key.
    #[error("key error: {0}")]
    Key(String),

    /// Malformed or unsupported transform tag, missing metadata field.
    #[error("config error: {0}")]
    Config(String),

    /// Wrap/unwrap, signature, or cipher failure. Decrypt paths always carry
    /// the same generic message.
    #[error("crypto error: {0}")]
    Crypto(String),

    #[error(transparent)]
    Checksum(#[from] ChecksumMismatch),

    /// A stream was finalized before its source reached end-of-stream.
    #[error("incomplete transform: {0}")]
    Incomplete(String),

    #[error("I/O error: {0}")]
    Io(std::io::Error),
}

impl TransformError {
    /// The only message ever attached to a failed unwrap or signature check.
    pub const DECRYPTION_FAILED: &'static str = "decryption failed";

    pub fn decryption_failed() -> Self {
        TransformError::Crypto(Self::DECRYPTION_FAILED.to_string())
    }
}

impl From<std::io::Error> for TransformError {
    fn from(err: std::io::Error) -> Self {
        let mismatch = err
            .get_ref()
            .and_then(|inner| inner.downcast_ref::<ChecksumMismatch>())
            .cloned();
        match mismatch {
            Some(mismatch) => TransformError::Checksum(mismatch),
            None => TransformError::Io(err),
        }
    }
}

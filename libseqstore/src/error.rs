//! Error handling for libseqstore.
use std::fmt;

/// A custom error type to represent the various errors in libseqstore.
///
/// The variants correspond to the failure classes of the storage engine:
/// archive and filesystem trouble, version gates, identity (UUID) mismatches
/// between dependent indexes, malformed input records, finalize-time
/// consistency violations, resource limits, and cooperative cancellation.
#[derive(Debug)]
pub enum SeqstoreError {
    /// An IO error occurred, including archive layout problems and invalid
    /// index operations (e.g. popping from an empty range).
    Io(std::io::Error),

    /// A stored part's major version exceeds what this build understands.
    Version(String),

    /// UUID mismatch across dependent structures (readmap vs seqset,
    /// mergemap vs either).
    Identity(String),

    /// A malformed input record (read too long, empty sequence, impossible
    /// pairing).
    Input(String),

    /// A finalize-time invariant was violated.
    Consistency(String),

    /// A resource limit was exceeded (memory budget, id width, packed width).
    Limit(String),

    /// The operation was cancelled cooperatively.
    Cancelled,
}

impl fmt::Display for SeqstoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SeqstoreError::Io(err) => write!(f, "IO error: {}", err),
            SeqstoreError::Version(msg) => write!(f, "Version error: {}", msg),
            SeqstoreError::Identity(msg) => write!(f, "Identity error: {}", msg),
            SeqstoreError::Input(msg) => write!(f, "Input error: {}", msg),
            SeqstoreError::Consistency(msg) => write!(f, "Consistency error: {}", msg),
            SeqstoreError::Limit(msg) => write!(f, "Limit error: {}", msg),
            SeqstoreError::Cancelled => write!(f, "Cancelled"),
        }
    }
}

impl std::error::Error for SeqstoreError {}

/// Converts a `std::io::Error` into a [`SeqstoreError`].
impl From<std::io::Error> for SeqstoreError {
    fn from(error: std::io::Error) -> Self {
        SeqstoreError::Io(error)
    }
}

/// Converts a `zip::result::ZipError` into a [`SeqstoreError`].
impl From<zip::result::ZipError> for SeqstoreError {
    fn from(error: zip::result::ZipError) -> Self {
        SeqstoreError::Io(std::io::Error::other(error))
    }
}

/// Converts a `serde_json::Error` into a [`SeqstoreError`].
impl From<serde_json::Error> for SeqstoreError {
    fn from(error: serde_json::Error) -> Self {
        SeqstoreError::Io(std::io::Error::other(error))
    }
}

impl SeqstoreError {
    /// An invalid index operation, reported with the IO kind.
    pub(crate) fn invalid_op(msg: impl Into<String>) -> Self {
        SeqstoreError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            msg.into(),
        ))
    }
}

//! Crate-wide error type.

extern crate alloc;

use alloc::string::String;
use core::fmt;

/// Error returned by all fallible operations in this crate.
///
/// Every failure site also emits a `log` diagnostic before returning, so
/// callers that only care about success can discard the error and still
/// leave a trail. Nothing in this crate panics across the API boundary.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PaginateError {
    /// Underlying file or stream I/O failed.
    Io(String),
    /// A sidecar store exists but its contents do not match the expected
    /// format (bad version tag, wrong record size, truncated sequence,
    /// out-of-range label offset, checksum mismatch).
    Format(String),
    /// The package document is missing something the operation needs
    /// (manifest item, spine reference, navigation document).
    Structure(String),
    /// The navigation document could not be parsed.
    Navigation(String),
}

impl fmt::Display for PaginateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PaginateError::Io(msg) => write!(f, "I/O error: {}", msg),
            PaginateError::Format(msg) => write!(f, "format error: {}", msg),
            PaginateError::Structure(msg) => write!(f, "structure error: {}", msg),
            PaginateError::Navigation(msg) => write!(f, "navigation error: {}", msg),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for PaginateError {}

#[cfg(feature = "std")]
impl From<std::io::Error> for PaginateError {
    fn from(err: std::io::Error) -> Self {
        PaginateError::Io(err.to_string())
    }
}

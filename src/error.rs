//! Crate-wide error type.
//!
//! Every fallible core function returns [`Result`].  The kinds mirror the
//! failure classes of the archive pipeline: plain I/O, malformed container
//! data, back-end codec rejection, cryptographic failures, allocation
//! pressure, and internal invariant violations (which always mean the archive
//! is corrupt).  The binary layer converts these into a single-line
//! diagnostic and a nonzero exit code.

use std::fmt;
use std::io;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, LrzError>;

/// Errors surfaced by the compression and decompression pipelines.
#[derive(Debug)]
pub enum LrzError {
    /// An underlying read/write/seek failed.  `op` names the operation.
    Io { op: &'static str, source: io::Error },
    /// The archive structure is malformed (bad magic, bad field, bad chain).
    Format(String),
    /// A back-end codec rejected a block.
    Codec(String),
    /// Key setup, password handling, or decryption failed.
    Crypto(String),
    /// An allocation could not be satisfied even after backing off.
    Resource(String),
    /// Internal consistency check failed; the archive is corrupt.
    Invariant(String),
}

impl LrzError {
    /// Wrap an `io::Error` with the name of the failing operation.
    pub fn io(op: &'static str) -> impl FnOnce(io::Error) -> LrzError {
        move |source| LrzError::Io { op, source }
    }

    /// True for failures that indicate a damaged archive rather than an
    /// environmental problem.
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            LrzError::Format(_) | LrzError::Codec(_) | LrzError::Invariant(_)
        )
    }
}

impl fmt::Display for LrzError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LrzError::Io { op, source } => write!(f, "{op}: {source}"),
            LrzError::Format(msg) => write!(f, "format error: {msg}"),
            LrzError::Codec(msg) => write!(f, "codec error: {msg}"),
            LrzError::Crypto(msg) => write!(f, "crypto error: {msg}"),
            LrzError::Resource(msg) => write!(f, "resource error: {msg}"),
            LrzError::Invariant(msg) => write!(f, "archive corrupted: {msg}"),
        }
    }
}

impl std::error::Error for LrzError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            LrzError::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<io::Error> for LrzError {
    fn from(source: io::Error) -> Self {
        LrzError::Io { op: "io", source }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_operation_name() {
        let e = LrzError::io("read block header")(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "eof",
        ));
        assert!(e.to_string().contains("read block header"));
    }

    #[test]
    fn corruption_classification() {
        assert!(LrzError::Format("x".into()).is_corruption());
        assert!(LrzError::Invariant("x".into()).is_corruption());
        assert!(!LrzError::Resource("x".into()).is_corruption());
    }

    #[test]
    fn io_errors_expose_their_source() {
        use std::error::Error;
        let e = LrzError::io("seek")(io::Error::new(io::ErrorKind::Other, "boom"));
        assert!(e.source().is_some());
        assert!(LrzError::Codec("x".into()).source().is_none());
    }
}

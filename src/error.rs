//! Centralized error handling for Snapgraph.
//!
//! All failure conditions are propagated through the [`Result`] type; the
//! library never panics (enforced by clippy lints at the crate root). Every
//! error is terminal for the call that produced it: a transfer either
//! completes or fails outright, there is no partial result and no internal
//! retry. The core performs no logging; errors carry enough context for the
//! caller to decide what to do.
//!
//! ## Error Categories
//!
//! - **Header errors** ([`SnapError::WrongMagic`], [`SnapError::WrongVersion`],
//!   [`SnapError::WrongStreamConfiguration`]): detected before any of the
//!   stream body is touched.
//! - **Stream errors** ([`SnapError::UnexpectedEndOfStream`],
//!   [`SnapError::StreamCorrupted`]): the byte stream ended early or failed a
//!   self-consistency check.
//! - **Schema errors** ([`SnapError::TypeStructureChanged`]): the comparator
//!   rejected a structural mismatch that the configured version tolerance
//!   does not cover.
//! - **Contract errors** ([`SnapError::Contract`]): the caller combined
//!   features in a disallowed way (serializing a forbidden type, pairing a
//!   surrogate with a deferred hook, traversing an opaque collection).
//! - **I/O errors** ([`SnapError::Io`]): failures of the underlying stream.
//! - **Internal errors** ([`SnapError::Internal`]): logic errors that should
//!   not occur in production; please report them as bugs.

use std::fmt;
use std::io;
use std::sync::Arc;

/// A specialized `Result` type for Snapgraph operations.
pub type Result<T> = std::result::Result<T, SnapError>;

/// The master error enum covering all failure domains in Snapgraph.
///
/// The type is `Clone` so errors can be stored for later analysis; the
/// underlying `io::Error` is wrapped in an `Arc` to keep cloning cheap.
#[derive(Debug, Clone)]
pub enum SnapError {
    /// Low-level I/O failure of the underlying stream.
    Io(Arc<io::Error>),

    /// The stream does not start with the Snapgraph magic bytes.
    WrongMagic,

    /// The stream was produced by an incompatible format version.
    /// Carries the version byte found in the header.
    WrongVersion(u8),

    /// The header-recorded stamping mode or reference-preservation policy
    /// disagrees with the reader's configuration.
    WrongStreamConfiguration(String),

    /// The stream ended before a read could be satisfied.
    UnexpectedEndOfStream,

    /// The stream failed a structural self-consistency check: a declared
    /// length did not match, padding was non-zero, an identifier was out of
    /// range, or a raw-block delta disagreed with the recorded one.
    StreamCorrupted(String),

    /// The comparator found a structural difference between the write-time
    /// and read-time shape of a type that the configured
    /// [`VersionTolerance`](crate::compare::VersionTolerance) does not allow.
    TypeStructureChanged(String),

    /// A caller-side contract violation: serializing a type marked
    /// non-serializable, combining surrogate substitution with a deferred
    /// post-deserialize hook, or traversing a collection under the
    /// collection-opacity setting.
    Contract(String),

    /// Logic error inside the engine. Indicates a bug in the library.
    Internal(String),
}

impl fmt::Display for SnapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O Error: {e}"),
            Self::WrongMagic => write!(f, "Wrong Magic: not a snapgraph stream"),
            Self::WrongVersion(v) => write!(f, "Wrong Version: unsupported format version {v}"),
            Self::WrongStreamConfiguration(s) => write!(f, "Wrong Stream Configuration: {s}"),
            Self::UnexpectedEndOfStream => write!(f, "Unexpected end of stream"),
            Self::StreamCorrupted(s) => write!(f, "Stream Corrupted: {s}"),
            Self::TypeStructureChanged(s) => write!(f, "Type Structure Changed: {s}"),
            Self::Contract(s) => write!(f, "Contract Violation: {s}"),
            Self::Internal(s) => write!(f, "Internal Logic Error: {s}"),
        }
    }
}

impl std::error::Error for SnapError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for SnapError {
    fn from(err: io::Error) -> Self {
        if err.kind() == io::ErrorKind::UnexpectedEof {
            Self::UnexpectedEndOfStream
        } else {
            Self::Io(Arc::new(err))
        }
    }
}

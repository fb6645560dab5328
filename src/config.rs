//! Session configuration.
//!
//! [`Settings`] is pure data: it carries no behavior of its own and is
//! consumed by the serializer and deserializer. The stamping mode and
//! reference policy are recorded in the stream header and validated on open;
//! the version tolerance and collection opacity act purely on the local side.

use crate::compare::VersionTolerance;
use crate::error::{Result, SnapError};

/// How type metadata is stamped into the stream. Fixed per stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StampMode {
    /// Identity string only. Compact, but no structural check (and therefore
    /// no version tolerance) is possible on read.
    Simple = 0,
    /// Identity plus the ordered field list and shape flags. Enables the
    /// version-tolerance comparator.
    Full = 1,
}

impl StampMode {
    pub(crate) fn to_byte(self) -> u8 {
        self as u8
    }

    pub(crate) fn from_byte(b: u8) -> Result<Self> {
        match b {
            0 => Ok(Self::Simple),
            1 => Ok(Self::Full),
            other => Err(SnapError::StreamCorrupted(format!(
                "invalid stamping flag {other}"
            ))),
        }
    }
}

/// Lifetime of the reference table across repeated top-level transfers on
/// one open stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferencePolicy {
    /// The table is reset before every call; each record is self-contained.
    /// The type-stamp table is reset too, so stamps are re-emitted.
    DoNotPreserve = 0,
    /// The table survives across calls, deduplicating objects stream-wide.
    Preserve = 1,
    /// The table survives via weak handles: objects no longer externally
    /// held may be collected, survivors keep their identities.
    WeakReference = 2,
}

impl ReferencePolicy {
    pub(crate) fn to_byte(self) -> u8 {
        self as u8
    }

    pub(crate) fn from_byte(b: u8) -> Result<Self> {
        match b {
            0 => Ok(Self::DoNotPreserve),
            1 => Ok(Self::Preserve),
            2 => Ok(Self::WeakReference),
            other => Err(SnapError::StreamCorrupted(format!(
                "invalid reference-policy flag {other}"
            ))),
        }
    }
}

/// Configuration for one serializer or deserializer instance.
///
/// Writer and reader must agree on `stamping` and `references`; the reader
/// rejects a header recording different values with
/// [`SnapError::WrongStreamConfiguration`].
#[derive(Debug, Clone, Copy)]
pub struct Settings {
    /// Type-stamping mode, see [`StampMode`].
    pub stamping: StampMode,
    /// Schema-drift leniency applied by the read-side comparator.
    pub tolerance: VersionTolerance,
    /// Reference-table lifetime across records, see [`ReferencePolicy`].
    pub references: ReferencePolicy,
    /// When set, the engine refuses to traverse bare collections and maps;
    /// collection-shaped data must then be modeled as registered objects or
    /// substituted through a surrogate rule.
    pub opaque_collections: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            stamping: StampMode::Full,
            tolerance: VersionTolerance::none(),
            references: ReferencePolicy::DoNotPreserve,
            opaque_collections: false,
        }
    }
}

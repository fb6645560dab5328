//! Defines the physical layout of a snapgraph stream.
//!
//! # Layout
//!
//! ```text
//! [magic: 3] [version: 1] [reference-policy: 1] [stamping-mode: 1]   <- header
//! [record] [record] ...                                              <- body
//! [zero padding to boundary]                                         <- close
//! ```
//!
//! Each record is `[root object id]` followed by object entries
//! `[object id][type id (+stamp on first sight)][body]`; there is no
//! terminator byte: the reader infers the end of a record from the moment
//! its discovery queue drains.
//!
//! The close-time padding rounds the stream up to the smallest boundary in
//! {128, 1024, 4096} at or above the final position (next multiple of 4096
//! beyond that), so independently written streams can be concatenated and
//! read back sequentially.

use crate::config::{ReferencePolicy, Settings, StampMode};
use crate::error::{Result, SnapError};

/// Magic bytes identifying the stream format.
pub const MAGIC_BYTES: [u8; 3] = *b"SGR";

/// The current wire-format version.
pub const FORMAT_VERSION: u8 = 1;

/// The fixed size of the stream header.
/// Magic(3) + Version(1) + ReferencePolicy(1) + StampingMode(1) = 6
pub const HEADER_SIZE: usize = 6;

/// The stream header. Written once at open, validated before the body is
/// touched on read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Reference-table lifetime policy the stream was written with.
    pub references: ReferencePolicy,
    /// Stamping mode the stream was written with.
    pub stamping: StampMode,
}

impl Header {
    /// Builds the header for a writer configured with `settings`.
    pub fn new(settings: &Settings) -> Self {
        Self {
            references: settings.references,
            stamping: settings.stamping,
        }
    }

    /// Serializes the header to its fixed-size byte form.
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        [
            MAGIC_BYTES[0],
            MAGIC_BYTES[1],
            MAGIC_BYTES[2],
            FORMAT_VERSION,
            self.references.to_byte(),
            self.stamping.to_byte(),
        ]
    }

    /// Parses and validates a header.
    ///
    /// # Errors
    /// `WrongMagic` or `WrongVersion` on a foreign or incompatible stream.
    pub fn from_bytes(bytes: [u8; HEADER_SIZE]) -> Result<Self> {
        if bytes[0..3] != MAGIC_BYTES {
            return Err(SnapError::WrongMagic);
        }
        if bytes[3] != FORMAT_VERSION {
            return Err(SnapError::WrongVersion(bytes[3]));
        }
        Ok(Self {
            references: ReferencePolicy::from_byte(bytes[4])?,
            stamping: StampMode::from_byte(bytes[5])?,
        })
    }

    /// Checks the header against a reader's configuration.
    ///
    /// # Errors
    /// `WrongStreamConfiguration` if stamping mode or reference policy
    /// disagree.
    pub fn check_against(&self, settings: &Settings) -> Result<()> {
        if self.stamping != settings.stamping {
            return Err(SnapError::WrongStreamConfiguration(format!(
                "stream stamped as {:?}, reader configured for {:?}",
                self.stamping, settings.stamping
            )));
        }
        if self.references != settings.references {
            return Err(SnapError::WrongStreamConfiguration(format!(
                "stream written with reference policy {:?}, reader configured for {:?}",
                self.references, settings.references
            )));
        }
        Ok(())
    }
}

/// Page boundaries a closed stream is padded to, smallest first.
const PAD_BOUNDARIES: [u64; 3] = [128, 1024, 4096];

/// Returns the position a stream at `position` is padded up to on close.
///
/// Writer and reader both derive the padding length from this, which is what
/// makes concatenated streams readable back to back.
pub fn padded_end(position: u64) -> u64 {
    for boundary in PAD_BOUNDARIES {
        if position <= boundary {
            return boundary;
        }
    }
    // Past the largest page size, round up to its next multiple.
    let last = PAD_BOUNDARIES[2];
    position.div_ceil(last) * last
}

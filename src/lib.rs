//! # Snapgraph
//!
//! A binary serializer for arbitrary object graphs: shared references,
//! cycles, and all.
//!
//! Most serializers flatten data into a tree and silently duplicate (or
//! reject) anything referenced twice. Snapgraph instead tracks every
//! [`Obj`] by identity: each distinct object is written once, every other
//! sighting is a cheap back-reference, and deserialization rebuilds the
//! exact aliasing structure: two fields that pointed at one object point
//! at one object again.
//!
//! ## Quick start
//!
//! ```
//! use snapgraph::{Obj, Snapgraph, SnapObject};
//!
//! #[derive(Default, SnapObject)]
//! struct Track {
//!     title: String,
//!     plays: u64,
//! }
//!
//! # fn main() -> snapgraph::Result<()> {
//! let track = Obj::new(Track { title: "Bloom".into(), plays: 42 });
//! let bytes = Snapgraph::to_vec(&track)?;
//! let copy: Obj<Track> = Snapgraph::from_slice(&bytes)?;
//! assert_eq!(copy.borrow().plays, 42);
//! # Ok(())
//! # }
//! ```
//!
//! ## What the stream carries
//!
//! - **Primitives** through a varint codec ([`WireWrite`] / [`WireRead`]).
//! - **Type stamps**: each type's identity (and, in full mode, its field
//!   list) is embedded on first use, so a reader with a drifted schema can
//!   diff and adapt within its configured [`VersionTolerance`].
//! - **Object entries** in discovery order, with reference identity and
//!   cycles preserved.
//! - **Surrogates**: [`SurrogateRegistry`] rules swap objects for
//!   stream-friendly stand-ins on write and rebuild the originals on read,
//!   without disturbing reference identity.
//!
//! Sessions are configured through [`Snapgraph::builder`]; the
//! [`TypeRegistry`] can be shared across sessions and threads.

#![deny(unsafe_code)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::panic)]
#![warn(missing_docs)]

pub mod api;
pub mod codec;
pub mod compare;
pub mod config;
pub mod containers;
pub mod descriptor;
pub mod error;
pub mod format;
#[doc(hidden)]
pub mod graph;
pub mod meta;
pub mod obj;
pub mod pack;
pub mod reader;
#[doc(hidden)]
pub mod rt;
pub mod surrogate;
pub mod writer;

pub use api::{SessionBuilder, Snapgraph};
pub use codec::{WireRead, WireWrite};
pub use compare::VersionTolerance;
pub use config::{ReferencePolicy, Settings, StampMode};
pub use containers::{NdArray, Stack};
pub use descriptor::{FieldDescriptor, TypeKey};
pub use error::{Result, SnapError};
pub use meta::{Snap, TypeRegistry};
pub use obj::{Handle, Obj};
pub use pack::Pack;
pub use reader::{GraphDeserializer, ReadCx};
pub use surrogate::{Matcher, SurrogateRegistry};
pub use writer::{GraphSerializer, WriteCx};

/// Derives [`Snap`] and [`Pack`] for a struct, registering its fields for
/// stamping, version-tolerant population, and graph traversal.
pub use snapgraph_derive::SnapObject;

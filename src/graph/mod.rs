//! The object-graph engine internals: stream identifiers and the
//! reference-identity table.

pub mod id;
pub mod table;

pub use id::{ObjectId, TypeId, NULL_REF};
pub use table::ObjectTable;

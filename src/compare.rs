//! The structural comparator.
//!
//! When a full stamp arrives, the stream's field list is diffed against the
//! local registration of the same identity and compiled into a
//! [`FieldPlan`]: one pass of `Read` and `Skip` steps that the population
//! loop replays for every instance of that type. The diff runs once per
//! type per stream; instances pay nothing.
//!
//! Field lists are sorted by name on both sides, so the diff is a single
//! two-pointer merge.

use std::cmp::Ordering;
use std::ops::BitOr;

use crate::descriptor::{TypeDescriptor, TypeKey};
use crate::error::{Result, SnapError};

/// Bitmask of schema differences the reader is willing to absorb.
///
/// Anything not explicitly allowed is a fatal
/// [`TypeStructureChanged`](SnapError::TypeStructureChanged). A field whose
/// type changed is always fatal; no flag covers it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionTolerance(u8);

impl VersionTolerance {
    /// The local type gained a field the stream does not carry; the field
    /// keeps its default value.
    pub const FIELD_ADDITION: Self = Self(0b0000_0001);

    /// The local type lost a field the stream still carries; the stream
    /// value is skipped by its stamped key.
    pub const FIELD_REMOVAL: Self = Self(0b0000_0010);

    /// No drift tolerated; any structural difference is fatal.
    pub fn none() -> Self {
        Self(0)
    }

    /// Both additions and removals tolerated.
    pub fn all() -> Self {
        Self::FIELD_ADDITION | Self::FIELD_REMOVAL
    }

    /// Whether every bit of `flags` is set in `self`.
    pub fn allows(self, flags: Self) -> bool {
        self.0 & flags.0 == flags.0
    }
}

impl BitOr for VersionTolerance {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// One step of a compiled population plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanStep {
    /// Decode the next stream value into the named local field.
    Read(String),
    /// Decode and discard the next stream value, which has this shape.
    Skip(TypeKey),
}

/// The compiled per-type population plan, replayed for every instance.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FieldPlan {
    pub(crate) steps: Vec<PlanStep>,
}

impl FieldPlan {
    /// Whether the plan reads every stream field into a local one.
    pub fn is_exact(&self) -> bool {
        self.steps
            .iter()
            .all(|s| matches!(s, PlanStep::Read(_)))
    }
}

/// Diffs a stream-stamped type against its local registration.
///
/// # Errors
/// `TypeStructureChanged` for any difference `tolerance` does not cover,
/// including a same-named field whose key changed, and any disagreement in
/// value kind or raw-block presence.
pub fn build_plan(
    stream: &TypeDescriptor,
    local: &TypeDescriptor,
    tolerance: VersionTolerance,
) -> Result<FieldPlan> {
    if stream.value_kind != local.value_kind {
        return Err(SnapError::TypeStructureChanged(format!(
            "type `{}` changed between value and object form",
            stream.identity
        )));
    }
    if stream.has_raw != local.has_raw {
        return Err(SnapError::TypeStructureChanged(format!(
            "type `{}` gained or lost its raw payload block",
            stream.identity
        )));
    }

    let mut steps = Vec::with_capacity(stream.fields.len());
    let (mut i, mut j) = (0, 0);
    loop {
        let order = match (stream.fields.get(i), local.fields.get(j)) {
            (Some(sf), Some(lf)) => sf.name.cmp(&lf.name),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => break,
        };
        match order {
            Ordering::Equal => {
                let sf = &stream.fields[i];
                let lf = &local.fields[j];
                if sf.key != lf.key {
                    return Err(SnapError::TypeStructureChanged(format!(
                        "field `{}.{}` changed from `{}` to `{}`",
                        stream.identity, sf.name, sf.key, lf.key
                    )));
                }
                steps.push(PlanStep::Read(lf.name.clone()));
                i += 1;
                j += 1;
            }
            // Stream-only field: the local type removed it.
            Ordering::Less => {
                let sf = &stream.fields[i];
                if !tolerance.allows(VersionTolerance::FIELD_REMOVAL) {
                    return Err(SnapError::TypeStructureChanged(format!(
                        "stream carries field `{}.{}` the local type lacks",
                        stream.identity, sf.name
                    )));
                }
                steps.push(PlanStep::Skip(sf.key.clone()));
                i += 1;
            }
            // Local-only field: added after the stream was written. No
            // step; the field keeps its default.
            Ordering::Greater => {
                let lf = &local.fields[j];
                if !tolerance.allows(VersionTolerance::FIELD_ADDITION) {
                    return Err(SnapError::TypeStructureChanged(format!(
                        "local field `{}.{}` is missing from the stream",
                        stream.identity, lf.name
                    )));
                }
                j += 1;
            }
        }
    }
    Ok(FieldPlan { steps })
}

/// The trust-the-local-shape plan used under simple stamping, where the
/// stream records no structure to diff against.
pub fn local_plan(local: &TypeDescriptor) -> FieldPlan {
    FieldPlan {
        steps: local
            .fields
            .iter()
            .map(|f| PlanStep::Read(f.name.clone()))
            .collect(),
    }
}

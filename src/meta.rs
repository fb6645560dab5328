//! The metadata provider: the shared, append-only registry of
//! serializable types.
//!
//! A [`TypeRegistry`] maps both in-process type ids and stream identity
//! strings to a [`TypeEntry`]: the type's stamped descriptor plus the
//! type-erased entry points (factory, body writer, body reader, hooks)
//! that the engine drives without knowing the concrete type. Entries are
//! monomorphized once at registration; the record loops run entirely on
//! stored function pointers afterwards.
//!
//! The registry is internally locked and is meant to be built once and
//! shared across sessions (and threads) behind an `Arc`. Registrations are
//! append-only; re-registering an already-known type is a cheap no-op.

use std::any;
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::codec::{WireRead, WireWrite};
use crate::compare::FieldPlan;
use crate::descriptor::{FieldDescriptor, TypeDescriptor};
use crate::error::{Result, SnapError};
use crate::obj::Handle;
use crate::pack::Pack;
use crate::reader::ReadCx;
use crate::rt;
use crate::writer::WriteCx;

/// A structured type the engine can stamp, traverse, and repopulate.
///
/// Implemented via `#[derive(SnapObject)]`; the derive also provides the
/// matching [`Pack`] impl. Manual implementations are possible but must
/// keep `fields()` sorted by name and `write_fields` emitting in exactly
/// that order.
pub trait Snap: Pack + Default + 'static {
    /// Whether instances carry an opaque raw block after their fields.
    const HAS_RAW: bool = false;

    /// Whether the rehydration hook is deferred to the end of the record,
    /// after every object in the graph has been populated.
    const LATE_HOOK: bool = false;

    /// The stamped field list, sorted by name.
    fn fields() -> Vec<FieldDescriptor>;

    /// Writes every stamped field, in `fields()` order.
    fn write_fields(&self, cx: &mut WriteCx<'_>) -> Result<()>;

    /// Decodes the next stream value into the named field.
    fn read_field(&mut self, name: &str, cx: &mut ReadCx<'_>) -> Result<()>;

    /// Runs on the emitted instance just before its fields are written.
    fn pre_serialize(&mut self) {}

    /// Runs on the emitted instance just after its entry is written.
    fn post_serialize(&self) {}

    /// Runs after the instance is fully populated. With [`Snap::LATE_HOOK`]
    /// set it instead runs at the end of the record.
    fn post_deserialize(&mut self) {}

    /// Writes the raw block. Only called when [`Snap::HAS_RAW`] is set.
    fn write_raw(&self, _wire: &mut dyn WireWrite) -> Result<()> {
        Ok(())
    }

    /// Reads the raw block written by [`Snap::write_raw`]. Must consume
    /// exactly the bytes that were written; the engine verifies the length
    /// against the recorded one.
    fn read_raw(&mut self, _wire: &mut dyn WireRead) -> Result<()> {
        Ok(())
    }
}

/// Builds the stamped descriptor of an object-kind type.
pub(crate) fn object_descriptor<T: Snap>() -> TypeDescriptor {
    TypeDescriptor {
        identity: T::type_key().to_string(),
        value_kind: false,
        has_raw: T::HAS_RAW,
        fields: T::fields(),
    }
}

/// Builds the stamped descriptor of a value-kind type.
pub(crate) fn value_descriptor<T: Pack>() -> TypeDescriptor {
    TypeDescriptor {
        identity: T::type_key().to_string(),
        value_kind: true,
        has_raw: false,
        fields: Vec::new(),
    }
}

/// The registered, type-erased entry for one serializable type.
pub(crate) struct TypeEntry {
    /// Stamped description, diffed against stream stamps on read.
    pub(crate) descriptor: TypeDescriptor,
    /// In-process id of the shared cell this type lives in.
    pub(crate) any: any::TypeId,
    /// Builds a default-initialized tracked instance.
    pub(crate) factory: fn() -> Handle,
    /// Writes the instance body (fields, or the whole value).
    pub(crate) write_body: fn(&Handle, &mut WriteCx<'_>) -> Result<()>,
    /// Populates the instance body by replaying a field plan.
    pub(crate) read_body: fn(&Handle, &FieldPlan, &mut ReadCx<'_>) -> Result<()>,
    /// Moves the value out of `src` into `dst`, leaving `src` defaulted.
    pub(crate) assign: fn(src: &Handle, dst: &Handle) -> Result<()>,
    pub(crate) pre_serialize: fn(&Handle) -> Result<()>,
    pub(crate) post_serialize: fn(&Handle) -> Result<()>,
    pub(crate) post_deserialize: fn(&Handle) -> Result<()>,
    pub(crate) write_raw: fn(&Handle, &mut dyn WireWrite) -> Result<()>,
    pub(crate) read_raw: fn(&Handle, &mut dyn WireRead) -> Result<()>,
    /// Whether `post_deserialize` is deferred to the end of the record.
    pub(crate) late_hook: bool,
}

#[derive(Default)]
struct Inner {
    by_any: HashMap<any::TypeId, Arc<TypeEntry>>,
    by_identity: HashMap<String, Arc<TypeEntry>>,
    forbidden: HashSet<any::TypeId>,
}

/// The shared registry of serializable types.
///
/// Typically built once at startup, wrapped in an `Arc`, and handed to
/// every session through the builder; sessions also auto-register the root
/// type (and everything statically reachable from it) on first use.
#[derive(Default)]
pub struct TypeRegistry {
    inner: RwLock<Inner>,
}

impl TypeRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers a type and everything statically reachable from it.
    ///
    /// Equivalent to what a session does automatically for its root type.
    pub fn register<T: Pack>(&self) -> Result<()> {
        T::register_with(self)
    }

    /// Marks a type as non-serializable: any attempt to emit an instance
    /// fails with [`SnapError::Contract`].
    pub fn forbid<T: 'static>(&self) {
        self.write().forbidden.insert(any::TypeId::of::<RefCell<T>>());
    }

    pub(crate) fn is_forbidden(&self, any: any::TypeId) -> bool {
        self.read().forbidden.contains(&any)
    }

    /// Adds the object-kind entry for a structured type. Returns whether
    /// the entry is new.
    ///
    /// # Errors
    /// `Contract` when a different type is already registered under the
    /// same identity string.
    pub fn add_object_entry<T: Snap>(&self) -> Result<bool> {
        let descriptor = object_descriptor::<T>();
        let entry = TypeEntry {
            any: any::TypeId::of::<RefCell<T>>(),
            factory: rt::erased_factory::<T>,
            write_body: rt::write_object::<T>,
            read_body: rt::read_object::<T>,
            assign: rt::assign::<T>,
            pre_serialize: rt::hook_pre::<T>,
            post_serialize: rt::hook_post_write::<T>,
            post_deserialize: rt::hook_post_read::<T>,
            write_raw: rt::write_raw::<T>,
            read_raw: rt::read_raw::<T>,
            late_hook: T::LATE_HOOK,
            descriptor,
        };
        self.insert(entry)
    }

    /// Adds the value-kind entry for a type that copies inline but can
    /// still live behind a shared reference. Returns whether the entry is
    /// new.
    pub fn add_value_entry<T: Pack + Default + 'static>(&self) -> Result<bool> {
        let descriptor = value_descriptor::<T>();
        let entry = TypeEntry {
            any: any::TypeId::of::<RefCell<T>>(),
            factory: rt::erased_factory::<T>,
            write_body: rt::write_value::<T>,
            read_body: rt::read_value::<T>,
            assign: rt::assign::<T>,
            pre_serialize: rt::hook_noop,
            post_serialize: rt::hook_noop,
            post_deserialize: rt::hook_noop,
            write_raw: rt::raw_noop_write,
            read_raw: rt::raw_noop_read,
            late_hook: false,
            descriptor,
        };
        self.insert(entry)
    }

    fn insert(&self, entry: TypeEntry) -> Result<bool> {
        let mut inner = self.write();
        if inner.by_any.contains_key(&entry.any) {
            return Ok(false);
        }
        if let Some(existing) = inner.by_identity.get(&entry.descriptor.identity) {
            if existing.any != entry.any {
                return Err(SnapError::Contract(format!(
                    "identity `{}` is already registered for a different type",
                    entry.descriptor.identity
                )));
            }
        }
        let entry = Arc::new(entry);
        inner.by_any.insert(entry.any, entry.clone());
        inner
            .by_identity
            .insert(entry.descriptor.identity.clone(), entry);
        Ok(true)
    }

    pub(crate) fn entry_for_any(&self, any: any::TypeId) -> Option<Arc<TypeEntry>> {
        self.read().by_any.get(&any).cloned()
    }

    pub(crate) fn entry_for_identity(&self, identity: &str) -> Option<Arc<TypeEntry>> {
        self.read().by_identity.get(identity).cloned()
    }
}

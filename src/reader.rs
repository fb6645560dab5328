//! The read side: stream type table, population context, and the record
//! loop.
//!
//! Reading mirrors the writer's breadth-first discovery instead of
//! recording fixups: decoding a reference to a not-yet-seen id creates a
//! default-initialized placeholder at that id, and the subsequent entries
//! populate those placeholders in place. Every holder of the placeholder
//! observes the populated value, cycles included, and no patch list is
//! ever built.

use std::io::Read;
use std::rc::Rc;
use std::sync::Arc;

use crate::codec::{PrimitiveReader, WireRead};
use crate::compare::{build_plan, local_plan, FieldPlan};
use crate::config::{ReferencePolicy, Settings, StampMode};
use crate::descriptor::{FieldDescriptor, TypeDescriptor, TypeKey};
use crate::error::{Result, SnapError};
use crate::format::{Header, HEADER_SIZE};
use crate::graph::{ObjectId, ObjectTable, NULL_REF};
use crate::meta::{TypeEntry, TypeRegistry};
use crate::obj::{Handle, Obj};
use crate::pack::Pack;
use crate::surrogate::{SurrogateRegistry, SurrogateRule};

/// The read-side binding of one stream type id: the local entry it mapped
/// to and the compiled population plan.
#[derive(Clone)]
pub(crate) struct Binding {
    pub(crate) local: Arc<TypeEntry>,
    pub(crate) plan: Rc<FieldPlan>,
    /// Stream-side field list, kept for whole-object skips.
    pub(crate) stream_fields: Rc<Vec<FieldDescriptor>>,
    pub(crate) stream_has_raw: bool,
}

/// Read-side table of stream type ids, built up as stamps arrive.
pub(crate) struct StreamTypeTable {
    bindings: Vec<Binding>,
}

impl StreamTypeTable {
    pub(crate) fn new() -> Self {
        Self {
            bindings: Vec::new(),
        }
    }

    pub(crate) fn clear(&mut self) {
        self.bindings.clear();
    }

    /// Reads a type id, consuming and compiling the stamp on first sight.
    pub(crate) fn bind(
        &mut self,
        wire: &mut dyn WireRead,
        provider: &TypeRegistry,
        settings: &Settings,
    ) -> Result<Binding> {
        let raw = wire.take_varint()?;
        let index = usize::try_from(raw)
            .map_err(|_| SnapError::StreamCorrupted("type id out of range".into()))?;
        if let Some(binding) = self.bindings.get(index) {
            return Ok(binding.clone());
        }
        if index > self.bindings.len() {
            return Err(SnapError::StreamCorrupted(format!(
                "type id {index} arrived before {}",
                self.bindings.len()
            )));
        }
        let stream = TypeDescriptor::read_stamp(settings.stamping, wire)?;
        let local = provider.entry_for_identity(&stream.identity).ok_or_else(|| {
            SnapError::TypeStructureChanged(format!(
                "stream type `{}` is not registered locally",
                stream.identity
            ))
        })?;
        let (plan, stream_fields, stream_has_raw) = match settings.stamping {
            StampMode::Full => {
                let plan = build_plan(&stream, &local.descriptor, settings.tolerance)?;
                (plan, stream.fields, stream.has_raw)
            }
            StampMode::Simple => (
                local_plan(&local.descriptor),
                local.descriptor.fields.clone(),
                local.descriptor.has_raw,
            ),
        };
        let binding = Binding {
            local,
            plan: Rc::new(plan),
            stream_fields: Rc::new(stream_fields),
            stream_has_raw,
        };
        self.bindings.push(binding.clone());
        Ok(binding)
    }
}

/// The context threaded through every `read_from` during one record.
pub struct ReadCx<'a> {
    pub(crate) wire: &'a mut dyn WireRead,
    pub(crate) objects: &'a mut ObjectTable,
    pub(crate) types: &'a mut StreamTypeTable,
    pub(crate) provider: &'a TypeRegistry,
    pub(crate) settings: &'a Settings,
}

impl ReadCx<'_> {
    /// The underlying primitive codec source.
    pub fn wire(&mut self) -> &mut dyn WireRead {
        &mut *self.wire
    }

    pub(crate) fn read_binding(&mut self) -> Result<Binding> {
        self.types
            .bind(&mut *self.wire, self.provider, self.settings)
    }

    /// Decodes a non-optional reference.
    pub fn read_ref<T: Pack + Default + 'static>(&mut self) -> Result<Obj<T>> {
        let raw = self.wire.take_varint()?;
        if raw == NULL_REF {
            return Err(SnapError::StreamCorrupted(
                "null reference in a non-optional slot".into(),
            ));
        }
        self.resolve_ref(raw)
    }

    /// Decodes an optional reference; the null sentinel yields `None`.
    pub fn read_opt_ref<T: Pack + Default + 'static>(&mut self) -> Result<Option<Obj<T>>> {
        let raw = self.wire.take_varint()?;
        if raw == NULL_REF {
            return Ok(None);
        }
        Ok(Some(self.resolve_ref(raw)?))
    }

    fn resolve_ref<T: Pack + Default + 'static>(&mut self, raw: u64) -> Result<Obj<T>> {
        let next = self.objects.next_id();
        if raw > next {
            return Err(SnapError::StreamCorrupted(format!(
                "reference to object {raw} skips over id {next}"
            )));
        }
        if raw == next {
            // First sight: the id is predictable, so the placeholder can
            // be created here where the static type is known.
            let obj = Obj::new(T::default());
            self.objects.identify(&obj.to_handle());
            return Ok(obj);
        }
        let id = ObjectId::new(raw);
        match self.objects.lookup(id)? {
            Some(handle) => Obj::from_handle(&handle).ok_or_else(|| {
                SnapError::StreamCorrupted(format!(
                    "reference to object {id} resolves to a different type"
                ))
            }),
            None => {
                // Reserved by a skipped reference; this is the first site
                // that types it.
                let obj = Obj::new(T::default());
                self.objects.claim(id, obj.to_handle())?;
                Ok(obj)
            }
        }
    }

    /// Fails when the session is configured to treat collections as
    /// opaque. Mirror of the write-side guard.
    pub fn ensure_collections_allowed(&self) -> Result<()> {
        if self.settings.opaque_collections {
            return Err(SnapError::Contract(
                "collections are opaque in this session; model the data as a \
                 registered object or substitute it through a surrogate"
                    .into(),
            ));
        }
        Ok(())
    }

    /// Decodes and discards one value of the given shape. Drives the
    /// `Skip` steps of field plans.
    pub(crate) fn skip_value(&mut self, key: &TypeKey) -> Result<()> {
        match key {
            TypeKey::Bool => {
                self.wire.take_u8()?;
            }
            TypeKey::U8
            | TypeKey::U16
            | TypeKey::U32
            | TypeKey::U64
            | TypeKey::I8
            | TypeKey::I16
            | TypeKey::I32
            | TypeKey::I64
            | TypeKey::F32
            | TypeKey::F64
            | TypeKey::Char
            | TypeKey::Time
            | TypeKey::Dur => {
                self.wire.take_varint()?;
            }
            TypeKey::Str => {
                let len = usize::try_from(self.wire.take_varint()?).map_err(|_| {
                    SnapError::StreamCorrupted("string length out of range".into())
                })?;
                self.discard(len)?;
            }
            TypeKey::Opt(inner) => {
                if matches!(inner.as_ref(), TypeKey::Ref(_)) {
                    // Optional references encode straight into the id
                    // space; null is a sentinel, not a flag byte.
                    self.skip_ref_id()?;
                } else {
                    match self.wire.take_u8()? {
                        0 => {}
                        1 => self.skip_value(inner)?,
                        other => {
                            return Err(SnapError::StreamCorrupted(format!(
                                "invalid optional flag {other}"
                            )))
                        }
                    }
                }
            }
            TypeKey::Ref(_) => self.skip_ref_id()?,
            TypeKey::List(inner)
            | TypeKey::Deque(inner)
            | TypeKey::Stack(inner)
            | TypeKey::Set(inner) => {
                let n = self.wire.take_varint()?;
                for _ in 0..n {
                    self.skip_value(inner)?;
                }
            }
            TypeKey::Map(k, v) => {
                let n = self.wire.take_varint()?;
                for _ in 0..n {
                    self.skip_value(k)?;
                    self.skip_value(v)?;
                }
            }
            TypeKey::Array(inner) => {
                let rank = self.wire.take_varint()?;
                let mut volume: u64 = if rank == 0 { 0 } else { 1 };
                for _ in 0..rank {
                    let dim = self.wire.take_varint()?;
                    volume = volume.checked_mul(dim).ok_or_else(|| {
                        SnapError::StreamCorrupted("array volume overflows".into())
                    })?;
                }
                for _ in 0..volume {
                    self.skip_value(inner)?;
                }
            }
            TypeKey::Named(..) => {
                let binding = self.read_binding()?;
                if binding.stream_has_raw {
                    return Err(SnapError::TypeStructureChanged(format!(
                        "cannot skip dropped field of type `{}`: its raw payload \
                         has no recorded shape",
                        binding.local.descriptor.identity
                    )));
                }
                let fields = binding.stream_fields.clone();
                for field in fields.iter() {
                    self.skip_value(&field.key)?;
                }
            }
            TypeKey::Wildcard => {
                return Err(SnapError::Internal(
                    "wildcard key encountered on the wire".into(),
                ))
            }
        }
        Ok(())
    }

    /// Skips one reference id. A first-sight id still reserves its table
    /// slot, because the announced object's entry follows either way.
    fn skip_ref_id(&mut self) -> Result<()> {
        let raw = self.wire.take_varint()?;
        if raw == NULL_REF {
            return Ok(());
        }
        let next = self.objects.next_id();
        if raw > next {
            return Err(SnapError::StreamCorrupted(format!(
                "reference to object {raw} skips over id {next}"
            )));
        }
        if raw == next {
            self.objects.reserve();
        }
        Ok(())
    }

    fn discard(&mut self, mut remaining: usize) -> Result<()> {
        let mut chunk = [0u8; 8 * 1024];
        while remaining > 0 {
            let step = remaining.min(chunk.len());
            self.wire.take(&mut chunk[..step])?;
            remaining -= step;
        }
        Ok(())
    }
}

/// An entry that arrived under a surrogate type and awaits conversion
/// back, once the whole record is populated.
struct PendingDesurrogate {
    shadow: Handle,
    placeholder: Handle,
    rule: Arc<SurrogateRule>,
}

/// Streaming deserializer over any [`Read`] source. Mirror of
/// [`GraphSerializer`](crate::writer::GraphSerializer).
pub struct GraphDeserializer<R: Read> {
    wire: PrimitiveReader<R>,
    objects: ObjectTable,
    types: StreamTypeTable,
    provider: Arc<TypeRegistry>,
    surrogates: Arc<SurrogateRegistry>,
    settings: Settings,
}

impl<R: Read> GraphDeserializer<R> {
    /// Opens a stream: validates the header against `settings` before any
    /// of the body is touched.
    pub fn new(
        source: R,
        settings: Settings,
        provider: Arc<TypeRegistry>,
        surrogates: Arc<SurrogateRegistry>,
    ) -> Result<Self> {
        surrogates.register_all(&provider)?;
        let mut wire = PrimitiveReader::new(source);
        let mut bytes = [0u8; HEADER_SIZE];
        wire.take(&mut bytes)?;
        let header = Header::from_bytes(bytes)?;
        header.check_against(&settings)?;
        Ok(Self {
            wire,
            objects: ObjectTable::new(),
            types: StreamTypeTable::new(),
            provider,
            surrogates,
            settings,
        })
    }

    /// Reads one record and returns its root.
    pub fn deserialize<T: Pack + Default + 'static>(&mut self) -> Result<Obj<T>> {
        T::register_heap(&self.provider)?;
        T::register_with(&self.provider)?;
        self.objects.begin_record(self.settings.references);
        if self.settings.references == ReferencePolicy::DoNotPreserve {
            self.types.clear();
        }

        let root = {
            let mut cx = self.cx();
            cx.read_ref::<T>()?
        };

        let mut late: Vec<(Handle, Arc<TypeEntry>)> = Vec::new();
        let mut desurrogate: Vec<PendingDesurrogate> = Vec::new();

        while let Some(expected) = self.objects.pop_discovered() {
            let declared = self.wire.take_varint()?;
            if declared != expected.raw() {
                return Err(SnapError::StreamCorrupted(format!(
                    "entry for object {declared} arrived where {expected} was due"
                )));
            }
            let binding = self
                .types
                .bind(&mut self.wire, &self.provider, &self.settings)?;

            let existing = self.objects.lookup(expected)?;
            let (target, direct) = match existing {
                None => {
                    // The only announcement was a skipped reference; the
                    // stamp is now the authority on the type.
                    let handle = (binding.local.factory)();
                    self.objects.claim(expected, handle.clone())?;
                    (handle, true)
                }
                Some(handle) => {
                    let direct = handle.as_ref().type_id() == binding.local.any;
                    (handle, direct)
                }
            };

            if direct {
                self.populate(&binding, &target)?;
                if binding.local.late_hook {
                    late.push((target, binding.local.clone()));
                } else {
                    (binding.local.post_deserialize)(&target)?;
                }
            } else {
                // The entry was written under a surrogate type.
                let rule = self
                    .surrogates
                    .match_read(&binding.local.descriptor.identity, target.as_ref().type_id())
                    .ok_or_else(|| {
                        SnapError::StreamCorrupted(format!(
                            "entry of type `{}` does not match the type of object {expected} \
                             and no surrogate rule covers it",
                            binding.local.descriptor.identity
                        ))
                    })?;
                let shadow = (binding.local.factory)();
                self.populate(&binding, &shadow)?;
                (binding.local.post_deserialize)(&shadow)?;
                desurrogate.push(PendingDesurrogate {
                    shadow,
                    placeholder: target,
                    rule,
                });
            }
        }

        // Surrogates convert back only after the whole record is
        // populated, so their conversions see complete shadow instances.
        for pending in desurrogate {
            let unwrapped = (pending.rule.unwrap)(&pending.shadow)?;
            let placeholder_any = pending.placeholder.as_ref().type_id();
            if unwrapped.as_ref().type_id() != placeholder_any {
                return Err(SnapError::Contract(
                    "surrogate unwrap produced an object of the wrong type".into(),
                ));
            }
            let entry = self.provider.entry_for_any(placeholder_any).ok_or_else(|| {
                SnapError::Contract(
                    "the surrogate's original type was never registered".into(),
                )
            })?;
            (entry.assign)(&unwrapped, &pending.placeholder)?;
            // Mirror of the write-side guard: a rebuilt original cannot
            // defer its hook past a record it was never populated in.
            if entry.late_hook {
                return Err(SnapError::Contract(format!(
                    "type `{}` combines surrogate substitution with a deferred \
                     rehydration hook",
                    entry.descriptor.identity
                )));
            }
            (entry.post_deserialize)(&pending.placeholder)?;
        }

        for (handle, entry) in late {
            (entry.post_deserialize)(&handle)?;
        }

        self.objects.end_record(self.settings.references);
        Ok(root)
    }

    /// Consumes the close padding and returns the source, positioned at
    /// the start of a possible following stream.
    pub fn close(self) -> Result<R> {
        self.wire.close()
    }

    fn populate(&mut self, binding: &Binding, target: &Handle) -> Result<()> {
        {
            let mut cx = self.cx();
            (binding.local.read_body)(target, &binding.plan, &mut cx)?;
        }
        if binding.stream_has_raw {
            let start = self.wire.position();
            (binding.local.read_raw)(target, &mut self.wire)?;
            let consumed = self.wire.position() - start;
            let declared = self.wire.take_varint()?;
            if declared != consumed {
                return Err(SnapError::StreamCorrupted(format!(
                    "raw block of `{}` consumed {consumed} bytes, stream recorded {declared}",
                    binding.local.descriptor.identity
                )));
            }
        }
        Ok(())
    }

    fn cx(&mut self) -> ReadCx<'_> {
        ReadCx {
            wire: &mut self.wire,
            objects: &mut self.objects,
            types: &mut self.types,
            provider: &self.provider,
            settings: &self.settings,
        }
    }
}

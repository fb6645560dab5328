//! The write side: traversal context, stamp table, and the record loop.
//!
//! Serialization is breadth-first. Writing a reference only emits its id
//! and queues the object; the record loop then drains the queue, emitting
//! one `[object id][type id (+stamp)][body (+raw block)]` entry per newly
//! discovered object until the graph is exhausted. Cycles cost nothing
//! special: a back-reference is an id the table already knows.

use std::any;
use std::cell::RefCell;
use std::collections::HashMap;
use std::io::Write;
use std::sync::Arc;

use crate::codec::{PrimitiveWriter, WireWrite};
use crate::config::{ReferencePolicy, Settings, StampMode};
use crate::descriptor::TypeDescriptor;
use crate::error::{Result, SnapError};
use crate::format::Header;
use crate::graph::{ObjectTable, TypeId, NULL_REF};
use crate::meta::TypeRegistry;
use crate::obj::Obj;
use crate::pack::Pack;
use crate::surrogate::SurrogateRegistry;

/// Write-side table of stamped types: identity string to dense stream id.
pub(crate) struct StampTable {
    ids: HashMap<String, TypeId>,
}

impl StampTable {
    pub(crate) fn new() -> Self {
        Self {
            ids: HashMap::new(),
        }
    }

    pub(crate) fn clear(&mut self) {
        self.ids.clear();
    }

    /// Emits the type id for `descriptor`, stamping the full description
    /// ahead of the first use.
    pub(crate) fn bind(
        &mut self,
        descriptor: &TypeDescriptor,
        mode: StampMode,
        wire: &mut dyn WireWrite,
    ) -> Result<TypeId> {
        if let Some(&id) = self.ids.get(&descriptor.identity) {
            wire.put_varint(u64::from(id.raw()))?;
            return Ok(id);
        }
        let id = TypeId::new(self.ids.len() as u32);
        self.ids.insert(descriptor.identity.clone(), id);
        wire.put_varint(u64::from(id.raw()))?;
        descriptor.write_stamp(mode, wire)?;
        Ok(id)
    }
}

/// The context threaded through every `write_into` during one record.
pub struct WriteCx<'a> {
    pub(crate) wire: &'a mut dyn WireWrite,
    pub(crate) objects: &'a mut ObjectTable,
    pub(crate) types: &'a mut StampTable,
    pub(crate) provider: &'a TypeRegistry,
    pub(crate) surrogates: &'a SurrogateRegistry,
    pub(crate) settings: &'a Settings,
}

impl WriteCx<'_> {
    /// The underlying primitive codec sink.
    pub fn wire(&mut self) -> &mut dyn WireWrite {
        &mut *self.wire
    }

    pub(crate) fn bind_type(&mut self, descriptor: &TypeDescriptor) -> Result<TypeId> {
        self.types
            .bind(descriptor, self.settings.stamping, &mut *self.wire)
    }

    /// Emits the null-reference sentinel.
    pub fn write_null_ref(&mut self) -> Result<()> {
        self.wire.put_varint(NULL_REF)
    }

    /// Emits a reference to a tracked object: its stream id, queueing the
    /// object itself on first sight. Surrogate rules are consulted at
    /// first sight and may repoint the id at a stand-in before its entry
    /// is written.
    pub fn write_ref<T: Pack + Default + 'static>(&mut self, obj: &Obj<T>) -> Result<()> {
        let handle = obj.to_handle();
        let (id, new) = self.objects.identify(&handle);
        if new {
            if let Some(rule) = self.surrogates.match_write(&T::type_key()) {
                let target = self.provider.entry_for_any(any::TypeId::of::<RefCell<T>>());
                if target.map_or(false, |e| e.late_hook) {
                    return Err(SnapError::Contract(format!(
                        "type `{}` combines surrogate substitution with a deferred \
                         rehydration hook",
                        T::type_key()
                    )));
                }
                let surrogate = (rule.wrap)(&handle)?;
                self.objects.reassign(id, surrogate)?;
            }
        }
        self.wire.put_varint(id.raw())
    }

    /// Fails when the session is configured to treat collections as
    /// opaque. Every collection codec calls this before traversing.
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
}

/// Streaming serializer over any [`Write`] sink.
///
/// One instance owns one stream: the header is written at open, records
/// are appended by [`GraphSerializer::serialize`], and
/// [`GraphSerializer::close`] pads the tail so streams can be
/// concatenated.
pub struct GraphSerializer<W: Write> {
    wire: PrimitiveWriter<W>,
    objects: ObjectTable,
    stamps: StampTable,
    provider: Arc<TypeRegistry>,
    surrogates: Arc<SurrogateRegistry>,
    settings: Settings,
}

impl<W: Write> GraphSerializer<W> {
    /// Opens a stream: registers surrogate types and writes the header.
    pub fn new(
        sink: W,
        settings: Settings,
        provider: Arc<TypeRegistry>,
        surrogates: Arc<SurrogateRegistry>,
    ) -> Result<Self> {
        surrogates.register_all(&provider)?;
        let mut wire = PrimitiveWriter::new(sink);
        wire.put(&Header::new(&settings).to_bytes())?;
        Ok(Self {
            wire,
            objects: ObjectTable::new(),
            stamps: StampTable::new(),
            provider,
            surrogates,
            settings,
        })
    }

    /// Writes one record: the root reference plus an entry for every
    /// object transitively discovered from it.
    ///
    /// The root type and everything statically reachable from it are
    /// registered automatically.
    pub fn serialize<T: Pack + Default + 'static>(&mut self, root: &Obj<T>) -> Result<()> {
        T::register_heap(&self.provider)?;
        T::register_with(&self.provider)?;
        self.objects.begin_record(self.settings.references);
        if self.settings.references == ReferencePolicy::DoNotPreserve {
            self.stamps.clear();
        }

        {
            let mut cx = self.cx();
            cx.write_ref(root)?;
        }

        while let Some(id) = self.objects.pop_discovered() {
            let handle = self.objects.resolve(id)?;
            let entry = self
                .provider
                .entry_for_any(handle.as_ref().type_id())
                .ok_or_else(|| {
                    SnapError::Contract(
                        "a tracked object's type was never registered".into(),
                    )
                })?;
            if self.provider.is_forbidden(entry.any) {
                return Err(SnapError::Contract(format!(
                    "type `{}` is marked non-serializable",
                    entry.descriptor.identity
                )));
            }

            self.wire.put_varint(id.raw())?;
            (entry.pre_serialize)(&handle)?;
            {
                let mut cx = self.cx();
                cx.bind_type(&entry.descriptor)?;
                (entry.write_body)(&handle, &mut cx)?;
            }
            if entry.descriptor.has_raw {
                let start = self.wire.position();
                (entry.write_raw)(&handle, &mut self.wire)?;
                let delta = self.wire.position() - start;
                self.wire.put_varint(delta)?;
            }
            (entry.post_serialize)(&handle)?;
        }

        self.objects.end_record(self.settings.references);
        Ok(())
    }

    /// Pads the stream to its close boundary, flushes, and returns the
    /// sink.
    pub fn close(self) -> Result<W> {
        self.wire.close()
    }

    fn cx(&mut self) -> WriteCx<'_> {
        WriteCx {
            wire: &mut self.wire,
            objects: &mut self.objects,
            types: &mut self.stamps,
            provider: &self.provider,
            surrogates: &self.surrogates,
            settings: &self.settings,
        }
    }
}

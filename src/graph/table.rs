//! The reference-identity table.
//!
//! One table instance lives inside each serializer or deserializer and maps
//! shared objects to dense stream ids. The writer feeds it the handles it
//! encounters; the reader feeds it the placeholders it creates. Both sides
//! assign ids in the same discovery order, which is the invariant the whole
//! wire format leans on.

use std::collections::{HashMap, VecDeque};
use std::hash::BuildHasherDefault;
use std::rc::{Rc, Weak};

use twox_hash::XxHash64;

use crate::config::ReferencePolicy;
use crate::error::{Result, SnapError};
use crate::graph::id::ObjectId;
use crate::obj::{handle_key, Handle};

/// One entry of the table, indexed by [`ObjectId`].
enum Slot {
    /// The object is held alive by the table.
    Strong(Handle),
    /// The table only observes the object; it stays resolvable while some
    /// external handle keeps it alive.
    Weak(Weak<dyn std::any::Any>),
    /// The object died between records under the weak policy. Its id stays
    /// allocated so later ids keep their positions.
    Vacant,
    /// Read side only: the id was announced by a reference the local
    /// schema dropped, so no field site has typed it yet. The instance is
    /// created when its entry (or a live reference) arrives.
    Unresolved,
}

/// Identity map from shared objects to dense, discovery-ordered ids.
///
/// Also carries the FIFO discovery queue: identifying a new object enqueues
/// its id, and the record loop drains the queue to emit (or populate)
/// object entries in exactly that order.
pub struct ObjectTable {
    slots: Vec<Slot>,
    index: HashMap<*const (), ObjectId, BuildHasherDefault<XxHash64>>,
    pending: VecDeque<ObjectId>,
}

impl ObjectTable {
    pub(crate) fn new() -> Self {
        Self {
            slots: Vec::new(),
            index: HashMap::default(),
            pending: VecDeque::new(),
        }
    }

    /// Next id that would be assigned to a new object.
    pub(crate) fn next_id(&self) -> u64 {
        self.slots.len() as u64
    }

    /// Looks up the id of `handle`, assigning the next dense id on first
    /// sight. Returns the id and whether the object is newly discovered;
    /// new objects are also enqueued for processing.
    pub(crate) fn identify(&mut self, handle: &Handle) -> (ObjectId, bool) {
        let key = handle_key(handle);
        if let Some(&id) = self.index.get(&key) {
            return (id, false);
        }
        let id = ObjectId::new(self.slots.len() as u64);
        self.slots.push(Slot::Strong(handle.clone()));
        self.index.insert(key, id);
        self.pending.push_back(id);
        (id, true)
    }

    /// Resolves an id back to a strong handle.
    ///
    /// # Errors
    /// `StreamCorrupted` if the id was never assigned, or refers to an
    /// object that died between records under the weak policy.
    pub(crate) fn resolve(&self, id: ObjectId) -> Result<Handle> {
        match self.lookup(id)? {
            Some(handle) => Ok(handle),
            None => Err(SnapError::Internal(format!(
                "object {id} resolved before it was typed"
            ))),
        }
    }

    /// Like [`ObjectTable::resolve`], but an unresolved slot yields
    /// `Ok(None)` instead of an error.
    pub(crate) fn lookup(&self, id: ObjectId) -> Result<Option<Handle>> {
        match self.slots.get(id.index()) {
            Some(Slot::Strong(h)) => Ok(Some(h.clone())),
            Some(Slot::Weak(w)) => w
                .upgrade()
                .map(Some)
                .ok_or_else(|| {
                    SnapError::StreamCorrupted(format!(
                        "object {id} was collected between records"
                    ))
                }),
            Some(Slot::Unresolved) => Ok(None),
            Some(Slot::Vacant) | None => Err(SnapError::StreamCorrupted(format!(
                "reference to unknown object {id}"
            ))),
        }
    }

    /// Allocates the next id without an instance and queues it. Used when
    /// a dropped-field reference announces an object no local site types.
    pub(crate) fn reserve(&mut self) -> ObjectId {
        let id = ObjectId::new(self.slots.len() as u64);
        self.slots.push(Slot::Unresolved);
        self.pending.push_back(id);
        id
    }

    /// Binds an instance to a reserved id.
    pub(crate) fn claim(&mut self, id: ObjectId, handle: Handle) -> Result<()> {
        let slot = self.slots.get_mut(id.index()).ok_or_else(|| {
            SnapError::Internal(format!("claim of unknown object {id}"))
        })?;
        if !matches!(slot, Slot::Unresolved) {
            return Err(SnapError::Internal(format!(
                "object {id} claimed twice"
            )));
        }
        self.index.insert(handle_key(&handle), id);
        *slot = Slot::Strong(handle);
        Ok(())
    }

    /// Points an already-assigned id at a different object.
    ///
    /// Used by surrogate substitution: the original object keeps its index
    /// entry (so later sightings of it still dedupe to `id`), and the
    /// replacement is indexed under the same id as well.
    pub(crate) fn reassign(&mut self, id: ObjectId, replacement: Handle) -> Result<()> {
        let slot = self.slots.get_mut(id.index()).ok_or_else(|| {
            SnapError::Internal(format!("reassign of unknown object {id}"))
        })?;
        self.index.insert(handle_key(&replacement), id);
        *slot = Slot::Strong(replacement);
        Ok(())
    }

    /// Dequeues the next discovered-but-unprocessed object id.
    pub(crate) fn pop_discovered(&mut self) -> Option<ObjectId> {
        self.pending.pop_front()
    }

    /// Prepares the table for a new top-level record under `policy`.
    pub(crate) fn begin_record(&mut self, policy: ReferencePolicy) {
        self.pending.clear();
        match policy {
            ReferencePolicy::DoNotPreserve => {
                self.slots.clear();
                self.index.clear();
            }
            ReferencePolicy::Preserve => {}
            ReferencePolicy::WeakReference => {
                let mut dead = Vec::new();
                for (i, slot) in self.slots.iter_mut().enumerate() {
                    let expired = matches!(slot, Slot::Weak(w) if w.upgrade().is_none());
                    if expired {
                        *slot = Slot::Vacant;
                        dead.push(ObjectId::new(i as u64));
                    }
                }
                if !dead.is_empty() {
                    self.index.retain(|_, id| !dead.contains(id));
                }
            }
        }
    }

    /// Finishes a top-level record: under the weak policy the table drops
    /// its strong holds so object lifetimes return to the caller.
    pub(crate) fn end_record(&mut self, policy: ReferencePolicy) {
        if policy != ReferencePolicy::WeakReference {
            return;
        }
        for slot in &mut self.slots {
            if let Slot::Strong(h) = slot {
                *slot = Slot::Weak(Rc::downgrade(h));
            }
        }
    }
}

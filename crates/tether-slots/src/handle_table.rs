//! The native-handle table.
//!
//! Every native value the host can see occupies one [`HandleSlot`]. Slots
//! move `Active → Disposing → Disposed` and a disposed slot is cached for
//! reuse under a bumped generation, so a [`HandleId`] that outlives its
//! value never resolves again.
//!
//! Disposal is split in two so the caller can release the native value
//! without holding the table lock: [`HandleTable::begin_dispose`] marks the
//! slot and hands back the value, [`HandleTable::complete_dispose`] finishes
//! the bookkeeping afterwards.

use std::sync::Weak;

use tether_core::{HandleId, NativeRef, ObjectId, ProtocolViolation, SlotKey, ValueKind};

use crate::counted::CountedReference;
use crate::slot_table::Lockable;

/// Lifecycle state of a handle slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum HandleState {
    /// In use.
    Active,
    /// Being released; still resolves, but no new locks may be taken.
    Disposing,
    /// Released and cached for reuse; never resolves.
    Disposed,
}

/// One native handle.
pub struct HandleSlot<T: ?Sized> {
    native: NativeRef,
    kind: ValueKind,
    state: HandleState,
    /// The host object connected to this handle, if any.
    pub object: Option<ObjectId>,
    /// Lock count and weak link to the connected wrapper.
    pub counted: CountedReference<T>,
}

impl<T: ?Sized> HandleSlot<T> {
    /// The native value.
    pub fn native(&self) -> NativeRef {
        self.native
    }

    /// The value kind.
    pub fn kind(&self) -> ValueKind {
        self.kind
    }

    /// The lifecycle state.
    pub fn state(&self) -> HandleState {
        self.state
    }
}

impl<T: ?Sized> Lockable for HandleSlot<T> {
    fn lock_count(&self) -> i32 {
        self.counted.lock_count()
    }
}

/// What a completed disposal released.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DisposedHandle {
    /// The native value the slot held.
    pub native: NativeRef,
    /// The object that was connected, now unlinked.
    pub object: Option<ObjectId>,
    /// The lock count at the moment of disposal.
    pub lock_count: i32,
}

/// Handle totals by state. Diagnostics only; computing them is O(n).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HandleCounts {
    /// Slots in use.
    pub active: usize,
    /// Slots being released.
    pub disposing: usize,
    /// Released slots cached for reuse or retired.
    pub disposed: usize,
}

impl HandleCounts {
    /// Every slot ever allocated.
    pub fn total(&self) -> usize {
        self.active + self.disposing + self.disposed
    }
}

struct Entry<T: ?Sized> {
    generation: u32,
    slot: HandleSlot<T>,
}

/// Growable table of native handles indexed by [`HandleId`].
pub struct HandleTable<T: ?Sized> {
    entries: Vec<Entry<T>>,
    free_list: Vec<u32>,
    live: usize,
}

impl<T: ?Sized> HandleTable<T> {
    /// Create an empty table.
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
            free_list: Vec::new(),
            live: 0,
        }
    }

    /// Create an empty table with room for `capacity` handles.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
            free_list: Vec::new(),
            live: 0,
        }
    }

    /// Allocate an `Active` slot for a native value.
    ///
    /// Reuses the most recently disposed slot when one is cached.
    ///
    /// # Panics
    ///
    /// Panics if the table would grow past `u32::MAX` slots.
    pub fn allocate(
        &mut self,
        native: NativeRef,
        kind: ValueKind,
    ) -> Result<HandleId, ProtocolViolation> {
        if let Some(index) = self.free_list.pop() {
            let entry = &mut self.entries[index as usize];
            if let Err(v) = entry.slot.counted.reinitialize(None) {
                self.free_list.push(index);
                return Err(v);
            }
            entry.slot.native = native;
            entry.slot.kind = kind;
            entry.slot.state = HandleState::Active;
            entry.slot.object = None;
            self.live += 1;
            let id = HandleId::from_parts(index, entry.generation);
            tracing::trace!(handle = %id, %native, %kind, "reused handle slot");
            return Ok(id);
        }
        let index = u32::try_from(self.entries.len()).expect("handle index exceeds u32::MAX");
        self.entries.push(Entry {
            generation: 0,
            slot: HandleSlot {
                native,
                kind,
                state: HandleState::Active,
                object: None,
                counted: CountedReference::tracking(None),
            },
        });
        self.live += 1;
        let id = HandleId::from_parts(index, 0);
        tracing::trace!(handle = %id, %native, %kind, "allocated handle slot");
        Ok(id)
    }

    fn entry(&self, id: HandleId) -> Option<&Entry<T>> {
        let entry = self.entries.get(id.index() as usize)?;
        (entry.generation == id.generation() && entry.slot.state != HandleState::Disposed)
            .then_some(entry)
    }

    /// The live (`Active` or `Disposing`) slot behind `id`.
    pub fn get(&self, id: HandleId) -> Option<&HandleSlot<T>> {
        self.entry(id).map(|e| &e.slot)
    }

    /// The live slot behind `id`, mutably.
    pub fn get_mut(&mut self, id: HandleId) -> Option<&mut HandleSlot<T>> {
        let entry = self.entries.get_mut(id.index() as usize)?;
        if entry.generation != id.generation() || entry.slot.state == HandleState::Disposed {
            return None;
        }
        Some(&mut entry.slot)
    }

    /// Mark an `Active` slot as `Disposing` and return its native value.
    ///
    /// Returns `Ok(None)` when the id is stale or another disposal is
    /// already in flight. A locked slot is left untouched.
    pub fn begin_dispose(&mut self, id: HandleId) -> Result<Option<NativeRef>, ProtocolViolation> {
        let Some(slot) = self.get_mut(id) else {
            return Ok(None);
        };
        if slot.state != HandleState::Active {
            return Ok(None);
        }
        if slot.is_locked() {
            return Err(ProtocolViolation::RemoveLocked {
                count: slot.lock_count(),
            });
        }
        slot.state = HandleState::Disposing;
        Ok(Some(slot.native))
    }

    /// Move a live slot to `Disposed`.
    ///
    /// Bumps the generation, drops the counted reference to the sentinel and
    /// unlinks the connected object. Slots whose generation wraps are
    /// retired rather than cached.
    pub fn complete_dispose(&mut self, id: HandleId) -> Option<DisposedHandle> {
        let index = id.index();
        let entry = self.entries.get_mut(index as usize)?;
        if entry.generation != id.generation() || entry.slot.state == HandleState::Disposed {
            return None;
        }
        entry.slot.state = HandleState::Disposed;
        let lock_count = entry.slot.counted.abandon();
        let object = entry.slot.object.take();
        entry.generation = entry.generation.wrapping_add(1);
        if entry.generation != 0 {
            self.free_list.push(index);
        }
        self.live -= 1;
        tracing::trace!(handle = %id, lock_count, "disposed handle slot");
        Some(DisposedHandle {
            native: entry.slot.native,
            object,
            lock_count,
        })
    }

    /// Connect a live slot to a host object and its wrapper.
    pub fn link(&mut self, id: HandleId, object: ObjectId, wrapper: Weak<T>) -> bool {
        match self.get_mut(id) {
            Some(slot) => {
                slot.object = Some(object);
                slot.counted.retarget(Some(wrapper));
                true
            }
            None => false,
        }
    }

    /// Clear a live slot's object link.
    pub fn unlink(&mut self, id: HandleId) -> Option<ObjectId> {
        let slot = self.get_mut(id)?;
        slot.counted.retarget(None);
        slot.object.take()
    }

    /// Totals by state.
    pub fn counts(&self) -> HandleCounts {
        let mut counts = HandleCounts::default();
        for entry in &self.entries {
            match entry.slot.state {
                HandleState::Active => counts.active += 1,
                HandleState::Disposing => counts.disposing += 1,
                HandleState::Disposed => counts.disposed += 1,
            }
        }
        counts
    }

    /// Iterate over live slots in index order.
    pub fn iter_live(&self) -> impl Iterator<Item = (HandleId, &HandleSlot<T>)> + '_ {
        self.entries.iter().enumerate().filter_map(|(index, entry)| {
            (entry.slot.state != HandleState::Disposed)
                .then(|| (HandleId::from_parts(index as u32, entry.generation), &entry.slot))
        })
    }

    /// Dispose every live slot, returning what each released.
    pub fn drain_live(&mut self) -> Vec<(HandleId, DisposedHandle)> {
        let ids: Vec<HandleId> = self.iter_live().map(|(id, _)| id).collect();
        ids.into_iter()
            .filter_map(|id| self.complete_dispose(id).map(|d| (id, d)))
            .collect()
    }

    /// Number of live slots.
    pub fn len(&self) -> usize {
        self.live
    }

    /// Whether no slot is live.
    pub fn is_empty(&self) -> bool {
        self.live == 0
    }
}

impl<T: ?Sized> Default for HandleTable<T> {
    fn default() -> Self {
        Self::new()
    }
}

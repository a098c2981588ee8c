//! Generic slot+generation table.
//!
//! Stale keys have an outdated generation and resolve to `None` instead of
//! aliasing the slot's next occupant. Double-remove is a no-op.

use std::marker::PhantomData;

use tether_core::{ProtocolViolation, SlotKey};

/// Something that carries a lock count.
pub trait Lockable {
    /// Current lock count. Negative values mean "not participating".
    fn lock_count(&self) -> i32;

    /// Whether the count holds any outstanding lock.
    fn is_locked(&self) -> bool {
        self.lock_count() > 0
    }
}

struct Slot<T> {
    generation: u32,
    data: Option<T>,
}

/// A generational arena mapping typed keys to owned values.
///
/// Reuses slots via a free list; the most recently freed slot is reused
/// first. Generation counters increment on removal.
pub struct SlotTable<K, T> {
    slots: Vec<Slot<T>>,
    free_list: Vec<u32>,
    len: usize,
    _key: PhantomData<fn() -> K>,
}

impl<K: SlotKey, T> SlotTable<K, T> {
    /// Create an empty table.
    pub const fn new() -> Self {
        Self {
            slots: Vec::new(),
            free_list: Vec::new(),
            len: 0,
            _key: PhantomData,
        }
    }

    /// Create an empty table with room for `capacity` slots.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: Vec::with_capacity(capacity),
            free_list: Vec::new(),
            len: 0,
            _key: PhantomData,
        }
    }

    /// Insert a value and return its key.
    ///
    /// # Panics
    ///
    /// Panics if the table would grow past `u32::MAX` slots.
    pub fn insert(&mut self, value: T) -> K {
        self.len += 1;
        if let Some(index) = self.free_list.pop() {
            let slot = &mut self.slots[index as usize];
            slot.data = Some(value);
            K::from_parts(index, slot.generation)
        } else {
            let index = u32::try_from(self.slots.len()).expect("slot index exceeds u32::MAX");
            self.slots.push(Slot {
                generation: 0,
                data: Some(value),
            });
            K::from_parts(index, 0)
        }
    }

    /// Get the value behind a key, or `None` if the key is stale.
    pub fn get(&self, key: K) -> Option<&T> {
        let slot = self.slots.get(key.index() as usize)?;
        if slot.generation != key.generation() {
            return None;
        }
        slot.data.as_ref()
    }

    /// Get the value behind a key mutably, or `None` if the key is stale.
    pub fn get_mut(&mut self, key: K) -> Option<&mut T> {
        let slot = self.slots.get_mut(key.index() as usize)?;
        if slot.generation != key.generation() {
            return None;
        }
        slot.data.as_mut()
    }

    /// Whether the key resolves.
    pub fn contains(&self, key: K) -> bool {
        self.get(key).is_some()
    }

    /// Remove the value behind a key, returning it.
    ///
    /// Bumps the generation and frees the slot for reuse. A slot whose
    /// generation wraps to 0 is retired instead, so a key from the first
    /// epoch can never resolve again.
    pub fn remove(&mut self, key: K) -> Option<T> {
        let slot = self.slots.get_mut(key.index() as usize)?;
        if slot.generation != key.generation() {
            return None;
        }
        let value = slot.data.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        if slot.generation != 0 {
            self.free_list.push(key.index());
        }
        self.len -= 1;
        Some(value)
    }

    /// Remove every value, bumping each occupied slot's generation.
    pub fn drain(&mut self) -> Vec<(K, T)> {
        let keys: Vec<K> = self.iter().map(|(k, _)| k).collect();
        keys.into_iter()
            .filter_map(|k| self.remove(k).map(|v| (k, v)))
            .collect()
    }

    /// Iterate over occupied slots in index order.
    pub fn iter(&self) -> impl Iterator<Item = (K, &T)> + '_ {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            slot.data
                .as_ref()
                .map(|data| (K::from_parts(index as u32, slot.generation), data))
        })
    }

    /// Number of occupied slots.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether no slot is occupied.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of slots the table can hold without reallocating.
    pub fn capacity(&self) -> usize {
        self.slots.capacity()
    }
}

impl<K: SlotKey, T: Lockable> SlotTable<K, T> {
    /// Remove the value behind a key unless it is locked.
    ///
    /// A locked value is left in place and reported as
    /// [`ProtocolViolation::RemoveLocked`]. Stale keys return `Ok(None)`.
    pub fn remove_unlocked(&mut self, key: K) -> Result<Option<T>, ProtocolViolation> {
        match self.get(key) {
            None => return Ok(None),
            Some(value) if value.is_locked() => {
                return Err(ProtocolViolation::RemoveLocked {
                    count: value.lock_count(),
                })
            }
            Some(_) => {}
        }
        Ok(self.remove(key))
    }
}

impl<K: SlotKey, T> Default for SlotTable<K, T> {
    fn default() -> Self {
        Self::new()
    }
}

//! Strongly-typed generational identifiers.
//!
//! Every slot-backed ID is a `(index, generation)` pair. The index is dense
//! and reused after removal; the generation is bumped on every removal, so an
//! ID held across a dispose boundary is detected as stale instead of aliasing
//! whatever now occupies the slot.
//!
//! When an ID has to cross the untyped native callback boundary it is packed
//! into a `u64`: upper 32 bits = slot index, lower 32 bits = generation.

use std::fmt;

/// A key type usable with a generational slot table.
pub trait SlotKey: Copy + Eq + fmt::Debug {
    /// Build a key from its slot index and generation.
    fn from_parts(index: u32, generation: u32) -> Self;

    /// The dense slot index.
    fn index(self) -> u32;

    /// The generation the slot had when this key was issued.
    fn generation(self) -> u32;

    /// Pack into the `u64` wire form used at the native boundary.
    fn to_raw(self) -> u64 {
        ((self.index() as u64) << 32) | (self.generation() as u64)
    }

    /// Unpack from the `u64` wire form. Never fails; a garbage value simply
    /// resolves to nothing when looked up.
    fn from_raw(raw: u64) -> Self {
        Self::from_parts((raw >> 32) as u32, raw as u32)
    }
}

macro_rules! slot_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name {
            index: u32,
            generation: u32,
        }

        impl SlotKey for $name {
            fn from_parts(index: u32, generation: u32) -> Self {
                Self { index, generation }
            }

            fn index(self) -> u32 {
                self.index
            }

            fn generation(self) -> u32 {
                self.generation
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "{}v{}"), self.index, self.generation)
            }
        }
    };
}

slot_id!(
    /// Identifies a host-side object slot (one per wrapper).
    ObjectId,
    "o"
);

slot_id!(
    /// Identifies a native handle slot.
    HandleId,
    "h"
);

slot_id!(
    /// Identifies an engine registered with an engine registry.
    EngineId,
    "e"
);

/// Opaque native value reference (pointer or native-side index).
///
/// The bridge never interprets this value; it only hands it back to the
/// [`NativeRuntime`](crate::traits::NativeRuntime) for release or
/// stringification.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NativeRef(pub u64);

impl fmt::Display for NativeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl From<u64> for NativeRef {
    fn from(v: u64) -> Self {
        Self(v)
    }
}

/// A handle plus the object it belongs to, if any.
///
/// Used by wrappers that declare their children for leak accounting, and to
/// exempt entities from a stored snapshot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct EntityId {
    /// The native handle.
    pub handle: HandleId,
    /// The host object connected to the handle, if any.
    pub object: Option<ObjectId>,
}

impl EntityId {
    /// An entity with no connected object.
    pub fn handle(handle: HandleId) -> Self {
        Self {
            handle,
            object: None,
        }
    }

    /// An entity for a connected handle/object pair.
    pub fn object(handle: HandleId, object: ObjectId) -> Self {
        Self {
            handle,
            object: Some(object),
        }
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.object {
            Some(object) => write!(f, "{}/{}", self.handle, object),
            None => write!(f, "{}", self.handle),
        }
    }
}

//! Collaborator traits consumed by the bridge.
//!
//! [`HostObject`] is implemented by application wrappers, [`NativeRuntime`]
//! by the binding to the embedded script engine. The bridge holds wrappers
//! weakly and never calls into the runtime while a table lock is held.

use std::sync::Arc;

use smallvec::SmallVec;

use crate::id::{EntityId, NativeRef};

/// Callback the native collector invokes once per candidate handle.
///
/// The argument is the candidate's `HandleId` in its `u64` wire form (see
/// [`SlotKey::to_raw`](crate::id::SlotKey::to_raw)). Returning `true` permits
/// the native side to reclaim the value; `false` keeps it alive.
pub type CollectionCallback = Arc<dyn Fn(u64) -> bool + Send + Sync>;

/// Parent/child relationships a wrapper declares for leak accounting.
///
/// A wrapper is expected to hold one lock on the handle of every child it
/// declares. The leak detector counts, for each handle, how many live
/// wrappers list it in [`child_ids`](Self::child_ids) and allows that many
/// locks on it before flagging it.
pub trait DeclaredChildren {
    /// The wrapper's own entity, if connected.
    fn self_id(&self) -> Option<EntityId>;

    /// The parent entity, if any.
    fn parent_id(&self) -> Option<EntityId> {
        None
    }

    /// Entities whose handles this wrapper holds one lock on each.
    fn child_ids(&self) -> SmallVec<[EntityId; 4]>;

    /// Short description used in leak reports.
    fn summary(&self) -> String;
}

/// A host-side wrapper around a native value.
///
/// Both methods have no-op defaults, so a plain `impl HostObject for T {}`
/// is enough for wrappers that take no part in leak accounting.
pub trait HostObject: Send + Sync + 'static {
    /// Relationship info for the leak detector.
    fn declared_children(&self) -> Option<&dyn DeclaredChildren> {
        None
    }

    /// Called once when the owning engine tears down while the wrapper is
    /// still alive. Any handle it refers to is already released.
    fn on_teardown(&self) {}
}

/// The embedded engine, as seen by the bridge.
pub trait NativeRuntime: Send + Sync {
    /// Install the callback consulted for every collection candidate.
    /// Replaces any previously installed callback.
    fn register_collection_callback(&self, callback: CollectionCallback);

    /// Run one native collection pass. The pass may invoke the installed
    /// callback from any thread before it returns.
    fn force_collection(&self);

    /// Drop the native side's reference to `value`.
    fn release(&self, value: NativeRef);

    /// Render `value` for diagnostics.
    fn stringify(&self, value: NativeRef) -> Option<String> {
        let _ = value;
        None
    }
}

//! Engine lifecycle, object/handle registration and lock counting.
//!
//! An [`Engine`] is a cheap handle to shared state: the object table, the
//! handle table, the snapshot registry and the deferred-work channel fed by
//! the collection bridge. Each table sits behind its own `RwLock`; when both
//! are needed the object table is locked first. No lock is held while the
//! [`NativeRuntime`] is called or a wrapper is dropped.
//!
//! Dropping the last clone tears the engine down. After teardown every
//! operation is a no-op returning `None`, `false` or `Ok`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};

use crossbeam_channel::{Receiver, Sender};
use tether_core::{
    BridgeError, CollectionCallback, HandleId, HostObject, NativeRef, NativeRuntime, ObjectId,
    ProtocolViolation, ValueKind,
};
use tether_slots::{HandleCounts, HandleState, HandleTable, Lockable, SlotTable};

use crate::bridge::Deferred;
use crate::config::{ConfigError, EngineConfig, ViolationPolicy};
use crate::metrics::{BridgeMetrics, Counters};
use crate::snapshot::SnapshotRegistry;

pub(crate) type Objects = SlotTable<ObjectId, ObjectSlot>;
pub(crate) type Handles = HandleTable<dyn HostObject>;

/// Host-side record for one wrapper.
pub(crate) struct ObjectSlot {
    pub(crate) wrapper: Weak<dyn HostObject>,
    pub(crate) handle: Option<HandleId>,
    /// The handle pinned on this object's behalf.
    pub(crate) rooted: Option<HandleId>,
}

impl ObjectSlot {
    pub(crate) fn wrapper_alive(&self) -> bool {
        self.wrapper.strong_count() > 0
    }
}

impl Lockable for ObjectSlot {
    fn lock_count(&self) -> i32 {
        i32::from(self.rooted.is_some())
    }
}

pub(crate) struct EngineShared {
    pub(crate) config: EngineConfig,
    pub(crate) native: Arc<dyn NativeRuntime>,
    pub(crate) objects: RwLock<Objects>,
    pub(crate) handles: RwLock<Handles>,
    pub(crate) snapshots: Mutex<SnapshotRegistry>,
    pub(crate) deferred_tx: Sender<Deferred>,
    pub(crate) deferred_rx: Receiver<Deferred>,
    /// Sticky: set by any host-observable handle disposal, cleared at the
    /// start of each forced collection pass.
    pub(crate) host_disposed: AtomicBool,
    pub(crate) torn_down: AtomicBool,
    pub(crate) counters: Counters,
}

// Compile-time assertion: the shared state must be Send + Sync.
const _: fn() = || {
    fn assert<T: Send + Sync>() {}
    assert::<EngineShared>();
    assert::<Engine>();
};

impl EngineShared {
    pub(crate) fn is_torn_down(&self) -> bool {
        self.torn_down.load(Ordering::Acquire)
    }

    pub(crate) fn objects_read(&self) -> Result<RwLockReadGuard<'_, Objects>, BridgeError> {
        self.objects
            .read()
            .map_err(|_| BridgeError::LockPoisoned { table: "object" })
    }

    pub(crate) fn objects_write(&self) -> Result<RwLockWriteGuard<'_, Objects>, BridgeError> {
        self.objects
            .write()
            .map_err(|_| BridgeError::LockPoisoned { table: "object" })
    }

    pub(crate) fn handles_read(&self) -> Result<RwLockReadGuard<'_, Handles>, BridgeError> {
        self.handles
            .read()
            .map_err(|_| BridgeError::LockPoisoned { table: "handle" })
    }

    pub(crate) fn handles_write(&self) -> Result<RwLockWriteGuard<'_, Handles>, BridgeError> {
        self.handles
            .write()
            .map_err(|_| BridgeError::LockPoisoned { table: "handle" })
    }

    /// Apply the configured [`ViolationPolicy`] to a protocol violation.
    pub(crate) fn violation<T>(&self, v: ProtocolViolation, fallback: T) -> Result<T, BridgeError> {
        match self.config.violation_policy {
            ViolationPolicy::Strict => Err(v.into()),
            ViolationPolicy::Lenient => {
                tracing::warn!(violation = %v, "lock-count protocol violation ignored");
                Ok(fallback)
            }
        }
    }

    /// Release a handle on the host's initiative.
    ///
    /// Marks it `Disposing` under the lock, releases the native value with
    /// no lock held, then completes the disposal and unlinks its object.
    /// Returns `false` if the handle is stale or already being disposed.
    pub(crate) fn free_handle(&self, handle: HandleId) -> Result<bool, BridgeError> {
        let native = match self.handles_write()?.begin_dispose(handle)? {
            Some(native) => native,
            None => return Ok(false),
        };
        self.native.release(native);

        // The native value is gone; finish even if a lock was poisoned.
        let mut objects = self.objects.write().unwrap_or_else(PoisonError::into_inner);
        let mut handles = self.handles.write().unwrap_or_else(PoisonError::into_inner);
        let Some(done) = handles.complete_dispose(handle) else {
            return Ok(false);
        };
        if let Some(slot) = done.object.and_then(|o| objects.get_mut(o)) {
            if slot.handle == Some(handle) {
                slot.handle = None;
            }
        }
        drop(handles);
        drop(objects);

        self.host_disposed.store(true, Ordering::Release);
        Counters::bump(&self.counters.reclaimed_handles, 1);
        tracing::trace!(%handle, native = %done.native, "handle released by host");
        Ok(true)
    }

    /// Idempotent teardown: release every live native value, notify live
    /// wrappers, clear both tables and the snapshot registry.
    pub(crate) fn teardown(&self) {
        if self.torn_down.swap(true, Ordering::AcqRel) {
            return;
        }
        let (released, wrappers) = {
            let mut objects = self.objects.write().unwrap_or_else(PoisonError::into_inner);
            let mut handles = self.handles.write().unwrap_or_else(PoisonError::into_inner);
            let wrappers: Vec<Weak<dyn HostObject>> =
                objects.drain().into_iter().map(|(_, slot)| slot.wrapper).collect();
            (handles.drain_live(), wrappers)
        };
        self.snapshots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        let dropped_messages = self.deferred_rx.try_iter().count();

        for (_, done) in &released {
            self.native.release(done.native);
        }
        let mut notified = 0usize;
        for wrapper in wrappers {
            if let Some(wrapper) = wrapper.upgrade() {
                wrapper.on_teardown();
                notified += 1;
            }
        }
        tracing::debug!(
            released = released.len(),
            notified,
            dropped_messages,
            "engine torn down"
        );
    }
}

impl Drop for EngineShared {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// A lifetime bridge between host wrappers and native handles.
///
/// Clones share state. See the [crate docs](crate) for an overview.
#[derive(Clone)]
pub struct Engine {
    pub(crate) shared: Arc<EngineShared>,
}

impl Engine {
    /// Build an engine and register its collection callback with `native`.
    pub fn new(config: EngineConfig, native: Arc<dyn NativeRuntime>) -> Result<Self, ConfigError> {
        config.validate()?;
        let (deferred_tx, deferred_rx) = crossbeam_channel::unbounded();
        let shared = Arc::new(EngineShared {
            objects: RwLock::new(SlotTable::with_capacity(config.initial_object_capacity)),
            handles: RwLock::new(HandleTable::with_capacity(config.initial_handle_capacity)),
            snapshots: Mutex::new(SnapshotRegistry::default()),
            deferred_tx,
            deferred_rx,
            host_disposed: AtomicBool::new(false),
            torn_down: AtomicBool::new(false),
            counters: Counters::default(),
            native: Arc::clone(&native),
            config,
        });

        let weak = Arc::downgrade(&shared);
        let callback: CollectionCallback = Arc::new(move |raw: u64| match weak.upgrade() {
            Some(shared) => shared.collection_request(raw),
            None => true,
        });
        native.register_collection_callback(callback);
        tracing::debug!(
            objects = shared.config.initial_object_capacity,
            handles = shared.config.initial_handle_capacity,
            policy = ?shared.config.violation_policy,
            "engine created"
        );
        Ok(Self { shared })
    }

    /// The configuration the engine was built with.
    pub fn config(&self) -> &EngineConfig {
        &self.shared.config
    }

    // ── Registration ──────────────────────────────────────────────

    /// Register a wrapper. The engine holds it weakly.
    pub fn create_object<W: HostObject>(&self, wrapper: &Arc<W>) -> Option<ObjectId> {
        if self.shared.is_torn_down() {
            return None;
        }
        let weak: Weak<W> = Arc::downgrade(wrapper);
        let weak: Weak<dyn HostObject> = weak;
        let object = self.shared.objects_write().ok()?.insert(ObjectSlot {
            wrapper: weak,
            handle: None,
            rooted: None,
        });
        tracing::trace!(%object, "object created");
        Some(object)
    }

    /// Register a native value handed out by the runtime.
    pub fn register_handle(&self, native: NativeRef, kind: ValueKind) -> Option<HandleId> {
        if self.shared.is_torn_down() {
            return None;
        }
        match self.shared.handles_write().ok()?.allocate(native, kind) {
            Ok(handle) => Some(handle),
            Err(v) => {
                tracing::warn!(violation = %v, %native, "handle slot could not be reused");
                None
            }
        }
    }

    /// Link an object to an object-kind handle, 1:1.
    pub fn connect(&self, object: ObjectId, handle: HandleId) -> Result<(), BridgeError> {
        if self.shared.is_torn_down() {
            return Ok(());
        }
        let mut objects = self.shared.objects_write()?;
        let mut handles = self.shared.handles_write()?;
        let slot = objects
            .get_mut(object)
            .ok_or(BridgeError::StaleObject { object })?;
        let target = handles
            .get(handle)
            .filter(|h| h.state() == HandleState::Active)
            .ok_or(BridgeError::StaleHandle { handle })?;
        if !target.kind().is_object_type() {
            return Err(BridgeError::NotAnObject {
                handle,
                kind: target.kind(),
            });
        }
        if slot.handle.is_some() || target.object.is_some() {
            return Err(BridgeError::AlreadyConnected { handle, object });
        }
        slot.handle = Some(handle);
        handles.link(handle, object, slot.wrapper.clone());
        tracing::trace!(%object, %handle, "connected");
        Ok(())
    }

    /// The wrapper connected to `handle`, creating one with `factory` if
    /// there is none or the previous one has been dropped.
    ///
    /// The factory runs with no lock held. If another thread connects a live
    /// wrapper first, that wrapper wins and the new one is discarded.
    pub fn object_for_handle<W, F>(
        &self,
        handle: HandleId,
        factory: F,
    ) -> Result<Option<(ObjectId, Arc<dyn HostObject>)>, BridgeError>
    where
        W: HostObject,
        F: FnOnce(HandleId, ValueKind) -> Arc<W>,
    {
        if self.shared.is_torn_down() {
            return Ok(None);
        }
        let kind = {
            let objects = self.shared.objects_read()?;
            let handles = self.shared.handles_read()?;
            let slot = handles
                .get(handle)
                .filter(|h| h.state() == HandleState::Active)
                .ok_or(BridgeError::StaleHandle { handle })?;
            if !slot.kind().is_object_type() {
                return Err(BridgeError::NotAnObject {
                    handle,
                    kind: slot.kind(),
                });
            }
            if let Some(object) = slot.object {
                if let Some(wrapper) = objects.get(object).and_then(|o| o.wrapper.upgrade()) {
                    return Ok(Some((object, wrapper)));
                }
            }
            slot.kind()
        };

        let created: Arc<dyn HostObject> = factory(handle, kind);
        let weak = Arc::downgrade(&created);

        let mut objects = self.shared.objects_write()?;
        let mut handles = self.shared.handles_write()?;
        let existing = handles
            .get(handle)
            .filter(|h| h.state() == HandleState::Active)
            .ok_or(BridgeError::StaleHandle { handle })?
            .object;
        let object = match existing.filter(|o| objects.contains(*o)) {
            Some(object) => {
                if let Some(slot) = objects.get_mut(object) {
                    if let Some(winner) = slot.wrapper.upgrade() {
                        return Ok(Some((object, winner)));
                    }
                    slot.wrapper = weak.clone();
                }
                object
            }
            None => objects.insert(ObjectSlot {
                wrapper: weak.clone(),
                handle: Some(handle),
                rooted: None,
            }),
        };
        handles.link(handle, object, weak);
        tracing::trace!(%object, %handle, "object created for handle");
        Ok(Some((object, created)))
    }

    // ── Lookup ────────────────────────────────────────────────────

    /// The live wrapper behind `object`.
    pub fn get_object(&self, object: ObjectId) -> Option<Arc<dyn HostObject>> {
        let objects = self.shared.objects_read().ok()?;
        objects.get(object)?.wrapper.upgrade()
    }

    /// Whether `object` still has a slot (its wrapper may be dead).
    pub fn contains_object(&self, object: ObjectId) -> bool {
        self.shared
            .objects_read()
            .map(|o| o.contains(object))
            .unwrap_or(false)
    }

    /// The handle connected to `object`.
    pub fn object_handle(&self, object: ObjectId) -> Option<HandleId> {
        self.shared.objects_read().ok()?.get(object)?.handle
    }

    /// The object connected to `handle`.
    pub fn handle_object(&self, handle: HandleId) -> Option<ObjectId> {
        self.shared.handles_read().ok()?.get(handle)?.object
    }

    /// The value kind of a live handle.
    pub fn handle_kind(&self, handle: HandleId) -> Option<ValueKind> {
        Some(self.shared.handles_read().ok()?.get(handle)?.kind())
    }

    /// The native value of a live handle.
    pub fn handle_native(&self, handle: HandleId) -> Option<NativeRef> {
        Some(self.shared.handles_read().ok()?.get(handle)?.native())
    }

    /// The state of a live handle; `None` once disposed.
    pub fn handle_state(&self, handle: HandleId) -> Option<HandleState> {
        Some(self.shared.handles_read().ok()?.get(handle)?.state())
    }

    // ── Lock counting ─────────────────────────────────────────────

    /// Take one lock on an active handle.
    pub fn inc_handle(&self, handle: HandleId) -> Result<(), BridgeError> {
        if self.shared.is_torn_down() {
            return Ok(());
        }
        let mut handles = self.shared.handles_write()?;
        let slot = handles
            .get_mut(handle)
            .filter(|h| h.state() == HandleState::Active)
            .ok_or(BridgeError::StaleHandle { handle })?;
        match slot.counted.inc() {
            Ok(_) => Ok(()),
            Err(v) => self.shared.violation(v, ()),
        }
    }

    /// Release one lock on a live handle.
    pub fn dec_handle(&self, handle: HandleId) -> Result<(), BridgeError> {
        if self.shared.is_torn_down() {
            return Ok(());
        }
        let mut handles = self.shared.handles_write()?;
        let slot = handles
            .get_mut(handle)
            .ok_or(BridgeError::StaleHandle { handle })?;
        match slot.counted.dec() {
            Ok(_) => Ok(()),
            Err(v) => self.shared.violation(v, ()),
        }
    }

    /// The lock count of a live handle.
    pub fn lock_count(&self, handle: HandleId) -> Option<i32> {
        Some(self.shared.handles_read().ok()?.get(handle)?.lock_count())
    }

    /// Whether a live handle holds any lock.
    pub fn is_handle_locked(&self, handle: HandleId) -> bool {
        self.lock_count(handle).is_some_and(|n| n > 0)
    }

    // ── Disposal ──────────────────────────────────────────────────

    /// Free a handle if nothing needs it: no locks are held and its
    /// connected wrapper, if any, has been dropped.
    ///
    /// Returns whether the handle was freed. Stale handles are a no-op.
    pub fn dispose_handle(&self, handle: HandleId) -> Result<bool, BridgeError> {
        if self.shared.is_torn_down() {
            return Ok(false);
        }
        {
            let objects = self.shared.objects_read()?;
            let handles = self.shared.handles_read()?;
            let Some(slot) = handles.get(handle) else {
                return Ok(false);
            };
            if slot.is_locked() {
                return Ok(false);
            }
            let wrapper_alive = slot
                .object
                .and_then(|o| objects.get(o))
                .is_some_and(ObjectSlot::wrapper_alive);
            if wrapper_alive {
                return Ok(false);
            }
        }
        // A lock taken since the check above keeps the handle alive.
        match self.shared.free_handle(handle) {
            Err(BridgeError::Protocol(ProtocolViolation::RemoveLocked { .. })) => Ok(false),
            other => other,
        }
    }

    /// Free a handle regardless of its wrapper. Locked handles are refused.
    pub fn remove_handle(&self, handle: HandleId) -> Result<(), BridgeError> {
        if self.shared.is_torn_down() {
            return Ok(());
        }
        if self.shared.handles_read()?.get(handle).is_none() {
            return Err(BridgeError::StaleHandle { handle });
        }
        match self.shared.free_handle(handle) {
            Err(BridgeError::Protocol(v)) => self.shared.violation(v, ()),
            Err(e) => Err(e),
            Ok(_) => Ok(()),
        }
    }

    /// Remove an object slot and unlink its handle. Rooted objects are
    /// refused.
    pub fn remove_object(&self, object: ObjectId) -> Result<(), BridgeError> {
        if self.shared.is_torn_down() {
            return Ok(());
        }
        let mut objects = self.shared.objects_write()?;
        let removed = match objects.remove_unlocked(object) {
            Ok(Some(slot)) => slot,
            Ok(None) => return Err(BridgeError::StaleObject { object }),
            Err(v) => return self.shared.violation(v, ()),
        };
        if let Some(handle) = removed.handle {
            self.shared.handles_write()?.unlink(handle);
        }
        drop(objects);
        tracing::trace!(%object, "object removed");
        Ok(())
    }

    // ── Diagnostics ───────────────────────────────────────────────

    /// Handle totals by state.
    pub fn handle_counts(&self) -> HandleCounts {
        self.shared
            .handles_read()
            .map(|h| h.counts())
            .unwrap_or_default()
    }

    /// Current occupancy and cumulative counters.
    pub fn metrics(&self) -> BridgeMetrics {
        let mut metrics = BridgeMetrics::default();
        if let Ok(objects) = self.shared.objects_read() {
            metrics.objects_live = objects.len();
            metrics.objects_rooted = objects.iter().filter(|(_, o)| o.rooted.is_some()).count();
        }
        let counts = self.handle_counts();
        metrics.handles_active = counts.active;
        metrics.handles_disposing = counts.disposing;
        metrics.handles_disposed = counts.disposed;
        self.shared.counters.fill(&mut metrics);
        metrics
    }

    // ── Teardown ──────────────────────────────────────────────────

    /// Release every native value and clear all state. Idempotent.
    pub fn teardown(&self) {
        self.shared.teardown();
    }

    /// Whether [`teardown`](Self::teardown) has run.
    pub fn is_torn_down(&self) -> bool {
        self.shared.is_torn_down()
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("torn_down", &self.is_torn_down())
            .finish_non_exhaustive()
    }
}

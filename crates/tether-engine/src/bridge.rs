//! The collection bridge.
//!
//! The native collector asks, once per candidate handle, whether it may
//! reclaim the value. The answer is computed under read locks only; every
//! table mutation the answer implies is posted as a [`Deferred`] message and
//! applied by [`Engine::process_pending`] once the native pass has returned.
//!
//! Rules, per candidate:
//!
//! 1. Unknown, stale or unconnected handle (an orphan): reclaim.
//! 2. Connected, object not rooted: reclaim.
//! 3. Connected and rooted: the rooting is released either way; reclaim only
//!    if that release brings the lock count to baseline and the wrapper is
//!    gone.
//!
//! A failure inside the callback (a poisoned lock or a panic) is logged,
//! counted and answered with "reclaim". The callback must never unwind into
//! the native collector.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::Ordering;

use tether_core::{BridgeError, HandleId, ObjectId, SlotKey};
use tether_slots::{HandleState, Lockable};

use crate::engine::{Engine, EngineShared, Handles, Objects};
use crate::metrics::Counters;

/// Bookkeeping owed after a collection decision.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Deferred {
    /// The native side reclaimed `handle`. If `rooted` is set, the rooting
    /// of `object` is released first.
    Collected {
        handle: HandleId,
        object: Option<ObjectId>,
        rooted: Option<HandleId>,
    },
    /// The rooting of `object` is released but the handle survives.
    Unrooted { object: ObjectId, rooted: HandleId },
}

/// What one call to [`Engine::collect`] did.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CollectionSummary {
    /// Native passes forced.
    pub passes: u32,
    /// Deferred messages applied.
    pub processed: usize,
    /// Object slots removed by sweeping.
    pub swept: usize,
}

impl EngineShared {
    /// Entry point for the native collector. Never panics.
    pub(crate) fn collection_request(&self, raw: u64) -> bool {
        self.fail_open(raw, |shared| shared.decide(raw))
    }

    /// Run a collection decision, mapping errors and panics to "reclaim".
    fn fail_open<F>(&self, raw: u64, decide: F) -> bool
    where
        F: FnOnce(&Self) -> Result<bool, BridgeError>,
    {
        if self.is_torn_down() {
            return true;
        }
        match catch_unwind(AssertUnwindSafe(|| decide(self))) {
            Ok(Ok(permit)) => permit,
            Ok(Err(e)) => {
                Counters::bump(&self.counters.fail_open_events, 1);
                tracing::error!(handle = raw, error = %e, "collection request failed, permitting reclaim");
                true
            }
            Err(_) => {
                Counters::bump(&self.counters.fail_open_events, 1);
                tracing::error!(handle = raw, "collection request panicked, permitting reclaim");
                true
            }
        }
    }

    fn decide(&self, raw: u64) -> Result<bool, BridgeError> {
        let handle = HandleId::from_raw(raw);
        let objects = self.objects_read()?;
        let handles = self.handles_read()?;

        let Some(slot) = handles.get(handle) else {
            Counters::bump(&self.counters.orphan_requests, 1);
            tracing::debug!(%handle, "collection request for unknown handle");
            return Ok(true);
        };
        let connected = slot
            .object
            .and_then(|o| objects.get(o).map(|s| (o, s)));
        let Some((object, owner)) = connected else {
            Counters::bump(&self.counters.orphan_requests, 1);
            tracing::debug!(%handle, "collection request for unconnected handle");
            self.post(Deferred::Collected {
                handle,
                object: None,
                rooted: None,
            });
            return Ok(true);
        };

        let permit = match owner.rooted {
            None => {
                self.post(Deferred::Collected {
                    handle,
                    object: Some(object),
                    rooted: None,
                });
                true
            }
            Some(rooted) => {
                let rooted_count = handles.get(rooted).map_or(0, |s| s.lock_count());
                let permit = rooted_count <= 1 && !owner.wrapper_alive();
                if permit {
                    self.post(Deferred::Collected {
                        handle,
                        object: Some(object),
                        rooted: Some(rooted),
                    });
                } else {
                    self.post(Deferred::Unrooted { object, rooted });
                }
                permit
            }
        };
        if permit {
            self.host_disposed.store(true, Ordering::Release);
        }
        tracing::trace!(%handle, %object, permit, "collection request decided");
        Ok(permit)
    }

    fn post(&self, message: Deferred) {
        Counters::bump(&self.counters.deferred_decisions, 1);
        // The receiver lives in `self`, so the channel cannot be disconnected.
        let _ = self.deferred_tx.send(message);
    }

    /// Apply one message. A rooted handle left collectible by the release
    /// of its rooting is freed once the table locks are dropped.
    fn apply(&self, message: Deferred) -> Result<(), BridgeError> {
        let orphaned_root = {
            let mut objects = self.objects_write()?;
            let mut handles = self.handles_write()?;
            match message {
                Deferred::Unrooted { object, rooted } => {
                    release_rooting(&mut objects, &mut handles, object, rooted)?
                }
                Deferred::Collected {
                    handle,
                    object,
                    rooted,
                } => {
                    let orphaned_root = match (object, rooted) {
                        (Some(object), Some(rooted)) => {
                            release_rooting(&mut objects, &mut handles, object, rooted)?
                                .filter(|r| *r != handle)
                        }
                        _ => None,
                    };
                    self.reclaim(&mut objects, &mut handles, handle);
                    orphaned_root
                }
            }
        };
        if let Some(rooted) = orphaned_root {
            tracing::trace!(handle = %rooted, "freeing rooted handle released by collection");
            self.free_handle(rooted)?;
        }
        Ok(())
    }

    /// Finish a native reclaim of `handle`. Locked handles keep their slot.
    fn reclaim(&self, objects: &mut Objects, handles: &mut Handles, handle: HandleId) {
        let Some(slot) = handles.get(handle) else {
            return;
        };
        if slot.is_locked() {
            tracing::warn!(
                %handle,
                lock_count = slot.lock_count(),
                "native side reclaimed a locked handle, keeping host slot"
            );
            return;
        }
        if let Some(done) = handles.complete_dispose(handle) {
            if let Some(owner) = done.object.and_then(|o| objects.get_mut(o)) {
                if owner.handle == Some(handle) {
                    owner.handle = None;
                }
            }
            Counters::bump(&self.counters.reclaimed_handles, 1);
            tracing::trace!(%handle, "handle reclaimed by native collector");
        }
    }
}

/// Clear `object`'s rooting if it still points at `rooted` and drop the lock
/// it held.
///
/// Returns `rooted` if the release leaves it collectible: at baseline, still
/// active, and neither `object`'s wrapper nor the handle's own target alive.
fn release_rooting(
    objects: &mut Objects,
    handles: &mut Handles,
    object: ObjectId,
    rooted: HandleId,
) -> Result<Option<HandleId>, BridgeError> {
    let Some(owner) = objects.get_mut(object) else {
        return Ok(None);
    };
    if owner.rooted != Some(rooted) {
        return Ok(None);
    }
    owner.rooted = None;
    let wrapper_alive = owner.wrapper_alive();
    let Some(slot) = handles.get_mut(rooted) else {
        return Ok(None);
    };
    let count = slot.counted.dec()?;
    let collectible = count <= 0
        && slot.state() == HandleState::Active
        && !wrapper_alive
        && !slot.counted.has_live_target();
    Ok(collectible.then_some(rooted))
}

impl Engine {
    /// Apply the bookkeeping deferred by collection requests. Returns the
    /// number of messages applied.
    ///
    /// Failures are logged at `warn` and do not stop the drain.
    pub fn process_pending(&self) -> usize {
        let shared = &self.shared;
        let mut processed = 0;
        while let Ok(message) = shared.deferred_rx.try_recv() {
            processed += 1;
            if let Err(e) = shared.apply(message) {
                tracing::warn!(?message, error = %e, "deferred collection work failed");
            }
        }
        processed
    }

    /// Number of deferred messages waiting for [`process_pending`](Self::process_pending).
    pub fn pending(&self) -> usize {
        self.shared.deferred_rx.len()
    }

    /// Force native collection until a pass disposes nothing on the host
    /// side, bounded by `max_collection_passes`.
    ///
    /// Each pass is followed by [`process_pending`](Self::process_pending)
    /// and [`sweep`](Self::sweep).
    pub fn collect(&self) -> CollectionSummary {
        let shared = &self.shared;
        let mut summary = CollectionSummary::default();
        if shared.is_torn_down() {
            return summary;
        }
        loop {
            shared.host_disposed.store(false, Ordering::Release);
            shared.native.force_collection();
            summary.passes += 1;
            Counters::bump(&shared.counters.collection_passes, 1);
            summary.processed += self.process_pending();
            summary.swept += self.sweep();
            if !shared.host_disposed.load(Ordering::Acquire)
                || summary.passes >= shared.config.max_collection_passes
            {
                break;
            }
        }
        tracing::debug!(
            passes = summary.passes,
            processed = summary.processed,
            swept = summary.swept,
            "collection finished"
        );
        summary
    }

    /// Run [`collect`](Self::collect) only if a handle has been disposed on
    /// the host side since the last pass started.
    pub fn collect_if_disposed(&self) -> Option<CollectionSummary> {
        if self.shared.host_disposed.load(Ordering::Acquire) {
            Some(self.collect())
        } else {
            None
        }
    }

    /// Remove object slots both sides are done with: the wrapper is gone,
    /// nothing is rooted and the handle, if any, holds no lock.
    ///
    /// Returns the number of slots removed.
    pub fn sweep(&self) -> usize {
        let shared = &self.shared;
        if shared.is_torn_down() {
            return 0;
        }
        let (Ok(mut objects), Ok(mut handles)) = (shared.objects_write(), shared.handles_write())
        else {
            return 0;
        };
        let eligible: Vec<(ObjectId, Option<HandleId>)> = objects
            .iter()
            .filter(|(_, slot)| {
                !slot.wrapper_alive()
                    && slot.rooted.is_none()
                    && slot
                        .handle
                        .and_then(|h| handles.get(h))
                        .is_none_or(|h| h.lock_count() <= 0)
            })
            .map(|(id, slot)| (id, slot.handle))
            .collect();
        for (object, handle) in &eligible {
            objects.remove(*object);
            if let Some(handle) = handle {
                handles.unlink(*handle);
            }
        }
        drop(handles);
        drop(objects);
        if !eligible.is_empty() {
            Counters::bump(&shared.counters.swept_objects, eligible.len() as u64);
            tracing::trace!(swept = eligible.len(), "swept object slots");
        }
        eligible.len()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tether_core::ValueKind;
    use tether_test_utils::{MockNative, TestObject};

    use super::*;
    use crate::config::{EngineConfig, ViolationPolicy};

    fn engine() -> (Engine, Arc<MockNative>) {
        let native = Arc::new(MockNative::new());
        let config = EngineConfig {
            violation_policy: ViolationPolicy::Strict,
            ..EngineConfig::default()
        };
        (Engine::new(config, native.clone()).unwrap(), native)
    }

    #[test]
    fn orphan_requests_are_permitted() {
        let (engine, native) = engine();
        assert!(native.invoke_callback(HandleId::from_parts(42, 0).to_raw()));
        let bare = engine
            .register_handle(native.issue(), ValueKind::Object)
            .unwrap();
        assert!(native.invoke_callback(bare.to_raw()));
        assert_eq!(engine.metrics().orphan_requests, 2);

        // The unconnected handle is marked disposed once the drain runs.
        assert_eq!(engine.handle_state(bare), Some(tether_slots::HandleState::Active));
        assert_eq!(engine.process_pending(), 1);
        assert_eq!(engine.handle_state(bare), None);
    }

    #[test]
    fn unrooted_object_is_reclaimed() {
        let (engine, native) = engine();
        let wrapper = Arc::new(TestObject::new("a"));
        let object = engine.create_object(&wrapper).unwrap();
        let handle = engine
            .register_handle(native.issue(), ValueKind::Object)
            .unwrap();
        engine.connect(object, handle).unwrap();

        assert!(native.invoke_callback(handle.to_raw()));
        assert_eq!(engine.pending(), 1);
        engine.process_pending();
        assert_eq!(engine.handle_state(handle), None);
        assert_eq!(engine.object_handle(object), None);
        // The native side released it, not the host.
        assert!(native.released().is_empty());
    }

    #[test]
    fn rooted_object_with_live_wrapper_survives_and_is_unrooted() {
        let (engine, native) = engine();
        let wrapper = Arc::new(TestObject::new("a"));
        let object = engine.create_object(&wrapper).unwrap();
        let handle = engine
            .register_handle(native.issue(), ValueKind::Object)
            .unwrap();
        engine.connect(object, handle).unwrap();
        engine.make_rooted(object, handle).unwrap();

        assert!(!native.invoke_callback(handle.to_raw()));
        // Read-only until the drain.
        assert!(engine.is_rooted(object));
        assert_eq!(engine.lock_count(handle), Some(1));

        engine.process_pending();
        assert!(!engine.is_rooted(object));
        assert_eq!(engine.lock_count(handle), Some(0));
        assert_eq!(engine.handle_state(handle), Some(tether_slots::HandleState::Active));
    }

    #[test]
    fn rooted_object_with_dead_wrapper_is_reclaimed() {
        let (engine, native) = engine();
        let wrapper = Arc::new(TestObject::new("a"));
        let object = engine.create_object(&wrapper).unwrap();
        let handle = engine
            .register_handle(native.issue(), ValueKind::Object)
            .unwrap();
        engine.connect(object, handle).unwrap();
        engine.make_rooted(object, handle).unwrap();
        drop(wrapper);

        assert!(native.invoke_callback(handle.to_raw()));
        engine.process_pending();
        assert!(!engine.is_rooted(object));
        assert_eq!(engine.handle_state(handle), None);
        assert_eq!(engine.sweep(), 1);
        assert!(!engine.contains_object(object));
    }

    #[test]
    fn separately_rooted_handle_is_freed_with_its_object() {
        let (engine, native) = engine();
        let wrapper = Arc::new(TestObject::new("a"));
        let object = engine.create_object(&wrapper).unwrap();
        let handle = engine
            .register_handle(native.issue(), ValueKind::Object)
            .unwrap();
        engine.connect(object, handle).unwrap();
        let pin_value = native.issue();
        let pin = engine.register_handle(pin_value, ValueKind::Object).unwrap();
        engine.make_rooted(object, pin).unwrap();
        drop(wrapper);

        assert!(native.invoke_callback(handle.to_raw()));
        engine.process_pending();
        assert_eq!(engine.handle_state(handle), None);
        assert!(!engine.is_rooted(object));
        assert_eq!(engine.handle_state(pin), None);
        assert_eq!(native.released(), vec![pin_value]);
    }

    #[test]
    fn separately_rooted_handle_with_locks_survives() {
        let (engine, native) = engine();
        let wrapper = Arc::new(TestObject::new("a"));
        let object = engine.create_object(&wrapper).unwrap();
        let handle = engine
            .register_handle(native.issue(), ValueKind::Object)
            .unwrap();
        engine.connect(object, handle).unwrap();
        let pin = engine
            .register_handle(native.issue(), ValueKind::Object)
            .unwrap();
        engine.make_rooted(object, pin).unwrap();
        engine.inc_handle(pin).unwrap();
        drop(wrapper);

        assert!(!native.invoke_callback(handle.to_raw()));
        engine.process_pending();
        assert_eq!(engine.lock_count(pin), Some(1));
        assert_eq!(engine.handle_state(pin), Some(HandleState::Active));
        assert!(native.released().is_empty());
    }

    #[test]
    fn rooted_object_with_extra_locks_survives() {
        let (engine, native) = engine();
        let wrapper = Arc::new(TestObject::new("a"));
        let object = engine.create_object(&wrapper).unwrap();
        let handle = engine
            .register_handle(native.issue(), ValueKind::Object)
            .unwrap();
        engine.connect(object, handle).unwrap();
        engine.make_rooted(object, handle).unwrap();
        engine.inc_handle(handle).unwrap();
        drop(wrapper);

        assert!(!native.invoke_callback(handle.to_raw()));
        engine.process_pending();
        assert_eq!(engine.lock_count(handle), Some(1));
    }

    #[test]
    fn collect_loops_until_no_host_disposal() {
        let (engine, native) = engine();
        let mut handles = Vec::new();
        for _ in 0..3 {
            let h = engine
                .register_handle(native.issue(), ValueKind::Object)
                .unwrap();
            let w = Arc::new(TestObject::new("x"));
            let o = engine.create_object(&w).unwrap();
            engine.connect(o, h).unwrap();
            native.mark_unreachable(h.to_raw());
            handles.push(h);
        }
        let summary = engine.collect();
        // First pass reclaims all three; the second finds nothing.
        assert_eq!(summary.passes, 2);
        assert_eq!(summary.processed, 3);
        assert_eq!(summary.swept, 3);
        assert!(handles.iter().all(|h| engine.handle_state(*h).is_none()));
        assert_eq!(engine.collect_if_disposed(), None);
    }

    #[test]
    fn collect_is_bounded() {
        let native = Arc::new(MockNative::new());
        let config = EngineConfig {
            max_collection_passes: 1,
            ..EngineConfig::default()
        };
        let engine = Engine::new(config, native.clone()).unwrap();
        let h = engine
            .register_handle(native.issue(), ValueKind::Object)
            .unwrap();
        let w = Arc::new(TestObject::new("x"));
        let o = engine.create_object(&w).unwrap();
        engine.connect(o, h).unwrap();
        native.mark_unreachable(h.to_raw());
        assert_eq!(engine.collect().passes, 1);
    }

    #[test]
    fn poisoned_lock_fails_open() {
        let (engine, native) = engine();
        let handle = engine
            .register_handle(native.issue(), ValueKind::Object)
            .unwrap();
        let shared = engine.shared.clone();
        let _ = std::thread::spawn(move || {
            let _guard = shared.handles.write().unwrap();
            panic!("poison the handle table");
        })
        .join();

        assert!(native.invoke_callback(handle.to_raw()));
        assert_eq!(engine.metrics().fail_open_events, 1);
    }

    #[test]
    fn panic_in_decision_fails_open() {
        let (engine, _native) = engine();
        let permit = engine.shared.fail_open(0, |_| panic!("decision panicked"));
        assert!(permit);
        assert_eq!(engine.metrics().fail_open_events, 1);
    }
}

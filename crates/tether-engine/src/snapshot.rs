//! Memory snapshots and leak detection.
//!
//! A [`MemorySnapshot`] records which handles and objects are live at one
//! moment, plus how many times each handle is declared as some live
//! wrapper's child. Named snapshots
//! are stored in the engine; [`Engine::check_for_leaks`] forces collection,
//! captures a fresh snapshot and reports every handle or object that is new
//! since the stored one and holds more locks than its rooting and declared
//! children explain.
//!
//! The expected lock count of a handle is `(1 if rooted) + parents`, where
//! `parents` counts the live wrappers that list the handle among their
//! declared children. Any lock beyond that is unexplained and reported.

use std::collections::HashSet;
use std::sync::Weak;

use indexmap::{IndexMap, IndexSet};
use tether_core::{
    BridgeError, EntityId, HandleId, HostObject, LeakEntry, LeakGranularity, LeakReport,
    NativeRef, ObjectId, ValueKind,
};
use tether_slots::Lockable;

use crate::engine::Engine;

/// Live handles and objects at one moment.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MemorySnapshot {
    handles: IndexSet<HandleId>,
    objects: IndexSet<ObjectId>,
    child_counts: IndexMap<HandleId, u32>,
}

impl MemorySnapshot {
    /// Live handle ids, in table order.
    pub fn handles(&self) -> &IndexSet<HandleId> {
        &self.handles
    }

    /// Live object ids (objects with a connected handle), in table order.
    pub fn objects(&self) -> &IndexSet<ObjectId> {
        &self.objects
    }

    /// How many live wrappers declare `handle` as one of their children.
    pub fn child_count(&self, handle: HandleId) -> u32 {
        self.child_counts.get(&handle).copied().unwrap_or(0)
    }

    /// Treat `entity` as already present.
    fn exempt(&mut self, entity: EntityId) {
        self.handles.insert(entity.handle);
        if let Some(object) = entity.object {
            self.objects.insert(object);
        }
    }
}

/// Lifecycle of a named snapshot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SnapshotState {
    /// Captured, not yet compared.
    Registered,
    /// Compared at least once by a leak check.
    Compared,
}

struct StoredSnapshot {
    snapshot: MemorySnapshot,
    state: SnapshotState,
}

/// Named snapshots, in registration order.
#[derive(Default)]
pub(crate) struct SnapshotRegistry {
    entries: IndexMap<String, StoredSnapshot>,
    last: Option<String>,
}

impl SnapshotRegistry {
    pub(crate) fn clear(&mut self) {
        self.entries.clear();
        self.last = None;
    }
}

/// A leak found under the table locks, finished once they are released.
struct Suspect {
    granularity: LeakGranularity,
    handle: HandleId,
    object: Option<ObjectId>,
    lock_count: i32,
    expected: u32,
    native: NativeRef,
    kind: ValueKind,
}

impl Engine {
    /// Capture the live handles and objects.
    ///
    /// Ids are taken under both read locks at once; declared children are
    /// gathered afterwards from the wrappers that are still alive. Each
    /// declared child adds one to the tally of the child's own handle.
    pub fn capture_snapshot(&self) -> Result<MemorySnapshot, BridgeError> {
        let mut snapshot = MemorySnapshot::default();
        if self.shared.is_torn_down() {
            return Ok(snapshot);
        }
        let wrappers: Vec<Weak<dyn HostObject>> = {
            let objects = self.shared.objects_read()?;
            let handles = self.shared.handles_read()?;
            snapshot.handles = handles.iter_live().map(|(id, _)| id).collect();
            let mut wrappers = Vec::with_capacity(objects.len());
            for (id, slot) in objects.iter() {
                if slot.handle.is_some_and(|h| handles.get(h).is_some()) {
                    snapshot.objects.insert(id);
                }
                wrappers.push(slot.wrapper.clone());
            }
            wrappers
        };
        for wrapper in wrappers {
            let Some(wrapper) = wrapper.upgrade() else {
                continue;
            };
            let Some(info) = wrapper.declared_children() else {
                continue;
            };
            for child in info.child_ids() {
                *snapshot.child_counts.entry(child.handle).or_default() += 1;
            }
        }
        Ok(snapshot)
    }

    /// Capture and store a snapshot under `name`, replacing any previous
    /// one, and remember it as the last snapshot.
    ///
    /// Returns `None` when memory checks are disabled.
    pub fn make_snapshot(&self, name: &str) -> Result<Option<MemorySnapshot>, BridgeError> {
        if !self.shared.config.memory_checks || self.shared.is_torn_down() {
            return Ok(None);
        }
        let snapshot = self.capture_snapshot()?;
        let mut registry = self.snapshot_registry()?;
        registry.entries.insert(
            name.to_owned(),
            StoredSnapshot {
                snapshot: snapshot.clone(),
                state: SnapshotState::Registered,
            },
        );
        registry.last = Some(name.to_owned());
        tracing::debug!(
            name,
            handles = snapshot.handles.len(),
            objects = snapshot.objects.len(),
            "memory snapshot taken"
        );
        Ok(Some(snapshot))
    }

    /// Forget the snapshot named `name`. Returns whether it existed.
    pub fn remove_snapshot(&self, name: &str) -> bool {
        let Ok(mut registry) = self.snapshot_registry() else {
            return false;
        };
        let removed = registry.entries.shift_remove(name).is_some();
        if removed && registry.last.as_deref() == Some(name) {
            registry.last = None;
        }
        removed
    }

    /// The state of a stored snapshot; `None` once removed.
    pub fn snapshot_state(&self, name: &str) -> Option<SnapshotState> {
        Some(self.snapshot_registry().ok()?.entries.get(name)?.state)
    }

    /// Exempt `entity` from every stored snapshot's leak check. Returns the
    /// number of snapshots updated.
    pub fn add_to_snapshots(&self, entity: EntityId) -> usize {
        let Ok(mut registry) = self.snapshot_registry() else {
            return 0;
        };
        for stored in registry.entries.values_mut() {
            stored.snapshot.exempt(entity);
        }
        registry.entries.len()
    }

    /// Exempt `entity` from the most recently taken snapshot's leak check.
    /// Returns `false` if there is no such snapshot.
    pub fn add_to_last_snapshot(&self, entity: EntityId) -> bool {
        let Ok(mut registry) = self.snapshot_registry() else {
            return false;
        };
        let Some(last) = registry.last.clone() else {
            return false;
        };
        match registry.entries.get_mut(&last) {
            Some(stored) => {
                stored.snapshot.exempt(entity);
                true
            }
            None => false,
        }
    }

    /// Compare the live tables against the snapshot named `name`.
    ///
    /// Forces collection first. Every handle or object that is new since
    /// the snapshot and holds more locks than `(1 if rooted) + parents` is
    /// reported in a single [`BridgeError::LeakDetected`]. With
    /// `remove_after` the snapshot is forgotten whatever the outcome.
    pub fn check_for_leaks(&self, name: &str, remove_after: bool) -> Result<(), BridgeError> {
        let shared = &self.shared;
        if !shared.config.memory_checks || shared.is_torn_down() {
            return Ok(());
        }
        let before = match self.snapshot_registry()?.entries.get(name) {
            Some(stored) => stored.snapshot.clone(),
            None => {
                return Err(BridgeError::UnknownSnapshot {
                    name: name.to_owned(),
                })
            }
        };

        self.collect();
        let after = self.capture_snapshot()?;
        let suspects = self.find_suspects(&before, &after)?;

        let mut report = LeakReport::new(name);
        for suspect in suspects {
            report.push(self.describe(suspect));
        }

        if let Ok(mut registry) = self.snapshot_registry() {
            if remove_after {
                registry.entries.shift_remove(name);
                if registry.last.as_deref() == Some(name) {
                    registry.last = None;
                }
            } else if let Some(stored) = registry.entries.get_mut(name) {
                stored.state = SnapshotState::Compared;
            }
        }

        if report.is_empty() {
            tracing::debug!(name, "no memory leaks");
            Ok(())
        } else {
            tracing::warn!(
                name,
                handles = report.handles.len(),
                objects = report.objects.len(),
                "memory leaks detected"
            );
            Err(BridgeError::LeakDetected(report))
        }
    }

    fn snapshot_registry(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, SnapshotRegistry>, BridgeError> {
        self.shared
            .snapshots
            .lock()
            .map_err(|_| BridgeError::LockPoisoned { table: "snapshot" })
    }

    fn find_suspects(
        &self,
        before: &MemorySnapshot,
        after: &MemorySnapshot,
    ) -> Result<Vec<Suspect>, BridgeError> {
        let objects = self.shared.objects_read()?;
        let handles = self.shared.handles_read()?;
        let rooted: HashSet<HandleId> = objects.iter().filter_map(|(_, o)| o.rooted).collect();
        let mut suspects = Vec::new();

        for &handle in after.handles.difference(&before.handles) {
            let Some(slot) = handles.get(handle) else {
                continue;
            };
            let expected = u32::from(rooted.contains(&handle)) + after.child_count(handle);
            if slot.lock_count() > expected as i32 {
                suspects.push(Suspect {
                    granularity: LeakGranularity::Handle,
                    handle,
                    object: slot.object,
                    lock_count: slot.lock_count(),
                    expected,
                    native: slot.native(),
                    kind: slot.kind(),
                });
            }
        }

        for &object in after.objects.difference(&before.objects) {
            let Some(owner) = objects.get(object) else {
                continue;
            };
            let Some((handle, slot)) = owner.handle.and_then(|h| handles.get(h).map(|s| (h, s)))
            else {
                continue;
            };
            let expected = u32::from(owner.rooted.is_some()) + after.child_count(handle);
            if slot.lock_count() > expected as i32 {
                suspects.push(Suspect {
                    granularity: LeakGranularity::Object,
                    handle,
                    object: Some(object),
                    lock_count: slot.lock_count(),
                    expected,
                    native: slot.native(),
                    kind: slot.kind(),
                });
            }
        }
        Ok(suspects)
    }

    /// Turn a suspect into a report entry. Runs with no lock held.
    fn describe(&self, suspect: Suspect) -> LeakEntry {
        let wrapper: Option<std::sync::Arc<dyn HostObject>> =
            suspect.object.and_then(|o| self.get_object(o));
        let summary = wrapper
            .as_ref()
            .and_then(|w| w.declared_children().map(|info| info.summary()))
            .unwrap_or_else(|| format!("{} handle", suspect.kind));
        let value = if self.shared.config.stringify_leaks {
            self.shared.native.stringify(suspect.native)
        } else {
            None
        };
        LeakEntry {
            granularity: suspect.granularity,
            handle: suspect.handle,
            object: suspect.object,
            lock_count: suspect.lock_count,
            expected: suspect.expected,
            summary,
            value,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tether_core::SlotKey;
    use tether_test_utils::{MockNative, TestObject};

    use super::*;
    use crate::config::{EngineConfig, ViolationPolicy};

    fn engine_with(config: EngineConfig) -> (Engine, Arc<MockNative>) {
        let native = Arc::new(MockNative::new());
        (Engine::new(config, native.clone()).unwrap(), native)
    }

    fn engine() -> (Engine, Arc<MockNative>) {
        engine_with(EngineConfig {
            violation_policy: ViolationPolicy::Strict,
            ..EngineConfig::default()
        })
    }

    #[test]
    fn identical_snapshots_report_nothing() {
        let (engine, native) = engine();
        let _h = engine.register_handle(native.issue(), ValueKind::Object);
        engine.make_snapshot("before").unwrap();
        assert_eq!(engine.check_for_leaks("before", false), Ok(()));
        assert_eq!(
            engine.snapshot_state("before"),
            Some(SnapshotState::Compared)
        );
    }

    #[test]
    fn unknown_snapshot_is_an_error() {
        let (engine, _native) = engine();
        assert_eq!(
            engine.check_for_leaks("missing", false),
            Err(BridgeError::UnknownSnapshot {
                name: "missing".into()
            })
        );
    }

    #[test]
    fn disabled_checks_are_silent() {
        let (engine, native) = engine_with(EngineConfig {
            memory_checks: false,
            ..EngineConfig::default()
        });
        assert_eq!(engine.make_snapshot("before"), Ok(None));
        let h = engine
            .register_handle(native.issue(), ValueKind::Object)
            .unwrap();
        engine.inc_handle(h).unwrap();
        assert_eq!(engine.check_for_leaks("before", true), Ok(()));
    }

    #[test]
    fn locked_bare_handle_is_reported() {
        let (engine, native) = engine();
        engine.make_snapshot("before").unwrap();
        let h = engine
            .register_handle(native.issue(), ValueKind::Object)
            .unwrap();
        engine.inc_handle(h).unwrap();
        match engine.check_for_leaks("before", true) {
            Err(BridgeError::LeakDetected(report)) => {
                assert_eq!(report.snapshot, "before");
                assert_eq!(report.handles.len(), 1);
                assert!(report.objects.is_empty());
                let entry = &report.handles[0];
                assert_eq!(entry.handle, h);
                assert_eq!(entry.lock_count, 1);
                assert_eq!(entry.expected, 0);
                assert_eq!(entry.summary, "object handle");
            }
            other => panic!("expected a leak, got {other:?}"),
        }
        assert_eq!(engine.snapshot_state("before"), None);
    }

    #[test]
    fn exempted_entity_is_not_reported() {
        let (engine, native) = engine();
        engine.make_snapshot("before").unwrap();
        let h = engine
            .register_handle(native.issue(), ValueKind::Object)
            .unwrap();
        engine.inc_handle(h).unwrap();
        assert!(engine.add_to_last_snapshot(EntityId::handle(h)));
        assert_eq!(engine.check_for_leaks("before", false), Ok(()));
    }

    #[test]
    fn add_to_snapshots_updates_all() {
        let (engine, native) = engine();
        engine.make_snapshot("a").unwrap();
        engine.make_snapshot("b").unwrap();
        let h = engine
            .register_handle(native.issue(), ValueKind::Object)
            .unwrap();
        engine.inc_handle(h).unwrap();
        assert_eq!(engine.add_to_snapshots(EntityId::handle(h)), 2);
        assert_eq!(engine.check_for_leaks("a", true), Ok(()));
        assert_eq!(engine.check_for_leaks("b", true), Ok(()));
    }

    #[test]
    fn remake_replaces_and_remove_forgets() {
        let (engine, native) = engine();
        engine.make_snapshot("s").unwrap();
        let h = engine
            .register_handle(native.issue(), ValueKind::Object)
            .unwrap();
        engine.inc_handle(h).unwrap();
        let again = engine.make_snapshot("s").unwrap().unwrap();
        assert!(again.handles().contains(&h));
        assert_eq!(engine.check_for_leaks("s", false), Ok(()));

        assert!(engine.remove_snapshot("s"));
        assert!(!engine.remove_snapshot("s"));
        assert!(!engine.add_to_last_snapshot(EntityId::handle(h)));
    }

    #[test]
    fn stringified_values_are_attached() {
        let (engine, native) = engine_with(EngineConfig {
            stringify_leaks: true,
            violation_policy: ViolationPolicy::Strict,
            ..EngineConfig::default()
        });
        engine.make_snapshot("before").unwrap();
        let value = native.issue();
        native.set_string(value, "[object Object]");
        let h = engine.register_handle(value, ValueKind::Object).unwrap();
        engine.inc_handle(h).unwrap();
        let Err(BridgeError::LeakDetected(report)) = engine.check_for_leaks("before", false)
        else {
            panic!("expected a leak");
        };
        assert_eq!(report.handles[0].value.as_deref(), Some("[object Object]"));
    }

    #[test]
    fn children_are_tallied_on_the_child_handle() {
        let (engine, native) = engine();
        let parent = Arc::new(TestObject::new("parent"));
        let p = engine.create_object(&parent).unwrap();
        let ph = engine
            .register_handle(native.issue(), ValueKind::Object)
            .unwrap();
        engine.connect(p, ph).unwrap();
        parent.set_self_id(EntityId::object(ph, p));
        let first = HandleId::from_parts(99, 0);
        let second = HandleId::from_parts(98, 0);
        parent.add_child(EntityId::handle(first));
        parent.add_child(EntityId::handle(second));

        // A second parent declaring the same child adds to its tally.
        let other = Arc::new(TestObject::new("other"));
        engine.create_object(&other).unwrap();
        other.add_child(EntityId::handle(first));

        let snapshot = engine.capture_snapshot().unwrap();
        assert_eq!(snapshot.child_count(first), 2);
        assert_eq!(snapshot.child_count(second), 1);
        assert_eq!(snapshot.child_count(ph), 0);
        assert!(snapshot.objects().contains(&p));
        assert!(snapshot.handles().contains(&ph));
    }

    #[test]
    fn repeated_capture_is_stable() {
        let (engine, native) = engine();
        let parent = Arc::new(TestObject::new("parent"));
        let p = engine.create_object(&parent).unwrap();
        let ph = engine
            .register_handle(native.issue(), ValueKind::Object)
            .unwrap();
        engine.connect(p, ph).unwrap();
        let child = Arc::new(TestObject::new("child"));
        let c = engine.create_object(&child).unwrap();
        let ch = engine
            .register_handle(native.issue(), ValueKind::Object)
            .unwrap();
        engine.connect(c, ch).unwrap();
        engine.make_rooted(c, ch).unwrap();
        parent.add_child(EntityId::object(ch, c));
        engine.register_handle(native.issue(), ValueKind::Number);

        let first = engine.capture_snapshot().unwrap();
        let second = engine.capture_snapshot().unwrap();
        assert_eq!(first, second);
        assert_eq!(first.handles().len(), 3);
        assert_eq!(first.objects().len(), 2);
        assert_eq!(first.child_count(ch), 1);
    }
}

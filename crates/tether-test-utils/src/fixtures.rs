//! Wrapper fixtures.
//!
//! [`TestObject`] is a host wrapper whose declared relationships can be
//! changed after construction and which counts teardown notifications.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use smallvec::SmallVec;
use tether_core::{DeclaredChildren, EntityId, HostObject};

/// A wrapper that declares its children to the leak detector.
pub struct TestObject {
    pub name: String,
    self_id: Mutex<Option<EntityId>>,
    parent: Mutex<Option<EntityId>>,
    children: Mutex<SmallVec<[EntityId; 4]>>,
    teardowns: AtomicUsize,
}

impl TestObject {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            self_id: Mutex::new(None),
            parent: Mutex::new(None),
            children: Mutex::new(SmallVec::new()),
            teardowns: AtomicUsize::new(0),
        }
    }

    pub fn set_self_id(&self, id: EntityId) {
        *crate::lock(&self.self_id) = Some(id);
    }

    pub fn set_parent(&self, id: EntityId) {
        *crate::lock(&self.parent) = Some(id);
    }

    /// Declare a child whose handle this wrapper holds one lock on.
    pub fn add_child(&self, id: EntityId) {
        crate::lock(&self.children).push(id);
    }

    pub fn clear_children(&self) {
        crate::lock(&self.children).clear();
    }

    /// Number of [`HostObject::on_teardown`] calls received.
    pub fn teardown_calls(&self) -> usize {
        self.teardowns.load(Ordering::Relaxed)
    }
}

impl DeclaredChildren for TestObject {
    fn self_id(&self) -> Option<EntityId> {
        *crate::lock(&self.self_id)
    }

    fn parent_id(&self) -> Option<EntityId> {
        *crate::lock(&self.parent)
    }

    fn child_ids(&self) -> SmallVec<[EntityId; 4]> {
        crate::lock(&self.children).clone()
    }

    fn summary(&self) -> String {
        format!("TestObject({})", self.name)
    }
}

impl HostObject for TestObject {
    fn declared_children(&self) -> Option<&dyn DeclaredChildren> {
        Some(self)
    }

    fn on_teardown(&self) {
        self.teardowns.fetch_add(1, Ordering::Relaxed);
    }
}

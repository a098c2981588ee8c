//! An explicit registry of engines.
//!
//! Engines are held weakly: registering an engine does not keep it alive, and
//! a registry lookup never resurrects one that has been torn down.

use std::sync::{PoisonError, RwLock, Weak};

use tether_core::EngineId;
use tether_slots::SlotTable;

use crate::engine::{Engine, EngineShared};

/// Weak, id-addressed references to live engines.
#[derive(Default)]
pub struct EngineRegistry {
    engines: RwLock<SlotTable<EngineId, Weak<EngineShared>>>,
}

impl EngineRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Track `engine` and return its id.
    pub fn register(&self, engine: &Engine) -> EngineId {
        let id = self
            .engines
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(std::sync::Arc::downgrade(&engine.shared));
        tracing::debug!(engine = %id, "engine registered");
        id
    }

    /// The engine behind `id`, unless it has been dropped or torn down.
    pub fn get(&self, id: EngineId) -> Option<Engine> {
        let shared = self.engines.read().ok()?.get(id)?.upgrade()?;
        (!shared.is_torn_down()).then_some(Engine { shared })
    }

    /// Stop tracking `id`. Returns whether it was tracked.
    pub fn unregister(&self, id: EngineId) -> bool {
        self.engines
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id)
            .is_some()
    }

    /// Number of tracked ids, including engines that have since died.
    pub fn len(&self) -> usize {
        self.engines
            .read()
            .map(|t| t.len())
            .unwrap_or_default()
    }

    /// Whether no id is tracked.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Tear down every tracked engine that is still alive and forget all
    /// ids. Returns the number of engines torn down.
    pub fn teardown_all(&self) -> usize {
        let drained = self
            .engines
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .drain();
        let mut count = 0;
        for (id, weak) in drained {
            if let Some(shared) = weak.upgrade() {
                if !shared.is_torn_down() {
                    shared.teardown();
                    count += 1;
                    tracing::debug!(engine = %id, "engine torn down by registry");
                }
            }
        }
        count
    }
}

impl std::fmt::Debug for EngineRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineRegistry")
            .field("len", &self.len())
            .finish()
    }
}

//! Benchmark profiles for the Tether lifetime bridge.
//!
//! - [`populated_engine`]: an engine with `n` connected wrapper/handle pairs
//! - [`garbage_profile`]: a populated engine whose wrappers are all dropped
//!   and whose handles are all offered to the collector

#![forbid(unsafe_code)]
#![deny(rustdoc::broken_intra_doc_links)]

use std::sync::Arc;

use tether_core::{HandleId, ObjectId, SlotKey, ValueKind};
use tether_engine::{Engine, EngineConfig, ViolationPolicy};
use tether_test_utils::{MockNative, TestObject};

/// An engine, its mock runtime and the pairs registered with it.
pub struct Profile {
    /// The engine under test.
    pub engine: Engine,
    /// The runtime the engine reports to.
    pub native: Arc<MockNative>,
    /// Live wrappers, in registration order. Empty for [`garbage_profile`].
    pub wrappers: Vec<Arc<TestObject>>,
    /// Connected `(object, handle)` pairs, in registration order.
    pub pairs: Vec<(ObjectId, HandleId)>,
}

/// Configuration used by every profile: leak checks on, lenient policy so
/// a benchmark never stops on a counting mistake.
pub fn bench_config(capacity: usize) -> EngineConfig {
    EngineConfig {
        initial_object_capacity: capacity,
        initial_handle_capacity: capacity,
        violation_policy: ViolationPolicy::Lenient,
        ..EngineConfig::default()
    }
}

/// Build an engine holding `n` connected wrapper/handle pairs. Every
/// `root_every`-th object (if non-zero) is rooted.
pub fn populated_engine(n: usize, root_every: usize) -> Profile {
    let native = Arc::new(MockNative::new());
    let engine = match Engine::new(bench_config(n), native.clone()) {
        Ok(engine) => engine,
        Err(e) => panic!("bench config rejected: {e}"),
    };
    let mut wrappers = Vec::with_capacity(n);
    let mut pairs = Vec::with_capacity(n);
    for i in 0..n {
        let wrapper = Arc::new(TestObject::new(format!("bench-{i}")));
        let (Some(object), Some(handle)) = (
            engine.create_object(&wrapper),
            engine.register_handle(native.issue(), ValueKind::Object),
        ) else {
            panic!("engine torn down during setup");
        };
        if let Err(e) = engine.connect(object, handle) {
            panic!("connect failed during setup: {e}");
        }
        if root_every != 0 && i % root_every == 0 {
            let _ = engine.make_rooted(object, handle);
        }
        wrappers.push(wrapper);
        pairs.push((object, handle));
    }
    Profile {
        engine,
        native,
        wrappers,
        pairs,
    }
}

/// A populated engine with every wrapper dropped and every handle marked
/// unreachable, ready for [`Engine::collect`].
pub fn garbage_profile(n: usize) -> Profile {
    let mut profile = populated_engine(n, 0);
    profile.wrappers.clear();
    for &(_, handle) in &profile.pairs {
        profile.native.mark_unreachable(handle.to_raw());
    }
    profile
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn populated_engine_has_requested_shape() {
        let profile = populated_engine(10, 3);
        assert_eq!(profile.pairs.len(), 10);
        assert_eq!(profile.engine.metrics().objects_rooted, 4);
        assert_eq!(profile.engine.handle_counts().active, 10);
    }

    #[test]
    fn garbage_profile_is_fully_collectible() {
        let profile = garbage_profile(32);
        let summary = profile.engine.collect();
        assert_eq!(summary.processed, 32);
        assert_eq!(summary.swept, 32);
        assert_eq!(profile.engine.handle_counts().active, 0);
    }
}

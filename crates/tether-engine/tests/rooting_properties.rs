//! Property tests for the rooting protocol.
//!
//! A random sequence of root, unroot, inc and dec operations is applied to
//! one connected object while a model tracks the expected rooting and lock
//! count. The wrapper stays alive throughout, so unrooting never frees the
//! handle.

use std::sync::Arc;

use proptest::prelude::*;
use tether_core::{BridgeError, ProtocolViolation, ValueKind};
use tether_engine::{Engine, EngineConfig, ViolationPolicy};
use tether_slots::HandleState;
use tether_test_utils::{MockNative, TestObject};

#[derive(Clone, Debug)]
enum Op {
    Root,
    Unroot,
    Inc,
    Dec,
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        Just(Op::Root),
        Just(Op::Unroot),
        Just(Op::Inc),
        Just(Op::Dec),
    ]
}

fn strict_engine() -> (Engine, Arc<MockNative>) {
    let native = Arc::new(MockNative::new());
    let config = EngineConfig {
        violation_policy: ViolationPolicy::Strict,
        ..EngineConfig::default()
    };
    (Engine::new(config, native.clone()).unwrap(), native)
}

proptest! {
    #[test]
    fn lock_count_matches_model(ops in prop::collection::vec(op_strategy(), 1..64)) {
        let (engine, native) = strict_engine();
        let wrapper = Arc::new(TestObject::new("subject"));
        let object = engine.create_object(&wrapper).unwrap();
        let handle = engine.register_handle(native.issue(), ValueKind::Object).unwrap();
        engine.connect(object, handle).unwrap();

        let mut rooted = false;
        let mut extra: i32 = 0;

        for op in &ops {
            match op {
                Op::Root => {
                    prop_assert_eq!(engine.make_rooted(object, handle), Ok(!rooted));
                    rooted = true;
                }
                Op::Unroot => {
                    // Not rooted: trivially done. Rooted: the wrapper is
                    // alive, so the handle survives.
                    prop_assert_eq!(engine.unroot(object), Ok(!rooted));
                    rooted = false;
                }
                Op::Inc => {
                    prop_assert_eq!(engine.inc_handle(handle), Ok(()));
                    extra += 1;
                }
                Op::Dec => {
                    let total = extra + i32::from(rooted);
                    if total == 0 {
                        prop_assert_eq!(
                            engine.dec_handle(handle),
                            Err(BridgeError::Protocol(
                                ProtocolViolation::DecrementBelowBaseline { count: 0 }
                            ))
                        );
                    } else if extra > 0 {
                        prop_assert_eq!(engine.dec_handle(handle), Ok(()));
                        extra -= 1;
                    }
                }
            }
            prop_assert_eq!(engine.lock_count(handle), Some(extra + i32::from(rooted)));
            prop_assert_eq!(engine.is_rooted(object), rooted);
            prop_assert_eq!(engine.handle_state(handle), Some(HandleState::Active));
        }
        prop_assert!(native.released().is_empty());
    }

    #[test]
    fn unroot_frees_only_when_nothing_else_holds(extra in 0i32..4) {
        let (engine, native) = strict_engine();
        let wrapper = Arc::new(TestObject::new("subject"));
        let object = engine.create_object(&wrapper).unwrap();
        let handle = engine.register_handle(native.issue(), ValueKind::Object).unwrap();
        engine.connect(object, handle).unwrap();

        prop_assert_eq!(engine.make_rooted(object, handle), Ok(true));
        for _ in 0..extra {
            engine.inc_handle(handle).unwrap();
        }
        drop(wrapper);

        let freed = engine.unroot(object).unwrap();
        prop_assert_eq!(freed, extra == 0);
        if freed {
            prop_assert_eq!(engine.handle_state(handle), None);
            prop_assert_eq!(native.released().len(), 1);
        } else {
            prop_assert_eq!(engine.lock_count(handle), Some(extra));
            prop_assert!(native.released().is_empty());
        }
        prop_assert!(!engine.is_rooted(object));
    }
}

#[test]
fn root_then_unroot_restores_baseline() {
    let (engine, native) = strict_engine();
    let wrapper = Arc::new(TestObject::new("subject"));
    let object = engine.create_object(&wrapper).unwrap();
    let handle = engine
        .register_handle(native.issue(), ValueKind::Object)
        .unwrap();
    engine.connect(object, handle).unwrap();

    for _ in 0..3 {
        assert_eq!(engine.make_rooted(object, handle), Ok(true));
        assert_eq!(engine.make_rooted(object, handle), Ok(false));
        assert_eq!(engine.lock_count(handle), Some(1));
        assert_eq!(engine.unroot(object), Ok(false));
        assert_eq!(engine.lock_count(handle), Some(0));
    }
    assert_eq!(engine.unroot(object), Ok(true));
}

#[test]
fn lenient_policy_keeps_counts_in_bounds() {
    let native = Arc::new(MockNative::new());
    let config = EngineConfig {
        violation_policy: ViolationPolicy::Lenient,
        ..EngineConfig::default()
    };
    let engine = Engine::new(config, native.clone()).unwrap();
    let handle = engine
        .register_handle(native.issue(), ValueKind::Object)
        .unwrap();
    for _ in 0..5 {
        assert_eq!(engine.dec_handle(handle), Ok(()));
    }
    assert_eq!(engine.lock_count(handle), Some(0));
    engine.inc_handle(handle).unwrap();
    assert_eq!(engine.lock_count(handle), Some(1));
}

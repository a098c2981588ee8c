//! Tether: a lifetime bridge between host-side wrapper objects and the
//! values of an embedded garbage-collected engine.
//!
//! This is the top-level facade crate that re-exports the public API from
//! all Tether sub-crates.
//!
//! # Quick start
//!
//! ```rust
//! use std::sync::{Arc, Mutex};
//!
//! use tether::prelude::*;
//!
//! // A runtime whose collector never reclaims anything.
//! #[derive(Default)]
//! struct Idle {
//!     callback: Mutex<Option<CollectionCallback>>,
//! }
//!
//! impl NativeRuntime for Idle {
//!     fn register_collection_callback(&self, callback: CollectionCallback) {
//!         *self.callback.lock().unwrap() = Some(callback);
//!     }
//!     fn force_collection(&self) {}
//!     fn release(&self, _value: NativeRef) {}
//! }
//!
//! struct Widget;
//! impl HostObject for Widget {}
//!
//! let engine = Engine::new(EngineConfig::default(), Arc::new(Idle::default())).unwrap();
//! let widget = Arc::new(Widget);
//! let object = engine.create_object(&widget).unwrap();
//! let handle = engine.register_handle(NativeRef(0x10), ValueKind::Object).unwrap();
//! engine.connect(object, handle).unwrap();
//!
//! // Pin the native value while the host needs it.
//! assert!(engine.make_rooted(object, handle).unwrap());
//! assert_eq!(engine.lock_count(handle), Some(1));
//!
//! // Drop the wrapper, then the pin: the handle is freed.
//! drop(widget);
//! assert!(engine.unroot(object).unwrap());
//! assert_eq!(engine.lock_count(handle), None);
//! ```
//!
//! # Modules
//!
//! | Module | Sub-crate | Contents |
//! |--------|-----------|----------|
//! | [`types`] | `tether-core` | Ids, value kinds, errors, leak reports, collaborator traits |
//! | [`slots`] | `tether-slots` | Generational slot table, handle table, counted references |
//! | [`engine`] | `tether-engine` | Engine, rooting, collection bridge, snapshots, registry |

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

/// Ids, value kinds, errors and collaborator traits (`tether-core`).
///
/// The traits a host implements live here: [`types::NativeRuntime`] for the
/// embedded engine and [`types::HostObject`] for wrappers.
pub use tether_core as types;

/// Generational tables and counted references (`tether-slots`).
pub use tether_slots as slots;

/// The lifetime bridge engine (`tether-engine`).
///
/// [`engine::Engine`] owns both tables; [`engine::EngineRegistry`] tracks
/// several engines by id.
pub use tether_engine as engine;

/// Common imports for typical Tether usage.
///
/// ```rust
/// use tether::prelude::*;
/// ```
pub mod prelude {
    // Ids and kinds
    pub use tether_core::{EntityId, HandleId, NativeRef, ObjectId, SlotKey, ValueKind};

    // Errors and reports
    pub use tether_core::{BridgeError, LeakEntry, LeakReport, ProtocolViolation};

    // Collaborator traits
    pub use tether_core::{CollectionCallback, DeclaredChildren, HostObject, NativeRuntime};

    // Tables
    pub use tether_slots::HandleState;

    // Engine
    pub use tether_engine::{
        BridgeMetrics, CollectionSummary, Engine, EngineConfig, EngineRegistry, MemorySnapshot,
        ViolationPolicy,
    };
}

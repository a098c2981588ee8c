//! The Tether lifetime bridge engine.
//!
//! An [`Engine`] keeps host-side wrappers and native handles in a consistent
//! liveness relationship:
//!
//! - **Rooting**: [`Engine::make_rooted`] pins a native handle on behalf of a
//!   host object; [`Engine::unroot`] releases the pin and frees the handle
//!   once both sides are done with it.
//! - **Collection bridge**: the callback registered with the
//!   [`NativeRuntime`](tether_core::NativeRuntime) decides, per candidate
//!   handle, whether the native collector may reclaim it. Bookkeeping is
//!   deferred to [`Engine::process_pending`] so the callback never takes a
//!   write lock.
//! - **Leak detection**: named snapshots of both tables, diffed by
//!   [`Engine::check_for_leaks`].
//!
//! Multiple engines can be tracked through an explicit [`EngineRegistry`].

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod bridge;
pub mod config;
pub mod engine;
pub mod metrics;
pub mod registry;
pub mod rooting;
pub mod snapshot;

pub use bridge::CollectionSummary;
pub use config::{ConfigError, EngineConfig, ViolationPolicy};
pub use engine::Engine;
pub use metrics::BridgeMetrics;
pub use registry::EngineRegistry;
pub use snapshot::{MemorySnapshot, SnapshotState};

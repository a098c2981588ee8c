//! Core types and traits for the Tether lifetime bridge.
//!
//! This is the leaf crate with zero internal dependencies. It defines
//! the vocabulary shared by the slot tables, the engine and any native
//! runtime binding: generational IDs, value-kind tags, error types,
//! leak reports, and the collaborator traits the bridge consumes.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod error;
pub mod id;
pub mod kind;
pub mod report;
pub mod traits;

pub use error::{BridgeError, ProtocolViolation};
pub use id::{EngineId, EntityId, HandleId, NativeRef, ObjectId, SlotKey};
pub use kind::ValueKind;
pub use report::{LeakEntry, LeakGranularity, LeakReport};
pub use traits::{CollectionCallback, DeclaredChildren, HostObject, NativeRuntime};

//! Slot storage for the Tether lifetime bridge.
//!
//! Three building blocks, none of which lock or log on the hot lookup path:
//!
//! - [`SlotTable`]: a generational arena keyed by any [`SlotKey`] id.
//! - [`CountedReference`]: a weak target plus a protocol-checked lock count.
//! - [`HandleTable`]: the native-handle table with its
//!   `Active → Disposing → Disposed` lifecycle.
//!
//! The tables are plain data. Callers that share them across threads wrap
//! each one in its own `RwLock`.
//!
//! [`SlotKey`]: tether_core::SlotKey

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod counted;
pub mod handle_table;
pub mod slot_table;

pub use counted::{CountedReference, UNDEFINED_LOCK_COUNT};
pub use handle_table::{DisposedHandle, HandleCounts, HandleSlot, HandleState, HandleTable};
pub use slot_table::{Lockable, SlotTable};

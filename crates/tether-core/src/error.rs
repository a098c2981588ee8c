//! Error types for the lifetime bridge.
//!
//! Two layers: [`ProtocolViolation`] for misuse of the lock-count protocol
//! (raised by the slot tables themselves) and [`BridgeError`] for everything
//! an engine operation can report to its caller.

use std::error::Error;
use std::fmt;

use crate::id::{HandleId, ObjectId};
use crate::kind::ValueKind;
use crate::report::LeakReport;

/// Misuse of the lock-count protocol.
///
/// Each variant carries the lock count observed at the point of failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProtocolViolation {
    /// `dec` was called on a count that was already at or below zero.
    DecrementBelowBaseline {
        /// The count before the rejected decrement.
        count: i32,
    },
    /// `inc` was called on a reference whose count had gone negative.
    IncrementAfterDispose {
        /// The count before the rejected increment.
        count: i32,
    },
    /// A locked reference was reinitialized or reset.
    ReinitializeLocked {
        /// The outstanding lock count.
        count: i32,
    },
    /// A locked slot was removed.
    RemoveLocked {
        /// The outstanding lock count.
        count: i32,
    },
}

impl fmt::Display for ProtocolViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DecrementBelowBaseline { count } => {
                write!(f, "lock count decremented below baseline (count was {count})")
            }
            Self::IncrementAfterDispose { count } => {
                write!(f, "lock count incremented after dispose (count was {count})")
            }
            Self::ReinitializeLocked { count } => {
                write!(f, "cannot reinitialize a locked reference (count is {count})")
            }
            Self::RemoveLocked { count } => {
                write!(f, "cannot remove a locked slot (count is {count})")
            }
        }
    }
}

impl Error for ProtocolViolation {}

/// Errors returned by engine operations.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BridgeError {
    /// The lock-count protocol was violated.
    Protocol(ProtocolViolation),
    /// The object id no longer resolves (removed or generation mismatch).
    StaleObject {
        /// The stale id.
        object: ObjectId,
    },
    /// The handle id no longer resolves (disposed or generation mismatch).
    StaleHandle {
        /// The stale id.
        handle: HandleId,
    },
    /// A wrapper was connected to a handle that does not hold an object.
    NotAnObject {
        /// The handle.
        handle: HandleId,
        /// Its value kind.
        kind: ValueKind,
    },
    /// The handle or the object is already part of a connection.
    AlreadyConnected {
        /// The handle.
        handle: HandleId,
        /// The object.
        object: ObjectId,
    },
    /// No snapshot is registered under the given name.
    UnknownSnapshot {
        /// The requested name.
        name: String,
    },
    /// A leak check found handles or objects that outlived the snapshot.
    LeakDetected(LeakReport),
    /// A table lock was poisoned by a panic on another thread.
    LockPoisoned {
        /// Which table.
        table: &'static str,
    },
}

impl fmt::Display for BridgeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Protocol(v) => write!(f, "protocol violation: {v}"),
            Self::StaleObject { object } => write!(f, "stale object id {object}"),
            Self::StaleHandle { handle } => write!(f, "stale handle id {handle}"),
            Self::NotAnObject { handle, kind } => {
                write!(f, "handle {handle} holds a {kind} value, not an object")
            }
            Self::AlreadyConnected { handle, object } => {
                write!(f, "handle {handle} or object {object} is already connected")
            }
            Self::UnknownSnapshot { name } => write!(f, "no memory snapshot named '{name}'"),
            Self::LeakDetected(report) => write!(f, "{report}"),
            Self::LockPoisoned { table } => write!(f, "{table} table lock poisoned"),
        }
    }
}

impl Error for BridgeError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Protocol(v) => Some(v),
            _ => None,
        }
    }
}

impl From<ProtocolViolation> for BridgeError {
    fn from(v: ProtocolViolation) -> Self {
        Self::Protocol(v)
    }
}

//! Lock-counted weak references.
//!
//! A [`CountedReference`] pairs a weak target with an `i32` lock count. The
//! count starts at 0 (baseline) when tracking begins and is moved by
//! [`inc`](CountedReference::inc) and [`dec`](CountedReference::dec). The
//! sentinel [`UNDEFINED_LOCK_COUNT`] marks a reference that takes no part
//! in counting; arithmetic on it is inert.
//!
//! Misuse is never clamped away. A decrement at or below baseline, or an
//! increment of a disposed (negative) count, returns a [`ProtocolViolation`].

use std::sync::{Arc, Weak};

use tether_core::ProtocolViolation;

use crate::slot_table::Lockable;

/// Lock count of a reference that is not participating in counting.
pub const UNDEFINED_LOCK_COUNT: i32 = -999;

/// A weak reference with a protocol-checked lock count.
pub struct CountedReference<T: ?Sized> {
    target: Option<Weak<T>>,
    count: i32,
}

impl<T: ?Sized> CountedReference<T> {
    /// A reference that does not participate in counting.
    pub const fn inert() -> Self {
        Self {
            target: None,
            count: UNDEFINED_LOCK_COUNT,
        }
    }

    /// A reference at baseline, optionally pointing at `target`.
    pub fn tracking(target: Option<Weak<T>>) -> Self {
        Self { target, count: 0 }
    }

    /// Restart tracking at baseline with a new target.
    pub fn reinitialize(&mut self, target: Option<Weak<T>>) -> Result<(), ProtocolViolation> {
        if self.is_locked() {
            return Err(ProtocolViolation::ReinitializeLocked { count: self.count });
        }
        self.target = target;
        self.count = 0;
        Ok(())
    }

    /// Drop the target and stop participating.
    pub fn reset(&mut self) -> Result<(), ProtocolViolation> {
        if self.is_locked() {
            return Err(ProtocolViolation::ReinitializeLocked { count: self.count });
        }
        self.abandon();
        Ok(())
    }

    /// Drop the target and stop participating regardless of outstanding
    /// locks. Returns the count that was abandoned.
    pub fn abandon(&mut self) -> i32 {
        self.target = None;
        std::mem::replace(&mut self.count, UNDEFINED_LOCK_COUNT)
    }

    /// Take one lock. Returns the new count.
    pub fn inc(&mut self) -> Result<i32, ProtocolViolation> {
        if self.count == UNDEFINED_LOCK_COUNT {
            return Ok(self.count);
        }
        if self.count < 0 {
            return Err(ProtocolViolation::IncrementAfterDispose { count: self.count });
        }
        self.count += 1;
        Ok(self.count)
    }

    /// Release one lock. Returns the new count.
    pub fn dec(&mut self) -> Result<i32, ProtocolViolation> {
        if self.count == UNDEFINED_LOCK_COUNT {
            return Ok(self.count);
        }
        if self.count <= 0 {
            return Err(ProtocolViolation::DecrementBelowBaseline { count: self.count });
        }
        self.count -= 1;
        Ok(self.count)
    }

    /// The raw lock count, possibly the sentinel.
    pub fn lock_count(&self) -> i32 {
        self.count
    }

    /// Whether the count is not the sentinel.
    pub fn is_participating(&self) -> bool {
        self.count != UNDEFINED_LOCK_COUNT
    }

    /// Upgrade the target, if it is set and still alive.
    pub fn target(&self) -> Option<Arc<T>> {
        self.target.as_ref()?.upgrade()
    }

    /// Whether the target is set and still alive. Never upgrades.
    pub fn has_live_target(&self) -> bool {
        self.target.as_ref().is_some_and(|w| w.strong_count() > 0)
    }

    /// Point at a different target without touching the count.
    pub fn retarget(&mut self, target: Option<Weak<T>>) {
        self.target = target;
    }
}

impl<T: ?Sized> Lockable for CountedReference<T> {
    fn lock_count(&self) -> i32 {
        self.count
    }
}

impl<T: ?Sized> Default for CountedReference<T> {
    fn default() -> Self {
        Self::inert()
    }
}

impl<T: ?Sized> std::fmt::Debug for CountedReference<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CountedReference")
            .field("count", &self.count)
            .field("has_target", &self.target.is_some())
            .finish()
    }
}

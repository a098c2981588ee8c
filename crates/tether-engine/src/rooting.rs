//! The rooting protocol.
//!
//! Rooting pins a native handle on behalf of a host object: the object's
//! slot records the handle as its *rooted handle* and the handle's lock
//! count carries exactly one extra lock for it. Unrooting removes that lock
//! exactly once and frees the handle if nothing else needs it.

use tether_core::{BridgeError, HandleId, ObjectId};
use tether_slots::HandleState;

use crate::engine::Engine;

impl Engine {
    /// Pin `handle` on behalf of `object`.
    ///
    /// Returns `Ok(false)` without touching anything if the object is
    /// already rooted or its id is stale. A stale or disposing handle is an
    /// error.
    pub fn make_rooted(&self, object: ObjectId, handle: HandleId) -> Result<bool, BridgeError> {
        let shared = &self.shared;
        if shared.is_torn_down() {
            return Ok(false);
        }
        let mut objects = shared.objects_write()?;
        let mut handles = shared.handles_write()?;
        let Some(slot) = objects.get_mut(object) else {
            return Ok(false);
        };
        let target = handles
            .get_mut(handle)
            .filter(|h| h.state() == HandleState::Active)
            .ok_or(BridgeError::StaleHandle { handle })?;
        if let Some(existing) = slot.rooted {
            tracing::debug!(%object, %existing, requested = %handle, "object already rooted");
            return Ok(false);
        }
        if let Err(v) = target.counted.inc() {
            return shared.violation(v, false);
        }
        slot.rooted = Some(handle);
        tracing::trace!(%object, %handle, "rooted");
        Ok(true)
    }

    /// Release the pin held on behalf of `object`.
    ///
    /// Returns `Ok(true)` if the object was not rooted. Otherwise the rooted
    /// handle's lock count drops by one and the result says whether the
    /// handle was then freed, which happens only when the count is back at
    /// baseline and the connected wrapper is gone. Stale ids return
    /// `Ok(false)`.
    pub fn unroot(&self, object: ObjectId) -> Result<bool, BridgeError> {
        let shared = &self.shared;
        if shared.is_torn_down() {
            return Ok(false);
        }
        let (handle, collectible) = {
            let mut objects = shared.objects_write()?;
            let mut handles = shared.handles_write()?;
            let Some(slot) = objects.get_mut(object) else {
                return Ok(false);
            };
            let Some(handle) = slot.rooted.take() else {
                return Ok(true);
            };
            let wrapper_alive = slot.wrapper_alive();
            let Some(target) = handles.get_mut(handle) else {
                tracing::warn!(%object, %handle, "rooted handle vanished before unroot");
                return Ok(true);
            };
            let count = match target.counted.dec() {
                Ok(count) => count,
                Err(v) => return shared.violation(v, false),
            };
            let collectible = count <= 0 && !wrapper_alive && !target.counted.has_live_target();
            (handle, collectible)
        };
        tracing::trace!(%object, %handle, collectible, "unrooted");
        if collectible {
            shared.free_handle(handle)
        } else {
            Ok(false)
        }
    }

    /// Whether `object` currently holds a rooted handle.
    pub fn is_rooted(&self, object: ObjectId) -> bool {
        self.shared
            .objects_read()
            .ok()
            .and_then(|o| o.get(object).map(|s| s.rooted.is_some()))
            .unwrap_or(false)
    }

    /// The handle rooted on behalf of `object`.
    pub fn rooted_handle(&self, object: ObjectId) -> Option<HandleId> {
        self.shared.objects_read().ok()?.get(object)?.rooted
    }
}

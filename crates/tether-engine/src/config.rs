//! Engine configuration, validation, and error types.

use std::error::Error;
use std::fmt;

// ── ViolationPolicy ───────────────────────────────────────────────

/// What an engine does when a caller breaks the lock-count protocol.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ViolationPolicy {
    /// Return the violation as [`BridgeError::Protocol`](tether_core::BridgeError::Protocol).
    Strict,
    /// Log the violation at `warn` and carry on as a no-op.
    Lenient,
}

impl Default for ViolationPolicy {
    /// `Strict` in debug builds, `Lenient` in release builds.
    fn default() -> Self {
        if cfg!(debug_assertions) {
            Self::Strict
        } else {
            Self::Lenient
        }
    }
}

// ── EngineConfig ──────────────────────────────────────────────────

/// Configuration for [`Engine::new`](crate::Engine::new).
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Object slots reserved up front. Default: 1000.
    pub initial_object_capacity: usize,
    /// Handle slots reserved up front. Default: 1000.
    pub initial_handle_capacity: usize,
    /// Whether snapshots and leak checks do anything. Default: true.
    pub memory_checks: bool,
    /// Protocol violation handling. Default: build-dependent.
    pub violation_policy: ViolationPolicy,
    /// Upper bound on native passes per `collect()`. Default: 16.
    pub max_collection_passes: u32,
    /// Render leaked values through `NativeRuntime::stringify`. Default: false.
    pub stringify_leaks: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            initial_object_capacity: 1000,
            initial_handle_capacity: 1000,
            memory_checks: true,
            violation_policy: ViolationPolicy::default(),
            max_collection_passes: 16,
            stringify_leaks: false,
        }
    }
}

impl EngineConfig {
    /// Check structural invariants.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_collection_passes == 0 {
            return Err(ConfigError::ZeroCollectionPasses);
        }
        // Slot indices are u32.
        for (field, value) in [
            ("initial_object_capacity", self.initial_object_capacity),
            ("initial_handle_capacity", self.initial_handle_capacity),
        ] {
            if u32::try_from(value).is_err() {
                return Err(ConfigError::CapacityOverflow { field, value });
            }
        }
        Ok(())
    }
}

// ── ConfigError ───────────────────────────────────────────────────

/// Errors detected during [`EngineConfig::validate()`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConfigError {
    /// `max_collection_passes` is 0; `collect()` must run at least once.
    ZeroCollectionPasses,
    /// An initial capacity exceeds the `u32` slot index space.
    CapacityOverflow {
        /// The offending field.
        field: &'static str,
        /// The configured value.
        value: usize,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ZeroCollectionPasses => write!(f, "max_collection_passes must be at least 1"),
            Self::CapacityOverflow { field, value } => {
                write!(f, "{field} ({value}) exceeds u32::MAX")
            }
        }
    }
}

impl Error for ConfigError {}

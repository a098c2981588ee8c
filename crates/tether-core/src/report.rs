//! Leak reports produced by a snapshot comparison.

use std::fmt;

use crate::id::{HandleId, ObjectId};

/// Which table a leak entry came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LeakGranularity {
    /// A native handle created after the snapshot.
    Handle,
    /// A host object created after the snapshot.
    Object,
}

/// One leaked handle or object.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LeakEntry {
    /// Handle or object leak.
    pub granularity: LeakGranularity,
    /// The handle whose lock count exceeded expectation.
    pub handle: HandleId,
    /// The connected object, if any.
    pub object: Option<ObjectId>,
    /// Observed lock count.
    pub lock_count: i32,
    /// Lock count explained by rooting and declared children.
    pub expected: u32,
    /// Short human-readable description.
    pub summary: String,
    /// The native value rendered as a string, when requested.
    pub value: Option<String>,
}

impl fmt::Display for LeakEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.handle)?;
        if let Some(object) = self.object {
            write!(f, "/{object}")?;
        }
        write!(
            f,
            ": {} (lock count {}, expected {})",
            self.summary, self.lock_count, self.expected
        )?;
        if let Some(value) = &self.value {
            write!(f, " = {value}")?;
        }
        Ok(())
    }
}

/// Every leak found by one leak check, grouped by table.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LeakReport {
    /// Name of the "before" snapshot.
    pub snapshot: String,
    /// Leaked handles.
    pub handles: Vec<LeakEntry>,
    /// Leaked objects.
    pub objects: Vec<LeakEntry>,
}

impl LeakReport {
    /// An empty report for the named snapshot.
    pub fn new(snapshot: impl Into<String>) -> Self {
        Self {
            snapshot: snapshot.into(),
            handles: Vec::new(),
            objects: Vec::new(),
        }
    }

    /// Add an entry to the section matching its granularity.
    pub fn push(&mut self, entry: LeakEntry) {
        match entry.granularity {
            LeakGranularity::Handle => self.handles.push(entry),
            LeakGranularity::Object => self.objects.push(entry),
        }
    }

    /// Whether nothing leaked.
    pub fn is_empty(&self) -> bool {
        self.handles.is_empty() && self.objects.is_empty()
    }

    /// Total number of entries.
    pub fn len(&self) -> usize {
        self.handles.len() + self.objects.len()
    }
}

impl fmt::Display for LeakReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "memory leak in {}", self.snapshot)?;
        if !self.handles.is_empty() {
            write!(f, "\nLeaked handles:")?;
            for entry in &self.handles {
                write!(f, "\n  {entry}")?;
            }
        }
        if !self.objects.is_empty() {
            write!(f, "\nLeaked objects:")?;
            for entry in &self.objects {
                write!(f, "\n  {entry}")?;
            }
        }
        Ok(())
    }
}

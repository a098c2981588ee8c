//! Test utilities and mock types for Tether development.
//!
//! Provides [`MockNative`], an in-memory [`NativeRuntime`] whose collector
//! only considers handles a test has marked unreachable, and the
//! [`TestObject`] wrapper fixture.

#![forbid(unsafe_code)]
#![allow(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

pub mod fixtures;

pub use fixtures::TestObject;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use tether_core::{CollectionCallback, NativeRef, NativeRuntime};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

/// Mock implementation of [`NativeRuntime`].
///
/// Hands out sequential [`NativeRef`]s with [`issue`](MockNative::issue).
/// A forced collection pass offers every handle id registered with
/// [`mark_unreachable`](MockNative::mark_unreachable) to the installed
/// callback and forgets the ones it permits. With
/// [`set_foreign_thread`](MockNative::set_foreign_thread) the callback runs
/// on a separate thread, as a real collector might.
pub struct MockNative {
    callback: Mutex<Option<CollectionCallback>>,
    next_ref: AtomicU64,
    unreachable: Mutex<Vec<u64>>,
    released: Mutex<Vec<NativeRef>>,
    strings: Mutex<HashMap<NativeRef, String>>,
    passes: AtomicUsize,
    foreign_thread: AtomicBool,
}

impl MockNative {
    pub fn new() -> Self {
        Self {
            callback: Mutex::new(None),
            next_ref: AtomicU64::new(1),
            unreachable: Mutex::new(Vec::new()),
            released: Mutex::new(Vec::new()),
            strings: Mutex::new(HashMap::new()),
            passes: AtomicUsize::new(0),
            foreign_thread: AtomicBool::new(false),
        }
    }

    /// A fresh native value.
    pub fn issue(&self) -> NativeRef {
        NativeRef(self.next_ref.fetch_add(1, Ordering::Relaxed))
    }

    /// Make the collector consider the handle with this raw id.
    pub fn mark_unreachable(&self, raw_handle: u64) {
        let mut set = lock(&self.unreachable);
        if !set.contains(&raw_handle) {
            set.push(raw_handle);
        }
    }

    /// Raw handle ids the collector still considers.
    pub fn unreachable(&self) -> Vec<u64> {
        lock(&self.unreachable).clone()
    }

    /// Run collection callbacks on a spawned thread.
    pub fn set_foreign_thread(&self, on: bool) {
        self.foreign_thread.store(on, Ordering::Relaxed);
    }

    /// Set what [`NativeRuntime::stringify`] returns for `value`.
    pub fn set_string(&self, value: NativeRef, text: &str) {
        lock(&self.strings).insert(value, text.to_owned());
    }

    pub fn has_callback(&self) -> bool {
        lock(&self.callback).is_some()
    }

    /// Call the installed callback directly. Without one, answers `true`.
    pub fn invoke_callback(&self, raw_handle: u64) -> bool {
        let callback = lock(&self.callback).clone();
        match callback {
            Some(cb) => cb(raw_handle),
            None => true,
        }
    }

    /// Values passed to [`NativeRuntime::release`], in order.
    pub fn released(&self) -> Vec<NativeRef> {
        lock(&self.released).clone()
    }

    /// Number of forced collection passes.
    pub fn passes(&self) -> usize {
        self.passes.load(Ordering::Relaxed)
    }
}

impl Default for MockNative {
    fn default() -> Self {
        Self::new()
    }
}

impl NativeRuntime for MockNative {
    fn register_collection_callback(&self, callback: CollectionCallback) {
        *lock(&self.callback) = Some(callback);
    }

    fn force_collection(&self) {
        self.passes.fetch_add(1, Ordering::Relaxed);
        let candidates = self.unreachable();
        let Some(callback) = lock(&self.callback).clone() else {
            return;
        };
        let decide = move || -> Vec<(u64, bool)> {
            candidates.into_iter().map(|raw| (raw, callback(raw))).collect()
        };
        let decisions = if self.foreign_thread.load(Ordering::Relaxed) {
            std::thread::spawn(decide).join().unwrap_or_default()
        } else {
            decide()
        };
        let mut set = lock(&self.unreachable);
        for (raw, permitted) in decisions {
            if permitted {
                set.retain(|r| *r != raw);
            }
        }
    }

    fn release(&self, value: NativeRef) {
        lock(&self.released).push(value);
    }

    fn stringify(&self, value: NativeRef) -> Option<String> {
        lock(&self.strings).get(&value).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn issue_is_sequential() {
        let native = MockNative::new();
        assert_eq!(native.issue(), NativeRef(1));
        assert_eq!(native.issue(), NativeRef(2));
    }

    #[test]
    fn collection_forgets_permitted_candidates() {
        let native = MockNative::new();
        native.register_collection_callback(Arc::new(|raw: u64| raw % 2 == 0));
        native.mark_unreachable(1);
        native.mark_unreachable(2);
        native.mark_unreachable(2);
        native.force_collection();
        assert_eq!(native.unreachable(), vec![1]);
        assert_eq!(native.passes(), 1);
    }

    #[test]
    fn foreign_thread_collection() {
        let native = MockNative::new();
        let main = std::thread::current().id();
        native.register_collection_callback(Arc::new(move |_: u64| {
            std::thread::current().id() != main
        }));
        native.set_foreign_thread(true);
        native.mark_unreachable(7);
        native.force_collection();
        assert!(native.unreachable().is_empty());
    }
}

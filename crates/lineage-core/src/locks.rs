//! Per-key advisory locks
//!
//! Serialises operations that target the same version id (or content hash)
//! while leaving distinct keys fully concurrent. The lock table only holds
//! keys that are currently locked.

use std::collections::HashSet;
use std::sync::{Condvar, Mutex, MutexGuard};

#[derive(Debug, Default)]
pub struct KeyedLocks {
    held: Mutex<HashSet<String>>,
    released: Condvar,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Block until `key` is free, then hold it until the guard drops
    pub fn lock(&self, key: &str) -> KeyGuard<'_> {
        let mut held = self.table();
        while held.contains(key) {
            held = self
                .released
                .wait(held)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
        held.insert(key.to_string());
        KeyGuard {
            locks: self,
            key: key.to_string(),
        }
    }

    /// Take `key` only if nobody holds it
    pub fn try_lock(&self, key: &str) -> Option<KeyGuard<'_>> {
        let mut held = self.table();
        if !held.insert(key.to_string()) {
            return None;
        }
        Some(KeyGuard {
            locks: self,
            key: key.to_string(),
        })
    }

    pub fn is_locked(&self, key: &str) -> bool {
        self.table().contains(key)
    }

    // a panic while holding the table never leaves it half-updated
    fn table(&self) -> MutexGuard<'_, HashSet<String>> {
        self.held
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Releases its key on drop
#[derive(Debug)]
#[must_use = "the key is released as soon as the guard is dropped"]
pub struct KeyGuard<'a> {
    locks: &'a KeyedLocks,
    key: String,
}

impl KeyGuard<'_> {
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for KeyGuard<'_> {
    fn drop(&mut self) {
        self.locks.table().remove(&self.key);
        self.locks.released.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn test_try_lock_excludes_same_key_only() {
        let locks = KeyedLocks::new();
        let guard = locks.lock("v1");

        assert!(locks.try_lock("v1").is_none());
        assert!(locks.try_lock("v2").is_some());
        assert!(locks.is_locked("v1"));

        drop(guard);
        assert!(!locks.is_locked("v1"));
        assert!(locks.try_lock("v1").is_some());
    }

    #[test]
    fn test_lock_serialises_same_key() {
        let locks = KeyedLocks::new();
        let inside = AtomicUsize::new(0);
        let max_inside = AtomicUsize::new(0);

        std::thread::scope(|s| {
            for _ in 0..8 {
                s.spawn(|| {
                    let _guard = locks.lock("shared");
                    let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                    max_inside.fetch_max(now, Ordering::SeqCst);
                    std::thread::sleep(Duration::from_millis(2));
                    inside.fetch_sub(1, Ordering::SeqCst);
                });
            }
        });

        assert_eq!(max_inside.load(Ordering::SeqCst), 1);
        assert!(!locks.is_locked("shared"));
    }
}

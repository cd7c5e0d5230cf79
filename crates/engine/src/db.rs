//! A numbered database: the key table, the expire table, and the
//! bookkeeping for blocked and watching clients.
//!
//! Invariants: every key in `expires` is present in `keys`; removing a key
//! removes its expire. Watch and blocked bookkeeping is maintained by the
//! server, which owns cross-client signaling.

use crate::object::SharedObject;
use ember_core::Bytes;
use ember_storage::Dict;
use std::collections::{HashMap, HashSet, VecDeque};

/// One database.
pub struct Db {
    /// Database number.
    pub index: usize,
    /// key -> value
    pub keys: Dict<SharedObject>,
    /// key -> absolute deadline in ms; always a subset of `keys`.
    pub expires: Dict<u64>,
    /// key -> clients blocked waiting for it, FIFO.
    pub blocked_on: HashMap<Bytes, VecDeque<u64>>,
    /// Keys that became readable since the last delivery pass.
    ready_keys: Vec<Bytes>,
    ready_set: HashSet<Bytes>,
    /// key -> clients watching it for optimistic concurrency.
    pub watched: HashMap<Bytes, Vec<u64>>,
}

impl Db {
    /// An empty database.
    pub fn new(index: usize) -> Db {
        Db {
            index,
            keys: Dict::new(),
            expires: Dict::new(),
            blocked_on: HashMap::new(),
            ready_keys: Vec::new(),
            ready_set: HashSet::new(),
            watched: HashMap::new(),
        }
    }

    /// Number of keys.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// True when no keys are stored.
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Remove a key and its expire. Watch signaling is the caller's job.
    pub fn remove_key(&mut self, key: &[u8]) -> Option<SharedObject> {
        let removed = self.keys.remove(key);
        if removed.is_some() {
            self.expires.remove(key);
        }
        removed
    }

    /// Deadline of `key`, if one is set.
    pub fn expire_of(&self, key: &[u8]) -> Option<u64> {
        self.expires.get(key).copied()
    }

    /// Set the deadline of an existing key.
    pub fn set_expire(&mut self, key: &[u8], deadline_ms: u64) {
        debug_assert!(self.keys.contains_key(key));
        self.expires.insert(key.to_vec(), deadline_ms);
    }

    /// Clear the deadline. Returns true when one was set.
    pub fn remove_expire(&mut self, key: &[u8]) -> bool {
        self.expires.remove(key).is_some()
    }

    /// Drop every key. Returns how many were removed.
    pub fn flush(&mut self) -> usize {
        let removed = self.keys.len();
        self.keys = Dict::new();
        self.expires = Dict::new();
        removed
    }

    /// Park a client on `key` (FIFO).
    pub fn add_blocked(&mut self, key: &[u8], client_id: u64) {
        self.blocked_on
            .entry(key.to_vec())
            .or_default()
            .push_back(client_id);
    }

    /// Remove a client from the wait lists of `keys`.
    pub fn remove_blocked(&mut self, keys: &[Bytes], client_id: u64) {
        for key in keys {
            if let Some(waiters) = self.blocked_on.get_mut(key) {
                waiters.retain(|id| *id != client_id);
                if waiters.is_empty() {
                    self.blocked_on.remove(key);
                }
            }
        }
    }

    /// Mark `key` readable if anyone is waiting on it. Each key is queued
    /// once per delivery pass.
    pub fn signal_ready(&mut self, key: &[u8]) {
        if self.blocked_on.contains_key(key) && !self.ready_set.contains(key) {
            self.ready_set.insert(key.to_vec());
            self.ready_keys.push(key.to_vec());
        }
    }

    /// Take the pending ready keys for delivery.
    pub fn take_ready(&mut self) -> Vec<Bytes> {
        self.ready_set.clear();
        std::mem::take(&mut self.ready_keys)
    }

    /// Register a watcher of `key`.
    pub fn add_watcher(&mut self, key: &[u8], client_id: u64) {
        let watchers = self.watched.entry(key.to_vec()).or_default();
        if !watchers.contains(&client_id) {
            watchers.push(client_id);
        }
    }

    /// Remove a watcher of `key`.
    pub fn remove_watcher(&mut self, key: &[u8], client_id: u64) {
        if let Some(watchers) = self.watched.get_mut(key) {
            watchers.retain(|id| *id != client_id);
            if watchers.is_empty() {
                self.watched.remove(key);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::Object;
    use std::sync::Arc;

    #[test]
    fn test_remove_key_clears_expire() {
        let mut db = Db::new(0);
        db.keys
            .insert(b"k".to_vec(), Arc::new(Object::string_from(b"v", 0)));
        db.set_expire(b"k", 12345);
        assert_eq!(db.expire_of(b"k"), Some(12345));
        assert!(db.remove_key(b"k").is_some());
        assert_eq!(db.expire_of(b"k"), None);
        assert!(db.is_empty());
    }

    #[test]
    fn test_ready_keys_dedupe() {
        let mut db = Db::new(0);
        db.add_blocked(b"q", 1);
        db.signal_ready(b"q");
        db.signal_ready(b"q");
        assert_eq!(db.take_ready(), vec![b"q".to_vec()]);
        assert!(db.take_ready().is_empty());
    }

    #[test]
    fn test_ready_requires_waiter() {
        let mut db = Db::new(0);
        db.signal_ready(b"nobody-waiting");
        assert!(db.take_ready().is_empty());
    }

    #[test]
    fn test_blocked_fifo() {
        let mut db = Db::new(0);
        db.add_blocked(b"q", 1);
        db.add_blocked(b"q", 2);
        assert_eq!(db.blocked_on[&b"q".to_vec()].front(), Some(&1));
        db.remove_blocked(&[b"q".to_vec()], 1);
        assert_eq!(db.blocked_on[&b"q".to_vec()].front(), Some(&2));
        db.remove_blocked(&[b"q".to_vec()], 2);
        assert!(!db.blocked_on.contains_key(&b"q".to_vec()));
    }

    #[test]
    fn test_watchers() {
        let mut db = Db::new(0);
        db.add_watcher(b"k", 7);
        db.add_watcher(b"k", 7);
        assert_eq!(db.watched[&b"k".to_vec()].len(), 1);
        db.remove_watcher(b"k", 7);
        assert!(!db.watched.contains_key(&b"k".to_vec()));
    }
}

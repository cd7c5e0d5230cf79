//! Chained hash map with two-table incremental rehash.
//!
//! A resize allocates the second table and migrates one bucket chain at a
//! time: every mutating entry point performs a migration step, and the
//! periodic tick can run millisecond-budgeted batches. Reads consult both
//! tables while a rehash is in flight, so no key is ever missed or seen
//! twice.
//!
//! While a background save/rewrite holds a snapshot of the keyspace, the
//! owner clears `resize_allowed` to avoid churning memory the snapshot still
//! shares; a resize is then forced only past a 5x load factor.

use ember_core::Bytes;
use rand::Rng;
use rustc_hash::FxHasher;
use std::hash::Hasher;
use std::time::{Duration, Instant};

const INITIAL_SIZE: usize = 4;
const FORCE_RESIZE_RATIO: usize = 5;

/// One collision chain. An empty `Vec` does not allocate, so empty buckets
/// stay cheap.
type Chain<V> = Vec<(Bytes, V)>;

#[derive(Debug, Clone)]
struct Table<V> {
    buckets: Vec<Chain<V>>,
    used: usize,
}

impl<V> Table<V> {
    fn empty() -> Self {
        Table {
            buckets: Vec::new(),
            used: 0,
        }
    }

    fn size(&self) -> usize {
        self.buckets.len()
    }
}

/// The incremental hash map. Keys are byte strings.
#[derive(Debug, Clone)]
pub struct Dict<V> {
    tables: [Table<V>; 2],
    /// Next bucket of table 0 to migrate; `None` when not rehashing.
    rehash_idx: Option<usize>,
    resize_allowed: bool,
}

impl<V> Default for Dict<V> {
    fn default() -> Self {
        Self::new()
    }
}

fn hash_key(key: &[u8]) -> u64 {
    let mut hasher = FxHasher::default();
    hasher.write(key);
    hasher.finish()
}

impl<V> Dict<V> {
    /// An empty map. No buckets are allocated until the first insert.
    pub fn new() -> Self {
        Dict {
            tables: [Table::empty(), Table::empty()],
            rehash_idx: None,
            resize_allowed: true,
        }
    }

    /// Number of entries across both tables.
    pub fn len(&self) -> usize {
        self.tables[0].used + self.tables[1].used
    }

    /// True if the map has no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total bucket count across both tables.
    pub fn bucket_count(&self) -> usize {
        self.tables[0].size() + self.tables[1].size()
    }

    /// True while an incremental rehash is in flight.
    pub fn is_rehashing(&self) -> bool {
        self.rehash_idx.is_some()
    }

    /// Gate automatic growth. While disallowed, a resize still happens past
    /// a 5x load factor.
    pub fn set_resize_allowed(&mut self, allowed: bool) {
        self.resize_allowed = allowed;
    }

    /// True when the table is mostly empty and worth shrinking.
    pub fn needs_shrink(&self) -> bool {
        !self.is_rehashing()
            && self.tables[0].size() > INITIAL_SIZE
            && self.len() * 100 / self.tables[0].size() < 10
    }

    /// Shrink the bucket array to fit the current population. Kicks off an
    /// incremental rehash like any other resize.
    pub fn shrink_to_fit(&mut self) {
        if !self.is_rehashing() {
            self.start_resize(self.len().max(INITIAL_SIZE));
        }
    }

    fn bucket_of(table: &Table<V>, key: &[u8]) -> usize {
        debug_assert!(table.size().is_power_of_two());
        (hash_key(key) as usize) & (table.size() - 1)
    }

    /// Insert or replace. Returns the previous value when the key existed.
    pub fn insert(&mut self, key: Bytes, value: V) -> Option<V> {
        self.expand_if_needed();
        self.rehash(1);

        // Replace in place wherever the key currently lives.
        let rehashing = self.is_rehashing();
        for t in 0..2 {
            let table = &mut self.tables[t];
            if table.size() == 0 {
                continue;
            }
            let bucket = Self::bucket_of(table, &key);
            if let Some(slot) = table.buckets[bucket]
                .iter_mut()
                .find(|(k, _)| *k == key)
            {
                return Some(std::mem::replace(&mut slot.1, value));
            }
            if !rehashing {
                break;
            }
        }

        // New entries go into the newest table so they are never migrated.
        let table = &mut self.tables[if rehashing { 1 } else { 0 }];
        let bucket = Self::bucket_of(table, &key);
        table.buckets[bucket].push((key, value));
        table.used += 1;
        None
    }

    /// Shared lookup.
    pub fn get(&self, key: &[u8]) -> Option<&V> {
        if self.is_empty() {
            return None;
        }
        for table in &self.tables {
            if table.size() == 0 {
                continue;
            }
            let bucket = Self::bucket_of(table, key);
            if let Some((_, v)) = table.buckets[bucket].iter().find(|(k, _)| k == key) {
                return Some(v);
            }
            if !self.is_rehashing() {
                break;
            }
        }
        None
    }

    /// Exclusive lookup; performs one rehash step on entry.
    pub fn get_mut(&mut self, key: &[u8]) -> Option<&mut V> {
        self.rehash(1);
        let rehashing = self.is_rehashing();
        for t in 0..2 {
            if self.tables[t].size() == 0 {
                continue;
            }
            let bucket = Self::bucket_of(&self.tables[t], key);
            if self.tables[t].buckets[bucket].iter().any(|(k, _)| k == key) {
                return self.tables[t].buckets[bucket]
                    .iter_mut()
                    .find(|(k, _)| k == key)
                    .map(|(_, v)| v);
            }
            if !rehashing {
                break;
            }
        }
        None
    }

    /// Membership test.
    pub fn contains_key(&self, key: &[u8]) -> bool {
        self.get(key).is_some()
    }

    /// Remove an entry, returning its value.
    pub fn remove(&mut self, key: &[u8]) -> Option<V> {
        if self.is_empty() {
            return None;
        }
        self.rehash(1);
        let rehashing = self.is_rehashing();
        for t in 0..2 {
            let table = &mut self.tables[t];
            if table.size() == 0 {
                continue;
            }
            let bucket = Self::bucket_of(table, key);
            if let Some(pos) = table.buckets[bucket].iter().position(|(k, _)| k == key) {
                let (_, value) = table.buckets[bucket].swap_remove(pos);
                table.used -= 1;
                return Some(value);
            }
            if !rehashing {
                break;
            }
        }
        None
    }

    /// Iterator over all entries, table 0 then table 1. The shared borrow
    /// keeps any rehash step from running mid-iteration.
    pub fn iter(&self) -> impl Iterator<Item = (&Bytes, &V)> {
        self.tables.iter().flat_map(|table| {
            table
                .buckets
                .iter()
                .flat_map(|chain| chain.iter().map(|(k, v)| (k, v)))
        })
    }

    /// A random entry: sample buckets until a non-empty one turns up
    /// (across both tables while rehashing), then a random element of its
    /// chain.
    pub fn random_entry(&self, rng: &mut impl Rng) -> Option<(&Bytes, &V)> {
        if self.is_empty() {
            return None;
        }
        let s0 = self.tables[0].size();
        let s1 = self.tables[1].size();
        let chain = loop {
            let chain = match self.rehash_idx {
                Some(idx) => {
                    // Buckets below the cursor in table 0 are already empty.
                    let slot = idx + rng.gen_range(0..s0 + s1 - idx);
                    if slot < s0 {
                        &self.tables[0].buckets[slot]
                    } else {
                        &self.tables[1].buckets[slot - s0]
                    }
                }
                None => &self.tables[0].buckets[rng.gen_range(0..s0)],
            };
            if !chain.is_empty() {
                break chain;
            }
        };
        let (k, v) = &chain[rng.gen_range(0..chain.len())];
        Some((k, v))
    }

    /// Run up to `steps` bucket migrations. Returns true while more remain.
    /// Visits at most `steps * 10` empty buckets per call so a sparse table
    /// cannot stall the caller.
    pub fn rehash(&mut self, steps: usize) -> bool {
        let Some(mut idx) = self.rehash_idx else {
            return false;
        };
        let mut empty_budget = steps * 10;

        for _ in 0..steps {
            if self.tables[0].used == 0 {
                break;
            }

            while self.tables[0].buckets[idx].is_empty() {
                idx += 1;
                empty_budget -= 1;
                if empty_budget == 0 {
                    self.rehash_idx = Some(idx);
                    return true;
                }
            }

            let chain = std::mem::take(&mut self.tables[0].buckets[idx]);
            self.tables[0].used -= chain.len();
            for (key, value) in chain {
                let bucket = Self::bucket_of(&self.tables[1], &key);
                self.tables[1].buckets[bucket].push((key, value));
                self.tables[1].used += 1;
            }
            idx += 1;
        }

        if self.tables[0].used == 0 {
            // Migration complete: the new table becomes the only table.
            self.tables[0] = std::mem::replace(&mut self.tables[1], Table::empty());
            self.rehash_idx = None;
            return false;
        }
        self.rehash_idx = Some(idx);
        true
    }

    /// Rehash in bursts until the time budget is spent or migration ends.
    /// Returns the number of bursts run.
    pub fn rehash_for(&mut self, budget: Duration) -> usize {
        let start = Instant::now();
        let mut bursts = 0;
        while self.is_rehashing() && start.elapsed() < budget {
            self.rehash(100);
            bursts += 1;
        }
        bursts
    }

    fn expand_if_needed(&mut self) {
        if self.is_rehashing() {
            return;
        }
        let size = self.tables[0].size();
        if size == 0 {
            self.tables[0] = Self::fresh_table(INITIAL_SIZE);
            return;
        }
        let used = self.tables[0].used;
        if used >= size && (self.resize_allowed || used / size > FORCE_RESIZE_RATIO) {
            self.start_resize(used * 2);
        }
    }

    fn start_resize(&mut self, capacity: usize) {
        let size = capacity.max(INITIAL_SIZE).next_power_of_two();
        if size == self.tables[0].size() {
            return;
        }
        self.tables[1] = Self::fresh_table(size);
        self.rehash_idx = Some(0);
    }

    fn fresh_table(size: usize) -> Table<V> {
        let mut buckets = Vec::with_capacity(size);
        buckets.resize_with(size, Vec::new);
        Table { buckets, used: 0 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashMap;

    fn key(n: usize) -> Bytes {
        format!("key:{n}").into_bytes()
    }

    #[test]
    fn test_insert_get_remove() {
        let mut dict: Dict<u32> = Dict::new();
        assert_eq!(dict.insert(key(1), 10), None);
        assert_eq!(dict.insert(key(2), 20), None);
        assert_eq!(dict.get(&key(1)), Some(&10));
        assert_eq!(dict.insert(key(1), 11), Some(10));
        assert_eq!(dict.get(&key(1)), Some(&11));
        assert_eq!(dict.remove(&key(1)), Some(11));
        assert_eq!(dict.remove(&key(1)), None);
        assert_eq!(dict.len(), 1);
    }

    #[test]
    fn test_grows_through_rehash() {
        let mut dict: Dict<usize> = Dict::new();
        for i in 0..1000 {
            dict.insert(key(i), i);
        }
        assert_eq!(dict.len(), 1000);
        for i in 0..1000 {
            assert_eq!(dict.get(&key(i)), Some(&i), "key {i}");
        }
    }

    #[test]
    fn test_lookup_mid_rehash_sees_every_key() {
        let mut dict: Dict<usize> = Dict::new();
        let mut seen_rehash = false;
        for i in 0..200 {
            dict.insert(key(i), i);
            seen_rehash |= dict.is_rehashing();
            for j in 0..=i {
                assert_eq!(dict.get(&key(j)), Some(&j));
            }
        }
        assert!(seen_rehash);
    }

    #[test]
    fn test_get_mut_during_rehash() {
        let mut dict: Dict<usize> = Dict::new();
        for i in 0..100 {
            dict.insert(key(i), i);
        }
        dict.start_resize(512);
        assert!(dict.is_rehashing());
        for i in 0..100 {
            *dict.get_mut(&key(i)).unwrap() += 1000;
        }
        for i in 0..100 {
            assert_eq!(dict.get(&key(i)), Some(&(i + 1000)));
        }
    }

    #[test]
    fn test_iter_yields_each_entry_once() {
        let mut dict: Dict<usize> = Dict::new();
        for i in 0..100 {
            dict.insert(key(i), i);
        }
        let mut seen: Vec<usize> = dict.iter().map(|(_, v)| *v).collect();
        seen.sort_unstable();
        assert_eq!(seen, (0..100).collect::<Vec<_>>());
    }

    #[test]
    fn test_forced_resize_when_gated() {
        let mut dict: Dict<usize> = Dict::new();
        dict.set_resize_allowed(false);
        for i in 0..64 {
            dict.insert(key(i), i);
        }
        // Load factor is capped at the force ratio even while gated.
        let load = dict.len() / dict.tables[0].size().max(1);
        assert!(load <= FORCE_RESIZE_RATIO + 1, "load factor {load}");
        for i in 0..64 {
            assert_eq!(dict.get(&key(i)), Some(&i));
        }
    }

    #[test]
    fn test_shrink() {
        let mut dict: Dict<usize> = Dict::new();
        for i in 0..1000 {
            dict.insert(key(i), i);
        }
        for i in 0..990 {
            dict.remove(&key(i));
        }
        while dict.is_rehashing() {
            dict.rehash(100);
        }
        assert!(dict.needs_shrink());
        dict.shrink_to_fit();
        while dict.is_rehashing() {
            dict.rehash(100);
        }
        assert!(dict.bucket_count() < 128);
        for i in 990..1000 {
            assert_eq!(dict.get(&key(i)), Some(&i));
        }
    }

    #[test]
    fn test_random_entry_reaches_all_keys() {
        let mut dict: Dict<usize> = Dict::new();
        for i in 0..50 {
            dict.insert(key(i), i);
        }
        let mut rng = rand::thread_rng();
        let mut hits = HashMap::new();
        for _ in 0..2000 {
            let (_, v) = dict.random_entry(&mut rng).unwrap();
            *hits.entry(*v).or_insert(0) += 1;
        }
        assert!(hits.len() > 40, "only {} distinct keys sampled", hits.len());
    }

    #[test]
    fn test_random_entry_empty() {
        let dict: Dict<usize> = Dict::new();
        assert!(dict.random_entry(&mut rand::thread_rng()).is_none());
    }

    proptest! {
        /// Rehash integrity: under random churn the dict always agrees with
        /// a HashMap model: nothing lost, nothing duplicated.
        #[test]
        fn prop_matches_hashmap_model(ops in proptest::collection::vec(
            (0u8..3, 0usize..64, any::<u64>()),
            0..400,
        )) {
            let mut dict: Dict<u64> = Dict::new();
            let mut model: HashMap<Bytes, u64> = HashMap::new();
            for (op, k, v) in ops {
                let k = key(k);
                match op {
                    0 => {
                        prop_assert_eq!(dict.insert(k.clone(), v), model.insert(k, v));
                    }
                    1 => {
                        prop_assert_eq!(dict.remove(&k), model.remove(&k));
                    }
                    _ => {
                        prop_assert_eq!(dict.get(&k), model.get(&k));
                    }
                }
                prop_assert_eq!(dict.len(), model.len());
            }
            let mut got: Vec<(Bytes, u64)> =
                dict.iter().map(|(k, v)| (k.clone(), *v)).collect();
            got.sort();
            let mut want: Vec<(Bytes, u64)> = model.into_iter().collect();
            want.sort();
            prop_assert_eq!(got, want);
        }
    }
}

//! Value objects: one tagged variant per kind, each kind a sum over its
//! concrete encodings.
//!
//! Values are held as `Arc<Object>`: the strong count is the share count,
//! and mutators go through `Arc::make_mut`, which clones exactly when the
//! object is shared. Pool objects (small integers) therefore never get
//! mutated in place, and a background save's cloned handle table keeps its
//! view intact while the live side keeps writing.
//!
//! Encoding promotion is one-way: once a value graduates to its expanded
//! form it never converts back, even if it shrinks below the thresholds.

use ember_core::util::parse_i64;
use ember_core::Bytes;
use ember_storage::{Dict, IntSet, SkipList, Ziplist};
use rand::Rng;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// Shared handle to a value object.
pub type SharedObject = Arc<Object>;

/// The value kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    /// Byte string (or machine integer).
    String,
    /// Ordered sequence of byte strings.
    List,
    /// Unordered unique byte strings.
    Set,
    /// Field to value map.
    Hash,
    /// Members ordered by score.
    SortedSet,
}

impl Kind {
    /// The TYPE reply name.
    pub fn name(&self) -> &'static str {
        match self {
            Kind::String => "string",
            Kind::List => "list",
            Kind::Set => "set",
            Kind::Hash => "hash",
            Kind::SortedSet => "zset",
        }
    }
}

/// String payload.
#[derive(Debug, Clone, PartialEq)]
pub enum StrVal {
    /// Canonical decimal integer held as a machine word.
    Int(i64),
    /// Raw byte string.
    Raw(Bytes),
}

impl StrVal {
    /// The bytes this string renders as.
    pub fn to_bytes(&self) -> Bytes {
        match self {
            StrVal::Int(n) => n.to_string().into_bytes(),
            StrVal::Raw(b) => b.clone(),
        }
    }

    /// Length in bytes of the rendered form.
    pub fn len(&self) -> usize {
        match self {
            StrVal::Int(n) => {
                // digits plus sign, without allocating
                let mut n = *n;
                let mut len = if n < 0 { 1 } else { 0 };
                loop {
                    len += 1;
                    n /= 10;
                    if n == 0 {
                        break;
                    }
                }
                len
            }
            StrVal::Raw(b) => b.len(),
        }
    }

    /// True when empty.
    pub fn is_empty(&self) -> bool {
        matches!(self, StrVal::Raw(b) if b.is_empty())
    }
}

/// List payload.
#[derive(Debug, Clone)]
pub enum ListVal {
    /// Compact single-buffer form.
    Packed(Ziplist),
    /// Expanded form.
    Linked(VecDeque<Bytes>),
}

impl ListVal {
    /// Element count.
    pub fn len(&self) -> usize {
        match self {
            ListVal::Packed(zl) => zl.len(),
            ListVal::Linked(list) => list.len(),
        }
    }

    /// True when no elements remain.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Convert to the expanded encoding.
    pub fn promote(&mut self) {
        if let ListVal::Packed(zl) = self {
            let items: VecDeque<Bytes> = zl.iter().map(|v| v.to_bytes()).collect();
            *self = ListVal::Linked(items);
        }
    }
}

/// Set payload.
#[derive(Debug, Clone)]
pub enum SetVal {
    /// Sorted integer array, for all-integer sets.
    Ints(IntSet),
    /// Expanded hash-table form; the unit value makes it a set.
    Table(Dict<()>),
}

impl SetVal {
    /// Member count.
    pub fn len(&self) -> usize {
        match self {
            SetVal::Ints(set) => set.len(),
            SetVal::Table(dict) => dict.len(),
        }
    }

    /// True when no members remain.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Membership test against raw bytes.
    pub fn contains(&self, member: &[u8]) -> bool {
        match self {
            SetVal::Ints(set) => match parse_i64(member) {
                Some(n) => set.contains(n),
                None => false,
            },
            SetVal::Table(dict) => dict.contains_key(member),
        }
    }

    /// All members, rendered as bytes.
    pub fn members(&self) -> Vec<Bytes> {
        match self {
            SetVal::Ints(set) => set.iter().map(|n| n.to_string().into_bytes()).collect(),
            SetVal::Table(dict) => dict.iter().map(|(k, _)| k.clone()).collect(),
        }
    }

    /// Convert to the expanded encoding.
    pub fn promote(&mut self) {
        if let SetVal::Ints(set) = self {
            let mut dict = Dict::new();
            for n in set.iter() {
                dict.insert(n.to_string().into_bytes(), ());
            }
            *self = SetVal::Table(dict);
        }
    }
}

/// Hash payload.
#[derive(Debug, Clone)]
pub enum HashVal {
    /// Compact form: alternating field/value entries.
    Packed(Ziplist),
    /// Expanded form.
    Table(Dict<Bytes>),
}

impl HashVal {
    /// Field count.
    pub fn len(&self) -> usize {
        match self {
            HashVal::Packed(zl) => zl.len() / 2,
            HashVal::Table(dict) => dict.len(),
        }
    }

    /// True when no fields remain.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Value of `field`, if present.
    pub fn get(&self, field: &[u8]) -> Option<Bytes> {
        match self {
            HashVal::Packed(zl) => {
                let mut iter = zl.iter();
                while let Some(f) = iter.next() {
                    let v = iter.next().expect("odd entry count in packed hash");
                    if f.eq_bytes(field) {
                        return Some(v.to_bytes());
                    }
                }
                None
            }
            HashVal::Table(dict) => dict.get(field).cloned(),
        }
    }

    /// All (field, value) pairs.
    pub fn entries(&self) -> Vec<(Bytes, Bytes)> {
        match self {
            HashVal::Packed(zl) => {
                let mut out = Vec::with_capacity(self.len());
                let mut iter = zl.iter();
                while let Some(f) = iter.next() {
                    let v = iter.next().expect("odd entry count in packed hash");
                    out.push((f.to_bytes(), v.to_bytes()));
                }
                out
            }
            HashVal::Table(dict) => dict.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
        }
    }

    /// Set `field` to `value`. Returns true when the field was created.
    pub fn set(&mut self, field: &[u8], value: &[u8]) -> bool {
        match self {
            HashVal::Packed(zl) => {
                let mut idx = 0;
                let mut iter = zl.iter();
                while let Some(f) = iter.next() {
                    iter.next();
                    if f.eq_bytes(field) {
                        drop(iter);
                        zl.replace(idx + 1, value);
                        return false;
                    }
                    idx += 2;
                }
                drop(iter);
                zl.push_back(field);
                zl.push_back(value);
                true
            }
            HashVal::Table(dict) => dict.insert(field.to_vec(), value.to_vec()).is_none(),
        }
    }

    /// Remove `field`. Returns true when it existed.
    pub fn remove(&mut self, field: &[u8]) -> bool {
        match self {
            HashVal::Packed(zl) => {
                let mut idx = 0;
                let mut iter = zl.iter();
                while let Some(f) = iter.next() {
                    iter.next();
                    if f.eq_bytes(field) {
                        drop(iter);
                        zl.remove_range(idx, 2);
                        return true;
                    }
                    idx += 2;
                }
                false
            }
            HashVal::Table(dict) => dict.remove(field).is_some(),
        }
    }

    /// Convert to the expanded encoding.
    pub fn promote(&mut self) {
        if let HashVal::Packed(zl) = self {
            let mut dict = Dict::new();
            let mut iter = zl.iter();
            while let Some(f) = iter.next() {
                let v = iter.next().expect("odd entry count in packed hash");
                dict.insert(f.to_bytes(), v.to_bytes());
            }
            *self = HashVal::Table(dict);
        }
    }
}

/// Expanded sorted-set form: the hash map answers score lookups, the
/// skiplist answers order and rank queries. Both always hold exactly the
/// same member set with identical scores.
#[derive(Debug, Clone, Default)]
pub struct ZSetSkip {
    /// member -> score
    pub scores: Dict<f64>,
    /// (score, member) order
    pub list: SkipList,
}

impl ZSetSkip {
    /// Insert or update a member. Updates remove and reinsert the skiplist
    /// node so rank state never goes stale; an equal score is a no-op for
    /// the ordered structure.
    pub fn upsert(&mut self, member: &[u8], score: f64, rng: &mut impl Rng) -> bool {
        match self.scores.get(member).copied() {
            Some(old) => {
                if old != score {
                    self.list.delete(old, member);
                    self.list.insert(score, member.to_vec(), rng);
                    self.scores.insert(member.to_vec(), score);
                }
                false
            }
            None => {
                self.list.insert(score, member.to_vec(), rng);
                self.scores.insert(member.to_vec(), score);
                true
            }
        }
    }

    /// Remove a member. Returns true when it existed.
    pub fn remove(&mut self, member: &[u8]) -> bool {
        match self.scores.remove(member) {
            Some(score) => {
                let removed = self.list.delete(score, member);
                debug_assert!(removed, "skiplist and score map out of sync");
                true
            }
            None => false,
        }
    }
}

/// Sorted-set payload.
#[derive(Debug, Clone)]
pub enum ZSetVal {
    /// Compact form: alternating member/score entries sorted by
    /// (score, member).
    Packed(Ziplist),
    /// Expanded form.
    Skip(ZSetSkip),
}

impl ZSetVal {
    /// Member count.
    pub fn len(&self) -> usize {
        match self {
            ZSetVal::Packed(zl) => zl.len() / 2,
            ZSetVal::Skip(z) => z.list.len(),
        }
    }

    /// True when no members remain.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Score of `member`, if present.
    pub fn score(&self, member: &[u8]) -> Option<f64> {
        match self {
            ZSetVal::Packed(zl) => {
                let mut iter = zl.iter();
                while let Some(m) = iter.next() {
                    let s = iter.next().expect("odd entry count in packed zset");
                    if m.eq_bytes(member) {
                        return Some(parse_score_entry(&s.to_bytes()));
                    }
                }
                None
            }
            ZSetVal::Skip(z) => z.scores.get(member).copied(),
        }
    }

    /// All (member, score) pairs in (score, member) order.
    pub fn entries(&self) -> Vec<(Bytes, f64)> {
        match self {
            ZSetVal::Packed(zl) => {
                let mut out = Vec::with_capacity(self.len());
                let mut iter = zl.iter();
                while let Some(m) = iter.next() {
                    let s = iter.next().expect("odd entry count in packed zset");
                    out.push((m.to_bytes(), parse_score_entry(&s.to_bytes())));
                }
                out
            }
            ZSetVal::Skip(z) => z
                .list
                .iter()
                .map(|(m, s)| (m.to_vec(), s))
                .collect(),
        }
    }

    /// Convert to the expanded encoding. Never reversed.
    pub fn promote(&mut self, rng: &mut impl Rng) {
        if let ZSetVal::Packed(_) = self {
            let mut skip = ZSetSkip::default();
            for (member, score) in self.entries() {
                skip.upsert(&member, score, rng);
            }
            *self = ZSetVal::Skip(skip);
        }
    }
}

/// Score entries in the packed form are stored as their shortest text form;
/// they always reparse.
fn parse_score_entry(bytes: &[u8]) -> f64 {
    ember_core::util::parse_f64(bytes).expect("unparseable score in packed sorted set")
}

/// The value variant.
#[derive(Debug, Clone)]
pub enum Value {
    /// String value.
    Str(StrVal),
    /// List value.
    List(ListVal),
    /// Set value.
    Set(SetVal),
    /// Hash value.
    Hash(HashVal),
    /// Sorted-set value.
    ZSet(ZSetVal),
}

impl Value {
    /// The kind tag.
    pub fn kind(&self) -> Kind {
        match self {
            Value::Str(_) => Kind::String,
            Value::List(_) => Kind::List,
            Value::Set(_) => Kind::Set,
            Value::Hash(_) => Kind::Hash,
            Value::ZSet(_) => Kind::SortedSet,
        }
    }

    /// The OBJECT ENCODING reply name for the current representation.
    pub fn encoding_name(&self) -> &'static str {
        match self {
            Value::Str(StrVal::Int(_)) => "int",
            Value::Str(StrVal::Raw(_)) => "raw",
            Value::List(ListVal::Packed(_)) => "ziplist",
            Value::List(ListVal::Linked(_)) => "linkedlist",
            Value::Set(SetVal::Ints(_)) => "intset",
            Value::Set(SetVal::Table(_)) => "hashtable",
            Value::Hash(HashVal::Packed(_)) => "ziplist",
            Value::Hash(HashVal::Table(_)) => "hashtable",
            Value::ZSet(ZSetVal::Packed(_)) => "ziplist",
            Value::ZSet(ZSetVal::Skip(_)) => "skiplist",
        }
    }
}

/// A value object: the payload plus the coarse last-access stamp used by
/// approximate-LRU eviction.
#[derive(Debug)]
pub struct Object {
    /// Coarse clock stamp (10 s resolution, wraps).
    pub lru: AtomicU32,
    /// The payload.
    pub value: Value,
}

impl Clone for Object {
    fn clone(&self) -> Self {
        Object {
            lru: AtomicU32::new(self.lru.load(Ordering::Relaxed)),
            value: self.value.clone(),
        }
    }
}

impl Object {
    /// Wrap a value with the given clock stamp.
    pub fn new(value: Value, lru: u32) -> Object {
        Object {
            lru: AtomicU32::new(lru),
            value,
        }
    }

    /// Build a string object, preferring the integer encoding when the
    /// bytes are a canonical decimal that fits a machine word.
    pub fn string_from(bytes: &[u8], lru: u32) -> Object {
        let value = match parse_i64(bytes) {
            Some(n) => Value::Str(StrVal::Int(n)),
            None => Value::Str(StrVal::Raw(bytes.to_vec())),
        };
        Object::new(value, lru)
    }

    /// Stamp the object as just touched.
    pub fn touch(&self, clock: u32) {
        self.lru.store(clock, Ordering::Relaxed);
    }

    /// Current stamp.
    pub fn lru_stamp(&self) -> u32 {
        self.lru.load(Ordering::Relaxed)
    }

    /// Approximate heap footprint in bytes, used by the memory-cap
    /// accounting. An estimate: container overheads are charged at flat
    /// per-entry rates.
    pub fn mem_usage(&self) -> usize {
        const PER_ENTRY: usize = 48;
        16 + match &self.value {
            Value::Str(StrVal::Int(_)) => 8,
            Value::Str(StrVal::Raw(b)) => b.capacity() + 24,
            Value::List(ListVal::Packed(zl)) => zl.total_bytes(),
            Value::List(ListVal::Linked(list)) => {
                list.iter().map(|e| e.capacity() + PER_ENTRY).sum()
            }
            Value::Set(SetVal::Ints(set)) => set.byte_size() + 16,
            Value::Set(SetVal::Table(dict)) => {
                dict.iter().map(|(k, _)| k.capacity() + PER_ENTRY).sum()
            }
            Value::Hash(HashVal::Packed(zl)) => zl.total_bytes(),
            Value::Hash(HashVal::Table(dict)) => dict
                .iter()
                .map(|(k, v)| k.capacity() + v.capacity() + PER_ENTRY)
                .sum(),
            Value::ZSet(ZSetVal::Packed(zl)) => zl.total_bytes(),
            Value::ZSet(ZSetVal::Skip(z)) => z
                .scores
                .iter()
                .map(|(k, _)| 2 * k.capacity() + 8 + 2 * PER_ENTRY)
                .sum(),
        }
    }
}

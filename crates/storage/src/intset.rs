//! Sorted integer set: a contiguous array of fixed-width signed integers in
//! strictly ascending order.
//!
//! The element width starts at 16 bits and is promoted to 32 or 64 when an
//! inserted value does not fit. Promotion re-encodes every element in place,
//! back to front so nothing is overwritten before it is read. The only
//! values that trigger promotion lie outside the current range, so a
//! promoted insert always lands at the head (negative) or tail (positive).
//! Width is never demoted.

use byteorder::{ByteOrder, LittleEndian};
use rand::Rng;

/// Element width in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Width {
    I16 = 2,
    I32 = 4,
    I64 = 8,
}

impl Width {
    fn for_value(v: i64) -> Width {
        if (i16::MIN as i64..=i16::MAX as i64).contains(&v) {
            Width::I16
        } else if (i32::MIN as i64..=i32::MAX as i64).contains(&v) {
            Width::I32
        } else {
            Width::I64
        }
    }

    fn bytes(self) -> usize {
        self as usize
    }
}

/// The sorted integer set.
#[derive(Debug, Clone, PartialEq)]
pub struct IntSet {
    width: Width,
    contents: Vec<u8>,
}

impl Default for IntSet {
    fn default() -> Self {
        Self::new()
    }
}

impl IntSet {
    /// An empty set at the narrowest width.
    pub fn new() -> Self {
        IntSet {
            width: Width::I16,
            contents: Vec::new(),
        }
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        self.contents.len() / self.width.bytes()
    }

    /// True if the set is empty.
    pub fn is_empty(&self) -> bool {
        self.contents.is_empty()
    }

    /// Backing-buffer size in bytes.
    pub fn byte_size(&self) -> usize {
        self.contents.len()
    }

    fn read_at(&self, pos: usize, width: Width) -> i64 {
        let off = pos * width.bytes();
        match width {
            Width::I16 => LittleEndian::read_i16(&self.contents[off..off + 2]) as i64,
            Width::I32 => LittleEndian::read_i32(&self.contents[off..off + 4]) as i64,
            Width::I64 => LittleEndian::read_i64(&self.contents[off..off + 8]),
        }
    }

    fn write_at(&mut self, pos: usize, value: i64, width: Width) {
        let off = pos * width.bytes();
        match width {
            Width::I16 => LittleEndian::write_i16(&mut self.contents[off..off + 2], value as i16),
            Width::I32 => LittleEndian::write_i32(&mut self.contents[off..off + 4], value as i32),
            Width::I64 => LittleEndian::write_i64(&mut self.contents[off..off + 8], value),
        }
    }

    /// Element at `pos` (0-based, ascending order).
    pub fn get(&self, pos: usize) -> Option<i64> {
        if pos >= self.len() {
            return None;
        }
        Some(self.read_at(pos, self.width))
    }

    /// Binary search. Returns `Ok(position)` when found, `Err(insertion
    /// position)` otherwise.
    fn search(&self, value: i64) -> Result<usize, usize> {
        let (mut lo, mut hi) = (0usize, self.len());
        while lo < hi {
            let mid = (lo + hi) / 2;
            let at = self.read_at(mid, self.width);
            match at.cmp(&value) {
                std::cmp::Ordering::Less => lo = mid + 1,
                std::cmp::Ordering::Greater => hi = mid,
                std::cmp::Ordering::Equal => return Ok(mid),
            }
        }
        Err(lo)
    }

    /// Membership test.
    pub fn contains(&self, value: i64) -> bool {
        self.search(value).is_ok()
    }

    /// Insert `value`. Returns false if it was already present.
    pub fn insert(&mut self, value: i64) -> bool {
        let needed = Width::for_value(value);
        if needed > self.width {
            self.upgrade_and_insert(value, needed);
            return true;
        }
        match self.search(value) {
            Ok(_) => false,
            Err(pos) => {
                let w = self.width.bytes();
                let off = pos * w;
                self.contents.splice(off..off, std::iter::repeat(0u8).take(w));
                self.write_at(pos, value, self.width);
                true
            }
        }
    }

    /// Promote every element to `width`, then place the new value at the
    /// head or tail (it is outside the old range by construction).
    fn upgrade_and_insert(&mut self, value: i64, width: Width) {
        let old_width = self.width;
        let len = self.len();
        let prepend = value < 0;

        self.contents.resize((len + 1) * width.bytes(), 0);
        self.width = width;

        // Back to front so unconverted narrow slots are read before the
        // widened slots overwrite them.
        for i in (0..len).rev() {
            let v = self.read_at(i, old_width);
            let target = if prepend { i + 1 } else { i };
            self.write_at(target, v, width);
        }

        if prepend {
            self.write_at(0, value, width);
        } else {
            self.write_at(len, value, width);
        }
    }

    /// Remove `value`. Returns false if it was absent.
    pub fn remove(&mut self, value: i64) -> bool {
        if Width::for_value(value) > self.width {
            return false;
        }
        match self.search(value) {
            Ok(pos) => {
                let w = self.width.bytes();
                let off = pos * w;
                self.contents.drain(off..off + w);
                true
            }
            Err(_) => false,
        }
    }

    /// A uniformly random element, if any.
    pub fn random(&self, rng: &mut impl Rng) -> Option<i64> {
        if self.is_empty() {
            return None;
        }
        self.get(rng.gen_range(0..self.len()))
    }

    /// Iterator in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = i64> + '_ {
        (0..self.len()).map(move |i| self.read_at(i, self.width))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::BTreeSet;

    #[test]
    fn test_insert_sorted() {
        let mut set = IntSet::new();
        for v in [5, 1, 3, -2, 4] {
            assert!(set.insert(v));
        }
        assert!(!set.insert(3));
        let all: Vec<i64> = set.iter().collect();
        assert_eq!(all, vec![-2, 1, 3, 4, 5]);
    }

    #[test]
    fn test_contains_and_remove() {
        let mut set = IntSet::new();
        set.insert(10);
        set.insert(20);
        assert!(set.contains(10));
        assert!(!set.contains(15));
        assert!(set.remove(10));
        assert!(!set.remove(10));
        assert!(!set.contains(10));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_width_promotion_positive_tail() {
        let mut set = IntSet::new();
        set.insert(1);
        set.insert(2);
        assert_eq!(set.byte_size(), 4);
        set.insert(100_000); // needs 32 bits, lands at the tail
        let all: Vec<i64> = set.iter().collect();
        assert_eq!(all, vec![1, 2, 100_000]);
        assert_eq!(set.byte_size(), 12);
    }

    #[test]
    fn test_width_promotion_negative_head() {
        let mut set = IntSet::new();
        set.insert(1);
        set.insert(2);
        set.insert(-5_000_000_000); // needs 64 bits, lands at the head
        let all: Vec<i64> = set.iter().collect();
        assert_eq!(all, vec![-5_000_000_000, 1, 2]);
        assert_eq!(set.byte_size(), 24);
    }

    #[test]
    fn test_no_demotion_after_remove() {
        let mut set = IntSet::new();
        set.insert(1);
        set.insert(i64::MAX);
        set.remove(i64::MAX);
        // Width stays wide; the remaining element is still correct.
        assert_eq!(set.iter().collect::<Vec<_>>(), vec![1]);
        assert_eq!(set.byte_size(), 8);
    }

    #[test]
    fn test_remove_out_of_width_value() {
        let mut set = IntSet::new();
        set.insert(7);
        // A value wider than the current encoding cannot be present.
        assert!(!set.remove(1 << 40));
    }

    #[test]
    fn test_random_member() {
        let mut set = IntSet::new();
        for v in 0..10 {
            set.insert(v);
        }
        let mut rng = rand::thread_rng();
        for _ in 0..50 {
            let v = set.random(&mut rng).unwrap();
            assert!(set.contains(v));
        }
        assert_eq!(IntSet::new().random(&mut rng), None);
    }

    proptest! {
        /// After any add/remove sequence the elements are strictly
        /// ascending, unique, and match a BTreeSet model.
        #[test]
        fn prop_matches_btreeset(ops in proptest::collection::vec(
            (any::<bool>(), any::<i64>()),
            0..200,
        )) {
            let mut set = IntSet::new();
            let mut model = BTreeSet::new();
            for (add, v) in ops {
                if add {
                    prop_assert_eq!(set.insert(v), model.insert(v));
                } else {
                    prop_assert_eq!(set.remove(v), model.remove(&v));
                }
            }
            let got: Vec<i64> = set.iter().collect();
            let want: Vec<i64> = model.into_iter().collect();
            prop_assert_eq!(got.clone(), want);
            for pair in got.windows(2) {
                prop_assert!(pair[0] < pair[1]);
            }
        }
    }
}

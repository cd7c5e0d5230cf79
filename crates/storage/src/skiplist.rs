//! Probabilistic ordered map keyed by (score, member).
//!
//! Multi-level forward links with a back-link at the base level. Each
//! forward pointer carries a span (how many base-level nodes it skips), so
//! rank queries and rank-indexed access run in O(log n) expected time.
//! Ordering is score ascending, ties broken by member bytes ascending.
//!
//! Nodes live in an arena indexed by `usize` with a free list; links are
//! indices rather than pointers, so removal and rewiring stay entirely in
//! safe code.
//!
//! Scores are finite or infinite f64 values; NaN is rejected by callers
//! before reaching this structure.

use ember_core::Bytes;
use rand::Rng;

/// Maximum node height.
pub const MAX_LEVEL: usize = 32;
/// Probability of promoting a node one more level.
const BRANCH_P: f64 = 0.25;
/// Null link.
const NIL: usize = usize::MAX;

#[derive(Debug, Clone, Copy)]
struct Level {
    forward: usize,
    span: usize,
}

#[derive(Debug, Clone)]
struct Node {
    member: Bytes,
    score: f64,
    backward: usize,
    levels: Vec<Level>,
}

/// A score interval with independently open or closed endpoints.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RangeSpec {
    /// Lower bound.
    pub min: f64,
    /// Upper bound.
    pub max: f64,
    /// Lower bound is exclusive.
    pub minex: bool,
    /// Upper bound is exclusive.
    pub maxex: bool,
}

impl RangeSpec {
    /// A closed interval.
    pub fn closed(min: f64, max: f64) -> Self {
        RangeSpec {
            min,
            max,
            minex: false,
            maxex: false,
        }
    }

    /// True when `value` satisfies the lower bound.
    pub fn gte_min(&self, value: f64) -> bool {
        if self.minex {
            value > self.min
        } else {
            value >= self.min
        }
    }

    /// True when `value` satisfies the upper bound.
    pub fn lte_max(&self, value: f64) -> bool {
        if self.maxex {
            value < self.max
        } else {
            value <= self.max
        }
    }

    /// True when no score can satisfy the interval.
    pub fn is_empty(&self) -> bool {
        self.min > self.max || (self.min == self.max && (self.minex || self.maxex))
    }
}

/// The skiplist.
#[derive(Debug, Clone)]
pub struct SkipList {
    nodes: Vec<Node>,
    free: Vec<usize>,
    head: usize,
    tail: usize,
    length: usize,
    level: usize,
}

impl Default for SkipList {
    fn default() -> Self {
        Self::new()
    }
}

impl SkipList {
    /// An empty list with a full-height head sentinel.
    pub fn new() -> Self {
        let head = Node {
            member: Vec::new(),
            score: 0.0,
            backward: NIL,
            levels: vec![
                Level {
                    forward: NIL,
                    span: 0
                };
                MAX_LEVEL
            ],
        };
        SkipList {
            nodes: vec![head],
            free: Vec::new(),
            head: 0,
            tail: NIL,
            length: 0,
            level: 1,
        }
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        self.length
    }

    /// True if no elements are stored.
    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Handle of the first element in order.
    pub fn first(&self) -> Option<usize> {
        match self.nodes[self.head].levels[0].forward {
            NIL => None,
            idx => Some(idx),
        }
    }

    /// Handle of the last element in order.
    pub fn last(&self) -> Option<usize> {
        match self.tail {
            NIL => None,
            idx => Some(idx),
        }
    }

    /// Successor of `idx` in order.
    pub fn next(&self, idx: usize) -> Option<usize> {
        match self.nodes[idx].levels[0].forward {
            NIL => None,
            n => Some(n),
        }
    }

    /// Predecessor of `idx` in order.
    pub fn prev(&self, idx: usize) -> Option<usize> {
        match self.nodes[idx].backward {
            NIL => None,
            n => Some(n),
        }
    }

    /// Member bytes of the node at `idx`.
    pub fn member(&self, idx: usize) -> &[u8] {
        &self.nodes[idx].member
    }

    /// Score of the node at `idx`.
    pub fn score(&self, idx: usize) -> f64 {
        self.nodes[idx].score
    }

    /// In-order iterator over (member, score).
    pub fn iter(&self) -> impl Iterator<Item = (&[u8], f64)> {
        let mut cursor = self.first();
        std::iter::from_fn(move || {
            let idx = cursor?;
            cursor = self.next(idx);
            Some((self.member(idx) as &[u8], self.score(idx)))
        })
    }

    /// True when (score_a, member_a) orders strictly before (score_b, member_b).
    fn precedes(score_a: f64, member_a: &[u8], score_b: f64, member_b: &[u8]) -> bool {
        match score_a.partial_cmp(&score_b).expect("NaN score in skiplist") {
            std::cmp::Ordering::Less => true,
            std::cmp::Ordering::Greater => false,
            std::cmp::Ordering::Equal => member_a < member_b,
        }
    }

    fn random_level(rng: &mut impl Rng) -> usize {
        let mut level = 1;
        while level < MAX_LEVEL && rng.gen::<f64>() < BRANCH_P {
            level += 1;
        }
        level
    }

    /// For each level, the rightmost node ordering before (score, member),
    /// plus the rank of that node (number of base nodes before and
    /// including it, head = 0).
    fn find_update(&self, score: f64, member: &[u8]) -> ([usize; MAX_LEVEL], [usize; MAX_LEVEL]) {
        let mut update = [self.head; MAX_LEVEL];
        let mut rank = [0usize; MAX_LEVEL];
        let mut x = self.head;
        for i in (0..self.level).rev() {
            rank[i] = if i == self.level - 1 { 0 } else { rank[i + 1] };
            loop {
                let lv = self.nodes[x].levels[i];
                if lv.forward != NIL
                    && Self::precedes(
                        self.nodes[lv.forward].score,
                        &self.nodes[lv.forward].member,
                        score,
                        member,
                    )
                {
                    rank[i] += lv.span;
                    x = lv.forward;
                } else {
                    break;
                }
            }
            update[i] = x;
        }
        (update, rank)
    }

    /// Insert a new (score, member). The caller guarantees the member is not
    /// already present (the companion hash map is checked first).
    pub fn insert(&mut self, score: f64, member: Bytes, rng: &mut impl Rng) -> usize {
        debug_assert!(!score.is_nan());
        let (mut update, mut rank) = self.find_update(score, &member);

        let height = Self::random_level(rng);
        if height > self.level {
            for i in self.level..height {
                rank[i] = 0;
                update[i] = self.head;
                self.nodes[self.head].levels[i].span = self.length;
            }
            self.level = height;
        }

        let idx = self.alloc(Node {
            member,
            score,
            backward: NIL,
            levels: vec![Level { forward: NIL, span: 0 }; height],
        });

        for i in 0..height {
            let u = update[i];
            let u_level = self.nodes[u].levels[i];
            self.nodes[idx].levels[i].forward = u_level.forward;
            self.nodes[idx].levels[i].span = u_level.span - (rank[0] - rank[i]);
            self.nodes[u].levels[i].forward = idx;
            self.nodes[u].levels[i].span = (rank[0] - rank[i]) + 1;
        }
        for i in height..self.level {
            self.nodes[update[i]].levels[i].span += 1;
        }

        self.nodes[idx].backward = if update[0] == self.head {
            NIL
        } else {
            update[0]
        };
        match self.nodes[idx].levels[0].forward {
            NIL => self.tail = idx,
            succ => self.nodes[succ].backward = idx,
        }
        self.length += 1;
        idx
    }

    /// Remove (score, member). Returns false when absent.
    pub fn delete(&mut self, score: f64, member: &[u8]) -> bool {
        let (update, _) = self.find_update(score, member);
        let x = self.nodes[update[0]].levels[0].forward;
        if x == NIL || self.nodes[x].score != score || self.nodes[x].member != member {
            return false;
        }
        self.unlink(x, &update);
        true
    }

    fn unlink(&mut self, x: usize, update: &[usize; MAX_LEVEL]) {
        for i in 0..self.level {
            let u = update[i];
            if self.nodes[u].levels[i].forward == x {
                self.nodes[u].levels[i].span += self.nodes[x].levels[i].span;
                self.nodes[u].levels[i].span -= 1;
                self.nodes[u].levels[i].forward = self.nodes[x].levels[i].forward;
            } else {
                self.nodes[u].levels[i].span -= 1;
            }
        }
        match self.nodes[x].levels[0].forward {
            NIL => self.tail = self.nodes[x].backward,
            succ => self.nodes[succ].backward = self.nodes[x].backward,
        }
        while self.level > 1 && self.nodes[self.head].levels[self.level - 1].forward == NIL {
            self.level -= 1;
        }
        self.length -= 1;
        self.release(x);
    }

    /// First node whose score satisfies `range`, if any.
    pub fn first_in_range(&self, range: &RangeSpec) -> Option<usize> {
        if range.is_empty() || self.is_empty() {
            return None;
        }
        let mut x = self.head;
        for i in (0..self.level).rev() {
            loop {
                let fwd = self.nodes[x].levels[i].forward;
                if fwd != NIL && !range.gte_min(self.nodes[fwd].score) {
                    x = fwd;
                } else {
                    break;
                }
            }
        }
        let candidate = self.nodes[x].levels[0].forward;
        if candidate == NIL || !range.lte_max(self.nodes[candidate].score) {
            return None;
        }
        Some(candidate)
    }

    /// Last node whose score satisfies `range`, if any.
    pub fn last_in_range(&self, range: &RangeSpec) -> Option<usize> {
        if range.is_empty() || self.is_empty() {
            return None;
        }
        let mut x = self.head;
        for i in (0..self.level).rev() {
            loop {
                let fwd = self.nodes[x].levels[i].forward;
                if fwd != NIL && range.lte_max(self.nodes[fwd].score) {
                    x = fwd;
                } else {
                    break;
                }
            }
        }
        if x == self.head || !range.gte_min(self.nodes[x].score) {
            return None;
        }
        Some(x)
    }

    /// 0-based rank of (score, member), if present.
    pub fn rank_of(&self, score: f64, member: &[u8]) -> Option<usize> {
        let mut x = self.head;
        let mut rank = 0usize;
        for i in (0..self.level).rev() {
            loop {
                let lv = self.nodes[x].levels[i];
                if lv.forward == NIL {
                    break;
                }
                let fwd = &self.nodes[lv.forward];
                let advance = match fwd.score.partial_cmp(&score).expect("NaN score") {
                    std::cmp::Ordering::Less => true,
                    std::cmp::Ordering::Greater => false,
                    std::cmp::Ordering::Equal => fwd.member.as_slice() <= member,
                };
                if advance {
                    rank += lv.span;
                    x = lv.forward;
                } else {
                    break;
                }
            }
            if x != self.head && self.nodes[x].member == member && self.nodes[x].score == score {
                return Some(rank - 1);
            }
        }
        None
    }

    /// Node at 0-based rank, if within bounds.
    pub fn node_at_rank(&self, rank: usize) -> Option<usize> {
        if rank >= self.length {
            return None;
        }
        let target = rank + 1;
        let mut x = self.head;
        let mut traversed = 0usize;
        for i in (0..self.level).rev() {
            loop {
                let lv = self.nodes[x].levels[i];
                if lv.forward != NIL && traversed + lv.span <= target {
                    traversed += lv.span;
                    x = lv.forward;
                } else {
                    break;
                }
            }
            if traversed == target {
                return Some(x);
            }
        }
        None
    }

    /// Delete every node whose score satisfies `range`; returns the removed
    /// (member, score) pairs in order.
    pub fn delete_range_by_score(&mut self, range: &RangeSpec) -> Vec<(Bytes, f64)> {
        if range.is_empty() {
            return Vec::new();
        }
        let mut update = [self.head; MAX_LEVEL];
        let mut x = self.head;
        for i in (0..self.level).rev() {
            loop {
                let fwd = self.nodes[x].levels[i].forward;
                if fwd != NIL && !range.gte_min(self.nodes[fwd].score) {
                    x = fwd;
                } else {
                    break;
                }
            }
            update[i] = x;
        }

        let mut removed = Vec::new();
        let mut cursor = self.nodes[x].levels[0].forward;
        while cursor != NIL && range.lte_max(self.nodes[cursor].score) {
            let next = self.nodes[cursor].levels[0].forward;
            let member = self.nodes[cursor].member.clone();
            let score = self.nodes[cursor].score;
            self.unlink(cursor, &update);
            removed.push((member, score));
            cursor = next;
        }
        removed
    }

    /// Delete nodes with 0-based ranks in `start..=end`; returns the removed
    /// (member, score) pairs in order.
    pub fn delete_range_by_rank(&mut self, start: usize, end: usize) -> Vec<(Bytes, f64)> {
        if start > end || start >= self.length {
            return Vec::new();
        }
        let start1 = start + 1;
        let end1 = (end + 1).min(self.length);

        let mut update = [self.head; MAX_LEVEL];
        let mut x = self.head;
        let mut traversed = 0usize;
        for i in (0..self.level).rev() {
            loop {
                let lv = self.nodes[x].levels[i];
                if lv.forward != NIL && traversed + lv.span < start1 {
                    traversed += lv.span;
                    x = lv.forward;
                } else {
                    break;
                }
            }
            update[i] = x;
        }

        let mut removed = Vec::new();
        let mut cursor = self.nodes[x].levels[0].forward;
        let mut rank = start1;
        while cursor != NIL && rank <= end1 {
            let next = self.nodes[cursor].levels[0].forward;
            let member = self.nodes[cursor].member.clone();
            let score = self.nodes[cursor].score;
            self.unlink(cursor, &update);
            removed.push((member, score));
            cursor = next;
            rank += 1;
        }
        removed
    }

    fn alloc(&mut self, node: Node) -> usize {
        match self.free.pop() {
            Some(idx) => {
                self.nodes[idx] = node;
                idx
            }
            None => {
                self.nodes.push(node);
                self.nodes.len() - 1
            }
        }
    }

    fn release(&mut self, idx: usize) {
        self.nodes[idx] = Node {
            member: Vec::new(),
            score: 0.0,
            backward: NIL,
            levels: Vec::new(),
        };
        self.free.push(idx);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn build(pairs: &[(f64, &str)]) -> SkipList {
        let mut list = SkipList::new();
        let mut rng = rand::thread_rng();
        for (score, member) in pairs {
            list.insert(*score, member.as_bytes().to_vec(), &mut rng);
        }
        list
    }

    fn members(list: &SkipList) -> Vec<String> {
        list.iter()
            .map(|(m, _)| String::from_utf8(m.to_vec()).unwrap())
            .collect()
    }

    #[test]
    fn test_ordering_by_score_then_member() {
        let list = build(&[(2.0, "b"), (1.0, "z"), (1.0, "a"), (3.0, "c")]);
        assert_eq!(members(&list), vec!["a", "z", "b", "c"]);
    }

    #[test]
    fn test_backward_links() {
        let list = build(&[(1.0, "a"), (2.0, "b"), (3.0, "c")]);
        let mut cursor = list.last();
        let mut rev = Vec::new();
        while let Some(idx) = cursor {
            rev.push(String::from_utf8(list.member(idx).to_vec()).unwrap());
            cursor = list.prev(idx);
        }
        assert_eq!(rev, vec!["c", "b", "a"]);
    }

    #[test]
    fn test_delete() {
        let mut list = build(&[(1.0, "a"), (2.0, "b"), (3.0, "c")]);
        assert!(list.delete(2.0, b"b"));
        assert!(!list.delete(2.0, b"b"));
        // Wrong score for an existing member does not match.
        assert!(!list.delete(9.0, b"a"));
        assert_eq!(members(&list), vec!["a", "c"]);
        assert_eq!(list.len(), 2);
    }

    #[test]
    fn test_rank_queries() {
        let list = build(&[(1.0, "a"), (2.0, "b"), (3.0, "c"), (4.0, "d")]);
        assert_eq!(list.rank_of(1.0, b"a"), Some(0));
        assert_eq!(list.rank_of(3.0, b"c"), Some(2));
        assert_eq!(list.rank_of(3.0, b"missing"), None);
        for (rank, expect) in ["a", "b", "c", "d"].iter().enumerate() {
            let idx = list.node_at_rank(rank).unwrap();
            assert_eq!(list.member(idx), expect.as_bytes());
        }
        assert_eq!(list.node_at_rank(4), None);
    }

    #[test]
    fn test_score_ranges_open_and_closed() {
        let list = build(&[(1.0, "a"), (2.0, "b"), (3.0, "c"), (4.0, "d")]);

        let closed = RangeSpec::closed(2.0, 3.0);
        let first = list.first_in_range(&closed).unwrap();
        assert_eq!(list.member(first), b"b");
        let last = list.last_in_range(&closed).unwrap();
        assert_eq!(list.member(last), b"c");

        let open_min = RangeSpec {
            min: 1.0,
            max: 3.0,
            minex: true,
            maxex: false,
        };
        assert_eq!(list.member(list.first_in_range(&open_min).unwrap()), b"b");

        let open_max = RangeSpec {
            min: 1.0,
            max: 4.0,
            minex: false,
            maxex: true,
        };
        assert_eq!(list.member(list.last_in_range(&open_max).unwrap()), b"c");

        let empty = RangeSpec {
            min: 2.0,
            max: 2.0,
            minex: true,
            maxex: false,
        };
        assert_eq!(list.first_in_range(&empty), None);

        let unbounded = RangeSpec::closed(f64::NEG_INFINITY, f64::INFINITY);
        assert_eq!(list.member(list.first_in_range(&unbounded).unwrap()), b"a");
        assert_eq!(list.member(list.last_in_range(&unbounded).unwrap()), b"d");
    }

    #[test]
    fn test_infinite_scores() {
        let list = build(&[(f64::NEG_INFINITY, "low"), (0.0, "mid"), (f64::INFINITY, "high")]);
        assert_eq!(members(&list), vec!["low", "mid", "high"]);
        assert_eq!(list.rank_of(f64::INFINITY, b"high"), Some(2));
    }

    #[test]
    fn test_delete_range_by_score() {
        let mut list = build(&[(1.0, "a"), (2.0, "b"), (3.0, "c"), (4.0, "d")]);
        let removed = list.delete_range_by_score(&RangeSpec {
            min: 1.0,
            max: 3.0,
            minex: true,
            maxex: false,
        });
        let names: Vec<Bytes> = removed.into_iter().map(|(m, _)| m).collect();
        assert_eq!(names, vec![b"b".to_vec(), b"c".to_vec()]);
        assert_eq!(members(&list), vec!["a", "d"]);
    }

    #[test]
    fn test_delete_range_by_rank() {
        let mut list = build(&[(1.0, "a"), (2.0, "b"), (3.0, "c"), (4.0, "d")]);
        let removed = list.delete_range_by_rank(1, 2);
        let names: Vec<Bytes> = removed.into_iter().map(|(m, _)| m).collect();
        assert_eq!(names, vec![b"b".to_vec(), b"c".to_vec()]);
        assert_eq!(members(&list), vec!["a", "d"]);
        // End clamps to the list length.
        let removed = list.delete_range_by_rank(0, 99);
        assert_eq!(removed.len(), 2);
        assert!(list.is_empty());
    }

    #[test]
    fn test_arena_reuse_after_churn() {
        let mut list = SkipList::new();
        let mut rng = rand::thread_rng();
        for round in 0..5 {
            for i in 0..100 {
                list.insert(i as f64, format!("m{round}:{i}").into_bytes(), &mut rng);
            }
            for i in 0..100 {
                assert!(list.delete(i as f64, format!("m{round}:{i}").as_bytes()));
            }
        }
        assert!(list.is_empty());
        // Freed slots are recycled rather than growing the arena.
        assert!(list.nodes.len() <= 201, "arena grew to {}", list.nodes.len());
    }

    proptest! {
        /// Rank bookkeeping: spans agree with the base-level order for any
        /// insert set.
        #[test]
        fn prop_ranks_consistent(scores in proptest::collection::vec(-1000i32..1000, 1..80)) {
            let mut list = SkipList::new();
            let mut rng = rand::thread_rng();
            let mut pairs: Vec<(f64, Bytes)> = scores
                .iter()
                .enumerate()
                .map(|(i, s)| (*s as f64, format!("m{i}").into_bytes()))
                .collect();
            for (s, m) in &pairs {
                list.insert(*s, m.clone(), &mut rng);
            }
            pairs.sort_by(|a, b| {
                a.0.partial_cmp(&b.0).unwrap().then_with(|| a.1.cmp(&b.1))
            });
            for (rank, (s, m)) in pairs.iter().enumerate() {
                prop_assert_eq!(list.rank_of(*s, m), Some(rank));
                let idx = list.node_at_rank(rank).unwrap();
                prop_assert_eq!(list.member(idx), m.as_slice());
            }
        }

        /// Deleting a random subset leaves the survivors in order with
        /// correct ranks.
        #[test]
        fn prop_delete_preserves_order(
            n in 1usize..60,
            mask in proptest::collection::vec(any::<bool>(), 60),
        ) {
            let mut list = SkipList::new();
            let mut rng = rand::thread_rng();
            for i in 0..n {
                list.insert((i % 7) as f64, format!("m{i}").into_bytes(), &mut rng);
            }
            let mut kept: Vec<(f64, Bytes)> = Vec::new();
            for i in 0..n {
                let member = format!("m{i}").into_bytes();
                let score = (i % 7) as f64;
                if mask[i] {
                    prop_assert!(list.delete(score, &member));
                } else {
                    kept.push((score, member));
                }
            }
            kept.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap().then_with(|| a.1.cmp(&b.1)));
            prop_assert_eq!(list.len(), kept.len());
            for (rank, (s, m)) in kept.iter().enumerate() {
                prop_assert_eq!(list.rank_of(*s, m), Some(rank));
            }
        }
    }
}

//! Low-level containers for the Ember store.
//!
//! Four containers back the compact and expanded value encodings:
//! - [`ziplist::Ziplist`]: single-buffer entry sequence with back-links
//! - [`intset::IntSet`]: sorted fixed-width integer array
//! - [`dict::Dict`]: chained hash map with two-table incremental rehash
//! - [`skiplist::SkipList`]: ordered map keyed by (score, member) with
//!   rank-aware spans

#![warn(clippy::all)]

pub mod dict;
pub mod intset;
pub mod skiplist;
pub mod ziplist;

pub use dict::Dict;
pub use intset::IntSet;
pub use skiplist::{RangeSpec, SkipList};
pub use ziplist::{Ziplist, ZlValue};

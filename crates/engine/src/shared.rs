//! Process-lifetime shared objects.
//!
//! Small integers are by far the most repeated values in practice, so the
//! first 10 000 are allocated once and handed out as shared references.
//! Shared objects are never mutated: any mutator that finds a share count
//! above one clones first (`Arc::make_mut`), so the pool stays pristine for
//! the life of the process.

use crate::object::{Object, SharedObject, StrVal, Value};
use once_cell::sync::Lazy;
use std::sync::Arc;

/// How many small integers are pooled.
pub const POOL_INTEGERS: i64 = 10_000;

static INTEGERS: Lazy<Vec<SharedObject>> = Lazy::new(|| {
    (0..POOL_INTEGERS)
        .map(|n| Arc::new(Object::new(Value::Str(StrVal::Int(n)), 0)))
        .collect()
});

/// The pooled object for `n`, when `n` is in the pooled range.
pub fn integer(n: i64) -> Option<SharedObject> {
    if (0..POOL_INTEGERS).contains(&n) {
        Some(Arc::clone(&INTEGERS[n as usize]))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_covers_small_range() {
        let five = integer(5).unwrap();
        match &five.value {
            Value::Str(StrVal::Int(5)) => {}
            other => panic!("wrong pooled value: {other:?}"),
        }
        assert!(integer(9_999).is_some());
        assert!(integer(10_000).is_none());
        assert!(integer(-1).is_none());
    }

    #[test]
    fn test_pool_objects_are_shared() {
        let a = integer(42).unwrap();
        let b = integer(42).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert!(Arc::strong_count(&a) >= 3); // pool + both handles
    }
}

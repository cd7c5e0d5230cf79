//! Typed command implementations, grouped by value kind plus the keyspace,
//! transaction, and admin surfaces.
//!
//! Handlers follow one shape: read configuration into locals, resolve the
//! key (lazy expiration happens in the lookup), mutate through
//! `Arc::make_mut` so shared objects are cloned before the first write,
//! then bump the dirty counter and signal watchers. Propagation to the log
//! happens in dispatch after the handler commits, using `prop_override`
//! when the logged form differs from the request.

pub(crate) mod admin;
pub(crate) mod hash;
pub(crate) mod keyspace;
pub(crate) mod list;
pub(crate) mod set;
pub(crate) mod string;
pub(crate) mod transaction;
pub(crate) mod zset;

use ember_core::util::{parse_f64, parse_i64};
use ember_core::{Error, Reply};

/// Hard cap on string values.
pub(crate) const MAX_STRING_BYTES: usize = 512 * 1024 * 1024;

/// Error reply shorthand.
pub(crate) fn err(e: Error) -> Reply {
    Reply::error(&e)
}

/// Strict integer argument.
pub(crate) fn int_arg(arg: &[u8]) -> Result<i64, Reply> {
    parse_i64(arg).ok_or_else(|| err(Error::NotAnInteger))
}

/// Float argument; NaN is rejected, infinities pass.
pub(crate) fn float_arg(arg: &[u8]) -> Result<f64, Reply> {
    match parse_f64(arg) {
        Some(v) if !v.is_nan() => Ok(v),
        _ => Err(err(Error::NotAFloat)),
    }
}

/// Clamp an inclusive (start, stop) index pair with negative-from-end
/// semantics onto `0..len`. `None` means the slice is empty.
pub(crate) fn clamp_range(start: i64, stop: i64, len: usize) -> Option<(usize, usize)> {
    if len == 0 {
        return None;
    }
    let len = len as i64;
    let mut start = if start < 0 { len + start } else { start };
    let mut stop = if stop < 0 { len + stop } else { stop };
    if start < 0 {
        start = 0;
    }
    if stop >= len {
        stop = len - 1;
    }
    if start > stop || start >= len {
        return None;
    }
    Some((start as usize, stop as usize))
}

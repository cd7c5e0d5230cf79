//! Memory-cap eviction and the coarse LRU clock.
//!
//! The clock ticks once per 10 seconds and wraps in a 22-bit space (about
//! a year and a half). Idle-time estimation is wrap-aware on purpose: the
//! on-object stamp is the same width, so a monotonic clock would misread
//! stamps written just before a wrap.
//!
//! Eviction is approximate: a small sample of candidates is drawn and the
//! best victim by policy is dropped, repeating until usage fits under the
//! cap or no candidate remains.

use crate::config::MaxmemoryPolicy;
use crate::object::SharedObject;
use crate::server::Server;
use ember_core::Bytes;
use rand::Rng;
use tracing::debug;

/// Width of the clock in bits.
pub const LRU_CLOCK_BITS: u32 = 22;
/// Largest stamp value.
pub const LRU_CLOCK_MAX: u32 = (1 << LRU_CLOCK_BITS) - 1;
/// Clock resolution in milliseconds.
pub const LRU_CLOCK_RESOLUTION_MS: u64 = 10_000;

/// The coarse clock for `now_ms`.
pub fn lru_clock(now_ms: u64) -> u32 {
    ((now_ms / LRU_CLOCK_RESOLUTION_MS) & LRU_CLOCK_MAX as u64) as u32
}

/// Seconds since the stamp was written, handling one wrap of the clock.
pub fn estimate_idle_s(clock: u32, stamp: u32) -> u64 {
    let ticks = if clock >= stamp {
        (clock - stamp) as u64
    } else {
        (clock + (LRU_CLOCK_MAX - stamp)) as u64
    };
    ticks * (LRU_CLOCK_RESOLUTION_MS / 1000)
}

/// Make room before a mutating command. `Err(())` means the cap cannot be
/// met and deny-OOM commands must be refused.
pub fn free_memory_if_needed(server: &mut Server) -> Result<(), ()> {
    let cap = server.cfg.maxmemory;
    if cap == 0 || server.mem_used <= cap {
        return Ok(());
    }
    if server.cfg.maxmemory_policy == MaxmemoryPolicy::NoEviction {
        return Err(());
    }

    let mut freed_any = true;
    while server.mem_used > cap && freed_any {
        freed_any = false;
        for db_idx in 0..server.dbs.len() {
            if server.mem_used <= cap {
                break;
            }
            if let Some(victim) = pick_victim(server, db_idx) {
                debug!(db = db_idx, "evicting key under memory pressure");
                server.stats.evicted_keys += 1;
                server.propagate(db_idx, &[b"DEL".to_vec(), victim.clone()]);
                server.delete_key(db_idx, &victim);
                server.dirty += 1;
                freed_any = true;
            }
        }
    }

    if server.mem_used > cap {
        return Err(());
    }
    Ok(())
}

/// Choose a victim key in `db_idx` per the configured policy.
fn pick_victim(server: &Server, db_idx: usize) -> Option<Bytes> {
    let policy = server.cfg.maxmemory_policy;
    let samples = server.cfg.maxmemory_samples.max(1);
    let db = server.db_ref(db_idx);
    let mut rng = rand::thread_rng();

    match policy {
        MaxmemoryPolicy::NoEviction => None,
        MaxmemoryPolicy::AllKeysRandom => db
            .keys
            .random_entry(&mut rng)
            .map(|(key, _)| key.clone()),
        MaxmemoryPolicy::VolatileRandom => db
            .expires
            .random_entry(&mut rng)
            .map(|(key, _)| key.clone()),
        MaxmemoryPolicy::AllKeysLru => {
            sample_oldest(server, db_idx, samples, false, &mut rng)
        }
        MaxmemoryPolicy::VolatileLru => {
            sample_oldest(server, db_idx, samples, true, &mut rng)
        }
        MaxmemoryPolicy::VolatileTtl => {
            let mut best: Option<(Bytes, u64)> = None;
            for _ in 0..samples {
                if let Some((key, deadline)) = db.expires.random_entry(&mut rng) {
                    if best.as_ref().map_or(true, |(_, d)| deadline < d) {
                        best = Some((key.clone(), *deadline));
                    }
                }
            }
            best.map(|(key, _)| key)
        }
    }
}

/// Sample `n` candidates and return the one with the oldest access stamp.
fn sample_oldest(
    server: &Server,
    db_idx: usize,
    n: usize,
    volatile_only: bool,
    rng: &mut impl Rng,
) -> Option<Bytes> {
    let db = server.db_ref(db_idx);
    let mut best: Option<(Bytes, u64)> = None;
    for _ in 0..n {
        let candidate: Option<(&Bytes, &SharedObject)> = if volatile_only {
            db.expires
                .random_entry(rng)
                .and_then(|(key, _)| db.keys.get(key).map(|obj| (key, obj)))
        } else {
            db.keys.random_entry(rng)
        };
        if let Some((key, obj)) = candidate {
            let idle = estimate_idle_s(server.lru_clock, obj.lru_stamp());
            if best.as_ref().map_or(true, |(_, i)| idle > *i) {
                best = Some((key.clone(), idle));
            }
        }
    }
    best.map(|(key, _)| key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clock_resolution() {
        assert_eq!(lru_clock(0), 0);
        assert_eq!(lru_clock(9_999), 0);
        assert_eq!(lru_clock(10_000), 1);
        assert_eq!(lru_clock(25_000), 2);
    }

    #[test]
    fn test_idle_simple() {
        assert_eq!(estimate_idle_s(10, 10), 0);
        assert_eq!(estimate_idle_s(10, 4), 60);
    }

    #[test]
    fn test_idle_across_wrap() {
        // Stamp written just before the wrap, clock just after it.
        let stamp = LRU_CLOCK_MAX - 2;
        let clock = 3;
        assert_eq!(estimate_idle_s(clock, stamp), 50);
    }
}

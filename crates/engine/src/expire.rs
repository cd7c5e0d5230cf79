//! Active expiration: probabilistic sampling from the expire tables.
//!
//! Each cycle samples a handful of random deadline entries per database and
//! deletes the expired ones, repeating while a quarter or more of the last
//! sample was expired: a dense pocket of dead keys keeps the loop going.
//! The whole cycle is bounded by a millisecond budget so it never starves
//! command processing.

use crate::server::Server;
use ember_core::Bytes;
use std::time::Instant;

/// Deadline entries sampled per iteration.
const SAMPLE_SIZE: usize = 20;
/// Keep looping while more than this fraction of a sample was expired.
const REPEAT_NUM: usize = SAMPLE_SIZE / 4;
/// Cycle budget: a quarter of a 100 ms tick.
const CYCLE_BUDGET_MS: u64 = 25;

/// Run one active-expiration cycle over every database.
pub fn active_expire_cycle(server: &mut Server) {
    let started = Instant::now();
    let now = server.now_ms;

    for db_idx in 0..server.dbs.len() {
        loop {
            if server.dbs[db_idx].expires.is_empty() {
                break;
            }
            let mut expired = 0;
            let mut doomed: Vec<Bytes> = Vec::new();
            {
                let db = server.db_ref(db_idx);
                let mut rng = rand::thread_rng();
                let samples = SAMPLE_SIZE.min(db.expires.len());
                for _ in 0..samples {
                    if let Some((key, deadline)) = db.expires.random_entry(&mut rng) {
                        if *deadline < now {
                            doomed.push(key.clone());
                        }
                    }
                }
            }
            for key in doomed {
                // Sampling can return the same key twice; delete once.
                if server.dbs[db_idx].expire_of(&key).is_some() {
                    server.stats.expired_keys += 1;
                    server.propagate(db_idx, &[b"DEL".to_vec(), key.clone()]);
                    server.delete_key(db_idx, &key);
                    expired += 1;
                }
            }
            if expired <= REPEAT_NUM {
                break;
            }
            if started.elapsed().as_millis() as u64 > CYCLE_BUDGET_MS {
                return;
            }
        }
        if started.elapsed().as_millis() as u64 > CYCLE_BUDGET_MS {
            return;
        }
    }
}

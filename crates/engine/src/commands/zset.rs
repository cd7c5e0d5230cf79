//! Sorted-set operations.
//!
//! The compact form keeps alternating member/score entries sorted by
//! (score, member); the expanded form pairs a score map with the skiplist.
//! Updates that change a score remove and reinsert the ordered node so
//! rank state is never stale.

use crate::client::Client;
use crate::commands::{clamp_range, err, int_arg};
use crate::object::{Object, Value, ZSetSkip, ZSetVal};
use crate::server::Server;
use ember_core::util::{format_f64, parse_f64};
use ember_core::{Bytes, Error, Reply};
use ember_storage::{RangeSpec, Ziplist};
use std::sync::Arc;

fn expect_zset(obj: &Object) -> Result<&ZSetVal, Reply> {
    match &obj.value {
        Value::ZSet(zset) => Ok(zset),
        _ => Err(err(Error::WrongType)),
    }
}

/// Parse a score, rejecting NaN.
fn score_arg(arg: &[u8]) -> Result<f64, Reply> {
    match parse_f64(arg) {
        Some(v) if !v.is_nan() => Ok(v),
        _ => Err(err(Error::NotAFloat)),
    }
}

/// Parse a range endpoint: `(3.5` is exclusive, `-inf`/`+inf` unbounded.
fn bound_arg(arg: &[u8]) -> Result<(f64, bool), Reply> {
    let (exclusive, rest) = match arg.first() {
        Some(b'(') => (true, &arg[1..]),
        _ => (false, arg),
    };
    match parse_f64(rest) {
        Some(v) if !v.is_nan() => Ok((v, exclusive)),
        _ => Err(Reply::Error("ERR min or max is not a float".into())),
    }
}

fn range_args(min: &[u8], max: &[u8]) -> Result<RangeSpec, Reply> {
    let (min, minex) = bound_arg(min)?;
    let (max, maxex) = bound_arg(max)?;
    Ok(RangeSpec { min, max, minex, maxex })
}

// ---- compact-form helpers ----

/// Locate `member` in the packed form; returns (pair index, score).
fn zzl_find(zl: &Ziplist, member: &[u8]) -> Option<(usize, f64)> {
    let mut idx = 0;
    let mut iter = zl.iter();
    while let Some(m) = iter.next() {
        let s = iter.next().expect("odd entry count in packed zset");
        if m.eq_bytes(member) {
            let score = parse_f64(&s.to_bytes()).expect("unparseable stored score");
            return Some((idx, score));
        }
        idx += 2;
    }
    None
}

/// Insert keeping (score, member) order.
fn zzl_insert(zl: &mut Ziplist, member: &[u8], score: f64) {
    let mut idx = 0;
    {
        let mut iter = zl.iter();
        while let Some(m) = iter.next() {
            let s = iter.next().expect("odd entry count in packed zset");
            let at = parse_f64(&s.to_bytes()).expect("unparseable stored score");
            let member_bytes = m.to_bytes();
            if at > score || (at == score && member_bytes.as_slice() > member) {
                break;
            }
            idx += 2;
        }
    }
    zl.insert(idx, member);
    zl.insert(idx + 1, &format_f64(score));
}

fn zzl_delete(zl: &mut Ziplist, pair_idx: usize) {
    zl.remove_range(pair_idx, 2);
}

// ---- shared add path ----

struct AddOutcome {
    added: i64,
    changed: i64,
}

/// Apply (score, member) upserts to a sorted-set value, promoting the
/// compact form when thresholds are crossed.
fn zset_add(
    zset: &mut ZSetVal,
    pairs: &[(f64, Bytes)],
    max_entries: usize,
    max_value: usize,
) -> AddOutcome {
    let mut outcome = AddOutcome { added: 0, changed: 0 };
    let mut rng = rand::thread_rng();
    for (score, member) in pairs {
        if let ZSetVal::Packed(_) = zset {
            if member.len() > max_value {
                zset.promote(&mut rng);
            }
        }
        match zset {
            ZSetVal::Packed(zl) => match zzl_find(zl, member) {
                Some((idx, old)) => {
                    if old != *score {
                        zzl_delete(zl, idx);
                        zzl_insert(zl, member, *score);
                        outcome.changed += 1;
                    }
                }
                None => {
                    zzl_insert(zl, member, *score);
                    outcome.added += 1;
                    if zl.len() / 2 > max_entries {
                        zset.promote(&mut rng);
                    }
                }
            },
            ZSetVal::Skip(skip) => match skip.scores.get(member).copied() {
                Some(old) => {
                    if old != *score {
                        skip.upsert(member, *score, &mut rng);
                        outcome.changed += 1;
                    }
                }
                None => {
                    skip.upsert(member, *score, &mut rng);
                    outcome.added += 1;
                }
            },
        }
    }
    outcome
}

fn ensure_zset(server: &mut Server, db: usize, key: &[u8]) -> Result<(), Reply> {
    match server.lookup_write(db, key) {
        Some(obj) => {
            expect_zset(&obj)?;
            Ok(())
        }
        None => {
            let obj = Arc::new(Object::new(
                Value::ZSet(ZSetVal::Packed(Ziplist::new())),
                server.lru_clock,
            ));
            server.add_key(db, key, obj);
            Ok(())
        }
    }
}

pub(crate) fn cmd_zadd(server: &mut Server, client: &mut Client, argv: &[Bytes]) -> Reply {
    if (argv.len() - 2) % 2 != 0 {
        return err(Error::Syntax);
    }
    let mut pairs = Vec::with_capacity((argv.len() - 2) / 2);
    for pair in argv[2..].chunks(2) {
        let score = match score_arg(&pair[0]) {
            Ok(v) => v,
            Err(reply) => return reply,
        };
        pairs.push((score, pair[1].clone()));
    }

    let db = client.db;
    let key = &argv[1];
    let max_entries = server.cfg.zset_max_ziplist_entries;
    let max_value = server.cfg.zset_max_ziplist_value;
    if let Err(reply) = ensure_zset(server, db, key) {
        return reply;
    }

    let outcome = {
        let arc = server.dbs[db].keys.get_mut(key).expect("present");
        let obj = Arc::make_mut(arc);
        let Value::ZSet(zset) = &mut obj.value else {
            unreachable!("type checked above");
        };
        zset_add(zset, &pairs, max_entries, max_value)
    };

    if outcome.added + outcome.changed > 0 {
        server.signal_modified(db, key);
        server.dirty += (outcome.added + outcome.changed) as u64;
    }
    Reply::Int(outcome.added)
}

pub(crate) fn cmd_zincrby(server: &mut Server, client: &mut Client, argv: &[Bytes]) -> Reply {
    let delta = match score_arg(&argv[2]) {
        Ok(v) => v,
        Err(reply) => return reply,
    };
    let db = client.db;
    let key = &argv[1];
    let member = &argv[3];
    let max_entries = server.cfg.zset_max_ziplist_entries;
    let max_value = server.cfg.zset_max_ziplist_value;
    if let Err(reply) = ensure_zset(server, db, key) {
        return reply;
    }

    let current = {
        let Some(obj) = server.lookup_write(db, key) else {
            unreachable!("ensured above");
        };
        match &obj.value {
            Value::ZSet(zset) => zset.score(member).unwrap_or(0.0),
            _ => unreachable!("type checked above"),
        }
    };
    let next = current + delta;
    if next.is_nan() {
        return Reply::Error("ERR resulting score is not a number (NaN)".into());
    }

    {
        let arc = server.dbs[db].keys.get_mut(key).expect("present");
        let obj = Arc::make_mut(arc);
        let Value::ZSet(zset) = &mut obj.value else {
            unreachable!("type checked above");
        };
        zset_add(zset, &[(next, member.clone())], max_entries, max_value);
    }
    server.signal_modified(db, key);
    server.dirty += 1;
    Reply::Bulk(format_f64(next))
}

pub(crate) fn cmd_zrem(server: &mut Server, client: &mut Client, argv: &[Bytes]) -> Reply {
    let db = client.db;
    let key = &argv[1];
    match server.lookup_write(db, key) {
        Some(obj) => {
            if expect_zset(&obj).is_err() {
                return err(Error::WrongType);
            }
        }
        None => return Reply::Int(0),
    }

    let (removed, emptied) = {
        let arc = server.dbs[db].keys.get_mut(key).expect("present");
        let obj = Arc::make_mut(arc);
        let Value::ZSet(zset) = &mut obj.value else {
            unreachable!("type checked above");
        };
        let mut removed = 0;
        for member in &argv[2..] {
            let gone = match zset {
                ZSetVal::Packed(zl) => match zzl_find(zl, member) {
                    Some((idx, _)) => {
                        zzl_delete(zl, idx);
                        true
                    }
                    None => false,
                },
                ZSetVal::Skip(skip) => skip.remove(member),
            };
            if gone {
                removed += 1;
            }
        }
        (removed, zset.is_empty())
    };

    if emptied {
        server.delete_key(db, key);
    } else if removed > 0 {
        server.signal_modified(db, key);
    }
    if removed > 0 {
        server.dirty += removed as u64;
    }
    Reply::Int(removed)
}

fn with_scores_flag(argv: &[Bytes], at: usize) -> Result<bool, Reply> {
    match argv.len() - at {
        0 => Ok(false),
        1 if argv[at].eq_ignore_ascii_case(b"WITHSCORES") => Ok(true),
        _ => Err(err(Error::Syntax)),
    }
}

fn emit_entries(entries: Vec<(Bytes, f64)>, with_scores: bool) -> Reply {
    let mut out = Vec::with_capacity(entries.len() * if with_scores { 2 } else { 1 });
    for (member, score) in entries {
        out.push(Reply::Bulk(member));
        if with_scores {
            out.push(Reply::Bulk(format_f64(score)));
        }
    }
    Reply::Array(out)
}

fn range_generic(server: &mut Server, client: &mut Client, argv: &[Bytes], rev: bool) -> Reply {
    let (start, stop) = match (int_arg(&argv[2]), int_arg(&argv[3])) {
        (Ok(a), Ok(b)) => (a, b),
        (Err(reply), _) | (_, Err(reply)) => return reply,
    };
    let with_scores = match with_scores_flag(argv, 4) {
        Ok(flag) => flag,
        Err(reply) => return reply,
    };
    let Some(obj) = server.lookup_read(client.db, &argv[1]) else {
        return Reply::Array(Vec::new());
    };
    let zset = match expect_zset(&obj) {
        Ok(zset) => zset,
        Err(reply) => return reply,
    };

    let Some((lo, hi)) = clamp_range(start, stop, zset.len()) else {
        return Reply::Array(Vec::new());
    };
    // Reverse-rank indices mirror onto forward ranks; collect forward and
    // flip at the end.
    let (lo, hi) = if rev {
        let len = zset.len();
        (len - 1 - hi, len - 1 - lo)
    } else {
        (lo, hi)
    };
    let mut slice: Vec<(Bytes, f64)> = match zset {
        ZSetVal::Packed(_) => zset.entries()[lo..=hi].to_vec(),
        ZSetVal::Skip(skip) => {
            let mut out = Vec::with_capacity(hi - lo + 1);
            let mut cursor = skip.list.node_at_rank(lo);
            while let Some(idx) = cursor {
                out.push((skip.list.member(idx).to_vec(), skip.list.score(idx)));
                if out.len() == hi - lo + 1 {
                    break;
                }
                cursor = skip.list.next(idx);
            }
            out
        }
    };
    if rev {
        slice.reverse();
    }
    emit_entries(slice, with_scores)
}

pub(crate) fn cmd_zrange(server: &mut Server, client: &mut Client, argv: &[Bytes]) -> Reply {
    range_generic(server, client, argv, false)
}

pub(crate) fn cmd_zrevrange(server: &mut Server, client: &mut Client, argv: &[Bytes]) -> Reply {
    range_generic(server, client, argv, true)
}

fn score_range_generic(
    server: &mut Server,
    client: &mut Client,
    argv: &[Bytes],
    rev: bool,
) -> Reply {
    // In the reversed form the max comes first.
    let range = match if rev {
        range_args(&argv[3], &argv[2])
    } else {
        range_args(&argv[2], &argv[3])
    } {
        Ok(range) => range,
        Err(reply) => return reply,
    };

    let mut with_scores = false;
    let mut offset = 0i64;
    let mut count = -1i64;
    let mut i = 4;
    while i < argv.len() {
        if argv[i].eq_ignore_ascii_case(b"WITHSCORES") {
            with_scores = true;
            i += 1;
        } else if argv[i].eq_ignore_ascii_case(b"LIMIT") && i + 2 < argv.len() {
            match (int_arg(&argv[i + 1]), int_arg(&argv[i + 2])) {
                (Ok(a), Ok(b)) => {
                    offset = a;
                    count = b;
                }
                _ => return err(Error::Syntax),
            }
            i += 3;
        } else {
            return err(Error::Syntax);
        }
    }

    let Some(obj) = server.lookup_read(client.db, &argv[1]) else {
        return Reply::Array(Vec::new());
    };
    let zset = match expect_zset(&obj) {
        Ok(zset) => zset,
        Err(reply) => return reply,
    };

    let mut matched: Vec<(Bytes, f64)> = zset
        .entries()
        .into_iter()
        .filter(|(_, score)| range.gte_min(*score) && range.lte_max(*score))
        .collect();
    if rev {
        matched.reverse();
    }

    let skipped = matched
        .into_iter()
        .skip(offset.max(0) as usize);
    let limited: Vec<(Bytes, f64)> = if count < 0 {
        skipped.collect()
    } else {
        skipped.take(count as usize).collect()
    };
    emit_entries(limited, with_scores)
}

pub(crate) fn cmd_zrangebyscore(server: &mut Server, client: &mut Client, argv: &[Bytes]) -> Reply {
    score_range_generic(server, client, argv, false)
}

pub(crate) fn cmd_zrevrangebyscore(
    server: &mut Server,
    client: &mut Client,
    argv: &[Bytes],
) -> Reply {
    score_range_generic(server, client, argv, true)
}

pub(crate) fn cmd_zcount(server: &mut Server, client: &mut Client, argv: &[Bytes]) -> Reply {
    let range = match range_args(&argv[2], &argv[3]) {
        Ok(range) => range,
        Err(reply) => return reply,
    };
    let Some(obj) = server.lookup_read(client.db, &argv[1]) else {
        return Reply::Int(0);
    };
    let zset = match expect_zset(&obj) {
        Ok(zset) => zset,
        Err(reply) => return reply,
    };
    let count = match zset {
        ZSetVal::Packed(_) => zset
            .entries()
            .into_iter()
            .filter(|(_, score)| range.gte_min(*score) && range.lte_max(*score))
            .count(),
        ZSetVal::Skip(skip) => match skip.list.first_in_range(&range) {
            Some(first) => {
                let last = skip
                    .list
                    .last_in_range(&range)
                    .expect("non-empty range has a last node");
                let first_rank = skip
                    .list
                    .rank_of(skip.list.score(first), skip.list.member(first))
                    .expect("node has a rank");
                let last_rank = skip
                    .list
                    .rank_of(skip.list.score(last), skip.list.member(last))
                    .expect("node has a rank");
                last_rank - first_rank + 1
            }
            None => 0,
        },
    };
    Reply::Int(count as i64)
}

pub(crate) fn cmd_zcard(server: &mut Server, client: &mut Client, argv: &[Bytes]) -> Reply {
    match server.lookup_read(client.db, &argv[1]) {
        Some(obj) => match expect_zset(&obj) {
            Ok(zset) => Reply::Int(zset.len() as i64),
            Err(reply) => reply,
        },
        None => Reply::Int(0),
    }
}

pub(crate) fn cmd_zscore(server: &mut Server, client: &mut Client, argv: &[Bytes]) -> Reply {
    match server.lookup_read(client.db, &argv[1]) {
        Some(obj) => match expect_zset(&obj) {
            Ok(zset) => match zset.score(&argv[2]) {
                Some(score) => Reply::Bulk(format_f64(score)),
                None => Reply::Nil,
            },
            Err(reply) => reply,
        },
        None => Reply::Nil,
    }
}

fn rank_generic(server: &mut Server, client: &mut Client, argv: &[Bytes], rev: bool) -> Reply {
    let Some(obj) = server.lookup_read(client.db, &argv[1]) else {
        return Reply::Nil;
    };
    let zset = match expect_zset(&obj) {
        Ok(zset) => zset,
        Err(reply) => return reply,
    };
    let rank = match zset {
        ZSetVal::Packed(_) => zset
            .entries()
            .iter()
            .position(|(member, _)| member == &argv[2]),
        ZSetVal::Skip(skip) => skip
            .scores
            .get(&argv[2])
            .copied()
            .and_then(|score| skip.list.rank_of(score, &argv[2])),
    };
    match rank {
        Some(rank) => {
            let rank = if rev { zset.len() - 1 - rank } else { rank };
            Reply::Int(rank as i64)
        }
        None => Reply::Nil,
    }
}

pub(crate) fn cmd_zrank(server: &mut Server, client: &mut Client, argv: &[Bytes]) -> Reply {
    rank_generic(server, client, argv, false)
}

pub(crate) fn cmd_zrevrank(server: &mut Server, client: &mut Client, argv: &[Bytes]) -> Reply {
    rank_generic(server, client, argv, true)
}

pub(crate) fn cmd_zremrangebyscore(
    server: &mut Server,
    client: &mut Client,
    argv: &[Bytes],
) -> Reply {
    let range = match range_args(&argv[2], &argv[3]) {
        Ok(range) => range,
        Err(reply) => return reply,
    };
    let db = client.db;
    let key = &argv[1];
    match server.lookup_write(db, key) {
        Some(obj) => {
            if expect_zset(&obj).is_err() {
                return err(Error::WrongType);
            }
        }
        None => return Reply::Int(0),
    }

    let (removed, emptied) = {
        let arc = server.dbs[db].keys.get_mut(key).expect("present");
        let obj = Arc::make_mut(arc);
        let Value::ZSet(zset) = &mut obj.value else {
            unreachable!("type checked above");
        };
        let removed = match zset {
            ZSetVal::Packed(zl) => {
                let doomed: Vec<Bytes> = {
                    let mut out = Vec::new();
                    let mut iter = zl.iter();
                    while let Some(m) = iter.next() {
                        let s = iter.next().expect("odd entry count in packed zset");
                        let score = parse_f64(&s.to_bytes()).expect("unparseable stored score");
                        if range.gte_min(score) && range.lte_max(score) {
                            out.push(m.to_bytes());
                        }
                    }
                    out
                };
                for member in &doomed {
                    if let Some((idx, _)) = zzl_find(zl, member) {
                        zzl_delete(zl, idx);
                    }
                }
                doomed.len()
            }
            ZSetVal::Skip(skip) => {
                let removed = skip.list.delete_range_by_score(&range);
                for (member, _) in &removed {
                    skip.scores.remove(member);
                }
                removed.len()
            }
        };
        (removed, zset.is_empty())
    };

    if emptied {
        server.delete_key(db, key);
    } else if removed > 0 {
        server.signal_modified(db, key);
    }
    if removed > 0 {
        server.dirty += removed as u64;
    }
    Reply::Int(removed as i64)
}

pub(crate) fn cmd_zremrangebyrank(
    server: &mut Server,
    client: &mut Client,
    argv: &[Bytes],
) -> Reply {
    let (start, stop) = match (int_arg(&argv[2]), int_arg(&argv[3])) {
        (Ok(a), Ok(b)) => (a, b),
        (Err(reply), _) | (_, Err(reply)) => return reply,
    };
    let db = client.db;
    let key = &argv[1];
    match server.lookup_write(db, key) {
        Some(obj) => {
            if expect_zset(&obj).is_err() {
                return err(Error::WrongType);
            }
        }
        None => return Reply::Int(0),
    }

    let (removed, emptied) = {
        let arc = server.dbs[db].keys.get_mut(key).expect("present");
        let obj = Arc::make_mut(arc);
        let Value::ZSet(zset) = &mut obj.value else {
            unreachable!("type checked above");
        };
        let Some((lo, hi)) = clamp_range(start, stop, zset.len()) else {
            return Reply::Int(0);
        };
        let removed = match zset {
            ZSetVal::Packed(zl) => {
                zl.remove_range(lo * 2, (hi - lo + 1) * 2);
                hi - lo + 1
            }
            ZSetVal::Skip(skip) => {
                let removed = skip.list.delete_range_by_rank(lo, hi);
                for (member, _) in &removed {
                    skip.scores.remove(member);
                }
                removed.len()
            }
        };
        (removed, zset.is_empty())
    };

    if emptied {
        server.delete_key(db, key);
    } else if removed > 0 {
        server.signal_modified(db, key);
    }
    if removed > 0 {
        server.dirty += removed as u64;
    }
    Reply::Int(removed as i64)
}

#[derive(Clone, Copy, PartialEq)]
enum Aggregate {
    Sum,
    Min,
    Max,
}

impl Aggregate {
    fn apply(&self, a: f64, b: f64) -> f64 {
        match self {
            Aggregate::Sum => {
                let sum = a + b;
                // +inf and -inf disagree; define the sum as zero.
                if sum.is_nan() {
                    0.0
                } else {
                    sum
                }
            }
            Aggregate::Min => a.min(b),
            Aggregate::Max => a.max(b),
        }
    }
}

fn store_generic(server: &mut Server, client: &mut Client, argv: &[Bytes], inter: bool) -> Reply {
    let numkeys = match int_arg(&argv[2]) {
        Ok(v) if v >= 1 => v as usize,
        Ok(_) => {
            return Reply::Error(
                "ERR at least 1 input key is needed for ZUNIONSTORE/ZINTERSTORE".into(),
            )
        }
        Err(reply) => return reply,
    };
    if argv.len() < 3 + numkeys {
        return err(Error::Syntax);
    }
    let source_keys = &argv[3..3 + numkeys];
    let mut weights = vec![1.0f64; numkeys];
    let mut aggregate = Aggregate::Sum;

    let mut i = 3 + numkeys;
    while i < argv.len() {
        if argv[i].eq_ignore_ascii_case(b"WEIGHTS") {
            if argv.len() < i + 1 + numkeys {
                return err(Error::Syntax);
            }
            for (w, arg) in weights.iter_mut().zip(&argv[i + 1..i + 1 + numkeys]) {
                match score_arg(arg) {
                    Ok(v) => *w = v,
                    Err(_) => return Reply::Error("ERR weight value is not a float".into()),
                }
            }
            i += 1 + numkeys;
        } else if argv[i].eq_ignore_ascii_case(b"AGGREGATE") && i + 1 < argv.len() {
            aggregate = match String::from_utf8_lossy(&argv[i + 1]).to_uppercase().as_str() {
                "SUM" => Aggregate::Sum,
                "MIN" => Aggregate::Min,
                "MAX" => Aggregate::Max,
                _ => return err(Error::Syntax),
            };
            i += 2;
        } else {
            return err(Error::Syntax);
        }
    }

    // Each operand: member -> weighted score. Sets count as score 1.
    let db = client.db;
    let mut operands: Vec<Vec<(Bytes, f64)>> = Vec::with_capacity(numkeys);
    for (key, weight) in source_keys.iter().zip(&weights) {
        let entries = match server.lookup_read(db, key) {
            Some(obj) => match &obj.value {
                Value::ZSet(zset) => zset.entries(),
                Value::Set(set) => set.members().into_iter().map(|m| (m, 1.0)).collect(),
                _ => return err(Error::WrongType),
            },
            None => Vec::new(),
        };
        operands.push(
            entries
                .into_iter()
                .map(|(member, score)| {
                    let weighted = score * weight;
                    (member, if weighted.is_nan() { 0.0 } else { weighted })
                })
                .collect(),
        );
    }

    let mut accumulated: std::collections::HashMap<Bytes, (f64, usize)> =
        std::collections::HashMap::new();
    for operand in &operands {
        for (member, score) in operand {
            accumulated
                .entry(member.clone())
                .and_modify(|(acc, seen)| {
                    *acc = aggregate.apply(*acc, *score);
                    *seen += 1;
                })
                .or_insert((*score, 1));
        }
    }

    let mut result: Vec<(Bytes, f64)> = accumulated
        .into_iter()
        .filter(|(_, (_, seen))| !inter || *seen == numkeys)
        .map(|(member, (score, _))| (member, score))
        .collect();
    result.sort_by(|a, b| {
        a.1.partial_cmp(&b.1)
            .expect("scores are never NaN here")
            .then_with(|| a.0.cmp(&b.0))
    });

    let dest = &argv[1];
    if result.is_empty() {
        if server.delete_key(db, dest) {
            server.dirty += 1;
        }
        return Reply::Int(0);
    }

    let max_entries = server.cfg.zset_max_ziplist_entries;
    let max_value = server.cfg.zset_max_ziplist_value;
    let card = result.len();
    let fits_packed =
        card <= max_entries && result.iter().all(|(member, _)| member.len() <= max_value);
    let value = if fits_packed {
        let mut zl = Ziplist::new();
        for (member, score) in &result {
            zl.push_back(member);
            zl.push_back(&format_f64(*score));
        }
        ZSetVal::Packed(zl)
    } else {
        let mut skip = ZSetSkip::default();
        let mut rng = rand::thread_rng();
        for (member, score) in &result {
            skip.upsert(member, *score, &mut rng);
        }
        ZSetVal::Skip(skip)
    };
    let obj = Arc::new(Object::new(Value::ZSet(value), server.lru_clock));
    server.set_key(db, dest, obj);
    server.dirty += 1;
    Reply::Int(card as i64)
}

pub(crate) fn cmd_zunionstore(server: &mut Server, client: &mut Client, argv: &[Bytes]) -> Reply {
    store_generic(server, client, argv, false)
}

pub(crate) fn cmd_zinterstore(server: &mut Server, client: &mut Client, argv: &[Bytes]) -> Reply {
    store_generic(server, client, argv, true)
}

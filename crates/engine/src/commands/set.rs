//! Set operations and the multi-set algebra.
//!
//! Algebra strategy: inputs are sorted by cardinality ascending;
//! intersection walks the smallest set and probes the rest, union
//! accumulates, difference walks the first operand subtracting the others.
//! An empty result deletes the destination instead of storing an empty
//! set.

use crate::client::Client;
use crate::commands::{err, int_arg};
use crate::object::{Object, SetVal, SharedObject, Value};
use crate::server::Server;
use ember_core::util::parse_i64;
use ember_core::{Bytes, Error, Reply};
use ember_storage::{Dict, IntSet};
use std::sync::Arc;

fn expect_set(obj: &Object) -> Result<&SetVal, Reply> {
    match &obj.value {
        Value::Set(set) => Ok(set),
        _ => Err(err(Error::WrongType)),
    }
}

/// Build a set value from members, preferring the integer encoding when
/// every member is a canonical integer and the count fits the threshold.
fn build_set(members: &[Bytes], max_intset: usize) -> SetVal {
    let all_ints: Option<Vec<i64>> = members.iter().map(|m| parse_i64(m)).collect();
    match all_ints {
        Some(ints) if ints.len() <= max_intset => {
            let mut set = IntSet::new();
            for n in ints {
                set.insert(n);
            }
            SetVal::Ints(set)
        }
        _ => {
            let mut dict = Dict::new();
            for member in members {
                dict.insert(member.clone(), ());
            }
            SetVal::Table(dict)
        }
    }
}

/// Add one member, handling intset promotion. Returns true when added.
fn add_member(set: &mut SetVal, member: &[u8], max_intset: usize) -> bool {
    if let SetVal::Ints(ints) = set {
        match parse_i64(member) {
            Some(n) => {
                let added = ints.insert(n);
                if added && ints.len() > max_intset {
                    set.promote();
                }
                return added;
            }
            None => set.promote(),
        }
    }
    match set {
        SetVal::Table(dict) => dict.insert(member.to_vec(), ()).is_none(),
        SetVal::Ints(_) => unreachable!("promoted above"),
    }
}

fn remove_member(set: &mut SetVal, member: &[u8]) -> bool {
    match set {
        SetVal::Ints(ints) => match parse_i64(member) {
            Some(n) => ints.remove(n),
            None => false,
        },
        SetVal::Table(dict) => dict.remove(member).is_some(),
    }
}

pub(crate) fn cmd_sadd(server: &mut Server, client: &mut Client, argv: &[Bytes]) -> Reply {
    let db = client.db;
    let key = &argv[1];
    let max_intset = server.cfg.set_max_intset_entries;

    match server.lookup_write(db, key) {
        Some(obj) => {
            if expect_set(&obj).is_err() {
                return err(Error::WrongType);
            }
        }
        None => {
            // First member decides the initial encoding.
            let initial = if parse_i64(&argv[2]).is_some() {
                SetVal::Ints(IntSet::new())
            } else {
                SetVal::Table(Dict::new())
            };
            let obj = Arc::new(Object::new(Value::Set(initial), server.lru_clock));
            server.add_key(db, key, obj);
        }
    }

    let arc = server.dbs[db].keys.get_mut(key).expect("present");
    let obj = Arc::make_mut(arc);
    let Value::Set(set) = &mut obj.value else {
        unreachable!("type checked above");
    };
    let mut added = 0;
    for member in &argv[2..] {
        if add_member(set, member, max_intset) {
            added += 1;
        }
    }
    if added > 0 {
        server.signal_modified(db, key);
        server.dirty += 1;
    }
    Reply::Int(added)
}

pub(crate) fn cmd_srem(server: &mut Server, client: &mut Client, argv: &[Bytes]) -> Reply {
    let db = client.db;
    let key = &argv[1];
    match server.lookup_write(db, key) {
        Some(obj) => {
            if expect_set(&obj).is_err() {
                return err(Error::WrongType);
            }
        }
        None => return Reply::Int(0),
    }

    let (removed, emptied) = {
        let arc = server.dbs[db].keys.get_mut(key).expect("present");
        let obj = Arc::make_mut(arc);
        let Value::Set(set) = &mut obj.value else {
            unreachable!("type checked above");
        };
        let mut removed = 0;
        for member in &argv[2..] {
            if remove_member(set, member) {
                removed += 1;
            }
        }
        (removed, set.is_empty())
    };

    if emptied {
        server.delete_key(db, key);
    } else if removed > 0 {
        server.signal_modified(db, key);
    }
    if removed > 0 {
        server.dirty += 1;
    }
    Reply::Int(removed)
}

pub(crate) fn cmd_smove(server: &mut Server, client: &mut Client, argv: &[Bytes]) -> Reply {
    let db = client.db;
    let (src, dst, member) = (&argv[1], &argv[2], &argv[3]);
    let max_intset = server.cfg.set_max_intset_entries;

    match server.lookup_write(db, src) {
        Some(obj) => {
            if expect_set(&obj).is_err() {
                return err(Error::WrongType);
            }
        }
        None => return Reply::Int(0),
    }
    if let Some(obj) = server.lookup_write(db, dst) {
        if expect_set(&obj).is_err() {
            return err(Error::WrongType);
        }
    }

    let (moved, emptied) = {
        let arc = server.dbs[db].keys.get_mut(src).expect("present");
        let obj = Arc::make_mut(arc);
        let Value::Set(set) = &mut obj.value else {
            unreachable!("type checked above");
        };
        (remove_member(set, member), set.is_empty())
    };
    if !moved {
        return Reply::Int(0);
    }
    if emptied {
        server.delete_key(db, src);
    } else {
        server.signal_modified(db, src);
    }

    if server.dbs[db].keys.get(dst.as_slice()).is_none() {
        let initial = if parse_i64(member).is_some() {
            SetVal::Ints(IntSet::new())
        } else {
            SetVal::Table(Dict::new())
        };
        let obj = Arc::new(Object::new(Value::Set(initial), server.lru_clock));
        server.add_key(db, dst, obj);
    }
    {
        let arc = server.dbs[db].keys.get_mut(dst).expect("present");
        let obj = Arc::make_mut(arc);
        let Value::Set(set) = &mut obj.value else {
            unreachable!("type checked above");
        };
        add_member(set, member, max_intset);
    }
    server.signal_modified(db, dst);
    server.dirty += 1;
    Reply::Int(1)
}

pub(crate) fn cmd_sismember(server: &mut Server, client: &mut Client, argv: &[Bytes]) -> Reply {
    match server.lookup_read(client.db, &argv[1]) {
        Some(obj) => match expect_set(&obj) {
            Ok(set) => Reply::Int(set.contains(&argv[2]) as i64),
            Err(reply) => reply,
        },
        None => Reply::Int(0),
    }
}

pub(crate) fn cmd_scard(server: &mut Server, client: &mut Client, argv: &[Bytes]) -> Reply {
    match server.lookup_read(client.db, &argv[1]) {
        Some(obj) => match expect_set(&obj) {
            Ok(set) => Reply::Int(set.len() as i64),
            Err(reply) => reply,
        },
        None => Reply::Int(0),
    }
}

/// A uniformly random member of the set.
fn random_member(set: &SetVal) -> Option<Bytes> {
    let mut rng = rand::thread_rng();
    match set {
        SetVal::Ints(ints) => ints.random(&mut rng).map(|n| n.to_string().into_bytes()),
        SetVal::Table(dict) => dict.random_entry(&mut rng).map(|(k, _)| k.clone()),
    }
}

pub(crate) fn cmd_spop(server: &mut Server, client: &mut Client, argv: &[Bytes]) -> Reply {
    let db = client.db;
    let key = &argv[1];
    match server.lookup_write(db, key) {
        Some(obj) => {
            if expect_set(&obj).is_err() {
                return err(Error::WrongType);
            }
        }
        None => return Reply::Nil,
    }

    let (member, emptied) = {
        let arc = server.dbs[db].keys.get_mut(key).expect("present");
        let obj = Arc::make_mut(arc);
        let Value::Set(set) = &mut obj.value else {
            unreachable!("type checked above");
        };
        let Some(member) = random_member(set) else {
            return Reply::Nil;
        };
        remove_member(set, &member);
        (member, set.is_empty())
    };

    if emptied {
        server.delete_key(db, key);
    } else {
        server.signal_modified(db, key);
    }
    server.dirty += 1;
    // The random pick must replay as the concrete removal.
    server.prop_override = Some(vec![vec![b"SREM".to_vec(), key.clone(), member.clone()]]);
    Reply::Bulk(member)
}

pub(crate) fn cmd_srandmember(server: &mut Server, client: &mut Client, argv: &[Bytes]) -> Reply {
    if argv.len() > 3 {
        return err(Error::Syntax);
    }
    let Some(obj) = server.lookup_read(client.db, &argv[1]) else {
        return if argv.len() == 3 {
            Reply::Array(Vec::new())
        } else {
            Reply::Nil
        };
    };
    let set = match expect_set(&obj) {
        Ok(set) => set,
        Err(reply) => return reply,
    };

    if argv.len() == 2 {
        return match random_member(set) {
            Some(member) => Reply::Bulk(member),
            None => Reply::Nil,
        };
    }

    let count = match int_arg(&argv[2]) {
        Ok(v) => v,
        Err(reply) => return reply,
    };
    if count >= 0 {
        // Distinct members, up to the cardinality.
        let mut members = set.members();
        let take = (count as usize).min(members.len());
        let mut rng = rand::thread_rng();
        use rand::seq::SliceRandom;
        members.shuffle(&mut rng);
        Reply::Array(members.into_iter().take(take).map(Reply::Bulk).collect())
    } else {
        // With repetition, exactly |count| members.
        let want = count.unsigned_abs() as usize;
        let mut out = Vec::with_capacity(want);
        for _ in 0..want {
            match random_member(set) {
                Some(member) => out.push(Reply::Bulk(member)),
                None => break,
            }
        }
        Reply::Array(out)
    }
}

pub(crate) fn cmd_smembers(server: &mut Server, client: &mut Client, argv: &[Bytes]) -> Reply {
    match server.lookup_read(client.db, &argv[1]) {
        Some(obj) => match expect_set(&obj) {
            Ok(set) => Reply::Array(set.members().into_iter().map(Reply::Bulk).collect()),
            Err(reply) => reply,
        },
        None => Reply::Array(Vec::new()),
    }
}

/// Fetch algebra inputs; a missing key is an empty operand.
fn fetch_operands(
    server: &mut Server,
    db: usize,
    keys: &[Bytes],
) -> Result<Vec<Option<SharedObject>>, Reply> {
    let mut out = Vec::with_capacity(keys.len());
    for key in keys {
        match server.lookup_read(db, key) {
            Some(obj) => {
                expect_set(&obj)?;
                out.push(Some(obj));
            }
            None => out.push(None),
        }
    }
    Ok(out)
}

fn set_of(obj: &Option<SharedObject>) -> Option<&SetVal> {
    obj.as_ref().map(|obj| match &obj.value {
        Value::Set(set) => set,
        _ => unreachable!("operands type-checked"),
    })
}

enum Algebra {
    Inter,
    Union,
    Diff,
}

fn compute(op: &Algebra, operands: &[Option<SharedObject>]) -> Vec<Bytes> {
    match op {
        Algebra::Inter => {
            if operands.iter().any(|o| o.is_none()) {
                return Vec::new();
            }
            // Walk the smallest operand, probe the rest.
            let mut sets: Vec<&SetVal> = operands.iter().map(|o| set_of(o).unwrap()).collect();
            sets.sort_by_key(|set| set.len());
            let (first, rest) = sets.split_first().expect("arity enforced");
            first
                .members()
                .into_iter()
                .filter(|member| rest.iter().all(|set| set.contains(member)))
                .collect()
        }
        Algebra::Union => {
            let mut seen: Dict<()> = Dict::new();
            let mut out = Vec::new();
            for operand in operands {
                if let Some(set) = set_of(operand) {
                    for member in set.members() {
                        if seen.insert(member.clone(), ()).is_none() {
                            out.push(member);
                        }
                    }
                }
            }
            out
        }
        Algebra::Diff => {
            let Some(first) = set_of(&operands[0]) else {
                return Vec::new();
            };
            first
                .members()
                .into_iter()
                .filter(|member| {
                    operands[1..]
                        .iter()
                        .all(|o| set_of(o).map_or(true, |set| !set.contains(member)))
                })
                .collect()
        }
    }
}

fn algebra_read(server: &mut Server, client: &mut Client, argv: &[Bytes], op: Algebra) -> Reply {
    let operands = match fetch_operands(server, client.db, &argv[1..]) {
        Ok(v) => v,
        Err(reply) => return reply,
    };
    let members = compute(&op, &operands);
    Reply::Array(members.into_iter().map(Reply::Bulk).collect())
}

fn algebra_store(server: &mut Server, client: &mut Client, argv: &[Bytes], op: Algebra) -> Reply {
    let db = client.db;
    let dest = &argv[1];
    let operands = match fetch_operands(server, db, &argv[2..]) {
        Ok(v) => v,
        Err(reply) => return reply,
    };
    let members = compute(&op, &operands);

    if members.is_empty() {
        if server.delete_key(db, dest) {
            server.dirty += 1;
        }
        return Reply::Int(0);
    }
    let card = members.len();
    let set = build_set(&members, server.cfg.set_max_intset_entries);
    let obj = Arc::new(Object::new(Value::Set(set), server.lru_clock));
    server.set_key(db, dest, obj);
    server.dirty += 1;
    Reply::Int(card as i64)
}

pub(crate) fn cmd_sinter(server: &mut Server, client: &mut Client, argv: &[Bytes]) -> Reply {
    algebra_read(server, client, argv, Algebra::Inter)
}

pub(crate) fn cmd_sunion(server: &mut Server, client: &mut Client, argv: &[Bytes]) -> Reply {
    algebra_read(server, client, argv, Algebra::Union)
}

pub(crate) fn cmd_sdiff(server: &mut Server, client: &mut Client, argv: &[Bytes]) -> Reply {
    algebra_read(server, client, argv, Algebra::Diff)
}

pub(crate) fn cmd_sinterstore(server: &mut Server, client: &mut Client, argv: &[Bytes]) -> Reply {
    algebra_store(server, client, argv, Algebra::Inter)
}

pub(crate) fn cmd_sunionstore(server: &mut Server, client: &mut Client, argv: &[Bytes]) -> Reply {
    algebra_store(server, client, argv, Algebra::Union)
}

pub(crate) fn cmd_sdiffstore(server: &mut Server, client: &mut Client, argv: &[Bytes]) -> Reply {
    algebra_store(server, client, argv, Algebra::Diff)
}

//! Hash operations.
//!
//! Field order is an artifact of the encoding (insertion order in the
//! compact form, bucket order in the table) and is not part of the
//! observable contract.

use crate::client::Client;
use crate::commands::{err, float_arg, int_arg};
use crate::object::{HashVal, Object, Value};
use crate::server::Server;
use ember_core::util::{format_f64, parse_f64, parse_i64};
use ember_core::{Bytes, Error, Reply};
use ember_storage::Ziplist;
use std::sync::Arc;

fn expect_hash(obj: &Object) -> Result<&HashVal, Reply> {
    match &obj.value {
        Value::Hash(hash) => Ok(hash),
        _ => Err(err(Error::WrongType)),
    }
}

/// Create the key as an empty compact hash when missing; `WRONGTYPE` when
/// it holds another kind.
fn ensure_hash(server: &mut Server, db: usize, key: &[u8]) -> Result<(), Reply> {
    match server.lookup_write(db, key) {
        Some(obj) => {
            expect_hash(&obj)?;
            Ok(())
        }
        None => {
            let obj = Arc::new(Object::new(
                Value::Hash(HashVal::Packed(Ziplist::new())),
                server.lru_clock,
            ));
            server.add_key(db, key, obj);
            Ok(())
        }
    }
}

/// Set one field with promotion checks. Returns true when created.
fn set_field(
    hash: &mut HashVal,
    field: &[u8],
    value: &[u8],
    max_entries: usize,
    max_value: usize,
) -> bool {
    if let HashVal::Packed(_) = hash {
        if field.len() > max_value || value.len() > max_value {
            hash.promote();
        }
    }
    let created = hash.set(field, value);
    if let HashVal::Packed(zl) = hash {
        if zl.len() / 2 > max_entries {
            hash.promote();
        }
    }
    created
}

pub(crate) fn cmd_hset(server: &mut Server, client: &mut Client, argv: &[Bytes]) -> Reply {
    let db = client.db;
    let key = &argv[1];
    let max_entries = server.cfg.hash_max_ziplist_entries;
    let max_value = server.cfg.hash_max_ziplist_value;
    if let Err(reply) = ensure_hash(server, db, key) {
        return reply;
    }

    let created = {
        let arc = server.dbs[db].keys.get_mut(key).expect("present");
        let obj = Arc::make_mut(arc);
        let Value::Hash(hash) = &mut obj.value else {
            unreachable!("type checked above");
        };
        set_field(hash, &argv[2], &argv[3], max_entries, max_value)
    };
    server.signal_modified(db, key);
    server.dirty += 1;
    Reply::Int(created as i64)
}

pub(crate) fn cmd_hsetnx(server: &mut Server, client: &mut Client, argv: &[Bytes]) -> Reply {
    let db = client.db;
    let key = &argv[1];
    if let Some(obj) = server.lookup_write(db, key) {
        match expect_hash(&obj) {
            Ok(hash) => {
                if hash.get(&argv[2]).is_some() {
                    return Reply::Int(0);
                }
            }
            Err(reply) => return reply,
        }
    }
    cmd_hset(server, client, argv);
    Reply::Int(1)
}

pub(crate) fn cmd_hmset(server: &mut Server, client: &mut Client, argv: &[Bytes]) -> Reply {
    if argv.len() % 2 != 0 {
        return Reply::Error("ERR wrong number of arguments for HMSET".into());
    }
    let db = client.db;
    let key = &argv[1];
    let max_entries = server.cfg.hash_max_ziplist_entries;
    let max_value = server.cfg.hash_max_ziplist_value;
    if let Err(reply) = ensure_hash(server, db, key) {
        return reply;
    }

    {
        let arc = server.dbs[db].keys.get_mut(key).expect("present");
        let obj = Arc::make_mut(arc);
        let Value::Hash(hash) = &mut obj.value else {
            unreachable!("type checked above");
        };
        for pair in argv[2..].chunks(2) {
            set_field(hash, &pair[0], &pair[1], max_entries, max_value);
        }
    }
    server.signal_modified(db, key);
    server.dirty += 1;
    Reply::ok()
}

pub(crate) fn cmd_hget(server: &mut Server, client: &mut Client, argv: &[Bytes]) -> Reply {
    match server.lookup_read(client.db, &argv[1]) {
        Some(obj) => match expect_hash(&obj) {
            Ok(hash) => match hash.get(&argv[2]) {
                Some(value) => Reply::Bulk(value),
                None => Reply::Nil,
            },
            Err(reply) => reply,
        },
        None => Reply::Nil,
    }
}

pub(crate) fn cmd_hmget(server: &mut Server, client: &mut Client, argv: &[Bytes]) -> Reply {
    match server.lookup_read(client.db, &argv[1]) {
        Some(obj) => match expect_hash(&obj) {
            Ok(hash) => Reply::Array(
                argv[2..]
                    .iter()
                    .map(|field| match hash.get(field) {
                        Some(value) => Reply::Bulk(value),
                        None => Reply::Nil,
                    })
                    .collect(),
            ),
            Err(reply) => reply,
        },
        None => Reply::Array(argv[2..].iter().map(|_| Reply::Nil).collect()),
    }
}

pub(crate) fn cmd_hincrby(server: &mut Server, client: &mut Client, argv: &[Bytes]) -> Reply {
    let delta = match int_arg(&argv[3]) {
        Ok(v) => v,
        Err(reply) => return reply,
    };
    let db = client.db;
    let key = &argv[1];
    let max_entries = server.cfg.hash_max_ziplist_entries;
    let max_value = server.cfg.hash_max_ziplist_value;
    if let Err(reply) = ensure_hash(server, db, key) {
        return reply;
    }

    let next = {
        let arc = server.dbs[db].keys.get_mut(key).expect("present");
        let obj = Arc::make_mut(arc);
        let Value::Hash(hash) = &mut obj.value else {
            unreachable!("type checked above");
        };
        let current = match hash.get(&argv[2]) {
            Some(bytes) => match parse_i64(&bytes) {
                Some(n) => n,
                None => return Reply::Error("ERR hash value is not an integer".into()),
            },
            None => 0,
        };
        let Some(next) = current.checked_add(delta) else {
            return err(Error::Overflow);
        };
        set_field(
            hash,
            &argv[2],
            next.to_string().as_bytes(),
            max_entries,
            max_value,
        );
        next
    };
    server.signal_modified(db, key);
    server.dirty += 1;
    Reply::Int(next)
}

pub(crate) fn cmd_hincrbyfloat(server: &mut Server, client: &mut Client, argv: &[Bytes]) -> Reply {
    let delta = match float_arg(&argv[3]) {
        Ok(v) => v,
        Err(reply) => return reply,
    };
    let db = client.db;
    let key = &argv[1];
    let max_entries = server.cfg.hash_max_ziplist_entries;
    let max_value = server.cfg.hash_max_ziplist_value;
    if let Err(reply) = ensure_hash(server, db, key) {
        return reply;
    }

    let rendered = {
        let arc = server.dbs[db].keys.get_mut(key).expect("present");
        let obj = Arc::make_mut(arc);
        let Value::Hash(hash) = &mut obj.value else {
            unreachable!("type checked above");
        };
        let current = match hash.get(&argv[2]) {
            Some(bytes) => match parse_f64(&bytes) {
                Some(v) if !v.is_nan() => v,
                _ => return err(Error::NotAFloat),
            },
            None => 0.0,
        };
        let next = current + delta;
        if next.is_nan() || next.is_infinite() {
            return err(Error::NanOrInfinity);
        }
        let rendered = format_f64(next);
        set_field(hash, &argv[2], &rendered, max_entries, max_value);
        rendered
    };
    server.signal_modified(db, key);
    server.dirty += 1;
    // Log the computed value so replay cannot drift.
    server.prop_override = Some(vec![vec![
        b"HSET".to_vec(),
        key.clone(),
        argv[2].clone(),
        rendered.clone(),
    ]]);
    Reply::Bulk(rendered)
}

pub(crate) fn cmd_hdel(server: &mut Server, client: &mut Client, argv: &[Bytes]) -> Reply {
    let db = client.db;
    let key = &argv[1];
    match server.lookup_write(db, key) {
        Some(obj) => {
            if expect_hash(&obj).is_err() {
                return err(Error::WrongType);
            }
        }
        None => return Reply::Int(0),
    }

    let (removed, emptied) = {
        let arc = server.dbs[db].keys.get_mut(key).expect("present");
        let obj = Arc::make_mut(arc);
        let Value::Hash(hash) = &mut obj.value else {
            unreachable!("type checked above");
        };
        let mut removed = 0;
        for field in &argv[2..] {
            if hash.remove(field) {
                removed += 1;
            }
        }
        (removed, hash.is_empty())
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

pub(crate) fn cmd_hlen(server: &mut Server, client: &mut Client, argv: &[Bytes]) -> Reply {
    match server.lookup_read(client.db, &argv[1]) {
        Some(obj) => match expect_hash(&obj) {
            Ok(hash) => Reply::Int(hash.len() as i64),
            Err(reply) => reply,
        },
        None => Reply::Int(0),
    }
}

fn collect_hash(server: &mut Server, client: &mut Client, argv: &[Bytes], mode: u8) -> Reply {
    match server.lookup_read(client.db, &argv[1]) {
        Some(obj) => match expect_hash(&obj) {
            Ok(hash) => {
                let mut out = Vec::new();
                for (field, value) in hash.entries() {
                    match mode {
                        0 => out.push(Reply::Bulk(field)),
                        1 => out.push(Reply::Bulk(value)),
                        _ => {
                            out.push(Reply::Bulk(field));
                            out.push(Reply::Bulk(value));
                        }
                    }
                }
                Reply::Array(out)
            }
            Err(reply) => reply,
        },
        None => Reply::Array(Vec::new()),
    }
}

pub(crate) fn cmd_hkeys(server: &mut Server, client: &mut Client, argv: &[Bytes]) -> Reply {
    collect_hash(server, client, argv, 0)
}

pub(crate) fn cmd_hvals(server: &mut Server, client: &mut Client, argv: &[Bytes]) -> Reply {
    collect_hash(server, client, argv, 1)
}

pub(crate) fn cmd_hgetall(server: &mut Server, client: &mut Client, argv: &[Bytes]) -> Reply {
    collect_hash(server, client, argv, 2)
}

pub(crate) fn cmd_hexists(server: &mut Server, client: &mut Client, argv: &[Bytes]) -> Reply {
    match server.lookup_read(client.db, &argv[1]) {
        Some(obj) => match expect_hash(&obj) {
            Ok(hash) => Reply::Int(hash.get(&argv[2]).is_some() as i64),
            Err(reply) => reply,
        },
        None => Reply::Int(0),
    }
}

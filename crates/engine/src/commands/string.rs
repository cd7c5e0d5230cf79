//! String operations.

use crate::client::Client;
use crate::commands::{err, float_arg, int_arg, MAX_STRING_BYTES};
use crate::object::{Object, StrVal, Value};
use crate::server::{object_as_int, Server};
use ember_core::util::{format_f64, parse_f64};
use ember_core::{Bytes, Error, Reply};
use std::sync::Arc;

/// Rendered bytes of a string object; `WRONGTYPE` for aggregates.
fn string_bytes(obj: &Object) -> Result<Bytes, Reply> {
    match &obj.value {
        Value::Str(s) => Ok(s.to_bytes()),
        _ => Err(err(Error::WrongType)),
    }
}

fn read_string(server: &mut Server, db: usize, key: &[u8]) -> Result<Option<Bytes>, Reply> {
    match server.lookup_read(db, key) {
        Some(obj) => string_bytes(&obj).map(Some),
        None => Ok(None),
    }
}

/// Replace the value of `key` without touching its deadline; creates the
/// key when absent.
fn overwrite_keep_ttl(server: &mut Server, db: usize, key: &[u8], value: Value) {
    let lru = server.lru_clock;
    if let Some(arc) = server.dbs[db].keys.get_mut(key) {
        let obj = Arc::make_mut(arc);
        obj.value = value;
        obj.touch(lru);
        server.signal_modified(db, key);
    } else {
        server.add_key(db, key, Arc::new(Object::new(value, lru)));
    }
}

pub(crate) fn cmd_get(server: &mut Server, client: &mut Client, argv: &[Bytes]) -> Reply {
    match read_string(server, client.db, &argv[1]) {
        Ok(Some(bytes)) => Reply::Bulk(bytes),
        Ok(None) => Reply::Nil,
        Err(reply) => reply,
    }
}

pub(crate) fn cmd_set(server: &mut Server, client: &mut Client, argv: &[Bytes]) -> Reply {
    let mut expire_ms: Option<u64> = None;
    let mut nx = false;
    let mut xx = false;

    let mut i = 3;
    while i < argv.len() {
        let opt = String::from_utf8_lossy(&argv[i]).to_uppercase();
        match opt.as_str() {
            "NX" => nx = true,
            "XX" => xx = true,
            "EX" | "PX" => {
                i += 1;
                let Some(amount) = argv.get(i) else {
                    return err(Error::Syntax);
                };
                let amount = match int_arg(amount) {
                    Ok(v) => v,
                    Err(reply) => return reply,
                };
                if amount <= 0 {
                    return err(Error::InvalidExpire);
                }
                let ms = if opt == "EX" {
                    amount.checked_mul(1000)
                } else {
                    Some(amount)
                };
                match ms {
                    Some(ms) => expire_ms = Some(ms as u64),
                    None => return err(Error::InvalidExpire),
                }
            }
            _ => return err(Error::Syntax),
        }
        i += 1;
    }
    if nx && xx {
        return err(Error::Syntax);
    }

    let db = client.db;
    let key = &argv[1];
    let exists = server.lookup_write(db, key).is_some();
    if (nx && exists) || (xx && !exists) {
        return Reply::Nil;
    }

    let obj = server.make_string(&argv[2]);
    server.set_key(db, key, obj);
    server.dirty += 1;

    match expire_ms {
        Some(ms) => {
            let deadline = server.clock_ms() + ms;
            server.db_mut(db).set_expire(key, deadline);
            // Split into SET + absolute deadline so replay is exact.
            server.prop_override = Some(vec![
                vec![b"SET".to_vec(), key.clone(), argv[2].clone()],
                vec![
                    b"PEXPIREAT".to_vec(),
                    key.clone(),
                    deadline.to_string().into_bytes(),
                ],
            ]);
        }
        None => {
            if argv.len() > 3 {
                // NX/XX took effect; log the plain assignment.
                server.prop_override =
                    Some(vec![vec![b"SET".to_vec(), key.clone(), argv[2].clone()]]);
            }
        }
    }
    Reply::ok()
}

pub(crate) fn cmd_setnx(server: &mut Server, client: &mut Client, argv: &[Bytes]) -> Reply {
    let db = client.db;
    if server.lookup_write(db, &argv[1]).is_some() {
        return Reply::Int(0);
    }
    let obj = server.make_string(&argv[2]);
    server.set_key(db, &argv[1], obj);
    server.dirty += 1;
    Reply::Int(1)
}

fn setex_generic(
    server: &mut Server,
    client: &mut Client,
    argv: &[Bytes],
    unit_ms: i64,
) -> Reply {
    let seconds = match int_arg(&argv[2]) {
        Ok(v) => v,
        Err(reply) => return reply,
    };
    if seconds <= 0 {
        return err(Error::InvalidExpire);
    }
    let Some(ms) = seconds.checked_mul(unit_ms) else {
        return err(Error::InvalidExpire);
    };

    let db = client.db;
    let key = &argv[1];
    let obj = server.make_string(&argv[3]);
    server.set_key(db, key, obj);
    let deadline = server.clock_ms() + ms as u64;
    server.db_mut(db).set_expire(key, deadline);
    server.dirty += 1;
    server.prop_override = Some(vec![
        vec![b"SET".to_vec(), key.clone(), argv[3].clone()],
        vec![
            b"PEXPIREAT".to_vec(),
            key.clone(),
            deadline.to_string().into_bytes(),
        ],
    ]);
    Reply::ok()
}

pub(crate) fn cmd_setex(server: &mut Server, client: &mut Client, argv: &[Bytes]) -> Reply {
    setex_generic(server, client, argv, 1000)
}

pub(crate) fn cmd_psetex(server: &mut Server, client: &mut Client, argv: &[Bytes]) -> Reply {
    setex_generic(server, client, argv, 1)
}

pub(crate) fn cmd_append(server: &mut Server, client: &mut Client, argv: &[Bytes]) -> Reply {
    let db = client.db;
    let key = &argv[1];
    let current = match read_string_for_write(server, db, key) {
        Ok(v) => v,
        Err(reply) => return reply,
    };
    let mut bytes = current.unwrap_or_default();
    if bytes.len() + argv[2].len() > MAX_STRING_BYTES {
        return err(Error::StringTooLong);
    }
    bytes.extend_from_slice(&argv[2]);
    let len = bytes.len();
    overwrite_keep_ttl(server, db, key, Value::Str(StrVal::Raw(bytes)));
    server.dirty += 1;
    Reply::Int(len as i64)
}

fn read_string_for_write(
    server: &mut Server,
    db: usize,
    key: &[u8],
) -> Result<Option<Bytes>, Reply> {
    match server.lookup_write(db, key) {
        Some(obj) => string_bytes(&obj).map(Some),
        None => Ok(None),
    }
}

pub(crate) fn cmd_strlen(server: &mut Server, client: &mut Client, argv: &[Bytes]) -> Reply {
    match read_string(server, client.db, &argv[1]) {
        Ok(Some(bytes)) => Reply::Int(bytes.len() as i64),
        Ok(None) => Reply::Int(0),
        Err(reply) => reply,
    }
}

fn incr_generic(server: &mut Server, client: &mut Client, argv: &[Bytes], delta: i64) -> Reply {
    let db = client.db;
    let key = &argv[1];
    let current = match server.lookup_write(db, key) {
        Some(obj) => match &obj.value {
            Value::Str(_) => match object_as_int(&obj) {
                Some(n) => n,
                None => return err(Error::NotAnInteger),
            },
            _ => return err(Error::WrongType),
        },
        None => 0,
    };
    let Some(next) = current.checked_add(delta) else {
        return err(Error::Overflow);
    };
    overwrite_keep_ttl(server, db, key, Value::Str(StrVal::Int(next)));
    server.dirty += 1;
    Reply::Int(next)
}

pub(crate) fn cmd_incr(server: &mut Server, client: &mut Client, argv: &[Bytes]) -> Reply {
    incr_generic(server, client, argv, 1)
}

pub(crate) fn cmd_decr(server: &mut Server, client: &mut Client, argv: &[Bytes]) -> Reply {
    incr_generic(server, client, argv, -1)
}

pub(crate) fn cmd_incrby(server: &mut Server, client: &mut Client, argv: &[Bytes]) -> Reply {
    match int_arg(&argv[2]) {
        Ok(delta) => incr_generic(server, client, argv, delta),
        Err(reply) => reply,
    }
}

pub(crate) fn cmd_decrby(server: &mut Server, client: &mut Client, argv: &[Bytes]) -> Reply {
    match int_arg(&argv[2]) {
        Ok(delta) => match delta.checked_neg() {
            Some(neg) => incr_generic(server, client, argv, neg),
            None => err(Error::Overflow),
        },
        Err(reply) => reply,
    }
}

pub(crate) fn cmd_incrbyfloat(server: &mut Server, client: &mut Client, argv: &[Bytes]) -> Reply {
    let delta = match float_arg(&argv[2]) {
        Ok(v) => v,
        Err(reply) => return reply,
    };
    let db = client.db;
    let key = &argv[1];
    let current = match read_string_for_write(server, db, key) {
        Ok(Some(bytes)) => match parse_f64(&bytes) {
            Some(v) if !v.is_nan() => v,
            _ => return err(Error::NotAFloat),
        },
        Ok(None) => 0.0,
        Err(reply) => return reply,
    };
    let next = current + delta;
    if next.is_nan() || next.is_infinite() {
        return err(Error::NanOrInfinity);
    }
    let rendered = format_f64(next);
    overwrite_keep_ttl(server, db, key, Value::Str(StrVal::Raw(rendered.clone())));
    server.dirty += 1;

    // Log the computed value as a plain assignment so replay cannot drift
    // through repeated float addition; re-assert the deadline, which a
    // replayed SET would otherwise clear.
    let mut commands = vec![vec![b"SET".to_vec(), key.clone(), rendered.clone()]];
    if let Some(deadline) = server.db_ref(db).expire_of(key) {
        commands.push(vec![
            b"PEXPIREAT".to_vec(),
            key.clone(),
            deadline.to_string().into_bytes(),
        ]);
    }
    server.prop_override = Some(commands);
    Reply::Bulk(rendered)
}

pub(crate) fn cmd_mget(server: &mut Server, client: &mut Client, argv: &[Bytes]) -> Reply {
    let replies = argv[1..]
        .iter()
        .map(|key| match server.lookup_read(client.db, key) {
            Some(obj) => match &obj.value {
                Value::Str(s) => Reply::Bulk(s.to_bytes()),
                _ => Reply::Nil,
            },
            None => Reply::Nil,
        })
        .collect();
    Reply::Array(replies)
}

pub(crate) fn cmd_mset(server: &mut Server, client: &mut Client, argv: &[Bytes]) -> Reply {
    if argv.len() % 2 != 1 {
        return Reply::Error("ERR wrong number of arguments for MSET".into());
    }
    for pair in argv[1..].chunks(2) {
        let obj = server.make_string(&pair[1]);
        server.set_key(client.db, &pair[0], obj);
        server.dirty += 1;
    }
    Reply::ok()
}

pub(crate) fn cmd_msetnx(server: &mut Server, client: &mut Client, argv: &[Bytes]) -> Reply {
    if argv.len() % 2 != 1 {
        return Reply::Error("ERR wrong number of arguments for MSETNX".into());
    }
    let db = client.db;
    for pair in argv[1..].chunks(2) {
        if server.lookup_write(db, &pair[0]).is_some() {
            return Reply::Int(0);
        }
    }
    for pair in argv[1..].chunks(2) {
        let obj = server.make_string(&pair[1]);
        server.set_key(db, &pair[0], obj);
        server.dirty += 1;
    }
    Reply::Int(1)
}

pub(crate) fn cmd_getset(server: &mut Server, client: &mut Client, argv: &[Bytes]) -> Reply {
    let db = client.db;
    let previous = match read_string_for_write(server, db, &argv[1]) {
        Ok(v) => v,
        Err(reply) => return reply,
    };
    let obj = server.make_string(&argv[2]);
    server.set_key(db, &argv[1], obj);
    server.dirty += 1;
    match previous {
        Some(bytes) => Reply::Bulk(bytes),
        None => Reply::Nil,
    }
}

pub(crate) fn cmd_getrange(server: &mut Server, client: &mut Client, argv: &[Bytes]) -> Reply {
    let (start, stop) = match (int_arg(&argv[2]), int_arg(&argv[3])) {
        (Ok(a), Ok(b)) => (a, b),
        (Err(reply), _) | (_, Err(reply)) => return reply,
    };
    let bytes = match read_string(server, client.db, &argv[1]) {
        Ok(Some(bytes)) => bytes,
        Ok(None) => return Reply::Bulk(Vec::new()),
        Err(reply) => return reply,
    };
    match super::clamp_range(start, stop, bytes.len()) {
        Some((lo, hi)) => Reply::Bulk(bytes[lo..=hi].to_vec()),
        None => Reply::Bulk(Vec::new()),
    }
}

pub(crate) fn cmd_setrange(server: &mut Server, client: &mut Client, argv: &[Bytes]) -> Reply {
    let offset = match int_arg(&argv[2]) {
        Ok(v) => v,
        Err(reply) => return reply,
    };
    if offset < 0 {
        return Reply::Error("ERR offset is out of range".into());
    }
    let offset = offset as usize;
    let db = client.db;
    let key = &argv[1];
    let patch = &argv[3];

    let current = match read_string_for_write(server, db, key) {
        Ok(v) => v,
        Err(reply) => return reply,
    };
    if patch.is_empty() {
        return Reply::Int(current.map_or(0, |b| b.len()) as i64);
    }
    if offset + patch.len() > MAX_STRING_BYTES {
        return err(Error::StringTooLong);
    }

    let mut bytes = current.unwrap_or_default();
    if bytes.len() < offset + patch.len() {
        bytes.resize(offset + patch.len(), 0);
    }
    bytes[offset..offset + patch.len()].copy_from_slice(patch);
    let len = bytes.len();
    overwrite_keep_ttl(server, db, key, Value::Str(StrVal::Raw(bytes)));
    server.dirty += 1;
    Reply::Int(len as i64)
}

fn bit_offset_arg(arg: &[u8]) -> Result<usize, Reply> {
    match ember_core::util::parse_i64(arg) {
        Some(v) if v >= 0 && (v as usize) < MAX_STRING_BYTES * 8 => Ok(v as usize),
        _ => Err(Reply::Error(
            "ERR bit offset is not an integer or out of range".into(),
        )),
    }
}

pub(crate) fn cmd_getbit(server: &mut Server, client: &mut Client, argv: &[Bytes]) -> Reply {
    let offset = match bit_offset_arg(&argv[2]) {
        Ok(v) => v,
        Err(reply) => return reply,
    };
    let bytes = match read_string(server, client.db, &argv[1]) {
        Ok(Some(bytes)) => bytes,
        Ok(None) => return Reply::Int(0),
        Err(reply) => return reply,
    };
    let byte = offset / 8;
    if byte >= bytes.len() {
        return Reply::Int(0);
    }
    let bit = (bytes[byte] >> (7 - offset % 8)) & 1;
    Reply::Int(bit as i64)
}

pub(crate) fn cmd_setbit(server: &mut Server, client: &mut Client, argv: &[Bytes]) -> Reply {
    let offset = match bit_offset_arg(&argv[2]) {
        Ok(v) => v,
        Err(reply) => return reply,
    };
    let value = match int_arg(&argv[3]) {
        Ok(0) => false,
        Ok(1) => true,
        _ => return Reply::Error("ERR bit is not an integer or out of range".into()),
    };
    let db = client.db;
    let key = &argv[1];
    let mut bytes = match read_string_for_write(server, db, key) {
        Ok(v) => v.unwrap_or_default(),
        Err(reply) => return reply,
    };
    let byte = offset / 8;
    if bytes.len() <= byte {
        bytes.resize(byte + 1, 0);
    }
    let mask = 1u8 << (7 - offset % 8);
    let old = bytes[byte] & mask != 0;
    if value {
        bytes[byte] |= mask;
    } else {
        bytes[byte] &= !mask;
    }
    overwrite_keep_ttl(server, db, key, Value::Str(StrVal::Raw(bytes)));
    server.dirty += 1;
    Reply::Int(old as i64)
}

pub(crate) fn cmd_bitcount(server: &mut Server, client: &mut Client, argv: &[Bytes]) -> Reply {
    if argv.len() != 2 && argv.len() != 4 {
        return err(Error::Syntax);
    }
    let bytes = match read_string(server, client.db, &argv[1]) {
        Ok(Some(bytes)) if !bytes.is_empty() => bytes,
        Ok(_) => return Reply::Int(0),
        Err(reply) => return reply,
    };
    let (lo, hi) = if argv.len() == 4 {
        let (start, stop) = match (int_arg(&argv[2]), int_arg(&argv[3])) {
            (Ok(a), Ok(b)) => (a, b),
            (Err(reply), _) | (_, Err(reply)) => return reply,
        };
        match super::clamp_range(start, stop, bytes.len()) {
            Some(range) => range,
            None => return Reply::Int(0),
        }
    } else {
        (0, bytes.len() - 1)
    };
    let count: u32 = bytes[lo..=hi].iter().map(|b| b.count_ones()).sum();
    Reply::Int(count as i64)
}

pub(crate) fn cmd_bitop(server: &mut Server, client: &mut Client, argv: &[Bytes]) -> Reply {
    let op = String::from_utf8_lossy(&argv[1]).to_uppercase();
    let dest = &argv[2];
    let sources = &argv[3..];
    if op == "NOT" && sources.len() != 1 {
        return Reply::Error("ERR BITOP NOT must be called with a single source key".into());
    }

    let db = client.db;
    let mut inputs: Vec<Bytes> = Vec::with_capacity(sources.len());
    for key in sources {
        match read_string(server, db, key) {
            Ok(Some(bytes)) => inputs.push(bytes),
            Ok(None) => inputs.push(Vec::new()),
            Err(reply) => return reply,
        }
    }
    let max_len = inputs.iter().map(|b| b.len()).max().unwrap_or(0);

    let result: Bytes = match op.as_str() {
        "NOT" => inputs[0].iter().map(|b| !b).collect(),
        "AND" | "OR" | "XOR" => {
            let mut out = vec![0u8; max_len];
            for (i, slot) in out.iter_mut().enumerate() {
                let mut acc: Option<u8> = None;
                for input in &inputs {
                    let byte = input.get(i).copied().unwrap_or(0);
                    acc = Some(match (acc, op.as_str()) {
                        (None, _) => byte,
                        (Some(a), "AND") => a & byte,
                        (Some(a), "OR") => a | byte,
                        (Some(a), _) => a ^ byte,
                    });
                }
                *slot = acc.unwrap_or(0);
            }
            out
        }
        _ => return err(Error::Syntax),
    };

    if result.is_empty() {
        if server.delete_key(db, dest) {
            server.dirty += 1;
        }
        return Reply::Int(0);
    }
    let len = result.len();
    let obj = Arc::new(Object::new(Value::Str(StrVal::Raw(result)), server.lru_clock));
    server.set_key(db, dest, obj);
    server.dirty += 1;
    Reply::Int(len as i64)
}

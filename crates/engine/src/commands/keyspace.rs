//! Key-level operations: existence, expiration, renaming, database
//! housekeeping, object introspection.

use crate::client::Client;
use crate::commands::{err, int_arg};
use crate::evict::estimate_idle_s;
use crate::server::Server;
use ember_core::util::glob_match;
use ember_core::{Bytes, Error, Reply};
use std::sync::Arc;

pub(crate) fn cmd_del(server: &mut Server, client: &mut Client, argv: &[Bytes]) -> Reply {
    let mut removed = 0;
    for key in &argv[1..] {
        server.expire_if_needed(client.db, key);
        if server.delete_key(client.db, key) {
            server.dirty += 1;
            removed += 1;
        }
    }
    Reply::Int(removed)
}

pub(crate) fn cmd_exists(server: &mut Server, client: &mut Client, argv: &[Bytes]) -> Reply {
    Reply::Int(server.lookup_read(client.db, &argv[1]).is_some() as i64)
}

/// EXPIRE/PEXPIRE/EXPIREAT/PEXPIREAT all normalize to an absolute
/// millisecond deadline; the logged form is always PEXPIREAT.
fn expire_generic(
    server: &mut Server,
    client: &mut Client,
    argv: &[Bytes],
    unit_ms: i64,
    absolute: bool,
) -> Reply {
    let amount = match int_arg(&argv[2]) {
        Ok(v) => v,
        Err(reply) => return reply,
    };
    let Some(scaled) = amount.checked_mul(unit_ms) else {
        return err(Error::InvalidExpire);
    };
    let deadline = if absolute {
        scaled
    } else {
        let Some(sum) = (server.clock_ms() as i64).checked_add(scaled) else {
            return err(Error::InvalidExpire);
        };
        sum
    };

    let db = client.db;
    let key = &argv[1];
    if server.lookup_write(db, key).is_none() {
        return Reply::Int(0);
    }

    // A deadline already in the past deletes immediately (and replays as a
    // delete). Replay itself applies the deadline verbatim so the original
    // timeline is reconstructed.
    if !client.loading && deadline <= server.clock_ms() as i64 {
        server.delete_key(db, key);
        server.dirty += 1;
        server.prop_override = Some(vec![vec![b"DEL".to_vec(), key.clone()]]);
        return Reply::Int(1);
    }

    let deadline = deadline.max(0) as u64;
    server.db_mut(db).set_expire(key, deadline);
    server.signal_modified(db, key);
    server.dirty += 1;
    server.prop_override = Some(vec![vec![
        b"PEXPIREAT".to_vec(),
        key.clone(),
        deadline.to_string().into_bytes(),
    ]]);
    Reply::Int(1)
}

pub(crate) fn cmd_expire(server: &mut Server, client: &mut Client, argv: &[Bytes]) -> Reply {
    expire_generic(server, client, argv, 1000, false)
}

pub(crate) fn cmd_pexpire(server: &mut Server, client: &mut Client, argv: &[Bytes]) -> Reply {
    expire_generic(server, client, argv, 1, false)
}

pub(crate) fn cmd_expireat(server: &mut Server, client: &mut Client, argv: &[Bytes]) -> Reply {
    expire_generic(server, client, argv, 1000, true)
}

pub(crate) fn cmd_pexpireat(server: &mut Server, client: &mut Client, argv: &[Bytes]) -> Reply {
    expire_generic(server, client, argv, 1, true)
}

fn ttl_generic(server: &mut Server, client: &mut Client, argv: &[Bytes], in_seconds: bool) -> Reply {
    let db = client.db;
    if server.lookup_read(db, &argv[1]).is_none() {
        return Reply::Int(-2);
    }
    match server.db_ref(db).expire_of(&argv[1]) {
        None => Reply::Int(-1),
        Some(deadline) => {
            let remaining = deadline.saturating_sub(server.clock_ms());
            if in_seconds {
                Reply::Int(((remaining + 500) / 1000) as i64)
            } else {
                Reply::Int(remaining as i64)
            }
        }
    }
}

pub(crate) fn cmd_ttl(server: &mut Server, client: &mut Client, argv: &[Bytes]) -> Reply {
    ttl_generic(server, client, argv, true)
}

pub(crate) fn cmd_pttl(server: &mut Server, client: &mut Client, argv: &[Bytes]) -> Reply {
    ttl_generic(server, client, argv, false)
}

pub(crate) fn cmd_persist(server: &mut Server, client: &mut Client, argv: &[Bytes]) -> Reply {
    let db = client.db;
    if server.lookup_write(db, &argv[1]).is_none() {
        return Reply::Int(0);
    }
    if server.db_mut(db).remove_expire(&argv[1]) {
        server.signal_modified(db, &argv[1]);
        server.dirty += 1;
        Reply::Int(1)
    } else {
        Reply::Int(0)
    }
}

pub(crate) fn cmd_type(server: &mut Server, client: &mut Client, argv: &[Bytes]) -> Reply {
    match server.lookup_read(client.db, &argv[1]) {
        Some(obj) => Reply::Simple(obj.value.kind().name()),
        None => Reply::Simple("none"),
    }
}

pub(crate) fn cmd_randomkey(server: &mut Server, client: &mut Client, _argv: &[Bytes]) -> Reply {
    let db = client.db;
    // Sampling may land on a logically expired key; retry a bounded number
    // of times after purging it.
    for _ in 0..100 {
        let candidate = {
            let mut rng = rand::thread_rng();
            server
                .db_ref(db)
                .keys
                .random_entry(&mut rng)
                .map(|(key, _)| key.clone())
        };
        let Some(key) = candidate else {
            return Reply::Nil;
        };
        if !server.expire_if_needed(db, &key) {
            return Reply::Bulk(key);
        }
    }
    Reply::Nil
}

pub(crate) fn cmd_keys(server: &mut Server, client: &mut Client, argv: &[Bytes]) -> Reply {
    let db = client.db;
    let pattern = &argv[1];
    let candidates: Vec<Bytes> = server
        .db_ref(db)
        .keys
        .iter()
        .filter(|(key, _)| glob_match(pattern, key))
        .map(|(key, _)| key.clone())
        .collect();

    let mut matches = Vec::new();
    for key in candidates {
        if !server.expire_if_needed(db, &key) {
            matches.push(Reply::Bulk(key));
        }
    }
    Reply::Array(matches)
}

fn rename_generic(server: &mut Server, client: &mut Client, argv: &[Bytes], nx: bool) -> Reply {
    let db = client.db;
    let (src, dst) = (&argv[1], &argv[2]);
    if src == dst {
        return Reply::Error("ERR source and destination objects are the same".into());
    }
    if server.lookup_write(db, src).is_none() {
        return Reply::Error("ERR no such key".into());
    }
    if nx && server.lookup_write(db, dst).is_some() {
        return Reply::Int(0);
    }

    let deadline = server.db_ref(db).expire_of(src);
    let obj = server
        .db_mut(db)
        .remove_key(src)
        .expect("source checked above");
    server.signal_modified(db, src);
    server.set_key(db, dst, obj);
    if let Some(deadline) = deadline {
        server.db_mut(db).set_expire(dst, deadline);
    }
    server.dirty += 1;
    if nx {
        Reply::Int(1)
    } else {
        Reply::ok()
    }
}

pub(crate) fn cmd_rename(server: &mut Server, client: &mut Client, argv: &[Bytes]) -> Reply {
    rename_generic(server, client, argv, false)
}

pub(crate) fn cmd_renamenx(server: &mut Server, client: &mut Client, argv: &[Bytes]) -> Reply {
    rename_generic(server, client, argv, true)
}

pub(crate) fn cmd_dbsize(server: &mut Server, client: &mut Client, _argv: &[Bytes]) -> Reply {
    Reply::Int(server.dbsize(client.db) as i64)
}

pub(crate) fn cmd_move(server: &mut Server, client: &mut Client, argv: &[Bytes]) -> Reply {
    let target = match int_arg(&argv[2]) {
        Ok(v) if v >= 0 && (v as usize) < server.database_count() => v as usize,
        Ok(_) => return Reply::Error("ERR index out of range".into()),
        Err(reply) => return reply,
    };
    let db = client.db;
    if target == db {
        return Reply::Error("ERR source and destination objects are the same".into());
    }
    let key = &argv[1];
    if server.lookup_write(db, key).is_none() {
        return Reply::Int(0);
    }
    if server.db_ref(target).keys.contains_key(key) {
        return Reply::Int(0);
    }

    let deadline = server.db_ref(db).expire_of(key);
    let obj = server.db_mut(db).remove_key(key).expect("checked above");
    server.signal_modified(db, key);
    server.set_key(target, key, obj);
    if let Some(deadline) = deadline {
        server.db_mut(target).set_expire(key, deadline);
    }
    server.dirty += 1;
    Reply::Int(1)
}

pub(crate) fn cmd_select(server: &mut Server, client: &mut Client, argv: &[Bytes]) -> Reply {
    match int_arg(&argv[1]) {
        Ok(v) if v >= 0 && (v as usize) < server.database_count() => {
            client.db = v as usize;
            Reply::ok()
        }
        Ok(_) => Reply::Error("ERR invalid DB index".into()),
        Err(_) => Reply::Error("ERR invalid DB index".into()),
    }
}

pub(crate) fn cmd_flushdb(server: &mut Server, client: &mut Client, _argv: &[Bytes]) -> Reply {
    let db = client.db;
    server.signal_flushed(db);
    let removed = server.db_mut(db).flush();
    server.dirty += removed as u64;
    server.recompute_memory();
    Reply::ok()
}

pub(crate) fn cmd_flushall(server: &mut Server, _client: &mut Client, _argv: &[Bytes]) -> Reply {
    for db in 0..server.database_count() {
        server.signal_flushed(db);
        let removed = server.db_mut(db).flush();
        server.dirty += removed as u64;
    }
    server.recompute_memory();
    Reply::ok()
}

pub(crate) fn cmd_object(server: &mut Server, client: &mut Client, argv: &[Bytes]) -> Reply {
    if argv.len() != 3 {
        return Reply::Error(
            "ERR Unknown OBJECT subcommand or wrong number of arguments".into(),
        );
    }
    let sub = String::from_utf8_lossy(&argv[1]).to_uppercase();
    let db = client.db;
    let key = &argv[2];
    server.expire_if_needed(db, key);
    // Read without refreshing the access stamp: OBJECT IDLETIME would
    // otherwise always report zero.
    let Some(obj) = server.db_ref(db).keys.get(key) else {
        return Reply::Error("ERR no such key".into());
    };

    match sub.as_str() {
        "REFCOUNT" => Reply::Int(Arc::strong_count(obj) as i64),
        "ENCODING" => Reply::Bulk(obj.value.encoding_name().as_bytes().to_vec()),
        "IDLETIME" => {
            let idle = estimate_idle_s(server.lru_clock, obj.lru_stamp());
            Reply::Int(idle as i64)
        }
        _ => Reply::Error("ERR Unknown OBJECT subcommand or wrong number of arguments".into()),
    }
}

//! List operations, including the blocking pops.
//!
//! Blocking semantics: a pop on a non-empty list is served immediately and
//! logged as its non-blocking form. Otherwise the client parks on the
//! key's wait list with a deadline; a later push marks the key ready and
//! the delivery pass hands one element to one waiter, FIFO.

use crate::client::{Blocked, Client};
use crate::commands::{clamp_range, err, int_arg};
use crate::object::{ListVal, Object, Value};
use crate::server::Server;
use ember_core::{Bytes, Error, Reply};
use ember_storage::Ziplist;
use std::sync::Arc;

fn expect_list(obj: &Object) -> Result<&ListVal, Reply> {
    match &obj.value {
        Value::List(list) => Ok(list),
        _ => Err(err(Error::WrongType)),
    }
}

/// All elements as owned bytes.
fn elements(list: &ListVal) -> Vec<Bytes> {
    match list {
        ListVal::Packed(zl) => zl.iter().map(|v| v.to_bytes()).collect(),
        ListVal::Linked(items) => items.iter().cloned().collect(),
    }
}

/// Promote before a push that would break the compact form, and after when
/// the entry count crossed the threshold.
fn push_value(list: &mut ListVal, value: &[u8], head: bool, max_entries: usize, max_value: usize) {
    if let ListVal::Packed(zl) = list {
        if value.len() > max_value || zl.len() >= max_entries {
            list.promote();
        }
    }
    match list {
        ListVal::Packed(zl) => {
            if head {
                zl.push_front(value);
            } else {
                zl.push_back(value);
            }
        }
        ListVal::Linked(items) => {
            if head {
                items.push_front(value.to_vec());
            } else {
                items.push_back(value.to_vec());
            }
        }
    }
}

fn pop_value(list: &mut ListVal, tail: bool) -> Option<Bytes> {
    match list {
        ListVal::Packed(zl) => {
            if tail {
                zl.pop_back()
            } else {
                zl.pop_front()
            }
        }
        ListVal::Linked(items) => {
            if tail {
                items.pop_back()
            } else {
                items.pop_front()
            }
        }
    }
}

/// Pop one element for blocked-client delivery. Deletes the key when it
/// empties; no dirty accounting or propagation here, the caller owns that.
pub(crate) fn pop_for_delivery(
    server: &mut Server,
    db: usize,
    key: &[u8],
    tail: bool,
) -> Option<Bytes> {
    let arc = server.dbs[db].keys.get_mut(key)?;
    let obj = Arc::make_mut(arc);
    let Value::List(list) = &mut obj.value else {
        return None;
    };
    let value = pop_value(list, tail)?;
    let emptied = list.is_empty();
    if emptied {
        server.delete_key(db, key);
    } else {
        server.signal_modified(db, key);
    }
    Some(value)
}

/// Head-push one element for BRPOPLPUSH delivery, creating the target as
/// needed. Type errors are pre-checked by the caller.
pub(crate) fn push_for_delivery(server: &mut Server, db: usize, key: &[u8], value: &[u8]) {
    let max_entries = server.cfg.list_max_ziplist_entries;
    let max_value = server.cfg.list_max_ziplist_value;
    if server.dbs[db].keys.get(key).is_none() {
        let obj = Arc::new(Object::new(
            Value::List(ListVal::Packed(Ziplist::new())),
            server.lru_clock,
        ));
        server.add_key(db, key, obj);
    }
    let arc = server.dbs[db].keys.get_mut(key).expect("created above");
    let obj = Arc::make_mut(arc);
    if let Value::List(list) = &mut obj.value {
        push_value(list, value, true, max_entries, max_value);
    }
    server.signal_modified(db, key);
    server.dbs[db].signal_ready(key);
}

fn push_generic(
    server: &mut Server,
    client: &mut Client,
    argv: &[Bytes],
    head: bool,
    require_existing: bool,
) -> Reply {
    let db = client.db;
    let key = &argv[1];
    let max_entries = server.cfg.list_max_ziplist_entries;
    let max_value = server.cfg.list_max_ziplist_value;

    match server.lookup_write(db, key) {
        Some(obj) => {
            if expect_list(&obj).is_err() {
                return err(Error::WrongType);
            }
        }
        None => {
            if require_existing {
                return Reply::Int(0);
            }
            let obj = Arc::new(Object::new(
                Value::List(ListVal::Packed(Ziplist::new())),
                server.lru_clock,
            ));
            server.add_key(db, key, obj);
        }
    }

    let arc = server.dbs[db].keys.get_mut(key).expect("present");
    let obj = Arc::make_mut(arc);
    let Value::List(list) = &mut obj.value else {
        unreachable!("type checked above");
    };
    for value in &argv[2..] {
        push_value(list, value, head, max_entries, max_value);
    }
    let len = list.len();

    server.signal_modified(db, key);
    server.dbs[db].signal_ready(key);
    server.dirty += 1;
    Reply::Int(len as i64)
}

pub(crate) fn cmd_lpush(server: &mut Server, client: &mut Client, argv: &[Bytes]) -> Reply {
    push_generic(server, client, argv, true, false)
}

pub(crate) fn cmd_rpush(server: &mut Server, client: &mut Client, argv: &[Bytes]) -> Reply {
    push_generic(server, client, argv, false, false)
}

pub(crate) fn cmd_lpushx(server: &mut Server, client: &mut Client, argv: &[Bytes]) -> Reply {
    push_generic(server, client, argv, true, true)
}

pub(crate) fn cmd_rpushx(server: &mut Server, client: &mut Client, argv: &[Bytes]) -> Reply {
    push_generic(server, client, argv, false, true)
}

fn pop_generic(server: &mut Server, client: &mut Client, argv: &[Bytes], tail: bool) -> Reply {
    let db = client.db;
    let key = &argv[1];
    match server.lookup_write(db, key) {
        Some(obj) => {
            if expect_list(&obj).is_err() {
                return err(Error::WrongType);
            }
        }
        None => return Reply::Nil,
    }
    match pop_for_delivery(server, db, key, tail) {
        Some(value) => {
            server.dirty += 1;
            Reply::Bulk(value)
        }
        None => Reply::Nil,
    }
}

pub(crate) fn cmd_lpop(server: &mut Server, client: &mut Client, argv: &[Bytes]) -> Reply {
    pop_generic(server, client, argv, false)
}

pub(crate) fn cmd_rpop(server: &mut Server, client: &mut Client, argv: &[Bytes]) -> Reply {
    pop_generic(server, client, argv, true)
}

pub(crate) fn cmd_lindex(server: &mut Server, client: &mut Client, argv: &[Bytes]) -> Reply {
    let index = match int_arg(&argv[2]) {
        Ok(v) => v,
        Err(reply) => return reply,
    };
    let Some(obj) = server.lookup_read(client.db, &argv[1]) else {
        return Reply::Nil;
    };
    let list = match expect_list(&obj) {
        Ok(list) => list,
        Err(reply) => return reply,
    };
    let len = list.len() as i64;
    let index = if index < 0 { len + index } else { index };
    if index < 0 || index >= len {
        return Reply::Nil;
    }
    let index = index as usize;
    match list {
        ListVal::Packed(zl) => zl
            .get(index)
            .map(|v| Reply::Bulk(v.to_bytes()))
            .unwrap_or(Reply::Nil),
        ListVal::Linked(items) => items
            .get(index)
            .map(|v| Reply::Bulk(v.clone()))
            .unwrap_or(Reply::Nil),
    }
}

pub(crate) fn cmd_llen(server: &mut Server, client: &mut Client, argv: &[Bytes]) -> Reply {
    match server.lookup_read(client.db, &argv[1]) {
        Some(obj) => match expect_list(&obj) {
            Ok(list) => Reply::Int(list.len() as i64),
            Err(reply) => reply,
        },
        None => Reply::Int(0),
    }
}

pub(crate) fn cmd_lset(server: &mut Server, client: &mut Client, argv: &[Bytes]) -> Reply {
    let index = match int_arg(&argv[2]) {
        Ok(v) => v,
        Err(reply) => return reply,
    };
    let db = client.db;
    let key = &argv[1];
    let max_entries = server.cfg.list_max_ziplist_entries;
    let max_value = server.cfg.list_max_ziplist_value;

    match server.lookup_write(db, key) {
        Some(obj) => {
            if expect_list(&obj).is_err() {
                return err(Error::WrongType);
            }
        }
        None => return Reply::Error("ERR no such key".into()),
    }

    let arc = server.dbs[db].keys.get_mut(key).expect("present");
    let obj = Arc::make_mut(arc);
    let Value::List(list) = &mut obj.value else {
        unreachable!("type checked above");
    };
    let len = list.len() as i64;
    let index = if index < 0 { len + index } else { index };
    if index < 0 || index >= len {
        return err(Error::IndexOutOfRange);
    }
    if let ListVal::Packed(_) = list {
        if argv[3].len() > max_value || len as usize > max_entries {
            list.promote();
        }
    }
    match list {
        ListVal::Packed(zl) => {
            zl.replace(index as usize, &argv[3]);
        }
        ListVal::Linked(items) => items[index as usize] = argv[3].clone(),
    }
    server.signal_modified(db, key);
    server.dirty += 1;
    Reply::ok()
}

pub(crate) fn cmd_lrange(server: &mut Server, client: &mut Client, argv: &[Bytes]) -> Reply {
    let (start, stop) = match (int_arg(&argv[2]), int_arg(&argv[3])) {
        (Ok(a), Ok(b)) => (a, b),
        (Err(reply), _) | (_, Err(reply)) => return reply,
    };
    let Some(obj) = server.lookup_read(client.db, &argv[1]) else {
        return Reply::Array(Vec::new());
    };
    let list = match expect_list(&obj) {
        Ok(list) => list,
        Err(reply) => return reply,
    };
    match clamp_range(start, stop, list.len()) {
        Some((lo, hi)) => {
            let all = elements(list);
            Reply::Array(all[lo..=hi].iter().cloned().map(Reply::Bulk).collect())
        }
        None => Reply::Array(Vec::new()),
    }
}

pub(crate) fn cmd_ltrim(server: &mut Server, client: &mut Client, argv: &[Bytes]) -> Reply {
    let (start, stop) = match (int_arg(&argv[2]), int_arg(&argv[3])) {
        (Ok(a), Ok(b)) => (a, b),
        (Err(reply), _) | (_, Err(reply)) => return reply,
    };
    let db = client.db;
    let key = &argv[1];
    match server.lookup_write(db, key) {
        Some(obj) => {
            if expect_list(&obj).is_err() {
                return err(Error::WrongType);
            }
        }
        None => return Reply::ok(),
    }

    let keep = {
        let arc = server.dbs[db].keys.get_mut(key).expect("present");
        let obj = Arc::make_mut(arc);
        let Value::List(list) = &mut obj.value else {
            unreachable!("type checked above");
        };
        match clamp_range(start, stop, list.len()) {
            Some((lo, hi)) => {
                match list {
                    ListVal::Packed(zl) => {
                        let len = zl.len();
                        zl.remove_range(hi + 1, len - hi - 1);
                        zl.remove_range(0, lo);
                    }
                    ListVal::Linked(items) => {
                        items.truncate(hi + 1);
                        items.drain(..lo);
                    }
                }
                list.len()
            }
            None => {
                // Everything trimmed away.
                match list {
                    ListVal::Packed(zl) => {
                        let len = zl.len();
                        zl.remove_range(0, len);
                    }
                    ListVal::Linked(items) => items.clear(),
                }
                0
            }
        }
    };
    if keep == 0 {
        server.delete_key(db, key);
    } else {
        server.signal_modified(db, key);
    }
    server.dirty += 1;
    Reply::ok()
}

pub(crate) fn cmd_lrem(server: &mut Server, client: &mut Client, argv: &[Bytes]) -> Reply {
    let count = match int_arg(&argv[2]) {
        Ok(v) => v,
        Err(reply) => return reply,
    };
    let db = client.db;
    let key = &argv[1];
    let needle = &argv[3];
    match server.lookup_write(db, key) {
        Some(obj) => {
            if expect_list(&obj).is_err() {
                return err(Error::WrongType);
            }
        }
        None => return Reply::Int(0),
    }

    let (removed, emptied) = {
        let arc = server.dbs[db].keys.get_mut(key).expect("present");
        let obj = Arc::make_mut(arc);
        let Value::List(list) = &mut obj.value else {
            unreachable!("type checked above");
        };
        let mut items: Vec<Bytes> = elements(list);
        let limit = if count == 0 {
            usize::MAX
        } else {
            count.unsigned_abs() as usize
        };
        let mut removed = 0;

        if count >= 0 {
            items.retain(|item| {
                if removed < limit && item == needle {
                    removed += 1;
                    false
                } else {
                    true
                }
            });
        } else {
            // Tail-to-head: scan reversed, then restore order.
            items.reverse();
            items.retain(|item| {
                if removed < limit && item == needle {
                    removed += 1;
                    false
                } else {
                    true
                }
            });
            items.reverse();
        }

        if removed > 0 {
            *list = rebuild(list, items);
        }
        (removed, list.is_empty())
    };

    if emptied {
        server.delete_key(db, key);
    } else if removed > 0 {
        server.signal_modified(db, key);
    }
    if removed > 0 {
        server.dirty += 1;
    }
    Reply::Int(removed as i64)
}

/// Rebuild a list in its current encoding from owned elements.
fn rebuild(list: &ListVal, items: Vec<Bytes>) -> ListVal {
    match list {
        ListVal::Packed(_) => {
            let mut zl = Ziplist::new();
            for item in &items {
                zl.push_back(item);
            }
            ListVal::Packed(zl)
        }
        ListVal::Linked(_) => ListVal::Linked(items.into()),
    }
}

pub(crate) fn cmd_linsert(server: &mut Server, client: &mut Client, argv: &[Bytes]) -> Reply {
    let before = match String::from_utf8_lossy(&argv[2]).to_uppercase().as_str() {
        "BEFORE" => true,
        "AFTER" => false,
        _ => return err(Error::Syntax),
    };
    let db = client.db;
    let key = &argv[1];
    let pivot = &argv[3];
    let value = &argv[4];
    let max_entries = server.cfg.list_max_ziplist_entries;
    let max_value = server.cfg.list_max_ziplist_value;

    match server.lookup_write(db, key) {
        Some(obj) => {
            if expect_list(&obj).is_err() {
                return err(Error::WrongType);
            }
        }
        None => return Reply::Int(0),
    }

    let arc = server.dbs[db].keys.get_mut(key).expect("present");
    let obj = Arc::make_mut(arc);
    let Value::List(list) = &mut obj.value else {
        unreachable!("type checked above");
    };

    if let ListVal::Packed(zl) = list {
        if value.len() > max_value || zl.len() >= max_entries {
            list.promote();
        }
    }

    let new_len = match list {
        ListVal::Packed(zl) => match zl.find(pivot) {
            Some(pos) => {
                let at = if before { pos } else { pos + 1 };
                zl.insert(at, value);
                zl.len() as i64
            }
            None => -1,
        },
        ListVal::Linked(items) => match items.iter().position(|item| item == pivot) {
            Some(pos) => {
                let at = if before { pos } else { pos + 1 };
                items.insert(at, value.clone());
                items.len() as i64
            }
            None => -1,
        },
    };

    if new_len >= 0 {
        server.signal_modified(db, key);
        server.dbs[db].signal_ready(key);
        server.dirty += 1;
    }
    Reply::Int(new_len)
}

/// Shared RPOPLPUSH core: tail-pop `src`, head-push `dst`. Returns the
/// moved element. Dirty accounting is the caller's.
fn rpoplpush_core(server: &mut Server, db: usize, src: &[u8], dst: &[u8]) -> Result<Option<Bytes>, Reply> {
    match server.lookup_write(db, src) {
        Some(obj) => {
            if expect_list(&obj).is_err() {
                return Err(err(Error::WrongType));
            }
        }
        None => return Ok(None),
    }
    if let Some(obj) = server.lookup_write(db, dst) {
        if expect_list(&obj).is_err() {
            return Err(err(Error::WrongType));
        }
    }
    let Some(value) = pop_for_delivery(server, db, src, true) else {
        return Ok(None);
    };
    push_for_delivery(server, db, dst, &value);
    Ok(Some(value))
}

pub(crate) fn cmd_rpoplpush(server: &mut Server, client: &mut Client, argv: &[Bytes]) -> Reply {
    match rpoplpush_core(server, client.db, &argv[1], &argv[2]) {
        Ok(Some(value)) => {
            server.dirty += 1;
            Reply::Bulk(value)
        }
        Ok(None) => Reply::Nil,
        Err(reply) => reply,
    }
}

fn timeout_arg(server: &Server, arg: &[u8]) -> Result<u64, Reply> {
    match ember_core::util::parse_i64(arg) {
        Some(v) if v >= 0 => Ok(if v == 0 {
            0
        } else {
            server.clock_ms() + (v as u64) * 1000
        }),
        _ => Err(Reply::Error(
            "ERR timeout is not an integer or out of range".into(),
        )),
    }
}

fn blocking_pop(server: &mut Server, client: &mut Client, argv: &[Bytes], tail: bool) -> Reply {
    let deadline = match timeout_arg(server, &argv[argv.len() - 1]) {
        Ok(v) => v,
        Err(reply) => return reply,
    };
    let keys = &argv[1..argv.len() - 1];
    let db = client.db;

    for key in keys {
        let readable = match server.lookup_write(db, key) {
            Some(obj) => match expect_list(&obj) {
                Ok(list) => !list.is_empty(),
                Err(reply) => return reply,
            },
            None => false,
        };
        if readable {
            let value =
                pop_for_delivery(server, db, key, tail).expect("non-empty list must pop");
            server.dirty += 1;
            let logged: Bytes = if tail { b"RPOP".to_vec() } else { b"LPOP".to_vec() };
            server.prop_override = Some(vec![vec![logged, key.clone()]]);
            return Reply::Array(vec![Reply::Bulk(key.clone()), Reply::Bulk(value)]);
        }
    }

    // Nothing readable. Inside a transaction (or replay) blocking is not an
    // option; answer as a timed-out wait.
    if client.in_multi() || client.loading {
        return Reply::NilArray;
    }
    server.block_client(
        client,
        Blocked {
            keys: keys.to_vec(),
            deadline_ms: deadline,
            pop_tail: tail,
            target: None,
        },
    );
    Reply::None
}

pub(crate) fn cmd_blpop(server: &mut Server, client: &mut Client, argv: &[Bytes]) -> Reply {
    blocking_pop(server, client, argv, false)
}

pub(crate) fn cmd_brpop(server: &mut Server, client: &mut Client, argv: &[Bytes]) -> Reply {
    blocking_pop(server, client, argv, true)
}

pub(crate) fn cmd_brpoplpush(server: &mut Server, client: &mut Client, argv: &[Bytes]) -> Reply {
    let deadline = match timeout_arg(server, &argv[3]) {
        Ok(v) => v,
        Err(reply) => return reply,
    };
    let db = client.db;
    let (src, dst) = (argv[1].clone(), argv[2].clone());

    match rpoplpush_core(server, db, &src, &dst) {
        Ok(Some(value)) => {
            server.dirty += 1;
            server.prop_override = Some(vec![vec![
                b"RPOPLPUSH".to_vec(),
                src,
                dst,
            ]]);
            Reply::Bulk(value)
        }
        Ok(None) => {
            if client.in_multi() || client.loading {
                return Reply::Nil;
            }
            server.block_client(
                client,
                Blocked {
                    keys: vec![src],
                    deadline_ms: deadline,
                    pop_tail: true,
                    target: Some(dst),
                },
            );
            Reply::None
        }
        Err(reply) => reply,
    }
}

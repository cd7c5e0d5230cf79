//! MULTI/EXEC transactions and optimistic WATCH.
//!
//! Queued commands run back-to-back inside one dispatch, which is all the
//! atomicity the single-threaded loop needs. WATCH arms a per-client flag
//! that any touch of the key sets; EXEC aborts with a nil array when the
//! flag fired. A queueing error (unknown command, bad arity) poisons the
//! transaction instead, and EXEC reports the abort explicitly.

use crate::client::Client;
use crate::dispatch;
use crate::server::Server;
use ember_core::{Bytes, Reply};

/// Drop every watch this client holds.
pub(crate) fn unwatch_all(server: &mut Server, client: &mut Client) {
    for (db, key) in std::mem::take(&mut client.watched) {
        server.db_mut(db).remove_watcher(&key, client.id);
    }
    server.cas_dirty.remove(&client.id);
}

pub(crate) fn cmd_multi(_server: &mut Server, client: &mut Client, _argv: &[Bytes]) -> Reply {
    if client.in_multi() {
        return Reply::Error("ERR MULTI calls can not be nested".into());
    }
    client.multi_queue = Some(Vec::new());
    Reply::ok()
}

pub(crate) fn cmd_discard(server: &mut Server, client: &mut Client, _argv: &[Bytes]) -> Reply {
    if !client.in_multi() {
        return Reply::Error("ERR DISCARD without MULTI".into());
    }
    client.reset_multi();
    unwatch_all(server, client);
    Reply::ok()
}

pub(crate) fn cmd_watch(server: &mut Server, client: &mut Client, argv: &[Bytes]) -> Reply {
    if client.in_multi() {
        return Reply::Error("ERR WATCH inside MULTI is not allowed".into());
    }
    for key in &argv[1..] {
        let db = client.db;
        if !client.watched.iter().any(|(d, k)| *d == db && k == key) {
            server.db_mut(db).add_watcher(key, client.id);
            client.watched.push((db, key.clone()));
        }
    }
    Reply::ok()
}

pub(crate) fn cmd_unwatch(server: &mut Server, client: &mut Client, _argv: &[Bytes]) -> Reply {
    unwatch_all(server, client);
    Reply::ok()
}

pub(crate) fn cmd_exec(server: &mut Server, client: &mut Client, _argv: &[Bytes]) -> Reply {
    if !client.in_multi() {
        return Reply::Error("ERR EXEC without MULTI".into());
    }

    // A watched key that quietly expired still counts as touched.
    let watched: Vec<(usize, Bytes)> = client.watched.clone();
    for (db, key) in watched {
        server.expire_if_needed(db, &key);
    }

    if client.dirty_exec {
        client.reset_multi();
        unwatch_all(server, client);
        return Reply::Error(
            "EXECABORT Transaction discarded because of previous errors.".into(),
        );
    }
    if server.cas_dirty.contains(&client.id) {
        client.reset_multi();
        unwatch_all(server, client);
        return Reply::NilArray;
    }

    let queue = client.multi_queue.take().unwrap_or_default();
    unwatch_all(server, client);

    if queue.is_empty() {
        client.reset_multi();
        return Reply::Array(Vec::new());
    }

    // Keep the transaction context visible while the queue runs: a queued
    // blocking pop must degrade to its non-blocking nil form instead of
    // parking the client mid-EXEC.
    client.multi_queue = Some(Vec::new());

    // The whole batch lands in the log between MULTI and EXEC markers.
    server.propagate(client.db, &[b"MULTI".to_vec()]);
    let mut replies = Vec::with_capacity(queue.len());
    for argv in &queue {
        replies.push(dispatch::call_queued(server, client, argv));
    }
    server.propagate(client.db, &[b"EXEC".to_vec()]);
    client.reset_multi();

    // The inner commands propagated themselves; nothing extra for EXEC.
    server.prop_override = Some(Vec::new());
    Reply::Array(replies)
}

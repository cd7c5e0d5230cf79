//! Command lookup and the dispatch pipeline.
//!
//! Per command: resolve in the table (case-insensitive), check arity
//! (negative arity means "at least"), then the gates: auth, loading,
//! memory pressure, write-after-failed-save. Then either queue (inside a
//! transaction) or invoke. Invocation is timed for the slow log and the
//! per-command counters, and a mutating command is propagated to the
//! append-only log after it commits, possibly in a normalized form the
//! handler left behind.

use crate::client::Client;
use crate::commands::{admin, hash, keyspace, list, set, string, transaction, zset};
use crate::evict;
use crate::server::Server;
use ember_core::util::now_us;
use ember_core::{Bytes, Reply};
use once_cell::sync::Lazy;
use std::collections::HashMap;

/// Command attribute flags.
pub mod flags {
    /// Mutates the keyspace.
    pub const WRITE: u32 = 1 << 0;
    /// Refused when eviction cannot get under the memory cap.
    pub const DENY_OOM: u32 = 1 << 1;
    /// Administrative command.
    pub const ADMIN: u32 = 1 << 2;
    /// Allowed while the dataset is loading.
    pub const LOADING_OK: u32 = 1 << 3;
    /// Allowed on a stale replica (the hook exists; replication is
    /// external).
    pub const STALE_OK: u32 = 1 << 4;
    /// Non-deterministic result.
    pub const RANDOM: u32 = 1 << 5;
    /// Hidden from monitoring streams.
    pub const SKIP_MONITOR: u32 = 1 << 6;
}

/// Handler signature: the whole server, the calling client, the raw
/// argument vector (`argv[0]` is the command name).
pub type Handler = fn(&mut Server, &mut Client, &[Bytes]) -> Reply;

/// One command-table row.
pub struct CommandSpec {
    /// Uppercase command name.
    pub name: &'static str,
    /// Implementation.
    pub handler: Handler,
    /// Expected argc including the name; negative means "at least |arity|".
    pub arity: i32,
    /// Attribute flags.
    pub flags: u32,
}

use self::flags::{ADMIN, DENY_OOM, LOADING_OK, RANDOM, SKIP_MONITOR, STALE_OK, WRITE};

static COMMANDS: &[CommandSpec] = &[
    // strings
    CommandSpec { name: "GET", handler: string::cmd_get, arity: 2, flags: 0 },
    CommandSpec { name: "SET", handler: string::cmd_set, arity: -3, flags: WRITE | DENY_OOM },
    CommandSpec { name: "SETNX", handler: string::cmd_setnx, arity: 3, flags: WRITE | DENY_OOM },
    CommandSpec { name: "SETEX", handler: string::cmd_setex, arity: 4, flags: WRITE | DENY_OOM },
    CommandSpec { name: "PSETEX", handler: string::cmd_psetex, arity: 4, flags: WRITE | DENY_OOM },
    CommandSpec { name: "APPEND", handler: string::cmd_append, arity: 3, flags: WRITE | DENY_OOM },
    CommandSpec { name: "STRLEN", handler: string::cmd_strlen, arity: 2, flags: 0 },
    CommandSpec { name: "INCR", handler: string::cmd_incr, arity: 2, flags: WRITE | DENY_OOM },
    CommandSpec { name: "DECR", handler: string::cmd_decr, arity: 2, flags: WRITE | DENY_OOM },
    CommandSpec { name: "INCRBY", handler: string::cmd_incrby, arity: 3, flags: WRITE | DENY_OOM },
    CommandSpec { name: "DECRBY", handler: string::cmd_decrby, arity: 3, flags: WRITE | DENY_OOM },
    CommandSpec { name: "INCRBYFLOAT", handler: string::cmd_incrbyfloat, arity: 3, flags: WRITE | DENY_OOM },
    CommandSpec { name: "MGET", handler: string::cmd_mget, arity: -2, flags: 0 },
    CommandSpec { name: "MSET", handler: string::cmd_mset, arity: -3, flags: WRITE | DENY_OOM },
    CommandSpec { name: "MSETNX", handler: string::cmd_msetnx, arity: -3, flags: WRITE | DENY_OOM },
    CommandSpec { name: "GETSET", handler: string::cmd_getset, arity: 3, flags: WRITE | DENY_OOM },
    CommandSpec { name: "GETRANGE", handler: string::cmd_getrange, arity: 4, flags: 0 },
    CommandSpec { name: "SETRANGE", handler: string::cmd_setrange, arity: 4, flags: WRITE | DENY_OOM },
    CommandSpec { name: "GETBIT", handler: string::cmd_getbit, arity: 3, flags: 0 },
    CommandSpec { name: "SETBIT", handler: string::cmd_setbit, arity: 4, flags: WRITE | DENY_OOM },
    CommandSpec { name: "BITCOUNT", handler: string::cmd_bitcount, arity: -2, flags: 0 },
    CommandSpec { name: "BITOP", handler: string::cmd_bitop, arity: -4, flags: WRITE | DENY_OOM },
    // keys
    CommandSpec { name: "DEL", handler: keyspace::cmd_del, arity: -2, flags: WRITE },
    CommandSpec { name: "EXISTS", handler: keyspace::cmd_exists, arity: 2, flags: 0 },
    CommandSpec { name: "EXPIRE", handler: keyspace::cmd_expire, arity: 3, flags: WRITE },
    CommandSpec { name: "EXPIREAT", handler: keyspace::cmd_expireat, arity: 3, flags: WRITE },
    CommandSpec { name: "PEXPIRE", handler: keyspace::cmd_pexpire, arity: 3, flags: WRITE },
    CommandSpec { name: "PEXPIREAT", handler: keyspace::cmd_pexpireat, arity: 3, flags: WRITE },
    CommandSpec { name: "TTL", handler: keyspace::cmd_ttl, arity: 2, flags: 0 },
    CommandSpec { name: "PTTL", handler: keyspace::cmd_pttl, arity: 2, flags: 0 },
    CommandSpec { name: "PERSIST", handler: keyspace::cmd_persist, arity: 2, flags: WRITE },
    CommandSpec { name: "TYPE", handler: keyspace::cmd_type, arity: 2, flags: 0 },
    CommandSpec { name: "RANDOMKEY", handler: keyspace::cmd_randomkey, arity: 1, flags: RANDOM },
    CommandSpec { name: "KEYS", handler: keyspace::cmd_keys, arity: 2, flags: 0 },
    CommandSpec { name: "RENAME", handler: keyspace::cmd_rename, arity: 3, flags: WRITE },
    CommandSpec { name: "RENAMENX", handler: keyspace::cmd_renamenx, arity: 3, flags: WRITE },
    CommandSpec { name: "DBSIZE", handler: keyspace::cmd_dbsize, arity: 1, flags: 0 },
    CommandSpec { name: "MOVE", handler: keyspace::cmd_move, arity: 3, flags: WRITE },
    CommandSpec { name: "SELECT", handler: keyspace::cmd_select, arity: 2, flags: LOADING_OK | STALE_OK },
    CommandSpec { name: "FLUSHDB", handler: keyspace::cmd_flushdb, arity: 1, flags: WRITE },
    CommandSpec { name: "FLUSHALL", handler: keyspace::cmd_flushall, arity: 1, flags: WRITE },
    CommandSpec { name: "OBJECT", handler: keyspace::cmd_object, arity: -2, flags: 0 },
    // lists
    CommandSpec { name: "LPUSH", handler: list::cmd_lpush, arity: -3, flags: WRITE | DENY_OOM },
    CommandSpec { name: "RPUSH", handler: list::cmd_rpush, arity: -3, flags: WRITE | DENY_OOM },
    CommandSpec { name: "LPUSHX", handler: list::cmd_lpushx, arity: 3, flags: WRITE | DENY_OOM },
    CommandSpec { name: "RPUSHX", handler: list::cmd_rpushx, arity: 3, flags: WRITE | DENY_OOM },
    CommandSpec { name: "LPOP", handler: list::cmd_lpop, arity: 2, flags: WRITE },
    CommandSpec { name: "RPOP", handler: list::cmd_rpop, arity: 2, flags: WRITE },
    CommandSpec { name: "LINDEX", handler: list::cmd_lindex, arity: 3, flags: 0 },
    CommandSpec { name: "LLEN", handler: list::cmd_llen, arity: 2, flags: 0 },
    CommandSpec { name: "LSET", handler: list::cmd_lset, arity: 4, flags: WRITE | DENY_OOM },
    CommandSpec { name: "LRANGE", handler: list::cmd_lrange, arity: 4, flags: 0 },
    CommandSpec { name: "LTRIM", handler: list::cmd_ltrim, arity: 4, flags: WRITE },
    CommandSpec { name: "LREM", handler: list::cmd_lrem, arity: 4, flags: WRITE },
    CommandSpec { name: "LINSERT", handler: list::cmd_linsert, arity: 5, flags: WRITE | DENY_OOM },
    CommandSpec { name: "RPOPLPUSH", handler: list::cmd_rpoplpush, arity: 3, flags: WRITE | DENY_OOM },
    CommandSpec { name: "BLPOP", handler: list::cmd_blpop, arity: -3, flags: WRITE },
    CommandSpec { name: "BRPOP", handler: list::cmd_brpop, arity: -3, flags: WRITE },
    CommandSpec { name: "BRPOPLPUSH", handler: list::cmd_brpoplpush, arity: 4, flags: WRITE | DENY_OOM },
    // sets
    CommandSpec { name: "SADD", handler: set::cmd_sadd, arity: -3, flags: WRITE | DENY_OOM },
    CommandSpec { name: "SREM", handler: set::cmd_srem, arity: -3, flags: WRITE },
    CommandSpec { name: "SMOVE", handler: set::cmd_smove, arity: 4, flags: WRITE },
    CommandSpec { name: "SISMEMBER", handler: set::cmd_sismember, arity: 3, flags: 0 },
    CommandSpec { name: "SCARD", handler: set::cmd_scard, arity: 2, flags: 0 },
    CommandSpec { name: "SPOP", handler: set::cmd_spop, arity: 2, flags: WRITE | RANDOM },
    CommandSpec { name: "SRANDMEMBER", handler: set::cmd_srandmember, arity: -2, flags: RANDOM },
    CommandSpec { name: "SMEMBERS", handler: set::cmd_smembers, arity: 2, flags: 0 },
    CommandSpec { name: "SINTER", handler: set::cmd_sinter, arity: -2, flags: 0 },
    CommandSpec { name: "SUNION", handler: set::cmd_sunion, arity: -2, flags: 0 },
    CommandSpec { name: "SDIFF", handler: set::cmd_sdiff, arity: -2, flags: 0 },
    CommandSpec { name: "SINTERSTORE", handler: set::cmd_sinterstore, arity: -3, flags: WRITE | DENY_OOM },
    CommandSpec { name: "SUNIONSTORE", handler: set::cmd_sunionstore, arity: -3, flags: WRITE | DENY_OOM },
    CommandSpec { name: "SDIFFSTORE", handler: set::cmd_sdiffstore, arity: -3, flags: WRITE | DENY_OOM },
    // hashes
    CommandSpec { name: "HSET", handler: hash::cmd_hset, arity: 4, flags: WRITE | DENY_OOM },
    CommandSpec { name: "HSETNX", handler: hash::cmd_hsetnx, arity: 4, flags: WRITE | DENY_OOM },
    CommandSpec { name: "HMSET", handler: hash::cmd_hmset, arity: -4, flags: WRITE | DENY_OOM },
    CommandSpec { name: "HGET", handler: hash::cmd_hget, arity: 3, flags: 0 },
    CommandSpec { name: "HMGET", handler: hash::cmd_hmget, arity: -3, flags: 0 },
    CommandSpec { name: "HINCRBY", handler: hash::cmd_hincrby, arity: 4, flags: WRITE | DENY_OOM },
    CommandSpec { name: "HINCRBYFLOAT", handler: hash::cmd_hincrbyfloat, arity: 4, flags: WRITE | DENY_OOM },
    CommandSpec { name: "HDEL", handler: hash::cmd_hdel, arity: -3, flags: WRITE },
    CommandSpec { name: "HLEN", handler: hash::cmd_hlen, arity: 2, flags: 0 },
    CommandSpec { name: "HKEYS", handler: hash::cmd_hkeys, arity: 2, flags: 0 },
    CommandSpec { name: "HVALS", handler: hash::cmd_hvals, arity: 2, flags: 0 },
    CommandSpec { name: "HGETALL", handler: hash::cmd_hgetall, arity: 2, flags: 0 },
    CommandSpec { name: "HEXISTS", handler: hash::cmd_hexists, arity: 3, flags: 0 },
    // sorted sets
    CommandSpec { name: "ZADD", handler: zset::cmd_zadd, arity: -4, flags: WRITE | DENY_OOM },
    CommandSpec { name: "ZINCRBY", handler: zset::cmd_zincrby, arity: 4, flags: WRITE | DENY_OOM },
    CommandSpec { name: "ZREM", handler: zset::cmd_zrem, arity: -3, flags: WRITE },
    CommandSpec { name: "ZRANGE", handler: zset::cmd_zrange, arity: -4, flags: 0 },
    CommandSpec { name: "ZREVRANGE", handler: zset::cmd_zrevrange, arity: -4, flags: 0 },
    CommandSpec { name: "ZRANGEBYSCORE", handler: zset::cmd_zrangebyscore, arity: -4, flags: 0 },
    CommandSpec { name: "ZREVRANGEBYSCORE", handler: zset::cmd_zrevrangebyscore, arity: -4, flags: 0 },
    CommandSpec { name: "ZCOUNT", handler: zset::cmd_zcount, arity: 4, flags: 0 },
    CommandSpec { name: "ZCARD", handler: zset::cmd_zcard, arity: 2, flags: 0 },
    CommandSpec { name: "ZSCORE", handler: zset::cmd_zscore, arity: 3, flags: 0 },
    CommandSpec { name: "ZRANK", handler: zset::cmd_zrank, arity: 3, flags: 0 },
    CommandSpec { name: "ZREVRANK", handler: zset::cmd_zrevrank, arity: 3, flags: 0 },
    CommandSpec { name: "ZREMRANGEBYSCORE", handler: zset::cmd_zremrangebyscore, arity: 4, flags: WRITE },
    CommandSpec { name: "ZREMRANGEBYRANK", handler: zset::cmd_zremrangebyrank, arity: 4, flags: WRITE },
    CommandSpec { name: "ZUNIONSTORE", handler: zset::cmd_zunionstore, arity: -4, flags: WRITE | DENY_OOM },
    CommandSpec { name: "ZINTERSTORE", handler: zset::cmd_zinterstore, arity: -4, flags: WRITE | DENY_OOM },
    // transactions
    CommandSpec { name: "MULTI", handler: transaction::cmd_multi, arity: 1, flags: SKIP_MONITOR },
    CommandSpec { name: "EXEC", handler: transaction::cmd_exec, arity: 1, flags: SKIP_MONITOR },
    CommandSpec { name: "DISCARD", handler: transaction::cmd_discard, arity: 1, flags: SKIP_MONITOR },
    CommandSpec { name: "WATCH", handler: transaction::cmd_watch, arity: -2, flags: SKIP_MONITOR },
    CommandSpec { name: "UNWATCH", handler: transaction::cmd_unwatch, arity: 1, flags: SKIP_MONITOR },
    // connection & admin
    CommandSpec { name: "PING", handler: admin::cmd_ping, arity: 1, flags: STALE_OK },
    CommandSpec { name: "ECHO", handler: admin::cmd_echo, arity: 2, flags: 0 },
    CommandSpec { name: "AUTH", handler: admin::cmd_auth, arity: 2, flags: LOADING_OK | STALE_OK | SKIP_MONITOR },
    CommandSpec { name: "TIME", handler: admin::cmd_time, arity: 1, flags: RANDOM },
    CommandSpec { name: "SAVE", handler: admin::cmd_save, arity: 1, flags: ADMIN },
    CommandSpec { name: "BGSAVE", handler: admin::cmd_bgsave, arity: 1, flags: ADMIN },
    CommandSpec { name: "BGREWRITEAOF", handler: admin::cmd_bgrewriteaof, arity: 1, flags: ADMIN },
    CommandSpec { name: "LASTSAVE", handler: admin::cmd_lastsave, arity: 1, flags: RANDOM },
    CommandSpec { name: "SHUTDOWN", handler: admin::cmd_shutdown, arity: -1, flags: ADMIN | LOADING_OK },
    CommandSpec { name: "CONFIG", handler: admin::cmd_config, arity: -2, flags: ADMIN },
    CommandSpec { name: "INFO", handler: admin::cmd_info, arity: -1, flags: LOADING_OK | STALE_OK },
    CommandSpec { name: "DEBUG", handler: admin::cmd_debug, arity: -2, flags: ADMIN },
    CommandSpec { name: "SLOWLOG", handler: admin::cmd_slowlog, arity: -2, flags: 0 },
    CommandSpec { name: "CLIENT", handler: admin::cmd_client, arity: -2, flags: ADMIN },
];

static TABLE: Lazy<HashMap<&'static str, &'static CommandSpec>> = Lazy::new(|| {
    COMMANDS.iter().map(|spec| (spec.name, spec)).collect()
});

/// Look a command up by (case-insensitive) name.
pub fn lookup(name: &str) -> Option<&'static CommandSpec> {
    TABLE.get(name.to_uppercase().as_str()).copied()
}

/// Iterate the whole table (INFO commandstats, tooling).
pub fn all_commands() -> impl Iterator<Item = &'static CommandSpec> {
    COMMANDS.iter()
}

fn arity_ok(spec: &CommandSpec, argc: usize) -> bool {
    if spec.arity >= 0 {
        argc == spec.arity as usize
    } else {
        argc >= (-spec.arity) as usize
    }
}

/// The full gate pipeline for one inbound command.
pub fn dispatch(server: &mut Server, client: &mut Client, argv: &[Bytes]) -> Reply {
    if argv.is_empty() {
        return Reply::Error("ERR empty command".into());
    }
    let name = String::from_utf8_lossy(&argv[0]).to_uppercase();
    let Some(spec) = TABLE.get(name.as_str()).copied() else {
        if client.in_multi() {
            client.dirty_exec = true;
        }
        return Reply::Error(format!("ERR unknown command '{name}'"));
    };

    if !arity_ok(spec, argv.len()) {
        if client.in_multi() {
            client.dirty_exec = true;
        }
        return Reply::Error(format!(
            "ERR wrong number of arguments for '{}' command",
            name.to_lowercase()
        ));
    }

    if !server.cfg.requirepass.is_empty() && !client.authenticated && spec.name != "AUTH" {
        return Reply::Error("ERR operation not permitted".into());
    }

    if server.loading && !client.loading && spec.flags & flags::LOADING_OK == 0 {
        return Reply::Error("LOADING server is loading the dataset in memory".into());
    }

    if spec.flags & flags::WRITE != 0 && !client.loading {
        if server.cfg.maxmemory > 0 {
            let out_of_memory = evict::free_memory_if_needed(server).is_err();
            if out_of_memory && spec.flags & flags::DENY_OOM != 0 {
                return Reply::error(&ember_core::Error::OutOfMemory);
            }
        }
        if server.cfg.stop_writes_on_bgsave_error && !server.last_bgsave_ok {
            return Reply::Error(
                "MISCONF Errors writing the snapshot in background. \
                 Write commands are disabled. Check the logs for details."
                    .into(),
            );
        }
    }

    // Transaction queueing: everything except transaction control enqueues.
    if client.in_multi() && !matches!(spec.name, "MULTI" | "EXEC" | "DISCARD" | "WATCH") {
        client
            .multi_queue
            .as_mut()
            .expect("in_multi checked")
            .push(argv.to_vec());
        return Reply::Simple("QUEUED");
    }

    call(server, client, spec, argv)
}

/// Invoke a resolved command: time it, account it, propagate its effects.
pub(crate) fn call(
    server: &mut Server,
    client: &mut Client,
    spec: &CommandSpec,
    argv: &[Bytes],
) -> Reply {
    let started_us = now_us();
    let dirty_before = server.dirty;
    server.prop_override = None;

    let reply = (spec.handler)(server, client, argv);

    let duration_us = now_us().saturating_sub(started_us);
    server.stats.total_commands += 1;
    let stat = server.stats.per_command.entry(spec.name).or_default();
    stat.calls += 1;
    stat.usec += duration_us;

    if !client.loading
        && server.cfg.slowlog_log_slower_than >= 0
        && duration_us as i64 >= server.cfg.slowlog_log_slower_than
    {
        let max_len = server.cfg.slowlog_max_len;
        let unix_s = server.now_ms / 1000;
        server.slowlog.push(argv, duration_us, unix_s, max_len);
    }

    if server.dirty > dirty_before {
        match server.prop_override.take() {
            Some(commands) => {
                for command in commands {
                    server.propagate(client.db, &command);
                }
            }
            None => server.propagate(client.db, argv),
        }
    } else {
        server.prop_override = None;
    }

    reply
}

/// Direct execution used by EXEC for queued commands: the queue-time gates
/// already ran, so this resolves and calls.
pub(crate) fn call_queued(server: &mut Server, client: &mut Client, argv: &[Bytes]) -> Reply {
    let name = String::from_utf8_lossy(&argv[0]).to_uppercase();
    match TABLE.get(name.as_str()).copied() {
        Some(spec) => call(server, client, spec, argv),
        None => Reply::Error(format!("ERR unknown command '{name}'")),
    }
}

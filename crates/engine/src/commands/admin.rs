//! Connection and administrative commands.

use crate::client::Client;
use crate::commands::err;
use crate::evict::estimate_idle_s;
use crate::server::{RewriteStart, Server};
use ember_core::util::{const_time_eq, now_us};
use ember_core::{Bytes, Error, Reply};
use std::sync::Arc;

pub(crate) fn cmd_ping(_server: &mut Server, _client: &mut Client, _argv: &[Bytes]) -> Reply {
    Reply::Simple("PONG")
}

pub(crate) fn cmd_echo(_server: &mut Server, _client: &mut Client, argv: &[Bytes]) -> Reply {
    Reply::Bulk(argv[1].clone())
}

pub(crate) fn cmd_auth(server: &mut Server, client: &mut Client, argv: &[Bytes]) -> Reply {
    if server.cfg.requirepass.is_empty() {
        return Reply::Error("ERR Client sent AUTH, but no password is set".into());
    }
    if const_time_eq(server.cfg.requirepass.as_bytes(), &argv[1]) {
        client.authenticated = true;
        Reply::ok()
    } else {
        client.authenticated = false;
        Reply::Error("ERR invalid password".into())
    }
}

pub(crate) fn cmd_time(_server: &mut Server, _client: &mut Client, _argv: &[Bytes]) -> Reply {
    let us = now_us();
    Reply::Array(vec![
        Reply::Bulk((us / 1_000_000).to_string().into_bytes()),
        Reply::Bulk((us % 1_000_000).to_string().into_bytes()),
    ])
}

pub(crate) fn cmd_save(server: &mut Server, _client: &mut Client, _argv: &[Bytes]) -> Reply {
    if server.child_running() {
        return Reply::Error("ERR Background save already in progress".into());
    }
    match server.save_snapshot_blocking() {
        Ok(()) => Reply::ok(),
        Err(e) => Reply::Error(format!("ERR {e}")),
    }
}

pub(crate) fn cmd_bgsave(server: &mut Server, _client: &mut Client, _argv: &[Bytes]) -> Reply {
    match server.start_snapshot() {
        Ok(()) => Reply::Status("Background saving started".into()),
        Err(e) => Reply::Error(format!("ERR {e}")),
    }
}

pub(crate) fn cmd_bgrewriteaof(server: &mut Server, _client: &mut Client, _argv: &[Bytes]) -> Reply {
    match server.start_rewrite() {
        Ok(RewriteStart::Started) => {
            Reply::Status("Background append only file rewriting started".into())
        }
        Ok(RewriteStart::Scheduled) => {
            Reply::Status("Background append only file rewriting scheduled".into())
        }
        Err(e) => Reply::Error(format!("ERR {e}")),
    }
}

pub(crate) fn cmd_lastsave(server: &mut Server, _client: &mut Client, _argv: &[Bytes]) -> Reply {
    Reply::Int((server.last_save_ms / 1000) as i64)
}

pub(crate) fn cmd_shutdown(server: &mut Server, _client: &mut Client, argv: &[Bytes]) -> Reply {
    let save = match argv.get(1) {
        None => None,
        Some(arg) if arg.eq_ignore_ascii_case(b"NOSAVE") => Some(false),
        Some(arg) if arg.eq_ignore_ascii_case(b"SAVE") => Some(true),
        Some(_) => return err(Error::Syntax),
    };
    server.trigger_shutdown(save);
    // No reply: the connection is going away.
    Reply::None
}

pub(crate) fn cmd_config(server: &mut Server, _client: &mut Client, argv: &[Bytes]) -> Reply {
    let sub = String::from_utf8_lossy(&argv[1]).to_uppercase();
    match sub.as_str() {
        "GET" if argv.len() == 3 => {
            let mut out = Vec::new();
            for (name, value) in server.cfg.get_matching(&argv[2]) {
                out.push(Reply::Bulk(name.into_bytes()));
                out.push(Reply::Bulk(value.into_bytes()));
            }
            Reply::Array(out)
        }
        "SET" if argv.len() == 4 => {
            let name = String::from_utf8_lossy(&argv[2]).to_lowercase();
            match server.cfg.set_parameter(&name, &argv[3]) {
                Ok(()) => {
                    apply_config_side_effects(server, &name);
                    Reply::ok()
                }
                Err(msg) => Reply::Error(format!("ERR {msg}")),
            }
        }
        "RESETSTAT" if argv.len() == 2 => {
            server.stats.total_commands = 0;
            server.stats.total_connections = 0;
            server.stats.expired_keys = 0;
            server.stats.evicted_keys = 0;
            server.stats.keyspace_hits = 0;
            server.stats.keyspace_misses = 0;
            server.stats.per_command.clear();
            Reply::ok()
        }
        _ => Reply::Error("ERR CONFIG subcommand must be one of GET, SET, RESETSTAT".into()),
    }
}

/// Runtime transitions that follow a config write.
fn apply_config_side_effects(server: &mut Server, name: &str) {
    match name {
        "appendfsync" => {
            let policy = server.cfg.appendfsync;
            if let Some(aof) = &mut server.aof {
                aof.set_policy(policy);
            }
        }
        "appendonly" => {
            let enable = server.cfg.appendonly;
            if enable && server.aof.is_none() {
                match ember_durability::AofWriter::open(
                    server.cfg.aof_path(),
                    server.cfg.appendfsync,
                    server.clock_ms(),
                ) {
                    Ok(writer) => {
                        server.aof = Some(writer);
                        server.aof_last_db = -1;
                        // Seed the fresh log with the complete dataset.
                        let _ = server.start_rewrite();
                    }
                    Err(e) => {
                        tracing::error!("could not open append-only log: {e}");
                        server.cfg.appendonly = false;
                    }
                }
            } else if !enable {
                if let Some(mut aof) = server.aof.take() {
                    let now = server.clock_ms();
                    let _ = aof.flush_and_sync(&server.pool, now);
                }
            }
        }
        _ => {}
    }
}

pub(crate) fn cmd_info(server: &mut Server, _client: &mut Client, argv: &[Bytes]) -> Reply {
    let section = argv
        .get(1)
        .map(|s| String::from_utf8_lossy(s).to_lowercase());
    let want = |name: &str| section.as_deref().map_or(true, |s| s == name || s == "all");
    let mut out = String::new();

    if want("server") {
        out.push_str("# Server\r\n");
        out.push_str(&format!("process_id:{}\r\n", std::process::id()));
        out.push_str(&format!("uptime_in_seconds:{}\r\n", server.uptime_s()));
        out.push_str(&format!("uptime_in_days:{}\r\n", server.uptime_s() / 86_400));
        out.push_str("\r\n");
    }
    if want("clients") {
        out.push_str("# Clients\r\n");
        out.push_str(&format!("connected_clients:{}\r\n", server.clients.len()));
        let blocked = server
            .clients
            .values()
            .filter(|c| c.blocked.is_some())
            .count();
        out.push_str(&format!("blocked_clients:{blocked}\r\n"));
        out.push_str("\r\n");
    }
    if want("memory") {
        out.push_str("# Memory\r\n");
        out.push_str(&format!("used_memory:{}\r\n", server.used_memory()));
        out.push_str(&format!("maxmemory:{}\r\n", server.cfg.maxmemory));
        out.push_str(&format!(
            "maxmemory_policy:{}\r\n",
            server.cfg.maxmemory_policy.name()
        ));
        out.push_str("\r\n");
    }
    if want("persistence") {
        out.push_str("# Persistence\r\n");
        out.push_str(&format!("loading:{}\r\n", server.loading as u8));
        out.push_str(&format!("rdb_changes_since_last_save:{}\r\n", server.dirty));
        out.push_str(&format!(
            "rdb_last_save_time:{}\r\n",
            server.last_save_ms / 1000
        ));
        out.push_str(&format!(
            "rdb_last_bgsave_status:{}\r\n",
            if server.last_bgsave_ok { "ok" } else { "err" }
        ));
        out.push_str(&format!(
            "aof_enabled:{}\r\n",
            server.aof.is_some() as u8
        ));
        out.push_str(&format!(
            "aof_rewrite_in_progress:{}\r\n",
            matches!(
                &server.child,
                Some(child) if child.kind == crate::server::ChildKind::Rewrite
            ) as u8
        ));
        out.push_str(&format!(
            "aof_last_bgrewrite_status:{}\r\n",
            if server.last_bgrewrite_ok { "ok" } else { "err" }
        ));
        if let Some(aof) = &server.aof {
            out.push_str(&format!("aof_current_size:{}\r\n", aof.current_size()));
            out.push_str(&format!("aof_base_size:{}\r\n", server.aof_rewrite_base_size));
            out.push_str(&format!(
                "aof_pending_rewrite:{}\r\n",
                server.aof_rewrite_scheduled as u8
            ));
            out.push_str(&format!(
                "aof_delayed_fsync:{}\r\n",
                aof.delayed_fsync_count()
            ));
        }
        out.push_str("\r\n");
    }
    if want("stats") {
        let stats = &server.stats;
        out.push_str("# Stats\r\n");
        out.push_str(&format!(
            "total_connections_received:{}\r\n",
            stats.total_connections
        ));
        out.push_str(&format!(
            "total_commands_processed:{}\r\n",
            stats.total_commands
        ));
        out.push_str(&format!(
            "instantaneous_ops_per_sec:{}\r\n",
            stats.ops_per_sec
        ));
        out.push_str(&format!("expired_keys:{}\r\n", stats.expired_keys));
        out.push_str(&format!("evicted_keys:{}\r\n", stats.evicted_keys));
        out.push_str(&format!("keyspace_hits:{}\r\n", stats.keyspace_hits));
        out.push_str(&format!("keyspace_misses:{}\r\n", stats.keyspace_misses));
        out.push_str("\r\n");
    }
    if want("commandstats") {
        out.push_str("# Commandstats\r\n");
        let mut names: Vec<&&str> = server.stats.per_command.keys().collect();
        names.sort();
        for name in names {
            let stat = server.stats.per_command[*name];
            let per_call = if stat.calls > 0 {
                stat.usec as f64 / stat.calls as f64
            } else {
                0.0
            };
            out.push_str(&format!(
                "cmdstat_{}:calls={},usec={},usec_per_call={:.2}\r\n",
                name.to_lowercase(),
                stat.calls,
                stat.usec,
                per_call
            ));
        }
        out.push_str("\r\n");
    }
    if want("keyspace") {
        out.push_str("# Keyspace\r\n");
        for db in 0..server.database_count() {
            let keys = server.dbsize(db);
            if keys > 0 {
                let expires = server.db_ref(db).expires.len();
                out.push_str(&format!("db{db}:keys={keys},expires={expires}\r\n"));
            }
        }
        out.push_str("\r\n");
    }
    Reply::Bulk(out.into_bytes())
}

pub(crate) fn cmd_debug(server: &mut Server, client: &mut Client, argv: &[Bytes]) -> Reply {
    let sub = String::from_utf8_lossy(&argv[1]).to_uppercase();
    match sub.as_str() {
        "OBJECT" if argv.len() == 3 => {
            let db = client.db;
            server.expire_if_needed(db, &argv[2]);
            let Some(obj) = server.db_ref(db).keys.get(&argv[2]) else {
                return Reply::Error("ERR no such key".into());
            };
            Reply::Status(format!(
                "Value refcount:{} encoding:{} serializedlength:{} lru:{} lru_seconds_idle:{}",
                Arc::strong_count(obj),
                obj.value.encoding_name(),
                obj.mem_usage(),
                obj.lru_stamp(),
                estimate_idle_s(server.lru_clock, obj.lru_stamp()),
            ))
        }
        "SLEEP" if argv.len() == 3 => match ember_core::util::parse_f64(&argv[2]) {
            Some(seconds) if seconds >= 0.0 => {
                // Deliberately blocks the loop; that is what the command is
                // for.
                std::thread::sleep(std::time::Duration::from_secs_f64(seconds));
                Reply::ok()
            }
            _ => err(Error::NotAFloat),
        },
        "SET-ACTIVE-EXPIRE" if argv.len() == 3 => {
            match ember_core::util::parse_i64(&argv[2]) {
                Some(0) => {
                    server.active_expire_enabled = false;
                    Reply::ok()
                }
                Some(1) => {
                    server.active_expire_enabled = true;
                    Reply::ok()
                }
                _ => err(Error::Syntax),
            }
        }
        _ => Reply::Error(format!("ERR DEBUG subcommand '{sub}' not supported")),
    }
}

pub(crate) fn cmd_slowlog(server: &mut Server, _client: &mut Client, argv: &[Bytes]) -> Reply {
    let sub = String::from_utf8_lossy(&argv[1]).to_uppercase();
    match sub.as_str() {
        "GET" => {
            let count = match argv.get(2) {
                Some(arg) => match ember_core::util::parse_i64(arg) {
                    Some(v) if v >= 0 => v as usize,
                    _ => return err(Error::NotAnInteger),
                },
                None => 10,
            };
            let entries: Vec<Reply> = server
                .slowlog
                .get(count)
                .map(|entry| {
                    Reply::Array(vec![
                        Reply::Int(entry.id as i64),
                        Reply::Int(entry.unix_time_s as i64),
                        Reply::Int(entry.duration_us as i64),
                        Reply::Array(
                            entry.argv.iter().cloned().map(Reply::Bulk).collect(),
                        ),
                    ])
                })
                .collect();
            Reply::Array(entries)
        }
        "RESET" => {
            server.slowlog.reset();
            Reply::ok()
        }
        "LEN" => Reply::Int(server.slowlog.len() as i64),
        _ => Reply::Error("ERR SLOWLOG subcommand must be one of GET, RESET, LEN".into()),
    }
}

pub(crate) fn cmd_client(server: &mut Server, client: &mut Client, argv: &[Bytes]) -> Reply {
    let sub = String::from_utf8_lossy(&argv[1]).to_uppercase();
    match sub.as_str() {
        "LIST" if argv.len() == 2 => {
            let now = server.clock_ms();
            fn describe(lines: &mut String, c: &Client, now: u64) {
                lines.push_str(&format!(
                    "id={} name={} db={} multi={} watch={} age={}\n",
                    c.id,
                    c.name,
                    c.db,
                    c.multi_queue.as_ref().map_or(-1, |q| q.len() as i64),
                    c.watched.len(),
                    now.saturating_sub(c.created_ms) / 1000,
                ));
            }
            let mut lines = String::new();
            describe(&mut lines, client, now);
            let mut others: Vec<&Client> = server.clients.values().collect();
            others.sort_by_key(|c| c.id);
            for other in others {
                describe(&mut lines, other, now);
            }
            Reply::Bulk(lines.into_bytes())
        }
        "GETNAME" if argv.len() == 2 => Reply::Bulk(client.name.clone().into_bytes()),
        "SETNAME" if argv.len() == 3 => {
            let name = String::from_utf8_lossy(&argv[2]).to_string();
            if name.chars().any(|c| c.is_whitespace() || !c.is_ascii_graphic()) {
                return Reply::Error(
                    "ERR Client names cannot contain spaces, newlines or special characters."
                        .into(),
                );
            }
            client.name = name;
            Reply::ok()
        }
        _ => Reply::Error("ERR CLIENT subcommand must be one of LIST, GETNAME, SETNAME".into()),
    }
}

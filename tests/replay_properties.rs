//! Property tests over the public facade: any legal mutation sequence,
//! once persisted through the append-only log, replays into an
//! observationally identical keyspace.

use emberdb::{Config, FsyncPolicy, Reply, Server};
use proptest::prelude::*;
use std::sync::Once;
use tempfile::TempDir;

static TRACING: Once = Once::new();

fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    });
}

fn cmd(server: &mut Server, client: u64, parts: Vec<Vec<u8>>) -> Reply {
    server.execute(client, parts)
}

fn s(parts: &[&str]) -> Vec<Vec<u8>> {
    parts.iter().map(|p| p.as_bytes().to_vec()).collect()
}

/// One generated mutation over a small key universe.
#[derive(Debug, Clone)]
enum Op {
    Set(u8, String),
    Del(u8),
    Incr(u8),
    Rpush(u8, String),
    Lpop(u8),
    Sadd(u8, String),
    Srem(u8, String),
    Hset(u8, String, String),
    Zadd(u8, i16, String),
    Zrem(u8, String),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    let word = "[a-z]{1,8}";
    prop_oneof![
        (0u8..4, word).prop_map(|(k, v)| Op::Set(k, v)),
        (0u8..12).prop_map(Op::Del),
        (4u8..6).prop_map(Op::Incr),
        (6u8..8, word).prop_map(|(k, v)| Op::Rpush(k, v)),
        (6u8..8).prop_map(Op::Lpop),
        (8u8..10, word).prop_map(|(k, v)| Op::Sadd(k, v)),
        (8u8..10, word).prop_map(|(k, v)| Op::Srem(k, v)),
        (10u8..11, word).prop_map(|(k, f)| Op::Hset(k, f.clone(), f)),
        (11u8..12, -100i16..100, word).prop_map(|(k, score, m)| Op::Zadd(k, score, m)),
        (11u8..12, word).prop_map(|(k, m)| Op::Zrem(k, m)),
    ]
}

fn key(k: u8) -> String {
    format!("key:{k}")
}

fn apply(server: &mut Server, client: u64, op: &Op) {
    let argv = match op {
        Op::Set(k, v) => s(&["SET", &key(*k), v]),
        Op::Del(k) => s(&["DEL", &key(*k)]),
        Op::Incr(k) => s(&["INCR", &key(*k)]),
        Op::Rpush(k, v) => s(&["RPUSH", &key(*k), v]),
        Op::Lpop(k) => s(&["LPOP", &key(*k)]),
        Op::Sadd(k, v) => s(&["SADD", &key(*k), v]),
        Op::Srem(k, v) => s(&["SREM", &key(*k), v]),
        Op::Hset(k, f, v) => s(&["HSET", &key(*k), f, v]),
        Op::Zadd(k, score, m) => s(&["ZADD", &key(*k), &score.to_string(), m]),
        Op::Zrem(k, m) => s(&["ZREM", &key(*k), m]),
    };
    cmd(server, client, argv);
}

/// Everything observable about the keyspace, in a canonical order.
fn observe(server: &mut Server, client: u64) -> Vec<(String, Reply)> {
    let mut out = Vec::new();
    for k in 0..12u8 {
        let name = key(k);
        out.push((format!("type {name}"), cmd(server, client, s(&["TYPE", &name]))));
        out.push((format!("get {name}"), cmd(server, client, s(&["GET", &name]))));
        out.push((
            format!("lrange {name}"),
            cmd(server, client, s(&["LRANGE", &name, "0", "-1"])),
        ));
        let members = cmd(server, client, s(&["SMEMBERS", &name]));
        out.push((format!("smembers {name}"), sort_array(members)));
        let entries = cmd(server, client, s(&["HGETALL", &name]));
        out.push((format!("hgetall {name}"), sort_array(entries)));
        out.push((
            format!("zrange {name}"),
            cmd(server, client, s(&["ZRANGE", &name, "0", "-1", "WITHSCORES"])),
        ));
    }
    out.push(("dbsize".into(), cmd(server, client, s(&["DBSIZE"]))));
    out
}

/// Set/hash iteration order is encoding-dependent and not observable;
/// canonicalize before comparing.
fn sort_array(reply: Reply) -> Reply {
    match reply {
        Reply::Array(mut items) => {
            items.sort_by_key(|item| format!("{item:?}"));
            Reply::Array(items)
        }
        other => other,
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(12))]

    #[test]
    fn prop_log_replay_is_observationally_identical(
        ops in proptest::collection::vec(op_strategy(), 1..80),
    ) {
        init_tracing();
        let dir = TempDir::new().unwrap();
        let cfg = Config::for_testing(dir.path())
            .with_appendonly(true)
            .with_appendfsync(FsyncPolicy::Always);

        let before = {
            let mut server = Server::open(cfg.clone()).unwrap();
            let client = server.connect_client();
            for op in &ops {
                apply(&mut server, client, op);
            }
            let before = observe(&mut server, client);
            server.before_sleep();
            server.shutdown();
            before
        };

        let mut server = Server::open(cfg).unwrap();
        let client = server.connect_client();
        let after = observe(&mut server, client);
        prop_assert_eq!(before, after);
    }

    #[test]
    fn prop_rewrite_preserves_observations(
        ops in proptest::collection::vec(op_strategy(), 1..60),
    ) {
        init_tracing();
        let dir = TempDir::new().unwrap();
        let cfg = Config::for_testing(dir.path())
            .with_appendonly(true)
            .with_appendfsync(FsyncPolicy::Always);

        let before = {
            let mut server = Server::open(cfg.clone()).unwrap();
            let client = server.connect_client();
            for op in &ops {
                apply(&mut server, client, op);
            }
            cmd(&mut server, client, s(&["BGREWRITEAOF"]));
            while server.child_running() {
                server.tick();
                std::thread::sleep(std::time::Duration::from_millis(1));
            }
            server.tick();
            let before = observe(&mut server, client);
            server.before_sleep();
            server.shutdown();
            before
        };

        let mut server = Server::open(cfg).unwrap();
        let client = server.connect_client();
        let after = observe(&mut server, client);
        prop_assert_eq!(before, after);
    }
}

//! Append-only log and snapshot behavior: replay fidelity, normalization,
//! background rewrite under concurrent writes, startup precedence.

use ember_core::Reply;
use ember_durability::FsyncPolicy;
use ember_engine::{Config, Server};
use tempfile::TempDir;

fn cmd(server: &mut Server, client: u64, parts: &[&str]) -> Reply {
    server.execute(
        client,
        parts.iter().map(|p| p.as_bytes().to_vec()).collect(),
    )
}

fn bulk(s: &str) -> Reply {
    Reply::Bulk(s.as_bytes().to_vec())
}

fn aof_config(dir: &TempDir) -> Config {
    Config::for_testing(dir.path())
        .with_appendonly(true)
        .with_appendfsync(FsyncPolicy::Always)
}

fn wait_for_children(server: &mut Server) {
    while server.child_running() {
        server.tick();
        std::thread::sleep(std::time::Duration::from_millis(2));
    }
    server.tick();
}

#[test]
fn test_counter_persists_through_log() {
    let dir = TempDir::new().unwrap();
    {
        let mut server = Server::open(aof_config(&dir)).unwrap();
        let c = server.connect_client();
        assert_eq!(cmd(&mut server, c, &["SET", "counter", "10"]), Reply::ok());
        assert_eq!(cmd(&mut server, c, &["INCRBY", "counter", "5"]), Reply::Int(15));
        assert_eq!(cmd(&mut server, c, &["INCRBYFLOAT", "counter", "0.5"]), bulk("15.5"));
        server.before_sleep();
        server.shutdown();
    }
    {
        let mut server = Server::open(aof_config(&dir)).unwrap();
        let c = server.connect_client();
        assert_eq!(cmd(&mut server, c, &["GET", "counter"]), bulk("15.5"));
    }
}

#[test]
fn test_float_results_are_logged_as_assignments() {
    let dir = TempDir::new().unwrap();
    let mut server = Server::open(aof_config(&dir)).unwrap();
    let c = server.connect_client();
    cmd(&mut server, c, &["SET", "f", "1"]);
    cmd(&mut server, c, &["INCRBYFLOAT", "f", "0.1"]);
    cmd(&mut server, c, &["HSET", "h", "n", "1"]);
    cmd(&mut server, c, &["HINCRBYFLOAT", "h", "n", "0.2"]);
    server.before_sleep();

    let log = std::fs::read(server.config().aof_path()).unwrap();
    let text = String::from_utf8_lossy(&log);
    assert!(!text.contains("INCRBYFLOAT"), "float increments must not replay");
    assert!(!text.contains("HINCRBYFLOAT"));
    assert!(text.contains("1.1"));
    assert!(text.contains("1.2"));
}

#[test]
fn test_expires_are_logged_as_absolute_deadlines() {
    let dir = TempDir::new().unwrap();
    let mut server = Server::open(aof_config(&dir)).unwrap();
    let c = server.connect_client();
    cmd(&mut server, c, &["SET", "k", "v"]);
    cmd(&mut server, c, &["EXPIRE", "k", "1000"]);
    cmd(&mut server, c, &["SETEX", "e", "1000", "v"]);
    server.before_sleep();

    let log = std::fs::read(server.config().aof_path()).unwrap();
    let text = String::from_utf8_lossy(&log);
    assert!(text.contains("PEXPIREAT"));
    assert!(!text.contains("SETEX"));
    assert!(!text.contains("\r\nEXPIRE\r\n"));
}

#[test]
fn test_ttl_survives_restart() {
    let dir = TempDir::new().unwrap();
    {
        let mut server = Server::open(aof_config(&dir)).unwrap();
        let c = server.connect_client();
        cmd(&mut server, c, &["SET", "keep", "v"]);
        cmd(&mut server, c, &["SET", "fleeting", "v"]);
        cmd(&mut server, c, &["EXPIRE", "fleeting", "600"]);
        server.before_sleep();
        server.shutdown();
    }
    {
        let mut server = Server::open(aof_config(&dir)).unwrap();
        let c = server.connect_client();
        assert_eq!(cmd(&mut server, c, &["TTL", "keep"]), Reply::Int(-1));
        match cmd(&mut server, c, &["TTL", "fleeting"]) {
            Reply::Int(ttl) => assert!((1..=600).contains(&ttl), "ttl {ttl}"),
            other => panic!("unexpected {other:?}"),
        }
    }
}

#[test]
fn test_replay_is_observationally_identical() {
    let dir = TempDir::new().unwrap();
    let probe: Vec<Vec<&str>> = vec![
        vec!["GET", "s"],
        vec!["LRANGE", "l", "0", "-1"],
        vec!["SMEMBERS", "nums"],
        vec!["HGETALL", "h"],
        vec!["ZRANGE", "z", "0", "-1", "WITHSCORES"],
        vec!["DBSIZE"],
    ];

    let before: Vec<Reply>;
    {
        let mut server = Server::open(aof_config(&dir)).unwrap();
        let c = server.connect_client();
        cmd(&mut server, c, &["SET", "s", "value"]);
        cmd(&mut server, c, &["RPUSH", "l", "a", "b", "c"]);
        cmd(&mut server, c, &["SADD", "nums", "1", "2", "3"]);
        cmd(&mut server, c, &["HMSET", "h", "f1", "v1", "f2", "v2"]);
        cmd(&mut server, c, &["ZADD", "z", "1", "a", "2.5", "b"]);
        cmd(&mut server, c, &["LPOP", "l"]);
        cmd(&mut server, c, &["SREM", "nums", "2"]);
        cmd(&mut server, c, &["DEL", "h"]);
        cmd(&mut server, c, &["HMSET", "h", "only", "field"]);
        before = probe.iter().map(|p| cmd(&mut server, c, p)).collect();
        server.before_sleep();
        server.shutdown();
    }
    {
        let mut server = Server::open(aof_config(&dir)).unwrap();
        let c = server.connect_client();
        let after: Vec<Reply> = probe.iter().map(|p| cmd(&mut server, c, p)).collect();
        assert_eq!(before, after);
    }
}

#[test]
fn test_transaction_replays_between_markers() {
    let dir = TempDir::new().unwrap();
    {
        let mut server = Server::open(aof_config(&dir)).unwrap();
        let c = server.connect_client();
        cmd(&mut server, c, &["MULTI"]);
        cmd(&mut server, c, &["SET", "t", "1"]);
        cmd(&mut server, c, &["INCR", "t"]);
        cmd(&mut server, c, &["EXEC"]);
        server.before_sleep();

        let log = std::fs::read(server.config().aof_path()).unwrap();
        let text = String::from_utf8_lossy(&log);
        assert!(text.contains("MULTI"));
        assert!(text.contains("EXEC"));
        server.shutdown();
    }
    {
        let mut server = Server::open(aof_config(&dir)).unwrap();
        let c = server.connect_client();
        assert_eq!(cmd(&mut server, c, &["GET", "t"]), bulk("2"));
    }
}

#[test]
fn test_select_emitted_on_database_switch() {
    let dir = TempDir::new().unwrap();
    {
        let mut server = Server::open(aof_config(&dir)).unwrap();
        let c = server.connect_client();
        cmd(&mut server, c, &["SET", "in-zero", "0"]);
        cmd(&mut server, c, &["SELECT", "3"]);
        cmd(&mut server, c, &["SET", "in-three", "3"]);
        server.before_sleep();
        server.shutdown();
    }
    {
        let mut server = Server::open(aof_config(&dir)).unwrap();
        let c = server.connect_client();
        assert_eq!(cmd(&mut server, c, &["GET", "in-zero"]), bulk("0"));
        cmd(&mut server, c, &["SELECT", "3"]);
        assert_eq!(cmd(&mut server, c, &["GET", "in-three"]), bulk("3"));
    }
}

#[test]
fn test_random_ops_replay_concretely() {
    let dir = TempDir::new().unwrap();
    let popped;
    {
        let mut server = Server::open(aof_config(&dir)).unwrap();
        let c = server.connect_client();
        cmd(&mut server, c, &["SADD", "s", "a", "b", "c"]);
        popped = match cmd(&mut server, c, &["SPOP", "s"]) {
            Reply::Bulk(member) => member,
            other => panic!("unexpected {other:?}"),
        };
        server.before_sleep();

        let log = std::fs::read(server.config().aof_path()).unwrap();
        let text = String::from_utf8_lossy(&log);
        assert!(text.contains("SREM"), "SPOP must log its concrete removal");
        server.shutdown();
    }
    {
        let mut server = Server::open(aof_config(&dir)).unwrap();
        let c = server.connect_client();
        assert_eq!(cmd(&mut server, c, &["SCARD", "s"]), Reply::Int(2));
        let member = String::from_utf8(popped).unwrap();
        assert_eq!(cmd(&mut server, c, &["SISMEMBER", "s", &member]), Reply::Int(0));
    }
}

#[test]
fn test_rewrite_produces_equivalent_compact_log() {
    let dir = TempDir::new().unwrap();
    {
        let mut server = Server::open(aof_config(&dir)).unwrap();
        let c = server.connect_client();
        // Grow a log with heavy churn on few keys.
        for i in 0..500 {
            let v = format!("{i}");
            cmd(&mut server, c, &["SET", "hot", &v]);
            cmd(&mut server, c, &["INCR", "cnt"]);
        }
        server.before_sleep();
        let size_before = std::fs::metadata(server.config().aof_path()).unwrap().len();

        assert_eq!(
            cmd(&mut server, c, &["BGREWRITEAOF"]),
            Reply::Status("Background append only file rewriting started".into())
        );
        wait_for_children(&mut server);
        server.before_sleep();
        let size_after = std::fs::metadata(server.config().aof_path()).unwrap().len();
        assert!(
            size_after < size_before / 2,
            "rewrite should compact ({size_before} -> {size_after})"
        );
        server.shutdown();
    }
    {
        let mut server = Server::open(aof_config(&dir)).unwrap();
        let c = server.connect_client();
        assert_eq!(cmd(&mut server, c, &["GET", "hot"]), bulk("499"));
        assert_eq!(cmd(&mut server, c, &["GET", "cnt"]), bulk("500"));
    }
}

#[test]
fn test_rewrite_under_concurrent_writes() {
    let dir = TempDir::new().unwrap();
    let final_dbsize;
    {
        let mut server = Server::open(aof_config(&dir)).unwrap();
        let c = server.connect_client();
        for i in 0..3_000 {
            let key = format!("key:{i}");
            let value = format!("value:{i}");
            cmd(&mut server, c, &["SET", &key, &value]);
        }
        server.before_sleep();

        cmd(&mut server, c, &["BGREWRITEAOF"]);
        // While the background job runs (or before its handoff is reaped),
        // keep mutating: these land in the rewrite diff buffer.
        for i in 0..1_000 {
            let key = format!("key:{i}");
            match i % 3 {
                0 => {
                    let value = format!("updated:{i}");
                    cmd(&mut server, c, &["SET", &key, &value]);
                }
                1 => {
                    cmd(&mut server, c, &["DEL", &key]);
                }
                _ => {
                    let member = format!("m{i}");
                    cmd(&mut server, c, &["ZADD", "scores", "1.5", &member]);
                }
            }
        }
        wait_for_children(&mut server);
        server.before_sleep();
        final_dbsize = server.dbsize(0);
        server.shutdown();
    }
    {
        let mut server = Server::open(aof_config(&dir)).unwrap();
        let c = server.connect_client();
        assert_eq!(server.dbsize(0), final_dbsize);
        assert_eq!(cmd(&mut server, c, &["GET", "key:0"]), bulk("updated:0"));
        assert_eq!(cmd(&mut server, c, &["EXISTS", "key:1"]), Reply::Int(0));
        assert_eq!(cmd(&mut server, c, &["GET", "key:2"]), bulk("value:2"));
        assert_eq!(cmd(&mut server, c, &["ZSCORE", "scores", "m2"]), bulk("1.5"));
        assert_eq!(cmd(&mut server, c, &["ZCARD", "scores"]), Reply::Int(333));
    }
}

#[test]
fn test_snapshot_save_and_reload() {
    let dir = TempDir::new().unwrap();
    {
        let mut server = Server::open(Config::for_testing(dir.path())).unwrap();
        let c = server.connect_client();
        cmd(&mut server, c, &["SET", "snap", "shot"]);
        cmd(&mut server, c, &["RPUSH", "l", "x", "y"]);
        assert_eq!(cmd(&mut server, c, &["SAVE"]), Reply::ok());
        assert!(server.config().snapshot_path().exists());
    }
    {
        // No log configured: startup falls back to the snapshot.
        let mut server = Server::open(Config::for_testing(dir.path())).unwrap();
        let c = server.connect_client();
        assert_eq!(cmd(&mut server, c, &["GET", "snap"]), bulk("shot"));
        assert_eq!(
            cmd(&mut server, c, &["LRANGE", "l", "0", "-1"]),
            Reply::Array(vec![bulk("x"), bulk("y")])
        );
    }
}

#[test]
fn test_bgsave_and_lastsave() {
    let dir = TempDir::new().unwrap();
    let mut server = Server::open(Config::for_testing(dir.path())).unwrap();
    let c = server.connect_client();
    cmd(&mut server, c, &["SET", "k", "v"]);
    let stamp_before = match cmd(&mut server, c, &["LASTSAVE"]) {
        Reply::Int(n) => n,
        other => panic!("unexpected {other:?}"),
    };
    assert_eq!(
        cmd(&mut server, c, &["BGSAVE"]),
        Reply::Status("Background saving started".into())
    );
    // Only one child at a time.
    assert!(cmd(&mut server, c, &["BGSAVE"]).is_error());
    wait_for_children(&mut server);
    assert!(server.config().snapshot_path().exists());
    match cmd(&mut server, c, &["LASTSAVE"]) {
        Reply::Int(n) => assert!(n >= stamp_before),
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn test_rewrite_behind_snapshot_is_scheduled() {
    let dir = TempDir::new().unwrap();
    let mut server = Server::open(aof_config(&dir)).unwrap();
    let c = server.connect_client();
    for i in 0..500 {
        let key = format!("k{i}");
        cmd(&mut server, c, &["SET", &key, "v"]);
    }
    cmd(&mut server, c, &["BGSAVE"]);
    assert_eq!(
        cmd(&mut server, c, &["BGREWRITEAOF"]),
        Reply::Status("Background append only file rewriting scheduled".into())
    );
    wait_for_children(&mut server);
    // The scheduled rewrite ran after the snapshot finished.
    wait_for_children(&mut server);
    assert!(!server.child_running());
    server.shutdown();
}

#[test]
fn test_zero_byte_log_starts_fresh() {
    let dir = TempDir::new().unwrap();
    let cfg = aof_config(&dir);
    std::fs::write(cfg.aof_path(), b"").unwrap();
    let mut server = Server::open(cfg).unwrap();
    assert_eq!(server.dbsize(0), 0);
    let c = server.connect_client();
    assert_eq!(cmd(&mut server, c, &["PING"]), Reply::Simple("PONG"));
}

#[test]
fn test_truncated_log_aborts_startup() {
    let dir = TempDir::new().unwrap();
    {
        let mut server = Server::open(aof_config(&dir)).unwrap();
        let c = server.connect_client();
        cmd(&mut server, c, &["SET", "k", "v"]);
        server.before_sleep();
        server.shutdown();
    }
    // Chop the tail mid-command.
    let path = dir.path().join("appendonly.aof");
    let mut bytes = std::fs::read(&path).unwrap();
    bytes.truncate(bytes.len() - 4);
    std::fs::write(&path, &bytes).unwrap();

    let result = Server::open(aof_config(&dir));
    assert!(result.is_err(), "partial trailing command must be fatal");
}

#[test]
fn test_everysec_policy_smoke() {
    let dir = TempDir::new().unwrap();
    let cfg = Config::for_testing(dir.path())
        .with_appendonly(true)
        .with_appendfsync(FsyncPolicy::EverySec);
    let mut server = Server::open(cfg).unwrap();
    let c = server.connect_client();
    cmd(&mut server, c, &["SET", "k", "v"]);
    server.before_sleep();
    server.shutdown();

    let log = std::fs::read(dir.path().join("appendonly.aof")).unwrap();
    assert!(!log.is_empty());
}

#[test]
fn test_enabling_log_at_runtime_seeds_it() {
    let dir = TempDir::new().unwrap();
    let mut server = Server::open(Config::for_testing(dir.path())).unwrap();
    let c = server.connect_client();
    cmd(&mut server, c, &["SET", "pre-existing", "v"]);
    assert_eq!(
        cmd(&mut server, c, &["CONFIG", "SET", "appendonly", "yes"]),
        Reply::ok()
    );
    wait_for_children(&mut server);
    server.before_sleep();
    server.shutdown();

    let mut reopened = Server::open(
        Config::for_testing(dir.path()).with_appendonly(true),
    )
    .unwrap();
    let c = reopened.connect_client();
    assert_eq!(cmd(&mut reopened, c, &["GET", "pre-existing"]), bulk("v"));
}

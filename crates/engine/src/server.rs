//! The server: databases, clients, persistence state, and the periodic
//! maintenance tick.
//!
//! Everything executes under `&mut Server`, which is the whole concurrency
//! story for command evaluation: the event loop that owns this value is the
//! serialization point. Background work is limited to snapshot/rewrite
//! serialization threads (over cloned handle tables) and the deferred-I/O
//! worker pool; each synchronizes with the loop through a single
//! reap-or-submit point.

use crate::client::Client;
use crate::config::Config;
use crate::db::Db;
use crate::dispatch;
use crate::expire;
use crate::object::{Object, SharedObject, StrVal, Value};
use crate::persist::{self, DbView};
use crate::shared;
use crate::slowlog::SlowLog;
use ember_core::util::{now_ms, parse_i64};
use ember_core::{Bytes, Reply};
use ember_durability::{AofWriter, BackgroundPool, Job, RewriteBuffer, RewriteJob};
use std::collections::{HashMap, HashSet};
use std::fs::{File, OpenOptions};
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Per-command counters.
#[derive(Debug, Default, Clone, Copy)]
pub struct CommandStat {
    /// Invocations.
    pub calls: u64,
    /// Total execution time in microseconds.
    pub usec: u64,
}

/// Server-wide counters.
#[derive(Debug, Default)]
pub struct Stats {
    /// Clients ever connected.
    pub total_connections: u64,
    /// Commands processed.
    pub total_commands: u64,
    /// Keys removed by expiration.
    pub expired_keys: u64,
    /// Keys removed by eviction.
    pub evicted_keys: u64,
    /// Successful key lookups.
    pub keyspace_hits: u64,
    /// Failed key lookups.
    pub keyspace_misses: u64,
    /// Instantaneous throughput, sampled each tick.
    pub ops_per_sec: u64,
    pub(crate) last_sample_ms: u64,
    pub(crate) last_sample_count: u64,
    /// Per-command call counters.
    pub per_command: HashMap<&'static str, CommandStat>,
}

/// What kind of background child is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ChildKind {
    Snapshot,
    Rewrite,
}

pub(crate) struct ChildJob {
    pub(crate) kind: ChildKind,
    pub(crate) job: RewriteJob,
}

/// Whether a rewrite request started now or was parked behind another child.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RewriteStart {
    /// The background job is running.
    Started,
    /// Another child is running; the rewrite fires once it finishes.
    Scheduled,
}

/// The store.
pub struct Server {
    pub(crate) cfg: Config,
    pub(crate) dbs: Vec<Db>,
    pub(crate) clients: HashMap<u64, Client>,
    next_client_id: u64,
    pub(crate) outbox: Vec<(u64, Reply)>,

    /// Mutations since the last snapshot.
    pub(crate) dirty: u64,
    dirty_at_save_start: u64,
    pub(crate) lru_clock: u32,
    pub(crate) now_ms: u64,
    pub(crate) start_ms: u64,
    pub(crate) mem_used: usize,

    pub(crate) aof: Option<AofWriter>,
    pub(crate) aof_rewrite_buf: RewriteBuffer,
    pub(crate) aof_last_db: i64,
    pub(crate) aof_rewrite_base_size: u64,
    pub(crate) aof_rewrite_scheduled: bool,
    /// The log writer hit a write error; treated as fatal.
    pub(crate) aof_write_broken: bool,

    pub(crate) pool: BackgroundPool,
    pub(crate) child: Option<ChildJob>,
    pub(crate) last_save_ms: u64,
    pub(crate) last_bgsave_ok: bool,
    pub(crate) last_bgrewrite_ok: bool,

    pub(crate) loading: bool,
    shutdown_flag: Arc<AtomicBool>,
    /// SHUTDOWN NOSAVE/SAVE override; None follows the configuration.
    pub(crate) shutdown_save: Option<bool>,

    pub(crate) stats: Stats,
    pub(crate) slowlog: SlowLog,
    pub(crate) cas_dirty: HashSet<u64>,
    /// Replacement commands to log instead of the verbatim request.
    pub(crate) prop_override: Option<Vec<Vec<Bytes>>>,
    pub(crate) active_expire_enabled: bool,
    tick_count: u64,
}

impl Server {
    /// Build a server, replaying the append-only log (preferred) or the
    /// snapshot file if either exists.
    pub fn open(cfg: Config) -> ember_core::Result<Server> {
        std::fs::create_dir_all(&cfg.dir)?;
        let now = now_ms();
        let dbs = (0..cfg.databases).map(Db::new).collect();
        let aof = if cfg.appendonly {
            Some(AofWriter::open(cfg.aof_path(), cfg.appendfsync, now)?)
        } else {
            None
        };

        let mut server = Server {
            dbs,
            clients: HashMap::new(),
            next_client_id: 1,
            outbox: Vec::new(),
            dirty: 0,
            dirty_at_save_start: 0,
            lru_clock: crate::evict::lru_clock(now),
            now_ms: now,
            start_ms: now,
            mem_used: 0,
            aof,
            aof_rewrite_buf: RewriteBuffer::new(),
            aof_last_db: -1,
            aof_rewrite_base_size: 0,
            aof_rewrite_scheduled: false,
            aof_write_broken: false,
            pool: BackgroundPool::new(ember_durability::background::DEFAULT_WORKERS, 4096),
            child: None,
            last_save_ms: now,
            last_bgsave_ok: true,
            last_bgrewrite_ok: true,
            loading: false,
            shutdown_flag: Arc::new(AtomicBool::new(false)),
            shutdown_save: None,
            stats: Stats::default(),
            slowlog: SlowLog::new(),
            cas_dirty: HashSet::new(),
            prop_override: None,
            active_expire_enabled: true,
            tick_count: 0,
            cfg,
        };

        server.load_data()?;
        if let Some(aof) = &server.aof {
            server.aof_rewrite_base_size = aof.current_size();
        }
        server.recompute_memory();
        Ok(server)
    }

    // ---- embedding seam ----

    /// Register a client; returns its id.
    pub fn connect_client(&mut self) -> u64 {
        let id = self.next_client_id;
        self.next_client_id += 1;
        self.stats.total_connections += 1;
        self.clients.insert(id, Client::new(id, self.now_ms));
        id
    }

    /// Drop a client, cleaning its watches and wait-list entries.
    pub fn disconnect_client(&mut self, id: u64) {
        if let Some(client) = self.clients.remove(&id) {
            self.cleanup_client_state(&client);
        }
        self.cas_dirty.remove(&id);
    }

    fn cleanup_client_state(&mut self, client: &Client) {
        for (db, key) in &client.watched {
            self.dbs[*db].remove_watcher(key, client.id);
        }
        if let Some(blocked) = &client.blocked {
            self.dbs[client.db].remove_blocked(&blocked.keys, client.id);
        }
    }

    /// Execute one command for `client_id`. Unknown ids get a fresh client.
    pub fn execute(&mut self, client_id: u64, argv: Vec<Bytes>) -> Reply {
        self.refresh_clock();
        let mut client = match self.clients.remove(&client_id) {
            Some(client) => client,
            None => {
                self.stats.total_connections += 1;
                self.next_client_id = self.next_client_id.max(client_id + 1);
                Client::new(client_id, self.now_ms)
            }
        };
        client.last_interaction_ms = self.now_ms;
        let reply = dispatch::dispatch(self, &mut client, &argv);
        self.clients.insert(client_id, client);
        reply
    }

    /// Work done before the event loop blocks: deliver any ready blocked
    /// pops and flush the log buffer.
    pub fn before_sleep(&mut self) {
        self.process_ready_keys();
        self.flush_aof(false);
    }

    /// Replies produced outside a dispatch (blocked pops, timeouts).
    pub fn drain_outbox(&mut self) -> Vec<(u64, Reply)> {
        std::mem::take(&mut self.outbox)
    }

    /// Handle for signal handlers: store `true` and the next tick reports a
    /// pending shutdown. Nothing else is safe from a signal context.
    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown_flag)
    }

    /// Request an orderly shutdown; the next tick reports it. `save`
    /// overrides the configured save behavior (SHUTDOWN SAVE/NOSAVE).
    pub(crate) fn trigger_shutdown(&mut self, save: Option<bool>) {
        self.shutdown_save = save;
        self.shutdown_flag.store(true, Ordering::Relaxed);
    }

    /// Orderly shutdown: save if configured, flush and fsync the log, stop
    /// the worker pool.
    pub fn shutdown(&mut self) {
        let save = self
            .shutdown_save
            .unwrap_or(!self.cfg.save_points.is_empty());
        if let Some(child) = self.child.take() {
            child.job.abort();
        }
        if save {
            if let Err(e) = self.save_snapshot_blocking() {
                warn!("snapshot during shutdown failed: {e}");
            }
        }
        if let Some(aof) = &mut self.aof {
            if let Err(e) = aof.flush_and_sync(&self.pool, self.now_ms) {
                error!("final log flush failed: {e}");
            }
        }
        self.pool.drain();
        self.pool.shutdown();
        info!("shutdown complete");
    }

    // ---- clocks ----

    pub(crate) fn refresh_clock(&mut self) {
        self.now_ms = now_ms();
        self.lru_clock = crate::evict::lru_clock(self.now_ms);
    }

    /// Cached wall clock in ms, refreshed per dispatch and per tick.
    pub fn clock_ms(&self) -> u64 {
        self.now_ms
    }

    // ---- keyspace access ----

    pub(crate) fn db_ref(&self, idx: usize) -> &Db {
        &self.dbs[idx]
    }

    pub(crate) fn db_mut(&mut self, idx: usize) -> &mut Db {
        &mut self.dbs[idx]
    }

    /// Number of databases.
    pub fn database_count(&self) -> usize {
        self.dbs.len()
    }

    /// Keys in a database (public for embedders and tests).
    pub fn dbsize(&self, db: usize) -> usize {
        self.dbs[db].len()
    }

    /// Build a string object, using the shared small-integer pool when the
    /// memory cap is off (shared objects have no per-key access stamp, so
    /// they are skipped under eviction).
    pub(crate) fn make_string(&self, bytes: &[u8]) -> SharedObject {
        if self.cfg.maxmemory == 0 {
            if let Some(n) = parse_i64(bytes) {
                if let Some(obj) = shared::integer(n) {
                    return obj;
                }
            }
        }
        Arc::new(Object::string_from(bytes, self.lru_clock))
    }

    /// Lazy expiration: drop the key if its deadline passed. Returns true
    /// when the key was removed. Replay skips this so deadlines loaded from
    /// the log survive until their own `PEXPIREAT` is applied.
    pub(crate) fn expire_if_needed(&mut self, db: usize, key: &[u8]) -> bool {
        let Some(deadline) = self.dbs[db].expire_of(key) else {
            return false;
        };
        if self.loading || self.now_ms <= deadline {
            return false;
        }
        self.stats.expired_keys += 1;
        self.propagate(db, &[b"DEL".to_vec(), key.to_vec()]);
        self.delete_key(db, key);
        true
    }

    /// Read-path lookup: lazy expiration, hit/miss stats, access stamp.
    pub(crate) fn lookup_read(&mut self, db: usize, key: &[u8]) -> Option<SharedObject> {
        self.expire_if_needed(db, key);
        match self.dbs[db].keys.get(key) {
            Some(obj) => {
                obj.touch(self.lru_clock);
                self.stats.keyspace_hits += 1;
                Some(Arc::clone(obj))
            }
            None => {
                self.stats.keyspace_misses += 1;
                None
            }
        }
    }

    /// Write-path lookup: lazy expiration and access stamp, no hit/miss
    /// accounting.
    pub(crate) fn lookup_write(&mut self, db: usize, key: &[u8]) -> Option<SharedObject> {
        self.expire_if_needed(db, key);
        self.dbs[db].keys.get(key).map(|obj| {
            obj.touch(self.lru_clock);
            Arc::clone(obj)
        })
    }

    /// Overwrite-or-create a key, clearing any previous deadline (plain SET
    /// semantics).
    pub(crate) fn set_key(&mut self, db: usize, key: &[u8], obj: SharedObject) {
        let added = Self::entry_mem(key, &obj);
        if let Some(old) = self.dbs[db].keys.insert(key.to_vec(), obj) {
            self.mem_used = self.mem_used.saturating_sub(Self::entry_mem(key, &old));
        }
        self.mem_used += added;
        self.dbs[db].remove_expire(key);
        self.signal_modified(db, key);
    }

    /// Insert a key that is known to be absent (aggregate creation path);
    /// existing deadlines are untouched by later in-place mutation.
    pub(crate) fn add_key(&mut self, db: usize, key: &[u8], obj: SharedObject) {
        debug_assert!(!self.dbs[db].keys.contains_key(key));
        self.mem_used += Self::entry_mem(key, &obj);
        self.dbs[db].keys.insert(key.to_vec(), obj);
        self.signal_modified(db, key);
    }

    /// Remove a key from the keyspace (and expires). Signals watchers.
    pub(crate) fn delete_key(&mut self, db: usize, key: &[u8]) -> bool {
        match self.dbs[db].remove_key(key) {
            Some(old) => {
                self.mem_used = self.mem_used.saturating_sub(Self::entry_mem(key, &old));
                self.signal_modified(db, key);
                true
            }
            None => false,
        }
    }

    /// Flag every watcher of (db, key) dirty for their next EXEC.
    pub(crate) fn signal_modified(&mut self, db: usize, key: &[u8]) {
        if let Some(watchers) = self.dbs[db].watched.get(key) {
            for id in watchers {
                self.cas_dirty.insert(*id);
            }
        }
    }

    /// Flag every watcher in the database (FLUSHDB/FLUSHALL path).
    pub(crate) fn signal_flushed(&mut self, db: usize) {
        let ids: Vec<u64> = self.dbs[db]
            .watched
            .values()
            .flat_map(|watchers| watchers.iter().copied())
            .collect();
        self.cas_dirty.extend(ids);
    }

    fn entry_mem(key: &[u8], obj: &Object) -> usize {
        key.len() + 64 + obj.mem_usage()
    }

    /// Full recount of the memory estimate; runs each tick and at startup.
    /// Between ticks the count is adjusted on key add/remove, so in-place
    /// growth drifts for at most one tick.
    pub(crate) fn recompute_memory(&mut self) {
        let mut total = 0;
        for db in &self.dbs {
            for (key, obj) in db.keys.iter() {
                total += Self::entry_mem(key, obj);
            }
            total += db.expires.len() * 48;
        }
        self.mem_used = total;
    }

    /// Current memory estimate.
    pub fn used_memory(&self) -> usize {
        self.mem_used
    }

    // ---- propagation & the append-only log ----

    /// Record a mutation into the log path (and the rewrite diff while a
    /// rewrite child runs). No-op during replay.
    pub(crate) fn propagate(&mut self, db: usize, argv: &[Bytes]) {
        if self.loading {
            return;
        }
        let rewrite_active = matches!(
            &self.child,
            Some(ChildJob {
                kind: ChildKind::Rewrite,
                ..
            })
        );
        if self.aof.is_none() && !rewrite_active {
            return;
        }

        let mut bytes = Vec::new();
        if self.aof_last_db != db as i64 {
            ember_core::resp::encode_request(
                &[b"SELECT".to_vec(), db.to_string().into_bytes()],
                &mut bytes,
            );
            self.aof_last_db = db as i64;
        }
        ember_core::resp::encode_request(argv, &mut bytes);

        if let Some(aof) = &mut self.aof {
            aof.feed(&bytes);
        }
        if rewrite_active {
            self.aof_rewrite_buf.append(&bytes);
        }
    }

    pub(crate) fn flush_aof(&mut self, force: bool) {
        let suppress_fsync = self.cfg.no_appendfsync_on_rewrite && self.child.is_some();
        if let Some(aof) = &mut self.aof {
            let result = if suppress_fsync && !force {
                // Write without scheduling fsync work while a child holds a
                // snapshot of the keyspace.
                let policy = aof.policy();
                aof.set_policy(ember_durability::FsyncPolicy::Never);
                let r = aof.flush(false, &self.pool, self.now_ms);
                aof.set_policy(policy);
                r
            } else {
                aof.flush(force, &self.pool, self.now_ms)
            };
            if let Err(e) = result {
                error!("append-only log write failed, persistence is broken: {e}");
                self.aof_write_broken = true;
            }
        }
    }

    // ---- snapshot & rewrite ----

    fn capture_view(&self) -> Vec<DbView> {
        self.dbs
            .iter()
            .map(|db| DbView {
                index: db.index,
                keys: db.keys.clone(),
                expires: db.expires.clone(),
            })
            .collect()
    }

    fn set_dict_resize(&mut self, allowed: bool) {
        for db in &mut self.dbs {
            db.keys.set_resize_allowed(allowed);
            db.expires.set_resize_allowed(allowed);
        }
    }

    /// Kick off a background snapshot.
    pub(crate) fn start_snapshot(&mut self) -> Result<(), String> {
        if self.child.is_some() {
            return Err("background save or rewrite already in progress".into());
        }
        let view = self.capture_view();
        let captured = self.now_ms;
        let tmp = self
            .cfg
            .dir
            .join(format!("tmp-snapshot-{}.ember", std::process::id()));
        let job = RewriteJob::spawn(tmp, move |out| {
            persist::serialize_keyspace(&view, captured, out)
        })
        .map_err(|e| e.to_string())?;
        self.child = Some(ChildJob {
            kind: ChildKind::Snapshot,
            job,
        });
        self.dirty_at_save_start = self.dirty;
        self.set_dict_resize(false);
        info!("background snapshot started");
        Ok(())
    }

    /// Kick off a background log rewrite, or park it behind a running
    /// child.
    pub(crate) fn start_rewrite(&mut self) -> Result<RewriteStart, String> {
        if let Some(child) = &self.child {
            if child.kind == ChildKind::Rewrite {
                return Err("background rewrite already in progress".into());
            }
            self.aof_rewrite_scheduled = true;
            return Ok(RewriteStart::Scheduled);
        }
        let view = self.capture_view();
        let captured = self.now_ms;
        let tmp = self
            .cfg
            .dir
            .join(format!("tmp-rewrite-{}.aof", std::process::id()));
        let job = RewriteJob::spawn(tmp, move |out| {
            persist::serialize_keyspace(&view, captured, out)
        })
        .map_err(|e| e.to_string())?;
        self.child = Some(ChildJob {
            kind: ChildKind::Rewrite,
            job,
        });
        self.aof_rewrite_buf.clear();
        // Force a SELECT in front of the diff that accumulates from here.
        self.aof_last_db = -1;
        self.set_dict_resize(false);
        info!("background log rewrite started");
        Ok(RewriteStart::Started)
    }

    /// Blocking snapshot (SAVE, and shutdown-with-save).
    pub(crate) fn save_snapshot_blocking(&mut self) -> io::Result<()> {
        let view = self.capture_view();
        let captured = self.now_ms;
        let tmp = self
            .cfg
            .dir
            .join(format!("tmp-save-{}.ember", std::process::id()));
        {
            let mut out = io::BufWriter::new(File::create(&tmp)?);
            persist::serialize_keyspace(&view, captured, &mut out)?;
            let file = out.into_inner().map_err(|e| e.into_error())?;
            file.sync_all()?;
        }
        std::fs::rename(&tmp, self.cfg.snapshot_path())?;
        self.dirty = 0;
        self.last_save_ms = self.now_ms;
        self.last_bgsave_ok = true;
        info!("snapshot saved");
        Ok(())
    }

    /// Poll the background child and run the matching done-handler.
    fn reap_child(&mut self) {
        let finished = match &self.child {
            Some(child) => child.job.is_finished(),
            None => return,
        };
        if !finished {
            return;
        }
        let child = self.child.take().expect("checked above");
        match child.kind {
            ChildKind::Snapshot => {
                let tmp = child.job.tmp_path().to_path_buf();
                match child.job.join().and_then(|size| {
                    std::fs::rename(&tmp, self.cfg.snapshot_path())?;
                    Ok(size)
                }) {
                    Ok(_) => {
                        self.last_bgsave_ok = true;
                        self.last_save_ms = self.now_ms;
                        self.dirty = self.dirty.saturating_sub(self.dirty_at_save_start);
                        info!("background snapshot finished");
                    }
                    Err(e) => {
                        let _ = std::fs::remove_file(&tmp);
                        self.last_bgsave_ok = false;
                        warn!("background snapshot failed: {e}");
                    }
                }
            }
            ChildKind::Rewrite => {
                let tmp = child.job.tmp_path().to_path_buf();
                match child.job.join() {
                    Ok(_) => match self.finish_rewrite(&tmp) {
                        Ok(()) => {
                            self.last_bgrewrite_ok = true;
                            info!("background log rewrite finished");
                        }
                        Err(e) => {
                            let _ = std::fs::remove_file(&tmp);
                            self.aof_rewrite_buf.clear();
                            self.last_bgrewrite_ok = false;
                            warn!("log rewrite handoff failed: {e}");
                        }
                    },
                    Err(e) => {
                        let _ = std::fs::remove_file(&tmp);
                        self.aof_rewrite_buf.clear();
                        self.last_bgrewrite_ok = false;
                        warn!("background log rewrite failed: {e}");
                    }
                }
            }
        }
        self.set_dict_resize(true);
    }

    /// Rewrite handoff: append the diff, atomically rename, swap the live
    /// descriptor, push the old one to the pool for a deferred close.
    fn finish_rewrite(&mut self, tmp: &Path) -> io::Result<()> {
        let mut file = OpenOptions::new().append(true).read(true).open(tmp)?;
        self.aof_rewrite_buf.write_to(&mut file)?;
        file.sync_data()?;
        let size = file.metadata()?.len();

        // Hold a reference to the old inode so the rename never triggers a
        // synchronous unlink-and-free on the loop; the pool closes it.
        let old_ref = if self.aof.is_none() {
            File::open(self.cfg.aof_path()).ok()
        } else {
            None
        };

        std::fs::rename(tmp, self.cfg.aof_path())?;

        if let Some(aof) = &mut self.aof {
            let fsync_dup = file.try_clone().ok();
            let old = aof.swap_file(file, size, self.now_ms);
            let _ = self.pool.submit(Job::Close(old));
            match aof.policy() {
                ember_durability::FsyncPolicy::Always => aof.flush_and_sync(&self.pool, self.now_ms)?,
                ember_durability::FsyncPolicy::EverySec => {
                    if let Some(dup) = fsync_dup {
                        let _ = self.pool.submit(Job::Fsync(dup));
                    }
                }
                ember_durability::FsyncPolicy::Never => {}
            }
        } else {
            let _ = self.pool.submit(Job::Close(file));
            if let Some(old) = old_ref {
                let _ = self.pool.submit(Job::Close(old));
            }
        }

        self.aof_rewrite_buf.clear();
        self.aof_rewrite_base_size = size;
        self.aof_last_db = -1;
        Ok(())
    }

    /// True while a snapshot or rewrite child is running.
    pub fn child_running(&self) -> bool {
        self.child.is_some()
    }

    // ---- startup replay ----

    fn load_data(&mut self) -> ember_core::Result<()> {
        let aof_path = self.cfg.aof_path();
        let path = if self.cfg.appendonly && aof_path.exists() {
            aof_path
        } else if self.cfg.snapshot_path().exists() {
            self.cfg.snapshot_path()
        } else {
            return Ok(());
        };

        let Some(mut reader) = ember_durability::LogReader::open(&path)? else {
            return Ok(());
        };
        info!(file = %path.display(), bytes = reader.len(), "replaying command log");

        self.loading = true;
        let mut replay_client = Client::replay(self.now_ms);
        loop {
            match reader.next_command() {
                Ok(Some(argv)) => {
                    let reply = dispatch::dispatch(self, &mut replay_client, &argv);
                    if let Reply::Error(msg) = reply {
                        warn!(error = %msg, "error while replaying command log");
                    }
                    // A real loop would poll for events here so the process
                    // stays responsive with a LOADING error; the hook fires
                    // every 1000 commands.
                    if reader.commands_read() % 1000 == 0 {
                        self.refresh_clock();
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    self.loading = false;
                    error!("aborting startup: {e}");
                    return Err(e);
                }
            }
        }
        self.loading = false;
        self.dirty = 0;
        self.aof_last_db = -1;
        info!(commands = reader.commands_read(), "replay complete");
        Ok(())
    }

    // ---- the periodic tick ----

    /// One iteration of the maintenance loop; call at ~10 Hz. Returns true
    /// once shutdown has been requested (SHUTDOWN command, signal flag, or
    /// a broken log writer); the embedder then calls [`Server::shutdown`].
    pub fn tick(&mut self) -> bool {
        self.refresh_clock();
        self.tick_count += 1;

        if self.shutdown_flag.load(Ordering::Relaxed) || self.aof_write_broken {
            return true;
        }

        self.sample_ops();

        // Table maintenance is skipped while a child shares the tables.
        if self.child.is_none() {
            for db in &mut self.dbs {
                if db.keys.needs_shrink() {
                    db.keys.shrink_to_fit();
                }
                if db.expires.needs_shrink() {
                    db.expires.shrink_to_fit();
                }
            }
            if self.cfg.activerehashing {
                let budget = Duration::from_millis(1);
                for db in &mut self.dbs {
                    db.keys.rehash_for(budget);
                    db.expires.rehash_for(budget);
                }
            }
        }

        self.check_client_timeouts();

        if self.aof_rewrite_scheduled && self.child.is_none() {
            self.aof_rewrite_scheduled = false;
            if let Err(e) = self.start_rewrite() {
                warn!("scheduled rewrite failed to start: {e}");
            }
        }

        self.reap_child();

        if self.child.is_none() {
            self.maybe_start_scheduled_jobs();
        }

        self.flush_aof(false);

        if self.active_expire_enabled && !self.loading {
            expire::active_expire_cycle(self);
        }

        self.process_ready_keys();
        self.recompute_memory();

        self.shutdown_flag.load(Ordering::Relaxed)
    }

    fn sample_ops(&mut self) {
        let elapsed = self.now_ms.saturating_sub(self.stats.last_sample_ms);
        if elapsed >= 1000 {
            let delta = self.stats.total_commands - self.stats.last_sample_count;
            self.stats.ops_per_sec = delta * 1000 / elapsed;
            self.stats.last_sample_ms = self.now_ms;
            self.stats.last_sample_count = self.stats.total_commands;
        }
    }

    fn maybe_start_scheduled_jobs(&mut self) {
        let elapsed_s = self.now_ms.saturating_sub(self.last_save_ms) / 1000;
        let save_due = self
            .cfg
            .save_points
            .iter()
            .any(|sp| self.dirty >= sp.changes && elapsed_s >= sp.seconds);
        if save_due {
            if let Err(e) = self.start_snapshot() {
                warn!("scheduled snapshot failed to start: {e}");
            }
            return;
        }

        if self.aof.is_some() && self.cfg.auto_aof_rewrite_percentage > 0 {
            let size = self.aof.as_ref().map(|a| a.current_size()).unwrap_or(0);
            let base = self.aof_rewrite_base_size.max(1);
            let growth = size * 100 / base;
            if size >= self.cfg.auto_aof_rewrite_min_size
                && growth >= 100 + self.cfg.auto_aof_rewrite_percentage
            {
                info!(size, base, "log growth trigger hit, starting rewrite");
                if let Err(e) = self.start_rewrite() {
                    warn!("automatic rewrite failed to start: {e}");
                }
            }
        }
    }

    fn check_client_timeouts(&mut self) {
        // Blocked deadlines.
        let mut expired: Vec<(u64, Reply)> = Vec::new();
        for client in self.clients.values() {
            if let Some(blocked) = &client.blocked {
                if blocked.deadline_ms != 0 && self.now_ms >= blocked.deadline_ms {
                    let reply = if blocked.target.is_some() {
                        Reply::Nil
                    } else {
                        Reply::NilArray
                    };
                    expired.push((client.id, reply));
                }
            }
        }
        for (id, reply) in expired {
            self.unblock_client(id, reply);
        }

        // Idle clients.
        if self.cfg.client_timeout_s > 0 {
            let cutoff = self.cfg.client_timeout_s * 1000;
            let idle: Vec<u64> = self
                .clients
                .values()
                .filter(|c| {
                    c.blocked.is_none()
                        && self.now_ms.saturating_sub(c.last_interaction_ms) > cutoff
                })
                .map(|c| c.id)
                .collect();
            for id in idle {
                info!(client = id, "closing idle client");
                self.disconnect_client(id);
            }
        }
    }

    // ---- blocking list ops ----

    /// Park `client` on `keys` until one becomes readable or the deadline
    /// passes.
    pub(crate) fn block_client(&mut self, client: &mut Client, blocked: crate::client::Blocked) {
        for key in &blocked.keys {
            self.dbs[client.db].add_blocked(key, client.id);
        }
        client.blocked = Some(blocked);
    }

    /// Wake a blocked client with `reply`, clearing its wait-list entries.
    pub(crate) fn unblock_client(&mut self, id: u64, reply: Reply) {
        if let Some(client) = self.clients.get_mut(&id) {
            if let Some(blocked) = client.blocked.take() {
                let db = client.db;
                self.dbs[db].remove_blocked(&blocked.keys, id);
            }
            self.outbox.push((id, reply));
        }
    }

    /// Deliver ready keys to waiters, FIFO, one pop per waiter.
    pub(crate) fn process_ready_keys(&mut self) {
        for db_idx in 0..self.dbs.len() {
            let ready = self.dbs[db_idx].take_ready();
            for key in ready {
                self.serve_blocked_on_key(db_idx, &key);
            }
        }
    }

    fn serve_blocked_on_key(&mut self, db_idx: usize, key: &[u8]) {
        loop {
            let Some(id) = self.dbs[db_idx]
                .blocked_on
                .get(key)
                .and_then(|q| q.front().copied())
            else {
                return;
            };
            let Some(client) = self.clients.get(&id) else {
                self.dbs[db_idx].remove_blocked(&[key.to_vec()], id);
                continue;
            };
            let blocked = client
                .blocked
                .clone()
                .expect("client on wait list without blocked state");

            // BRPOPLPUSH with a wrong-typed destination fails the waiter
            // without consuming an element.
            if let Some(target) = &blocked.target {
                let dst_ok = match self.dbs[db_idx].keys.get(target) {
                    Some(obj) => matches!(obj.value, Value::List(_)),
                    None => true,
                };
                if !dst_ok {
                    self.unblock_client(id, Reply::error(&ember_core::Error::WrongType));
                    continue;
                }
            }

            let Some(value) = crate::commands::list::pop_for_delivery(
                self,
                db_idx,
                key,
                blocked.pop_tail,
            ) else {
                return;
            };
            self.dirty += 1;

            match &blocked.target {
                None => {
                    let cmd: Bytes = if blocked.pop_tail {
                        b"RPOP".to_vec()
                    } else {
                        b"LPOP".to_vec()
                    };
                    self.propagate(db_idx, &[cmd, key.to_vec()]);
                    let reply = Reply::Array(vec![
                        Reply::Bulk(key.to_vec()),
                        Reply::Bulk(value.clone()),
                    ]);
                    self.unblock_client(id, reply);
                }
                Some(target) => {
                    let target = target.clone();
                    crate::commands::list::push_for_delivery(self, db_idx, &target, &value);
                    self.propagate(
                        db_idx,
                        &[b"RPOPLPUSH".to_vec(), key.to_vec(), target.clone()],
                    );
                    self.unblock_client(id, Reply::Bulk(value));
                }
            }
        }
    }

    // ---- small readers used by admin commands ----

    /// Uptime in seconds.
    pub fn uptime_s(&self) -> u64 {
        self.now_ms.saturating_sub(self.start_ms) / 1000
    }

    /// Access to the live configuration.
    pub fn config(&self) -> &Config {
        &self.cfg
    }

    /// Mutations since the last snapshot.
    pub fn dirty_count(&self) -> u64 {
        self.dirty
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.pool.shutdown();
    }
}

/// Integer value of a string object, if it holds one.
pub(crate) fn object_as_int(obj: &Object) -> Option<i64> {
    match &obj.value {
        Value::Str(StrVal::Int(n)) => Some(*n),
        Value::Str(StrVal::Raw(b)) => parse_i64(b),
        _ => None,
    }
}

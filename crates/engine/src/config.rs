//! Server configuration.
//!
//! One flat struct holding every runtime knob, with defaults matching the
//! classic values. Config-file parsing lives outside this crate; `CONFIG
//! GET`/`CONFIG SET` operate on the live struct through the name table at
//! the bottom.

use ember_core::util::parse_i64;
use ember_durability::FsyncPolicy;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Eviction policy under memory pressure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum MaxmemoryPolicy {
    /// Refuse writes instead of evicting.
    #[default]
    NoEviction,
    /// Approximate LRU over all keys.
    AllKeysLru,
    /// Approximate LRU over keys with an expire set.
    VolatileLru,
    /// Uniform random over all keys.
    AllKeysRandom,
    /// Uniform random over keys with an expire set.
    VolatileRandom,
    /// Smallest deadline first, among keys with an expire set.
    VolatileTtl,
}

impl MaxmemoryPolicy {
    /// Config spelling.
    pub fn name(&self) -> &'static str {
        match self {
            MaxmemoryPolicy::NoEviction => "noeviction",
            MaxmemoryPolicy::AllKeysLru => "allkeys-lru",
            MaxmemoryPolicy::VolatileLru => "volatile-lru",
            MaxmemoryPolicy::AllKeysRandom => "allkeys-random",
            MaxmemoryPolicy::VolatileRandom => "volatile-random",
            MaxmemoryPolicy::VolatileTtl => "volatile-ttl",
        }
    }

    /// Parse the config spelling.
    pub fn parse(name: &str) -> Option<MaxmemoryPolicy> {
        match name {
            "noeviction" => Some(MaxmemoryPolicy::NoEviction),
            "allkeys-lru" => Some(MaxmemoryPolicy::AllKeysLru),
            "volatile-lru" => Some(MaxmemoryPolicy::VolatileLru),
            "allkeys-random" => Some(MaxmemoryPolicy::AllKeysRandom),
            "volatile-random" => Some(MaxmemoryPolicy::VolatileRandom),
            "volatile-ttl" => Some(MaxmemoryPolicy::VolatileTtl),
            _ => None,
        }
    }
}

/// A snapshot save point: save after `changes` mutations within `seconds`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavePoint {
    /// Window in seconds.
    pub seconds: u64,
    /// Mutation threshold.
    pub changes: u64,
}

/// Runtime configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Number of databases.
    pub databases: usize,
    /// Working directory for the log and snapshot files.
    pub dir: PathBuf,
    /// Password required by AUTH; empty disables authentication.
    pub requirepass: String,
    /// Maximum client connections tracked (informational here; the
    /// acceptor enforces it).
    pub maxclients: usize,
    /// Idle client timeout in seconds; 0 disables.
    pub client_timeout_s: u64,

    /// Memory cap in bytes; 0 disables the cap.
    pub maxmemory: usize,
    /// Eviction policy once the cap is hit.
    pub maxmemory_policy: MaxmemoryPolicy,
    /// Candidates sampled per eviction round.
    pub maxmemory_samples: usize,

    /// Whether the append-only log is enabled.
    pub appendonly: bool,
    /// Log file name, relative to `dir`.
    pub appendfilename: String,
    /// Fsync discipline for the log.
    pub appendfsync: FsyncPolicy,
    /// Suppress background fsync scheduling while a save or rewrite child
    /// is running.
    pub no_appendfsync_on_rewrite: bool,
    /// Trigger an automatic rewrite when the log has grown by this percent
    /// over its post-rewrite size; 0 disables.
    pub auto_aof_rewrite_percentage: u64,
    /// Minimum log size before automatic rewrite triggers.
    pub auto_aof_rewrite_min_size: u64,

    /// Snapshot file name, relative to `dir`.
    pub snapshot_filename: String,
    /// Snapshot save points; empty disables scheduled snapshots.
    pub save_points: Vec<SavePoint>,
    /// Refuse writes after a failed background save.
    pub stop_writes_on_bgsave_error: bool,

    /// Compact-hash thresholds.
    pub hash_max_ziplist_entries: usize,
    /// Longest field or value allowed in a compact hash.
    pub hash_max_ziplist_value: usize,
    /// Compact-list thresholds.
    pub list_max_ziplist_entries: usize,
    /// Longest element allowed in a compact list.
    pub list_max_ziplist_value: usize,
    /// Largest all-integer set kept in the sorted-integer encoding.
    pub set_max_intset_entries: usize,
    /// Compact sorted-set thresholds.
    pub zset_max_ziplist_entries: usize,
    /// Longest member allowed in a compact sorted set.
    pub zset_max_ziplist_value: usize,

    /// Run incremental rehashing from the periodic tick.
    pub activerehashing: bool,
    /// Slow-log threshold in microseconds; negative disables.
    pub slowlog_log_slower_than: i64,
    /// Slow-log ring capacity.
    pub slowlog_max_len: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            databases: 16,
            dir: PathBuf::from("."),
            requirepass: String::new(),
            maxclients: 10_000,
            client_timeout_s: 0,
            maxmemory: 0,
            maxmemory_policy: MaxmemoryPolicy::NoEviction,
            maxmemory_samples: 3,
            appendonly: false,
            appendfilename: "appendonly.aof".into(),
            appendfsync: FsyncPolicy::EverySec,
            no_appendfsync_on_rewrite: false,
            auto_aof_rewrite_percentage: 100,
            auto_aof_rewrite_min_size: 64 * 1024 * 1024,
            snapshot_filename: "snapshot.ember".into(),
            save_points: vec![
                SavePoint { seconds: 3600, changes: 1 },
                SavePoint { seconds: 300, changes: 100 },
                SavePoint { seconds: 60, changes: 10_000 },
            ],
            stop_writes_on_bgsave_error: true,
            hash_max_ziplist_entries: 128,
            hash_max_ziplist_value: 64,
            list_max_ziplist_entries: 128,
            list_max_ziplist_value: 64,
            set_max_intset_entries: 512,
            zset_max_ziplist_entries: 128,
            zset_max_ziplist_value: 64,
            activerehashing: true,
            slowlog_log_slower_than: 10_000,
            slowlog_max_len: 128,
        }
    }
}

impl Config {
    /// Defaults with persistence rooted at `dir`, the usual test setup.
    pub fn for_testing(dir: impl Into<PathBuf>) -> Config {
        Config {
            dir: dir.into(),
            save_points: Vec::new(),
            ..Config::default()
        }
    }

    /// Builder-style: enable the append-only log.
    pub fn with_appendonly(mut self, on: bool) -> Config {
        self.appendonly = on;
        self
    }

    /// Builder-style: set the fsync policy.
    pub fn with_appendfsync(mut self, policy: FsyncPolicy) -> Config {
        self.appendfsync = policy;
        self
    }

    /// Path of the append-only log.
    pub fn aof_path(&self) -> PathBuf {
        self.dir.join(&self.appendfilename)
    }

    /// Path of the snapshot file.
    pub fn snapshot_path(&self) -> PathBuf {
        self.dir.join(&self.snapshot_filename)
    }

    /// CONFIG GET: every (name, value) pair whose name matches `pattern`.
    pub fn get_matching(&self, pattern: &[u8]) -> Vec<(String, String)> {
        let entries: Vec<(&str, String)> = vec![
            ("databases", self.databases.to_string()),
            ("dir", self.dir.display().to_string()),
            ("requirepass", self.requirepass.clone()),
            ("maxclients", self.maxclients.to_string()),
            ("timeout", self.client_timeout_s.to_string()),
            ("maxmemory", self.maxmemory.to_string()),
            ("maxmemory-policy", self.maxmemory_policy.name().into()),
            ("maxmemory-samples", self.maxmemory_samples.to_string()),
            ("appendonly", yes_no(self.appendonly).into()),
            ("appendfilename", self.appendfilename.clone()),
            ("appendfsync", self.appendfsync.name().into()),
            (
                "no-appendfsync-on-rewrite",
                yes_no(self.no_appendfsync_on_rewrite).into(),
            ),
            (
                "auto-aof-rewrite-percentage",
                self.auto_aof_rewrite_percentage.to_string(),
            ),
            (
                "auto-aof-rewrite-min-size",
                self.auto_aof_rewrite_min_size.to_string(),
            ),
            ("save", self.save_points_string()),
            (
                "stop-writes-on-bgsave-error",
                yes_no(self.stop_writes_on_bgsave_error).into(),
            ),
            (
                "hash-max-ziplist-entries",
                self.hash_max_ziplist_entries.to_string(),
            ),
            (
                "hash-max-ziplist-value",
                self.hash_max_ziplist_value.to_string(),
            ),
            (
                "list-max-ziplist-entries",
                self.list_max_ziplist_entries.to_string(),
            ),
            (
                "list-max-ziplist-value",
                self.list_max_ziplist_value.to_string(),
            ),
            (
                "set-max-intset-entries",
                self.set_max_intset_entries.to_string(),
            ),
            (
                "zset-max-ziplist-entries",
                self.zset_max_ziplist_entries.to_string(),
            ),
            (
                "zset-max-ziplist-value",
                self.zset_max_ziplist_value.to_string(),
            ),
            ("activerehashing", yes_no(self.activerehashing).into()),
            (
                "slowlog-log-slower-than",
                self.slowlog_log_slower_than.to_string(),
            ),
            ("slowlog-max-len", self.slowlog_max_len.to_string()),
        ];
        entries
            .into_iter()
            .filter(|(name, _)| ember_core::util::glob_match(pattern, name.as_bytes()))
            .map(|(name, value)| (name.to_string(), value))
            .collect()
    }

    /// CONFIG SET: apply one parameter. Returns an error message for
    /// unknown names or unparseable values.
    pub fn set_parameter(&mut self, name: &str, value: &[u8]) -> Result<(), String> {
        let text = String::from_utf8_lossy(value).to_string();
        let parse_usize = || -> Result<usize, String> {
            parse_i64(value)
                .filter(|n| *n >= 0)
                .map(|n| n as usize)
                .ok_or_else(|| format!("argument couldn't be parsed into an integer: '{text}'"))
        };
        let parse_u64 = || -> Result<u64, String> { parse_usize().map(|n| n as u64) };
        let parse_bool = || -> Result<bool, String> {
            match text.as_str() {
                "yes" => Ok(true),
                "no" => Ok(false),
                _ => Err(format!("argument must be 'yes' or 'no': '{text}'")),
            }
        };

        match name {
            "requirepass" => self.requirepass = text,
            "timeout" => self.client_timeout_s = parse_u64()?,
            "maxclients" => self.maxclients = parse_usize()?,
            "maxmemory" => self.maxmemory = parse_usize()?,
            "maxmemory-policy" => {
                self.maxmemory_policy = MaxmemoryPolicy::parse(&text)
                    .ok_or_else(|| format!("unknown maxmemory policy '{text}'"))?;
            }
            "maxmemory-samples" => self.maxmemory_samples = parse_usize()?.max(1),
            "appendonly" => self.appendonly = parse_bool()?,
            "appendfsync" => {
                self.appendfsync = FsyncPolicy::parse(&text)
                    .ok_or_else(|| format!("unknown fsync policy '{text}'"))?;
            }
            "no-appendfsync-on-rewrite" => self.no_appendfsync_on_rewrite = parse_bool()?,
            "auto-aof-rewrite-percentage" => self.auto_aof_rewrite_percentage = parse_u64()?,
            "auto-aof-rewrite-min-size" => self.auto_aof_rewrite_min_size = parse_u64()?,
            "save" => {
                self.save_points = Self::parse_save_points(&text)
                    .ok_or_else(|| format!("invalid save parameter: '{text}'"))?;
            }
            "stop-writes-on-bgsave-error" => self.stop_writes_on_bgsave_error = parse_bool()?,
            "hash-max-ziplist-entries" => self.hash_max_ziplist_entries = parse_usize()?,
            "hash-max-ziplist-value" => self.hash_max_ziplist_value = parse_usize()?,
            "list-max-ziplist-entries" => self.list_max_ziplist_entries = parse_usize()?,
            "list-max-ziplist-value" => self.list_max_ziplist_value = parse_usize()?,
            "set-max-intset-entries" => self.set_max_intset_entries = parse_usize()?,
            "zset-max-ziplist-entries" => self.zset_max_ziplist_entries = parse_usize()?,
            "zset-max-ziplist-value" => self.zset_max_ziplist_value = parse_usize()?,
            "activerehashing" => self.activerehashing = parse_bool()?,
            "slowlog-log-slower-than" => {
                self.slowlog_log_slower_than = parse_i64(value)
                    .ok_or_else(|| format!("argument couldn't be parsed into an integer: '{text}'"))?;
            }
            "slowlog-max-len" => self.slowlog_max_len = parse_usize()?,
            _ => return Err(format!("unknown parameter '{name}'")),
        }
        Ok(())
    }

    fn save_points_string(&self) -> String {
        self.save_points
            .iter()
            .map(|sp| format!("{} {}", sp.seconds, sp.changes))
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn parse_save_points(text: &str) -> Option<Vec<SavePoint>> {
        let fields: Vec<&str> = text.split_whitespace().collect();
        if fields.len() % 2 != 0 {
            return None;
        }
        fields
            .chunks(2)
            .map(|pair| {
                Some(SavePoint {
                    seconds: pair[0].parse().ok()?,
                    changes: pair[1].parse().ok()?,
                })
            })
            .collect()
    }
}

fn yes_no(flag: bool) -> &'static str {
    if flag {
        "yes"
    } else {
        "no"
    }
}

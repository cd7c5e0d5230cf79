//! Buffered append-only log writer.
//!
//! Commands are appended to an in-memory buffer as they execute; the buffer
//! is flushed once per tick. Flush behavior follows the fsync policy:
//!
//! - `always`: write, then fsync synchronously on the calling thread.
//! - `everysec`: write, then once per second hand an fsync job to the
//!   background pool. If a background fsync is still in flight, the write
//!   itself is postponed for up to two seconds; past that the write goes
//!   through anyway and the delay is logged.
//! - `no`: write only.
//!
//! A failed or short write truncates the file back to the last known good
//! size and surfaces the error; the caller treats it as fatal rather than
//! risk replaying a half-written command.

use crate::aof::policy::FsyncPolicy;
use crate::background::{BackgroundPool, Job};
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{error, warn};

/// How long a postponed everysec flush may wait on an in-flight fsync
/// before being forced through.
pub const POSTPONE_LIMIT_MS: u64 = 2000;

/// The buffered log writer.
pub struct AofWriter {
    path: PathBuf,
    file: File,
    buf: Vec<u8>,
    policy: FsyncPolicy,
    current_size: u64,
    last_fsync_ms: u64,
    /// When the current postponement began; 0 when none is pending.
    postponed_since_ms: u64,
    delayed_fsync_count: u64,
}

impl AofWriter {
    /// Open (or create) the log at `path` for appending.
    pub fn open(path: impl Into<PathBuf>, policy: FsyncPolicy, now_ms: u64) -> io::Result<Self> {
        let path = path.into();
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)?;
        let current_size = file.metadata()?.len();
        Ok(AofWriter {
            path,
            file,
            buf: Vec::new(),
            policy,
            current_size,
            last_fsync_ms: now_ms,
            postponed_since_ms: 0,
            delayed_fsync_count: 0,
        })
    }

    /// Replace the backing file after a rewrite handoff. The old descriptor
    /// is returned so the caller can hand it to the background pool for a
    /// deferred close.
    pub fn swap_file(&mut self, file: File, size: u64, now_ms: u64) -> File {
        let old = std::mem::replace(&mut self.file, file);
        self.current_size = size;
        self.buf.clear();
        self.postponed_since_ms = 0;
        self.last_fsync_ms = now_ms;
        old
    }

    /// Queue bytes for the next flush.
    pub fn feed(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Bytes queued but not yet written.
    pub fn buffered_len(&self) -> usize {
        self.buf.len()
    }

    /// Size of the on-disk log in bytes (excluding the unflushed buffer).
    pub fn current_size(&self) -> u64 {
        self.current_size
    }

    /// The log path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Active fsync policy.
    pub fn policy(&self) -> FsyncPolicy {
        self.policy
    }

    /// Change the fsync policy at runtime.
    pub fn set_policy(&mut self, policy: FsyncPolicy) {
        self.policy = policy;
    }

    /// How many everysec flushes went through after waiting out the
    /// postponement window.
    pub fn delayed_fsync_count(&self) -> u64 {
        self.delayed_fsync_count
    }

    /// Flush the buffer to disk, honoring the fsync policy. Called once per
    /// tick and again before the loop blocks; `force` overrides everysec
    /// postponement (used at shutdown).
    pub fn flush(&mut self, force: bool, pool: &BackgroundPool, now_ms: u64) -> io::Result<()> {
        if self.buf.is_empty() {
            return Ok(());
        }

        if self.policy == FsyncPolicy::EverySec && !force && pool.fsync_in_flight() {
            // A worker is still fsyncing; give it up to the postponement
            // window before piling a write behind it.
            if self.postponed_since_ms == 0 {
                self.postponed_since_ms = now_ms;
                return Ok(());
            }
            if now_ms - self.postponed_since_ms < POSTPONE_LIMIT_MS {
                return Ok(());
            }
            self.delayed_fsync_count += 1;
            warn!(
                "asynchronous log fsync is taking too long; writing without \
                 waiting (disk may be busy)"
            );
        }
        self.postponed_since_ms = 0;

        if let Err(e) = self.file.write_all(&self.buf) {
            // A partial append must not survive: truncate back to the last
            // known good size so replay never sees half a command.
            error!("short write to append-only log: {e}");
            if let Err(trunc_err) = self.file.set_len(self.current_size) {
                error!("could not truncate partially written log: {trunc_err}");
            }
            return Err(e);
        }
        self.current_size += self.buf.len() as u64;
        self.buf.clear();

        match self.policy {
            FsyncPolicy::Always => {
                self.file.sync_data()?;
                self.last_fsync_ms = now_ms;
            }
            FsyncPolicy::EverySec => {
                if now_ms.saturating_sub(self.last_fsync_ms) >= 1000 && !pool.fsync_in_flight() {
                    if let Ok(dup) = self.file.try_clone() {
                        let _ = pool.submit(Job::Fsync(dup));
                    }
                    self.last_fsync_ms = now_ms;
                }
            }
            FsyncPolicy::Never => {}
        }
        Ok(())
    }

    /// Synchronous flush and fsync, used at shutdown and after enabling the
    /// log at runtime.
    pub fn flush_and_sync(&mut self, pool: &BackgroundPool, now_ms: u64) -> io::Result<()> {
        self.flush(true, pool, now_ms)?;
        self.file.sync_data()?;
        self.last_fsync_ms = now_ms;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn pool() -> BackgroundPool {
        BackgroundPool::new(1, 64)
    }

    #[test]
    fn test_feed_and_flush_appends() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("appendonly.log");
        let pool = pool();

        let mut writer = AofWriter::open(&path, FsyncPolicy::Always, 0).unwrap();
        writer.feed(b"*1\r\n$4\r\nPING\r\n");
        assert_eq!(writer.buffered_len(), 14);
        writer.flush(false, &pool, 0).unwrap();
        assert_eq!(writer.buffered_len(), 0);
        assert_eq!(writer.current_size(), 14);
        assert_eq!(std::fs::read(&path).unwrap(), b"*1\r\n$4\r\nPING\r\n".to_vec());
        pool.shutdown();
    }

    #[test]
    fn test_reopen_appends_to_existing() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("appendonly.log");
        let pool = pool();

        {
            let mut writer = AofWriter::open(&path, FsyncPolicy::Always, 0).unwrap();
            writer.feed(b"first");
            writer.flush(false, &pool, 0).unwrap();
        }
        {
            let mut writer = AofWriter::open(&path, FsyncPolicy::Always, 0).unwrap();
            assert_eq!(writer.current_size(), 5);
            writer.feed(b"second");
            writer.flush(false, &pool, 0).unwrap();
        }
        assert_eq!(std::fs::read(&path).unwrap(), b"firstsecond".to_vec());
        pool.shutdown();
    }

    #[test]
    fn test_everysec_schedules_background_fsync() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("appendonly.log");
        let pool = pool();

        let mut writer = AofWriter::open(&path, FsyncPolicy::EverySec, 0).unwrap();
        writer.feed(b"abc");
        writer.flush(false, &pool, 1500).unwrap();
        pool.drain();
        assert!(pool.stats().jobs_completed >= 1);
        assert_eq!(writer.current_size(), 3);
        pool.shutdown();
    }

    #[test]
    fn test_everysec_skips_fsync_inside_window() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("appendonly.log");
        let pool = pool();

        let mut writer = AofWriter::open(&path, FsyncPolicy::EverySec, 1000).unwrap();
        writer.feed(b"abc");
        // Less than a second since the last fsync stamp: write, no job.
        writer.flush(false, &pool, 1500).unwrap();
        pool.drain();
        assert_eq!(pool.stats().jobs_completed, 0);
        pool.shutdown();
    }

    #[test]
    fn test_swap_file_resets_state() {
        let dir = tempdir().unwrap();
        let pool = pool();
        let path = dir.path().join("appendonly.log");

        let mut writer = AofWriter::open(&path, FsyncPolicy::Always, 0).unwrap();
        writer.feed(b"old-bytes");
        writer.flush(false, &pool, 0).unwrap();

        let new_path = dir.path().join("rewritten.log");
        std::fs::write(&new_path, b"fresh").unwrap();
        let new_file = OpenOptions::new().append(true).read(true).open(&new_path).unwrap();

        let old = writer.swap_file(new_file, 5, 0);
        pool.submit(Job::Close(old)).unwrap();
        assert_eq!(writer.current_size(), 5);

        writer.feed(b"-more");
        writer.flush(false, &pool, 0).unwrap();
        assert_eq!(std::fs::read(&new_path).unwrap(), b"fresh-more".to_vec());
        pool.drain();
        pool.shutdown();
    }

    #[test]
    fn test_flush_and_sync_forces_write() {
        let dir = tempdir().unwrap();
        let pool = pool();
        let path = dir.path().join("appendonly.log");

        let mut writer = AofWriter::open(&path, FsyncPolicy::Never, 0).unwrap();
        writer.feed(b"payload");
        writer.flush_and_sync(&pool, 0).unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"payload".to_vec());
        pool.shutdown();
    }
}

//! Background serialization job for log rewrite and snapshot save.
//!
//! The caller supplies a closure that already owns a consistent view of the
//! keyspace (cloned handle tables; live-side mutation copies on write, so
//! the view never changes underneath the job). The job streams that view as
//! a minimal command sequence into a temp file on a named thread, fsyncs,
//! and parks until the owner reaps it with a non-blocking poll from the
//! periodic tick.

use std::fs::OpenOptions;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::thread::JoinHandle;

/// A background serialize-to-temp-file job.
pub struct RewriteJob {
    tmp_path: PathBuf,
    handle: JoinHandle<io::Result<u64>>,
}

impl RewriteJob {
    /// Spawn the job. `serialize` writes the complete command stream; the
    /// job fsyncs the temp file and reports its final size.
    pub fn spawn<F>(tmp_path: impl Into<PathBuf>, serialize: F) -> io::Result<RewriteJob>
    where
        F: FnOnce(&mut dyn Write) -> io::Result<()> + Send + 'static,
    {
        let tmp_path = tmp_path.into();
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&tmp_path)?;

        let handle = std::thread::Builder::new()
            .name("ember-rewrite".into())
            .spawn(move || {
                let mut out = BufWriter::new(file);
                serialize(&mut out)?;
                out.flush()?;
                let file = out.into_inner().map_err(|e| e.into_error())?;
                file.sync_all()?;
                Ok(file.metadata()?.len())
            })?;

        Ok(RewriteJob { tmp_path, handle })
    }

    /// Non-blocking completion check; the tick polls this.
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Path of the temp file being written.
    pub fn tmp_path(&self) -> &Path {
        &self.tmp_path
    }

    /// Reap the job. Returns the temp file size on success. A serialization
    /// error or a panicked thread reports as an I/O error; the caller
    /// removes the temp file and keeps the current log untouched.
    pub fn join(self) -> io::Result<u64> {
        match self.handle.join() {
            Ok(result) => result,
            Err(_) => Err(io::Error::new(
                io::ErrorKind::Other,
                "background rewrite thread panicked",
            )),
        }
    }

    /// Abandon the job: wait it out, then delete its temp file.
    pub fn abort(self) {
        let tmp = self.tmp_path.clone();
        let _ = self.join();
        let _ = std::fs::remove_file(tmp);
    }
}

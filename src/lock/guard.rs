//! Workspace-level exclusive section
//!
//! Every operation that mutates the lock file (a sync pass, or a single
//! commit/checkout/stash/tag) holds an advisory lock on `<lock_file>.guard`
//! for its whole duration. Acquisition is polled with a bounded wait.

use crate::error::EngineError;
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};
use tracing::debug;

/// Held workspace lock; released on drop.
#[derive(Debug)]
pub struct WorkspaceLock {
    file: File,
    path: PathBuf,
}

impl WorkspaceLock {
    /// Path of the guard file that protects `lock_file`.
    pub fn guard_path(lock_file: &Path) -> PathBuf {
        let mut name = lock_file
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".guard");
        lock_file.with_file_name(name)
    }

    /// Acquire the exclusive section for `lock_file`, polling every `poll`
    /// until `timeout` has elapsed.
    pub fn acquire(lock_file: &Path, timeout: Duration, poll: Duration) -> Result<Self, EngineError> {
        let path = Self::guard_path(lock_file);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(&path)?;

        let started = Instant::now();
        loop {
            match file.try_lock_exclusive() {
                Ok(()) => {
                    debug!(path = %path.display(), "Acquired workspace lock");
                    return Ok(Self { file, path });
                }
                Err(err) if is_contended(&err) => {
                    let waited = started.elapsed();
                    if waited >= timeout {
                        return Err(EngineError::LockWriteConflict {
                            path,
                            waited_ms: waited.as_millis() as u64,
                        });
                    }
                    thread::sleep(poll.min(timeout - waited));
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for WorkspaceLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
        debug!(path = %self.path.display(), "Released workspace lock");
    }
}

fn is_contended(err: &std::io::Error) -> bool {
    err.kind() == ErrorKind::WouldBlock
        || err.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

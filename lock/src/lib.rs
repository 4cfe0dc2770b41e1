//! A scoped, reentrant, cross-process exclusive lock keyed by name (in
//! practice, a cluster FSID).
//!
//! Implemented via an OS advisory lock ([`rustix::fs::flock`]) on a file
//! under a fixed run directory. Two different processes racing to acquire
//! the same name block each other; the kernel drops the lock automatically
//! if the owning process dies, so there is no stale-lock cleanup to do.
//! Within one process, nested acquisitions of the same name are cheap: we
//! keep a single open file description alive per name and reference-count
//! it, since `flock()` on a second file description for the same path
//! would otherwise just block against our own first one.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::{Duration, Instant};

use rustix::fd::AsFd;
use rustix::fs::FlockOperation;
use thiserror::Error;

/// Mode applied to the run directory holding lock files.
const RUN_DIR_MODE: u32 = 0o700;
/// Interval between non-blocking lock attempts while polling for a
/// deadline.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Errors returned by [`FileLock::acquire`].
#[derive(Debug, Error)]
pub enum Error {
    /// The lock could not be acquired before the caller's deadline expired.
    #[error("timed out waiting for lock {0:?}")]
    Timeout(String),
    /// An I/O error occurred preparing or locking the file.
    #[error("I/O error acquiring lock {name:?}: {err}")]
    Io {
        /// Lock name.
        name: String,
        /// Underlying error.
        #[source]
        err: std::io::Error,
    },
}

struct LockState {
    file: Option<File>,
    refcount: u32,
}

type Registry = Mutex<HashMap<String, Arc<Mutex<LockState>>>>;

fn registry() -> &'static Registry {
    static REGISTRY: OnceLock<Registry> = OnceLock::new();
    REGISTRY.get_or_init(|| Mutex::new(HashMap::new()))
}

/// A held lock. Dropping it releases the lock if this was the last
/// reentrant holder in this process.
#[must_use = "dropping this immediately releases the lock"]
pub struct FileLock {
    name: String,
    entry: Arc<Mutex<LockState>>,
}

impl std::fmt::Debug for FileLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileLock").field("name", &self.name).finish()
    }
}

impl FileLock {
    /// Acquire the named lock under `run_dir`, creating the run directory
    /// (mode 0700) and the lock file if absent. Blocks (polling every
    /// 50ms) until acquired or, if `deadline` is `Some`, until the
    /// deadline elapses, in which case [`Error::Timeout`] is returned.
    pub fn acquire(run_dir: &Path, name: &str, deadline: Option<Duration>) -> Result<Self, Error> {
        let entry = {
            let mut reg = registry().lock().unwrap();
            reg.entry(name.to_string())
                .or_insert_with(|| {
                    Arc::new(Mutex::new(LockState {
                        file: None,
                        refcount: 0,
                    }))
                })
                .clone()
        };

        let mut state = entry.lock().unwrap();
        if state.refcount == 0 {
            let file = open_lock_file(run_dir, name).map_err(|err| Error::Io {
                name: name.to_string(),
                err,
            })?;
            lock_nonblocking_with_deadline(&file, name, deadline)?;
            state.file = Some(file);
        }
        state.refcount += 1;
        drop(state);

        Ok(FileLock {
            name: name.to_string(),
            entry,
        })
    }

    /// The lock's name.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        let mut state = self.entry.lock().unwrap();
        state.refcount = state.refcount.saturating_sub(1);
        if state.refcount == 0 {
            // Dropping the File closes its fd, which releases the flock.
            // We intentionally never unlink the lock file itself.
            state.file = None;
        }
    }
}

fn lock_path(run_dir: &Path, name: &str) -> PathBuf {
    run_dir.join(format!("{name}.lock"))
}

fn open_lock_file(run_dir: &Path, name: &str) -> std::io::Result<File> {
    std::fs::create_dir_all(run_dir)?;
    std::fs::set_permissions(run_dir, std::fs::Permissions::from_mode(RUN_DIR_MODE))?;
    OpenOptions::new()
        .create(true)
        .write(true)
        .mode(0o600)
        .open(lock_path(run_dir, name))
}

fn lock_nonblocking_with_deadline(
    file: &File,
    name: &str,
    deadline: Option<Duration>,
) -> Result<(), Error> {
    let start = Instant::now();
    loop {
        match rustix::fs::flock(file.as_fd(), FlockOperation::NonBlockingLockExclusive) {
            Ok(()) => return Ok(()),
            Err(e) if e == rustix::io::Errno::WOULDBLOCK => {
                if let Some(deadline) = deadline {
                    if start.elapsed() >= deadline {
                        return Err(Error::Timeout(name.to_string()));
                    }
                }
                std::thread::sleep(POLL_INTERVAL);
            }
            Err(e) => {
                return Err(Error::Io {
                    name: name.to_string(),
                    err: e.into(),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_and_release() {
        let dir = tempfile::tempdir().unwrap();
        let lock = FileLock::acquire(dir.path(), "abc123", None).unwrap();
        assert_eq!(lock.name(), "abc123");
        drop(lock);
        // Lock file persists after release.
        assert!(dir.path().join("abc123.lock").exists());
    }

    #[test]
    fn test_reentrant_within_process() {
        let dir = tempfile::tempdir().unwrap();
        let a = FileLock::acquire(dir.path(), "fsid", None).unwrap();
        let b = FileLock::acquire(dir.path(), "fsid", Some(Duration::from_millis(100))).unwrap();
        drop(a);
        drop(b);
    }

    #[test]
    fn test_different_names_do_not_block() {
        let dir = tempfile::tempdir().unwrap();
        let a = FileLock::acquire(dir.path(), "cluster-a", None).unwrap();
        let b = FileLock::acquire(dir.path(), "cluster-b", None).unwrap();
        drop(a);
        drop(b);
    }

    #[test]
    fn test_timeout_when_locked_by_another_fd() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path()).unwrap();
        let path = lock_path(dir.path(), "held");
        std::fs::create_dir_all(dir.path()).unwrap();
        let f = OpenOptions::new()
            .create(true)
            .write(true)
            .open(&path)
            .unwrap();
        rustix::fs::flock(f.as_fd(), FlockOperation::NonBlockingLockExclusive).unwrap();

        // A held lock in *this* registry under a distinct name simulates a
        // separate process holding the same path externally-locked.
        let start = Instant::now();
        let err = lock_nonblocking_with_deadline(
            &OpenOptions::new().write(true).open(&path).unwrap(),
            "held",
            Some(Duration::from_millis(120)),
        )
        .unwrap_err();
        assert!(matches!(err, Error::Timeout(_)));
        assert!(start.elapsed() >= Duration::from_millis(100));
    }
}

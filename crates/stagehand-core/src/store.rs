//! Cross-process read-modify-write access to a JSON state file.
//!
//! Every mutation takes an advisory lock file next to the target
//! (`<path>.lock`), created with `create_new` so exactly one process holds it.
//! A lock whose mtime is older than [`LockOptions::stale_after`] is assumed to
//! belong to a crashed holder and is taken over. Takeover and release both
//! run under an OS lock on `<path>.lock.guard`, so two waiters can never
//! both remove the same lock. Writes go through
//! [`crate::io::atomic_write`], so lock-free readers always see a whole file.

use crate::error::{Result, StagehandError};
use crate::{io, paths};
use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::{debug, warn};
use uuid::Uuid;

pub const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(60);
pub const DEFAULT_MAX_ATTEMPTS: u32 = 200;
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(25);

// ---------------------------------------------------------------------------
// LockOptions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockOptions {
    /// Age after which an existing lock file is considered abandoned.
    pub stale_after: Duration,
    /// Acquisition attempts before giving up with `LockTimeout`.
    pub max_attempts: u32,
    pub retry_delay: Duration,
}

impl Default for LockOptions {
    fn default() -> Self {
        Self {
            stale_after: DEFAULT_STALE_AFTER,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }
}

// ---------------------------------------------------------------------------
// Lock guard
// ---------------------------------------------------------------------------

/// Contents of a lock file. Only `token` matters for correctness; the rest is
/// for an operator inspecting a stuck lock.
#[derive(Debug, Serialize, Deserialize)]
struct LockOwner {
    token: String,
    pid: u32,
    acquired_at: DateTime<Utc>,
}

struct LockGuard {
    path: PathBuf,
    token: String,
}

impl LockGuard {
    fn acquire(lock_path: &Path, opts: &LockOptions) -> Result<Self> {
        if let Some(parent) = lock_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let token = Uuid::new_v4().to_string();
        let attempts = opts.max_attempts.max(1);

        for attempt in 1..=attempts {
            match OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(lock_path)
            {
                Ok(mut file) => {
                    let owner = LockOwner {
                        token: token.clone(),
                        pid: std::process::id(),
                        acquired_at: Utc::now(),
                    };
                    let body = serde_json::to_vec(&owner)?;
                    if let Err(e) = file.write_all(&body) {
                        let _ = fs::remove_file(lock_path);
                        return Err(e.into());
                    }
                    debug!(lock = %lock_path.display(), attempt, "lock acquired");
                    return Ok(Self {
                        path: lock_path.to_path_buf(),
                        token,
                    });
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    if clear_if_stale(lock_path, opts.stale_after)? {
                        continue;
                    }
                    if attempt < attempts {
                        std::thread::sleep(opts.retry_delay);
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(StagehandError::LockTimeout {
            path: lock_path.to_path_buf(),
            attempts,
        })
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let _removal = match RemovalGuard::acquire(&self.path) {
            Ok(guard) => Some(guard),
            Err(e) => {
                warn!(lock = %self.path.display(), error = %e, "releasing lock without guard");
                None
            }
        };
        // A lock taken over as stale now belongs to someone else.
        match fs::read_to_string(&self.path) {
            Ok(contents) if contents.contains(&self.token) => {
                if let Err(e) = fs::remove_file(&self.path) {
                    warn!(lock = %self.path.display(), error = %e, "failed to release lock");
                }
            }
            Ok(_) => {
                warn!(lock = %self.path.display(), "lock was taken over before release");
            }
            Err(_) => {}
        }
    }
}

/// OS-level exclusive lock on `<lock>.guard`, held while a lock file is
/// checked and removed. Every removal goes through it, so the file judged
/// stale is the file that gets deleted.
struct RemovalGuard {
    _file: fs::File,
}

impl RemovalGuard {
    fn acquire(lock_path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(paths::guard_path(lock_path))?;
        file.lock_exclusive()?;
        Ok(Self { _file: file })
    }
}

/// Remove the lock file if it is older than `stale_after`. Returns `true` when
/// the lock is gone and acquisition should be retried without waiting.
fn clear_if_stale(lock_path: &Path, stale_after: Duration) -> Result<bool> {
    match lock_age(lock_path) {
        None => return Ok(true),
        Some(age) if age < stale_after => return Ok(false),
        Some(_) => {}
    }

    let _removal = RemovalGuard::acquire(lock_path)?;
    // Another waiter may have replaced the stale lock while we waited.
    match lock_age(lock_path) {
        None => Ok(true),
        Some(age) if age < stale_after => Ok(false),
        Some(age) => {
            warn!(
                lock = %lock_path.display(),
                age_secs = age.as_secs(),
                "taking over stale lock"
            );
            match fs::remove_file(lock_path) {
                Ok(()) => Ok(true),
                Err(e) if e.kind() == ErrorKind::NotFound => Ok(true),
                Err(e) => Err(e.into()),
            }
        }
    }
}

/// Age of an existing lock file, `None` if it no longer exists. A mtime in the
/// future (clock skew) counts as a fresh lock.
fn lock_age(lock_path: &Path) -> Option<Duration> {
    let modified = fs::metadata(lock_path).and_then(|m| m.modified()).ok()?;
    Some(
        SystemTime::now()
            .duration_since(modified)
            .unwrap_or(Duration::ZERO),
    )
}

// ---------------------------------------------------------------------------
// LockedFile
// ---------------------------------------------------------------------------

/// A JSON state file shared between processes.
#[derive(Debug, Clone)]
pub struct LockedFile {
    path: PathBuf,
    options: LockOptions,
}

impl LockedFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            options: LockOptions::default(),
        }
    }

    pub fn with_options(mut self, options: LockOptions) -> Self {
        self.options = options;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn lock_path(&self) -> PathBuf {
        paths::lock_path(&self.path)
    }

    /// Read the current contents without taking the lock. A missing or empty
    /// file yields `T::default()`.
    pub fn read<T>(&self) -> Result<T>
    where
        T: DeserializeOwned + Default,
    {
        let data = match fs::read_to_string(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(T::default()),
            Err(e) => return Err(e.into()),
        };
        if data.trim().is_empty() {
            return Ok(T::default());
        }
        serde_json::from_str(&data).map_err(|source| StagehandError::CorruptState {
            path: self.path.clone(),
            source,
        })
    }

    /// Lock, load, let `f` mutate the value, then persist it atomically.
    ///
    /// Nothing is written when `f` fails. The lock is released on every exit
    /// path, including a panic inside `f`.
    pub fn update<T, R, F>(&self, f: F) -> Result<R>
    where
        T: Serialize + DeserializeOwned + Default,
        F: FnOnce(&mut T) -> Result<R>,
    {
        let _guard = LockGuard::acquire(&self.lock_path(), &self.options)?;
        let mut value: T = self.read()?;
        let out = f(&mut value)?;
        let data = serde_json::to_vec_pretty(&value)?;
        io::atomic_write(&self.path, &data)?;
        Ok(out)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Barrier};
    use tempfile::TempDir;

    #[derive(Debug, Default, Serialize, Deserialize)]
    struct Counter {
        value: u64,
    }

    fn quick() -> LockOptions {
        LockOptions {
            stale_after: Duration::from_secs(60),
            max_attempts: 3,
            retry_delay: Duration::from_millis(5),
        }
    }

    fn backdate(path: &Path, by: Duration) {
        let file = fs::File::options().write(true).open(path).unwrap();
        file.set_modified(SystemTime::now() - by).unwrap();
    }

    #[test]
    fn read_missing_file_is_default() {
        let dir = TempDir::new().unwrap();
        let store = LockedFile::new(dir.path().join("state.json"));
        let c: Counter = store.read().unwrap();
        assert_eq!(c.value, 0);
    }

    #[test]
    fn update_persists_and_releases_lock() {
        let dir = TempDir::new().unwrap();
        let store = LockedFile::new(dir.path().join("nested/state.json"));
        let out = store
            .update(|c: &mut Counter| {
                c.value += 5;
                Ok(c.value)
            })
            .unwrap();
        assert_eq!(out, 5);
        assert!(!store.lock_path().exists());

        let c: Counter = store.read().unwrap();
        assert_eq!(c.value, 5);
    }

    #[test]
    fn failing_closure_writes_nothing_and_releases_lock() {
        let dir = TempDir::new().unwrap();
        let store = LockedFile::new(dir.path().join("state.json"));
        store
            .update(|c: &mut Counter| {
                c.value = 1;
                Ok(())
            })
            .unwrap();

        let err = store
            .update(|c: &mut Counter| -> Result<()> {
                c.value = 99;
                Err(StagehandError::UnknownStage("nope".into()))
            })
            .unwrap_err();
        assert!(matches!(err, StagehandError::UnknownStage(_)));
        assert!(!store.lock_path().exists());
        assert_eq!(store.read::<Counter>().unwrap().value, 1);
    }

    #[test]
    fn panicking_closure_releases_lock() {
        let dir = TempDir::new().unwrap();
        let store = LockedFile::new(dir.path().join("state.json"));
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _ = store.update(|_: &mut Counter| -> Result<()> { panic!("boom") });
        }));
        assert!(result.is_err());
        assert!(!store.lock_path().exists());
    }

    #[test]
    fn corrupt_file_is_reported_not_repaired() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        fs::write(&path, "{ not json").unwrap();
        let store = LockedFile::new(&path);

        let err = store.update(|_: &mut Counter| Ok(())).unwrap_err();
        assert!(matches!(err, StagehandError::CorruptState { .. }));
        assert_eq!(fs::read_to_string(&path).unwrap(), "{ not json");
        assert!(!store.lock_path().exists());
    }

    #[test]
    fn held_lock_times_out() {
        let dir = TempDir::new().unwrap();
        let store = LockedFile::new(dir.path().join("state.json")).with_options(quick());
        fs::write(store.lock_path(), "held").unwrap();

        let err = store.update(|_: &mut Counter| Ok(())).unwrap_err();
        match err {
            StagehandError::LockTimeout { attempts, .. } => assert_eq!(attempts, 3),
            other => panic!("expected LockTimeout, got {other:?}"),
        }
        // Someone else's lock is left alone.
        assert_eq!(fs::read_to_string(store.lock_path()).unwrap(), "held");
    }

    #[test]
    fn stale_lock_is_taken_over() {
        let dir = TempDir::new().unwrap();
        let store = LockedFile::new(dir.path().join("state.json")).with_options(quick());
        fs::write(store.lock_path(), "crashed holder").unwrap();
        backdate(&store.lock_path(), Duration::from_secs(120));

        store
            .update(|c: &mut Counter| {
                c.value = 7;
                Ok(())
            })
            .unwrap();
        assert_eq!(store.read::<Counter>().unwrap().value, 7);
        assert!(!store.lock_path().exists());
    }

    #[test]
    fn racing_stale_takeovers_admit_one_holder() {
        const WAITERS: u64 = 12;
        for _ in 0..25 {
            let dir = TempDir::new().unwrap();
            let store = Arc::new(LockedFile::new(dir.path().join("counter.json")).with_options(
                LockOptions {
                    max_attempts: 20_000,
                    retry_delay: Duration::from_millis(1),
                    ..LockOptions::default()
                },
            ));
            fs::write(store.lock_path(), "crashed holder").unwrap();
            backdate(&store.lock_path(), Duration::from_secs(600));

            let barrier = Arc::new(Barrier::new(WAITERS as usize));
            let handles: Vec<_> = (0..WAITERS)
                .map(|_| {
                    let store = Arc::clone(&store);
                    let barrier = Arc::clone(&barrier);
                    std::thread::spawn(move || {
                        barrier.wait();
                        store
                            .update(|c: &mut Counter| {
                                let seen = c.value;
                                std::thread::sleep(Duration::from_millis(3));
                                c.value = seen + 1;
                                Ok(())
                            })
                            .unwrap();
                    })
                })
                .collect();
            for h in handles {
                h.join().unwrap();
            }

            assert_eq!(store.read::<Counter>().unwrap().value, WAITERS);
            assert!(!store.lock_path().exists());
        }
    }

    #[test]
    fn guard_does_not_remove_successor_lock() {
        let dir = TempDir::new().unwrap();
        let lock = dir.path().join("state.json.lock");
        let guard = LockGuard::acquire(&lock, &quick()).unwrap();
        // Simulate a takeover after our lock went stale.
        fs::write(&lock, "successor").unwrap();
        drop(guard);
        assert_eq!(fs::read_to_string(&lock).unwrap(), "successor");
    }

    #[test]
    fn concurrent_updates_are_not_lost() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(LockedFile::new(dir.path().join("counter.json")).with_options(
            LockOptions {
                max_attempts: 20_000,
                retry_delay: Duration::from_millis(1),
                ..LockOptions::default()
            },
        ));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    for _ in 0..10 {
                        store
                            .update(|c: &mut Counter| {
                                c.value += 1;
                                Ok(())
                            })
                            .unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(store.read::<Counter>().unwrap().value, 80);
    }
}

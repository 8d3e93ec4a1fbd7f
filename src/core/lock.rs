//! Advisory per-path write locks shared between worker processes
//!
//! The lock medium is the output directory itself: claiming `path` means
//! publishing the sibling file `path.lock`. The file is written under a
//! private name, locked with an OS advisory lock, then hard-linked into place,
//! so it never appears empty or unlocked. The holder keeps the advisory lock
//! for as long as the claim lasts.
//!
//! Only per-path mutual exclusion is provided. A lock file is removed only by
//! someone holding its advisory lock, after checking the file at `path.lock`
//! is still the one they locked. A holder that dies leaves its lock file
//! behind with the advisory lock dropped; unless a lease is configured, every
//! later attempt on that path reports contention.

use crate::types::{IndexError, IndexResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{File, OpenOptions, TryLockError};
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, SystemTime};

/// Mutual exclusion keyed by output path
pub trait LockBackend: Send + Sync {
    /// Try to claim `path`. Returns `false` if another holder has it.
    fn acquire(&self, path: &Path) -> IndexResult<bool>;

    /// Drop a claim obtained by a successful `acquire`.
    fn release(&self, path: &Path) -> IndexResult<()>;
}

static CLAIM_SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Contents of a lock file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockSentinel {
    pub pid: u32,
    pub created_at: DateTime<Utc>,
    pub resource: PathBuf,
    /// Unique per claim; tells one holder's lock file from the next one's
    #[serde(default)]
    pub token: String,
}

impl LockSentinel {
    fn current(resource: &Path) -> Self {
        let pid = std::process::id();
        let created_at = Utc::now();
        let token = format!(
            "{}-{}-{}",
            pid,
            CLAIM_SEQUENCE.fetch_add(1, Ordering::Relaxed),
            created_at.timestamp_nanos_opt().unwrap_or_default()
        );
        Self {
            pid,
            created_at,
            resource: resource.to_path_buf(),
            token,
        }
    }
}

/// A claim this backend holds: the open, advisory-locked lock file
#[derive(Debug)]
struct HeldLock {
    file: File,
    sentinel: LockSentinel,
}

/// Lock files published with an exclusive hard link
#[derive(Debug, Default)]
pub struct FileLockBackend {
    lease: Option<Duration>,
    held: Mutex<HashMap<PathBuf, HeldLock>>,
}

impl FileLockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Break lock files older than `lease` whose holder no longer has them locked.
    pub fn with_lease(lease: Duration) -> Self {
        Self {
            lease: Some(lease),
            ..Self::default()
        }
    }

    pub fn lease(&self) -> Option<Duration> {
        self.lease
    }

    /// Path of the lock file guarding `path`
    pub fn lock_path(path: &Path) -> PathBuf {
        let mut name = path.as_os_str().to_os_string();
        name.push(".lock");
        PathBuf::from(name)
    }

    fn held(&self) -> IndexResult<std::sync::MutexGuard<'_, HashMap<PathBuf, HeldLock>>> {
        self.held
            .lock()
            .map_err(|_| IndexError::Lock("Lock table poisoned".to_string()))
    }

    /// Publish a new lock file at `lock_path`; `None` if one already exists.
    fn try_claim(lock_path: &Path, resource: &Path) -> IndexResult<Option<HeldLock>> {
        let sentinel = LockSentinel::current(resource);
        let mut staging = lock_path.as_os_str().to_os_string();
        staging.push(format!(".{}", sentinel.token));
        let staging = PathBuf::from(staging);

        let claimed = Self::publish(&staging, lock_path, &sentinel);
        if let Err(e) = std::fs::remove_file(&staging) {
            if e.kind() != ErrorKind::NotFound {
                log::warn!("Failed to remove staging lock {}: {}", staging.display(), e);
            }
        }
        Ok(claimed?.map(|file| HeldLock { file, sentinel }))
    }

    fn publish(staging: &Path, lock_path: &Path, sentinel: &LockSentinel) -> IndexResult<Option<File>> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(staging)?;

        let body = serde_json::to_vec(sentinel)
            .map_err(|e| IndexError::Lock(format!("Failed to encode lock sentinel: {}", e)))?;
        file.write_all(&body)?;

        match file.try_lock() {
            Ok(()) => {}
            Err(TryLockError::WouldBlock) => {
                return Err(IndexError::Lock(format!(
                    "Staging lock {} is locked by someone else",
                    staging.display()
                )))
            }
            Err(TryLockError::Error(e)) => return Err(e.into()),
        }

        match std::fs::hard_link(staging, lock_path) {
            Ok(()) => Ok(Some(file)),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Age of a lock file, from its sentinel or failing that its mtime
    fn lock_age(contents: &[u8], file: &File) -> IndexResult<Duration> {
        if let Ok(sentinel) = serde_json::from_slice::<LockSentinel>(contents) {
            let age = Utc::now().signed_duration_since(sentinel.created_at);
            return Ok(age.to_std().unwrap_or(Duration::ZERO));
        }

        let modified = file.metadata()?.modified()?;
        Ok(SystemTime::now()
            .duration_since(modified)
            .unwrap_or(Duration::ZERO))
    }

    /// Remove the lock file at `lock_path` if it is orphaned and older than `lease`.
    ///
    /// Returns whether the orphan was removed. Anything unexpected along the
    /// way (a live holder, a file swapped in meanwhile, a young lock) leaves
    /// the lock file alone.
    fn break_orphan(lock_path: &Path, lease: Duration) -> IndexResult<bool> {
        let mut file = match File::open(lock_path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(true),
            Err(e) => return Err(e.into()),
        };

        match file.try_lock() {
            Ok(()) => {}
            // Its holder is alive
            Err(TryLockError::WouldBlock) => return Ok(false),
            Err(TryLockError::Error(e)) => return Err(e.into()),
        }

        let mut locked = Vec::new();
        file.read_to_end(&mut locked)?;

        // Whoever broke this file before us has already published a new one
        let current = match std::fs::read(lock_path) {
            Ok(current) => current,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(true),
            Err(e) => return Err(e.into()),
        };
        if current != locked {
            return Ok(false);
        }

        let age = Self::lock_age(&locked, &file)?;
        if age <= lease {
            return Ok(false);
        }

        log::warn!(
            "Breaking stale lock {} (age {:.0}s exceeds lease {:.0}s)",
            lock_path.display(),
            age.as_secs_f64(),
            lease.as_secs_f64()
        );
        match std::fs::remove_file(lock_path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(true),
            Err(e) => Err(e.into()),
        }
    }
}

impl LockBackend for FileLockBackend {
    fn acquire(&self, path: &Path) -> IndexResult<bool> {
        let lock_path = Self::lock_path(path);

        let mut claim = Self::try_claim(&lock_path, path)?;
        if claim.is_none() {
            if let Some(lease) = self.lease {
                if Self::break_orphan(&lock_path, lease)? {
                    claim = Self::try_claim(&lock_path, path)?;
                }
            }
        }

        match claim {
            Some(held) => {
                log::debug!("Acquired lock {}", lock_path.display());
                self.held()?.insert(path.to_path_buf(), held);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn release(&self, path: &Path) -> IndexResult<()> {
        let lock_path = Self::lock_path(path);
        let held = self.held()?.remove(path).ok_or_else(|| {
            IndexError::Lock(format!("{} is not held by this worker", lock_path.display()))
        })?;

        let current = match std::fs::read(&lock_path) {
            Ok(current) => current,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(IndexError::Lock(format!(
                    "Lock {} vanished before release",
                    lock_path.display()
                )))
            }
            Err(e) => return Err(e.into()),
        };

        let owned = serde_json::from_slice::<LockSentinel>(&current)
            .map(|sentinel| sentinel.token == held.sentinel.token)
            .unwrap_or(false);
        if !owned {
            return Err(IndexError::Lock(format!(
                "Lock {} now belongs to another holder; left in place",
                lock_path.display()
            )));
        }

        std::fs::remove_file(&lock_path)?;
        // Dropping the file handle gives up the advisory lock
        drop(held.file);
        log::debug!("Released lock {}", lock_path.display());
        Ok(())
    }
}

/// Held claim on one path; released on drop if not released explicitly
pub struct LockGuard<'a> {
    backend: &'a dyn LockBackend,
    path: PathBuf,
    released: bool,
}

impl<'a> LockGuard<'a> {
    /// Attempt to claim `path`; `None` when it is held elsewhere.
    pub fn try_lock(backend: &'a dyn LockBackend, path: &Path) -> IndexResult<Option<Self>> {
        if backend.acquire(path)? {
            Ok(Some(Self {
                backend,
                path: path.to_path_buf(),
                released: false,
            }))
        } else {
            Ok(None)
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Release now and report failures to the caller.
    pub fn release(mut self) -> IndexResult<()> {
        self.released = true;
        self.backend.release(&self.path)
    }
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(e) = self.backend.release(&self.path) {
            log::error!("Failed to release lock on {}: {}", self.path.display(), e);
        }
    }
}

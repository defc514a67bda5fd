//! Cross-process exclusive locks backed by a single lock file.
//!
//! Acquisition creates the lock file with `create_new`, so the filesystem
//! arbitrates between racing processes. A lock left behind by a crashed
//! process is broken only once it is older than [`LockConfig::stale_after`]
//! and its owner is confirmed gone (or its pid was reused). Release deletes
//! the file only if it still carries this holder's `lockId`.

mod record;
mod registry;

use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::clock::{Clock, SystemClock};
use crate::identity::{self, ProcessIdentity};
use crate::token::unique_token;
use crate::{Error, Result};

pub use record::{LockRecord, StalePolicy, StaleReason, StaleVerdict};
pub use registry::SessionLocks;

/// Tunables for lock acquisition.
///
/// `stale_after` is independent of the queue's claim lease:
/// locks are held for the length of one file mutation while leases are
/// renewed by heartbeat over minutes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    #[serde(with = "crate::config::duration_ms")]
    pub stale_after: Duration,
    #[serde(with = "crate::config::duration_ms")]
    pub cross_host_stale_after: Duration,
    #[serde(with = "crate::config::duration_ms")]
    pub retry_delay: Duration,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            stale_after: Duration::from_secs(60),
            cross_host_stale_after: Duration::from_secs(600),
            retry_delay: Duration::from_millis(50),
        }
    }
}

impl LockConfig {
    pub fn policy(&self) -> StalePolicy {
        StalePolicy {
            stale_after: self.stale_after,
            cross_host_stale_after: self.cross_host_stale_after,
        }
    }
}

/// Acquires lock files with a shared identity strategy and clock.
#[derive(Clone)]
pub struct LockManager {
    config: LockConfig,
    identity: Arc<dyn ProcessIdentity>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for LockManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockManager")
            .field("config", &self.config)
            .field("identity", &self.identity.name())
            .finish()
    }
}

/// Current state of a lock file, for inspection tooling.
#[derive(Debug, Clone)]
pub struct LockInspection {
    pub record: LockRecord,
    pub verdict: StaleVerdict,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReleaseOutcome {
    Released,
    /// Someone broke this lock and now holds their own; it was left alone.
    Stolen { current_lock_id: String },
    /// The lock file had already been removed.
    Missing,
}

impl LockManager {
    pub fn new(config: LockConfig) -> Self {
        Self {
            config,
            identity: identity::detect(),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_identity(mut self, identity: Arc<dyn ProcessIdentity>) -> Self {
        self.identity = identity;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &LockConfig {
        &self.config
    }

    pub fn identity(&self) -> &Arc<dyn ProcessIdentity> {
        &self.identity
    }

    /// Block until the lock at `path` is held or `timeout` elapses.
    ///
    /// On timeout returns [`Error::Contention`], which callers should surface
    /// as "busy, retry later".
    pub fn acquire(&self, path: &Path, timeout: Duration) -> Result<LockGuard> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let started = Instant::now();
        let mut holder_pid = None;
        loop {
            let record =
                LockRecord::for_current_process(self.identity.as_ref(), self.clock.now_ms());
            match try_create(path, &record) {
                Ok(()) => match read_record(path) {
                    Ok(Some(on_disk)) if on_disk.lock_id == record.lock_id => {
                        debug!("acquired lock {}", path.display());
                        return Ok(LockGuard {
                            path: path.to_path_buf(),
                            lock_id: record.lock_id,
                            released: false,
                        });
                    }
                    _ => {
                        debug!("{}", Error::LockRaceLost(path.to_path_buf()));
                    }
                },
                Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                    match read_record(path) {
                        Ok(Some(existing)) => {
                            holder_pid = Some(existing.owner_pid);
                            let verdict = self.judge(&existing);
                            if verdict.is_breakable() && self.break_stale(path, &existing, verdict)? {
                                continue;
                            }
                            debug!(
                                "lock {} held by pid {} ({:?})",
                                path.display(),
                                existing.owner_pid,
                                verdict
                            );
                        }
                        Ok(None) => continue,
                        Err(Error::CorruptState { reason, .. }) => {
                            // Usually a holder between create and write.
                            if self.break_abandoned_corrupt(path)? {
                                continue;
                            }
                            debug!("lock {} unreadable: {reason}", path.display());
                        }
                        Err(err) => return Err(err),
                    }
                }
                Err(err) => return Err(Error::Io(err)),
            }

            let waited = started.elapsed();
            if waited >= timeout {
                return Err(Error::Contention {
                    path: path.to_path_buf(),
                    holder_pid,
                    waited,
                });
            }
            let delay = self.retry_delay(&record.lock_id).min(timeout - waited);
            std::thread::sleep(delay);
        }
    }

    /// Run `f` while holding the lock; the lock is released on every path,
    /// including errors returned by `f`.
    pub fn with_lock<T>(
        &self,
        path: &Path,
        timeout: Duration,
        f: impl FnOnce() -> Result<T>,
    ) -> Result<T> {
        let guard = self.acquire(path, timeout)?;
        let result = f();
        let released = guard.release();
        let value = result?;
        released?;
        Ok(value)
    }

    pub fn judge(&self, record: &LockRecord) -> StaleVerdict {
        self.config.policy().judge(
            record,
            self.clock.now_ms(),
            identity::hostname(),
            self.identity.as_ref(),
        )
    }

    /// Read the lock at `path` without touching it.
    pub fn inspect(&self, path: &Path) -> Result<Option<LockInspection>> {
        Ok(read_record(path)?.map(|record| {
            let verdict = self.judge(&record);
            LockInspection { record, verdict }
        }))
    }

    fn break_stale(&self, path: &Path, judged: &LockRecord, verdict: StaleVerdict) -> Result<bool> {
        let Some(grave) = take_aside(path)? else {
            return Ok(true);
        };
        // Only the exact record that was judged may go; a newer holder may
        // have replaced it between our read and the rename.
        match read_record(&grave) {
            Ok(Some(taken)) if taken.lock_id == judged.lock_id => {}
            _ => {
                put_back(&grave, path)?;
                return Ok(false);
            }
        }
        crate::durable::remove_if_exists(&grave)?;
        warn!(
            "broke stale lock {} (owner pid {} on {}, {:?})",
            path.display(),
            judged.owner_pid,
            judged.hostname,
            verdict
        );
        Ok(true)
    }

    fn break_abandoned_corrupt(&self, path: &Path) -> Result<bool> {
        if !self.identity.verifies_start_time() {
            return Ok(false);
        }
        let before = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(true),
            Err(err) => return Err(Error::Io(err)),
        };
        let modified = match std::fs::metadata(path) {
            Ok(meta) => meta.modified()?,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(true),
            Err(err) => return Err(Error::Io(err)),
        };
        let age = SystemTime::now()
            .duration_since(modified)
            .unwrap_or(Duration::ZERO);
        if age < self.config.cross_host_stale_after {
            return Ok(false);
        }
        let Some(grave) = take_aside(path)? else {
            return Ok(true);
        };
        if std::fs::read(&grave).ok().as_deref() != Some(before.as_slice()) {
            put_back(&grave, path)?;
            return Ok(false);
        }
        crate::durable::remove_if_exists(&grave)?;
        warn!(
            "removed unreadable lock file {} untouched for {:?}",
            path.display(),
            age
        );
        Ok(true)
    }

    fn retry_delay(&self, lock_id: &str) -> Duration {
        let base = self.config.retry_delay;
        let spread = u64::try_from(base.as_millis() / 2).unwrap_or(0);
        if spread == 0 {
            return base;
        }
        let seed = u64::from_str_radix(lock_id.get(..4).unwrap_or("0"), 16).unwrap_or(0);
        base + Duration::from_millis(seed % (spread + 1))
    }
}

/// A held lock. Release explicitly with [`LockGuard::release`] to observe
/// the outcome; dropping releases best-effort.
#[derive(Debug)]
pub struct LockGuard {
    path: PathBuf,
    lock_id: String,
    released: bool,
}

impl LockGuard {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn lock_id(&self) -> &str {
        &self.lock_id
    }

    /// True while the lock file still carries this holder's id.
    pub fn is_held(&self) -> bool {
        matches!(read_record(&self.path), Ok(Some(record)) if record.lock_id == self.lock_id)
    }

    pub fn release(mut self) -> Result<ReleaseOutcome> {
        self.released = true;
        release_path(&self.path, &self.lock_id)
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if !self.released {
            if let Err(err) = release_path(&self.path, &self.lock_id) {
                warn!("failed to release lock {}: {err}", self.path.display());
            }
        }
    }
}

fn release_path(path: &Path, lock_id: &str) -> Result<ReleaseOutcome> {
    let current = match read_record(path) {
        Ok(Some(record)) => record,
        Ok(None) => return Ok(ReleaseOutcome::Missing),
        Err(Error::CorruptState { .. }) => {
            // Not ours to judge: our own record is always complete.
            return Ok(ReleaseOutcome::Stolen {
                current_lock_id: String::new(),
            });
        }
        Err(err) => return Err(err),
    };
    if current.lock_id != lock_id {
        warn!(
            "lock {} was broken and re-acquired by pid {}; leaving it in place",
            path.display(),
            current.owner_pid
        );
        return Ok(ReleaseOutcome::Stolen {
            current_lock_id: current.lock_id,
        });
    }
    crate::durable::remove_if_exists(path)?;
    debug!("released lock {}", path.display());
    Ok(ReleaseOutcome::Released)
}

fn try_create(path: &Path, record: &LockRecord) -> std::io::Result<()> {
    let mut file = OpenOptions::new().write(true).create_new(true).open(path)?;
    let written = serde_json::to_vec(record)
        .map_err(std::io::Error::from)
        .and_then(|data| {
            file.write_all(&data)?;
            file.sync_all()
        });
    if let Err(err) = written {
        let _ = std::fs::remove_file(path);
        return Err(err);
    }
    Ok(())
}

/// Atomically move the lock file to a private sibling name so it can be
/// judged without racing other breakers. `None` if it was already gone.
fn take_aside(path: &Path) -> Result<Option<PathBuf>> {
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let grave = path.with_file_name(format!(".{name}.broken-{}", unique_token()));
    match std::fs::rename(path, &grave) {
        Ok(()) => Ok(Some(grave)),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(err) => Err(Error::Io(err)),
    }
}

/// Return a lock file taken aside by mistake, unless a new holder already
/// claimed the path.
fn put_back(grave: &Path, path: &Path) -> Result<()> {
    match std::fs::hard_link(grave, path) {
        Ok(()) => {}
        Err(err) if err.kind() == ErrorKind::AlreadyExists => {
            warn!(
                "lock {} was re-acquired while a live record was set aside; dropping it",
                path.display()
            );
        }
        Err(err) => return Err(Error::Io(err)),
    }
    crate::durable::remove_if_exists(grave)?;
    Ok(())
}

/// Read a lock record; `Ok(None)` if the file is absent.
pub fn read_record(path: &Path) -> Result<Option<LockRecord>> {
    crate::durable::read_json(path)
}

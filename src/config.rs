//! Runtime configuration.
//!
//! Values come from [`Config::default`], optionally a JSON file, and finally
//! a handful of `LOCKSTEP_*` environment variables.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::lock::LockConfig;
use crate::queue::QueueConfig;
use crate::supervisor::SupervisorConfig;
use crate::{Error, Result};

pub const ENV_RUNTIME_DIR: &str = "LOCKSTEP_RUNTIME_DIR";
pub const ENV_LOCK_STALE_MS: &str = "LOCKSTEP_LOCK_STALE_MS";
pub const ENV_STALE_CLAIM_MS: &str = "LOCKSTEP_STALE_CLAIM_MS";
pub const ENV_WORKER_PROGRAM: &str = "LOCKSTEP_WORKER_PROGRAM";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory holding sessions, sockets and queues.
    /// Default: `$XDG_RUNTIME_DIR/lockstep`, else `<tmp>/lockstep-<uid>`
    pub runtime_root: PathBuf,

    /// Lock-file tunables.
    /// Default: stale after 60 s, cross-host stale after 10 min
    pub lock: LockConfig,

    /// Defaults applied to queues created by `init`.
    /// Default: 5 min claim lease, 3 attempts
    pub queue: QueueConfig,

    pub supervisor: SupervisorConfig,

    /// How long queue operations wait for the queue lock.
    /// Default: 10 s
    #[serde(with = "duration_ms")]
    pub queue_lock_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            runtime_root: default_runtime_root(),
            lock: LockConfig::default(),
            queue: QueueConfig::default(),
            supervisor: SupervisorConfig::default(),
            queue_lock_timeout: Duration::from_secs(10),
        }
    }
}

impl Config {
    /// Defaults with environment overrides applied.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Read a JSON config file; missing keys keep their defaults and the
    /// environment still wins.
    pub fn from_file(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        let mut config: Config = serde_json::from_slice(&bytes)
            .map_err(|err| Error::corrupt(path, err.to_string()))?;
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Apply overrides looked up through `lookup`. Blank values are ignored.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        if let Some(dir) = get(ENV_RUNTIME_DIR) {
            self.runtime_root = PathBuf::from(dir);
        }
        if let Some(raw) = get(ENV_LOCK_STALE_MS) {
            self.lock.stale_after = Duration::from_millis(parse_ms(ENV_LOCK_STALE_MS, &raw)?);
        }
        if let Some(raw) = get(ENV_STALE_CLAIM_MS) {
            self.queue.stale_claim_ms = parse_ms(ENV_STALE_CLAIM_MS, &raw)?;
        }
        if let Some(program) = get(ENV_WORKER_PROGRAM) {
            self.supervisor.command.program = PathBuf::from(program);
        }
        Ok(())
    }
}

fn parse_ms(field: &'static str, raw: &str) -> Result<u64> {
    match raw.trim().parse::<u64>() {
        Ok(ms) if ms > 0 => Ok(ms),
        _ => Err(Error::InvalidComponent {
            field,
            value: raw.to_string(),
        }),
    }
}

fn default_runtime_root() -> PathBuf {
    if let Some(dir) = std::env::var_os("XDG_RUNTIME_DIR").filter(|dir| !dir.is_empty()) {
        return PathBuf::from(dir).join("lockstep");
    }
    // SAFETY: getuid has no failure modes.
    let uid = unsafe { libc::getuid() };
    std::env::temp_dir().join(format!("lockstep-{uid}"))
}

/// Serde adapter storing a [`Duration`] as whole milliseconds.
pub mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

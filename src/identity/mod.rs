//! Process identity: "is this still the same process?", not merely "does
//! this pid exist?".
//!
//! Pids are recycled by the kernel, so every record that names a process
//! also stores the process start time observed when the record was written.
//! A later liveness check compares the live start time against the recorded
//! one. One implementation exists per platform and is chosen once by
//! [`detect`]; call sites only see the [`ProcessIdentity`] trait.

mod fallback;
#[cfg(target_os = "linux")]
mod procfs;
mod ps;

use std::fmt;
use std::sync::{Arc, OnceLock};

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

pub use fallback::ExistenceOnlyIdentity;
#[cfg(target_os = "linux")]
pub use procfs::{parse_stat, ProcfsIdentity};
pub use ps::{parse_lstart, PsIdentity};

/// A pid plus the start time observed when it was recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessHandle {
    pub pid: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<u64>,
}

impl ProcessHandle {
    pub fn new(pid: i32, start_time: Option<u64>) -> Self {
        Self { pid, start_time }
    }

    /// Handle for the calling process.
    pub fn current(identity: &dyn ProcessIdentity) -> Self {
        let pid = std::process::id() as i32;
        Self {
            pid,
            start_time: identity.start_time_of(pid),
        }
    }
}

/// Outcome of comparing a recorded handle against the live process table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    /// Live process with the recorded start time.
    Same,
    /// The pid is running but a different process now owns it.
    Reused,
    /// No process, or no start time could be read (treated as gone).
    Gone,
    /// A process exists but identity cannot be confirmed either way.
    Unverifiable,
}

pub trait ProcessIdentity: Send + Sync + fmt::Debug {
    fn name(&self) -> &'static str;

    /// Start time of `pid` in a platform-specific unit, if it can be read.
    fn start_time_of(&self, pid: i32) -> Option<u64>;

    /// Whether start times are available to detect pid reuse.
    ///
    /// Platforms returning false only offer a bare existence check; stale
    /// lock breaking is disabled on them.
    fn verifies_start_time(&self) -> bool;

    fn exists(&self, pid: i32) -> bool {
        pid_exists(pid)
    }

    fn probe(&self, pid: i32, expected_start_time: Option<u64>) -> Liveness {
        if pid <= 0 {
            return Liveness::Gone;
        }
        if !self.verifies_start_time() {
            return if self.exists(pid) {
                Liveness::Unverifiable
            } else {
                Liveness::Gone
            };
        }
        match (self.start_time_of(pid), expected_start_time) {
            (None, _) => Liveness::Gone,
            (Some(current), Some(expected)) if current == expected => Liveness::Same,
            (Some(_), Some(_)) => Liveness::Reused,
            (Some(_), None) => Liveness::Unverifiable,
        }
    }

    /// True unless the process is known to be gone or replaced.
    ///
    /// Without an expected start time this degrades to an existence check.
    fn is_alive(&self, pid: i32, expected_start_time: Option<u64>) -> bool {
        matches!(
            self.probe(pid, expected_start_time),
            Liveness::Same | Liveness::Unverifiable
        )
    }
}

/// Pick the identity strategy for the running platform.
pub fn detect() -> Arc<dyn ProcessIdentity> {
    #[cfg(target_os = "linux")]
    {
        Arc::new(ProcfsIdentity)
    }
    #[cfg(target_os = "macos")]
    {
        Arc::new(PsIdentity)
    }
    #[cfg(not(any(target_os = "linux", target_os = "macos")))]
    {
        Arc::new(ExistenceOnlyIdentity)
    }
}

/// Reject pids that would address process groups or every process.
///
/// `kill(0, ..)` signals the caller's own group and negative values signal
/// whole groups, so a corrupted record must never reach the OS unchecked.
pub fn validate_pid(raw: i64) -> Result<i32> {
    if raw <= 0 || raw > i64::from(i32::MAX) {
        return Err(Error::InvalidPid(raw));
    }
    Ok(raw as i32)
}

pub(crate) fn pid_exists(pid: i32) -> bool {
    if pid <= 0 {
        return false;
    }
    // SAFETY: signal 0 only performs permission and existence checks.
    let res = unsafe { libc::kill(pid, 0) };
    if res == 0 {
        return true;
    }
    matches!(
        std::io::Error::last_os_error().raw_os_error(),
        Some(code) if code == libc::EPERM
    )
}

/// Host name of this machine, read once.
pub fn hostname() -> &'static str {
    static HOSTNAME: OnceLock<String> = OnceLock::new();
    HOSTNAME.get_or_init(|| {
        let mut buf = [0u8; 256];
        // SAFETY: buf is valid for buf.len() bytes; gethostname NUL-terminates
        // on success when the name fits.
        let res = unsafe { libc::gethostname(buf.as_mut_ptr() as *mut libc::c_char, buf.len()) };
        if res != 0 {
            return "localhost".to_string();
        }
        let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
        let name = String::from_utf8_lossy(&buf[..end]).trim().to_string();
        if name.is_empty() {
            "localhost".to_string()
        } else {
            name
        }
    })
}

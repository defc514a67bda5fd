use std::fmt;
use std::io;

use serde::{Deserialize, Serialize};

use crate::identity::validate_pid;
use crate::{Error, Result};

/// Termination signals, ordered from weakest to strongest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Signal {
    Interrupt,
    Terminate,
    Kill,
}

impl Signal {
    pub fn raw(self) -> libc::c_int {
        match self {
            Signal::Interrupt => libc::SIGINT,
            Signal::Terminate => libc::SIGTERM,
            Signal::Kill => libc::SIGKILL,
        }
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Signal::Interrupt => "SIGINT",
            Signal::Terminate => "SIGTERM",
            Signal::Kill => "SIGKILL",
        })
    }
}

/// Signal the process group led by `pid`, falling back to the pid alone.
///
/// Returns `Ok(false)` when neither the group nor the process exists.
/// Workers are spawned as group leaders, so the group id equals the pid.
pub fn signal_group(pid: i32, signal: Signal) -> Result<bool> {
    let pid = validate_pid(i64::from(pid))?;
    if pid == 1 {
        return Err(Error::InvalidPid(1));
    }
    // SAFETY: pid is a validated positive id other than init.
    if unsafe { libc::killpg(pid, signal.raw()) } == 0 {
        return Ok(true);
    }
    let err = io::Error::last_os_error();
    if err.raw_os_error() != Some(libc::ESRCH) {
        return Err(Error::Io(err));
    }
    // SAFETY: as above; targets the single process.
    if unsafe { libc::kill(pid, signal.raw()) } == 0 {
        return Ok(true);
    }
    let err = io::Error::last_os_error();
    if err.raw_os_error() == Some(libc::ESRCH) {
        return Ok(false);
    }
    Err(Error::Io(err))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signals_order_by_strength() {
        assert!(Signal::Interrupt < Signal::Terminate);
        assert!(Signal::Terminate < Signal::Kill);
    }

    #[test]
    fn refuses_init_and_group_addresses() {
        assert!(matches!(signal_group(1, Signal::Interrupt), Err(Error::InvalidPid(1))));
        assert!(matches!(signal_group(0, Signal::Kill), Err(Error::InvalidPid(0))));
        assert!(matches!(signal_group(-5, Signal::Kill), Err(Error::InvalidPid(-5))));
    }

    #[test]
    fn missing_process_reports_false() {
        assert!(!signal_group(i32::MAX - 11, Signal::Interrupt).expect("signal"));
    }
}

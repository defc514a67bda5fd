use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom};
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};

use log::{debug, warn};

use super::signal::{signal_group, Signal};
use crate::Result;

/// A spawned worker that this process still supervises.
///
/// The child leads its own process group, so signals reach everything it
/// starts and a Ctrl-C aimed at the controller's terminal does not. stderr goes
/// to a per-session log file rather than a pipe, so the worker keeps running
/// unharmed after the controller exits; diagnostics read a bounded tail.
#[derive(Debug)]
pub struct ChildHandle {
    child: Child,
    stderr_log: PathBuf,
    stderr_capacity: usize,
}

impl ChildHandle {
    pub fn spawn(command: &mut Command, stderr_log: &Path, stderr_capacity: usize) -> Result<Self> {
        if let Some(parent) = stderr_log.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let log = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(stderr_log)?;
        let child = command
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::from(log))
            .process_group(0)
            .spawn()?;
        debug!("spawned pid {} (stderr -> {})", child.id(), stderr_log.display());
        Ok(Self {
            child,
            stderr_log: stderr_log.to_path_buf(),
            stderr_capacity,
        })
    }

    pub fn pid(&self) -> i32 {
        self.child.id() as i32
    }

    /// Exit status if the child already exited, reaping it.
    pub fn try_exit(&mut self) -> Result<Option<ExitStatus>> {
        Ok(self.child.try_wait()?)
    }

    /// The last `stderr_capacity` bytes the child wrote.
    pub fn stderr_tail(&self) -> String {
        read_tail(&self.stderr_log, self.stderr_capacity).unwrap_or_default()
    }

    /// SIGKILL the whole group and reap the leader.
    pub fn kill_group(&mut self) {
        match signal_group(self.pid(), Signal::Kill) {
            Ok(_) => {}
            Err(err) => warn!("failed to kill pid {}: {err}", self.pid()),
        }
        if let Err(err) = self.child.wait() {
            warn!("failed to reap pid {}: {err}", self.pid());
        }
    }

    /// Stop supervising: the worker keeps running on its own.
    ///
    /// A background thread waits on the child so its exit status is collected
    /// while this process lives; otherwise the exited worker would linger as a
    /// zombie and still look present to existence checks.
    pub fn detach(self) -> i32 {
        let pid = self.pid();
        let mut child = self.child;
        let spawned = std::thread::Builder::new()
            .name(format!("reap-{pid}"))
            .spawn(move || match child.wait() {
                Ok(status) => debug!("detached worker {pid} exited: {status}"),
                Err(err) => debug!("detached worker {pid} wait failed: {err}"),
            });
        if let Err(err) = spawned {
            warn!("could not start reaper for pid {pid}: {err}");
        }
        pid
    }
}

/// Read at most `capacity` trailing bytes of `path`, lossily decoded.
pub fn read_tail(path: &Path, capacity: usize) -> std::io::Result<String> {
    let mut file = File::open(path)?;
    let len = file.metadata()?.len();
    let start = len.saturating_sub(capacity as u64);
    file.seek(SeekFrom::Start(start))?;
    let mut buf = Vec::with_capacity((len - start) as usize);
    file.take(capacity as u64).read_to_end(&mut buf)?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

//! Lifecycle of one long-running worker process per session.
//!
//! `spawn` launches a worker, waits for its socket and records who it is.
//! `ensure` reuses a recorded worker only after confirming it is the same
//! process and that its endpoint is a real socket. `terminate` walks the
//! escalation ladder and always clears the record afterwards. All three run
//! under the session's lock file, so concurrent controllers never race on the
//! same worker.

mod child;
mod escalate;
mod meta;
mod signal;

use std::os::unix::fs::{DirBuilderExt, FileTypeExt};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::clock::{Clock, SystemClock};
use crate::identity::{Liveness, ProcessIdentity};
use crate::layout::{RuntimeLayout, SessionPaths};
use crate::lock::LockManager;
use crate::{Error, Result};

pub use child::{read_tail, ChildHandle};
pub use escalate::{
    run_escalation, EscalationOutcome, EscalationPlan, EscalationStep, TerminatedBy,
};
pub use meta::{read_meta, remove_meta, write_meta, BridgeMeta, MetaRead, BRIDGE_SCHEMA_VERSION};
pub use signal::{signal_group, Signal};

/// Environment variable carrying the socket path a worker must listen on.
pub const SOCKET_ENV: &str = "LOCKSTEP_SOCKET";
pub const SESSION_ENV: &str = "LOCKSTEP_SESSION_ID";
/// Placeholder in worker arguments replaced by the socket path.
pub const SOCKET_PLACEHOLDER: &str = "{socket}";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
}

impl Default for WorkerCommand {
    fn default() -> Self {
        Self {
            program: PathBuf::from("lockstep-echo-worker"),
            args: Vec::new(),
            env: Vec::new(),
        }
    }
}

impl WorkerCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    fn build(&self, paths: &SessionPaths, workdir: &Path) -> Command {
        let socket = paths.socket.to_string_lossy();
        let mut command = Command::new(&self.program);
        command
            .args(self.args.iter().map(|arg| arg.replace(SOCKET_PLACEHOLDER, &socket)))
            .envs(self.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .env(SOCKET_ENV, paths.socket.as_os_str())
            .env(SESSION_ENV, &paths.session_id)
            .current_dir(workdir);
        command
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    pub command: WorkerCommand,
    #[serde(with = "crate::config::duration_ms")]
    pub spawn_timeout: Duration,
    #[serde(with = "crate::config::duration_ms")]
    pub poll_interval: Duration,
    pub stderr_capacity: usize,
    #[serde(with = "crate::config::duration_ms")]
    pub grace_period: Duration,
    #[serde(with = "crate::config::duration_ms")]
    pub kill_wait: Duration,
    #[serde(with = "crate::config::duration_ms")]
    pub lock_timeout: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            command: WorkerCommand::default(),
            spawn_timeout: Duration::from_secs(10),
            poll_interval: Duration::from_millis(50),
            stderr_capacity: 64 * 1024,
            grace_period: Duration::from_secs(5),
            kill_wait: Duration::from_secs(1),
            lock_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TerminateReport {
    pub terminated_by: TerminatedBy,
    pub elapsed_ms: u64,
    pub signals_sent: Vec<Signal>,
}

/// Read-only view of a session's worker.
#[derive(Debug, Clone, PartialEq)]
pub struct BridgeStatus {
    pub paths: SessionPaths,
    pub meta: MetaRead,
    pub liveness: Option<Liveness>,
    pub endpoint_ready: bool,
}

pub struct Supervisor {
    layout: RuntimeLayout,
    config: SupervisorConfig,
    locks: LockManager,
    identity: Arc<dyn ProcessIdentity>,
    clock: Arc<dyn Clock>,
}

impl Supervisor {
    pub fn new(layout: RuntimeLayout, config: SupervisorConfig, locks: LockManager) -> Self {
        let identity = Arc::clone(locks.identity());
        Self {
            layout,
            config,
            locks,
            identity,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_identity(mut self, identity: Arc<dyn ProcessIdentity>) -> Self {
        self.identity = identity;
        self
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    pub fn layout(&self) -> &RuntimeLayout {
        &self.layout
    }

    /// Launch a fresh worker for `session_id`, replacing any recorded one.
    pub fn spawn(&self, session_id: &str, workdir: &Path) -> Result<BridgeMeta> {
        let paths = self.layout.session(session_id)?;
        self.locks
            .with_lock(&paths.lock, self.config.lock_timeout, || {
                self.spawn_locked(&paths, workdir)
            })
    }

    /// Return a verified running worker for `session_id`, spawning if needed.
    pub fn ensure(&self, session_id: &str, workdir: &Path) -> Result<BridgeMeta> {
        let paths = self.layout.session(session_id)?;
        self.locks
            .with_lock(&paths.lock, self.config.lock_timeout, || {
                let meta = match read_meta(&paths.meta)? {
                    MetaRead::Missing => return self.spawn_locked(&paths, workdir),
                    MetaRead::Poisoned(reason) => {
                        warn!("discarding unreadable bridge meta for {session_id}: {reason}");
                        remove_meta(&paths.meta)?;
                        return self.spawn_locked(&paths, workdir);
                    }
                    MetaRead::Valid(meta) => meta,
                };
                if let Some(reason) = mismatch(&meta, &paths) {
                    warn!("discarding poisoned bridge meta for {session_id}: {reason}");
                    remove_meta(&paths.meta)?;
                    return self.spawn_locked(&paths, workdir);
                }
                let liveness = self.identity.probe(meta.pid, meta.process_start_time);
                if liveness != Liveness::Same {
                    info!(
                        "worker pid {} for {session_id} not confirmed ({liveness:?}); respawning",
                        meta.pid
                    );
                    remove_meta(&paths.meta)?;
                    return self.spawn_locked(&paths, workdir);
                }
                if endpoint_is_socket(&paths.socket) {
                    debug!("reusing worker pid {} for {session_id}", meta.pid);
                    return Ok(meta);
                }
                // Something else sits at the endpoint; a replacement could
                // not bind there either, so leave the live worker alone.
                if endpoint_occupied(&paths.socket)? {
                    warn!(
                        "worker pid {} for {session_id} is alive but {} is not a socket",
                        meta.pid,
                        paths.socket.display()
                    );
                    return Err(Error::EndpointOccupied {
                        path: paths.socket.clone(),
                    });
                }
                warn!(
                    "worker pid {} for {session_id} is alive but {} is gone; killing orphan",
                    meta.pid,
                    paths.socket.display()
                );
                let plan = EscalationPlan::kill_only(self.config.kill_wait);
                run_escalation(meta.handle(), &plan, self.identity.as_ref());
                remove_meta(&paths.meta)?;
                self.spawn_locked(&paths, workdir)
            })
    }

    /// Stop the session's worker: SIGINT, then SIGTERM, then SIGKILL.
    ///
    /// The meta record is cleared even when death could not be confirmed;
    /// the next `ensure` re-verifies from scratch.
    pub fn terminate(&self, session_id: &str, grace: Duration) -> Result<TerminateReport> {
        let paths = self.layout.session(session_id)?;
        self.locks
            .with_lock(&paths.lock, self.config.lock_timeout, || {
                let started = Instant::now();
                let target = match read_meta(&paths.meta)? {
                    MetaRead::Valid(meta) if mismatch(&meta, &paths).is_none() => {
                        if meta.process_start_time.is_some() {
                            Some(meta.handle())
                        } else {
                            warn!(
                                "worker pid {} for {session_id} has no recorded start time; not signalling",
                                meta.pid
                            );
                            None
                        }
                    }
                    _ => None,
                };
                let report = match target {
                    Some(handle) => {
                        let plan = EscalationPlan::standard(grace, self.config.kill_wait);
                        let outcome = run_escalation(handle, &plan, self.identity.as_ref());
                        info!(
                            "worker pid {} for {session_id} terminated by {:?} in {:?}",
                            handle.pid, outcome.terminated_by, outcome.elapsed
                        );
                        TerminateReport {
                            terminated_by: outcome.terminated_by,
                            elapsed_ms: millis(outcome.elapsed),
                            signals_sent: outcome.signals_sent,
                        }
                    }
                    None => TerminateReport {
                        terminated_by: TerminatedBy::AlreadyDead,
                        elapsed_ms: millis(started.elapsed()),
                        signals_sent: Vec::new(),
                    },
                };
                cleanup(&paths)?;
                Ok(report)
            })
    }

    /// Unlocked inspection; may be momentarily stale.
    pub fn status(&self, session_id: &str) -> Result<BridgeStatus> {
        let paths = self.layout.session(session_id)?;
        let meta = read_meta(&paths.meta)?;
        let liveness = match &meta {
            MetaRead::Valid(meta) => Some(self.identity.probe(meta.pid, meta.process_start_time)),
            _ => None,
        };
        Ok(BridgeStatus {
            endpoint_ready: endpoint_is_socket(&paths.socket),
            paths,
            meta,
            liveness,
        })
    }

    fn spawn_locked(&self, paths: &SessionPaths, workdir: &Path) -> Result<BridgeMeta> {
        clear_stale_endpoint(&paths.socket)?;
        create_private_dir(&self.layout.socket_dir())?;
        create_private_dir(&paths.dir)?;

        let mut command = self.config.command.build(paths, workdir);
        let stderr_log = paths.dir.join("worker.stderr.log");
        let mut child = ChildHandle::spawn(&mut command, &stderr_log, self.config.stderr_capacity)
            .map_err(|err| Error::SpawnFailure {
                reason: format!("{}: {err}", self.config.command.program.display()),
                stderr: String::new(),
            })?;

        let deadline = Instant::now() + self.config.spawn_timeout;
        loop {
            if endpoint_is_socket(&paths.socket) {
                break;
            }
            let exited = match child.try_exit() {
                Ok(exited) => exited,
                Err(err) => {
                    child.kill_group();
                    return Err(err);
                }
            };
            if let Some(status) = exited {
                let stderr = child.stderr_tail();
                return Err(Error::SpawnFailure {
                    reason: format!("worker exited before listening ({status})"),
                    stderr,
                });
            }
            let now = Instant::now();
            if now >= deadline {
                child.kill_group();
                return Err(Error::SpawnFailure {
                    reason: format!(
                        "socket {} did not appear within {:?}",
                        paths.socket.display(),
                        self.config.spawn_timeout
                    ),
                    stderr: child.stderr_tail(),
                });
            }
            std::thread::sleep(self.config.poll_interval.min(deadline - now));
        }

        let pid = child.pid();
        let meta = BridgeMeta {
            schema_version: BRIDGE_SCHEMA_VERSION,
            pid,
            socket_path: paths.socket.clone(),
            started_at: self.clock.now_ms(),
            owner_session_id: paths.session_id.clone(),
            process_start_time: self.identity.start_time_of(pid),
            extra: Default::default(),
        };
        if let Err(err) = write_meta(&paths.meta, &meta) {
            child.kill_group();
            return Err(err);
        }
        child.detach();
        info!(
            "spawned worker pid {pid} for {} on {}",
            paths.session_id,
            paths.socket.display()
        );
        Ok(meta)
    }
}

/// Why a recorded meta does not describe this session's worker, if it doesn't.
fn mismatch(meta: &BridgeMeta, paths: &SessionPaths) -> Option<String> {
    if meta.owner_session_id != paths.session_id {
        return Some(format!("owned by session {}", meta.owner_session_id));
    }
    if meta.socket_path != paths.socket {
        return Some(format!(
            "socket path {} is not the expected {}",
            meta.socket_path.display(),
            paths.socket.display()
        ));
    }
    None
}

pub(crate) fn endpoint_is_socket(path: &Path) -> bool {
    std::fs::symlink_metadata(path)
        .map(|meta| meta.file_type().is_socket())
        .unwrap_or(false)
}

/// Whether something other than a socket exists at `path`.
fn endpoint_occupied(path: &Path) -> Result<bool> {
    match std::fs::symlink_metadata(path) {
        Ok(meta) => Ok(!meta.file_type().is_socket()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(Error::Io(err)),
    }
}

/// Remove a leftover socket; refuse to touch anything that is not one.
fn clear_stale_endpoint(path: &Path) -> Result<()> {
    if endpoint_occupied(path)? {
        return Err(Error::EndpointOccupied {
            path: path.to_path_buf(),
        });
    }
    crate::durable::remove_if_exists(path)?;
    Ok(())
}

fn cleanup(paths: &SessionPaths) -> Result<()> {
    remove_meta(&paths.meta)?;
    if endpoint_is_socket(&paths.socket) {
        crate::durable::remove_if_exists(&paths.socket)?;
    }
    Ok(())
}

fn create_private_dir(dir: &Path) -> Result<()> {
    std::fs::DirBuilder::new()
        .recursive(true)
        .mode(0o700)
        .create(dir)?;
    Ok(())
}

fn millis(elapsed: Duration) -> u64 {
    u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
}

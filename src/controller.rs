//! Drives session workers on behalf of in-process callers.
//!
//! Callers for the same session are serialized in-process by
//! [`SessionLocks`] before the supervisor takes the session's lock file, so
//! threads queue up on a mutex instead of polling the filesystem.

use std::path::{Path, PathBuf};
use std::time::Duration;

use log::{info, warn};
use serde_json::Value;

use crate::config::Config;
use crate::layout::RuntimeLayout;
use crate::lock::{LockManager, SessionLocks};
use crate::rpc::RpcClient;
use crate::supervisor::{BridgeMeta, Supervisor, TerminateReport};
use crate::{Error, Result};

pub struct Controller {
    supervisor: Supervisor,
    sessions: SessionLocks,
    workdir: PathBuf,
    connect_timeout: Duration,
    interrupt_timeout: Duration,
}

impl Controller {
    pub fn new(supervisor: Supervisor, workdir: impl Into<PathBuf>) -> Self {
        Self {
            supervisor,
            sessions: SessionLocks::new(),
            workdir: workdir.into(),
            connect_timeout: Duration::from_secs(2),
            interrupt_timeout: Duration::from_secs(1),
        }
    }

    pub fn from_config(config: &Config, workdir: impl Into<PathBuf>) -> Self {
        let supervisor = Supervisor::new(
            RuntimeLayout::new(&config.runtime_root),
            config.supervisor.clone(),
            LockManager::new(config.lock),
        );
        Self::new(supervisor, workdir)
    }

    pub fn with_interrupt_timeout(mut self, timeout: Duration) -> Self {
        self.interrupt_timeout = timeout;
        self
    }

    pub fn supervisor(&self) -> &Supervisor {
        &self.supervisor
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    /// Make sure the session's worker runs and call `method` on it.
    ///
    /// On timeout the worker is sent `interrupt`; if that also fails it is
    /// terminated. The caller always sees the original timeout.
    pub fn call(
        &self,
        session_id: &str,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> Result<Value> {
        self.sessions.run(session_id, || {
            let meta = self.supervisor.ensure(session_id, &self.workdir)?;
            let mut client = RpcClient::connect(&meta.socket_path, self.connect_timeout)?;
            match client.call(method, params, timeout) {
                Err(err @ Error::RpcTimeout { .. }) => {
                    self.recover(session_id, &meta);
                    Err(err)
                }
                other => other,
            }
        })
    }

    /// Stop the session's worker with the configured grace period.
    pub fn shutdown(&self, session_id: &str) -> Result<TerminateReport> {
        let grace = self.supervisor.config().grace_period;
        self.sessions
            .run(session_id, || self.supervisor.terminate(session_id, grace))
    }

    fn recover(&self, session_id: &str, meta: &BridgeMeta) {
        let interrupted = RpcClient::connect(&meta.socket_path, self.connect_timeout)
            .and_then(|mut client| client.interrupt(self.interrupt_timeout));
        match interrupted {
            Ok(_) => info!("interrupted worker pid {} for {session_id} after timeout", meta.pid),
            Err(err) => {
                warn!(
                    "worker pid {} for {session_id} did not take interrupt ({err}); terminating",
                    meta.pid
                );
                let grace = self.supervisor.config().grace_period;
                if let Err(err) = self.supervisor.terminate(session_id, grace) {
                    warn!("terminate of {session_id} failed: {err}");
                }
            }
        }
    }
}

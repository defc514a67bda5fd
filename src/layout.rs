//! Directory layout under the runtime root.
//!
//! ```text
//! {root}/
//! ├── sessions/{session_id}/
//! │   ├── bridge.json   ← BridgeMeta for the session's worker
//! │   └── bridge.lock   ← serializes ensure/terminate
//! ├── sock/{digest}.sock ← worker endpoint, digest of the session id
//! └── queues/{report}/{run}/
//!     ├── queue.json    ← QueueState
//!     └── queue.lock
//! ```

use std::path::{Path, PathBuf};

use crate::token::short_digest;
use crate::{Error, Result};

const MAX_COMPONENT_LEN: usize = 128;
const SOCKET_DIGEST_LEN: usize = 16;
/// `sun_path` is 104 bytes on macOS and 108 on Linux, NUL included.
const MAX_SOCKET_PATH_LEN: usize = 103;

/// Validates that a path component is safe (no path traversal).
///
/// Rejects empty values, `.` and `..`, path separators, NUL bytes and
/// values longer than 128 bytes.
pub fn validate_component(field: &'static str, value: &str) -> Result<()> {
    let invalid = value.is_empty()
        || value == "."
        || value == ".."
        || value.contains('/')
        || value.contains('\\')
        || value.contains('\0')
        || value.len() > MAX_COMPONENT_LEN;
    if invalid {
        return Err(Error::InvalidComponent {
            field,
            value: value.to_string(),
        });
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub struct RuntimeLayout {
    root: PathBuf,
}

impl RuntimeLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn session(&self, session_id: &str) -> Result<SessionPaths> {
        validate_component("session_id", session_id)?;
        let dir = self.root.join("sessions").join(session_id);
        let socket = self.socket_dir().join(format!(
            "{}.sock",
            short_digest(session_id, SOCKET_DIGEST_LEN)
        ));
        if socket.as_os_str().len() > MAX_SOCKET_PATH_LEN {
            return Err(Error::InvalidComponent {
                field: "socket_path",
                value: socket.display().to_string(),
            });
        }
        Ok(SessionPaths {
            session_id: session_id.to_string(),
            meta: dir.join("bridge.json"),
            lock: dir.join("bridge.lock"),
            dir,
            socket,
        })
    }

    pub fn queue(&self, report: &str, run: &str) -> Result<QueuePaths> {
        validate_component("report", report)?;
        validate_component("run", run)?;
        let dir = self.root.join("queues").join(report).join(run);
        Ok(QueuePaths {
            queue_id: format!("{report}/{run}"),
            state: dir.join("queue.json"),
            lock: dir.join("queue.lock"),
            dir,
        })
    }

    pub fn socket_dir(&self) -> PathBuf {
        self.root.join("sock")
    }
}

/// Canonical paths for one session's worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionPaths {
    pub session_id: String,
    pub dir: PathBuf,
    pub meta: PathBuf,
    pub lock: PathBuf,
    pub socket: PathBuf,
}

/// Paths for one (report, run) queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuePaths {
    pub queue_id: String,
    pub dir: PathBuf,
    pub state: PathBuf,
    pub lock: PathBuf,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_component_valid() {
        assert!(validate_component("test", "report-2026").is_ok());
        assert!(validate_component("test", "run_1").is_ok());
    }

    #[test]
    fn validate_component_path_traversal() {
        assert!(validate_component("test", "").is_err());
        assert!(validate_component("test", "..").is_err());
        assert!(validate_component("test", ".").is_err());
        assert!(validate_component("test", "foo/bar").is_err());
        assert!(validate_component("test", "foo\\bar").is_err());
        assert!(validate_component("test", "nul\0byte").is_err());
        assert!(validate_component("test", &"x".repeat(129)).is_err());
    }

    #[test]
    fn queue_paths() {
        let layout = RuntimeLayout::new("/tmp/rt");
        let paths = layout.queue("report", "run-7").expect("paths");
        assert_eq!(paths.queue_id, "report/run-7");
        assert_eq!(paths.state, PathBuf::from("/tmp/rt/queues/report/run-7/queue.json"));
        assert_eq!(paths.lock, PathBuf::from("/tmp/rt/queues/report/run-7/queue.lock"));
    }

    #[test]
    fn session_socket_is_short_and_stable() {
        let layout = RuntimeLayout::new("/tmp/rt");
        let long_id = "s".repeat(120);
        let a = layout.session(&long_id).expect("paths");
        let b = layout.session(&long_id).expect("paths");
        assert_eq!(a.socket, b.socket);
        assert!(a.socket.starts_with("/tmp/rt/sock"));
        assert_eq!(a.socket.file_name().expect("name").len(), 16 + ".sock".len());
        assert_eq!(a.meta, PathBuf::from(format!("/tmp/rt/sessions/{long_id}/bridge.json")));
    }

    #[test]
    fn overlong_socket_root_is_rejected() {
        let layout = RuntimeLayout::new(format!("/{}", "d".repeat(100)));
        let err = layout.session("s").unwrap_err();
        assert!(matches!(err, Error::InvalidComponent { field: "socket_path", .. }));
    }
}

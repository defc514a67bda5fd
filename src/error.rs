use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::queue::JobStatus;

#[derive(Debug, Error)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("busy, retry later: {} is held by pid {holder_pid:?} (waited {waited:?})", path.display())]
    Contention {
        path: PathBuf,
        holder_pid: Option<i32>,
        waited: Duration,
    },
    #[error("lock race lost on {}", .0.display())]
    LockRaceLost(PathBuf),
    #[error("queue {queue_id} not found, initialize it first")]
    QueueNotFound { queue_id: String },
    #[error("queue {queue_id} already exists")]
    QueueExists { queue_id: String },
    #[error("job {job_id} not found in queue {queue_id}")]
    JobNotFound { queue_id: String, job_id: String },
    #[error("conflicting state for job {job_id}: expected {expected}, found {actual} ({detail})")]
    StateConflict {
        job_id: String,
        expected: JobStatus,
        actual: JobStatus,
        detail: String,
    },
    #[error("duplicate job id {0}")]
    DuplicateJob(String),
    #[error("worker spawn failed: {reason}; stderr: {stderr}")]
    SpawnFailure { reason: String, stderr: String },
    #[error("endpoint path {} is occupied by a non-socket object", path.display())]
    EndpointOccupied { path: PathBuf },
    #[error("invalid pid: {0}")]
    InvalidPid(i64),
    #[error("invalid {field}: {value:?}")]
    InvalidComponent { field: &'static str, value: String },
    #[error("corrupt state in {}: {reason}", path.display())]
    CorruptState { path: PathBuf, reason: String },
    #[error("unsupported schema version: {0}")]
    UnsupportedVersion(u32),
    #[error("rpc protocol error: {0}")]
    Rpc(String),
    #[error("rpc error {code}: {message}")]
    RpcRemote { code: i64, message: String },
    #[error("rpc call {method} timed out after {timeout:?}")]
    RpcTimeout { method: String, timeout: Duration },
}

impl Error {
    /// True for outcomes a caller may retry unchanged after a delay.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Contention { .. } | Error::LockRaceLost(_) | Error::RpcTimeout { .. }
        )
    }

    pub(crate) fn corrupt(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Error::CorruptState {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

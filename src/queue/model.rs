use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const QUEUE_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Pending,
    Claimed,
    Done,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Done | JobStatus::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "PENDING",
            JobStatus::Claimed => "CLAIMED",
            JobStatus::Done => "DONE",
            JobStatus::Failed => "FAILED",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QueueStatus {
    Active,
    Completed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub job_id: String,
    pub stage_id: String,
    pub kind: String,
    pub status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claimed_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claimed_at: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heartbeat_at: Option<u64>,
    pub attempt: u32,
    pub max_attempts: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required_capabilities: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<u64>,
    #[serde(default)]
    pub payload: Value,
}

impl Job {
    pub fn retries_left(&self) -> bool {
        self.attempt < self.max_attempts
    }

    pub(crate) fn clear_claim(&mut self) {
        self.claimed_by = None;
        self.claimed_at = None;
        self.heartbeat_at = None;
    }

    /// Whether a worker declaring `capabilities` may run this job.
    pub fn eligible_for(&self, capabilities: &[String]) -> bool {
        self.required_capabilities
            .iter()
            .all(|required| capabilities.iter().any(|have| have == required))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Worker {
    pub worker_id: String,
    pub last_heartbeat: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_job: Option<String>,
    #[serde(default)]
    pub capabilities: Vec<String>,
}

impl Worker {
    /// Activity is judged at read time against the claim lease.
    pub fn is_active(&self, config: &QueueConfig, now_ms: u64) -> bool {
        now_ms.saturating_sub(self.last_heartbeat) < config.stale_claim_ms
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct QueueConfig {
    pub stale_claim_ms: u64,
    pub max_job_attempts: u32,
    pub heartbeat_interval_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            stale_claim_ms: 300_000,
            max_job_attempts: 3,
            heartbeat_interval_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueState {
    pub schema_version: u32,
    pub queue_id: String,
    pub created_at: u64,
    pub updated_at: u64,
    pub jobs: Vec<Job>,
    pub workers: Vec<Worker>,
    pub config: QueueConfig,
    pub status: QueueStatus,
}

impl QueueState {
    pub fn new(queue_id: impl Into<String>, config: QueueConfig, now_ms: u64) -> Self {
        Self {
            schema_version: QUEUE_SCHEMA_VERSION,
            queue_id: queue_id.into(),
            created_at: now_ms,
            updated_at: now_ms,
            jobs: Vec::new(),
            workers: Vec::new(),
            config,
            status: QueueStatus::Active,
        }
    }

    /// Structural checks applied to every state read from disk.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.config.stale_claim_ms == 0 {
            return Err("config.staleClaimMs must be positive".to_string());
        }
        if self.config.max_job_attempts == 0 {
            return Err("config.maxJobAttempts must be positive".to_string());
        }
        let mut seen = HashSet::new();
        for job in &self.jobs {
            if !seen.insert(job.job_id.as_str()) {
                return Err(format!("duplicate job id {}", job.job_id));
            }
            if job.max_attempts == 0 {
                return Err(format!("job {} has maxAttempts 0", job.job_id));
            }
            if job.attempt > job.max_attempts {
                return Err(format!(
                    "job {} attempt {} exceeds maxAttempts {}",
                    job.job_id, job.attempt, job.max_attempts
                ));
            }
            let claimed = job.status == JobStatus::Claimed;
            let has_claim = job.claimed_by.is_some() && job.claimed_at.is_some();
            let any_claim = job.claimed_by.is_some() || job.claimed_at.is_some();
            if claimed != has_claim || (!claimed && any_claim) {
                return Err(format!(
                    "job {} is {} but claim fields are inconsistent",
                    job.job_id, job.status
                ));
            }
            if job.status == JobStatus::Pending && !job.retries_left() {
                return Err(format!("job {} is PENDING with no attempts left", job.job_id));
            }
        }
        let mut workers = HashSet::new();
        for worker in &self.workers {
            if !workers.insert(worker.worker_id.as_str()) {
                return Err(format!("duplicate worker id {}", worker.worker_id));
            }
        }
        Ok(())
    }

    pub fn job(&self, job_id: &str) -> Option<&Job> {
        self.jobs.iter().find(|job| job.job_id == job_id)
    }

    pub fn job_mut(&mut self, job_id: &str) -> Option<&mut Job> {
        self.jobs.iter_mut().find(|job| job.job_id == job_id)
    }

    pub fn worker(&self, worker_id: &str) -> Option<&Worker> {
        self.workers.iter().find(|w| w.worker_id == worker_id)
    }

    /// Register `worker_id` if unknown and stamp its heartbeat.
    pub(crate) fn touch_worker(
        &mut self,
        worker_id: &str,
        capabilities: Option<&[String]>,
        now_ms: u64,
    ) -> &mut Worker {
        let index = match self.workers.iter().position(|w| w.worker_id == worker_id) {
            Some(index) => index,
            None => {
                self.workers.push(Worker {
                    worker_id: worker_id.to_string(),
                    last_heartbeat: now_ms,
                    current_job: None,
                    capabilities: Vec::new(),
                });
                self.workers.len() - 1
            }
        };
        let worker = &mut self.workers[index];
        worker.last_heartbeat = now_ms;
        if let Some(capabilities) = capabilities {
            worker.capabilities = capabilities.to_vec();
        }
        worker
    }

    pub(crate) fn release_worker_job(&mut self, worker_id: &str, job_id: &str) {
        if let Some(worker) = self.workers.iter_mut().find(|w| w.worker_id == worker_id) {
            if worker.current_job.as_deref() == Some(job_id) {
                worker.current_job = None;
            }
        }
    }

    /// Recompute the queue status from its jobs.
    pub(crate) fn refresh_status(&mut self) {
        let all_terminal = !self.jobs.is_empty() && self.jobs.iter().all(|j| j.status.is_terminal());
        self.status = if !all_terminal {
            QueueStatus::Active
        } else if self.jobs.iter().any(|j| j.status == JobStatus::Failed) {
            QueueStatus::Failed
        } else {
            QueueStatus::Completed
        };
    }

    pub fn counts(&self, stage: Option<&str>) -> StatusCounts {
        let mut counts = StatusCounts::default();
        for job in &self.jobs {
            if stage.map_or(true, |stage| job.stage_id == stage) {
                counts.add(job.status);
            }
        }
        counts
    }
}

/// Whether a claimed job's lease has lapsed.
///
/// Only CLAIMED jobs can be stale. The lease is measured from the last
/// heartbeat, or from the claim if no heartbeat was ever sent; a job with
/// neither timestamp cannot be judged and is never stale.
pub fn is_job_stale(job: &Job, config: &QueueConfig, now_ms: u64) -> bool {
    if job.status != JobStatus::Claimed {
        return false;
    }
    match job.heartbeat_at.or(job.claimed_at) {
        Some(last) => now_ms.saturating_sub(last) >= config.stale_claim_ms,
        None => false,
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub pending: usize,
    pub claimed: usize,
    pub done: usize,
    pub failed: usize,
}

impl StatusCounts {
    fn add(&mut self, status: JobStatus) {
        match status {
            JobStatus::Pending => self.pending += 1,
            JobStatus::Claimed => self.claimed += 1,
            JobStatus::Done => self.done += 1,
            JobStatus::Failed => self.failed += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.pending + self.claimed + self.done + self.failed
    }

    pub fn outstanding(&self) -> usize {
        self.pending + self.claimed
    }
}

/// A job to be enqueued.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewJob {
    #[serde(default)]
    pub job_id: Option<String>,
    pub stage_id: String,
    pub kind: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(default)]
    pub required_capabilities: Vec<String>,
    #[serde(default)]
    pub max_attempts: Option<u32>,
}

impl NewJob {
    pub fn new(stage_id: impl Into<String>, kind: impl Into<String>, payload: Value) -> Self {
        Self {
            job_id: None,
            stage_id: stage_id.into(),
            kind: kind.into(),
            payload,
            required_capabilities: Vec::new(),
            max_attempts: None,
        }
    }

    pub fn with_id(mut self, job_id: impl Into<String>) -> Self {
        self.job_id = Some(job_id.into());
        self
    }

    pub fn requiring(mut self, capability: impl Into<String>) -> Self {
        self.required_capabilities.push(capability.into());
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }
}

//! Lease-based durable job queue.
//!
//! One JSON document per (report, run) holds every job and worker. Each
//! operation takes the queue's lock file, loads the document, applies a single
//! mutation or query and, if anything changed, durably replaces the document
//! before releasing the lock. A failed operation writes nothing.
//!
//! ```text
//! PENDING --claim--> CLAIMED --complete--> DONE
//!                    CLAIMED --fail/reap, attempts left--> PENDING
//!                    CLAIMED --fail/reap, exhausted-----> FAILED
//! ```

mod model;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::clock::{Clock, SystemClock};
use crate::durable;
use crate::layout::{validate_component, QueuePaths, RuntimeLayout};
use crate::lock::{LockManager, ReleaseOutcome};
use crate::token::unique_token;
use crate::{Error, Result};

pub use model::{
    is_job_stale, Job, JobStatus, NewJob, QueueConfig, QueueState, QueueStatus, StatusCounts,
    Worker, QUEUE_SCHEMA_VERSION,
};

const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq)]
pub enum ClaimOutcome {
    Claimed(Job),
    /// Nothing PENDING matched the worker's capabilities. Not an error.
    NoEligibleJob,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReapReport {
    pub requeued: Vec<String>,
    pub failed: Vec<String>,
}

impl ReapReport {
    pub fn is_empty(&self) -> bool {
        self.requeued.is_empty() && self.failed.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueSummary {
    pub queue_id: String,
    pub status: QueueStatus,
    pub counts: StatusCounts,
    pub stages: BTreeMap<String, StatusCounts>,
    pub active_workers: Vec<String>,
    pub stale_workers: Vec<String>,
    pub stale_claims: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BarrierStatus {
    pub stage: Option<String>,
    /// No job in scope is PENDING or CLAIMED.
    pub satisfied: bool,
    pub counts: StatusCounts,
}

pub struct LeaseQueue {
    paths: QueuePaths,
    locks: LockManager,
    clock: Arc<dyn Clock>,
    lock_timeout: Duration,
}

impl LeaseQueue {
    pub fn open(layout: &RuntimeLayout, report: &str, run: &str, locks: LockManager) -> Result<Self> {
        Ok(Self {
            paths: layout.queue(report, run)?,
            locks,
            clock: Arc::new(SystemClock),
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        })
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn queue_id(&self) -> &str {
        &self.paths.queue_id
    }

    pub fn paths(&self) -> &QueuePaths {
        &self.paths
    }

    pub fn init(&self, config: QueueConfig) -> Result<QueueState> {
        if config.stale_claim_ms == 0 || config.max_job_attempts == 0 {
            return Err(Error::InvalidComponent {
                field: "queue_config",
                value: format!("{config:?}"),
            });
        }
        self.locked(|| {
            if self.paths.state.exists() {
                return Err(Error::QueueExists {
                    queue_id: self.paths.queue_id.clone(),
                });
            }
            let state = QueueState::new(&self.paths.queue_id, config, self.clock.now_ms());
            durable::write_json(&self.paths.state, &state)?;
            info!("initialized queue {}", self.paths.queue_id);
            Ok(state)
        })
    }

    /// Append jobs in the given order; returns their ids.
    pub fn enqueue(&self, jobs: Vec<NewJob>) -> Result<Vec<String>> {
        self.mutate(|state, now| {
            let mut ids = Vec::with_capacity(jobs.len());
            for new in jobs {
                let job_id = match new.job_id {
                    Some(id) => {
                        validate_component("job_id", &id)?;
                        id
                    }
                    None => format!("job-{}", &unique_token()[..12]),
                };
                if state.job(&job_id).is_some() || ids.contains(&job_id) {
                    return Err(Error::DuplicateJob(job_id));
                }
                let max_attempts = new.max_attempts.unwrap_or(state.config.max_job_attempts);
                if max_attempts == 0 {
                    return Err(Error::InvalidComponent {
                        field: "max_attempts",
                        value: "0".to_string(),
                    });
                }
                state.jobs.push(Job {
                    job_id: job_id.clone(),
                    stage_id: new.stage_id,
                    kind: new.kind,
                    status: JobStatus::Pending,
                    claimed_by: None,
                    claimed_at: None,
                    heartbeat_at: None,
                    attempt: 0,
                    max_attempts,
                    required_capabilities: new.required_capabilities,
                    result: None,
                    error: None,
                    completed_at: None,
                    payload: new.payload,
                });
                ids.push(job_id);
            }
            debug!("enqueued {} jobs on {} at {now}", ids.len(), state.queue_id);
            Ok(ids)
        })
    }

    /// Lease the first eligible PENDING job, in insertion order.
    pub fn claim(&self, worker_id: &str, capabilities: &[String]) -> Result<ClaimOutcome> {
        validate_component("worker_id", worker_id)?;
        self.mutate(|state, now| {
            state.touch_worker(worker_id, Some(capabilities), now);
            let Some(job) = state.jobs.iter_mut().find(|job| {
                job.status == JobStatus::Pending && job.retries_left() && job.eligible_for(capabilities)
            }) else {
                return Ok(ClaimOutcome::NoEligibleJob);
            };
            job.status = JobStatus::Claimed;
            job.claimed_by = Some(worker_id.to_string());
            job.claimed_at = Some(now);
            job.heartbeat_at = Some(now);
            job.attempt += 1;
            let claimed = job.clone();
            state.touch_worker(worker_id, None, now).current_job = Some(claimed.job_id.clone());
            debug!(
                "{} claimed {} (attempt {}/{})",
                worker_id, claimed.job_id, claimed.attempt, claimed.max_attempts
            );
            Ok(ClaimOutcome::Claimed(claimed))
        })
    }

    /// Renew the worker's liveness and, with a job id, that job's lease.
    pub fn heartbeat(&self, worker_id: &str, job_id: Option<&str>) -> Result<()> {
        validate_component("worker_id", worker_id)?;
        self.mutate(|state, now| {
            if let Some(job_id) = job_id {
                let job = owned_claim(state, worker_id, job_id)?;
                job.heartbeat_at = Some(now);
            }
            state.touch_worker(worker_id, None, now);
            Ok(())
        })
    }

    pub fn complete(&self, worker_id: &str, job_id: &str, result: Value) -> Result<Job> {
        self.mutate(|state, now| {
            let job = owned_claim(state, worker_id, job_id)?;
            job.status = JobStatus::Done;
            job.result = Some(result);
            job.error = None;
            job.completed_at = Some(now);
            job.clear_claim();
            let done = job.clone();
            state.release_worker_job(worker_id, job_id);
            state.touch_worker(worker_id, None, now);
            debug!("{worker_id} completed {job_id}");
            Ok(done)
        })
    }

    /// Record a failed attempt; the job returns to PENDING while attempts remain.
    pub fn fail(&self, worker_id: &str, job_id: &str, error: &str) -> Result<Job> {
        self.mutate(|state, now| {
            let job = owned_claim(state, worker_id, job_id)?;
            job.error = Some(error.to_string());
            job.clear_claim();
            if job.retries_left() {
                job.status = JobStatus::Pending;
            } else {
                job.status = JobStatus::Failed;
                job.completed_at = Some(now);
                warn!(
                    "job {job_id} failed permanently after {} attempts: {error}",
                    job.attempt
                );
            }
            let failed = job.clone();
            state.release_worker_job(worker_id, job_id);
            state.touch_worker(worker_id, None, now);
            Ok(failed)
        })
    }

    /// Reset every CLAIMED job whose lease lapsed; one write for the batch.
    pub fn reap(&self) -> Result<ReapReport> {
        self.mutate(|state, now| {
            let config = state.config;
            let mut report = ReapReport::default();
            let mut released = Vec::new();
            for job in state.jobs.iter_mut() {
                if !is_job_stale(job, &config, now) {
                    continue;
                }
                let last = job.heartbeat_at.or(job.claimed_at).unwrap_or(now);
                let owner = job.claimed_by.clone().unwrap_or_default();
                job.error = Some(format!(
                    "lease expired: no heartbeat for {}ms from {owner}",
                    now.saturating_sub(last)
                ));
                job.clear_claim();
                if job.retries_left() {
                    job.status = JobStatus::Pending;
                    report.requeued.push(job.job_id.clone());
                } else {
                    job.status = JobStatus::Failed;
                    job.completed_at = Some(now);
                    report.failed.push(job.job_id.clone());
                }
                released.push((owner, job.job_id.clone()));
            }
            for (owner, job_id) in &released {
                state.release_worker_job(owner, job_id);
            }
            if !report.is_empty() {
                info!(
                    "reaped {} stale claims on {} ({} requeued, {} failed)",
                    released.len(),
                    state.queue_id,
                    report.requeued.len(),
                    report.failed.len()
                );
            }
            Ok(report)
        })
    }

    pub fn status(&self) -> Result<QueueSummary> {
        self.query(|state, now| {
            let mut stages: BTreeMap<String, StatusCounts> = BTreeMap::new();
            for job in &state.jobs {
                stages.entry(job.stage_id.clone()).or_default();
            }
            for (stage, counts) in stages.iter_mut() {
                *counts = state.counts(Some(stage));
            }
            let (active, stale): (Vec<&Worker>, Vec<&Worker>) = state
                .workers
                .iter()
                .partition(|worker| worker.is_active(&state.config, now));
            QueueSummary {
                queue_id: state.queue_id.clone(),
                status: state.status,
                counts: state.counts(None),
                stages,
                active_workers: active.iter().map(|w| w.worker_id.clone()).collect(),
                stale_workers: stale.iter().map(|w| w.worker_id.clone()).collect(),
                stale_claims: state
                    .jobs
                    .iter()
                    .filter(|job| is_job_stale(job, &state.config, now))
                    .map(|job| job.job_id.clone())
                    .collect(),
            }
        })
    }

    /// Whether every job (optionally of one stage) reached DONE or FAILED.
    ///
    /// A stage with no jobs is trivially satisfied.
    pub fn barrier(&self, stage: Option<&str>) -> Result<BarrierStatus> {
        self.query(|state, _now| {
            let counts = state.counts(stage);
            BarrierStatus {
                stage: stage.map(str::to_string),
                satisfied: counts.outstanding() == 0,
                counts,
            }
        })
    }

    /// Poll [`LeaseQueue::barrier`] until satisfied or `timeout` elapses.
    ///
    /// Timing out is reported through `satisfied: false`, not as an error.
    pub fn barrier_wait(
        &self,
        stage: Option<&str>,
        timeout: Duration,
        poll: Duration,
    ) -> Result<BarrierStatus> {
        let started = Instant::now();
        loop {
            let status = self.barrier(stage)?;
            let waited = started.elapsed();
            if status.satisfied || waited >= timeout {
                return Ok(status);
            }
            std::thread::sleep(poll.min(timeout - waited));
        }
    }

    /// Unlocked read for inspection; may be momentarily stale.
    pub fn peek(&self) -> Result<Option<QueueState>> {
        match durable::read_json::<QueueState>(&self.paths.state)? {
            Some(state) => {
                self.check(&state)?;
                Ok(Some(state))
            }
            None => Ok(None),
        }
    }

    fn mutate<T>(&self, apply: impl FnOnce(&mut QueueState, u64) -> Result<T>) -> Result<T> {
        self.locked(|| {
            let mut state = self.load()?;
            let now = self.clock.now_ms();
            let value = apply(&mut state, now)?;
            state.refresh_status();
            state.updated_at = now;
            durable::write_json(&self.paths.state, &state)?;
            Ok(value)
        })
    }

    fn query<T>(&self, read: impl FnOnce(&QueueState, u64) -> T) -> Result<T> {
        self.locked(|| {
            let state = self.load()?;
            Ok(read(&state, self.clock.now_ms()))
        })
    }

    /// Run `f` under the queue lock. A lock that was broken while held is
    /// reported, since the write made under it may have raced another holder.
    fn locked<T>(&self, f: impl FnOnce() -> Result<T>) -> Result<T> {
        let guard = self.locks.acquire(&self.paths.lock, self.lock_timeout)?;
        let result = f();
        match guard.release() {
            Ok(ReleaseOutcome::Released) => {}
            Ok(ReleaseOutcome::Stolen { current_lock_id }) => warn!(
                "queue {} lock was broken while held (now {current_lock_id:?})",
                self.paths.queue_id
            ),
            Ok(ReleaseOutcome::Missing) => warn!(
                "queue {} lock vanished while held",
                self.paths.queue_id
            ),
            Err(err) if result.is_ok() => return Err(err),
            Err(err) => warn!("failed to release queue {} lock: {err}", self.paths.queue_id),
        }
        result
    }

    fn load(&self) -> Result<QueueState> {
        let state = durable::read_json::<QueueState>(&self.paths.state)?.ok_or_else(|| {
            Error::QueueNotFound {
                queue_id: self.paths.queue_id.clone(),
            }
        })?;
        self.check(&state)?;
        Ok(state)
    }

    fn check(&self, state: &QueueState) -> Result<()> {
        if state.schema_version != QUEUE_SCHEMA_VERSION {
            return Err(Error::UnsupportedVersion(state.schema_version));
        }
        if state.queue_id != self.paths.queue_id {
            return Err(Error::corrupt(
                &self.paths.state,
                format!("queue id {} does not match {}", state.queue_id, self.paths.queue_id),
            ));
        }
        state
            .validate()
            .map_err(|reason| Error::corrupt(&self.paths.state, reason))
    }
}

/// The job, provided it is CLAIMED by `worker_id`.
fn owned_claim<'a>(state: &'a mut QueueState, worker_id: &str, job_id: &str) -> Result<&'a mut Job> {
    let queue_id = state.queue_id.clone();
    let job = state.job_mut(job_id).ok_or_else(|| Error::JobNotFound {
        queue_id,
        job_id: job_id.to_string(),
    })?;
    if job.status != JobStatus::Claimed {
        return Err(Error::StateConflict {
            job_id: job_id.to_string(),
            expected: JobStatus::Claimed,
            actual: job.status,
            detail: match job.status {
                JobStatus::Done => "job already completed".to_string(),
                JobStatus::Failed => "job already failed".to_string(),
                _ => "job is not leased; it may have been reaped".to_string(),
            },
        });
    }
    if job.claimed_by.as_deref() != Some(worker_id) {
        return Err(Error::StateConflict {
            job_id: job_id.to_string(),
            expected: JobStatus::Claimed,
            actual: job.status,
            detail: format!(
                "claimed by {}, not {worker_id}",
                job.claimed_by.as_deref().unwrap_or("nobody")
            ),
        });
    }
    Ok(job)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::lock::LockConfig;
    use serde_json::json;
    use tempfile::{tempdir, TempDir};

    fn open(clock: &ManualClock) -> (TempDir, LeaseQueue) {
        let dir = tempdir().expect("tempdir");
        let layout = RuntimeLayout::new(dir.path());
        let queue = LeaseQueue::open(&layout, "report", "run1", LockManager::new(LockConfig::default()))
            .expect("open")
            .with_clock(Arc::new(clock.clone()));
        (dir, queue)
    }

    #[test]
    fn operations_before_init_are_not_found() {
        let clock = ManualClock::new(1_000);
        let (_dir, queue) = open(&clock);
        let err = queue.claim("w1", &[]).unwrap_err();
        assert!(matches!(err, Error::QueueNotFound { .. }));
        assert!(queue.peek().expect("peek").is_none());
    }

    #[test]
    fn lock_broken_while_held_is_left_to_its_new_holder() {
        let clock = ManualClock::new(1_000);
        let (_dir, queue) = open(&clock);
        let value = queue
            .locked(|| {
                let mut usurper =
                    crate::lock::read_record(&queue.paths.lock)?.expect("held lock record");
                usurper.lock_id = "usurper".to_string();
                durable::write_json(&queue.paths.lock, &usurper)?;
                Ok(7)
            })
            .expect("locked");
        assert_eq!(value, 7);
        let on_disk = crate::lock::read_record(&queue.paths.lock)
            .expect("read")
            .expect("record");
        assert_eq!(on_disk.lock_id, "usurper");
    }

    #[test]
    fn init_twice_is_rejected() {
        let clock = ManualClock::new(1_000);
        let (_dir, queue) = open(&clock);
        queue.init(QueueConfig::default()).expect("init");
        assert!(matches!(
            queue.init(QueueConfig::default()),
            Err(Error::QueueExists { .. })
        ));
    }

    #[test]
    fn duplicate_ids_leave_state_unchanged() {
        let clock = ManualClock::new(1_000);
        let (_dir, queue) = open(&clock);
        queue.init(QueueConfig::default()).expect("init");
        queue
            .enqueue(vec![NewJob::new("s1", "exec", json!(1)).with_id("a")])
            .expect("enqueue");
        let err = queue
            .enqueue(vec![
                NewJob::new("s1", "exec", json!(2)).with_id("b"),
                NewJob::new("s1", "exec", json!(3)).with_id("a"),
            ])
            .unwrap_err();
        assert!(matches!(err, Error::DuplicateJob(ref id) if id == "a"));
        let state = queue.peek().expect("peek").expect("state");
        assert_eq!(state.jobs.len(), 1);
    }

    #[test]
    fn claim_respects_capabilities_and_order() {
        let clock = ManualClock::new(1_000);
        let (_dir, queue) = open(&clock);
        queue.init(QueueConfig::default()).expect("init");
        queue
            .enqueue(vec![
                NewJob::new("s1", "train", json!({})).with_id("gpu-job").requiring("gpu"),
                NewJob::new("s1", "exec", json!({})).with_id("plain-1"),
                NewJob::new("s1", "exec", json!({})).with_id("plain-2"),
            ])
            .expect("enqueue");

        let ClaimOutcome::Claimed(job) = queue.claim("cpu-worker", &[]).expect("claim") else {
            panic!("expected a claim");
        };
        assert_eq!(job.job_id, "plain-1");
        assert_eq!(job.attempt, 1);
        assert_eq!(job.claimed_at, Some(1_000));

        let gpu = vec!["gpu".to_string()];
        let ClaimOutcome::Claimed(job) = queue.claim("gpu-worker", &gpu).expect("claim") else {
            panic!("expected a claim");
        };
        assert_eq!(job.job_id, "gpu-job");

        let state = queue.peek().expect("peek").expect("state");
        let worker = state.worker("gpu-worker").expect("worker");
        assert_eq!(worker.current_job.as_deref(), Some("gpu-job"));
        assert_eq!(worker.capabilities, gpu);
    }

    #[test]
    fn complete_pending_job_is_a_conflict() {
        let clock = ManualClock::new(1_000);
        let (_dir, queue) = open(&clock);
        queue.init(QueueConfig::default()).expect("init");
        queue
            .enqueue(vec![NewJob::new("s1", "exec", json!({})).with_id("a")])
            .expect("enqueue");
        let before = queue.peek().expect("peek").expect("state");
        let err = queue.complete("w1", "a", json!("ok")).unwrap_err();
        assert!(matches!(
            err,
            Error::StateConflict {
                expected: JobStatus::Claimed,
                actual: JobStatus::Pending,
                ..
            }
        ));
        assert_eq!(queue.peek().expect("peek").expect("state"), before);
    }

    #[test]
    fn only_the_owner_may_complete() {
        let clock = ManualClock::new(1_000);
        let (_dir, queue) = open(&clock);
        queue.init(QueueConfig::default()).expect("init");
        queue
            .enqueue(vec![NewJob::new("s1", "exec", json!({})).with_id("a")])
            .expect("enqueue");
        queue.claim("w1", &[]).expect("claim");
        let err = queue.complete("w2", "a", json!(null)).unwrap_err();
        assert!(matches!(err, Error::StateConflict { .. }));
        let done = queue.complete("w1", "a", json!({"rows": 3})).expect("complete");
        assert_eq!(done.status, JobStatus::Done);
        assert_eq!(done.claimed_by, None);
        let summary = queue.status().expect("status");
        assert_eq!(summary.status, QueueStatus::Completed);
        assert_eq!(summary.counts.done, 1);
    }

    #[test]
    fn heartbeat_for_unowned_job_is_rejected() {
        let clock = ManualClock::new(1_000);
        let (_dir, queue) = open(&clock);
        queue.init(QueueConfig::default()).expect("init");
        queue
            .enqueue(vec![NewJob::new("s1", "exec", json!({})).with_id("a")])
            .expect("enqueue");
        queue.heartbeat("w1", None).expect("bare heartbeat registers worker");
        assert!(matches!(
            queue.heartbeat("w1", Some("a")),
            Err(Error::StateConflict { .. })
        ));
        assert!(matches!(
            queue.heartbeat("w1", Some("missing")),
            Err(Error::JobNotFound { .. })
        ));
    }

    #[test]
    fn reap_requeues_only_stale_claims() {
        let clock = ManualClock::new(0);
        let (_dir, queue) = open(&clock);
        queue.init(QueueConfig::default()).expect("init");
        queue
            .enqueue(vec![
                NewJob::new("s1", "exec", json!({})).with_id("stale"),
                NewJob::new("s1", "exec", json!({})).with_id("fresh"),
            ])
            .expect("enqueue");
        queue.claim("w1", &[]).expect("claim stale");
        clock.advance(Duration::from_secs(200));
        queue.claim("w2", &[]).expect("claim fresh");
        clock.advance(Duration::from_secs(150));

        let report = queue.reap().expect("reap");
        assert_eq!(report.requeued, vec!["stale".to_string()]);
        assert!(report.failed.is_empty());

        let state = queue.peek().expect("peek").expect("state");
        let stale = state.job("stale").expect("job");
        assert_eq!(stale.status, JobStatus::Pending);
        assert_eq!(stale.claimed_by, None);
        assert!(stale.error.as_deref().unwrap_or("").contains("lease expired"));
        assert_eq!(state.worker("w1").expect("w1").current_job, None);
        assert_eq!(state.job("fresh").expect("job").status, JobStatus::Claimed);

        assert!(matches!(
            queue.complete("w1", "stale", json!(null)),
            Err(Error::StateConflict { .. })
        ));
    }

    #[test]
    fn retries_exhaust_into_failed() {
        let clock = ManualClock::new(0);
        let (_dir, queue) = open(&clock);
        queue
            .init(QueueConfig {
                max_job_attempts: 2,
                ..QueueConfig::default()
            })
            .expect("init");
        queue
            .enqueue(vec![NewJob::new("s1", "exec", json!({})).with_id("a")])
            .expect("enqueue");
        queue.claim("w1", &[]).expect("claim");
        let job = queue.fail("w1", "a", "boom").expect("fail");
        assert_eq!(job.status, JobStatus::Pending);
        queue.claim("w1", &[]).expect("claim again");
        let job = queue.fail("w1", "a", "boom again").expect("fail");
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.attempt, 2);
        assert_eq!(queue.claim("w1", &[]).expect("claim"), ClaimOutcome::NoEligibleJob);
        assert_eq!(queue.status().expect("status").status, QueueStatus::Failed);
    }

    #[test]
    fn barrier_scopes_to_stage() {
        let clock = ManualClock::new(0);
        let (_dir, queue) = open(&clock);
        queue.init(QueueConfig::default()).expect("init");
        queue
            .enqueue(vec![
                NewJob::new("load", "exec", json!({})).with_id("l1"),
                NewJob::new("fit", "exec", json!({})).with_id("f1"),
            ])
            .expect("enqueue");
        queue.claim("w1", &[]).expect("claim");
        queue.complete("w1", "l1", json!(null)).expect("complete");

        assert!(queue.barrier(Some("load")).expect("barrier").satisfied);
        let all = queue.barrier(None).expect("barrier");
        assert!(!all.satisfied);
        assert_eq!(all.counts.pending, 1);
        let waited = queue
            .barrier_wait(None, Duration::from_millis(30), Duration::from_millis(5))
            .expect("wait");
        assert!(!waited.satisfied);
    }
}

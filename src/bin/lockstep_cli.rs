use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use lockstep::lock::LockManager;
use lockstep::queue::{ClaimOutcome, LeaseQueue, NewJob, QueueConfig};
use lockstep::supervisor::{MetaRead, Supervisor};
use lockstep::{Config, Controller, RuntimeLayout};
use serde_json::{json, Value};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

/// Exit status for "busy, retry later" (EX_TEMPFAIL).
const EXIT_RETRY: i32 = 75;

#[derive(Parser)]
#[command(name = "lockstep", version, about = "Lock, queue and worker tooling")]
struct Cli {
    /// JSON config file; LOCKSTEP_* variables still override it
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Runtime root (overrides config and LOCKSTEP_RUNTIME_DIR)
    #[arg(long = "runtime-dir", global = true)]
    runtime_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Lease queue operations
    Queue {
        #[command(flatten)]
        target: QueueTarget,
        #[command(subcommand)]
        action: QueueAction,
    },
    /// Inspect a lock file without touching it
    Lock {
        path: PathBuf,
    },
    /// Session worker lifecycle
    Bridge {
        #[arg(long)]
        session: String,
        #[command(subcommand)]
        action: BridgeAction,
    },
}

#[derive(Args)]
struct QueueTarget {
    #[arg(long)]
    report: String,
    #[arg(long)]
    run: String,
}

#[derive(Subcommand)]
enum QueueAction {
    Init {
        #[arg(long)]
        stale_claim_ms: Option<u64>,
        #[arg(long)]
        max_attempts: Option<u32>,
    },
    /// Enqueue one job, or a JSON array of jobs from --file
    Enqueue {
        #[arg(long, required_unless_present = "file")]
        stage: Option<String>,
        #[arg(long, default_value = "task")]
        kind: String,
        #[arg(long)]
        job_id: Option<String>,
        /// Job payload as JSON
        #[arg(long)]
        payload: Option<String>,
        #[arg(long = "require")]
        require: Vec<String>,
        #[arg(long, conflicts_with = "stage")]
        file: Option<PathBuf>,
    },
    Claim {
        #[arg(long)]
        worker: String,
        #[arg(long = "cap")]
        capabilities: Vec<String>,
    },
    Heartbeat {
        #[arg(long)]
        worker: String,
        #[arg(long)]
        job: Option<String>,
    },
    Complete {
        #[arg(long)]
        worker: String,
        #[arg(long)]
        job: String,
        /// Result as JSON
        #[arg(long)]
        result: Option<String>,
    },
    Fail {
        #[arg(long)]
        worker: String,
        #[arg(long)]
        job: String,
        #[arg(long)]
        error: String,
    },
    Reap,
    Status,
    Barrier {
        #[arg(long)]
        stage: Option<String>,
        /// Poll until satisfied or this many milliseconds pass
        #[arg(long, default_value_t = 0)]
        wait_ms: u64,
        #[arg(long, default_value_t = 500)]
        poll_ms: u64,
    },
}

#[derive(Subcommand)]
enum BridgeAction {
    Ensure {
        #[arg(long, default_value = ".")]
        workdir: PathBuf,
    },
    Terminate {
        #[arg(long)]
        grace_ms: Option<u64>,
    },
    Status,
    /// Ensure the worker and send it one RPC
    Call {
        #[arg(long)]
        method: String,
        /// Params as a JSON object
        #[arg(long)]
        params: Option<String>,
        #[arg(long, default_value_t = 30_000)]
        timeout_ms: u64,
        #[arg(long, default_value = ".")]
        workdir: PathBuf,
    },
}

fn main() {
    env_logger::init();
    if let Err(err) = run() {
        eprintln!("error: {err:#}");
        let retryable = err
            .downcast_ref::<lockstep::Error>()
            .is_some_and(lockstep::Error::is_retryable);
        std::process::exit(if retryable { EXIT_RETRY } else { 1 });
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    let mut config = match &cli.config {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => Config::from_env().context("invalid LOCKSTEP_* environment")?,
    };
    if let Some(dir) = cli.runtime_dir {
        config.runtime_root = dir;
    }
    let output = match cli.command {
        Commands::Queue { target, action } => cmd_queue(&config, &target, action)?,
        Commands::Lock { path } => cmd_lock(&config, &path)?,
        Commands::Bridge { session, action } => cmd_bridge(&config, &session, action)?,
    };
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn cmd_queue(config: &Config, target: &QueueTarget, action: QueueAction) -> Result<Value> {
    let layout = RuntimeLayout::new(&config.runtime_root);
    let queue = LeaseQueue::open(&layout, &target.report, &target.run, LockManager::new(config.lock))?
        .with_lock_timeout(config.queue_lock_timeout);
    let value = match action {
        QueueAction::Init {
            stale_claim_ms,
            max_attempts,
        } => {
            let queue_config = QueueConfig {
                stale_claim_ms: stale_claim_ms.unwrap_or(config.queue.stale_claim_ms),
                max_job_attempts: max_attempts.unwrap_or(config.queue.max_job_attempts),
                ..config.queue
            };
            let state = queue
                .init(queue_config)
                .with_context(|| format!("failed to initialize {}", queue.queue_id()))?;
            json!({ "queueId": state.queue_id, "config": state.config })
        }
        QueueAction::Enqueue {
            stage,
            kind,
            job_id,
            payload,
            require,
            file,
        } => {
            let jobs = match (file, stage) {
                (Some(file), _) => {
                    let bytes = std::fs::read(&file)
                        .with_context(|| format!("failed to read {}", file.display()))?;
                    serde_json::from_slice::<Vec<NewJob>>(&bytes)
                        .with_context(|| format!("{} is not a JSON array of jobs", file.display()))?
                }
                (None, Some(stage)) => {
                    let mut job = NewJob::new(stage, kind, parse_json("payload", payload)?);
                    job.job_id = job_id;
                    job.required_capabilities = require;
                    vec![job]
                }
                (None, None) => anyhow::bail!("either --stage or --file is required"),
            };
            json!({ "jobIds": queue.enqueue(jobs)? })
        }
        QueueAction::Claim {
            worker,
            capabilities,
        } => match queue.claim(&worker, &capabilities)? {
            ClaimOutcome::Claimed(job) => json!({ "claimed": true, "job": job }),
            ClaimOutcome::NoEligibleJob => json!({ "claimed": false }),
        },
        QueueAction::Heartbeat { worker, job } => {
            queue.heartbeat(&worker, job.as_deref())?;
            json!({ "ok": true })
        }
        QueueAction::Complete {
            worker,
            job,
            result,
        } => json!(queue.complete(&worker, &job, parse_json("result", result)?)?),
        QueueAction::Fail { worker, job, error } => json!(queue.fail(&worker, &job, &error)?),
        QueueAction::Reap => json!(queue.reap()?),
        QueueAction::Status => json!(queue.status()?),
        QueueAction::Barrier {
            stage,
            wait_ms,
            poll_ms,
        } => {
            let status = if wait_ms == 0 {
                queue.barrier(stage.as_deref())?
            } else {
                queue.barrier_wait(
                    stage.as_deref(),
                    Duration::from_millis(wait_ms),
                    Duration::from_millis(poll_ms.max(1)),
                )?
            };
            json!(status)
        }
    };
    Ok(value)
}

fn cmd_lock(config: &Config, path: &Path) -> Result<Value> {
    let manager = LockManager::new(config.lock);
    let Some(inspection) = manager
        .inspect(path)
        .with_context(|| format!("failed to read lock {}", path.display()))?
    else {
        return Ok(json!({ "path": path, "held": false }));
    };
    let record = &inspection.record;
    Ok(json!({
        "path": path,
        "held": true,
        "record": record,
        "acquiredAt": render_ms(record.acquired_at),
        "verdict": format!("{:?}", inspection.verdict),
        "breakable": inspection.verdict.is_breakable(),
    }))
}

fn cmd_bridge(config: &Config, session: &str, action: BridgeAction) -> Result<Value> {
    let supervisor = || {
        Supervisor::new(
            RuntimeLayout::new(&config.runtime_root),
            config.supervisor.clone(),
            LockManager::new(config.lock),
        )
    };
    let value = match action {
        BridgeAction::Ensure { workdir } => {
            let meta = supervisor()
                .ensure(session, &workdir)
                .with_context(|| format!("failed to ensure worker for {session}"))?;
            json!({ "meta": meta, "startedAt": render_ms(meta.started_at) })
        }
        BridgeAction::Terminate { grace_ms } => {
            let grace = grace_ms
                .map(Duration::from_millis)
                .unwrap_or(config.supervisor.grace_period);
            json!(supervisor().terminate(session, grace)?)
        }
        BridgeAction::Status => {
            let status = supervisor().status(session)?;
            let meta = match &status.meta {
                MetaRead::Missing => json!(null),
                MetaRead::Valid(meta) => {
                    json!({ "record": meta, "startedAt": render_ms(meta.started_at) })
                }
                MetaRead::Poisoned(reason) => json!({ "poisoned": reason }),
            };
            json!({
                "sessionId": status.paths.session_id,
                "socket": status.paths.socket,
                "endpointReady": status.endpoint_ready,
                "liveness": status.liveness.map(|liveness| format!("{liveness:?}")),
                "meta": meta,
            })
        }
        BridgeAction::Call {
            method,
            params,
            timeout_ms,
            workdir,
        } => {
            let params = params.map(|raw| parse_json("params", Some(raw))).transpose()?;
            let controller = Controller::new(supervisor(), workdir);
            controller.call(session, &method, params, Duration::from_millis(timeout_ms))?
        }
    };
    Ok(value)
}

fn parse_json(what: &str, raw: Option<String>) -> Result<Value> {
    match raw {
        Some(raw) => serde_json::from_str(&raw).with_context(|| format!("--{what} is not valid JSON")),
        None => Ok(Value::Null),
    }
}

fn render_ms(epoch_ms: u64) -> String {
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(epoch_ms) * 1_000_000)
        .ok()
        .and_then(|at| at.format(&Rfc3339).ok())
        .unwrap_or_else(|| epoch_ms.to_string())
}

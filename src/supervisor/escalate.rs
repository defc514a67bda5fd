use std::time::{Duration, Instant};

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use super::signal::{signal_group, Signal};
use crate::identity::{Liveness, ProcessHandle, ProcessIdentity};

/// One rung of the termination ladder: send `signal`, then wait up to `wait`
/// for the process to be confirmed gone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EscalationStep {
    pub signal: Signal,
    pub wait: Duration,
}

/// Ordered termination steps. Signals strictly increase in strength, so an
/// escalation never goes back to a weaker signal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EscalationPlan {
    steps: Vec<EscalationStep>,
    poll: Duration,
}

impl EscalationPlan {
    /// SIGINT for `grace`, SIGTERM for half of it, then SIGKILL for `kill_wait`.
    pub fn standard(grace: Duration, kill_wait: Duration) -> Self {
        Self {
            steps: vec![
                EscalationStep {
                    signal: Signal::Interrupt,
                    wait: grace,
                },
                EscalationStep {
                    signal: Signal::Terminate,
                    wait: grace / 2,
                },
                EscalationStep {
                    signal: Signal::Kill,
                    wait: kill_wait,
                },
            ],
            poll: Duration::from_millis(50),
        }
    }

    /// Straight to SIGKILL, for orphans that are already known to be broken.
    pub fn kill_only(kill_wait: Duration) -> Self {
        Self {
            steps: vec![EscalationStep {
                signal: Signal::Kill,
                wait: kill_wait,
            }],
            poll: Duration::from_millis(50),
        }
    }

    /// Build a custom plan; steps out of strength order are dropped.
    pub fn new(steps: Vec<EscalationStep>, poll: Duration) -> Self {
        let mut ordered: Vec<EscalationStep> = Vec::with_capacity(steps.len());
        for step in steps {
            if ordered.last().map_or(true, |last| step.signal > last.signal) {
                ordered.push(step);
            }
        }
        Self {
            steps: ordered,
            poll,
        }
    }

    pub fn steps(&self) -> &[EscalationStep] {
        &self.steps
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TerminatedBy {
    /// Gone before any signal was sent.
    AlreadyDead,
    Interrupt,
    Terminate,
    Kill,
    /// Every step ran and death was never confirmed.
    Unconfirmed,
}

impl From<Signal> for TerminatedBy {
    fn from(signal: Signal) -> Self {
        match signal {
            Signal::Interrupt => TerminatedBy::Interrupt,
            Signal::Terminate => TerminatedBy::Terminate,
            Signal::Kill => TerminatedBy::Kill,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EscalationOutcome {
    pub terminated_by: TerminatedBy,
    pub signals_sent: Vec<Signal>,
    pub elapsed: Duration,
}

/// Walk `plan` against `target` until the process is confirmed gone.
///
/// "Gone" means the identity probe no longer sees the recorded process: the
/// pid is free or belongs to a different process. A bare existence check is
/// never used, so a recycled pid is not mistaken for a survivor. Signal
/// failures are logged and the ladder continues.
pub fn run_escalation(
    target: ProcessHandle,
    plan: &EscalationPlan,
    identity: &dyn ProcessIdentity,
) -> EscalationOutcome {
    let started = Instant::now();
    let gone = || {
        matches!(
            identity.probe(target.pid, target.start_time),
            Liveness::Gone | Liveness::Reused
        )
    };
    let mut signals_sent = Vec::new();
    if gone() {
        return EscalationOutcome {
            terminated_by: TerminatedBy::AlreadyDead,
            signals_sent,
            elapsed: started.elapsed(),
        };
    }
    for step in plan.steps() {
        if step.signal > Signal::Interrupt {
            warn!("escalating pid {} to {}", target.pid, step.signal);
        }
        match signal_group(target.pid, step.signal) {
            Ok(true) => {}
            Ok(false) => debug!("pid {} vanished before {}", target.pid, step.signal),
            Err(err) => warn!("failed to send {} to pid {}: {err}", step.signal, target.pid),
        }
        signals_sent.push(step.signal);
        let deadline = Instant::now() + step.wait;
        loop {
            if gone() {
                return EscalationOutcome {
                    terminated_by: step.signal.into(),
                    signals_sent,
                    elapsed: started.elapsed(),
                };
            }
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            std::thread::sleep(plan.poll.min(deadline - now));
        }
    }
    warn!(
        "pid {} still present after {:?}; giving up on confirmation",
        target.pid,
        started.elapsed()
    );
    EscalationOutcome {
        terminated_by: TerminatedBy::Unconfirmed,
        signals_sent,
        elapsed: started.elapsed(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_plan_is_monotonic() {
        let plan = EscalationPlan::standard(Duration::from_secs(4), Duration::from_secs(1));
        let signals: Vec<Signal> = plan.steps().iter().map(|s| s.signal).collect();
        assert_eq!(signals, vec![Signal::Interrupt, Signal::Terminate, Signal::Kill]);
        assert_eq!(plan.steps()[1].wait, Duration::from_secs(2));
    }

    #[test]
    fn custom_plan_drops_weaker_followups() {
        let plan = EscalationPlan::new(
            vec![
                EscalationStep {
                    signal: Signal::Terminate,
                    wait: Duration::from_millis(10),
                },
                EscalationStep {
                    signal: Signal::Interrupt,
                    wait: Duration::from_millis(10),
                },
                EscalationStep {
                    signal: Signal::Kill,
                    wait: Duration::from_millis(10),
                },
            ],
            Duration::from_millis(5),
        );
        let signals: Vec<Signal> = plan.steps().iter().map(|s| s.signal).collect();
        assert_eq!(signals, vec![Signal::Terminate, Signal::Kill]);
    }

    #[test]
    fn dead_target_needs_no_signal() {
        let identity = crate::identity::detect();
        let outcome = run_escalation(
            ProcessHandle::new(i32::MAX - 3, Some(1)),
            &EscalationPlan::standard(Duration::from_millis(10), Duration::from_millis(10)),
            identity.as_ref(),
        );
        assert_eq!(outcome.terminated_by, TerminatedBy::AlreadyDead);
        assert!(outcome.signals_sent.is_empty());
    }
}

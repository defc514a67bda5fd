use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::identity::{validate_pid, Liveness, ProcessHandle, ProcessIdentity};
use crate::token::unique_token;

/// Contents of a lock file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockRecord {
    pub lock_id: String,
    pub owner_pid: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_start_time: Option<u64>,
    pub hostname: String,
    /// Milliseconds since the UNIX epoch.
    pub acquired_at: u64,
}

impl LockRecord {
    pub fn for_current_process(identity: &dyn ProcessIdentity, now_ms: u64) -> Self {
        let me = ProcessHandle::current(identity);
        Self {
            lock_id: unique_token(),
            owner_pid: me.pid,
            owner_start_time: me.start_time,
            hostname: crate::identity::hostname().to_string(),
            acquired_at: now_ms,
        }
    }

    pub fn owner(&self) -> ProcessHandle {
        ProcessHandle::new(self.owner_pid, self.owner_start_time)
    }

    pub fn age(&self, now_ms: u64) -> Duration {
        Duration::from_millis(now_ms.saturating_sub(self.acquired_at))
    }
}

/// Thresholds that decide when someone else's lock may be broken.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StalePolicy {
    /// Minimum age before a same-host lock with a dead owner is breakable.
    pub stale_after: Duration,
    /// Minimum age before a lock written on another host is breakable.
    pub cross_host_stale_after: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StaleReason {
    OwnerGone,
    PidReused,
    InvalidOwnerPid,
    ForeignHostExpired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StaleVerdict {
    /// Younger than the threshold; never broken regardless of the owner.
    Young { age: Duration },
    OwnerAlive,
    /// The owner pid exists but its identity cannot be confirmed.
    OwnerUnverifiable,
    /// Written on another host and not yet past the cross-host threshold.
    ForeignHost { age: Duration },
    /// This platform cannot verify identity, so nothing is broken automatically.
    BreakingDisabled,
    Stale { age: Duration, reason: StaleReason },
}

impl StaleVerdict {
    pub fn is_breakable(&self) -> bool {
        matches!(self, StaleVerdict::Stale { .. })
    }
}

impl StalePolicy {
    pub fn judge(
        &self,
        record: &LockRecord,
        now_ms: u64,
        local_host: &str,
        identity: &dyn ProcessIdentity,
    ) -> StaleVerdict {
        let age = record.age(now_ms);
        if record.hostname != local_host {
            if age >= self.cross_host_stale_after {
                return StaleVerdict::Stale {
                    age,
                    reason: StaleReason::ForeignHostExpired,
                };
            }
            return StaleVerdict::ForeignHost { age };
        }
        if age < self.stale_after {
            return StaleVerdict::Young { age };
        }
        if !identity.verifies_start_time() {
            return StaleVerdict::BreakingDisabled;
        }
        let pid = match validate_pid(i64::from(record.owner_pid)) {
            Ok(pid) => pid,
            Err(_) => {
                return StaleVerdict::Stale {
                    age,
                    reason: StaleReason::InvalidOwnerPid,
                }
            }
        };
        match identity.probe(pid, record.owner_start_time) {
            Liveness::Same => StaleVerdict::OwnerAlive,
            Liveness::Unverifiable => StaleVerdict::OwnerUnverifiable,
            Liveness::Reused => StaleVerdict::Stale {
                age,
                reason: StaleReason::PidReused,
            },
            Liveness::Gone => StaleVerdict::Stale {
                age,
                reason: StaleReason::OwnerGone,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct FakeIdentity {
        live_start: Option<u64>,
        verifies: bool,
    }

    impl ProcessIdentity for FakeIdentity {
        fn name(&self) -> &'static str {
            "fake"
        }

        fn start_time_of(&self, _pid: i32) -> Option<u64> {
            self.live_start
        }

        fn verifies_start_time(&self) -> bool {
            self.verifies
        }

        fn exists(&self, _pid: i32) -> bool {
            self.live_start.is_some()
        }
    }

    const POLICY: StalePolicy = StalePolicy {
        stale_after: Duration::from_millis(60_000),
        cross_host_stale_after: Duration::from_millis(600_000),
    };

    fn record(acquired_at: u64, start: Option<u64>, host: &str) -> LockRecord {
        LockRecord {
            lock_id: "abc".to_string(),
            owner_pid: 4242,
            owner_start_time: start,
            hostname: host.to_string(),
            acquired_at,
        }
    }

    #[test]
    fn old_lock_with_reused_pid_is_breakable() {
        let identity = FakeIdentity {
            live_start: Some(999),
            verifies: true,
        };
        let verdict = POLICY.judge(&record(0, Some(111), "here"), 70_000, "here", &identity);
        assert_eq!(
            verdict,
            StaleVerdict::Stale {
                age: Duration::from_millis(70_000),
                reason: StaleReason::PidReused
            }
        );
    }

    #[test]
    fn young_lock_is_never_breakable() {
        let identity = FakeIdentity {
            live_start: None,
            verifies: true,
        };
        let verdict = POLICY.judge(&record(10_000, Some(111), "here"), 69_999, "here", &identity);
        assert!(matches!(verdict, StaleVerdict::Young { .. }));
        assert!(!verdict.is_breakable());
    }

    #[test]
    fn live_owner_holds_old_lock() {
        let identity = FakeIdentity {
            live_start: Some(111),
            verifies: true,
        };
        let verdict = POLICY.judge(&record(0, Some(111), "here"), 500_000, "here", &identity);
        assert_eq!(verdict, StaleVerdict::OwnerAlive);
    }

    #[test]
    fn record_without_start_time_needs_owner_gone() {
        let alive = FakeIdentity {
            live_start: Some(5),
            verifies: true,
        };
        let verdict = POLICY.judge(&record(0, None, "here"), 90_000, "here", &alive);
        assert_eq!(verdict, StaleVerdict::OwnerUnverifiable);

        let gone = FakeIdentity {
            live_start: None,
            verifies: true,
        };
        let verdict = POLICY.judge(&record(0, None, "here"), 90_000, "here", &gone);
        assert!(verdict.is_breakable());
    }

    #[test]
    fn foreign_host_waits_for_larger_threshold() {
        let identity = FakeIdentity {
            live_start: None,
            verifies: true,
        };
        let verdict = POLICY.judge(&record(0, Some(1), "elsewhere"), 70_000, "here", &identity);
        assert!(matches!(verdict, StaleVerdict::ForeignHost { .. }));
        let verdict = POLICY.judge(&record(0, Some(1), "elsewhere"), 600_000, "here", &identity);
        assert!(verdict.is_breakable());
    }

    #[test]
    fn breaking_disabled_without_identity_support() {
        let identity = FakeIdentity {
            live_start: None,
            verifies: false,
        };
        let verdict = POLICY.judge(&record(0, Some(1), "here"), 10_000_000, "here", &identity);
        assert_eq!(verdict, StaleVerdict::BreakingDisabled);
    }

    #[test]
    fn record_serializes_camel_case() {
        let json = serde_json::to_value(record(5, Some(7), "h")).expect("json");
        assert_eq!(json["lockId"], "abc");
        assert_eq!(json["ownerPid"], 4242);
        assert_eq!(json["ownerStartTime"], 7);
        assert_eq!(json["acquiredAt"], 5);
    }
}

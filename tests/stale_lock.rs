use std::sync::Arc;
use std::time::Duration;

use lockstep::clock::{Clock, ManualClock, SystemClock};
use lockstep::identity::{self, ExistenceOnlyIdentity, ProcessHandle};
use lockstep::lock::{read_record, LockConfig, LockManager, LockRecord, StaleReason, StaleVerdict};
use lockstep::Error;
use tempfile::tempdir;

const DEAD_PID: i32 = i32::MAX - 7;

fn plant(path: &std::path::Path, record: &LockRecord) {
    std::fs::write(path, serde_json::to_vec(record).expect("json")).expect("plant lock");
}

fn record(owner_pid: i32, owner_start_time: Option<u64>, acquired_at: u64) -> LockRecord {
    LockRecord {
        lock_id: format!("planted-{owner_pid}-{acquired_at}"),
        owner_pid,
        owner_start_time,
        hostname: identity::hostname().to_string(),
        acquired_at,
    }
}

fn manager(clock: Arc<ManualClock>) -> LockManager {
    LockManager::new(LockConfig {
        retry_delay: Duration::from_millis(5),
        ..LockConfig::default()
    })
    .with_clock(clock)
}

#[test]
fn old_lock_of_dead_owner_is_broken() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("state.lock");
    let now = SystemClock.now_ms();
    plant(&path, &record(DEAD_PID, Some(12345), now - 120_000));

    let locks = manager(Arc::new(ManualClock::new(now)));
    let guard = locks
        .acquire(&path, Duration::from_secs(2))
        .expect("stale lock is broken");
    let on_disk = read_record(&path).expect("read").expect("record");
    assert_eq!(on_disk.lock_id, guard.lock_id());
    assert_eq!(on_disk.owner_pid, std::process::id() as i32);
}

#[test]
fn young_lock_blocks_until_it_ages() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("state.lock");
    let start = 1_000_000;
    plant(&path, &record(DEAD_PID, Some(12345), start));

    let clock = Arc::new(ManualClock::new(start + 30_000));
    let locks = manager(Arc::clone(&clock));
    let err = locks
        .acquire(&path, Duration::from_millis(60))
        .unwrap_err();
    assert!(matches!(err, Error::Contention { holder_pid: Some(DEAD_PID), .. }));

    clock.advance(Duration::from_secs(40));
    locks
        .acquire(&path, Duration::from_secs(1))
        .expect("aged lock is broken");
}

#[test]
fn pid_reuse_makes_an_old_lock_breakable() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("state.lock");
    let identity = identity::detect();
    if !identity.verifies_start_time() {
        return;
    }
    // Our own pid, but recorded with a start time that is not ours.
    let me = ProcessHandle::current(identity.as_ref());
    let foreign_start = me.start_time.map(|t| t + 1);
    let start = 5_000_000;
    plant(&path, &record(me.pid, foreign_start, start));

    let locks = manager(Arc::new(ManualClock::new(start + 70_000)));
    let inspection = locks.inspect(&path).expect("inspect").expect("present");
    assert_eq!(
        inspection.verdict,
        StaleVerdict::Stale {
            age: Duration::from_millis(70_000),
            reason: StaleReason::PidReused,
        }
    );
    locks
        .acquire(&path, Duration::from_secs(1))
        .expect("reused pid lock is broken");
}

#[test]
fn live_owner_is_never_broken() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("state.lock");
    let identity = identity::detect();
    let start = 5_000_000;
    let mut mine = LockRecord::for_current_process(identity.as_ref(), start);
    mine.lock_id = "held-by-live-owner".to_string();
    plant(&path, &mine);

    let locks = manager(Arc::new(ManualClock::new(start + 3_600_000)));
    assert!(locks.acquire(&path, Duration::from_millis(60)).is_err());
    assert_eq!(
        read_record(&path).expect("read").expect("record").lock_id,
        "held-by-live-owner"
    );
}

#[test]
fn existence_only_platforms_never_break_locks() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("state.lock");
    let start = 1_000_000;
    plant(&path, &record(DEAD_PID, None, start));

    let locks = manager(Arc::new(ManualClock::new(start + 3_600_000)))
        .with_identity(Arc::new(ExistenceOnlyIdentity));
    let inspection = locks.inspect(&path).expect("inspect").expect("present");
    assert_eq!(inspection.verdict, StaleVerdict::BreakingDisabled);
    assert!(locks.acquire(&path, Duration::from_millis(40)).is_err());
}

#[test]
fn foreign_host_lock_waits_for_cross_host_threshold() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("state.lock");
    let start = 1_000_000;
    let mut foreign = record(DEAD_PID, Some(1), start);
    foreign.hostname = format!("{}-elsewhere", identity::hostname());
    plant(&path, &foreign);

    let clock = Arc::new(ManualClock::new(start + 120_000));
    let locks = manager(Arc::clone(&clock));
    assert!(locks.acquire(&path, Duration::from_millis(40)).is_err());

    clock.advance(Duration::from_secs(600));
    locks
        .acquire(&path, Duration::from_secs(1))
        .expect("expired foreign lock is broken");
}

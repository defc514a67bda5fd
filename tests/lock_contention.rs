use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use lockstep::lock::{LockConfig, LockManager, ReleaseOutcome};
use lockstep::Error;
use tempfile::tempdir;

fn manager() -> LockManager {
    LockManager::new(LockConfig {
        retry_delay: Duration::from_millis(2),
        ..LockConfig::default()
    })
}

#[test]
fn concurrent_acquirers_never_overlap() {
    let dir = tempdir().expect("tempdir");
    let lock_path = dir.path().join("counter.lock");
    let counter_path = dir.path().join("counter");
    std::fs::write(&counter_path, "0").expect("seed counter");

    const THREADS: usize = 6;
    const ROUNDS: usize = 15;
    let barrier = Arc::new(Barrier::new(THREADS));
    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let lock_path = lock_path.clone();
            let counter_path = counter_path.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let locks = manager();
                barrier.wait();
                for _ in 0..ROUNDS {
                    locks
                        .with_lock(&lock_path, Duration::from_secs(20), || {
                            // Unprotected read-modify-write; only the lock keeps it correct.
                            let raw = std::fs::read_to_string(&counter_path)?;
                            let value: usize = raw.trim().parse().expect("counter");
                            thread::sleep(Duration::from_millis(1));
                            std::fs::write(&counter_path, (value + 1).to_string())?;
                            Ok(())
                        })
                        .expect("locked increment");
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("thread");
    }

    let total: usize = std::fs::read_to_string(&counter_path)
        .expect("read counter")
        .trim()
        .parse()
        .expect("counter");
    assert_eq!(total, THREADS * ROUNDS);
    assert!(!lock_path.exists());
}

#[test]
fn contention_is_retryable_and_names_the_holder() {
    let dir = tempdir().expect("tempdir");
    let lock_path = dir.path().join("busy.lock");
    let locks = manager();
    let held = locks
        .acquire(&lock_path, Duration::from_secs(1))
        .expect("first acquire");

    let err = manager()
        .acquire(&lock_path, Duration::from_millis(80))
        .unwrap_err();
    assert!(err.is_retryable());
    match err {
        Error::Contention {
            holder_pid, waited, ..
        } => {
            assert_eq!(holder_pid, Some(std::process::id() as i32));
            assert!(waited >= Duration::from_millis(80));
        }
        other => panic!("expected contention, got {other}"),
    }

    assert_eq!(held.release().expect("release"), ReleaseOutcome::Released);
    let again = manager()
        .acquire(&lock_path, Duration::from_millis(80))
        .expect("acquire after release");
    assert!(again.is_held());
}

#[test]
fn waiter_gets_lock_once_holder_releases() {
    let dir = tempdir().expect("tempdir");
    let lock_path = dir.path().join("handoff.lock");
    let held = manager()
        .acquire(&lock_path, Duration::from_secs(1))
        .expect("first acquire");

    let waiter_path = lock_path.clone();
    let waiter = thread::spawn(move || {
        let guard = manager()
            .acquire(&waiter_path, Duration::from_secs(10))
            .expect("waiter acquire");
        guard.lock_id().to_string()
    });

    thread::sleep(Duration::from_millis(50));
    let first_id = held.lock_id().to_string();
    held.release().expect("release");
    let second_id = waiter.join().expect("waiter");
    assert_ne!(first_id, second_id);
}

#[test]
fn dropped_guard_releases() {
    let dir = tempdir().expect("tempdir");
    let lock_path = dir.path().join("scoped.lock");
    {
        let _guard = manager()
            .acquire(&lock_path, Duration::from_secs(1))
            .expect("acquire");
        assert!(lock_path.exists());
    }
    assert!(!lock_path.exists());
}

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

/// In-process serialization per session, owned by whoever drives sessions.
///
/// Threads in one process contend here before they contend on the session's
/// lock file, so a busy controller does not spin on its own file lock. Entries
/// are created on first use and live as long as the registry.
#[derive(Debug, Default)]
pub struct SessionLocks {
    sessions: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl SessionLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// The mutex for `session_id`, created if this is its first use.
    pub fn get(&self, session_id: &str) -> Arc<Mutex<()>> {
        let mut sessions = lock_or_recover(&self.sessions);
        sessions
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Run `f` while holding the session's in-process mutex.
    pub fn run<T>(&self, session_id: &str, f: impl FnOnce() -> T) -> T {
        let entry = self.get(session_id);
        let _held = lock_or_recover(&entry);
        f()
    }

    pub fn len(&self) -> usize {
        lock_or_recover(&self.sessions).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A panicked holder leaves no partial state behind a `()` mutex.
fn lock_or_recover<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    #[test]
    fn same_session_shares_one_mutex() {
        let locks = SessionLocks::new();
        let a = locks.get("s1");
        let b = locks.get("s1");
        let c = locks.get("s2");
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(locks.len(), 2);
    }

    #[test]
    fn run_serializes_callers() {
        let locks = Arc::new(SessionLocks::new());
        let inside = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let locks = Arc::clone(&locks);
                let inside = Arc::clone(&inside);
                let max_seen = Arc::clone(&max_seen);
                thread::spawn(move || {
                    locks.run("shared", || {
                        let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                        max_seen.fetch_max(now, Ordering::SeqCst);
                        thread::sleep(std::time::Duration::from_millis(2));
                        inside.fetch_sub(1, Ordering::SeqCst);
                    })
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("join");
        }
        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    }
}

use super::ProcessIdentity;

/// Existence-only identity for platforms without start-time introspection.
///
/// This cannot detect pid reuse. Locks recorded on such a platform are never
/// broken automatically and supervised workers are never trusted for reuse.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExistenceOnlyIdentity;

impl ProcessIdentity for ExistenceOnlyIdentity {
    fn name(&self) -> &'static str {
        "existence-only"
    }

    fn start_time_of(&self, _pid: i32) -> Option<u64> {
        None
    }

    fn verifies_start_time(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::Liveness;

    #[test]
    fn own_process_exists_but_is_unverifiable() {
        let pid = std::process::id() as i32;
        assert_eq!(
            ExistenceOnlyIdentity.probe(pid, Some(1)),
            Liveness::Unverifiable
        );
        assert!(ExistenceOnlyIdentity.is_alive(pid, None));
    }
}

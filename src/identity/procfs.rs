use std::fs::File;
use std::io::Read;

use super::ProcessIdentity;

/// Linux identity backed by `/proc/<pid>/stat`.
///
/// The start time is field 22 (`starttime`, clock ticks after boot); it is
/// stable for the life of a process and differs for any later process that
/// receives the same pid.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcfsIdentity;

impl ProcessIdentity for ProcfsIdentity {
    fn name(&self) -> &'static str {
        "procfs"
    }

    fn start_time_of(&self, pid: i32) -> Option<u64> {
        if pid <= 0 {
            return None;
        }
        let mut contents = String::new();
        File::open(format!("/proc/{pid}/stat"))
            .ok()?
            .read_to_string(&mut contents)
            .ok()?;
        let (state, start_time) = parse_stat(&contents)?;
        // A zombie keeps its stat entry until reaped but is no longer running.
        if matches!(state, 'Z' | 'X' | 'x') {
            return None;
        }
        Some(start_time)
    }

    fn verifies_start_time(&self) -> bool {
        true
    }
}

/// Extract `(state, starttime)` from a stat line.
///
/// `comm` may contain spaces and parentheses, so fields are counted from the
/// last closing parenthesis.
pub fn parse_stat(contents: &str) -> Option<(char, u64)> {
    let end = contents.rfind(')')?;
    let mut fields = contents[end + 1..].split_whitespace();
    let state = fields.next()?.chars().next()?;
    // state is field 3; starttime is field 22.
    let start = fields.nth(18)?;
    let start_time = start.parse::<u64>().ok()?;
    Some((state, start_time))
}

use std::process::{Command, Stdio};

use time::macros::format_description;
use time::PrimitiveDateTime;

use super::ProcessIdentity;

/// Identity via `ps -o lstart=`, used where there is no procfs (macOS).
///
/// `lstart` has one-second resolution, which is enough to tell a recycled
/// pid apart: the kernel does not hand out the same pid twice within a second
/// under normal load.
#[derive(Debug, Clone, Copy, Default)]
pub struct PsIdentity;

impl ProcessIdentity for PsIdentity {
    fn name(&self) -> &'static str {
        "ps"
    }

    fn start_time_of(&self, pid: i32) -> Option<u64> {
        if pid <= 0 {
            return None;
        }
        let output = Command::new("ps")
            .args(["-p", &pid.to_string(), "-o", "lstart="])
            .env("LC_ALL", "C")
            .stdin(Stdio::null())
            .stderr(Stdio::null())
            .output()
            .ok()?;
        if !output.status.success() {
            return None;
        }
        parse_lstart(&String::from_utf8_lossy(&output.stdout))
    }

    fn verifies_start_time(&self) -> bool {
        true
    }
}

/// Parse `ps` `lstart` output (`Sat Oct 18 09:05:33 2026`) into epoch seconds.
///
/// The value is interpreted as UTC; it is only ever compared with other
/// values produced the same way on the same host.
pub fn parse_lstart(raw: &str) -> Option<u64> {
    let tokens: Vec<&str> = raw.split_whitespace().collect();
    if tokens.len() != 5 {
        return None;
    }
    // Weekday is redundant with the date.
    let normalized = tokens[1..].join(" ");
    let format = format_description!(
        "[month repr:short] [day padding:none] [hour]:[minute]:[second] [year]"
    );
    let parsed = PrimitiveDateTime::parse(&normalized, &format).ok()?;
    u64::try_from(parsed.assume_utc().unix_timestamp()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_padded_day() {
        let a = parse_lstart("Sat Oct  4 09:05:33 2026\n").expect("parse");
        let b = parse_lstart("Sun Oct  5 09:05:33 2026").expect("parse");
        assert_eq!(b - a, 86_400);
    }

    #[test]
    fn parses_two_digit_day() {
        let ts = parse_lstart("Mon Jan 12 00:00:10 1970");
        assert_eq!(ts, Some(11 * 86_400 + 10));
    }

    #[test]
    fn rejects_garbage() {
        assert_eq!(parse_lstart(""), None);
        assert_eq!(parse_lstart("not a timestamp at all"), None);
    }
}

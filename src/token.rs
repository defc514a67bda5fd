use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

static TOKEN_SEQUENCE: AtomicU64 = AtomicU64::new(0);

const TOKEN_HEX_LEN: usize = 32;

/// Opaque identifier unique across processes on a host and across restarts.
pub fn unique_token() -> String {
    let seq = TOKEN_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    let mut hasher = blake3::Hasher::new();
    hasher.update(&std::process::id().to_le_bytes());
    hasher.update(&nanos.to_le_bytes());
    hasher.update(&seq.to_le_bytes());
    hasher.update(crate::identity::hostname().as_bytes());
    let hex = hasher.finalize().to_hex();
    hex[..TOKEN_HEX_LEN].to_string()
}

/// Short stable digest, used where a long name must fit a path limit.
pub fn short_digest(input: &str, len: usize) -> String {
    let hex = blake3::hash(input.as_bytes()).to_hex();
    hex[..len.min(hex.len())].to_string()
}

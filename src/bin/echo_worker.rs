//! Reference worker: serves the RPC methods on `$LOCKSTEP_SOCKET`.
//!
//! `execute` understands two forms of `code`:
//! - `name = value` stores a variable visible through `get_state`;
//! - `sleep <ms>` blocks, returning early when interrupted.
//!
//! Anything else is echoed back as stdout.

use std::collections::BTreeMap;
use std::os::unix::net::UnixListener;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use lockstep::rpc::{self, HandlerResult, RpcErrorObject};
use lockstep::supervisor::SOCKET_ENV;
use log::info;
use serde_json::{json, Map, Value};

#[derive(Default)]
struct EchoWorker {
    variables: Mutex<BTreeMap<String, String>>,
    executions: AtomicU64,
    interrupted: AtomicBool,
}

impl EchoWorker {
    fn sleep(&self, ms: u64) -> bool {
        let deadline = Instant::now() + Duration::from_millis(ms);
        while Instant::now() < deadline {
            if self.interrupted.swap(false, Ordering::SeqCst) {
                return false;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        true
    }
}

impl rpc::Handler for EchoWorker {
    fn execute(&self, code: &str, _params: &Map<String, Value>) -> HandlerResult {
        let started = Instant::now();
        self.executions.fetch_add(1, Ordering::Relaxed);
        // An interrupt targets the execution in flight; drop one that
        // arrived while idle.
        self.interrupted.store(false, Ordering::SeqCst);
        let code = code.trim();
        let (success, stdout) = if let Some(ms) = code.strip_prefix("sleep ") {
            let ms: u64 = ms
                .trim()
                .parse()
                .map_err(|_| RpcErrorObject::invalid_params(format!("bad sleep: {ms}")))?;
            let finished = self.sleep(ms);
            (finished, if finished { String::new() } else { "interrupted".to_string() })
        } else if let Some((name, value)) = code.split_once('=') {
            let mut variables = self
                .variables
                .lock()
                .map_err(|_| RpcErrorObject::internal("state poisoned"))?;
            variables.insert(name.trim().to_string(), value.trim().to_string());
            (true, String::new())
        } else {
            (true, code.to_string())
        };
        Ok(json!({
            "success": success,
            "stdout": stdout,
            "stderr": "",
            "timing": { "durationMs": started.elapsed().as_millis() as u64 },
        }))
    }

    fn interrupt(&self) -> HandlerResult {
        self.interrupted.store(true, Ordering::SeqCst);
        Ok(json!({ "status": "interrupt_requested" }))
    }

    fn reset(&self) -> HandlerResult {
        self.variables
            .lock()
            .map_err(|_| RpcErrorObject::internal("state poisoned"))?
            .clear();
        self.interrupted.store(false, Ordering::SeqCst);
        Ok(json!({ "status": "reset" }))
    }

    fn get_state(&self) -> HandlerResult {
        let variables = self
            .variables
            .lock()
            .map_err(|_| RpcErrorObject::internal("state poisoned"))?;
        Ok(json!({
            "variables": variables.keys().collect::<Vec<_>>(),
            "variable_count": variables.len(),
            "executions": self.executions.load(Ordering::Relaxed),
        }))
    }
}

fn main() -> Result<()> {
    env_logger::init();
    let socket = std::env::var_os(SOCKET_ENV)
        .map(PathBuf::from)
        .with_context(|| format!("{SOCKET_ENV} is not set"))?;
    let listener = UnixListener::bind(&socket)
        .with_context(|| format!("failed to bind {}", socket.display()))?;
    info!("echo worker {} listening on {}", std::process::id(), socket.display());
    rpc::serve(&listener, Arc::new(EchoWorker::default()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use lockstep::rpc::Handler;

    #[test]
    fn interrupt_while_idle_does_not_cut_the_next_sleep_short() {
        let worker = EchoWorker::default();
        worker.interrupt().expect("interrupt");

        let started = Instant::now();
        let out = worker.execute("sleep 50", &Map::new()).expect("execute");
        assert_eq!(out["success"], true);
        assert!(started.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn interrupt_stops_a_running_sleep_once() {
        let worker = Arc::new(EchoWorker::default());
        let sleeper = {
            let worker = Arc::clone(&worker);
            std::thread::spawn(move || worker.execute("sleep 5000", &Map::new()))
        };
        while worker.executions.load(Ordering::SeqCst) == 0 {
            std::thread::sleep(Duration::from_millis(5));
        }
        std::thread::sleep(Duration::from_millis(20));
        worker.interrupt().expect("interrupt");
        let out = sleeper.join().expect("sleeper").expect("execute");
        assert_eq!(out["success"], false);
        assert_eq!(out["stdout"], "interrupted");

        let out = worker.execute("sleep 30", &Map::new()).expect("execute");
        assert_eq!(out["success"], true);
    }
}

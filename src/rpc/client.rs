use std::io::{self, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use log::debug;
use serde_json::{json, Value};

use super::protocol::{read_bounded_line, Method, Request, Response, MAX_LINE_BYTES};
use crate::{Error, Result};

static CALL_SEQUENCE: AtomicU64 = AtomicU64::new(1);

const CONNECT_RETRY: Duration = Duration::from_millis(20);

/// One connection to a worker's socket.
///
/// Calls are strictly request then response. A call that times out leaves
/// the stream in an unknown position, so the client refuses further calls
/// and the caller must reconnect.
#[derive(Debug)]
pub struct RpcClient {
    socket: PathBuf,
    reader: BufReader<UnixStream>,
    writer: UnixStream,
    poisoned: bool,
}

impl RpcClient {
    /// Connect, retrying while the socket is missing or refusing until
    /// `timeout` elapses.
    pub fn connect(socket: &Path, timeout: Duration) -> Result<Self> {
        let deadline = Instant::now() + timeout;
        let stream = loop {
            match UnixStream::connect(socket) {
                Ok(stream) => break stream,
                Err(err)
                    if matches!(
                        err.kind(),
                        io::ErrorKind::NotFound | io::ErrorKind::ConnectionRefused
                    ) && Instant::now() < deadline =>
                {
                    debug!("waiting for {}: {err}", socket.display());
                    std::thread::sleep(CONNECT_RETRY);
                }
                Err(err) => {
                    return Err(Error::Rpc(format!(
                        "connect to {} failed: {err}",
                        socket.display()
                    )))
                }
            }
        };
        let writer = stream.try_clone()?;
        Ok(Self {
            socket: socket.to_path_buf(),
            reader: BufReader::new(stream),
            writer,
            poisoned: false,
        })
    }

    pub fn socket(&self) -> &Path {
        &self.socket
    }

    /// Send `method` and wait up to `timeout` for the matching response.
    pub fn call(&mut self, method: &str, params: Option<Value>, timeout: Duration) -> Result<Value> {
        self.call_raw(method, params, timeout)?.into_result()
    }

    /// Like [`call`](Self::call) but hands back the full response envelope.
    pub fn call_raw(
        &mut self,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> Result<Response> {
        if self.poisoned {
            return Err(Error::Rpc(
                "connection unusable after an earlier failure; reconnect".to_string(),
            ));
        }
        let id = format!(
            "{}-{}",
            std::process::id(),
            CALL_SEQUENCE.fetch_add(1, Ordering::Relaxed)
        );
        let request = Request::new(id.clone(), method, params);
        let mut line = serde_json::to_vec(&request)?;
        line.push(b'\n');

        let timed_out = |err: io::Error| -> Error {
            if matches!(err.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) {
                Error::RpcTimeout {
                    method: method.to_string(),
                    timeout,
                }
            } else {
                Error::Io(err)
            }
        };
        let timeout = timeout.max(Duration::from_millis(1));
        self.writer.set_write_timeout(Some(timeout))?;
        self.reader.get_ref().set_read_timeout(Some(timeout))?;

        if let Err(err) = self.writer.write_all(&line).and_then(|()| self.writer.flush()) {
            self.poisoned = true;
            return Err(timed_out(err));
        }
        let read = read_bounded_line(&mut self.reader, MAX_LINE_BYTES);
        let line = match read {
            Ok(Some(line)) => line,
            Ok(None) => {
                self.poisoned = true;
                return Err(Error::Rpc(format!("{method}: connection closed by worker")));
            }
            Err(err) => {
                self.poisoned = true;
                return Err(timed_out(err));
            }
        };
        if line.oversized {
            self.poisoned = true;
            return Err(Error::Rpc(format!(
                "{method}: response exceeds {MAX_LINE_BYTES} bytes"
            )));
        }
        let response: Response = match serde_json::from_slice(&line.bytes) {
            Ok(response) => response,
            Err(err) => {
                self.poisoned = true;
                return Err(Error::Rpc(format!("{method}: malformed response: {err}")));
            }
        };
        if response.id != Value::String(id.clone()) {
            self.poisoned = true;
            return Err(Error::Rpc(format!(
                "{method}: response id {} does not match request id {id}",
                response.id
            )));
        }
        Ok(response)
    }

    pub fn ping(&mut self, timeout: Duration) -> Result<Value> {
        self.call(Method::Ping.name(), None, timeout)
    }

    pub fn execute(&mut self, code: &str, timeout: Duration) -> Result<Value> {
        self.call(Method::Execute.name(), Some(json!({ "code": code })), timeout)
    }

    pub fn interrupt(&mut self, timeout: Duration) -> Result<Value> {
        self.call(Method::Interrupt.name(), None, timeout)
    }

    pub fn reset(&mut self, timeout: Duration) -> Result<Value> {
        self.call(Method::Reset.name(), None, timeout)
    }

    pub fn get_state(&mut self, timeout: Duration) -> Result<Value> {
        self.call(Method::GetState.name(), None, timeout)
    }
}

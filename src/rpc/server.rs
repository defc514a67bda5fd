use std::io::{BufReader, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::sync::Arc;

use log::{debug, warn};
use serde_json::{json, Map, Value};

use super::protocol::{
    oversized_response, parse_request, read_bounded_line, Method, Response, RpcErrorObject,
    MAX_LINE_BYTES, METHOD_NOT_FOUND,
};
use crate::Result;

pub type HandlerResult = std::result::Result<Value, RpcErrorObject>;

/// What a worker does for each method.
///
/// Parameter shape checks happen before dispatch: `execute` is only called
/// with a string `code`.
pub trait Handler: Send + Sync + 'static {
    fn execute(&self, code: &str, params: &Map<String, Value>) -> HandlerResult;
    fn interrupt(&self) -> HandlerResult;
    fn reset(&self) -> HandlerResult;
    fn get_state(&self) -> HandlerResult;

    fn ping(&self) -> HandlerResult {
        Ok(json!({
            "status": "ok",
            "timestamp": crate::clock::system_now_ms(),
        }))
    }
}

/// Turn one request line into the response to send back.
pub fn handle_line<H: Handler + ?Sized>(handler: &H, line: &[u8]) -> Response {
    let request = match parse_request(line) {
        Ok(request) => request,
        Err(response) => return response,
    };
    let Some(method) = Method::from_name(&request.method) else {
        return Response::failure(
            request.id,
            RpcErrorObject::new(
                METHOD_NOT_FOUND,
                format!("Method not found: {}", request.method),
            ),
        );
    };
    let params = request.params_object();
    let outcome = match method {
        Method::Execute => match params.get("code") {
            Some(Value::String(code)) => handler.execute(code, &params),
            _ => Err(RpcErrorObject::invalid_params(
                "Invalid params: execute requires a string 'code'",
            )),
        },
        Method::Interrupt => handler.interrupt(),
        Method::Reset => handler.reset(),
        Method::GetState => handler.get_state(),
        Method::Ping => handler.ping(),
    };
    match outcome {
        Ok(result) => Response::success(request.id, result),
        Err(error) => Response::failure(request.id, error),
    }
}

/// Serve requests on one connection until the peer hangs up.
pub fn serve_connection<H: Handler + ?Sized>(handler: &H, stream: UnixStream) -> Result<()> {
    let mut writer = stream.try_clone()?;
    let mut reader = BufReader::new(stream);
    while let Some(line) = read_bounded_line(&mut reader, MAX_LINE_BYTES)? {
        let response = if line.oversized {
            warn!("rejecting request line over {MAX_LINE_BYTES} bytes");
            oversized_response(MAX_LINE_BYTES)
        } else if line.bytes.iter().all(u8::is_ascii_whitespace) {
            continue;
        } else {
            handle_line(handler, &line.bytes)
        };
        writer.write_all(&response.to_line()?)?;
        writer.flush()?;
    }
    Ok(())
}

/// Accept connections forever, one thread per connection.
pub fn serve<H: Handler>(listener: &UnixListener, handler: Arc<H>) -> Result<()> {
    for stream in listener.incoming() {
        let stream = match stream {
            Ok(stream) => stream,
            Err(err) => {
                warn!("accept failed: {err}");
                continue;
            }
        };
        let handler = Arc::clone(&handler);
        std::thread::Builder::new()
            .name("rpc-conn".to_string())
            .spawn(move || {
                if let Err(err) = serve_connection(handler.as_ref(), stream) {
                    debug!("connection closed with error: {err}");
                }
            })?;
    }
    Ok(())
}

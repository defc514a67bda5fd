use std::io::{self, BufRead};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{Error, Result};

pub const JSONRPC_VERSION: &str = "2.0";
/// Longest accepted request or response line, newline excluded.
pub const MAX_LINE_BYTES: usize = 16 * 1024 * 1024;

pub const PARSE_ERROR: i64 = -32700;
pub const INVALID_REQUEST: i64 = -32600;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;
pub const INTERNAL_ERROR: i64 = -32603;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcErrorObject {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcErrorObject {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(INVALID_PARAMS, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(INTERNAL_ERROR, message)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub jsonrpc: String,
    pub id: Value,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl Request {
    pub fn new(id: impl Into<Value>, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: id.into(),
            method: method.into(),
            params,
        }
    }

    /// Params as an object; absent or null params read as empty.
    pub fn params_object(&self) -> Map<String, Value> {
        match &self.params {
            Some(Value::Object(map)) => map.clone(),
            _ => Map::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub jsonrpc: String,
    pub id: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcErrorObject>,
}

impl Response {
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(id: Value, error: RpcErrorObject) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: None,
            error: Some(error),
        }
    }

    /// The result value, or the remote error as [`Error::RpcRemote`].
    pub fn into_result(self) -> Result<Value> {
        match self.error {
            Some(err) => Err(Error::RpcRemote {
                code: err.code,
                message: err.message,
            }),
            None => Ok(self.result.unwrap_or(Value::Null)),
        }
    }

    pub fn to_line(&self) -> Result<Vec<u8>> {
        let mut line = serde_json::to_vec(self)?;
        line.push(b'\n');
        Ok(line)
    }
}

/// Methods a worker serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Execute,
    Interrupt,
    Reset,
    GetState,
    Ping,
}

impl Method {
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "execute" => Method::Execute,
            "interrupt" => Method::Interrupt,
            "reset" => Method::Reset,
            "get_state" => Method::GetState,
            "ping" => Method::Ping,
            _ => return None,
        })
    }

    pub fn name(self) -> &'static str {
        match self {
            Method::Execute => "execute",
            Method::Interrupt => "interrupt",
            Method::Reset => "reset",
            Method::GetState => "get_state",
            Method::Ping => "ping",
        }
    }
}

/// Validate one request line.
///
/// The `Err` side is the response to send back: parse failures answer with a
/// null id, everything else echoes whatever id the request carried.
pub fn parse_request(line: &[u8]) -> std::result::Result<Request, Response> {
    let value: Value = serde_json::from_slice(line).map_err(|err| {
        Response::failure(
            Value::Null,
            RpcErrorObject::new(PARSE_ERROR, format!("Parse error: {err}")),
        )
    })?;
    let Value::Object(mut object) = value else {
        return Err(Response::failure(
            Value::Null,
            RpcErrorObject::new(INVALID_REQUEST, "Invalid Request: expected a JSON object"),
        ));
    };
    let id = object.remove("id").unwrap_or(Value::Null);
    let invalid = |message: &str| {
        Response::failure(id.clone(), RpcErrorObject::new(INVALID_REQUEST, message))
    };
    match object.get("jsonrpc") {
        Some(Value::String(version)) if version == JSONRPC_VERSION => {}
        _ => return Err(invalid("Invalid Request: missing or unsupported jsonrpc version")),
    }
    let method = match object.remove("method") {
        Some(Value::String(method)) => method,
        _ => return Err(invalid("Invalid Request: method must be a string")),
    };
    let params = match object.remove("params") {
        None | Some(Value::Null) => None,
        Some(Value::Object(params)) => Some(Value::Object(params)),
        Some(_) => {
            return Err(Response::failure(
                id,
                RpcErrorObject::invalid_params("Invalid params: params must be an object"),
            ))
        }
    };
    Ok(Request {
        jsonrpc: JSONRPC_VERSION.to_string(),
        id,
        method,
        params,
    })
}

/// One line read under a size cap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundedLine {
    /// At most `max` bytes, without the newline.
    pub bytes: Vec<u8>,
    /// The line was longer than `max`; the excess was consumed and dropped.
    pub oversized: bool,
}

/// Read up to the next `\n`, keeping at most `max` bytes.
///
/// An oversized line is consumed through its newline, so the following line
/// starts clean. Returns `None` at end of stream.
pub fn read_bounded_line<R: BufRead>(reader: &mut R, max: usize) -> io::Result<Option<BoundedLine>> {
    let mut bytes = Vec::new();
    let mut oversized = false;
    let mut read_any = false;
    loop {
        let available = match reader.fill_buf() {
            Ok(buf) => buf,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        };
        if available.is_empty() {
            break;
        }
        read_any = true;
        let (chunk, used, done) = match available.iter().position(|&b| b == b'\n') {
            Some(pos) => (&available[..pos], pos + 1, true),
            None => (available, available.len(), false),
        };
        let room = max.saturating_sub(bytes.len());
        if chunk.len() > room {
            oversized = true;
        }
        bytes.extend_from_slice(&chunk[..chunk.len().min(room)]);
        reader.consume(used);
        if done {
            break;
        }
    }
    if !read_any {
        return Ok(None);
    }
    Ok(Some(BoundedLine { bytes, oversized }))
}

/// Response for a line rejected by [`read_bounded_line`].
pub fn oversized_response(max: usize) -> Response {
    Response::failure(
        Value::Null,
        RpcErrorObject::new(
            INVALID_REQUEST,
            format!("Invalid Request: line exceeds {max} bytes"),
        ),
    )
}

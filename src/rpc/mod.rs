//! Newline-delimited JSON-RPC 2.0 over a Unix domain socket.
//!
//! Workers serve `execute`, `interrupt`, `reset`, `get_state` and `ping`.
//! Each request and response is a single JSON object on its own line.

pub mod client;
pub mod protocol;
pub mod server;

pub use client::RpcClient;
pub use protocol::{
    parse_request, read_bounded_line, BoundedLine, Method, Request, Response, RpcErrorObject,
    MAX_LINE_BYTES,
};
pub use server::{handle_line, serve, serve_connection, Handler, HandlerResult};

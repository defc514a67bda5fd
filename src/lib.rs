//! Filesystem-coordinated process control.
//!
//! Cooperating processes on one host share state through files under a
//! runtime root, with no broker:
//!
//! - [`lock`]: exclusive lock files that recover from crashed holders.
//! - [`identity`]: pid plus start time, so a recycled pid is never mistaken
//!   for the process that was recorded.
//! - [`supervisor`]: one long-lived worker per session, terminated by an
//!   escalating SIGINT, SIGTERM, SIGKILL ladder.
//! - [`queue`]: a durable lease-based job queue.
//! - [`rpc`] and [`controller`]: the line-delimited JSON-RPC channel to workers.

pub mod clock;
pub mod config;
pub mod controller;
pub mod durable;
pub mod error;
pub mod identity;
pub mod layout;
pub mod lock;
pub mod queue;
pub mod rpc;
pub mod supervisor;
pub mod token;

pub use config::Config;
pub use controller::Controller;
pub use error::{Error, Result};
pub use layout::RuntimeLayout;
pub use lock::{LockGuard, LockManager};
pub use queue::LeaseQueue;
pub use supervisor::Supervisor;

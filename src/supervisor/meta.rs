use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::durable;
use crate::identity::ProcessHandle;
use crate::{Error, Result};

pub const BRIDGE_SCHEMA_VERSION: u32 = 1;

/// Who a supervised worker is and where it listens.
///
/// Other writers may add fields; they are kept in `extra` and survive every
/// rewrite because writes merge into the existing document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeMeta {
    pub schema_version: u32,
    pub pid: i32,
    pub socket_path: PathBuf,
    /// Milliseconds since the UNIX epoch.
    pub started_at: u64,
    pub owner_session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub process_start_time: Option<u64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl BridgeMeta {
    pub fn handle(&self) -> ProcessHandle {
        ProcessHandle::new(self.pid, self.process_start_time)
    }

    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.schema_version != BRIDGE_SCHEMA_VERSION {
            return Err(format!("unsupported schemaVersion {}", self.schema_version));
        }
        if self.pid <= 0 {
            return Err(format!("invalid pid {}", self.pid));
        }
        if !self.socket_path.is_absolute() {
            return Err(format!(
                "socketPath {} is not absolute",
                self.socket_path.display()
            ));
        }
        if self.owner_session_id.is_empty() {
            return Err("ownerSessionId is empty".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum MetaRead {
    Missing,
    Valid(BridgeMeta),
    /// Present but unusable; the reason is for logs.
    Poisoned(String),
}

pub fn read_meta(path: &Path) -> Result<MetaRead> {
    let meta = match durable::read_json::<BridgeMeta>(path) {
        Ok(Some(meta)) => meta,
        Ok(None) => return Ok(MetaRead::Missing),
        Err(Error::CorruptState { reason, .. }) => return Ok(MetaRead::Poisoned(reason)),
        Err(err) => return Err(err),
    };
    match meta.validate() {
        Ok(()) => Ok(MetaRead::Valid(meta)),
        Err(reason) => Ok(MetaRead::Poisoned(reason)),
    }
}

/// Write `meta`, keeping any fields of the existing document it does not set.
///
/// Callers hold the session lock.
pub fn write_meta(path: &Path, meta: &BridgeMeta) -> Result<()> {
    let mut merged = match std::fs::read(path) {
        Ok(bytes) => match serde_json::from_slice::<Value>(&bytes) {
            Ok(Value::Object(existing)) => existing,
            _ => Map::new(),
        },
        Err(_) => Map::new(),
    };
    let Value::Object(fields) = serde_json::to_value(meta)? else {
        return Err(Error::corrupt(path, "bridge meta did not serialize to an object"));
    };
    for (key, value) in fields {
        merged.insert(key, value);
    }
    // Optional fields cleared on this write must not linger from the old record.
    if meta.process_start_time.is_none() {
        merged.remove("processStartTime");
    }
    durable::write_json(path, &Value::Object(merged))
}

pub fn remove_meta(path: &Path) -> Result<bool> {
    durable::remove_if_exists(path)
}

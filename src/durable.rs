//! Durable replacement of small state files.
//!
//! A write lands in a sibling temporary file, is flushed with `sync_all`, and
//! is renamed over the target. Readers therefore see either the previous
//! contents or the new contents, never a torn file.

use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::{Error, Result};

static TMP_SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Atomically replace `path` with `data`.
pub fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let parent = parent_dir(path);
    std::fs::create_dir_all(&parent)?;
    let tmp = tmp_path(path);
    let result = (|| -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&tmp)?;
        file.write_all(data)?;
        file.sync_all()?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    })();
    if result.is_err() {
        let _ = std::fs::remove_file(&tmp);
        return result;
    }
    sync_dir(&parent);
    Ok(())
}

/// Serialize `value` as pretty JSON and write it atomically.
pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut data = serde_json::to_vec_pretty(value)?;
    data.push(b'\n');
    write_atomic(path, &data)
}

/// Read a JSON document, mapping a missing file to `Ok(None)`.
///
/// Parse failures surface as `Error::CorruptState` so callers can decide
/// whether a poisoned file is fatal or discardable.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let data = match std::fs::read(path) {
        Ok(data) => data,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(Error::Io(err)),
    };
    serde_json::from_slice(&data)
        .map(Some)
        .map_err(|err| Error::corrupt(path, err.to_string()))
}

/// Remove a file, treating "already gone" as success.
pub fn remove_if_exists(path: &Path) -> Result<bool> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
        Err(err) => Err(Error::Io(err)),
    }
}

fn parent_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let seq = TMP_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "state".to_string());
    path.with_file_name(format!(".{name}.{}.{seq}.tmp", std::process::id()))
}

fn sync_dir(dir: &Path) {
    // Directory fsync persists the rename; some filesystems refuse it.
    if let Ok(handle) = File::open(dir) {
        let _ = handle.sync_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use tempfile::tempdir;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Sample {
        name: String,
        count: u32,
    }

    #[test]
    fn write_then_read_json() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("sample.json");
        let sample = Sample {
            name: "alpha".to_string(),
            count: 3,
        };
        write_json(&path, &sample).expect("write");
        let read: Option<Sample> = read_json(&path).expect("read");
        assert_eq!(read, Some(sample));
    }

    #[test]
    fn write_leaves_no_tmp_files() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("state.json");
        write_atomic(&path, b"one").expect("first");
        write_atomic(&path, b"two").expect("second");
        let names: Vec<_> = std::fs::read_dir(dir.path())
            .expect("read dir")
            .flatten()
            .map(|entry| entry.file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["state.json".to_string()]);
        assert_eq!(std::fs::read(&path).expect("read"), b"two");
    }

    #[test]
    fn missing_file_reads_as_none() {
        let dir = tempdir().expect("tempdir");
        let read: Option<Sample> = read_json(&dir.path().join("absent.json")).expect("read");
        assert!(read.is_none());
    }

    #[test]
    fn garbage_reads_as_corrupt() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("bad.json");
        std::fs::write(&path, b"{not json").expect("write");
        let err = read_json::<Sample>(&path).unwrap_err();
        assert!(matches!(err, Error::CorruptState { .. }));
    }
}

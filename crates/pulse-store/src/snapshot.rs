//! Snapshot file format: a JSON array of `{id, type, value?, delta?}`.
//!
//! Reading tolerates an absent or empty file and rejects malformed JSON.
//! Writing goes through a sibling temporary file that is renamed into
//! place, so readers never observe a half-written snapshot.

use std::ffi::OsString;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use pulse_core::Metric;
use tracing::debug;

use crate::error::{StoreError, StoreResult};

/// Read a snapshot. `Ok(None)` when the file does not exist.
pub fn read_snapshot(path: &Path) -> StoreResult<Option<Vec<Metric>>> {
    let content = match std::fs::read(path) {
        Ok(content) => content,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(StoreError::from_io(e)),
    };
    if content.iter().all(u8::is_ascii_whitespace) {
        return Ok(Some(Vec::new()));
    }
    let metrics: Vec<Metric> = serde_json::from_slice(&content)
        .map_err(|e| StoreError::Corrupt(format!("{}: {e}", path.display())))?;
    debug!(path = %path.display(), count = metrics.len(), "snapshot read");
    Ok(Some(metrics))
}

/// Atomically replace the snapshot at `path` with `metrics`.
pub fn write_snapshot(path: &Path, metrics: &[Metric]) -> StoreResult<()> {
    let body = serde_json::to_vec_pretty(metrics)
        .map_err(|e| StoreError::Backend(format!("serialize snapshot: {e}")))?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(StoreError::from_io)?;
    }

    let tmp = temp_path(path);
    {
        let mut file = std::fs::File::create(&tmp).map_err(StoreError::from_io)?;
        file.write_all(&body).map_err(StoreError::from_io)?;
        file.sync_all().map_err(StoreError::from_io)?;
    }
    std::fs::rename(&tmp, path).map_err(StoreError::from_io)?;
    debug!(path = %path.display(), count = metrics.len(), "snapshot written");
    Ok(())
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".tmp");
    PathBuf::from(name)
}

//! File-based snapshot persistence for lead aggregates.
//!
//! One snapshot per lead at `<base_dir>/leads/<lead_id>/snapshot.json`.
//! Writes are atomic via a temp-rename pattern so a crash mid-write never
//! leaves a torn file behind.

use std::io;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::lead::Lead;
use crate::storage::StorageLayout;

/// A lead's state and the number of logged events folded into it.
///
/// Loading resumes from log entry `stream_version` onwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub state: Lead,
    pub stream_version: u64,
}

/// Save a snapshot atomically.
///
/// Writes `snapshot.json.tmp` next to the target, then renames it over
/// `snapshot.json`.
///
/// # Errors
///
/// Returns `io::Error` if directory creation, writing, or renaming fails.
pub fn save_snapshot(layout: &StorageLayout, snapshot: &Snapshot) -> io::Result<()> {
    let dir = layout.lead_dir(snapshot.state.id);
    std::fs::create_dir_all(&dir)?;

    let path = layout.snapshot_path(snapshot.state.id);
    let tmp_path = path.with_extension("json.tmp");
    let json = serde_json::to_vec_pretty(snapshot)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    std::fs::write(&tmp_path, &json)?;
    std::fs::rename(&tmp_path, &path)?;
    Ok(())
}

/// Load a lead's snapshot.
///
/// # Returns
///
/// - `Ok(Some(snapshot))` if the file exists, parses, belongs to `lead_id`,
///   and satisfies the aggregate invariants.
/// - `Ok(None)` if the file is missing or fails any of those checks.
///   Rejected files are logged with `tracing::warn!` and treated as a
///   cache miss; the caller rebuilds from the event log.
///
/// # Errors
///
/// Returns `io::Error` only for unexpected I/O failures.
pub fn load_snapshot(layout: &StorageLayout, lead_id: Uuid) -> io::Result<Option<Snapshot>> {
    let path = layout.snapshot_path(lead_id);
    let bytes = match std::fs::read(&path) {
        Ok(b) => b,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    };

    let snap = match serde_json::from_slice::<Snapshot>(&bytes) {
        Ok(snap) => snap,
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to deserialize snapshot; treating as cache miss"
            );
            return Ok(None);
        }
    };

    if snap.state.id != lead_id {
        tracing::warn!(
            path = %path.display(),
            found = %snap.state.id,
            "snapshot belongs to another lead; treating as cache miss"
        );
        return Ok(None);
    }
    if let Err(e) = snap.state.check_invariants() {
        tracing::warn!(
            path = %path.display(),
            error = %e,
            "snapshot violates lead invariants; treating as cache miss"
        );
        return Ok(None);
    }
    Ok(Some(snap))
}

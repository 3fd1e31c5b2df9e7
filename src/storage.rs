//! On-disk layout and the append-only event log.

use std::fs::{self, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use uuid::Uuid;

use crate::error::StoreError;
use crate::event::LeadEvent;

/// Manages the on-disk directory layout for lead data.
///
/// ```text
/// <base_dir>/
///     leads/
///         <lead_id>/
///             events.jsonl    -- append-only event log
///             snapshot.json   -- latest aggregate snapshot
/// ```
///
/// `StorageLayout` is cheap to clone (it wraps a single `PathBuf`).
#[derive(Debug, Clone)]
pub struct StorageLayout {
    base_dir: PathBuf,
}

impl StorageLayout {
    /// Create a layout rooted at `base_dir`.
    ///
    /// The directory does not need to exist yet; it is created lazily by
    /// [`ensure_lead`](StorageLayout::ensure_lead).
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// `<base_dir>/leads/<lead_id>`
    pub fn lead_dir(&self, lead_id: Uuid) -> PathBuf {
        self.base_dir.join("leads").join(lead_id.to_string())
    }

    /// `<base_dir>/leads/<lead_id>/events.jsonl`
    pub fn log_path(&self, lead_id: Uuid) -> PathBuf {
        self.lead_dir(lead_id).join("events.jsonl")
    }

    /// `<base_dir>/leads/<lead_id>/snapshot.json`
    pub fn snapshot_path(&self, lead_id: Uuid) -> PathBuf {
        self.lead_dir(lead_id).join("snapshot.json")
    }

    /// Ensure the lead directory exists.
    ///
    /// Idempotent. The directory itself is the record that the lead exists:
    /// [`list_leads`](StorageLayout::list_leads) enumerates these.
    ///
    /// # Returns
    ///
    /// The lead directory path.
    ///
    /// # Errors
    ///
    /// Returns `io::Error` if directory creation fails.
    pub fn ensure_lead(&self, lead_id: Uuid) -> io::Result<PathBuf> {
        let dir = self.lead_dir(lead_id);
        fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    /// All lead ids with a directory on disk, sorted.
    ///
    /// Directory names that are not UUIDs are skipped. A missing `leads/`
    /// directory yields an empty list.
    ///
    /// # Errors
    ///
    /// Returns `io::Error` if the directory exists but cannot be read.
    pub fn list_leads(&self) -> io::Result<Vec<Uuid>> {
        let leads_dir = self.base_dir.join("leads");
        let entries = match fs::read_dir(&leads_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let mut ids: Vec<Uuid> = entries
            .filter_map(|entry| {
                let entry = entry.ok()?;
                if !entry.file_type().ok()?.is_dir() {
                    return None;
                }
                Uuid::parse_str(&entry.file_name().to_string_lossy()).ok()
            })
            .collect();
        ids.sort();
        Ok(ids)
    }

    /// The event log for one lead.
    pub fn event_log(&self, lead_id: Uuid) -> EventLog {
        EventLog::new(self.log_path(lead_id))
    }
}

/// Append-only JSONL log of one lead's events, one event per line.
#[derive(Debug, Clone)]
pub struct EventLog {
    path: PathBuf,
}

impl EventLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one event and flush it to disk.
    ///
    /// # Errors
    ///
    /// [`StoreError::Serde`] if the event cannot be encoded,
    /// [`StoreError::Io`] if the write fails.
    pub fn append(&self, event: &LeadEvent) -> Result<(), StoreError> {
        let line = serde_json::to_string(event)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{line}")?;
        file.sync_data()?;
        Ok(())
    }

    /// Read every event in append order.
    ///
    /// A missing file is an empty log. Blank lines are skipped.
    ///
    /// # Errors
    ///
    /// [`StoreError::Io`] on read failure, [`StoreError::Serde`] if a line
    /// is not a valid event.
    pub fn read_all(&self) -> Result<Vec<LeadEvent>, StoreError> {
        let file = match fs::File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut events = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            events.push(serde_json::from_str(&line)?);
        }
        Ok(events)
    }
}

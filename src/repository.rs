//! Aggregate repositories: where leads live between events.
//!
//! [`LeadRepository`] is the `get` / `put` seam the lifecycle core consumes.
//! Two implementations ship with the crate: [`InMemoryRepository`] for
//! tests and embedding, and [`FileRepository`], which keeps a JSONL event
//! log plus an atomic JSON snapshot per lead.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use uuid::Uuid;

use crate::dispatch::replay_onto;
use crate::error::StoreError;
use crate::event::LeadEvent;
use crate::lead::Lead;
use crate::snapshot::{Snapshot, load_snapshot, save_snapshot};
use crate::storage::StorageLayout;

/// Storage for lead aggregates and their event history.
///
/// Callers must serialize `put` per lead id. [`LeadStore`](crate::LeadStore)
/// does so by routing every lead through a single actor.
pub trait LeadRepository: Send + Sync + 'static {
    /// Load the current aggregate, or `None` if the lead does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the backing storage cannot be read.
    fn get(&self, lead_id: Uuid) -> Result<Option<Lead>, StoreError>;

    /// Record `event` and store `lead`, the aggregate it produced.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the write fails.
    fn put(&self, lead: &Lead, event: &LeadEvent) -> Result<(), StoreError>;

    /// Ids of every stored lead, sorted.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the backing storage cannot be listed.
    fn list(&self) -> Result<Vec<Uuid>, StoreError>;

    /// Every event recorded for one lead, in application order.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the history cannot be read.
    fn history(&self, lead_id: Uuid) -> Result<Vec<LeadEvent>, StoreError>;
}

// ---------------------------------------------------------------------------
// In-memory
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct Entry {
    lead: Lead,
    events: Vec<LeadEvent>,
}

/// Repository backed by a process-local map. Nothing survives a restart.
#[derive(Debug, Default)]
pub struct InMemoryRepository {
    leads: RwLock<HashMap<Uuid, Entry>>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LeadRepository for InMemoryRepository {
    fn get(&self, lead_id: Uuid) -> Result<Option<Lead>, StoreError> {
        let leads = self.leads.read().unwrap_or_else(PoisonError::into_inner);
        Ok(leads.get(&lead_id).map(|entry| entry.lead.clone()))
    }

    fn put(&self, lead: &Lead, event: &LeadEvent) -> Result<(), StoreError> {
        let mut leads = self.leads.write().unwrap_or_else(PoisonError::into_inner);
        let entry = leads.entry(lead.id).or_insert_with(|| Entry {
            lead: lead.clone(),
            events: Vec::new(),
        });
        entry.lead = lead.clone();
        entry.events.push(event.clone());
        Ok(())
    }

    fn list(&self) -> Result<Vec<Uuid>, StoreError> {
        let leads = self.leads.read().unwrap_or_else(PoisonError::into_inner);
        let mut ids: Vec<Uuid> = leads.keys().copied().collect();
        ids.sort();
        Ok(ids)
    }

    fn history(&self, lead_id: Uuid) -> Result<Vec<LeadEvent>, StoreError> {
        let leads = self.leads.read().unwrap_or_else(PoisonError::into_inner);
        Ok(leads
            .get(&lead_id)
            .map(|entry| entry.events.clone())
            .unwrap_or_default())
    }
}

// ---------------------------------------------------------------------------
// File-backed
// ---------------------------------------------------------------------------

/// Repository that persists each lead as an event log plus a snapshot.
///
/// `put` appends the event to the log before rewriting the snapshot, so the
/// log is always at least as new as the snapshot. `get` loads the snapshot
/// and folds any logged events it has not seen yet; a missing, corrupt, or
/// inconsistent snapshot falls back to replaying the whole log.
#[derive(Debug, Clone)]
pub struct FileRepository {
    layout: StorageLayout,
}

impl FileRepository {
    pub fn new(base_dir: impl Into<std::path::PathBuf>) -> Self {
        Self {
            layout: StorageLayout::new(base_dir),
        }
    }

    pub fn layout(&self) -> &StorageLayout {
        &self.layout
    }
}

impl LeadRepository for FileRepository {
    fn get(&self, lead_id: Uuid) -> Result<Option<Lead>, StoreError> {
        let events = self.layout.event_log(lead_id).read_all()?;
        let snapshot = load_snapshot(&self.layout, lead_id)?;

        let (start, seen) = match snapshot {
            Some(snap) if snap.stream_version <= events.len() as u64 => {
                (Some(snap.state), snap.stream_version as usize)
            }
            Some(snap) => {
                tracing::warn!(
                    lead_id = %lead_id,
                    snapshot_version = snap.stream_version,
                    log_len = events.len(),
                    "snapshot is ahead of the event log; rebuilding from log"
                );
                (None, 0)
            }
            None => (None, 0),
        };

        let pending = events.len() - seen;
        let lead = replay_onto(start, events.into_iter().skip(seen))
            .map_err(|source| StoreError::CorruptHistory { lead_id, source })?;

        if pending > 0
            && let Some(lead) = &lead
        {
            tracing::debug!(lead_id = %lead_id, pending, "caught up from event log");
            save_snapshot(
                &self.layout,
                &Snapshot {
                    state: lead.clone(),
                    stream_version: lead.version,
                },
            )?;
        }
        Ok(lead)
    }

    fn put(&self, lead: &Lead, event: &LeadEvent) -> Result<(), StoreError> {
        self.layout.ensure_lead(lead.id)?;
        self.layout.event_log(lead.id).append(event)?;
        save_snapshot(
            &self.layout,
            &Snapshot {
                state: lead.clone(),
                stream_version: lead.version,
            },
        )?;
        Ok(())
    }

    fn list(&self) -> Result<Vec<Uuid>, StoreError> {
        Ok(self.layout.list_leads()?)
    }

    fn history(&self, lead_id: Uuid) -> Result<Vec<LeadEvent>, StoreError> {
        self.layout.event_log(lead_id).read_all()
    }
}

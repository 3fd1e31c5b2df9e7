//! Read models folded from the lead event logs.
//!
//! A projection sees every accepted event of every lead, lead by lead in
//! id order and in append order within a lead. Rejected events never reach
//! the log, so projections only ever observe legal histories.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::event::{DealOutcome, EventPayload, LeadEvent};
use crate::lead::LeadStatus;

/// A cross-lead read model.
///
/// # Contract
///
/// [`apply`](Projection::apply) must be deterministic: the same event
/// sequence always yields the same state. Event kinds a projection does
/// not care about are ignored in the method body.
pub trait Projection: Default + Clone + Send + Sync + 'static {
    /// Human-readable name, used in logs.
    const NAME: &'static str;

    /// Fold one event into the read model.
    fn apply(&mut self, event: &LeadEvent);
}

/// Pipeline health at a glance: where every lead sits and how deals ended.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineSummary {
    /// Number of leads currently in each status. Empty statuses are absent.
    pub by_status: BTreeMap<LeadStatus, u64>,
    /// Current status of every lead seen.
    pub statuses: BTreeMap<Uuid, LeadStatus>,
    pub won: u64,
    pub lost: u64,
    pub disqualified: u64,
    /// Sum of `dealValue` over won deals.
    pub won_value: f64,
}

impl PipelineSummary {
    /// Number of leads tracked.
    pub fn total(&self) -> usize {
        self.statuses.len()
    }

    /// Won deals as a share of all closed deals, or `None` before the first
    /// close.
    pub fn win_rate(&self) -> Option<f64> {
        let closed = self.won + self.lost;
        (closed > 0).then(|| self.won as f64 / closed as f64)
    }

    fn count_in(&mut self, status: LeadStatus) {
        *self.by_status.entry(status).or_default() += 1;
    }

    fn count_out(&mut self, status: LeadStatus) {
        if let Some(n) = self.by_status.get_mut(&status) {
            *n = n.saturating_sub(1);
            if *n == 0 {
                self.by_status.remove(&status);
            }
        }
    }
}

impl Projection for PipelineSummary {
    const NAME: &'static str = "pipeline-summary";

    fn apply(&mut self, event: &LeadEvent) {
        let to = event.payload().target_status();
        if let Some(from) = self.statuses.insert(event.lead_id(), to) {
            self.count_out(from);
        }
        self.count_in(to);

        match event.payload() {
            EventPayload::DealClosed(p) => match p.outcome {
                DealOutcome::Won => {
                    self.won += 1;
                    self.won_value += p.deal_value.unwrap_or_default();
                }
                DealOutcome::Lost => self.lost += 1,
            },
            EventPayload::LeadDisqualified(_) => self.disqualified += 1,
            _ => {}
        }
    }
}

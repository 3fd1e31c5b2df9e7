//! Side-effect intents emitted by the dispatcher.
//!
//! `apply` never performs I/O. Everything that should happen outside the
//! aggregate (scheduling, notifications, analytics) is described as an
//! [`Intent`] value and handed to an [`IntentPublisher`].

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::event::{DealOutcome, FollowUpType};
use crate::lead::{Cadence, LeadPriority, LeadStatus};

/// Queue an intent belongs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Topic {
    Leads,
    Notifications,
    Analytics,
}

impl Topic {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Leads => "leads",
            Self::Notifications => "notifications",
            Self::Analytics => "analytics",
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why an assignee is being notified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotifyReason {
    Assigned,
    FollowUpDue,
    StatusChanged,
    DealClosed,
}

/// What the intent asks the outside world to do.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all_fields = "camelCase")]
pub enum IntentKind {
    StatusChanged {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        from: Option<LeadStatus>,
        to: LeadStatus,
    },
    ScheduleFollowUp {
        at: DateTime<Utc>,
        cadence: Cadence,
    },
    ScheduleReminder {
        at: DateTime<Utc>,
        follow_up_type: FollowUpType,
        priority: LeadPriority,
        assigned_to: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        template_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        custom_message: Option<String>,
    },
    NotifyAssignee {
        assignee: String,
        reason: NotifyReason,
    },
    CancelFollowUps,
    RecordDealClosed {
        outcome: DealOutcome,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        deal_value: Option<f64>,
        conversion_time: f64,
        total_engagements: u32,
    },
    RecordDisqualified {
        reason: String,
        score: f64,
    },
}

impl IntentKind {
    /// Queue this kind of intent is routed to.
    pub fn topic(&self) -> Topic {
        match self {
            Self::NotifyAssignee { .. } => Topic::Notifications,
            Self::RecordDealClosed { .. } | Self::RecordDisqualified { .. } => Topic::Analytics,
            Self::StatusChanged { .. }
            | Self::ScheduleFollowUp { .. }
            | Self::ScheduleReminder { .. }
            | Self::CancelFollowUps => Topic::Leads,
        }
    }
}

/// A side effect requested by applying one event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Intent {
    pub lead_id: Uuid,
    /// Id of the event that produced this intent.
    pub event_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<Uuid>,
    #[serde(flatten)]
    pub kind: IntentKind,
}

impl Intent {
    pub fn topic(&self) -> Topic {
        self.kind.topic()
    }
}

/// Error returned when an intent could not be handed off.
#[derive(Debug, thiserror::Error)]
#[error("failed to publish intent: {0}")]
pub struct PublishError(pub String);

/// Destination for intents produced by a [`LeadStore`](crate::LeadStore).
///
/// Publishing is fire-and-forget: the store logs failures and carries on,
/// since the event is already persisted by the time intents go out.
pub trait IntentPublisher: Send + Sync + 'static {
    /// Hand one intent to the messaging layer.
    ///
    /// # Errors
    ///
    /// Returns [`PublishError`] if the intent could not be accepted.
    fn publish(&self, intent: &Intent) -> Result<(), PublishError>;
}

impl IntentPublisher for mpsc::UnboundedSender<Intent> {
    fn publish(&self, intent: &Intent) -> Result<(), PublishError> {
        self.send(intent.clone())
            .map_err(|_| PublishError("intent receiver dropped".into()))
    }
}

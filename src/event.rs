//! The lead event catalog: envelope, payloads, and the stamping factory.
//!
//! Every change to a lead is one of seven event kinds. On the wire an event
//! is a single JSON object: envelope fields (`id`, `timestamp`, `version`,
//! optional `correlationId` / `causationId` / `metadata`) next to a `type`
//! tag and the kind-specific `data` payload.
//!
//! ```json
//! {
//!   "id": "2f0c...",
//!   "timestamp": "2025-06-15T12:00:00Z",
//!   "version": "1.0.0",
//!   "type": "LeadEngaged",
//!   "data": { "leadId": "9a1e...", "engagementType": "call", ... }
//! }
//! ```

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::context::EventContext;
use crate::lead::{
    Cadence, Contact, EngagementChannel, LeadPriority, LeadSource, LeadStatus, PropertyInterest,
    QualificationFactors,
};

/// Schema version stamped on every event this crate produces.
pub const EVENT_VERSION: &str = "1.0.0";

// ---------------------------------------------------------------------------
// Payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeadCreated {
    pub lead_id: Uuid,
    pub contact: Contact,
    pub source: LeadSource,
    #[serde(default)]
    pub initial_tags: Vec<String>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub property: Option<PropertyInterest>,
    /// Defaults to `medium` when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<LeadPriority>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeadQualified {
    pub lead_id: Uuid,
    pub qualification_score: f64,
    pub ai_confidence: f64,
    pub factors: QualificationFactors,
    pub next_stage: LeadStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigned_to: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeadEngaged {
    pub lead_id: Uuid,
    pub engagement_type: EngagementChannel,
    pub content: String,
    pub response_received: bool,
    /// Milliseconds until the lead responded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_time: Option<f64>,
    pub next_follow_up_date: DateTime<Utc>,
    pub cadence: Cadence,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FollowUpType {
    Reminder,
    Escalation,
    SlaBreach,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FollowUpTriggered {
    pub lead_id: Uuid,
    pub follow_up_type: FollowUpType,
    pub scheduled_date: DateTime<Utc>,
    pub priority: LeadPriority,
    pub assigned_to: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeadStatusChanged {
    pub lead_id: Uuid,
    pub previous_status: LeadStatus,
    pub new_status: LeadStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub changed_by: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DealOutcome {
    Won,
    Lost,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DealClosed {
    pub lead_id: Uuid,
    pub outcome: DealOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deal_value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub close_reason: Option<String>,
    pub closed_by: String,
    /// Days from lead creation to close.
    pub conversion_time: f64,
    pub total_engagements: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeadDisqualified {
    pub lead_id: Uuid,
    pub reason: String,
    pub disqualified_by: String,
    pub qualification_score: f64,
    pub ai_confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

// ---------------------------------------------------------------------------
// Tagged union
// ---------------------------------------------------------------------------

/// Discriminant of an event, without its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    LeadCreated,
    LeadQualified,
    LeadEngaged,
    FollowUpTriggered,
    LeadStatusChanged,
    DealClosed,
    LeadDisqualified,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LeadCreated => "LeadCreated",
            Self::LeadQualified => "LeadQualified",
            Self::LeadEngaged => "LeadEngaged",
            Self::FollowUpTriggered => "FollowUpTriggered",
            Self::LeadStatusChanged => "LeadStatusChanged",
            Self::DealClosed => "DealClosed",
            Self::LeadDisqualified => "LeadDisqualified",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind-specific event data, adjacently tagged as `type` + `data`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum EventPayload {
    LeadCreated(LeadCreated),
    LeadQualified(LeadQualified),
    LeadEngaged(LeadEngaged),
    FollowUpTriggered(FollowUpTriggered),
    LeadStatusChanged(LeadStatusChanged),
    DealClosed(DealClosed),
    LeadDisqualified(LeadDisqualified),
}

impl EventPayload {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::LeadCreated(_) => EventKind::LeadCreated,
            Self::LeadQualified(_) => EventKind::LeadQualified,
            Self::LeadEngaged(_) => EventKind::LeadEngaged,
            Self::FollowUpTriggered(_) => EventKind::FollowUpTriggered,
            Self::LeadStatusChanged(_) => EventKind::LeadStatusChanged,
            Self::DealClosed(_) => EventKind::DealClosed,
            Self::LeadDisqualified(_) => EventKind::LeadDisqualified,
        }
    }

    /// The lead this event belongs to.
    pub fn lead_id(&self) -> Uuid {
        match self {
            Self::LeadCreated(p) => p.lead_id,
            Self::LeadQualified(p) => p.lead_id,
            Self::LeadEngaged(p) => p.lead_id,
            Self::FollowUpTriggered(p) => p.lead_id,
            Self::LeadStatusChanged(p) => p.lead_id,
            Self::DealClosed(p) => p.lead_id,
            Self::LeadDisqualified(p) => p.lead_id,
        }
    }

    /// Status a lead ends up in if this event is applied.
    pub fn target_status(&self) -> LeadStatus {
        match self {
            Self::LeadCreated(_) => LeadStatus::New,
            Self::LeadQualified(p) => p.next_stage,
            Self::LeadEngaged(_) => LeadStatus::Engaged,
            Self::FollowUpTriggered(_) => LeadStatus::FollowUp,
            Self::LeadStatusChanged(p) => p.new_status,
            Self::DealClosed(p) => match p.outcome {
                DealOutcome::Won => LeadStatus::ClosedWon,
                DealOutcome::Lost => LeadStatus::ClosedLost,
            },
            Self::LeadDisqualified(_) => LeadStatus::Disqualified,
        }
    }
}

macro_rules! impl_from_payload {
    ($($variant:ident),* $(,)?) => {
        $(
            impl From<$variant> for EventPayload {
                fn from(payload: $variant) -> Self {
                    Self::$variant(payload)
                }
            }
        )*
    };
}

impl_from_payload!(
    LeadCreated,
    LeadQualified,
    LeadEngaged,
    FollowUpTriggered,
    LeadStatusChanged,
    DealClosed,
    LeadDisqualified,
);

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

/// An immutable, stamped lead event.
///
/// Construct with [`LeadEvent::new`]; the envelope fields are read-only so
/// a producer can never forge an id or timestamp. Deserialization is the
/// only other way in, and deserialized events still have to pass
/// [`validate`](crate::validate) before they reach the dispatcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeadEvent {
    id: Uuid,
    timestamp: DateTime<Utc>,
    version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    correlation_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    causation_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    metadata: Option<Map<String, Value>>,
    #[serde(flatten)]
    payload: EventPayload,
}

impl LeadEvent {
    /// Build an event from a payload, stamping a fresh UUID v4 id, the
    /// current UTC time, and [`EVENT_VERSION`].
    ///
    /// # Examples
    ///
    /// ```
    /// use leadfold::{Contact, EventContext, EventKind, LeadCreated, LeadEvent, LeadSource};
    /// use uuid::Uuid;
    ///
    /// let event = LeadEvent::new(
    ///     LeadCreated {
    ///         lead_id: Uuid::new_v4(),
    ///         contact: Contact::new("John", "Doe", "john@x.com"),
    ///         source: LeadSource::Referral,
    ///         initial_tags: vec!["vip".into()],
    ///         metadata: Default::default(),
    ///         property: None,
    ///         priority: None,
    ///     },
    ///     &EventContext::default(),
    /// );
    /// assert_eq!(event.kind(), EventKind::LeadCreated);
    /// assert_eq!(event.version(), "1.0.0");
    /// ```
    pub fn new(payload: impl Into<EventPayload>, ctx: &EventContext) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            version: EVENT_VERSION.to_string(),
            correlation_id: ctx.correlation_id,
            causation_id: ctx.causation_id,
            metadata: ctx.metadata.clone(),
            payload: payload.into(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn correlation_id(&self) -> Option<Uuid> {
        self.correlation_id
    }

    pub fn causation_id(&self) -> Option<Uuid> {
        self.causation_id
    }

    pub fn metadata(&self) -> Option<&Map<String, Value>> {
        self.metadata.as_ref()
    }

    pub fn payload(&self) -> &EventPayload {
        &self.payload
    }

    pub fn kind(&self) -> EventKind {
        self.payload.kind()
    }

    pub fn lead_id(&self) -> Uuid {
        self.payload.lead_id()
    }

    /// Override the stamped timestamp. Test-only: lets tests place events
    /// at fixed points in time.
    #[cfg(test)]
    pub(crate) fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    #[cfg(test)]
    pub(crate) fn with_version(mut self, version: &str) -> Self {
        self.version = version.to_string();
        self
    }

    #[cfg(test)]
    pub(crate) fn payload_mut_for_test(&mut self) -> &mut EventPayload {
        &mut self.payload
    }
}

macro_rules! kind_factories {
    ($($name:ident => $payload:ident),* $(,)?) => {
        impl LeadEvent {
            $(
                #[doc = concat!("Stamp a `", stringify!($payload), "` event.")]
                pub fn $name(payload: $payload, ctx: &EventContext) -> Self {
                    Self::new(payload, ctx)
                }
            )*
        }
    };
}

kind_factories!(
    lead_created => LeadCreated,
    lead_qualified => LeadQualified,
    lead_engaged => LeadEngaged,
    follow_up_triggered => FollowUpTriggered,
    lead_status_changed => LeadStatusChanged,
    deal_closed => DealClosed,
    lead_disqualified => LeadDisqualified,
);

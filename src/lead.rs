//! The lead aggregate: current-state snapshot of one sales lead.
//!
//! A [`Lead`] is never built by hand. It comes into existence when a
//! `LeadCreated` event is applied and every later change arrives through
//! [`apply`](crate::apply). The types here are plain data plus the
//! invariants every snapshot must satisfy.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::ValidationError;
use crate::validate::{check_range, check_score};

// ---------------------------------------------------------------------------
// Enumerations
// ---------------------------------------------------------------------------

/// Lifecycle status of a lead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeadStatus {
    New,
    Qualified,
    Engaged,
    FollowUp,
    Negotiation,
    ClosedWon,
    ClosedLost,
    Disqualified,
}

impl LeadStatus {
    /// Every status, in pipeline order.
    pub const ALL: [LeadStatus; 8] = [
        Self::New,
        Self::Qualified,
        Self::Engaged,
        Self::FollowUp,
        Self::Negotiation,
        Self::ClosedWon,
        Self::ClosedLost,
        Self::Disqualified,
    ];

    /// Wire name of this status.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Qualified => "qualified",
            Self::Engaged => "engaged",
            Self::FollowUp => "follow_up",
            Self::Negotiation => "negotiation",
            Self::ClosedWon => "closed_won",
            Self::ClosedLost => "closed_lost",
            Self::Disqualified => "disqualified",
        }
    }

    /// Terminal statuses accept no further events.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::ClosedWon | Self::ClosedLost | Self::Disqualified)
    }

    /// Position in the sales pipeline, or `None` for terminal statuses.
    ///
    /// `Engaged` and `FollowUp` share a rank: a lead moves back and forth
    /// between them while it is being worked.
    pub fn pipeline_rank(&self) -> Option<u8> {
        match self {
            Self::New => Some(0),
            Self::Qualified => Some(1),
            Self::Engaged | Self::FollowUp => Some(2),
            Self::Negotiation => Some(3),
            Self::ClosedWon | Self::ClosedLost | Self::Disqualified => None,
        }
    }
}

impl fmt::Display for LeadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where the lead came from. Fixed at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeadSource {
    Website,
    ColdCall,
    Referral,
    SocialMedia,
    EmailCampaign,
    TradeShow,
    Partner,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeadPriority {
    Low,
    #[default]
    Medium,
    High,
    Urgent,
}

/// Channel an engagement happened on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngagementChannel {
    Email,
    Sms,
    Call,
    Meeting,
    Note,
}

impl EngagementChannel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Email => "email",
            Self::Sms => "sms",
            Self::Call => "call",
            Self::Meeting => "meeting",
            Self::Note => "note",
        }
    }
}

/// Delivery state of an outbound engagement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Sent,
    Delivered,
    Opened,
    Clicked,
    Replied,
    Failed,
}

/// How often a lead should be followed up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cadence {
    Daily,
    #[default]
    Weekly,
    Biweekly,
    Monthly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropertyType {
    Residential,
    Commercial,
    Land,
    Investment,
}

// ---------------------------------------------------------------------------
// Value types
// ---------------------------------------------------------------------------

/// Contact details for the person behind a lead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contact {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub company: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub linkedin_url: Option<String>,
}

impl Contact {
    /// Contact with just the required fields set.
    pub fn new(
        first_name: impl Into<String>,
        last_name: impl Into<String>,
        email: impl Into<String>,
    ) -> Self {
        Self {
            first_name: first_name.into(),
            last_name: last_name.into(),
            email: email.into(),
            phone: None,
            company: None,
            job_title: None,
            linkedin_url: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceRange {
    pub min: f64,
    pub max: f64,
    /// ISO 4217 code, e.g. `"USD"`.
    pub currency: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    pub city: String,
    pub state: String,
    pub country: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zip_code: Option<String>,
}

/// Real-estate interest expressed by the lead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertyInterest {
    pub property_type: PropertyType,
    pub price_range: PriceRange,
    pub location: Location,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bedrooms: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bathrooms: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub square_footage: Option<f64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub features: Vec<String>,
}

/// The five scoring dimensions, each in `[0, 10]`.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct QualificationFactors {
    pub budget: f64,
    pub timeline: f64,
    pub motivation: f64,
    pub authority: f64,
    pub need: f64,
}

impl QualificationFactors {
    /// Each factor paired with its wire path.
    pub fn named(&self) -> [(&'static str, f64); 5] {
        [
            ("factors.budget", self.budget),
            ("factors.timeline", self.timeline),
            ("factors.motivation", self.motivation),
            ("factors.authority", self.authority),
            ("factors.need", self.need),
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Qualification {
    /// Overall score in `[0, 100]`.
    pub score: f64,
    pub factors: QualificationFactors,
    /// Scorer confidence in `[0, 1]`.
    pub ai_confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manual_override: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

/// One entry in the engagement history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Engagement {
    /// Id of the event that recorded this engagement.
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub channel: EngagementChannel,
    pub content: String,
    pub status: DeliveryStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FollowUpSchedule {
    pub next_follow_up: DateTime<Utc>,
    pub cadence: Cadence,
    /// Reminder times in the order they were scheduled.
    pub reminders: Vec<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Aggregate
// ---------------------------------------------------------------------------

/// Authoritative snapshot of one lead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Lead {
    pub id: Uuid,
    pub contact: Contact,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub property: Option<PropertyInterest>,
    pub status: LeadStatus,
    pub source: LeadSource,
    pub priority: LeadPriority,
    pub qualification: Qualification,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigned_to: Option<String>,
    pub tags: BTreeSet<String>,
    pub notes: Vec<String>,
    pub engagement_history: Vec<Engagement>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub follow_up_schedule: Option<FollowUpSchedule>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_contacted_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_close_date: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actual_close_date: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deal_value: Option<f64>,
    pub conversion_probability: f64,
    /// Number of events folded into this snapshot.
    pub version: u64,
}

impl Lead {
    /// Whether this lead has reached a terminal status.
    pub fn is_closed(&self) -> bool {
        self.status.is_terminal()
    }

    /// Check the invariants every snapshot must hold.
    ///
    /// The dispatcher maintains these by construction. The check exists for
    /// snapshots that arrive from outside, e.g. loaded from disk.
    ///
    /// # Errors
    ///
    /// Returns the first violated invariant as a [`ValidationError`].
    pub fn check_invariants(&self) -> Result<(), ValidationError> {
        check_score("qualification.score", self.qualification.score)?;
        check_range("qualification.aiConfidence", self.qualification.ai_confidence, 0.0, 1.0)?;
        for (field, value) in self.qualification.factors.named() {
            check_range(field, value, 0.0, 10.0)?;
        }
        check_range("conversionProbability", self.conversion_probability, 0.0, 1.0)?;

        match (self.status, self.deal_value) {
            (LeadStatus::ClosedWon, None) => {
                return Err(ValidationError::new(
                    "dealValue",
                    "closed_won lead must carry a deal value",
                ));
            }
            (LeadStatus::ClosedWon, Some(value)) if !(value.is_finite() && value >= 0.0) => {
                return Err(ValidationError::new("dealValue", "must be a non-negative amount"));
            }
            (status, Some(_)) if status != LeadStatus::ClosedWon => {
                return Err(ValidationError::new(
                    "dealValue",
                    format!("must be absent while lead is {status}"),
                ));
            }
            _ => {}
        }

        if self.updated_at < self.created_at {
            return Err(ValidationError::new("updatedAt", "must not precede createdAt"));
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod test_fixtures {
    use super::*;
    use chrono::TimeZone;

    pub(crate) fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_750_000_000 + secs, 0)
            .single()
            .expect("valid timestamp")
    }

    /// A freshly created lead with no history beyond creation.
    pub(crate) fn new_lead() -> Lead {
        Lead {
            id: Uuid::new_v4(),
            contact: Contact::new("John", "Doe", "john@x.com"),
            property: None,
            status: LeadStatus::New,
            source: LeadSource::Website,
            priority: LeadPriority::Medium,
            qualification: Qualification::default(),
            assigned_to: None,
            tags: BTreeSet::new(),
            notes: Vec::new(),
            engagement_history: Vec::new(),
            follow_up_schedule: None,
            metadata: Map::new(),
            created_at: ts(0),
            updated_at: ts(0),
            last_contacted_at: None,
            expected_close_date: None,
            actual_close_date: None,
            deal_value: None,
            conversion_probability: 0.0,
            version: 1,
        }
    }
}

//! Structural and referential validation of lead events.
//!
//! Structural checks look at one event in isolation: ranges, required
//! strings, formats, and date ordering relative to the event's own
//! timestamp. Referential checks compare the event with the aggregate it
//! targets. Transition legality is the dispatcher's concern and is not
//! checked here.

use std::sync::LazyLock;

use regex::Regex;
use uuid::Uuid;

use crate::error::{ConflictError, LeadError, NotFoundError, ValidationError};
use crate::event::{
    DealClosed, DealOutcome, EventPayload, FollowUpTriggered, LeadCreated, LeadDisqualified,
    LeadEngaged, LeadEvent, LeadQualified, LeadStatusChanged,
};
use crate::lead::{Contact, EngagementChannel, Lead, LeadStatus, PropertyInterest};

static EMAIL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("email pattern is a valid regex")
});

static HTTP_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^https?://[^\s/$.?#][^\s]*$").expect("url pattern is a valid regex")
});

static SEMVER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d+\.\d+\.\d+$").expect("semver pattern is a valid regex"));

static CURRENCY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Z]{3}$").expect("currency pattern is a valid regex"));

/// An event that has passed [`validate`].
///
/// Only `validate` can construct one, so holding a `ValidEvent` proves the
/// payload is structurally sound. Referential checks are repeated by
/// [`apply`](crate::apply) because the aggregate may have moved on since.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidEvent(LeadEvent);

impl ValidEvent {
    pub fn event(&self) -> &LeadEvent {
        &self.0
    }

    pub fn into_inner(self) -> LeadEvent {
        self.0
    }
}

impl AsRef<LeadEvent> for ValidEvent {
    fn as_ref(&self) -> &LeadEvent {
        &self.0
    }
}

/// Validate an event against its schema and the lead it targets.
///
/// # Arguments
///
/// * `event` - The candidate event.
/// * `current` - The lead's current aggregate, or `None` if no lead with
///   the event's id exists.
///
/// # Errors
///
/// * [`LeadError::Validation`] - a field is malformed or out of range.
/// * [`LeadError::NotFound`] - a non-creation event targets a missing lead.
/// * [`LeadError::Conflict`] - duplicate creation, misrouted event, or a
///   stale `previousStatus`.
pub fn validate(event: LeadEvent, current: Option<&Lead>) -> Result<ValidEvent, LeadError> {
    check_structure(&event)?;
    check_references(&event, current)?;
    Ok(ValidEvent(event))
}

/// Structural validation only.
///
/// # Errors
///
/// Returns the first offending field as a [`ValidationError`].
pub fn check_structure(event: &LeadEvent) -> Result<(), ValidationError> {
    if !SEMVER.is_match(event.version()) {
        return Err(ValidationError::new(
            "version",
            format!("expected MAJOR.MINOR.PATCH, got {:?}", event.version()),
        ));
    }
    if event.id().is_nil() {
        return Err(ValidationError::new("id", "must not be the nil UUID"));
    }
    if event.lead_id().is_nil() {
        return Err(ValidationError::new("leadId", "must not be the nil UUID"));
    }

    match event.payload() {
        EventPayload::LeadCreated(p) => check_created(p),
        EventPayload::LeadQualified(p) => check_qualified(p),
        EventPayload::LeadEngaged(p) => check_engaged(p, event),
        EventPayload::FollowUpTriggered(p) => check_follow_up(p, event),
        EventPayload::LeadStatusChanged(p) => check_status_changed(p),
        EventPayload::DealClosed(p) => check_deal_closed(p),
        EventPayload::LeadDisqualified(p) => check_disqualified(p),
    }
}

/// Referential validation: does the event fit the aggregate it targets?
///
/// # Errors
///
/// See [`validate`].
pub(crate) fn check_references(event: &LeadEvent, current: Option<&Lead>) -> Result<(), LeadError> {
    let lead_id = event.lead_id();
    let Some(lead) = current else {
        return match event.payload() {
            EventPayload::LeadCreated(_) => Ok(()),
            _ => Err(NotFoundError { lead_id }.into()),
        };
    };

    if lead.id != lead_id {
        return Err(ConflictError::LeadMismatch {
            expected: lead_id,
            actual: lead.id,
        }
        .into());
    }

    match event.payload() {
        EventPayload::LeadCreated(_) => Err(ConflictError::AlreadyExists { lead_id }.into()),
        EventPayload::LeadStatusChanged(p) if p.previous_status != lead.status => {
            Err(ConflictError::StaleStatus {
                lead_id,
                expected: p.previous_status,
                actual: lead.status,
            }
            .into())
        }
        _ => Ok(()),
    }
}

// ---------------------------------------------------------------------------
// Per-kind checks
// ---------------------------------------------------------------------------

fn check_created(p: &LeadCreated) -> Result<(), ValidationError> {
    check_contact(&p.contact)?;
    if p.initial_tags.iter().any(|tag| tag.trim().is_empty()) {
        return Err(ValidationError::new("initialTags", "tags must not be blank"));
    }
    if let Some(property) = &p.property {
        check_property(property)?;
    }
    Ok(())
}

fn check_qualified(p: &LeadQualified) -> Result<(), ValidationError> {
    check_score("qualificationScore", p.qualification_score)?;
    check_confidence("aiConfidence", p.ai_confidence)?;
    for (field, value) in p.factors.named() {
        check_range(field, value, 0.0, 10.0)?;
    }
    if p.next_stage.is_terminal() || p.next_stage == LeadStatus::New {
        return Err(ValidationError::new(
            "nextStage",
            format!("{} is not a qualification stage", p.next_stage),
        ));
    }
    check_optional_actor("assignedTo", p.assigned_to.as_deref())
}

fn check_engaged(p: &LeadEngaged, event: &LeadEvent) -> Result<(), ValidationError> {
    if p.engagement_type == EngagementChannel::Note {
        return Err(ValidationError::new(
            "engagementType",
            "must be one of email, sms, call, meeting",
        ));
    }
    if let Some(ms) = p.response_time {
        check_non_negative("responseTime", ms)?;
    }
    if p.next_follow_up_date < event.timestamp() {
        return Err(ValidationError::new(
            "nextFollowUpDate",
            "must not be earlier than the event timestamp",
        ));
    }
    Ok(())
}

fn check_follow_up(p: &FollowUpTriggered, event: &LeadEvent) -> Result<(), ValidationError> {
    if p.scheduled_date < event.timestamp() {
        return Err(ValidationError::new(
            "scheduledDate",
            "must not be earlier than the event timestamp",
        ));
    }
    check_actor("assignedTo", &p.assigned_to)
}

fn check_status_changed(p: &LeadStatusChanged) -> Result<(), ValidationError> {
    if p.previous_status == p.new_status {
        return Err(ValidationError::new(
            "newStatus",
            "must differ from previousStatus",
        ));
    }
    check_actor("changedBy", &p.changed_by)
}

fn check_deal_closed(p: &DealClosed) -> Result<(), ValidationError> {
    match (p.outcome, p.deal_value) {
        (DealOutcome::Won, None) => {
            return Err(ValidationError::new(
                "dealValue",
                "required when outcome is won",
            ));
        }
        (DealOutcome::Won, Some(value)) => check_non_negative("dealValue", value)?,
        (DealOutcome::Lost, Some(_)) => {
            return Err(ValidationError::new(
                "dealValue",
                "must be absent when outcome is lost",
            ));
        }
        (DealOutcome::Lost, None) => {}
    }
    check_non_negative("conversionTime", p.conversion_time)?;
    check_actor("closedBy", &p.closed_by)
}

fn check_disqualified(p: &LeadDisqualified) -> Result<(), ValidationError> {
    if p.reason.trim().is_empty() {
        return Err(ValidationError::new("reason", "must not be empty"));
    }
    check_actor("disqualifiedBy", &p.disqualified_by)?;
    check_score("qualificationScore", p.qualification_score)?;
    check_confidence("aiConfidence", p.ai_confidence)
}

fn check_contact(contact: &Contact) -> Result<(), ValidationError> {
    if contact.first_name.trim().is_empty() {
        return Err(ValidationError::new("contact.firstName", "first name is required"));
    }
    if contact.last_name.trim().is_empty() {
        return Err(ValidationError::new("contact.lastName", "last name is required"));
    }
    if !EMAIL.is_match(&contact.email) {
        return Err(ValidationError::new(
            "contact.email",
            format!("{:?} is not a valid email address", contact.email),
        ));
    }
    if let Some(url) = &contact.linkedin_url
        && !HTTP_URL.is_match(url)
    {
        return Err(ValidationError::new(
            "contact.linkedinUrl",
            "must be an http(s) URL",
        ));
    }
    Ok(())
}

fn check_property(property: &PropertyInterest) -> Result<(), ValidationError> {
    let range = &property.price_range;
    check_non_negative("property.priceRange.min", range.min)?;
    check_non_negative("property.priceRange.max", range.max)?;
    if range.min > range.max {
        return Err(ValidationError::new(
            "property.priceRange",
            "min must not exceed max",
        ));
    }
    if !CURRENCY.is_match(&range.currency) {
        return Err(ValidationError::new(
            "property.priceRange.currency",
            "must be a three-letter currency code",
        ));
    }

    let location = &property.location;
    for (field, value) in [
        ("property.location.city", &location.city),
        ("property.location.state", &location.state),
        ("property.location.country", &location.country),
    ] {
        if value.trim().is_empty() {
            return Err(ValidationError::new(field, "is required"));
        }
    }

    if let Some(bathrooms) = property.bathrooms {
        check_non_negative("property.bathrooms", bathrooms)?;
    }
    if let Some(area) = property.square_footage {
        check_non_negative("property.squareFootage", area)?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Primitive checks
// ---------------------------------------------------------------------------

/// Check that `value` lies in `[min, max]`. NaN always fails.
pub(crate) fn check_range(
    field: &'static str,
    value: f64,
    min: f64,
    max: f64,
) -> Result<(), ValidationError> {
    if (min..=max).contains(&value) {
        Ok(())
    } else {
        Err(ValidationError::new(
            field,
            format!("{value} is outside [{min}, {max}]"),
        ))
    }
}

pub(crate) fn check_score(field: &'static str, value: f64) -> Result<(), ValidationError> {
    check_range(field, value, 0.0, 100.0)
}

fn check_confidence(field: &'static str, value: f64) -> Result<(), ValidationError> {
    check_range(field, value, 0.0, 1.0)
}

fn check_non_negative(field: &'static str, value: f64) -> Result<(), ValidationError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(ValidationError::new(
            field,
            format!("{value} is not a finite non-negative number"),
        ))
    }
}

/// Actor ids (assignees, closers, approvers) are user UUIDs.
fn check_actor(field: &'static str, id: &str) -> Result<(), ValidationError> {
    if id.trim().is_empty() {
        return Err(ValidationError::new(field, "must not be empty"));
    }
    Uuid::parse_str(id)
        .map(|_| ())
        .map_err(|_| ValidationError::new(field, format!("{id:?} is not a UUID")))
}

fn check_optional_actor(field: &'static str, id: Option<&str>) -> Result<(), ValidationError> {
    id.map_or(Ok(()), |id| check_actor(field, id))
}

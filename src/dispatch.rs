//! The lead lifecycle state machine.
//!
//! [`apply`] folds one validated event onto the current aggregate and
//! returns the next aggregate together with the [`Intent`]s the change
//! calls for. It is pure: the input aggregate is never mutated and nothing
//! here touches a clock, a disk, or a socket.

use std::collections::BTreeSet;

use crate::error::{ConflictError, IllegalTransitionError, LeadError, NotFoundError};
use crate::event::{
    DealClosed, DealOutcome, EventPayload, FollowUpTriggered, LeadCreated, LeadDisqualified,
    LeadEngaged, LeadEvent, LeadQualified,
};
use crate::intent::{Intent, IntentKind, NotifyReason};
use crate::lead::{
    Cadence, DeliveryStatus, Engagement, FollowUpSchedule, Lead, LeadStatus, Qualification,
};
use crate::validate::{ValidEvent, check_references, validate};

/// Result of applying one event: the next aggregate and its side effects.
#[derive(Debug, Clone, PartialEq)]
pub struct Applied {
    pub lead: Lead,
    pub intents: Vec<Intent>,
}

/// Apply a validated event to the current aggregate.
///
/// Referential checks are repeated here, so an event validated against an
/// older aggregate is still rejected if the lead has moved on.
///
/// # Arguments
///
/// * `current` - The lead's aggregate, or `None` if it does not exist yet.
/// * `event` - An event that passed [`validate`].
///
/// # Returns
///
/// The new aggregate and the intents to publish. `current` is left as is.
///
/// # Errors
///
/// * [`LeadError::NotFound`] - no aggregate and the event is not `LeadCreated`.
/// * [`LeadError::Conflict`] - misrouted event, duplicate creation, or a
///   stale `previousStatus`.
/// * [`LeadError::IllegalTransition`] - the lead is terminal, or the state
///   machine has no edge for this event from the current status.
pub fn apply(current: Option<&Lead>, event: &ValidEvent) -> Result<Applied, LeadError> {
    let event = event.event();
    let lead_id = event.lead_id();

    let Some(lead) = current else {
        return match event.payload() {
            EventPayload::LeadCreated(p) => Ok(create(event, p)),
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
    if lead.is_closed() {
        return Err(illegal(lead, event).into());
    }
    check_references(event, Some(lead))?;
    if !is_legal(lead.status, event.payload()) {
        return Err(illegal(lead, event).into());
    }

    let mut next = lead.clone();
    next.version += 1;
    next.updated_at = next.updated_at.max(event.timestamp());
    next.status = event.payload().target_status();

    let mut intents = Intents::new(event);
    if next.status != lead.status {
        intents.push(IntentKind::StatusChanged {
            from: Some(lead.status),
            to: next.status,
        });
    }

    match event.payload() {
        // Rejected by `check_references` above.
        EventPayload::LeadCreated(_) => {
            return Err(ConflictError::AlreadyExists { lead_id }.into());
        }
        EventPayload::LeadQualified(p) => qualify(&mut next, p, &mut intents),
        EventPayload::LeadEngaged(p) => engage(&mut next, event, p, &mut intents),
        EventPayload::FollowUpTriggered(p) => trigger_follow_up(&mut next, p, &mut intents),
        EventPayload::LeadStatusChanged(_) => {
            notify_owner(&next, NotifyReason::StatusChanged, &mut intents);
        }
        EventPayload::DealClosed(p) => close(&mut next, event, p, &mut intents),
        EventPayload::LeadDisqualified(p) => disqualify(&mut next, p, &mut intents),
    }

    Ok(Applied {
        lead: next,
        intents: intents.finish(),
    })
}

/// Fold a full event history into an aggregate.
///
/// Each event is validated against the state built so far and then
/// applied, exactly as a live submission would be.
///
/// # Returns
///
/// `Ok(None)` for an empty history.
///
/// # Errors
///
/// The first [`LeadError`] raised by any event in the sequence.
pub fn replay<I>(events: I) -> Result<Option<Lead>, LeadError>
where
    I: IntoIterator<Item = LeadEvent>,
{
    replay_onto(None, events)
}

/// Like [`replay`], but starting from an existing aggregate.
pub(crate) fn replay_onto<I>(start: Option<Lead>, events: I) -> Result<Option<Lead>, LeadError>
where
    I: IntoIterator<Item = LeadEvent>,
{
    events.into_iter().try_fold(start, |state, event| {
        let valid = validate(event, state.as_ref())?;
        apply(state.as_ref(), &valid).map(|applied| Some(applied.lead))
    })
}

// ---------------------------------------------------------------------------
// Transition table
// ---------------------------------------------------------------------------

fn is_legal(from: LeadStatus, payload: &EventPayload) -> bool {
    if from.is_terminal() {
        return false;
    }
    match payload {
        EventPayload::LeadCreated(_) => false,
        // Re-scoring may hold the stage or advance it, never regress it.
        EventPayload::LeadQualified(p) => {
            match (from.pipeline_rank(), p.next_stage.pipeline_rank()) {
                (Some(current), Some(target)) => {
                    p.next_stage != LeadStatus::New && target >= current
                }
                _ => false,
            }
        }
        EventPayload::LeadEngaged(_) => matches!(
            from,
            LeadStatus::Qualified | LeadStatus::FollowUp | LeadStatus::Negotiation
        ),
        EventPayload::FollowUpTriggered(_) => {
            matches!(from, LeadStatus::Engaged | LeadStatus::Negotiation)
        }
        EventPayload::LeadStatusChanged(p) => {
            !p.new_status.is_terminal() && p.new_status != LeadStatus::New && p.new_status != from
        }
        EventPayload::DealClosed(_) | EventPayload::LeadDisqualified(_) => true,
    }
}

fn illegal(lead: &Lead, event: &LeadEvent) -> IllegalTransitionError {
    IllegalTransitionError {
        lead_id: lead.id,
        event: event.kind(),
        from: lead.status,
        to: event.payload().target_status(),
    }
}

// ---------------------------------------------------------------------------
// Mutations
// ---------------------------------------------------------------------------

fn create(event: &LeadEvent, p: &LeadCreated) -> Applied {
    let lead = Lead {
        id: p.lead_id,
        contact: p.contact.clone(),
        property: p.property.clone(),
        status: LeadStatus::New,
        source: p.source,
        priority: p.priority.unwrap_or_default(),
        qualification: Qualification::default(),
        assigned_to: None,
        tags: p.initial_tags.iter().cloned().collect::<BTreeSet<_>>(),
        notes: Vec::new(),
        engagement_history: Vec::new(),
        follow_up_schedule: None,
        metadata: p.metadata.clone(),
        created_at: event.timestamp(),
        updated_at: event.timestamp(),
        last_contacted_at: None,
        expected_close_date: None,
        actual_close_date: None,
        deal_value: None,
        conversion_probability: 0.0,
        version: 1,
    };

    let mut intents = Intents::new(event);
    intents.push(IntentKind::StatusChanged {
        from: None,
        to: LeadStatus::New,
    });
    Applied {
        lead,
        intents: intents.finish(),
    }
}

fn qualify(lead: &mut Lead, p: &LeadQualified, intents: &mut Intents) {
    lead.qualification = Qualification {
        score: p.qualification_score,
        factors: p.factors,
        ai_confidence: p.ai_confidence,
        manual_override: None,
        notes: p.notes.clone(),
    };
    lead.conversion_probability = p.qualification_score / 100.0 * p.ai_confidence;

    if let Some(assignee) = &p.assigned_to {
        lead.assigned_to = Some(assignee.clone());
        intents.push(IntentKind::NotifyAssignee {
            assignee: assignee.clone(),
            reason: NotifyReason::Assigned,
        });
    }
}

fn engage(lead: &mut Lead, event: &LeadEvent, p: &LeadEngaged, intents: &mut Intents) {
    lead.engagement_history.push(Engagement {
        id: event.id(),
        timestamp: event.timestamp(),
        channel: p.engagement_type,
        content: p.content.clone(),
        status: if p.response_received {
            DeliveryStatus::Replied
        } else {
            DeliveryStatus::Sent
        },
    });
    lead.last_contacted_at = Some(
        lead.last_contacted_at
            .map_or(event.timestamp(), |prev| prev.max(event.timestamp())),
    );

    match &mut lead.follow_up_schedule {
        Some(schedule) => {
            schedule.next_follow_up = p.next_follow_up_date;
            schedule.cadence = p.cadence;
        }
        None => {
            lead.follow_up_schedule = Some(FollowUpSchedule {
                next_follow_up: p.next_follow_up_date,
                cadence: p.cadence,
                reminders: Vec::new(),
            });
        }
    }

    intents.push(IntentKind::ScheduleFollowUp {
        at: p.next_follow_up_date,
        cadence: p.cadence,
    });
}

fn trigger_follow_up(lead: &mut Lead, p: &FollowUpTriggered, intents: &mut Intents) {
    lead.priority = p.priority;
    lead.assigned_to = Some(p.assigned_to.clone());
    lead.follow_up_schedule
        .get_or_insert_with(|| FollowUpSchedule {
            next_follow_up: p.scheduled_date,
            cadence: Cadence::default(),
            reminders: Vec::new(),
        })
        .reminders
        .push(p.scheduled_date);

    intents.push(IntentKind::ScheduleReminder {
        at: p.scheduled_date,
        follow_up_type: p.follow_up_type,
        priority: p.priority,
        assigned_to: p.assigned_to.clone(),
        template_id: p.template_id.clone(),
        custom_message: p.custom_message.clone(),
    });
    intents.push(IntentKind::NotifyAssignee {
        assignee: p.assigned_to.clone(),
        reason: NotifyReason::FollowUpDue,
    });
}

fn close(lead: &mut Lead, event: &LeadEvent, p: &DealClosed, intents: &mut Intents) {
    match p.outcome {
        DealOutcome::Won => {
            lead.deal_value = p.deal_value;
            lead.conversion_probability = 1.0;
        }
        DealOutcome::Lost => {
            lead.deal_value = None;
            lead.conversion_probability = 0.0;
        }
    }
    lead.actual_close_date = Some(event.timestamp());
    if let Some(notes) = &p.final_notes {
        lead.notes.push(notes.clone());
    }

    cancel_schedule(lead, intents);
    intents.push(IntentKind::RecordDealClosed {
        outcome: p.outcome,
        deal_value: lead.deal_value,
        conversion_time: p.conversion_time,
        total_engagements: p.total_engagements,
    });
    notify_owner(lead, NotifyReason::DealClosed, intents);
}

fn disqualify(lead: &mut Lead, p: &LeadDisqualified, intents: &mut Intents) {
    lead.qualification.score = p.qualification_score;
    lead.qualification.ai_confidence = p.ai_confidence;
    lead.conversion_probability = 0.0;
    if let Some(notes) = &p.notes {
        lead.notes.push(notes.clone());
    }

    cancel_schedule(lead, intents);
    intents.push(IntentKind::RecordDisqualified {
        reason: p.reason.clone(),
        score: p.qualification_score,
    });
}

fn cancel_schedule(lead: &Lead, intents: &mut Intents) {
    if lead.follow_up_schedule.is_some() {
        intents.push(IntentKind::CancelFollowUps);
    }
}

fn notify_owner(lead: &Lead, reason: NotifyReason, intents: &mut Intents) {
    if let Some(assignee) = &lead.assigned_to {
        intents.push(IntentKind::NotifyAssignee {
            assignee: assignee.clone(),
            reason,
        });
    }
}

/// Collects intents stamped with the causing event's identity.
struct Intents<'a> {
    event: &'a LeadEvent,
    out: Vec<Intent>,
}

impl<'a> Intents<'a> {
    fn new(event: &'a LeadEvent) -> Self {
        Self {
            event,
            out: Vec::new(),
        }
    }

    fn push(&mut self, kind: IntentKind) {
        self.out.push(Intent {
            lead_id: self.event.lead_id(),
            event_id: self.event.id(),
            correlation_id: self.event.correlation_id(),
            kind,
        });
    }

    fn finish(self) -> Vec<Intent> {
        self.out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::FollowUpType;
    use crate::event::test_fixtures::*;
    use crate::intent::Topic;
    use crate::lead::test_fixtures::ts;
    use crate::lead::EngagementChannel;
    use crate::{EventContext, LeadPriority};
    use uuid::Uuid;

    fn step(lead: Option<&Lead>, event: LeadEvent) -> Result<Applied, LeadError> {
        let valid = validate(event, lead)?;
        apply(lead, &valid)
    }

    fn ok(lead: Option<&Lead>, event: LeadEvent) -> Applied {
        step(lead, event).expect("event should apply")
    }

    fn kinds(applied: &Applied) -> Vec<&IntentKind> {
        applied.intents.iter().map(|i| &i.kind).collect()
    }

    /// A lead walked to `status` through legal events.
    fn lead_in(status: LeadStatus) -> Lead {
        let id = Uuid::new_v4();
        let lead = ok(None, created(id).at(ts(0))).lead;
        let lead = match status {
            LeadStatus::New => return lead,
            LeadStatus::Qualified | LeadStatus::Engaged | LeadStatus::FollowUp => {
                ok(Some(&lead), qualified(id, 80.0, LeadStatus::Qualified).at(ts(1))).lead
            }
            LeadStatus::Negotiation => {
                ok(Some(&lead), qualified(id, 80.0, LeadStatus::Negotiation).at(ts(1))).lead
            }
            LeadStatus::ClosedWon => {
                ok(Some(&lead), closed(id, DealOutcome::Won, Some(1.0)).at(ts(1))).lead
            }
            LeadStatus::ClosedLost => {
                ok(Some(&lead), closed(id, DealOutcome::Lost, None).at(ts(1))).lead
            }
            LeadStatus::Disqualified => ok(Some(&lead), disqualified(id).at(ts(1))).lead,
        };
        let lead = match status {
            LeadStatus::Engaged | LeadStatus::FollowUp => {
                ok(Some(&lead), engaged(id, EngagementChannel::Call).at(ts(2))).lead
            }
            _ => return lead,
        };
        match status {
            LeadStatus::FollowUp => {
                ok(Some(&lead), follow_up(id, FollowUpType::Reminder).at(ts(3))).lead
            }
            _ => lead,
        }
    }

    #[test]
    fn lead_in_reaches_every_status() {
        for status in LeadStatus::ALL {
            assert_eq!(lead_in(status).status, status);
        }
    }

    #[derive(Debug, Clone, Copy, PartialEq)]
    enum Outcome {
        Legal,
        Illegal,
        Conflict,
    }

    fn outcome(lead: &Lead, event: LeadEvent) -> Outcome {
        match step(Some(lead), event) {
            Ok(_) => Outcome::Legal,
            Err(LeadError::IllegalTransition(_)) => Outcome::Illegal,
            Err(LeadError::Conflict(_)) => Outcome::Conflict,
            Err(other) => panic!("unexpected rejection: {other}"),
        }
    }

    #[test]
    fn transition_table_covers_every_status_and_kind() {
        type Build = fn(Uuid, LeadStatus) -> LeadEvent;
        let open = [
            LeadStatus::New,
            LeadStatus::Qualified,
            LeadStatus::Engaged,
            LeadStatus::FollowUp,
            LeadStatus::Negotiation,
        ];
        let table: [(&str, Build, &[LeadStatus]); 8] = [
            ("LeadCreated", |id, _| created(id), &[]),
            (
                "LeadQualified(qualified)",
                |id, _| qualified(id, 80.0, LeadStatus::Qualified),
                &[LeadStatus::New, LeadStatus::Qualified],
            ),
            (
                "LeadQualified(negotiation)",
                |id, _| qualified(id, 80.0, LeadStatus::Negotiation),
                &open,
            ),
            (
                "LeadEngaged",
                |id, _| engaged(id, EngagementChannel::Email),
                &[
                    LeadStatus::Qualified,
                    LeadStatus::FollowUp,
                    LeadStatus::Negotiation,
                ],
            ),
            (
                "FollowUpTriggered",
                |id, _| follow_up(id, FollowUpType::Reminder),
                &[LeadStatus::Engaged, LeadStatus::Negotiation],
            ),
            (
                "LeadStatusChanged",
                |id, from| {
                    let to = if from == LeadStatus::Negotiation {
                        LeadStatus::Engaged
                    } else {
                        LeadStatus::Negotiation
                    };
                    status_changed(id, from, to)
                },
                &open,
            ),
            (
                "DealClosed",
                |id, _| closed(id, DealOutcome::Won, Some(10.0)),
                &open,
            ),
            ("LeadDisqualified", |id, _| disqualified(id), &open),
        ];

        for status in LeadStatus::ALL {
            for (label, build, legal_from) in &table {
                let lead = lead_in(status);
                let expected = if *label == "LeadCreated" {
                    // Duplicate creation is refused before the table is consulted.
                    Outcome::Conflict
                } else if legal_from.contains(&status) {
                    Outcome::Legal
                } else {
                    Outcome::Illegal
                };
                assert_eq!(
                    outcome(&lead, build(lead.id, status)),
                    expected,
                    "{label} from {status}"
                );
            }
        }
    }

    #[test]
    fn creation_yields_new_lead() {
        let id = Uuid::new_v4();
        let event = created(id);
        let at = event.timestamp();
        let applied = ok(None, event);
        let lead = &applied.lead;

        assert_eq!(lead.id, id);
        assert_eq!(lead.status, LeadStatus::New);
        assert_eq!(lead.created_at, at);
        assert_eq!(lead.updated_at, at);
        assert_eq!(lead.priority, LeadPriority::Medium);
        assert_eq!(lead.version, 1);
        assert_eq!(lead.conversion_probability, 0.0);
        assert!(lead.tags.contains("vip") && lead.tags.contains("inbound"));
        lead.check_invariants().expect("created lead is valid");

        assert_eq!(
            kinds(&applied),
            vec![&IntentKind::StatusChanged {
                from: None,
                to: LeadStatus::New
            }]
        );
    }

    #[test]
    fn apply_does_not_mutate_input() {
        let lead = lead_in(LeadStatus::Qualified);
        let before = lead.clone();
        let _ = ok(Some(&lead), engaged(lead.id, EngagementChannel::Email));
        assert_eq!(lead, before);
    }

    #[test]
    fn qualification_sets_score_assignee_and_probability() {
        let lead = lead_in(LeadStatus::New);
        let applied = ok(Some(&lead), qualified(lead.id, 85.0, LeadStatus::Qualified));
        let next = &applied.lead;

        assert_eq!(next.status, LeadStatus::Qualified);
        assert_eq!(next.qualification.score, 85.0);
        assert_eq!(next.assigned_to.as_deref(), Some(AGENT));
        assert!((next.conversion_probability - 0.68).abs() < 1e-9);
        assert_eq!(next.version, 2);

        assert_eq!(
            kinds(&applied),
            vec![
                &IntentKind::StatusChanged {
                    from: Some(LeadStatus::New),
                    to: LeadStatus::Qualified
                },
                &IntentKind::NotifyAssignee {
                    assignee: AGENT.into(),
                    reason: NotifyReason::Assigned
                },
            ]
        );
        assert_eq!(applied.intents[1].topic(), Topic::Notifications);
    }

    #[test]
    fn requalifying_in_place_emits_no_status_change() {
        let lead = lead_in(LeadStatus::Qualified);
        let applied = ok(Some(&lead), qualified(lead.id, 40.0, LeadStatus::Qualified));
        assert_eq!(applied.lead.qualification.score, 40.0);
        assert!(
            !applied
                .intents
                .iter()
                .any(|i| matches!(i.kind, IntentKind::StatusChanged { .. }))
        );
    }

    #[test]
    fn qualification_cannot_move_backwards() {
        let lead = lead_in(LeadStatus::Negotiation);
        let err = step(Some(&lead), qualified(lead.id, 90.0, LeadStatus::Qualified)).unwrap_err();
        match err {
            LeadError::IllegalTransition(e) => {
                assert_eq!(e.from, LeadStatus::Negotiation);
                assert_eq!(e.to, LeadStatus::Qualified);
            }
            other => panic!("expected illegal transition, got {other:?}"),
        }

        // Engaged and follow_up share a rank.
        let lead = lead_in(LeadStatus::FollowUp);
        ok(Some(&lead), qualified(lead.id, 90.0, LeadStatus::Engaged));
    }

    #[test]
    fn engagement_records_history_and_schedule() {
        let lead = lead_in(LeadStatus::Qualified);
        let event = engaged(lead.id, EngagementChannel::Call).at(ts(10));
        let event_id = event.id();
        let applied = ok(Some(&lead), event);
        let next = &applied.lead;

        assert_eq!(next.status, LeadStatus::Engaged);
        assert_eq!(next.engagement_history.len(), 1);
        let record = &next.engagement_history[0];
        assert_eq!(record.id, event_id);
        assert_eq!(record.channel, EngagementChannel::Call);
        assert_eq!(record.status, DeliveryStatus::Replied);
        assert_eq!(next.last_contacted_at, Some(ts(10)));

        let schedule = next.follow_up_schedule.as_ref().expect("schedule");
        assert_eq!(schedule.cadence, Cadence::Weekly);
        assert!(schedule.reminders.is_empty());
        assert!(applied.intents.iter().any(|i| matches!(
            i.kind,
            IntentKind::ScheduleFollowUp { at, .. } if at == schedule.next_follow_up
        )));
    }

    #[test]
    fn engagement_requires_a_qualified_lead() {
        let lead = lead_in(LeadStatus::New);
        let err = step(Some(&lead), engaged(lead.id, EngagementChannel::Sms)).unwrap_err();
        assert!(matches!(err, LeadError::IllegalTransition(_)), "got {err:?}");

        let lead = lead_in(LeadStatus::Engaged);
        let err = step(Some(&lead), engaged(lead.id, EngagementChannel::Sms)).unwrap_err();
        assert!(matches!(err, LeadError::IllegalTransition(_)), "got {err:?}");
    }

    #[test]
    fn follow_up_appends_reminder_and_notifies() {
        let lead = lead_in(LeadStatus::Engaged);
        let event = follow_up(lead.id, FollowUpType::Escalation);
        let scheduled = match event.payload() {
            EventPayload::FollowUpTriggered(p) => p.scheduled_date,
            _ => unreachable!(),
        };
        let applied = ok(Some(&lead), event);
        let next = &applied.lead;

        assert_eq!(next.status, LeadStatus::FollowUp);
        assert_eq!(next.priority, LeadPriority::High);
        let schedule = next.follow_up_schedule.as_ref().expect("schedule");
        assert_eq!(schedule.reminders, vec![scheduled]);

        let topics: Vec<_> = applied.intents.iter().map(Intent::topic).collect();
        assert_eq!(topics, vec![Topic::Leads, Topic::Leads, Topic::Notifications]);
    }

    #[test]
    fn follow_up_without_schedule_creates_weekly_one() {
        let mut lead = lead_in(LeadStatus::Engaged);
        lead.follow_up_schedule = None;
        let next = ok(Some(&lead), follow_up(lead.id, FollowUpType::Reminder)).lead;
        let schedule = next.follow_up_schedule.expect("schedule");
        assert_eq!(schedule.cadence, Cadence::Weekly);
        assert_eq!(schedule.reminders.len(), 1);
        assert_eq!(schedule.next_follow_up, schedule.reminders[0]);
    }

    #[test]
    fn status_change_is_checked_against_current_status() {
        let lead = lead_in(LeadStatus::Engaged);
        let event = status_changed(lead.id, LeadStatus::Engaged, LeadStatus::Negotiation);
        let applied = ok(Some(&lead), event.clone());
        assert_eq!(applied.lead.status, LeadStatus::Negotiation);
        assert!(applied.intents.iter().any(|i| i.kind
            == IntentKind::NotifyAssignee {
                assignee: AGENT.into(),
                reason: NotifyReason::StatusChanged,
            }));

        // The same event again is stale.
        let err = step(Some(&applied.lead), event).unwrap_err();
        assert!(
            matches!(err, LeadError::Conflict(ConflictError::StaleStatus { .. })),
            "got {err:?}"
        );
    }

    #[test]
    fn apply_rechecks_stale_validated_events() {
        let lead = lead_in(LeadStatus::Engaged);
        let first = status_changed(lead.id, LeadStatus::Engaged, LeadStatus::Negotiation);
        let second = status_changed(lead.id, LeadStatus::Engaged, LeadStatus::FollowUp);
        let first = validate(first, Some(&lead)).expect("valid");
        let second = validate(second, Some(&lead)).expect("valid");

        let moved = apply(Some(&lead), &first).expect("first wins").lead;
        let err = apply(Some(&moved), &second).unwrap_err();
        match err {
            LeadError::Conflict(ConflictError::StaleStatus {
                expected, actual, ..
            }) => {
                assert_eq!(expected, LeadStatus::Engaged);
                assert_eq!(actual, LeadStatus::Negotiation);
            }
            other => panic!("expected stale status, got {other:?}"),
        }
    }

    #[test]
    fn status_change_cannot_close_or_reset() {
        let lead = lead_in(LeadStatus::Qualified);
        for to in [LeadStatus::New, LeadStatus::ClosedWon, LeadStatus::Disqualified] {
            let event = status_changed(lead.id, LeadStatus::Qualified, to);
            let err = step(Some(&lead), event).unwrap_err();
            assert!(matches!(err, LeadError::IllegalTransition(_)), "{to}: {err:?}");
        }
    }

    #[test]
    fn won_deal_sets_value_and_closes_out() {
        let lead = lead_in(LeadStatus::FollowUp);
        let event = closed(lead.id, DealOutcome::Won, Some(750_000.0)).at(ts(100));
        let applied = ok(Some(&lead), event);
        let next = &applied.lead;

        assert_eq!(next.status, LeadStatus::ClosedWon);
        assert_eq!(next.deal_value, Some(750_000.0));
        assert_eq!(next.actual_close_date, Some(ts(100)));
        assert_eq!(next.conversion_probability, 1.0);
        assert_eq!(next.notes.last().map(String::as_str), Some("signed"));
        next.check_invariants().expect("won lead is valid");

        let kinds = kinds(&applied);
        assert!(kinds.contains(&&IntentKind::CancelFollowUps));
        assert!(kinds.contains(&&IntentKind::RecordDealClosed {
            outcome: DealOutcome::Won,
            deal_value: Some(750_000.0),
            conversion_time: 30.0,
            total_engagements: 4,
        }));
        assert!(kinds.contains(&&IntentKind::NotifyAssignee {
            assignee: AGENT.into(),
            reason: NotifyReason::DealClosed,
        }));
    }

    #[test]
    fn lost_deal_has_no_value() {
        let lead = lead_in(LeadStatus::Negotiation);
        let next = ok(Some(&lead), closed(lead.id, DealOutcome::Lost, None)).lead;
        assert_eq!(next.status, LeadStatus::ClosedLost);
        assert_eq!(next.deal_value, None);
        assert_eq!(next.conversion_probability, 0.0);
        next.check_invariants().expect("lost lead is valid");
    }

    #[test]
    fn disqualification_replaces_score() {
        let lead = lead_in(LeadStatus::Qualified);
        let applied = ok(Some(&lead), disqualified(lead.id));
        let next = &applied.lead;
        assert_eq!(next.status, LeadStatus::Disqualified);
        assert_eq!(next.qualification.score, 12.0);
        assert_eq!(next.qualification.ai_confidence, 0.9);
        assert_eq!(next.conversion_probability, 0.0);
        assert_eq!(next.notes, vec!["revisit next year".to_string()]);
        assert!(!kinds(&applied).contains(&&IntentKind::CancelFollowUps));
        assert!(kinds(&applied).contains(&&IntentKind::RecordDisqualified {
            reason: "no budget".into(),
            score: 12.0,
        }));
    }

    #[test]
    fn no_event_leaves_a_terminal_state() {
        for status in [
            LeadStatus::ClosedWon,
            LeadStatus::ClosedLost,
            LeadStatus::Disqualified,
        ] {
            let lead = lead_in(status);
            let id = lead.id;
            let events = vec![
                qualified(id, 50.0, LeadStatus::Qualified),
                engaged(id, EngagementChannel::Call),
                follow_up(id, FollowUpType::Reminder),
                status_changed(id, status, LeadStatus::Negotiation),
                closed(id, DealOutcome::Won, Some(5.0)),
                disqualified(id),
            ];
            for event in events {
                let kind = event.kind();
                let err = step(Some(&lead), event).unwrap_err();
                assert!(
                    matches!(err, LeadError::IllegalTransition(ref e) if e.from == status),
                    "{kind} from {status}: {err:?}"
                );
            }

            // A creation validated before the lead existed is refused too.
            let valid = validate(created(id), None).expect("valid");
            let err = apply(Some(&lead), &valid).unwrap_err();
            assert!(matches!(err, LeadError::IllegalTransition(_)), "got {err:?}");
        }
    }

    #[test]
    fn creation_on_live_lead_conflicts() {
        let lead = lead_in(LeadStatus::Engaged);
        let valid = validate(created(lead.id), None).expect("valid");
        let err = apply(Some(&lead), &valid).unwrap_err();
        assert!(
            matches!(err, LeadError::Conflict(ConflictError::AlreadyExists { .. })),
            "got {err:?}"
        );
    }

    #[test]
    fn missing_aggregate_is_not_found() {
        let lead = lead_in(LeadStatus::Qualified);
        let valid = validate(engaged(lead.id, EngagementChannel::Call), Some(&lead)).expect("valid");
        let err = apply(None, &valid).unwrap_err();
        assert!(matches!(err, LeadError::NotFound(_)), "got {err:?}");
    }

    #[test]
    fn misrouted_event_conflicts_even_when_terminal() {
        let other = lead_in(LeadStatus::Qualified);
        let valid = validate(disqualified(other.id), Some(&other)).expect("valid");
        let closed_lead = lead_in(LeadStatus::ClosedWon);
        let err = apply(Some(&closed_lead), &valid).unwrap_err();
        assert!(
            matches!(err, LeadError::Conflict(ConflictError::LeadMismatch { .. })),
            "got {err:?}"
        );
    }

    #[test]
    fn updated_at_never_goes_backwards() {
        let lead = lead_in(LeadStatus::Qualified);
        let late = ok(Some(&lead), engaged(lead.id, EngagementChannel::Call).at(ts(500))).lead;
        let early = ok(
            Some(&late),
            status_changed(lead.id, LeadStatus::Engaged, LeadStatus::Negotiation).at(ts(200)),
        )
        .lead;
        assert_eq!(early.updated_at, ts(500));
        assert!(early.updated_at >= early.created_at);
    }

    #[test]
    fn intents_carry_event_identity() {
        let lead = lead_in(LeadStatus::Qualified);
        let corr = Uuid::new_v4();
        let event = LeadEvent::new(
            crate::event::LeadDisqualified {
                lead_id: lead.id,
                reason: "spam".into(),
                disqualified_by: "bot".into(),
                qualification_score: 0.0,
                ai_confidence: 1.0,
                notes: None,
            },
            &EventContext::default().with_correlation_id(corr),
        );
        let event_id = event.id();
        let applied = ok(Some(&lead), event);
        assert!(!applied.intents.is_empty());
        for intent in &applied.intents {
            assert_eq!(intent.lead_id, lead.id);
            assert_eq!(intent.event_id, event_id);
            assert_eq!(intent.correlation_id, Some(corr));
        }
    }

    #[test]
    fn full_scenario_and_double_close() {
        let id = Uuid::new_v4();
        let history = vec![
            created(id).at(ts(0)),
            qualified(id, 85.0, LeadStatus::Qualified).at(ts(60)),
            engaged(id, EngagementChannel::Call).at(ts(120)),
            closed(id, DealOutcome::Won, Some(750_000.0)).at(ts(180)),
        ];

        let mut state: Option<Lead> = None;
        for event in history.clone() {
            state = Some(ok(state.as_ref(), event).lead);
        }
        let lead = state.expect("lead exists");
        assert_eq!(lead.status, LeadStatus::ClosedWon);
        assert_eq!(lead.deal_value, Some(750_000.0));
        assert_eq!(lead.engagement_history.len(), 1);
        assert_eq!(lead.version, 4);
        assert_eq!(lead.updated_at, ts(180));

        let err = step(Some(&lead), closed(id, DealOutcome::Won, Some(1.0))).unwrap_err();
        assert!(matches!(err, LeadError::IllegalTransition(_)), "got {err:?}");

        let replayed = replay(history).expect("replay").expect("non-empty");
        assert_eq!(replayed, lead);
    }

    #[test]
    fn replay_of_nothing_is_none() {
        assert_eq!(replay(Vec::new()).expect("replay"), None);
    }

    #[test]
    fn replay_stops_at_first_bad_event() {
        let id = Uuid::new_v4();
        let err = replay(vec![
            created(id),
            engaged(id, EngagementChannel::Call),
            qualified(id, 50.0, LeadStatus::Qualified),
        ])
        .unwrap_err();
        assert!(matches!(err, LeadError::IllegalTransition(_)), "got {err:?}");
    }
}

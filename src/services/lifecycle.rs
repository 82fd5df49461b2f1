use chrono::{DateTime, TimeZone, Utc};
use chrono_tz::Tz;

use crate::db::{self, queries};
use crate::models::booking::BOOKING_CREATED;
use crate::models::{BookingEvent, Lead, LeadStatus, Severity, StatusChange};
use crate::services::activity::log_action;
use crate::services::mailbox::send_paced;
use crate::services::notify::Alert;
use crate::services::router::RoutingDecision;
use crate::state::AppState;

/// Whole calendar days from `last` to `now`, both taken at midnight in `tz`.
/// Negative when `last` lies in the future.
pub fn calendar_days_between(last: &DateTime<Utc>, now: &DateTime<Utc>, tz: Tz) -> i64 {
    let last_day = last.with_timezone(&tz).date_naive();
    let today = now.with_timezone(&tz).date_naive();
    (today - last_day).num_days()
}

/// True once `window_days` calendar days have passed since last contact.
/// Leads with no recorded contact are never due.
pub fn is_due(last_contact: Option<&DateTime<Utc>>, now: &DateTime<Utc>, tz: Tz, window_days: i64) -> bool {
    last_contact
        .map(|last| calendar_days_between(last, now, tz) >= window_days)
        .unwrap_or(false)
}

/// Instant the current calendar day began in `tz`.
pub fn start_of_local_day(now: &DateTime<Utc>, tz: Tz) -> DateTime<Utc> {
    let midnight = now.with_timezone(&tz).date_naive().and_time(chrono::NaiveTime::MIN);
    tz.from_local_datetime(&midnight)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
        // Zones that skip midnight on a DST change start the day an hour later.
        .or_else(|| {
            tz.from_local_datetime(&(midnight + chrono::Duration::hours(1)))
                .earliest()
                .map(|dt| dt.with_timezone(&Utc))
        })
        .unwrap_or(*now)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyOutcome {
    /// Transition written and message recorded as handled.
    Applied(LeadStatus),
    /// The lead moved on before the write; message recorded, nothing changed.
    Stale,
    /// The prospect email could not be sent; nothing recorded so the next
    /// run retries.
    SendFailed,
}

impl ReplyOutcome {
    pub fn is_recorded(&self) -> bool {
        !matches!(self, ReplyOutcome::SendFailed)
    }
}

/// Writes the router's decision for one inbound message and fires the side
/// effect that goes with it. The status change and the processed-message
/// record commit together.
pub async fn apply_decision(
    state: &AppState,
    lead: &Lead,
    message_id: &str,
    reply: &str,
    decision: RoutingDecision,
) -> anyhow::Result<ReplyOutcome> {
    let lead_id = lead.lead_id.as_deref();
    let email = Some(lead.email.as_str());
    let label = decision.label();

    match decision {
        RoutingDecision::Unqualified { reason, opted_out } => {
            let applied = commit(state, lead, LeadStatus::Unqualified, message_id, label)?;
            if applied {
                if opted_out {
                    log_action(
                        &state.db,
                        "ReplyOptOut",
                        lead_id,
                        email,
                        "Lead opted out via reply.",
                        Severity::Success,
                    );
                }
                log_action(
                    &state.db,
                    "LeadUnqualified",
                    lead_id,
                    email,
                    &format!("Status set to UNQUALIFIED. Reason: {reason}"),
                    Severity::Info,
                );
                Ok(ReplyOutcome::Applied(LeadStatus::Unqualified))
            } else {
                Ok(ReplyOutcome::Stale)
            }
        }
        RoutingDecision::ManualReview { reason } => {
            let applied = commit(state, lead, LeadStatus::NeedsManualReview, message_id, label)?;
            if !applied {
                return Ok(ReplyOutcome::Stale);
            }
            log_action(
                &state.db,
                "LeadManualReview",
                lead_id,
                email,
                &format!("Lead flagged for manual review. Reason: {reason}"),
                Severity::Warning,
            );
            state
                .notifier
                .notify(&Alert::manual_review(lead, &reason, reply))
                .await;
            Ok(ReplyOutcome::Applied(LeadStatus::NeedsManualReview))
        }
        RoutingDecision::Hot { email: outbound, result } => {
            if !lead.status.can_transition_to(LeadStatus::Hot) {
                commit(state, lead, LeadStatus::Hot, message_id, label)?;
                return Ok(ReplyOutcome::Stale);
            }

            let sent = send_paced(
                state.mailbox.as_ref(),
                &outbound.to,
                &outbound.subject,
                &outbound.body,
                state.config.policy.send_delay,
            )
            .await;
            if let Err(e) = sent {
                log_action(
                    &state.db,
                    "HotFollowUpSendError",
                    lead_id,
                    email,
                    &format!("Failed to send qualified follow-up: {e}"),
                    Severity::Error,
                );
                return Ok(ReplyOutcome::SendFailed);
            }

            let applied = match commit(state, lead, LeadStatus::Hot, message_id, label) {
                Ok(applied) => applied,
                Err(e) => {
                    // The prospect already has the email; keep the next run from sending it again.
                    record_unsent_commit(state, lead, message_id);
                    log_action(
                        &state.db,
                        "HotFollowUpCommitError",
                        lead_id,
                        email,
                        &format!("Follow-up sent but the status change failed: {e}"),
                        Severity::Error,
                    );
                    return Err(e);
                }
            };
            log_action(
                &state.db,
                "HotFollowUpSent",
                lead_id,
                email,
                &format!(
                    "Qualified follow-up sent (Sentiment: {}, Confidence: {:.2}). Subject: {}",
                    result.sentiment.as_str(),
                    result.confidence(),
                    outbound.subject
                ),
                Severity::Success,
            );
            if !applied {
                return Ok(ReplyOutcome::Stale);
            }
            state.notifier.notify(&Alert::hot_lead(lead, &result)).await;
            Ok(ReplyOutcome::Applied(LeadStatus::Hot))
        }
    }
}

/// Applies `lead -> to` (when the edge is legal) and records the message in
/// one transaction. Returns whether the lead row changed.
fn commit(
    state: &AppState,
    lead: &Lead,
    to: LeadStatus,
    message_id: &str,
    outcome: &str,
) -> anyhow::Result<bool> {
    let change = lead
        .status
        .can_transition_to(to)
        .then(|| StatusChange::new(lead, to).touching_contact(Utc::now()));
    if change.is_none() {
        tracing::warn!(lead_id = lead.display_id(), from = %lead.status, to = %to, "illegal transition ignored");
    }

    let mut conn = db::lock(&state.db)?;
    let outcome = if change.is_some() { outcome } else { "IGNORED" };
    queries::apply_reply_outcome(&mut conn, change.as_ref(), message_id, outcome)
}

/// Best-effort ledger row for a message whose follow-up went out but whose
/// status change did not commit.
fn record_unsent_commit(state: &AppState, lead: &Lead, message_id: &str) {
    let recorded = db::lock(&state.db).and_then(|conn| {
        queries::mark_message_processed(&conn, message_id, lead.lead_id.as_deref(), HOT_SEND_UNCOMMITTED)
    });
    if let Err(e) = recorded {
        tracing::error!(message_id, error = %e, "could not record sent follow-up");
    }
}

pub const HOT_SEND_UNCOMMITTED: &str = "HOT_SEND_UNCOMMITTED";

#[derive(Debug, thiserror::Error)]
pub enum TransitionError {
    #[error("lead {0} not found")]
    NotFound(String),

    #[error("cannot move lead from {from} to {to}")]
    Illegal { from: LeadStatus, to: LeadStatus },

    #[error("lead changed status while the update was in flight")]
    Stale,

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

/// Human decision on a lead parked in NEEDS_MANUAL_REVIEW.
pub fn resolve_manual_review(
    state: &AppState,
    lead_id: &str,
    to: LeadStatus,
) -> Result<Lead, TransitionError> {
    let allowed = matches!(
        to,
        LeadStatus::Hot | LeadStatus::Unqualified | LeadStatus::Booked
    );

    let lead = {
        let conn = db::lock(&state.db)?;
        let lead = queries::find_lead(&conn, Some(lead_id), None)?
            .ok_or_else(|| TransitionError::NotFound(lead_id.to_string()))?;

        if lead.status != LeadStatus::NeedsManualReview || !allowed {
            return Err(TransitionError::Illegal { from: lead.status, to });
        }

        let change = StatusChange::new(&lead, to).touching_contact(Utc::now());
        if !queries::apply_status_change(&conn, &change)? {
            return Err(TransitionError::Stale);
        }
        queries::find_lead(&conn, Some(lead_id), None)?
            .ok_or_else(|| TransitionError::NotFound(lead_id.to_string()))?
    };

    log_action(
        &state.db,
        "ManualReviewResolved",
        Some(lead_id),
        Some(&lead.email),
        &format!("Resolved by operator to {to}."),
        Severity::Success,
    );
    Ok(lead)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BookingOutcome {
    Booked(String),
    Duplicate,
    UnknownLead,
    AlreadyTerminal(LeadStatus),
    Ignored,
}

/// Handles one delivery of the booking webhook. Redeliveries of an event id
/// already seen are acknowledged without effect.
pub async fn handle_booking(state: &AppState, event: BookingEvent) -> anyhow::Result<BookingOutcome> {
    let email = event.email.trim().to_string();

    if event.event_type != BOOKING_CREATED {
        log_action(
            &state.db,
            "BookingEventIgnored",
            None,
            Some(&email),
            &format!("Ignoring booking event type {}.", event.event_type),
            Severity::Info,
        );
        return Ok(BookingOutcome::Ignored);
    }

    let (outcome, lead) = {
        let mut conn = db::lock(&state.db)?;
        let tx = conn.transaction()?;

        let result = if !queries::record_booking_event(&tx, &event)? {
            (BookingOutcome::Duplicate, None)
        } else {
            match queries::find_lead_by_email(&tx, &email)? {
                None => (BookingOutcome::UnknownLead, None),
                Some(lead) if !lead.status.can_transition_to(LeadStatus::Booked) => {
                    (BookingOutcome::AlreadyTerminal(lead.status), Some(lead))
                }
                Some(lead) => {
                    let change = StatusChange::new(&lead, LeadStatus::Booked).touching_contact(Utc::now());
                    if queries::apply_status_change(&tx, &change)? {
                        (BookingOutcome::Booked(lead.display_id().to_string()), Some(lead))
                    } else {
                        (BookingOutcome::AlreadyTerminal(lead.status), Some(lead))
                    }
                }
            }
        };
        tx.commit()?;
        result
    };

    let lead_id = lead.as_ref().and_then(|l| l.lead_id.as_deref());
    match &outcome {
        BookingOutcome::Duplicate => log_action(
            &state.db,
            "BookingDuplicate",
            None,
            Some(&email),
            &format!("Booking event {} already handled.", event.event_id),
            Severity::Debug,
        ),
        BookingOutcome::UnknownLead => log_action(
            &state.db,
            "BookingUnknownLead",
            None,
            Some(&email),
            "Booking received for an email with no lead record.",
            Severity::Warning,
        ),
        BookingOutcome::AlreadyTerminal(status) => log_action(
            &state.db,
            "BookingIgnoredTerminal",
            lead_id,
            Some(&email),
            &format!("Booking received for lead already in {status}."),
            Severity::Info,
        ),
        BookingOutcome::Booked(_) => {
            log_action(
                &state.db,
                "LeadBooked",
                lead_id,
                Some(&email),
                "Status set to BOOKED from booking webhook.",
                Severity::Success,
            );
            if let Some(lead) = &lead {
                state
                    .notifier
                    .notify(&Alert::booking(lead, event.scheduled_at, state.config.timezone))
                    .await;
            }
        }
        BookingOutcome::Ignored => {}
    }

    Ok(outcome)
}

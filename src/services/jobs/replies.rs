use crate::db::{self, queries};
use crate::models::{MailThread, Severity};
use crate::services::activity::log_action;
use crate::services::batch::JobSummary;
use crate::services::lifecycle::{self, ReplyOutcome};
use crate::services::mailbox::{extract_sender_email, UNREAD_REPLIES_QUERY};
use crate::services::router;
use crate::state::AppState;

/// Outcomes recorded for messages that never reach the router.
const NO_SENDER: &str = "NO_SENDER";
const UNKNOWN_SENDER: &str = "UNKNOWN_SENDER";
const IGNORED: &str = "IGNORED";

/// Routes every unread reply from a lead that is waiting on one. A failure
/// on one thread is logged and the scan moves on to the next.
pub async fn run(state: &AppState) -> anyhow::Result<JobSummary> {
    let mut summary = JobSummary::default();
    let limit = state.config.policy.reply_scan_limit;

    let threads = match state.mailbox.search(UNREAD_REPLIES_QUERY, limit).await {
        Ok(threads) => threads,
        Err(e) => {
            log_action(
                &state.db,
                "ProcessRepliesSearchError",
                None,
                None,
                &format!("Failed to search for unread replies: {e:#}"),
                Severity::Error,
            );
            summary.failed += 1;
            return Ok(summary);
        }
    };
    tracing::info!(threads = threads.len(), "scanning unread replies");

    for thread in &threads {
        summary.examined += 1;
        match process_thread(state, thread).await {
            Ok(Handled::Routed(ReplyOutcome::Applied(_))) => summary.updated += 1,
            Ok(Handled::Routed(ReplyOutcome::SendFailed)) => summary.failed += 1,
            Ok(Handled::Routed(ReplyOutcome::Stale)) | Ok(Handled::Skipped) => summary.skipped += 1,
            Err(e) => {
                summary.failed += 1;
                log_action(
                    &state.db,
                    "ProcessRepliesThreadError",
                    None,
                    None,
                    &format!("Error processing thread {}: {e:#}", thread.id),
                    Severity::Error,
                );
            }
        }
    }

    Ok(summary)
}

enum Handled {
    Routed(ReplyOutcome),
    Skipped,
}

async fn process_thread(state: &AppState, thread: &MailThread) -> anyhow::Result<Handled> {
    let Some(message) = thread.latest() else {
        return Ok(Handled::Skipped);
    };

    let already = {
        let conn = db::lock(&state.db)?;
        queries::is_message_processed(&conn, &message.id)?
    };
    if already {
        mark_read(state, &thread.id).await;
        return Ok(Handled::Skipped);
    }

    let Some(sender) = extract_sender_email(&message.from) else {
        tracing::warn!(thread_id = %thread.id, from = %message.from, "reply without a sender address");
        record(state, &message.id, None, NO_SENDER)?;
        mark_read(state, &thread.id).await;
        return Ok(Handled::Skipped);
    };

    let lead = {
        let conn = db::lock(&state.db)?;
        queries::find_lead_by_email(&conn, &sender)?
    };
    let Some(lead) = lead else {
        tracing::debug!(sender = %sender, "reply from an address that is not a lead");
        record(state, &message.id, None, UNKNOWN_SENDER)?;
        mark_read(state, &thread.id).await;
        return Ok(Handled::Skipped);
    };

    if !lead.status.awaits_reply() {
        log_action(
            &state.db,
            "ProcessRepliesWrongStatus",
            lead.lead_id.as_deref(),
            Some(&lead.email),
            &format!("Reply received but lead status is {}. Not routed.", lead.status),
            Severity::Info,
        );
        record(state, &message.id, lead.lead_id.as_deref(), IGNORED)?;
        mark_read(state, &thread.id).await;
        return Ok(Handled::Skipped);
    }

    let reply = router::strip_quoted(&message.body);
    let decision = router::route(state, &lead, &reply).await;
    let outcome = lifecycle::apply_decision(state, &lead, &message.id, &reply, decision).await?;
    if outcome.is_recorded() {
        mark_read(state, &thread.id).await;
    }
    Ok(Handled::Routed(outcome))
}

fn record(state: &AppState, message_id: &str, lead_id: Option<&str>, outcome: &str) -> anyhow::Result<()> {
    let conn = db::lock(&state.db)?;
    queries::mark_message_processed(&conn, message_id, lead_id, outcome)?;
    Ok(())
}

/// Best effort; the processed-message ledger is what prevents reprocessing.
async fn mark_read(state: &AppState, thread_id: &str) {
    if let Err(e) = state.mailbox.mark_read(thread_id).await {
        tracing::warn!(error = %e, thread_id, "failed to mark thread read");
    }
}

use chrono::Utc;
use uuid::Uuid;

use crate::db::{self, queries};
use crate::models::lead::is_valid_email;
use crate::models::{LeadStatus, Severity, StatusChange};
use crate::services::activity::log_action;
use crate::services::ai::{classifier, prompts};
use crate::services::batch::{BatchWriter, JobSummary};
use crate::services::mailbox::send_paced;
use crate::services::{lifecycle, router};
use crate::state::AppState;

/// Action recorded for every initial email; the daily cap counts these.
pub const INITIAL_EMAIL_SENT: &str = "InitialEmailSent";

/// Sends the first email to PENDING leads, up to what remains of today's
/// quota.
pub async fn run(state: &AppState) -> anyhow::Result<JobSummary> {
    let config = &state.config;
    let policy = &config.policy;
    let now = Utc::now();
    let day_start = lifecycle::start_of_local_day(&now, config.timezone);

    let (sent_today, leads) = {
        let conn = db::lock(&state.db)?;
        (
            queries::count_actions_since(&conn, INITIAL_EMAIL_SENT, &day_start)?,
            queries::list_leads(&conn, Some(LeadStatus::Pending))?,
        )
    };
    let mut remaining = policy.daily_send_quota.saturating_sub(sent_today);

    let mut summary = JobSummary::default();
    let mut writer = BatchWriter::new(policy.flush_every);

    for mut lead in leads {
        if remaining == 0 {
            log_action(
                &state.db,
                "DailyBatchQuotaReached",
                None,
                None,
                &format!(
                    "Daily email quota of {} reached ({} sent today). Stopping batch.",
                    policy.daily_send_quota,
                    sent_today + summary.sent
                ),
                Severity::Info,
            );
            break;
        }
        summary.examined += 1;

        if !is_valid_email(&lead.email) {
            writer.stage(&state.db, StatusChange::new(&lead, LeadStatus::InvalidEmail));
            log_action(
                &state.db,
                "DailyBatchInvalidEmail",
                lead.lead_id.as_deref(),
                Some(&lead.email),
                "Invalid email format.",
                Severity::Error,
            );
            continue;
        }

        if lead.lead_id.is_none() {
            let new_id = Uuid::new_v4().to_string();
            let assigned = {
                let conn = db::lock(&state.db)?;
                queries::assign_lead_id(&conn, lead.row_id, &new_id)?
            };
            if assigned {
                log_action(
                    &state.db,
                    "DailyBatchLeadIDGenerated",
                    Some(&new_id),
                    Some(&lead.email),
                    "Generated new Lead ID.",
                    Severity::Info,
                );
                lead.lead_id = Some(new_id);
            } else {
                // Someone else set it first; the stored value wins.
                let conn = db::lock(&state.db)?;
                lead.lead_id = queries::find_lead_by_email(&conn, &lead.email)?
                    .and_then(|stored| stored.lead_id);
            }
        }
        let lead_id = lead.lead_id.as_deref();
        let email = Some(lead.email.as_str());

        let prompt = prompts::initial_email(lead.greeting_name(), &lead.last_service);
        let Some(raw) = classifier::complete(state.llm.as_ref(), &prompt).await else {
            log_action(
                &state.db,
                "DailyBatchAIError",
                lead_id,
                email,
                "Failed to generate content for initial email.",
                Severity::Error,
            );
            summary.failed += 1;
            continue;
        };

        let subject = router::initial_subject(&lead.last_service);
        let body = router::compose_with_footer(&raw, &config.email_footer);

        match send_paced(state.mailbox.as_ref(), &lead.email, &subject, &body, policy.send_delay).await {
            Ok(()) => {
                writer.stage(
                    &state.db,
                    StatusChange::new(&lead, LeadStatus::Sent).touching_contact(Utc::now()),
                );
                remaining -= 1;
                summary.sent += 1;
                log_action(
                    &state.db,
                    INITIAL_EMAIL_SENT,
                    lead_id,
                    email,
                    &format!("Initial email sent. Subject: {subject}"),
                    Severity::Success,
                );
            }
            Err(e) => {
                summary.failed += 1;
                log_action(
                    &state.db,
                    "DailyBatchSendFail",
                    lead_id,
                    email,
                    &format!("Failed to send initial email: {e}"),
                    Severity::Warning,
                );
            }
        }
    }

    writer.flush(&state.db)?;
    summary.updated = writer.applied();
    Ok(summary)
}

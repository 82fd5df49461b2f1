use chrono::Utc;

use crate::db::{self, queries};
use crate::models::{LeadStatus, Severity, StatusChange};
use crate::services::activity::log_action;
use crate::services::ai::{classifier, prompts};
use crate::services::batch::{BatchWriter, JobSummary};
use crate::services::mailbox::send_paced;
use crate::services::{lifecycle, router};
use crate::state::AppState;

/// Sends the single follow-up to SENT leads that have not replied within the
/// follow-up window and moves them to FOLLOW_UP_1.
pub async fn run(state: &AppState) -> anyhow::Result<JobSummary> {
    let config = &state.config;
    let policy = &config.policy;
    let now = Utc::now();

    let leads = {
        let conn = db::lock(&state.db)?;
        queries::list_leads(&conn, Some(LeadStatus::Sent))?
    };

    let mut summary = JobSummary::default();
    let mut writer = BatchWriter::new(policy.flush_every);

    for lead in leads {
        summary.examined += 1;
        let lead_id = lead.lead_id.as_deref();
        let email = Some(lead.email.as_str());

        if lead.last_contact.is_none() {
            log_action(
                &state.db,
                "FollowUpWarning",
                lead_id,
                email,
                "Missing Last Contact date. Skipping follow-up.",
                Severity::Warning,
            );
            summary.skipped += 1;
            continue;
        }

        if !lifecycle::is_due(lead.last_contact.as_ref(), &now, config.timezone, policy.follow_up_after_days) {
            continue;
        }

        let prompt = prompts::follow_up_email(lead.greeting_name(), &lead.last_service);
        let Some(raw) = classifier::complete(state.llm.as_ref(), &prompt).await else {
            log_action(
                &state.db,
                "FollowUpAIError",
                lead_id,
                email,
                "Failed to generate content for follow-up email.",
                Severity::Error,
            );
            summary.failed += 1;
            continue;
        };

        let subject = router::follow_up_subject(&lead.last_service);
        let body = router::compose_with_footer(&raw, &config.email_footer);

        match send_paced(state.mailbox.as_ref(), &lead.email, &subject, &body, policy.send_delay).await {
            Ok(()) => {
                writer.stage(
                    &state.db,
                    StatusChange::new(&lead, LeadStatus::FollowUp1).touching_contact(Utc::now()),
                );
                summary.sent += 1;
                log_action(
                    &state.db,
                    "FollowUpEmailSent",
                    lead_id,
                    email,
                    &format!("Follow-up email sent. Subject: {subject}"),
                    Severity::Success,
                );
            }
            Err(e) => {
                summary.failed += 1;
                log_action(
                    &state.db,
                    "FollowUpSendFail",
                    lead_id,
                    email,
                    &format!("Failed to send follow-up email: {e}"),
                    Severity::Warning,
                );
            }
        }
    }

    writer.flush(&state.db)?;
    summary.updated = writer.applied();
    Ok(summary)
}

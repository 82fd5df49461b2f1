use chrono::Utc;

use crate::db::{self, queries};
use crate::models::{LeadStatus, Severity, StatusChange};
use crate::services::activity::log_action;
use crate::services::batch::{BatchWriter, JobSummary};
use crate::services::lifecycle;
use crate::state::AppState;

/// Moves FOLLOW_UP_1 leads that stayed silent past the abandon window to
/// ABANDONED.
pub async fn run(state: &AppState) -> anyhow::Result<JobSummary> {
    let policy = &state.config.policy;
    let tz = state.config.timezone;
    let now = Utc::now();

    let leads = {
        let conn = db::lock(&state.db)?;
        queries::list_leads(&conn, Some(LeadStatus::FollowUp1))?
    };

    let mut summary = JobSummary::default();
    let mut writer = BatchWriter::new(policy.flush_every);

    for lead in leads {
        summary.examined += 1;
        let lead_id = lead.lead_id.as_deref();

        let Some(last_contact) = lead.last_contact else {
            log_action(
                &state.db,
                "CleanupLeadsWarning",
                lead_id,
                Some(&lead.email),
                "Missing Last Contact date for FOLLOW_UP_1 lead. Skipping.",
                Severity::Warning,
            );
            summary.skipped += 1;
            continue;
        };

        if !lifecycle::is_due(Some(&last_contact), &now, tz, policy.abandon_after_days) {
            continue;
        }

        writer.stage(
            &state.db,
            StatusChange::new(&lead, LeadStatus::Abandoned).touching_contact(now),
        );
        log_action(
            &state.db,
            "CleanupLeadAbandoned",
            lead_id,
            Some(&lead.email),
            "Lead status changed to ABANDONED.",
            Severity::Success,
        );
    }

    writer.flush(&state.db)?;
    summary.updated = writer.applied();
    Ok(summary)
}

use crate::db::{self, queries, Db};
use crate::models::Severity;

/// Records a business action in the trace output and the activity log.
/// Writing the audit row is best-effort; a failure is traced and dropped.
pub fn log_action(
    db: &Db,
    action: &str,
    lead_id: Option<&str>,
    email: Option<&str>,
    details: &str,
    severity: Severity,
) {
    let lead = lead_id.unwrap_or("");
    let address = email.unwrap_or("");
    match severity {
        Severity::Debug => tracing::debug!(action, lead_id = lead, email = address, "{details}"),
        Severity::Info | Severity::Success => {
            tracing::info!(action, lead_id = lead, email = address, "{details}")
        }
        Severity::Warning => tracing::warn!(action, lead_id = lead, email = address, "{details}"),
        Severity::Error | Severity::Critical => {
            tracing::error!(action, lead_id = lead, email = address, severity = severity.as_str(), "{details}")
        }
    }

    let written = db::lock(db)
        .and_then(|conn| queries::insert_log(&conn, action, lead_id, email, details, severity));
    if let Err(e) = written {
        tracing::error!(error = %e, action, "failed to persist activity log entry");
    }
}

use chrono::{DateTime, Utc};
use chrono_tz::Tz;

use crate::db::{self, queries, Db};
use crate::models::{Lead, LogEntry, MailMessage};
use crate::services::mailbox::{self, Mailbox};

pub const HISTORY_TRUNCATION_MARKER: &str = " [History truncated]";

const LOG_ENTRIES: usize = 3;
const LOG_DETAIL_CHARS: usize = 70;
const THREAD_MESSAGES: usize = 2;
const SNIPPET_CHARS: usize = 100;

/// Clips `s` to at most `max` characters, ending clipped output with
/// `marker`. Strings already within `max` come back unchanged.
pub fn truncate(s: &str, max: usize, marker: &str) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }

    let marker_len = marker.chars().count();
    if marker_len >= max {
        return marker.chars().take(max).collect();
    }

    let mut out: String = s.chars().take(max - marker_len).collect();
    out.push_str(marker);
    out
}

/// Digest of a lead's recent activity for the classifier, capped at
/// `max_chars`.
pub async fn bounded_summary(
    db: &Db,
    mailbox: &dyn Mailbox,
    tz: Tz,
    lead_id: Option<&str>,
    email: &str,
    max_chars: usize,
) -> String {
    let raw = summarize(db, mailbox, tz, lead_id, email).await;
    truncate(&raw, max_chars, HISTORY_TRUNCATION_MARKER)
}

/// Builds the interaction digest. Lookup failures degrade to defaults or a
/// warning line; this never fails.
pub async fn summarize(
    db: &Db,
    mailbox: &dyn Mailbox,
    tz: Tz,
    lead_id: Option<&str>,
    email: &str,
) -> String {
    let lead_id = lead_id.filter(|id| !id.is_empty());
    let email = email.trim();
    let who = if email.is_empty() { lead_id.unwrap_or("") } else { email };

    let mut warnings: Vec<String> = vec![];

    let lead = match db::lock(db).and_then(|conn| queries::find_lead(&conn, lead_id, Some(email))) {
        Ok(lead) => lead,
        Err(e) => {
            tracing::warn!(error = %e, email, "history: lead lookup failed");
            warnings.push("(Warning: Could not retrieve latest lead status.)".to_string());
            None
        }
    };
    let first_name = lead.as_ref().map(Lead::greeting_name).unwrap_or("Prospect");
    let status = lead
        .as_ref()
        .map(|l| l.status.as_str())
        .unwrap_or("Unknown");

    // The lead row may know the identifier even when the caller does not.
    let log_key = lead_id.or_else(|| lead.as_ref().and_then(|l| l.lead_id.as_deref()));

    let mut logs: Vec<LogEntry> = vec![];
    if let Some(key) = log_key {
        match db::lock(db).and_then(|conn| queries::recent_logs_for_lead(&conn, key, LOG_ENTRIES)) {
            Ok(mut entries) => {
                entries.reverse();
                logs = entries;
            }
            Err(e) => {
                tracing::warn!(error = %e, lead_id = key, "history: log lookup failed");
                warnings.push("(Warning: Could not retrieve log history.)".to_string());
            }
        }
    }

    let mut messages: Vec<MailMessage> = vec![];
    if !email.is_empty() {
        match mailbox.search(&mailbox::conversation_query(email), 1).await {
            Ok(threads) => {
                if let Some(thread) = threads.first() {
                    messages = thread.most_recent(THREAD_MESSAGES).cloned().collect();
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, email, "history: mailbox search failed");
                warnings.push(format!("(Warning: Could not retrieve mail history due to error: {e})"));
            }
        }
    }

    if logs.is_empty() && messages.is_empty() {
        return format!(
            "No significant prior interaction found for {first_name} ({who}). Current Status: {status}."
        );
    }

    let mut out = String::new();
    for warning in &warnings {
        out.push_str(warning);
        out.push('\n');
    }
    out.push_str(&format!("Interaction History with {first_name} ({who}):\n"));
    out.push_str(&format!("- Current Lead Status: {status}.\n"));

    if !logs.is_empty() {
        out.push_str("Recent Logs:\n");
        for entry in &logs {
            out.push_str(&format!(
                "  - {}: {} - {}\n",
                local_date(&entry.timestamp, tz),
                entry.action,
                truncate(&entry.details, LOG_DETAIL_CHARS, "..."),
            ));
        }
    }

    if !messages.is_empty() {
        out.push_str(&format!("Last Email in Thread (up to {THREAD_MESSAGES} most recent):\n"));
        for message in &messages {
            out.push_str(&format!(
                "  - Date: {}, From: {}\n    Snippet: \"{}\"\n",
                local_date(&message.date, tz),
                message.from,
                truncate(message.body.trim(), SNIPPET_CHARS, "..."),
            ));
        }
    }

    out.trim_end().to_string()
}

fn local_date(ts: &DateTime<Utc>, tz: Tz) -> String {
    ts.with_timezone(&tz).format("%-m/%-d/%Y").to_string()
}

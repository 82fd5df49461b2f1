use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use crate::models::{BookingEvent, Lead, LeadStatus, LogEntry, Severity, StatusChange};

pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Accepts RFC 3339 plus the plain formats SQLite and spreadsheets emit,
/// reading zone-less values as UTC.
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Some(dt.and_utc());
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}

// ── Leads ──

#[derive(Debug, Clone)]
pub struct NewLead {
    pub lead_id: Option<String>,
    pub email: String,
    pub first_name: String,
    pub last_service: String,
    pub phone: Option<String>,
    pub status: LeadStatus,
    pub last_contact: Option<DateTime<Utc>>,
}

const LEAD_COLUMNS: &str =
    "id, lead_id, email, first_name, last_service, phone, status, last_contact";

pub fn insert_lead(conn: &Connection, lead: &NewLead) -> anyhow::Result<i64> {
    conn.execute(
        "INSERT INTO leads (lead_id, email, first_name, last_service, phone, status, last_contact)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            lead.lead_id,
            lead.email.trim(),
            lead.first_name,
            lead.last_service,
            lead.phone,
            lead.status.as_str(),
            lead.last_contact.as_ref().map(format_timestamp),
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Looks a lead up by identifier first, then by case-insensitive email.
pub fn find_lead(
    conn: &Connection,
    lead_id: Option<&str>,
    email: Option<&str>,
) -> anyhow::Result<Option<Lead>> {
    if let Some(id) = lead_id.filter(|id| !id.is_empty()) {
        let found = conn
            .query_row(
                &format!("SELECT {LEAD_COLUMNS} FROM leads WHERE lead_id = ?1"),
                params![id],
                map_lead_row,
            )
            .optional()?;
        if let Some(lead) = found {
            return lead.map(Some);
        }
    }

    match email.map(str::trim).filter(|e| !e.is_empty()) {
        Some(email) => find_lead_by_email(conn, email),
        None => Ok(None),
    }
}

pub fn find_lead_by_email(conn: &Connection, email: &str) -> anyhow::Result<Option<Lead>> {
    let found = conn
        .query_row(
            &format!(
                "SELECT {LEAD_COLUMNS} FROM leads WHERE lower(email) = lower(?1) ORDER BY id ASC LIMIT 1"
            ),
            params![email.trim()],
            map_lead_row,
        )
        .optional()?;
    found.transpose()
}

pub fn list_leads(conn: &Connection, status: Option<LeadStatus>) -> anyhow::Result<Vec<Lead>> {
    let mut stmt = match status {
        Some(_) => conn.prepare(&format!(
            "SELECT {LEAD_COLUMNS} FROM leads WHERE status = ?1 ORDER BY id ASC"
        ))?,
        None => conn.prepare(&format!("SELECT {LEAD_COLUMNS} FROM leads ORDER BY id ASC"))?,
    };

    let rows = match status {
        Some(s) => stmt.query_map(params![s.as_str()], map_lead_row)?,
        None => stmt.query_map([], map_lead_row)?,
    };

    let mut leads = vec![];
    for row in rows {
        match row? {
            Ok(lead) => leads.push(lead),
            Err(e) => tracing::warn!(error = %e, "skipping unreadable lead row"),
        }
    }
    Ok(leads)
}

/// Sets the identifier of a lead that has none. An identifier, once
/// assigned, is never overwritten.
pub fn assign_lead_id(conn: &Connection, row_id: i64, lead_id: &str) -> anyhow::Result<bool> {
    let count = conn.execute(
        "UPDATE leads SET lead_id = ?1, updated_at = datetime('now') WHERE id = ?2 AND lead_id IS NULL",
        params![lead_id, row_id],
    )?;
    Ok(count > 0)
}

/// Writes one status change. Returns false when the row no longer holds the
/// expected `from` status, so a transition is never applied twice.
pub fn apply_status_change(conn: &Connection, change: &StatusChange) -> anyhow::Result<bool> {
    let count = match &change.last_contact {
        Some(ts) => conn.execute(
            "UPDATE leads SET status = ?1, last_contact = ?2, updated_at = datetime('now')
             WHERE id = ?3 AND status = ?4",
            params![
                change.to.as_str(),
                format_timestamp(ts),
                change.row_id,
                change.from.as_str()
            ],
        )?,
        None => conn.execute(
            "UPDATE leads SET status = ?1, updated_at = datetime('now') WHERE id = ?2 AND status = ?3",
            params![change.to.as_str(), change.row_id, change.from.as_str()],
        )?,
    };
    Ok(count > 0)
}

/// Commits a batch of status changes in one transaction and returns how many
/// rows actually moved.
pub fn apply_status_changes(
    conn: &mut Connection,
    changes: &[StatusChange],
) -> anyhow::Result<usize> {
    let tx = conn.transaction()?;
    let mut applied = 0;
    for change in changes {
        if apply_status_change(&tx, change)? {
            applied += 1;
        } else {
            tracing::warn!(
                row_id = change.row_id,
                from = %change.from,
                to = %change.to,
                "lead status changed underneath batch, update dropped"
            );
        }
    }
    tx.commit()?;
    Ok(applied)
}

fn map_lead_row(row: &rusqlite::Row) -> rusqlite::Result<anyhow::Result<Lead>> {
    Ok(parse_lead_row(row))
}

fn parse_lead_row(row: &rusqlite::Row) -> anyhow::Result<Lead> {
    let row_id: i64 = row.get(0)?;
    let lead_id: Option<String> = row.get(1)?;
    let email: String = row.get(2)?;
    let first_name: String = row.get(3)?;
    let last_service: String = row.get(4)?;
    let phone: Option<String> = row.get(5)?;
    let status_str: String = row.get(6)?;
    let last_contact_str: Option<String> = row.get(7)?;

    let status = LeadStatus::parse(&status_str)
        .ok_or_else(|| anyhow::anyhow!("lead row {row_id} has unknown status {status_str:?}"))?;

    Ok(Lead {
        row_id,
        lead_id: lead_id.filter(|id| !id.is_empty()),
        email,
        first_name,
        last_service,
        phone: phone.filter(|p| !p.is_empty()),
        status,
        last_contact: last_contact_str.as_deref().and_then(parse_timestamp),
    })
}

// ── Processed inbound messages ──

pub fn is_message_processed(conn: &Connection, message_id: &str) -> anyhow::Result<bool> {
    let seen: bool = conn.query_row(
        "SELECT COUNT(*) > 0 FROM processed_messages WHERE message_id = ?1",
        params![message_id],
        |row| row.get(0),
    )?;
    Ok(seen)
}

pub fn mark_message_processed(
    conn: &Connection,
    message_id: &str,
    lead_id: Option<&str>,
    outcome: &str,
) -> anyhow::Result<bool> {
    let count = conn.execute(
        "INSERT OR IGNORE INTO processed_messages (message_id, lead_id, outcome) VALUES (?1, ?2, ?3)",
        params![message_id, lead_id, outcome],
    )?;
    Ok(count > 0)
}

/// Applies the transition decided for an inbound message and records the
/// message as handled in the same transaction.
pub fn apply_reply_outcome(
    conn: &mut Connection,
    change: Option<&StatusChange>,
    message_id: &str,
    outcome: &str,
) -> anyhow::Result<bool> {
    let tx = conn.transaction()?;
    let applied = match change {
        Some(change) => apply_status_change(&tx, change)?,
        None => false,
    };
    let lead_id = change.and_then(|c| c.lead_id.as_deref());
    mark_message_processed(&tx, message_id, lead_id, outcome)?;
    tx.commit()?;
    Ok(applied)
}

// ── Activity log ──

pub fn insert_log(
    conn: &Connection,
    action: &str,
    lead_id: Option<&str>,
    email: Option<&str>,
    details: &str,
    severity: Severity,
) -> anyhow::Result<i64> {
    conn.execute(
        "INSERT INTO activity_log (timestamp, action, lead_id, email, details, severity)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            format_timestamp(&Utc::now()),
            action,
            lead_id,
            email,
            details,
            severity.as_str()
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Most recent entries for a lead, newest first.
pub fn recent_logs_for_lead(
    conn: &Connection,
    lead_id: &str,
    limit: usize,
) -> anyhow::Result<Vec<LogEntry>> {
    let mut stmt = conn.prepare(
        "SELECT id, timestamp, action, lead_id, email, details, severity
         FROM activity_log WHERE lead_id = ?1 ORDER BY id DESC LIMIT ?2",
    )?;

    let rows = stmt.query_map(params![lead_id, limit as i64], |row| {
        let timestamp: String = row.get(1)?;
        let severity: String = row.get(6)?;
        Ok(LogEntry {
            id: row.get(0)?,
            timestamp: parse_timestamp(&timestamp).unwrap_or_else(Utc::now),
            action: row.get(2)?,
            lead_id: row.get(3)?,
            email: row.get(4)?,
            details: row.get(5)?,
            severity: Severity::parse(&severity),
        })
    })?;

    let mut entries = vec![];
    for row in rows {
        entries.push(row?);
    }
    Ok(entries)
}

pub fn count_actions_since(
    conn: &Connection,
    action: &str,
    since: &DateTime<Utc>,
) -> anyhow::Result<usize> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM activity_log WHERE action = ?1 AND timestamp >= ?2",
        params![action, format_timestamp(since)],
        |row| row.get(0),
    )?;
    Ok(count.max(0) as usize)
}

// ── Booking events ──

/// Records a booking event. Returns false if the event id was seen before.
pub fn record_booking_event(conn: &Connection, event: &BookingEvent) -> anyhow::Result<bool> {
    let count = conn.execute(
        "INSERT OR IGNORE INTO booking_events (event_id, email, event_type, scheduled_at)
         VALUES (?1, ?2, ?3, ?4)",
        params![
            event.event_id,
            event.email,
            event.event_type,
            event.scheduled_at.as_ref().map(format_timestamp),
        ],
    )?;
    Ok(count > 0)
}

use std::collections::HashMap;

use rusqlite::Connection;
use serde::Serialize;

use crate::db::queries::{self, NewLead};
use crate::models::lead::normalize_email;
use crate::models::LeadStatus;

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct ImportReport {
    pub imported: usize,
    pub skipped: usize,
    pub errors: Vec<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum ImportError {
    #[error("missing required column: {0}")]
    MissingColumn(String),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

const EMAIL: &str = "email";
const FIRST_NAME: &str = "first name";
const LEAD_ID: &str = "lead id";
const PHONE: &str = "phone";
const LAST_SERVICE: &str = "last service";
const STATUS: &str = "status";
const LAST_CONTACT: &str = "last contact";

/// Column positions looked up by header name, so sheets with extra or
/// reordered columns still import.
struct Columns(HashMap<String, usize>);

impl Columns {
    fn from_headers(headers: &csv::StringRecord) -> Result<Self, ImportError> {
        let map: HashMap<String, usize> = headers
            .iter()
            .enumerate()
            .map(|(i, h)| (h.trim().to_lowercase(), i))
            .collect();
        for required in [EMAIL, FIRST_NAME] {
            if !map.contains_key(required) {
                return Err(ImportError::MissingColumn(required.to_string()));
            }
        }
        Ok(Self(map))
    }

    fn get<'r>(&self, record: &'r csv::StringRecord, name: &str) -> Option<&'r str> {
        self.0
            .get(name)
            .and_then(|&i| record.get(i))
            .map(str::trim)
            .filter(|v| !v.is_empty())
    }
}

/// Seeds the lead store from CSV text. Rows whose email is already known are
/// skipped; malformed rows are reported and do not stop the import.
pub fn import_csv(conn: &Connection, data: &str) -> Result<ImportReport, ImportError> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_reader(data.as_bytes());
    let columns = Columns::from_headers(reader.headers()?)?;

    let mut report = ImportReport::default();
    for (index, record) in reader.records().enumerate() {
        // Header is line 1.
        let line = index + 2;
        let record = match record {
            Ok(record) => record,
            Err(e) => {
                report.errors.push(format!("line {line}: {e}"));
                continue;
            }
        };

        let Some(email) = columns.get(&record, EMAIL).map(normalize_email) else {
            report.errors.push(format!("line {line}: missing email"));
            continue;
        };

        let status = match columns.get(&record, STATUS) {
            None => LeadStatus::Pending,
            Some(raw) => match LeadStatus::parse(raw) {
                Some(status) => status,
                None => {
                    report.errors.push(format!("line {line}: unknown status {raw:?}"));
                    continue;
                }
            },
        };

        let last_contact = match columns.get(&record, LAST_CONTACT) {
            None => None,
            Some(raw) => match queries::parse_timestamp(raw) {
                Some(ts) => Some(ts),
                None => {
                    report.errors.push(format!("line {line}: invalid last contact date {raw:?}"));
                    continue;
                }
            },
        };

        if queries::find_lead_by_email(conn, &email)?.is_some() {
            report.skipped += 1;
            continue;
        }

        let lead = NewLead {
            lead_id: columns.get(&record, LEAD_ID).map(str::to_string),
            email,
            first_name: columns.get(&record, FIRST_NAME).unwrap_or_default().to_string(),
            last_service: columns.get(&record, LAST_SERVICE).unwrap_or_default().to_string(),
            phone: columns.get(&record, PHONE).map(str::to_string),
            status,
            last_contact,
        };
        match queries::insert_lead(conn, &lead) {
            Ok(_) => report.imported += 1,
            Err(e) => report.errors.push(format!("line {line}: {e}")),
        }
    }

    tracing::info!(
        imported = report.imported,
        skipped = report.skipped,
        errors = report.errors.len(),
        "lead import finished"
    );
    Ok(report)
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LeadStatus {
    Pending,
    Sent,
    #[serde(rename = "FOLLOW_UP_1")]
    FollowUp1,
    Hot,
    Unqualified,
    Booked,
    Abandoned,
    InvalidEmail,
    NeedsManualReview,
}

impl LeadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LeadStatus::Pending => "PENDING",
            LeadStatus::Sent => "SENT",
            LeadStatus::FollowUp1 => "FOLLOW_UP_1",
            LeadStatus::Hot => "HOT",
            LeadStatus::Unqualified => "UNQUALIFIED",
            LeadStatus::Booked => "BOOKED",
            LeadStatus::Abandoned => "ABANDONED",
            LeadStatus::InvalidEmail => "INVALID_EMAIL",
            LeadStatus::NeedsManualReview => "NEEDS_MANUAL_REVIEW",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "PENDING" => Some(LeadStatus::Pending),
            "SENT" => Some(LeadStatus::Sent),
            "FOLLOW_UP_1" => Some(LeadStatus::FollowUp1),
            "HOT" => Some(LeadStatus::Hot),
            "UNQUALIFIED" => Some(LeadStatus::Unqualified),
            "BOOKED" => Some(LeadStatus::Booked),
            "ABANDONED" => Some(LeadStatus::Abandoned),
            "INVALID_EMAIL" => Some(LeadStatus::InvalidEmail),
            "NEEDS_MANUAL_REVIEW" => Some(LeadStatus::NeedsManualReview),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            LeadStatus::Booked
                | LeadStatus::Unqualified
                | LeadStatus::Abandoned
                | LeadStatus::InvalidEmail
        )
    }

    /// Replies are only routed while the lead is waiting on one.
    pub fn awaits_reply(&self) -> bool {
        matches!(self, LeadStatus::Sent | LeadStatus::FollowUp1)
    }

    /// Legal lifecycle edges. Leaving NEEDS_MANUAL_REVIEW is reserved for a
    /// human resolution; BOOKED is reachable from every pre-terminal status.
    pub fn can_transition_to(&self, next: LeadStatus) -> bool {
        use LeadStatus::*;

        match (*self, next) {
            (Pending, Sent | InvalidEmail) => true,
            (Sent, FollowUp1) => true,
            (Sent | FollowUp1, Unqualified | Hot | NeedsManualReview) => true,
            (FollowUp1, Abandoned) => true,
            (NeedsManualReview, Hot | Unqualified) => true,
            (from, Booked) => !from.is_terminal(),
            _ => false,
        }
    }
}

impl std::fmt::Display for LeadStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Lead {
    #[serde(skip)]
    pub row_id: i64,
    pub lead_id: Option<String>,
    pub email: String,
    pub first_name: String,
    pub last_service: String,
    pub phone: Option<String>,
    pub status: LeadStatus,
    pub last_contact: Option<DateTime<Utc>>,
}

impl Lead {
    /// Identifier used in logs and alerts, falling back to the email for
    /// leads that have not been contacted yet.
    pub fn display_id(&self) -> &str {
        self.lead_id.as_deref().unwrap_or(&self.email)
    }

    pub fn greeting_name(&self) -> &str {
        if self.first_name.trim().is_empty() {
            "Prospect"
        } else {
            self.first_name.trim()
        }
    }
}

/// A status change for one lead row, applied only if the row still holds
/// `from` when it is written.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusChange {
    pub row_id: i64,
    pub lead_id: Option<String>,
    pub from: LeadStatus,
    pub to: LeadStatus,
    pub last_contact: Option<DateTime<Utc>>,
}

impl StatusChange {
    pub fn new(lead: &Lead, to: LeadStatus) -> Self {
        Self {
            row_id: lead.row_id,
            lead_id: lead.lead_id.clone(),
            from: lead.status,
            to,
            last_contact: None,
        }
    }

    pub fn touching_contact(mut self, at: DateTime<Utc>) -> Self {
        self.last_contact = Some(at);
        self
    }
}

/// Normalized form used for every email comparison.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

pub fn is_valid_email(email: &str) -> bool {
    let email = email.trim();
    if email.is_empty() || email.chars().any(char::is_whitespace) {
        return false;
    }

    let mut parts = email.split('@');
    let (Some(local), Some(domain), None) = (parts.next(), parts.next(), parts.next()) else {
        return false;
    };

    !local.is_empty()
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
        && !domain.contains("..")
}

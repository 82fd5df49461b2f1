use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct MailMessage {
    pub id: String,
    pub from: String,
    pub subject: String,
    pub date: DateTime<Utc>,
    pub body: String,
    pub unread: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct MailThread {
    pub id: String,
    /// Oldest first.
    pub messages: Vec<MailMessage>,
}

impl MailThread {
    pub fn latest(&self) -> Option<&MailMessage> {
        self.messages.last()
    }

    /// Up to `n` messages, most recent first.
    pub fn most_recent(&self, n: usize) -> impl Iterator<Item = &MailMessage> {
        self.messages.iter().rev().take(n)
    }
}

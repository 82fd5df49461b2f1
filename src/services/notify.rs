use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde_json::json;

use crate::models::{ClassificationResult, Lead};
use crate::services::mailbox::Mailbox;

/// Human-facing alert channel. Delivery is best-effort: implementations log
/// channel failures and never surface them to the caller.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, alert: &Alert);
}

#[derive(Debug, Clone, PartialEq)]
pub struct Alert {
    pub kind: AlertKind,
    pub subject: String,
    pub body: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertKind {
    ManualReview,
    HotLead,
    Booking,
}

impl Alert {
    pub fn manual_review(lead: &Lead, reason: &str, reply: &str) -> Self {
        let excerpt: String = reply.chars().take(300).collect();
        Self {
            kind: AlertKind::ManualReview,
            subject: format!(
                "Lead Needs Manual Review: {} ({})",
                lead.greeting_name(),
                lead.display_id()
            ),
            body: format!(
                "Lead: {} ({}, ID: {}) has been flagged for manual review.\n\nReason: {reason}\n\nOriginal reply snippet (first 300 chars):\n{excerpt}...",
                lead.greeting_name(),
                lead.email,
                lead.display_id(),
            ),
        }
    }

    pub fn hot_lead(lead: &Lead, result: &ClassificationResult) -> Self {
        Self {
            kind: AlertKind::HotLead,
            subject: format!("HOT LEAD - {}", lead.greeting_name()),
            body: format!(
                "Services: {}\nSentiment: {}\nConfidence: {:.2}\nContact: {} | {}",
                result.topics.join(", "),
                result.sentiment.as_str(),
                result.confidence(),
                lead.email,
                lead.phone.as_deref().unwrap_or(""),
            ),
        }
    }

    pub fn booking(lead: &Lead, scheduled_at: Option<DateTime<Utc>>, tz: Tz) -> Self {
        let time = scheduled_at
            .map(|t| t.with_timezone(&tz).format("%Y-%m-%d %H:%M %Z").to_string())
            .unwrap_or_else(|| "Pending".to_string());
        Self {
            kind: AlertKind::Booking,
            subject: format!("NEW CALL - {}", lead.greeting_name()),
            body: format!(
                "Service: {}\nTime: {time}\nContact: {} | {}",
                lead.last_service,
                lead.email,
                lead.phone.as_deref().unwrap_or(""),
            ),
        }
    }
}

/// Emails the review inbox through the shared mailbox and, when a webhook
/// is configured, posts the same alert to Slack.
pub struct EmailSlackNotifier {
    mailbox: Arc<dyn Mailbox>,
    review_email: String,
    slack_webhook_url: String,
    client: reqwest::Client,
}

impl EmailSlackNotifier {
    pub fn new(mailbox: Arc<dyn Mailbox>, review_email: String, slack_webhook_url: String) -> Self {
        Self {
            mailbox,
            review_email,
            slack_webhook_url,
            client: reqwest::Client::new(),
        }
    }

    async fn post_slack(&self, alert: &Alert) -> anyhow::Result<()> {
        let text = format!("*{}*\n{}", alert.subject, alert.body);
        self.client
            .post(&self.slack_webhook_url)
            .json(&json!({ "text": text }))
            .send()
            .await
            .context("failed to call Slack webhook")?
            .error_for_status()
            .context("Slack webhook returned error")?;
        Ok(())
    }
}

#[async_trait]
impl Notifier for EmailSlackNotifier {
    async fn notify(&self, alert: &Alert) {
        if self.review_email.is_empty() {
            tracing::warn!(subject = %alert.subject, "REVIEW_EMAIL not configured, skipping email alert");
        } else if let Err(e) = self
            .mailbox
            .send(&self.review_email, &alert.subject, &alert.body)
            .await
        {
            tracing::error!(error = %e, subject = %alert.subject, "failed to email alert");
        }

        if self.slack_webhook_url.is_empty() {
            return;
        }
        if let Err(e) = self.post_slack(alert).await {
            tracing::error!(error = %e, subject = %alert.subject, "failed to post Slack alert");
        }
    }
}

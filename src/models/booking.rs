use chrono::{DateTime, Utc};
use serde::Deserialize;

pub const BOOKING_CREATED: &str = "invitee.created";

/// Webhook body posted by the scheduling provider.
#[derive(Debug, Clone, Deserialize)]
pub struct BookingWebhook {
    pub event: String,
    pub payload: BookingPayload,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BookingPayload {
    pub email: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub uri: Option<String>,
    #[serde(default)]
    pub scheduled_event: Option<ScheduledEvent>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScheduledEvent {
    #[serde(default)]
    pub start_time: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BookingEvent {
    pub event_id: String,
    pub email: String,
    pub event_type: String,
    pub scheduled_at: Option<DateTime<Utc>>,
}

impl From<BookingWebhook> for BookingEvent {
    fn from(hook: BookingWebhook) -> Self {
        let start_time = hook
            .payload
            .scheduled_event
            .and_then(|e| e.start_time);
        let scheduled_at = start_time
            .as_deref()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc));

        // Deliveries without an invitee URI are keyed on their content so a
        // redelivery still collapses onto the first one.
        let event_id = hook.payload.uri.clone().unwrap_or_else(|| {
            format!(
                "{}:{}:{}",
                hook.event,
                hook.payload.email.trim().to_lowercase(),
                start_time.as_deref().unwrap_or("")
            )
        });

        BookingEvent {
            event_id,
            email: hook.payload.email,
            event_type: hook.event,
            scheduled_at,
        }
    }
}

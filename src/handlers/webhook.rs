use std::sync::Arc;

use axum::extract::State;
use axum::Json;

use crate::errors::AppError;
use crate::models::{BookingEvent, BookingWebhook};
use crate::services::lifecycle::{self, BookingOutcome};
use crate::state::AppState;

// POST /webhook/booking
pub async fn booking_webhook(
    State(state): State<Arc<AppState>>,
    Json(hook): Json<BookingWebhook>,
) -> Result<Json<serde_json::Value>, AppError> {
    let event = BookingEvent::from(hook);
    tracing::info!(
        event_id = %event.event_id,
        event_type = %event.event_type,
        email = %event.email,
        "booking webhook received"
    );

    let outcome = lifecycle::handle_booking(&state, event).await?;

    // Every outcome is acknowledged so the provider stops redelivering.
    let body = match outcome {
        BookingOutcome::Booked(lead_id) => serde_json::json!({"status": "booked", "lead_id": lead_id}),
        BookingOutcome::Duplicate => serde_json::json!({"status": "duplicate"}),
        BookingOutcome::UnknownLead => serde_json::json!({"status": "unknown_lead"}),
        BookingOutcome::AlreadyTerminal(status) => {
            serde_json::json!({"status": "ignored", "lead_status": status})
        }
        BookingOutcome::Ignored => serde_json::json!({"status": "ignored"}),
    };
    Ok(Json(body))
}

pub mod activity;
pub mod booking;
pub mod classification;
pub mod lead;
pub mod mail;

pub use activity::{LogEntry, Severity};
pub use booking::{BookingEvent, BookingWebhook};
pub use classification::{Classification, ClassificationResult, Sentiment, GENERIC_TOPIC};
pub use lead::{Lead, LeadStatus, StatusChange};
pub use mail::{MailMessage, MailThread};

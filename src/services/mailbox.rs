use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use base64::engine::general_purpose::{STANDARD, URL_SAFE, URL_SAFE_NO_PAD};
use base64::Engine;
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use serde_json::json;

use crate::models::{MailMessage, MailThread};

/// Unread replies waiting in the inbox.
pub const UNREAD_REPLIES_QUERY: &str = "is:unread in:inbox -is:trash";

/// Most recent conversation with one address.
pub fn conversation_query(email: &str) -> String {
    format!("(to:{email} OR from:{email}) in:inbox")
}

#[async_trait]
pub trait Mailbox: Send + Sync {
    async fn send(&self, to: &str, subject: &str, body: &str) -> anyhow::Result<()>;

    /// Threads matching `query`, newest thread first, at most `max`.
    async fn search(&self, query: &str, max: usize) -> anyhow::Result<Vec<MailThread>>;

    async fn mark_read(&self, thread_id: &str) -> anyhow::Result<()>;
}

/// Sends one message and then waits out the provider pacing delay.
pub async fn send_paced(
    mailbox: &dyn Mailbox,
    to: &str,
    subject: &str,
    body: &str,
    delay: Duration,
) -> anyhow::Result<()> {
    mailbox.send(to, subject, body).await?;
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
    Ok(())
}

static SENDER_EMAIL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[\w.+-]+@[\w.-]+\.\w+").expect("sender pattern compiles"));

/// Pulls the bare address out of a `From` header such as
/// `"Jane Doe" <jane@example.com>`, lower-cased.
pub fn extract_sender_email(from: &str) -> Option<String> {
    SENDER_EMAIL
        .find(from)
        .map(|m| m.as_str().to_lowercase())
}

// ── Gmail ──

const GMAIL_API: &str = "https://gmail.googleapis.com/gmail/v1/users/me";

pub struct GmailMailbox {
    access_token: String,
    sender_address: String,
    sender_name: String,
    client: reqwest::Client,
}

impl GmailMailbox {
    pub fn new(access_token: String, sender_address: String, sender_name: String) -> Self {
        Self {
            access_token,
            sender_address,
            sender_name,
            client: reqwest::Client::new(),
        }
    }

    async fn get_thread(&self, id: &str) -> anyhow::Result<MailThread> {
        let thread: GmailThread = self
            .client
            .get(format!("{GMAIL_API}/threads/{id}"))
            .bearer_auth(&self.access_token)
            .query(&[("format", "full")])
            .send()
            .await
            .context("failed to fetch Gmail thread")?
            .error_for_status()
            .context("Gmail API returned error for thread fetch")?
            .json()
            .await
            .context("failed to parse Gmail thread")?;

        Ok(thread.into_mail_thread())
    }
}

#[async_trait]
impl Mailbox for GmailMailbox {
    async fn send(&self, to: &str, subject: &str, body: &str) -> anyhow::Result<()> {
        let from = if self.sender_name.is_empty() {
            self.sender_address.clone()
        } else {
            format!("{} <{}>", self.sender_name, self.sender_address)
        };
        let mime = build_mime(&from, to, subject, body);
        let raw = URL_SAFE_NO_PAD.encode(mime.as_bytes());

        self.client
            .post(format!("{GMAIL_API}/messages/send"))
            .bearer_auth(&self.access_token)
            .json(&json!({ "raw": raw }))
            .send()
            .await
            .context("failed to send Gmail message")?
            .error_for_status()
            .context("Gmail API returned error for send")?;

        Ok(())
    }

    async fn search(&self, query: &str, max: usize) -> anyhow::Result<Vec<MailThread>> {
        let list: ThreadList = self
            .client
            .get(format!("{GMAIL_API}/threads"))
            .bearer_auth(&self.access_token)
            .query(&[("q", query.to_string()), ("maxResults", max.to_string())])
            .send()
            .await
            .context("failed to search Gmail threads")?
            .error_for_status()
            .context("Gmail API returned error for search")?
            .json()
            .await
            .context("failed to parse Gmail thread list")?;

        let mut threads = Vec::with_capacity(list.threads.len());
        for thread_ref in list.threads.into_iter().take(max) {
            threads.push(self.get_thread(&thread_ref.id).await?);
        }
        Ok(threads)
    }

    async fn mark_read(&self, thread_id: &str) -> anyhow::Result<()> {
        self.client
            .post(format!("{GMAIL_API}/threads/{thread_id}/modify"))
            .bearer_auth(&self.access_token)
            .json(&json!({ "removeLabelIds": ["UNREAD"] }))
            .send()
            .await
            .context("failed to mark Gmail thread read")?
            .error_for_status()
            .context("Gmail API returned error for modify")?;

        Ok(())
    }
}

fn build_mime(from: &str, to: &str, subject: &str, body: &str) -> String {
    format!(
        "From: {}\r\nTo: {}\r\nSubject: {}\r\nMIME-Version: 1.0\r\nContent-Type: text/plain; charset=\"UTF-8\"\r\n\r\n{}",
        single_line(from),
        single_line(to),
        encode_header(subject),
        body.replace("\r\n", "\n").replace('\n', "\r\n"),
    )
}

/// Header values never carry line breaks; a CR or LF would start a new
/// header.
fn single_line(value: &str) -> String {
    value
        .split(|c| c == '\r' || c == '\n')
        .filter(|part| !part.trim().is_empty())
        .map(str::trim)
        .collect::<Vec<_>>()
        .join(" ")
}

/// RFC 2047 encoded-word for non-ASCII header values.
fn encode_header(value: &str) -> String {
    let value = single_line(value);
    if value.is_ascii() {
        value
    } else {
        format!("=?UTF-8?B?{}?=", STANDARD.encode(value.as_bytes()))
    }
}

#[derive(Deserialize)]
struct ThreadList {
    #[serde(default)]
    threads: Vec<ThreadRef>,
}

#[derive(Deserialize)]
struct ThreadRef {
    id: String,
}

#[derive(Deserialize)]
struct GmailThread {
    id: String,
    #[serde(default)]
    messages: Vec<GmailMessage>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GmailMessage {
    id: String,
    #[serde(default)]
    label_ids: Vec<String>,
    #[serde(default)]
    snippet: String,
    #[serde(default)]
    internal_date: Option<String>,
    #[serde(default)]
    payload: Option<MessagePart>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessagePart {
    #[serde(default)]
    mime_type: String,
    #[serde(default)]
    headers: Vec<Header>,
    #[serde(default)]
    body: Option<PartBody>,
    #[serde(default)]
    parts: Vec<MessagePart>,
}

#[derive(Deserialize)]
struct Header {
    name: String,
    value: String,
}

#[derive(Deserialize)]
struct PartBody {
    #[serde(default)]
    data: Option<String>,
}

impl GmailThread {
    fn into_mail_thread(self) -> MailThread {
        MailThread {
            id: self.id,
            messages: self.messages.into_iter().map(GmailMessage::into_mail_message).collect(),
        }
    }
}

impl GmailMessage {
    fn into_mail_message(self) -> MailMessage {
        let header = |name: &str| {
            self.payload
                .as_ref()
                .and_then(|p| p.headers.iter().find(|h| h.name.eq_ignore_ascii_case(name)))
                .map(|h| h.value.clone())
                .unwrap_or_default()
        };

        let from = header("From");
        let subject = header("Subject");
        let date = self
            .internal_date
            .as_deref()
            .and_then(|ms| ms.parse::<i64>().ok())
            .and_then(DateTime::from_timestamp_millis)
            .or_else(|| {
                DateTime::parse_from_rfc2822(&header("Date"))
                    .ok()
                    .map(|d| d.with_timezone(&Utc))
            })
            .unwrap_or_else(Utc::now);

        let body = self
            .payload
            .as_ref()
            .and_then(plain_text)
            .unwrap_or_else(|| self.snippet.clone());

        MailMessage {
            unread: self.label_ids.iter().any(|l| l == "UNREAD"),
            id: self.id,
            from,
            subject,
            date,
            body,
        }
    }
}

/// First `text/plain` part found depth-first.
fn plain_text(part: &MessagePart) -> Option<String> {
    if part.mime_type.eq_ignore_ascii_case("text/plain") {
        if let Some(data) = part.body.as_ref().and_then(|b| b.data.as_deref()) {
            return decode_body(data);
        }
    }
    part.parts.iter().find_map(plain_text)
}

fn decode_body(data: &str) -> Option<String> {
    URL_SAFE
        .decode(data)
        .or_else(|_| URL_SAFE_NO_PAD.decode(data.trim_end_matches('=')))
        .ok()
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
}

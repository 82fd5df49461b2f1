use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::routing::{get, post};
use axum::Router;
use chrono::{DateTime, Utc};
use tower::ServiceExt;

use leadflow::config::{AppConfig, Policy, ServiceCatalog};
use leadflow::db::{self, queries};
use leadflow::handlers;
use leadflow::models::{Lead, LeadStatus, MailMessage, MailThread};
use leadflow::services::ai::LlmProvider;
use leadflow::services::batch::{run_exclusive, Job, JobLocks, JobOutcome, JobSummary};
use leadflow::services::lifecycle::{self, ReplyOutcome, HOT_SEND_UNCOMMITTED};
use leadflow::services::mailbox::{Mailbox, UNREAD_REPLIES_QUERY};
use leadflow::services::notify::{Alert, AlertKind, Notifier};
use leadflow::services::router::RoutingDecision;
use leadflow::state::AppState;

const DEFAULT_LINK: &str = "https://calendly.com/your-team/30min";
const FOOTER: &str = "Reply STOP to unsubscribe";

// ── Mock Providers ──

/// Answers by prompt kind. `None` makes that kind of call fail.
struct MockLlm {
    classification: Option<String>,
    follow_up: Option<String>,
    calls: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl LlmProvider for MockLlm {
    async fn complete(&self, prompt: &str) -> anyhow::Result<String> {
        self.calls.lock().unwrap().push(prompt.to_string());

        let answer = if prompt.contains("Respond with JSON only") {
            self.classification.clone()
        } else if prompt.contains("Based on their LATEST reply") {
            self.follow_up.clone()
        } else {
            Some("Hi there,\nWe'd love to run a free audit for you.".to_string())
        };
        answer.ok_or_else(|| anyhow::anyhow!("provider unavailable"))
    }
}

struct MockMailbox {
    threads: Vec<MailThread>,
    fail_sends: bool,
    sent: Arc<Mutex<Vec<(String, String, String)>>>,
    marked_read: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl Mailbox for MockMailbox {
    async fn send(&self, to: &str, subject: &str, body: &str) -> anyhow::Result<()> {
        if self.fail_sends {
            anyhow::bail!("mail transport unavailable");
        }
        self.sent
            .lock()
            .unwrap()
            .push((to.to_string(), subject.to_string(), body.to_string()));
        Ok(())
    }

    async fn search(&self, query: &str, max: usize) -> anyhow::Result<Vec<MailThread>> {
        if query == UNREAD_REPLIES_QUERY {
            Ok(self.threads.iter().take(max).cloned().collect())
        } else {
            Ok(vec![])
        }
    }

    async fn mark_read(&self, thread_id: &str) -> anyhow::Result<()> {
        self.marked_read.lock().unwrap().push(thread_id.to_string());
        Ok(())
    }
}

struct MockNotifier {
    alerts: Arc<Mutex<Vec<Alert>>>,
}

#[async_trait]
impl Notifier for MockNotifier {
    async fn notify(&self, alert: &Alert) {
        self.alerts.lock().unwrap().push(alert.clone());
    }
}

// ── Helpers ──

fn test_config() -> AppConfig {
    AppConfig {
        port: 3000,
        database_url: ":memory:".to_string(),
        admin_token: "test-token".to_string(),
        llm_provider: "ollama".to_string(),
        gemini_api_key: "".to_string(),
        gemini_model: "gemini-pro".to_string(),
        ollama_url: "http://localhost:11434".to_string(),
        ollama_model: "llama3.2".to_string(),
        gmail_access_token: "".to_string(),
        sender_address: "jose@agency.test".to_string(),
        sender_name: "Jose".to_string(),
        review_email: "review@agency.test".to_string(),
        slack_webhook_url: "".to_string(),
        booking_link: DEFAULT_LINK.to_string(),
        email_footer: FOOTER.to_string(),
        timezone: chrono_tz::UTC,
        catalog: ServiceCatalog::builtin(DEFAULT_LINK),
        policy: Policy {
            send_delay: Duration::ZERO,
            lock_wait: Duration::from_millis(50),
            ..Policy::default()
        },
    }
}

struct Harness {
    state: Arc<AppState>,
    llm_calls: Arc<Mutex<Vec<String>>>,
    sent: Arc<Mutex<Vec<(String, String, String)>>>,
    marked_read: Arc<Mutex<Vec<String>>>,
    alerts: Arc<Mutex<Vec<Alert>>>,
}

impl Harness {
    fn llm_call_count(&self) -> usize {
        self.llm_calls.lock().unwrap().len()
    }

    fn sent(&self) -> Vec<(String, String, String)> {
        self.sent.lock().unwrap().clone()
    }

    fn alerts(&self) -> Vec<Alert> {
        self.alerts.lock().unwrap().clone()
    }

    fn lead(&self, email: &str) -> Lead {
        let conn = self.state.db.lock().unwrap();
        queries::find_lead_by_email(&conn, email).unwrap().unwrap()
    }

    fn count_action(&self, action: &str) -> usize {
        let conn = self.state.db.lock().unwrap();
        queries::count_actions_since(&conn, action, &DateTime::<Utc>::UNIX_EPOCH).unwrap()
    }
}

fn harness_with(
    config: AppConfig,
    classification: Option<&str>,
    follow_up: Option<&str>,
    threads: Vec<MailThread>,
    fail_sends: bool,
) -> Harness {
    let conn = db::init_db(":memory:").unwrap();
    let llm_calls = Arc::new(Mutex::new(vec![]));
    let sent = Arc::new(Mutex::new(vec![]));
    let marked_read = Arc::new(Mutex::new(vec![]));
    let alerts = Arc::new(Mutex::new(vec![]));

    let state = Arc::new(AppState {
        db: Arc::new(Mutex::new(conn)),
        config,
        llm: Box::new(MockLlm {
            classification: classification.map(str::to_string),
            follow_up: follow_up.map(str::to_string),
            calls: Arc::clone(&llm_calls),
        }),
        mailbox: Arc::new(MockMailbox {
            threads,
            fail_sends,
            sent: Arc::clone(&sent),
            marked_read: Arc::clone(&marked_read),
        }),
        notifier: Box::new(MockNotifier {
            alerts: Arc::clone(&alerts),
        }),
        locks: JobLocks::new(),
    });

    Harness {
        state,
        llm_calls,
        sent,
        marked_read,
        alerts,
    }
}

fn harness(classification: Option<&str>, follow_up: Option<&str>, threads: Vec<MailThread>) -> Harness {
    harness_with(test_config(), classification, follow_up, threads, false)
}

fn add_lead(
    h: &Harness,
    lead_id: Option<&str>,
    email: &str,
    status: LeadStatus,
    last_contact: Option<DateTime<Utc>>,
) {
    let conn = h.state.db.lock().unwrap();
    queries::insert_lead(
        &conn,
        &queries::NewLead {
            lead_id: lead_id.map(str::to_string),
            email: email.to_string(),
            first_name: "Jane".to_string(),
            last_service: "Funnels".to_string(),
            phone: None,
            status,
            last_contact,
        },
    )
    .unwrap();
}

fn reply_thread(thread_id: &str, message_id: &str, from: &str, body: &str) -> MailThread {
    MailThread {
        id: thread_id.to_string(),
        messages: vec![MailMessage {
            id: message_id.to_string(),
            from: from.to_string(),
            subject: "Re: Free Audit for Funnels".to_string(),
            date: Utc::now(),
            body: body.to_string(),
            unread: true,
        }],
    }
}

fn jane_replies(body: &str) -> Vec<MailThread> {
    vec![reply_thread("t-1", "m-1", "Jane Doe <Jane@Example.com>", body)]
}

fn classification_json(sentiment: &str, services: &[&str], confidence: f64) -> String {
    serde_json::json!({
        "identified_services": services,
        "key_concerns": ["low conversion rate"],
        "summary_of_need": "Wants a better website",
        "sentiment": sentiment,
        "classification_confidence": confidence,
    })
    .to_string()
}

async fn run_job(h: &Harness, job: Job) -> JobSummary {
    match run_exclusive(Arc::clone(&h.state), job).await {
        JobOutcome::Completed { summary } => summary,
        other => panic!("expected {} to complete, got {other:?}", job.as_str()),
    }
}

fn days_ago(days: i64) -> DateTime<Utc> {
    Utc::now() - chrono::Duration::days(days)
}

fn test_app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(handlers::health::health))
        .route("/webhook/booking", post(handlers::webhook::booking_webhook))
        .route("/api/admin/leads", get(handlers::admin::list_leads))
        .route("/api/admin/leads/import", post(handlers::admin::import_leads))
        .route(
            "/api/admin/leads/:lead_id/logs",
            get(handlers::admin::lead_logs),
        )
        .route(
            "/api/admin/leads/:lead_id/resolve",
            post(handlers::admin::resolve_lead),
        )
        .route("/api/admin/jobs/:job/run", post(handlers::admin::run_job))
        .with_state(state)
}

async fn json_body(res: axum::response::Response) -> serde_json::Value {
    let body = axum::body::to_bytes(res.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

// ── Reply Routing Tests ──

#[tokio::test]
async fn test_opt_out_reply_never_reaches_classifier() {
    let h = harness(None, None, jane_replies("Please STOP emailing me."));
    add_lead(&h, Some("lead-1"), "jane@example.com", LeadStatus::Sent, Some(days_ago(1)));

    let summary = run_job(&h, Job::ReplyProcessing).await;

    assert_eq!(summary.updated, 1);
    assert_eq!(h.llm_call_count(), 0);
    assert_eq!(h.lead("jane@example.com").status, LeadStatus::Unqualified);
    assert!(h.sent().is_empty());
    assert!(h.alerts().is_empty());
    assert_eq!(h.count_action("ReplyOptOut"), 1);
    assert_eq!(*h.marked_read.lock().unwrap(), vec!["t-1".to_string()]);
}

#[tokio::test]
async fn test_negative_reply_is_unqualified_silently() {
    let json = classification_json("negative", &["Funnels"], 0.95);
    let h = harness(Some(json.as_str()), None, jane_replies("Not interested, we're happy with our agency."));
    add_lead(&h, Some("lead-1"), "jane@example.com", LeadStatus::FollowUp1, Some(days_ago(2)));

    run_job(&h, Job::ReplyProcessing).await;

    let lead = h.lead("jane@example.com");
    assert_eq!(lead.status, LeadStatus::Unqualified);
    assert!(lead.last_contact.unwrap() > days_ago(1));
    assert!(h.sent().is_empty());
    assert!(h.alerts().is_empty());
}

#[tokio::test]
async fn test_low_confidence_reply_goes_to_manual_review() {
    let json = classification_json("positive", &["Funnels"], 0.5);
    let h = harness(Some(json.as_str()), Some("should not be used"), jane_replies("Maybe? Depends on price."));
    add_lead(&h, Some("lead-1"), "jane@example.com", LeadStatus::Sent, Some(days_ago(1)));

    run_job(&h, Job::ReplyProcessing).await;

    assert_eq!(h.lead("jane@example.com").status, LeadStatus::NeedsManualReview);
    assert!(h.sent().is_empty());

    let alerts = h.alerts();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].kind, AlertKind::ManualReview);
    assert_eq!(alerts[0].subject, "Lead Needs Manual Review: Jane (lead-1)");
    assert!(alerts[0].body.contains("0.50"));
    // Only the classification call; no follow-up was generated.
    assert_eq!(h.llm_call_count(), 1);
}

#[tokio::test]
async fn test_unparseable_classifier_output_goes_to_manual_review() {
    let h = harness(Some("I think they like it!"), None, jane_replies("Sounds good"));
    add_lead(&h, Some("lead-1"), "jane@example.com", LeadStatus::Sent, Some(days_ago(1)));

    run_job(&h, Job::ReplyProcessing).await;

    assert_eq!(h.lead("jane@example.com").status, LeadStatus::NeedsManualReview);
    let alerts = h.alerts();
    assert_eq!(alerts.len(), 1);
    assert!(alerts[0].body.contains("Classification failed"));
}

#[tokio::test]
async fn test_qualified_reply_sends_booking_email_and_hot_alert() {
    let json = classification_json("positive", &["Web Design & Development"], 0.9);
    let h = harness(
        Some(json.as_str()),
        Some("Hi Jane,\nGreat to hear you're rebuilding the site."),
        jane_replies("Yes, our website needs a redesign. Can we talk?"),
    );
    add_lead(&h, Some("lead-1"), "jane@example.com", LeadStatus::Sent, Some(days_ago(1)));

    let summary = run_job(&h, Job::ReplyProcessing).await;
    assert_eq!(summary.updated, 1);

    assert_eq!(h.lead("jane@example.com").status, LeadStatus::Hot);

    let sent = h.sent();
    assert_eq!(sent.len(), 1);
    let (to, subject, body) = &sent[0];
    assert_eq!(to, "jane@example.com");
    assert_eq!(subject, "Re: Your Inquiry - Web Design & Development");
    assert!(body.starts_with("Hi Jane,\n\nGreat to hear"));
    assert!(body.ends_with(
        "Here's the link to book a meeting: https://calendly.com/your-team/web-design\n\nReply STOP to unsubscribe"
    ));

    let alerts = h.alerts();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].kind, AlertKind::HotLead);
    assert_eq!(alerts[0].subject, "HOT LEAD - Jane");
}

#[tokio::test]
async fn test_follow_up_generation_failure_goes_to_manual_review() {
    let json = classification_json("positive", &["Funnels"], 0.9);
    let h = harness(Some(json.as_str()), None, jane_replies("Interested in a funnel."));
    add_lead(&h, Some("lead-1"), "jane@example.com", LeadStatus::Sent, Some(days_ago(1)));

    run_job(&h, Job::ReplyProcessing).await;

    assert_eq!(h.lead("jane@example.com").status, LeadStatus::NeedsManualReview);
    assert!(h.sent().is_empty());
    let alerts = h.alerts();
    assert_eq!(alerts.len(), 1);
    assert!(alerts[0].body.contains("Follow-up generation failed"));
}

#[tokio::test]
async fn test_reprocessing_same_message_is_a_no_op() {
    let json = classification_json("positive", &["Funnels"], 0.9);
    let h = harness(Some(json.as_str()), Some("Hi Jane,\nLet's talk funnels."), jane_replies("Tell me more"));
    add_lead(&h, Some("lead-1"), "jane@example.com", LeadStatus::Sent, Some(days_ago(1)));

    run_job(&h, Job::ReplyProcessing).await;
    let calls_after_first = h.llm_call_count();

    // The mock inbox keeps returning the same unread thread.
    let summary = run_job(&h, Job::ReplyProcessing).await;

    assert_eq!(summary.skipped, 1);
    assert_eq!(summary.updated, 0);
    assert_eq!(h.llm_call_count(), calls_after_first);
    assert_eq!(h.sent().len(), 1);
    assert_eq!(h.alerts().len(), 1);
    assert_eq!(h.lead("jane@example.com").status, LeadStatus::Hot);
}

#[tokio::test]
async fn test_failed_hot_send_leaves_message_for_retry() {
    let json = classification_json("positive", &["Funnels"], 0.9);
    let h = harness_with(
        test_config(),
        Some(json.as_str()),
        Some("Hi Jane,\nLet's talk funnels."),
        jane_replies("Tell me more"),
        true,
    );
    add_lead(&h, Some("lead-1"), "jane@example.com", LeadStatus::Sent, Some(days_ago(1)));

    let summary = run_job(&h, Job::ReplyProcessing).await;

    assert_eq!(summary.failed, 1);
    assert_eq!(h.lead("jane@example.com").status, LeadStatus::Sent);
    assert!(h.alerts().is_empty());
    assert!(h.marked_read.lock().unwrap().is_empty());
    let conn = h.state.db.lock().unwrap();
    assert!(!queries::is_message_processed(&conn, "m-1").unwrap());
}

#[tokio::test]
async fn test_positive_reply_quoting_the_footer_goes_hot() {
    let json = classification_json("positive", &["Web Design & Development"], 0.9);
    let h = harness(
        Some(json.as_str()),
        Some("Hi Jane,\nHappy to set up a call."),
        jane_replies(
            "Yes, very interested, call me tomorrow!\r\n\r\n\
             On Mon, Jun 16, 2025 at 9:00 AM Jose <jose@agency.test> wrote:\r\n\
             > Hi Jane,\r\n\
             > Reply STOP to unsubscribe",
        ),
    );
    add_lead(&h, Some("lead-1"), "jane@example.com", LeadStatus::Sent, Some(days_ago(1)));

    let summary = run_job(&h, Job::ReplyProcessing).await;

    assert_eq!(summary.updated, 1);
    assert_eq!(h.lead("jane@example.com").status, LeadStatus::Hot);
    assert_eq!(h.count_action("ReplyOptOut"), 0);
    assert_eq!(h.sent().len(), 1);
}

#[tokio::test]
async fn test_opt_out_on_a_lead_that_moved_on_is_not_logged() {
    let h = harness(None, None, vec![]);
    add_lead(&h, Some("lead-1"), "jane@example.com", LeadStatus::Sent, Some(days_ago(1)));
    let lead = h.lead("jane@example.com");
    h.state
        .db
        .lock()
        .unwrap()
        .execute("UPDATE leads SET status = 'BOOKED' WHERE email = 'jane@example.com'", [])
        .unwrap();

    let decision = RoutingDecision::Unqualified {
        reason: "Opt-out request".to_string(),
        opted_out: true,
    };
    let outcome = lifecycle::apply_decision(&h.state, &lead, "m-1", "STOP", decision)
        .await
        .unwrap();

    assert_eq!(outcome, ReplyOutcome::Stale);
    assert_eq!(h.count_action("ReplyOptOut"), 0);
    assert_eq!(h.lead("jane@example.com").status, LeadStatus::Booked);
}

#[tokio::test]
async fn test_sent_follow_up_is_not_resent_when_status_write_fails() {
    let json = classification_json("positive", &["Funnels"], 0.9);
    let h = harness(Some(json.as_str()), Some("Hi Jane,\nLet's talk funnels."), jane_replies("Tell me more"));
    add_lead(&h, Some("lead-1"), "jane@example.com", LeadStatus::Sent, Some(days_ago(1)));
    h.state
        .db
        .lock()
        .unwrap()
        .execute_batch(
            "CREATE TRIGGER block_lead_updates BEFORE UPDATE ON leads
             BEGIN SELECT RAISE(ABORT, 'storage unavailable'); END;",
        )
        .unwrap();

    let summary = run_job(&h, Job::ReplyProcessing).await;

    assert_eq!(summary.failed, 1);
    assert_eq!(h.sent().len(), 1);
    assert_eq!(h.count_action("HotFollowUpCommitError"), 1);
    assert_eq!(h.lead("jane@example.com").status, LeadStatus::Sent);
    {
        let conn = h.state.db.lock().unwrap();
        let outcome: String = conn
            .query_row(
                "SELECT outcome FROM processed_messages WHERE message_id = 'm-1'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(outcome, HOT_SEND_UNCOMMITTED);
    }
    let calls_after_first = h.llm_call_count();

    let summary = run_job(&h, Job::ReplyProcessing).await;

    assert_eq!(summary.skipped, 1);
    assert_eq!(h.sent().len(), 1);
    assert_eq!(h.llm_call_count(), calls_after_first);
    assert!(h.alerts().is_empty());
}

#[tokio::test]
async fn test_reply_from_unknown_sender_is_recorded_and_skipped() {
    let threads = vec![reply_thread("t-9", "m-9", "stranger@elsewhere.test", "Who is this?")];
    let h = harness(None, None, threads);

    let summary = run_job(&h, Job::ReplyProcessing).await;

    assert_eq!(summary.skipped, 1);
    assert_eq!(h.llm_call_count(), 0);
    let conn = h.state.db.lock().unwrap();
    assert!(queries::is_message_processed(&conn, "m-9").unwrap());
}

#[tokio::test]
async fn test_reply_from_lead_not_awaiting_one_is_ignored() {
    let h = harness(None, None, jane_replies("Following up on my booking"));
    add_lead(&h, Some("lead-1"), "jane@example.com", LeadStatus::Booked, Some(days_ago(1)));

    run_job(&h, Job::ReplyProcessing).await;

    assert_eq!(h.lead("jane@example.com").status, LeadStatus::Booked);
    assert_eq!(h.llm_call_count(), 0);
    assert_eq!(h.count_action("ProcessRepliesWrongStatus"), 1);
}

// ── Batch Job Tests ──

#[tokio::test]
async fn test_initial_send_respects_daily_quota_across_runs() {
    let mut config = test_config();
    config.policy.daily_send_quota = 2;
    let h = harness_with(config, None, None, vec![], false);
    add_lead(&h, None, "not-an-email", LeadStatus::Pending, None);
    add_lead(&h, None, "a@example.com", LeadStatus::Pending, None);
    add_lead(&h, Some("lead-b"), "b@example.com", LeadStatus::Pending, None);
    add_lead(&h, None, "c@example.com", LeadStatus::Pending, None);

    let summary = run_job(&h, Job::InitialSend).await;
    assert_eq!(summary.sent, 2);

    assert_eq!(h.lead("not-an-email").status, LeadStatus::InvalidEmail);
    let a = h.lead("a@example.com");
    assert_eq!(a.status, LeadStatus::Sent);
    assert!(a.lead_id.is_some());
    assert!(a.last_contact.is_some());
    assert_eq!(h.lead("b@example.com").lead_id.as_deref(), Some("lead-b"));
    assert_eq!(h.lead("c@example.com").status, LeadStatus::Pending);

    let sent = h.sent();
    assert_eq!(sent[0].1, "Free Audit for Funnels");
    assert!(sent[0].2.ends_with(FOOTER));

    // Same day: the quota is already used up.
    let summary = run_job(&h, Job::InitialSend).await;
    assert_eq!(summary.sent, 0);
    assert_eq!(h.lead("c@example.com").status, LeadStatus::Pending);
    assert_eq!(h.sent().len(), 2);
}

#[tokio::test]
async fn test_follow_up_sent_only_once_window_has_passed() {
    let h = harness(None, None, vec![]);
    add_lead(&h, Some("due"), "due@example.com", LeadStatus::Sent, Some(days_ago(3)));
    add_lead(&h, Some("early"), "early@example.com", LeadStatus::Sent, Some(days_ago(2)));
    add_lead(&h, Some("undated"), "undated@example.com", LeadStatus::Sent, None);

    let summary = run_job(&h, Job::FollowUp).await;

    assert_eq!(summary.sent, 1);
    assert_eq!(summary.skipped, 1);
    assert_eq!(h.lead("due@example.com").status, LeadStatus::FollowUp1);
    assert_eq!(h.lead("early@example.com").status, LeadStatus::Sent);
    assert_eq!(h.lead("undated@example.com").status, LeadStatus::Sent);

    let sent = h.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, "due@example.com");
    assert_eq!(sent[0].1, "Following up on your Free Audit for Funnels");
}

#[tokio::test]
async fn test_cleanup_abandons_stale_follow_ups() {
    let h = harness(None, None, vec![]);
    add_lead(&h, Some("stale"), "stale@example.com", LeadStatus::FollowUp1, Some(days_ago(4)));
    add_lead(&h, Some("fresh"), "fresh@example.com", LeadStatus::FollowUp1, Some(days_ago(3)));
    add_lead(&h, Some("undated"), "undated@example.com", LeadStatus::FollowUp1, None);

    let summary = run_job(&h, Job::Cleanup).await;

    assert_eq!(summary.updated, 1);
    assert_eq!(summary.skipped, 1);
    assert_eq!(h.lead("stale@example.com").status, LeadStatus::Abandoned);
    assert_eq!(h.lead("fresh@example.com").status, LeadStatus::FollowUp1);
    assert_eq!(h.lead("undated@example.com").status, LeadStatus::FollowUp1);
    assert!(h.sent().is_empty());
}

#[tokio::test]
async fn test_job_skipped_while_lock_is_held() {
    let h = harness(None, None, vec![]);
    let _held = h
        .state
        .locks
        .try_acquire(Job::Cleanup, Duration::from_millis(10))
        .await
        .unwrap();

    let outcome = run_exclusive(Arc::clone(&h.state), Job::Cleanup).await;

    assert_eq!(outcome, JobOutcome::Skipped);
    assert_eq!(h.count_action("CleanupLeadsLockError"), 1);
    assert_eq!(h.count_action("CleanupLeadsStart"), 0);
}

// ── Booking Webhook Tests ──

fn booking_request(email: &str, uri: &str) -> Request<Body> {
    let body = serde_json::json!({
        "event": "invitee.created",
        "payload": {
            "email": email,
            "uri": uri,
            "scheduled_event": {"start_time": "2025-06-16T14:00:00.000000Z"}
        }
    });
    Request::builder()
        .method("POST")
        .uri("/webhook/booking")
        .header("Content-Type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn test_booking_webhook_is_idempotent() {
    let h = harness(None, None, vec![]);
    add_lead(&h, Some("lead-1"), "jane@example.com", LeadStatus::Hot, Some(days_ago(1)));

    let res = test_app(Arc::clone(&h.state))
        .oneshot(booking_request("Jane@Example.com", "https://calendly.test/invitees/1"))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(json_body(res).await["status"], "booked");

    let res = test_app(Arc::clone(&h.state))
        .oneshot(booking_request("Jane@Example.com", "https://calendly.test/invitees/1"))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(json_body(res).await["status"], "duplicate");

    assert_eq!(h.lead("jane@example.com").status, LeadStatus::Booked);
    let alerts = h.alerts();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].kind, AlertKind::Booking);
    assert!(alerts[0].body.contains("2025-06-16 14:00 UTC"));
}

#[tokio::test]
async fn test_booking_webhook_unknown_lead_is_acknowledged() {
    let h = harness(None, None, vec![]);

    let res = test_app(Arc::clone(&h.state))
        .oneshot(booking_request("nobody@example.com", "https://calendly.test/invitees/2"))
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(json_body(res).await["status"], "unknown_lead");
    assert!(h.alerts().is_empty());
}

// ── Admin API Tests ──

#[tokio::test]
async fn test_health() {
    let h = harness(None, None, vec![]);
    let res = test_app(Arc::clone(&h.state))
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_admin_requires_auth() {
    let h = harness(None, None, vec![]);

    let res = test_app(Arc::clone(&h.state))
        .oneshot(
            Request::builder()
                .uri("/api/admin/leads")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let res = test_app(Arc::clone(&h.state))
        .oneshot(
            Request::builder()
                .uri("/api/admin/leads")
                .header("Authorization", "Bearer wrong-token")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_admin_list_leads_by_status() {
    let h = harness(None, None, vec![]);
    add_lead(&h, Some("lead-1"), "jane@example.com", LeadStatus::Sent, None);
    add_lead(&h, Some("lead-2"), "bob@example.com", LeadStatus::Hot, None);

    let res = test_app(Arc::clone(&h.state))
        .oneshot(
            Request::builder()
                .uri("/api/admin/leads?status=HOT")
                .header("Authorization", "Bearer test-token")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::OK);
    let json = json_body(res).await;
    let leads = json.as_array().unwrap();
    assert_eq!(leads.len(), 1);
    assert_eq!(leads[0]["email"], "bob@example.com");
    assert_eq!(leads[0]["status"], "HOT");
}

fn resolve_request(lead_id: &str, status: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(format!("/api/admin/leads/{lead_id}/resolve"))
        .header("Authorization", "Bearer test-token")
        .header("Content-Type", "application/json")
        .body(Body::from(serde_json::json!({ "status": status }).to_string()))
        .unwrap()
}

#[tokio::test]
async fn test_admin_resolve_manual_review() {
    let h = harness(None, None, vec![]);
    add_lead(&h, Some("review"), "review@example.com", LeadStatus::NeedsManualReview, None);
    add_lead(&h, Some("sent"), "sent@example.com", LeadStatus::Sent, None);

    let res = test_app(Arc::clone(&h.state))
        .oneshot(resolve_request("review", "HOT"))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(json_body(res).await["status"], "HOT");
    assert_eq!(h.lead("review@example.com").status, LeadStatus::Hot);

    // Only leads parked in manual review can be resolved.
    let res = test_app(Arc::clone(&h.state))
        .oneshot(resolve_request("sent", "HOT"))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CONFLICT);

    let res = test_app(Arc::clone(&h.state))
        .oneshot(resolve_request("missing", "HOT"))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_admin_import_and_run_job() {
    let h = harness(None, None, vec![]);

    let csv = "Email,First Name,Last Service,Status,Last Contact\n\
               stale@example.com,Sam,SEO,FOLLOW_UP_1,2020-01-01\n\
               new@example.com,Nia,Funnels,,\n";
    let res = test_app(Arc::clone(&h.state))
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/admin/leads/import")
                .header("Authorization", "Bearer test-token")
                .header("Content-Type", "text/csv")
                .body(Body::from(csv))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(json_body(res).await["imported"], 2);

    let res = test_app(Arc::clone(&h.state))
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/admin/jobs/cleanup/run")
                .header("Authorization", "Bearer test-token")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let json = json_body(res).await;
    assert_eq!(json["outcome"], "completed");
    assert_eq!(json["summary"]["updated"], 1);
    assert_eq!(h.lead("stale@example.com").status, LeadStatus::Abandoned);
    assert_eq!(h.lead("new@example.com").status, LeadStatus::Pending);

    let res = test_app(Arc::clone(&h.state))
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/admin/jobs/defrag/run")
                .header("Authorization", "Bearer test-token")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}

use std::sync::{Arc, Mutex};

use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use leadflow::config::AppConfig;
use leadflow::db;
use leadflow::handlers;
use leadflow::scheduler;
use leadflow::services::ai::gemini::GeminiProvider;
use leadflow::services::ai::ollama::OllamaProvider;
use leadflow::services::ai::LlmProvider;
use leadflow::services::batch::JobLocks;
use leadflow::services::mailbox::{GmailMailbox, Mailbox};
use leadflow::services::notify::EmailSlackNotifier;
use leadflow::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = AppConfig::from_env()?;

    let conn = db::init_db(&config.database_url)?;

    let llm: Box<dyn LlmProvider> = match config.llm_provider.as_str() {
        "ollama" => {
            tracing::info!("using Ollama LLM provider (url: {})", config.ollama_url);
            Box::new(OllamaProvider::new(config.ollama_url.clone(), config.ollama_model.clone()))
        }
        _ => {
            anyhow::ensure!(
                !config.gemini_api_key.is_empty(),
                "GEMINI_API_KEY must be set when LLM_PROVIDER=gemini"
            );
            tracing::info!("using Gemini LLM provider (model: {})", config.gemini_model);
            Box::new(GeminiProvider::new(config.gemini_api_key.clone(), config.gemini_model.clone()))
        }
    };

    if config.gmail_access_token.is_empty() {
        tracing::warn!("GMAIL_ACCESS_TOKEN is not set; sends and inbox scans will fail");
    }
    let mailbox: Arc<dyn Mailbox> = Arc::new(GmailMailbox::new(
        config.gmail_access_token.clone(),
        config.sender_address.clone(),
        config.sender_name.clone(),
    ));
    let notifier = EmailSlackNotifier::new(
        Arc::clone(&mailbox),
        config.review_email.clone(),
        config.slack_webhook_url.clone(),
    );

    let state = Arc::new(AppState {
        db: Arc::new(Mutex::new(conn)),
        config: config.clone(),
        llm,
        mailbox,
        notifier: Box::new(notifier),
        locks: JobLocks::new(),
    });

    let app = Router::new()
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
        .layer(TraceLayer::new_for_http())
        .with_state(Arc::clone(&state));

    scheduler::spawn(state);

    let addr = format!("0.0.0.0:{}", config.port);
    tracing::info!("starting server on {addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

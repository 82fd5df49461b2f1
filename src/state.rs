use std::sync::Arc;

use crate::config::AppConfig;
use crate::db::Db;
use crate::services::ai::LlmProvider;
use crate::services::batch::JobLocks;
use crate::services::mailbox::Mailbox;
use crate::services::notify::Notifier;

pub struct AppState {
    pub db: Db,
    pub config: AppConfig,
    pub llm: Box<dyn LlmProvider>,
    /// Shared with the notifier, which sends review alerts through it.
    pub mailbox: Arc<dyn Mailbox>,
    pub notifier: Box<dyn Notifier>,
    pub locks: JobLocks,
}

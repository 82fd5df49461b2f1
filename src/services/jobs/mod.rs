pub mod cleanup;
pub mod follow_up;
pub mod outreach;
pub mod replies;

use std::sync::Arc;

use crate::services::batch::{Job, JobSummary};
use crate::state::AppState;

/// Entry point for one job run. Callers go through
/// [`crate::services::batch::run_exclusive`] for locking.
pub async fn run(state: Arc<AppState>, job: Job) -> anyhow::Result<JobSummary> {
    match job {
        Job::InitialSend => outreach::run(&state).await,
        Job::FollowUp => follow_up::run(&state).await,
        Job::ReplyProcessing => replies::run(&state).await,
        Job::Cleanup => cleanup::run(&state).await,
    }
}

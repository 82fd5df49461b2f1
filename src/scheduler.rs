use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Days, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;

use crate::services::batch::{self, Job, JobOutcome};
use crate::state::AppState;

/// Local hour each daily job fires at.
pub const DAILY_JOBS: [(Job, u32); 3] = [
    (Job::InitialSend, 9),
    (Job::FollowUp, 10),
    (Job::Cleanup, 23),
];

const REPLY_POLL_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Starts one background task per job. Tasks live for the life of the
/// process.
pub fn spawn(state: Arc<AppState>) {
    for (job, hour) in DAILY_JOBS {
        let state = Arc::clone(&state);
        tokio::spawn(async move {
            loop {
                let now = Utc::now();
                let next = next_daily_run(now, state.config.timezone, hour);
                tracing::info!(job = job.as_str(), next_run = %next, "scheduled");
                let wait = (next - now).to_std().unwrap_or_default();
                tokio::time::sleep(wait).await;
                trigger(&state, job).await;
            }
        });
    }

    tokio::spawn(async move {
        let start = tokio::time::Instant::now() + REPLY_POLL_INTERVAL;
        let mut interval = tokio::time::interval_at(start, REPLY_POLL_INTERVAL);
        loop {
            interval.tick().await;
            trigger(&state, Job::ReplyProcessing).await;
        }
    });
}

async fn trigger(state: &Arc<AppState>, job: Job) {
    match batch::run_exclusive(Arc::clone(state), job).await {
        JobOutcome::Completed { summary } => {
            tracing::info!(job = job.as_str(), ?summary, "scheduled run completed")
        }
        JobOutcome::Skipped => tracing::warn!(job = job.as_str(), "scheduled run skipped"),
        JobOutcome::Failed { error } => {
            tracing::error!(job = job.as_str(), error = %error, "scheduled run failed")
        }
    }
}

/// The first instant strictly after `now` at which the wall clock in `tz`
/// reads `hour`:00. When that local time does not exist (spring-forward
/// gap) the run moves to the first valid instant after it.
pub fn next_daily_run(now: DateTime<Utc>, tz: Tz, hour: u32) -> DateTime<Utc> {
    let at = NaiveTime::from_hms_opt(hour.min(23), 0, 0).unwrap_or(NaiveTime::MIN);
    let today = now.with_timezone(&tz).date_naive();

    for offset in 0..3 {
        let Some(date) = today.checked_add_days(Days::new(offset)) else {
            break;
        };
        let local = date.and_time(at);
        let candidate = tz
            .from_local_datetime(&local)
            .earliest()
            .or_else(|| tz.from_local_datetime(&(local + chrono::Duration::hours(1))).earliest())
            .map(|dt| dt.with_timezone(&Utc));
        if let Some(candidate) = candidate {
            if candidate > now {
                return candidate;
            }
        }
    }

    now + chrono::Duration::days(1)
}

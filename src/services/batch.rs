use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::db::{self, queries, Db};
use crate::models::{Severity, StatusChange};
use crate::services::activity::log_action;
use crate::services::jobs;
use crate::state::AppState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Job {
    InitialSend,
    FollowUp,
    ReplyProcessing,
    Cleanup,
}

impl Job {
    pub const ALL: [Job; 4] = [
        Job::InitialSend,
        Job::FollowUp,
        Job::ReplyProcessing,
        Job::Cleanup,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Job::InitialSend => "initial_send",
            Job::FollowUp => "follow_up",
            Job::ReplyProcessing => "reply_processing",
            Job::Cleanup => "cleanup",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Job::ALL
            .into_iter()
            .find(|job| job.as_str() == s.trim().to_ascii_lowercase().replace('-', "_"))
    }

    /// Prefix for this job's activity-log action names.
    fn log_prefix(&self) -> &'static str {
        match self {
            Job::InitialSend => "DailyBatch",
            Job::FollowUp => "FollowUp",
            Job::ReplyProcessing => "ProcessReplies",
            Job::Cleanup => "CleanupLeads",
        }
    }
}

/// One named lock per job type. Runs of different jobs may overlap; two
/// runs of the same job never do.
pub struct JobLocks {
    locks: HashMap<Job, Arc<Mutex<()>>>,
}

impl JobLocks {
    pub fn new() -> Self {
        Self {
            locks: Job::ALL
                .into_iter()
                .map(|job| (job, Arc::new(Mutex::new(()))))
                .collect(),
        }
    }

    /// Waits up to `wait` for the job's lock. `None` means another run holds it.
    pub async fn try_acquire(&self, job: Job, wait: Duration) -> Option<OwnedMutexGuard<()>> {
        let lock = Arc::clone(self.locks.get(&job)?);
        tokio::time::timeout(wait, lock.lock_owned()).await.ok()
    }
}

impl Default for JobLocks {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct JobSummary {
    pub examined: usize,
    pub sent: usize,
    pub updated: usize,
    pub skipped: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum JobOutcome {
    Completed { summary: JobSummary },
    Skipped,
    Failed { error: String },
}

/// Runs `job` under its lock. A run that cannot get the lock in time is
/// skipped. Errors and panics inside the job are logged as CRITICAL and
/// never propagate; the lock is released on every path.
pub async fn run_exclusive(state: Arc<AppState>, job: Job) -> JobOutcome {
    let prefix = job.log_prefix();
    let wait = state.config.policy.lock_wait;

    let Some(guard) = state.locks.try_acquire(job, wait).await else {
        log_action(
            &state.db,
            &format!("{prefix}LockError"),
            None,
            None,
            &format!(
                "Could not obtain lock for {} after {}s. Run skipped.",
                job.as_str(),
                wait.as_secs()
            ),
            Severity::Warning,
        );
        return JobOutcome::Skipped;
    };

    log_action(
        &state.db,
        &format!("{prefix}Start"),
        None,
        None,
        &format!("{} started with lock.", job.as_str()),
        Severity::Info,
    );

    let task_state = Arc::clone(&state);
    let handle = tokio::spawn(async move { jobs::run(task_state, job).await });

    let outcome = match handle.await {
        Ok(Ok(summary)) => {
            log_action(
                &state.db,
                &format!("{prefix}End"),
                None,
                None,
                &format!(
                    "{} finished. examined={} sent={} updated={} skipped={} failed={}",
                    job.as_str(),
                    summary.examined,
                    summary.sent,
                    summary.updated,
                    summary.skipped,
                    summary.failed
                ),
                Severity::Info,
            );
            JobOutcome::Completed { summary }
        }
        Ok(Err(e)) => {
            let error = format!("{e:#}");
            log_action(
                &state.db,
                &format!("{prefix}CriticalError"),
                None,
                None,
                &format!("Error in {}: {error}", job.as_str()),
                Severity::Critical,
            );
            JobOutcome::Failed { error }
        }
        Err(join_error) => {
            let error = if join_error.is_panic() {
                format!("{} panicked", job.as_str())
            } else {
                format!("{} was cancelled", job.as_str())
            };
            log_action(
                &state.db,
                &format!("{prefix}CriticalError"),
                None,
                None,
                &error,
                Severity::Critical,
            );
            JobOutcome::Failed { error }
        }
    };

    drop(guard);
    log_action(
        &state.db,
        &format!("{prefix}LockReleased"),
        None,
        None,
        &format!("Lock released for {}.", job.as_str()),
        Severity::Debug,
    );
    outcome
}

/// Stages lead status changes and writes them in one transaction every
/// `flush_every` changes. Whatever is still pending must be written with
/// [`BatchWriter::flush`] before the job returns.
pub struct BatchWriter {
    pending: Vec<StatusChange>,
    flush_every: usize,
    applied: usize,
}

impl BatchWriter {
    pub fn new(flush_every: usize) -> Self {
        Self {
            pending: vec![],
            flush_every: flush_every.max(1),
            applied: 0,
        }
    }

    /// Queues a change, flushing when the batch is full. A failed periodic
    /// flush keeps the changes queued for the next attempt.
    pub fn stage(&mut self, db: &Db, change: StatusChange) {
        self.pending.push(change);
        if self.pending.len() >= self.flush_every {
            if let Err(e) = self.flush(db) {
                tracing::error!(error = %e, pending = self.pending.len(), "periodic flush failed");
            }
        }
    }

    pub fn flush(&mut self, db: &Db) -> anyhow::Result<usize> {
        if self.pending.is_empty() {
            return Ok(0);
        }
        let count = {
            let mut conn = db::lock(db)?;
            queries::apply_status_changes(&mut conn, &self.pending)?
        };
        tracing::debug!(staged = self.pending.len(), applied = count, "flushed lead updates");
        self.pending.clear();
        self.applied += count;
        Ok(count)
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Rows changed by all flushes so far.
    pub fn applied(&self) -> usize {
        self.applied
    }
}

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::Json;
use serde::Deserialize;

use crate::db::{self, queries};
use crate::errors::AppError;
use crate::models::{Lead, LeadStatus, LogEntry};
use crate::services::batch::{self, Job, JobOutcome};
use crate::services::import::{self, ImportError, ImportReport};
use crate::services::lifecycle::{self, TransitionError};
use crate::state::AppState;

const LOG_LIMIT: usize = 50;

fn check_auth(headers: &HeaderMap, expected_token: &str) -> Result<(), AppError> {
    let auth = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    let token = auth.strip_prefix("Bearer ").unwrap_or("");
    if expected_token.is_empty() || token != expected_token {
        return Err(AppError::Unauthorized);
    }
    Ok(())
}

// GET /api/admin/leads
#[derive(Deserialize)]
pub struct LeadsQuery {
    pub status: Option<String>,
}

pub async fn list_leads(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<LeadsQuery>,
) -> Result<Json<Vec<Lead>>, AppError> {
    check_auth(&headers, &state.config.admin_token)?;

    let status = match query.status.as_deref().filter(|s| !s.is_empty()) {
        None => None,
        Some(raw) => Some(
            LeadStatus::parse(raw).ok_or_else(|| AppError::BadRequest(format!("unknown status {raw:?}")))?,
        ),
    };

    let leads = {
        let conn = db::lock(&state.db)?;
        queries::list_leads(&conn, status)?
    };
    Ok(Json(leads))
}

// GET /api/admin/leads/:lead_id/logs
pub async fn lead_logs(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(lead_id): Path<String>,
) -> Result<Json<Vec<LogEntry>>, AppError> {
    check_auth(&headers, &state.config.admin_token)?;

    let logs = {
        let conn = db::lock(&state.db)?;
        queries::recent_logs_for_lead(&conn, &lead_id, LOG_LIMIT)?
    };
    Ok(Json(logs))
}

// POST /api/admin/leads/:lead_id/resolve
#[derive(Deserialize)]
pub struct ResolveRequest {
    pub status: String,
}

pub async fn resolve_lead(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(lead_id): Path<String>,
    Json(req): Json<ResolveRequest>,
) -> Result<Json<Lead>, AppError> {
    check_auth(&headers, &state.config.admin_token)?;

    let to = LeadStatus::parse(&req.status)
        .ok_or_else(|| AppError::BadRequest(format!("unknown status {:?}", req.status)))?;

    let lead = lifecycle::resolve_manual_review(&state, &lead_id, to).map_err(|e| match e {
        TransitionError::NotFound(id) => AppError::NotFound(format!("lead {id}")),
        e @ (TransitionError::Illegal { .. } | TransitionError::Stale) => AppError::Conflict(e.to_string()),
        TransitionError::Storage(e) => AppError::Internal(e),
    })?;
    Ok(Json(lead))
}

// POST /api/admin/leads/import
pub async fn import_leads(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: String,
) -> Result<Json<ImportReport>, AppError> {
    check_auth(&headers, &state.config.admin_token)?;

    let report = {
        let conn = db::lock(&state.db)?;
        import::import_csv(&conn, &body).map_err(|e| match e {
            ImportError::Storage(e) => AppError::Internal(e),
            e => AppError::BadRequest(e.to_string()),
        })?
    };
    Ok(Json(report))
}

// POST /api/admin/jobs/:job/run
pub async fn run_job(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(job): Path<String>,
) -> Result<Json<JobOutcome>, AppError> {
    check_auth(&headers, &state.config.admin_token)?;

    let job = Job::parse(&job).ok_or_else(|| AppError::BadRequest(format!("unknown job {job:?}")))?;
    tracing::info!(job = job.as_str(), "manual job run requested");
    Ok(Json(batch::run_exclusive(state, job).await))
}

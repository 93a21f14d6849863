use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    routing::{get, post},
};
use constcat::concat;
use serde::{Deserialize, Serialize};

use crate::{
    AppState, Result,
    censor::{CensorHook, Ingestor, JobStore},
    db::Db,
    error::CensorError,
    models::StreamModerationJob,
    provider::{JobList, JobListRequest, JobQueryRequest, JobQueryResult, ModerationProvider},
};

const JOB: &str = "/jobs/{job_id}";

/// Query string of the job item listing.
#[derive(Debug, Default, Deserialize)]
struct JobItemsQuery {
    /// Comma-separated suggestions to keep, e.g. `block,review`.
    #[serde(default)]
    suggestions: Option<String>,
    #[serde(default)]
    start: i64,
    #[serde(default)]
    end: i64,
}

#[derive(Debug, Serialize)]
struct IngestOutput {
    ids: Vec<i64>,
}

async fn list_jobs(
    State(provider): State<Arc<dyn ModerationProvider>>,
    Query(input): Query<JobListRequest>,
) -> Result<Json<JobList>> {
    let jobs = provider
        .list_jobs(&input)
        .await
        .map_err(CensorError::from)?;
    Ok(Json(jobs))
}

async fn get_job(
    State(db): State<Db>,
    Path(job_id): Path<String>,
) -> Result<Json<StreamModerationJob>> {
    Ok(Json(JobStore::new(db).by_job(&job_id).await?))
}

async fn job_items(
    State(provider): State<Arc<dyn ModerationProvider>>,
    Path(job_id): Path<String>,
    Query(input): Query<JobItemsQuery>,
) -> Result<Json<JobQueryResult>> {
    let req = JobQueryRequest {
        job: job_id,
        suggestions: input
            .suggestions
            .as_deref()
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_owned)
            .collect(),
        start: input.start,
        end: input.end,
    };

    let items = provider
        .query_job(&req)
        .await
        .map_err(CensorError::from)?;
    Ok(Json(items))
}

async fn callback(
    State(db): State<Db>,
    Json(hook): Json<CensorHook>,
) -> Result<Json<IngestOutput>> {
    let ids = Ingestor::new(db).ingest(&hook).await?;
    Ok(Json(IngestOutput { ids }))
}

#[rustfmt::skip]
pub(super) fn routes() -> Router<AppState> {
    // GET  /censor/jobs
    // GET  /censor/jobs/{job_id}
    // GET  /censor/jobs/{job_id}/items
    // POST /censor/callback
    Router::new()
        .route("/jobs",                get(list_jobs))
        .route(JOB,                    get(get_job))
        .route(concat!(JOB, "/items"), get(job_items))
        .route("/callback",            post(callback))
}

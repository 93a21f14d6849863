//! Stream life-cycle notifications from the streaming platform.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    routing::post,
};
use constcat::concat;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    AppState, Result,
    censor::{JobManager, StreamStore},
    db::Db,
    error::CensorError,
    models::{LiveStream, StreamDescriptor, StreamModerationJob},
    provider::ModerationProvider,
};

const STREAM: &str = "/streams/{stream_id}";

#[derive(Debug, Serialize)]
struct StreamOutput {
    stream: LiveStream,
    /// Absent when moderation is switched off.
    job: Option<StreamModerationJob>,
}

#[derive(Debug, Default, Deserialize)]
struct StopInput {
    #[serde(default)]
    reason: String,
}

async fn start_stream(
    State(db): State<Db>,
    State(provider): State<Arc<dyn ModerationProvider>>,
    Path(stream_id): Path<String>,
    Json(input): Json<StreamDescriptor>,
) -> Result<Json<StreamOutput>> {
    let stream = StreamStore::new(db.clone()).upsert(&stream_id, &input).await?;
    let job = JobManager::new(db, provider).start_job(&stream).await?;

    Ok(Json(StreamOutput { stream, job }))
}

async fn stop_stream(
    State(db): State<Db>,
    State(provider): State<Arc<dyn ModerationProvider>>,
    Path(stream_id): Path<String>,
    Json(input): Json<StopInput>,
) -> Result<Json<StreamOutput>> {
    let stream = StreamStore::new(db.clone())
        .mark_stopped(&stream_id, &input.reason)
        .await?;

    let job = match JobManager::new(db, provider).stop_job(&stream_id).await {
        Ok(job) => Some(job),
        // Streams that went live while moderation was off have no job.
        Err(CensorError::NotFound(what)) => {
            debug!("nothing to stop: {what} not found");
            None
        }
        Err(e) => return Err(e.into()),
    };

    Ok(Json(StreamOutput { stream, job }))
}

#[rustfmt::skip]
pub(super) fn routes() -> Router<AppState> {
    // POST /censor/streams/{stream_id}/start
    // POST /censor/streams/{stream_id}/stop
    Router::new()
        .route(concat!(STREAM, "/start"), post(start_stream))
        .route(concat!(STREAM, "/stop"),  post(stop_stream))
}

//! Moderation job life-cycle: one provider job per live stream.

use std::sync::Arc;

use chrono::Utc;
use metrics::counter;
use tracing::{debug, error, info, instrument, warn};

use super::config_store::ConfigStore;
use crate::{
    db::{
        Db,
        util::{is_err_unique_violation, retry_sqlite},
    },
    error::CensorError,
    metrics::{JOBS_COMPENSATED, JOBS_START_FAILED, JOBS_STARTED, JOBS_STOPPED},
    models::{LiveStream, ModerationConfig, StreamModerationJob},
    provider::{JobHandle, ModerationProvider},
};

/// Stream to job mappings.
#[derive(Clone, Debug)]
pub struct JobStore {
    db: Db,
}

impl JobStore {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    pub async fn find_by_stream(
        &self,
        stream_id: &str,
    ) -> Result<Option<StreamModerationJob>, CensorError> {
        Ok(sqlx::query_as::<_, StreamModerationJob>(
            "SELECT * FROM stream_moderation_jobs WHERE stream_id = ?",
        )
        .bind(stream_id)
        .fetch_optional(self.db.primary())
        .await?)
    }

    pub async fn by_stream(&self, stream_id: &str) -> Result<StreamModerationJob, CensorError> {
        self.find_by_stream(stream_id)
            .await?
            .ok_or_else(|| CensorError::not_found(format!("moderation job for stream {stream_id}")))
    }

    pub async fn by_job(&self, job_id: &str) -> Result<StreamModerationJob, CensorError> {
        sqlx::query_as::<_, StreamModerationJob>(
            "SELECT * FROM stream_moderation_jobs WHERE job_id = ?",
        )
        .bind(job_id)
        .fetch_optional(self.db.primary())
        .await?
        .ok_or_else(|| CensorError::not_found(format!("moderation job {job_id}")))
    }

    /// Record a new job together with a snapshot of the policy it runs under.
    ///
    /// Replaces a closed mapping for the same stream; an active one is a conflict.
    pub async fn save(
        &self,
        stream_id: &str,
        job_id: &str,
        config: &ModerationConfig,
    ) -> Result<StreamModerationJob, CensorError> {
        let now = Utc::now();
        let saved = retry_sqlite(|| {
            sqlx::query_as::<_, StreamModerationJob>(
                r#"
                INSERT INTO stream_moderation_jobs
                        (stream_id, job_id, interval_secs, politician, pulp, ads, terror, created_at)
                    VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                    ON CONFLICT (stream_id) DO UPDATE SET
                        job_id = excluded.job_id,
                        interval_secs = excluded.interval_secs,
                        politician = excluded.politician,
                        pulp = excluded.pulp,
                        ads = excluded.ads,
                        terror = excluded.terror,
                        created_at = excluded.created_at,
                        closed_at = NULL
                    WHERE stream_moderation_jobs.closed_at IS NOT NULL
                    RETURNING *
                "#,
            )
            .bind(stream_id)
            .bind(job_id)
            .bind(config.interval_secs)
            .bind(config.scenes.politician)
            .bind(config.scenes.pulp)
            .bind(config.scenes.ads)
            .bind(config.scenes.terror)
            .bind(now)
            .fetch_optional(self.db.primary())
        })
        .await
        .map_err(|e| {
            if is_err_unique_violation(&e) {
                CensorError::conflict(format!("job {job_id} is already mapped to another stream"))
            } else {
                e.into()
            }
        })?;

        saved.ok_or_else(|| {
            CensorError::conflict(format!("stream {stream_id} already has an active job"))
        })
    }

    pub async fn mark_closed(&self, stream_id: &str) -> Result<StreamModerationJob, CensorError> {
        sqlx::query_as::<_, StreamModerationJob>(
            r#"
            UPDATE stream_moderation_jobs
                SET closed_at = COALESCE(closed_at, ?)
                WHERE stream_id = ?
                RETURNING *
            "#,
        )
        .bind(Utc::now())
        .bind(stream_id)
        .fetch_optional(self.db.primary())
        .await?
        .ok_or_else(|| CensorError::not_found(format!("moderation job for stream {stream_id}")))
    }
}

/// Starts and stops provider jobs as streams go live and end.
#[derive(Clone)]
pub struct JobManager {
    config: ConfigStore,
    jobs: JobStore,
    provider: Arc<dyn ModerationProvider>,
}

impl JobManager {
    pub fn new(db: Db, provider: Arc<dyn ModerationProvider>) -> Self {
        Self {
            config: ConfigStore::new(db.clone()),
            jobs: JobStore::new(db),
            provider,
        }
    }

    pub fn store(&self) -> &JobStore {
        &self.jobs
    }

    /// Create a moderation job for a stream that just went live.
    ///
    /// Returns `None` when moderation is switched off. If the job mapping
    /// cannot be recorded, the freshly created provider job is closed again
    /// before the storage error is returned.
    #[instrument(skip_all, fields(stream_id = %stream.stream_id))]
    pub async fn start_job(
        &self,
        stream: &LiveStream,
    ) -> Result<Option<StreamModerationJob>, CensorError> {
        let config = self.config.get().await?;
        if !config.enabled {
            debug!("moderation disabled, not starting a job");
            return Ok(None);
        }
        config.validate()?;

        if let Some(existing) = self.jobs.find_by_stream(&stream.stream_id).await? {
            if existing.closed_at.is_none() {
                return Err(CensorError::conflict(format!(
                    "stream {} already has an active job",
                    stream.stream_id
                )));
            }
        }

        let handle = match self.provider.create_job(stream, &config).await {
            Ok(handle) => handle,
            Err(e) => {
                counter!(JOBS_START_FAILED).increment(1);
                error!("failed to create moderation job: {e}");
                return Err(e.into());
            }
        };

        match self
            .jobs
            .save(&stream.stream_id, &handle.job_id, &config)
            .await
        {
            Ok(job) => {
                counter!(JOBS_STARTED).increment(1);
                info!(job_id = %job.job_id, "moderation job started");
                Ok(Some(job))
            }
            Err(err) => {
                counter!(JOBS_COMPENSATED).increment(1);
                warn!(
                    "failed to record job {}, closing it on the provider: {err}",
                    handle.job_id
                );
                if let Err(close_err) = self.provider.close_job(&handle).await {
                    error!("failed to close orphaned job {}: {close_err}", handle.job_id);
                }
                Err(err)
            }
        }
    }

    /// Close the moderation job of a stream that ended.
    ///
    /// The mapping is kept (and marked closed) so the job can still be resolved
    /// from late provider callbacks. A provider failure leaves the mapping open
    /// and the call can be retried.
    #[instrument(skip(self))]
    pub async fn stop_job(&self, stream_id: &str) -> Result<StreamModerationJob, CensorError> {
        let job = self.jobs.by_stream(stream_id).await?;
        if job.closed_at.is_some() {
            debug!(job_id = %job.job_id, "moderation job already closed");
            return Ok(job);
        }

        let handle = JobHandle {
            job_id: job.job_id.clone(),
        };
        if let Err(e) = self.provider.close_job(&handle).await {
            error!(job_id = %job.job_id, "failed to close moderation job: {e}");
            return Err(e.into());
        }

        let job = self.jobs.mark_closed(stream_id).await?;
        counter!(JOBS_STOPPED).increment(1);
        info!(job_id = %job.job_id, "moderation job stopped");
        Ok(job)
    }
}

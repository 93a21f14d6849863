//! Ingestion of flagged items posted back by the moderation provider.

use chrono::Utc;
use metrics::counter;
use serde::Deserialize;
use tracing::{debug, info, instrument, warn};

use super::{
    jobs::JobStore,
    review::{NewReviewItem, insert_item, refresh_unreviewed},
};
use crate::{
    db::Db,
    error::CensorError,
    metrics::ITEMS_INGESTED,
    models::MediaKind,
    provider::{AudioResult, ImageResult, ItemVerdict},
};

/// Suggestion the provider gives to samples it considers clean.
const SUGGESTION_PASS: &str = "pass";

/// Body of a provider callback.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CensorHook {
    pub job: String,
    #[serde(default)]
    pub image: Vec<ImageResult>,
    #[serde(default)]
    pub audio: Vec<AudioResult>,
}

/// A sample needs review when it was classified and not passed.
fn is_flagged(code: i64, verdict: &ItemVerdict) -> bool {
    code == 0
        && !verdict.suggestion.is_empty()
        && !verdict.suggestion.eq_ignore_ascii_case(SUGGESTION_PASS)
}

fn scenes_json(verdict: &ItemVerdict) -> serde_json::Value {
    serde_json::to_value(&verdict.scenes).unwrap_or_default()
}

#[derive(Clone, Debug)]
pub struct Ingestor {
    db: Db,
    jobs: JobStore,
}

impl Ingestor {
    pub fn new(db: Db) -> Self {
        Self {
            jobs: JobStore::new(db.clone()),
            db,
        }
    }

    /// Store every flagged sample of a callback as an unreviewed item.
    ///
    /// Returns the ids of the stored items. Clean samples and samples the
    /// provider failed to classify are skipped.
    #[instrument(skip_all, fields(job_id = %hook.job))]
    pub async fn ingest(&self, hook: &CensorHook) -> Result<Vec<i64>, CensorError> {
        let job = self.jobs.by_job(&hook.job).await?;

        let images = hook
            .image
            .iter()
            .filter(|img| is_flagged(img.code, &img.result))
            .map(|img| NewReviewItem {
                stream_id: job.stream_id.clone(),
                job_id: job.job_id.clone(),
                kind: MediaKind::Image,
                url: img.url.clone(),
                suggestion: img.result.suggestion.clone(),
                scenes: scenes_json(&img.result),
                audio_text: None,
                captured_at: img.timestamp,
                captured_until: None,
            });
        let audio = hook
            .audio
            .iter()
            .filter(|seg| is_flagged(seg.code, &seg.result))
            .map(|seg| NewReviewItem {
                stream_id: job.stream_id.clone(),
                job_id: job.job_id.clone(),
                kind: MediaKind::Audio,
                url: seg.url.clone(),
                suggestion: seg.result.suggestion.clone(),
                scenes: scenes_json(&seg.result),
                audio_text: (!seg.audio_text.is_empty()).then(|| seg.audio_text.clone()),
                captured_at: seg.start,
                captured_until: Some(seg.end),
            });
        let items: Vec<NewReviewItem> = images.chain(audio).collect();

        let skipped = hook.image.len() + hook.audio.len() - items.len();
        if skipped > 0 {
            debug!("{skipped} samples were clean or unclassified");
        }
        if items.is_empty() {
            return Ok(Vec::new());
        }
        if job.closed_at.is_some() {
            warn!("ingesting items for a closed job");
        }

        let now = Utc::now();
        let mut tx = self.db.primary().begin().await?;
        let mut ids = Vec::with_capacity(items.len());
        for item in &items {
            ids.push(insert_item(&mut tx, item, now).await?);
        }
        refresh_unreviewed(&mut tx, &job.stream_id).await?;
        _ = sqlx::query("UPDATE streams SET last_censor_time = ? WHERE stream_id = ?")
            .bind(now.timestamp())
            .bind(&job.stream_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        counter!(ITEMS_INGESTED).increment(ids.len() as u64);
        info!(stream_id = %job.stream_id, "ingested {} flagged items", ids.len());
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        censor::{jobs::JobManager, review::ReviewStore, streams::StreamStore},
        models::{ReviewState, StreamDescriptor},
        tests::FakeProvider,
    };

    const HOOK: &str = r#"{
        "job": "JOB",
        "image": [
            {"job": "JOB", "timestamp": 1700000000, "url": "live-censor/s1/a.jpg",
             "result": {"suggestion": "block", "scenes": {"pulp": {"suggestion": "block",
                "details": [{"suggestion": "block", "label": "sexy", "score": 0.98}]}}}},
            {"job": "JOB", "timestamp": 1700000020, "url": "live-censor/s1/b.jpg",
             "result": {"suggestion": "pass", "scenes": {}}},
            {"code": 500, "message": "fetch failed", "job": "JOB", "url": "live-censor/s1/c.jpg"},
            {"job": "JOB", "timestamp": 1700000060, "url": "live-censor/s1/d.jpg"}
        ],
        "audio": [
            {"job": "JOB", "start": 30, "end": 45, "url": "live-censor/s1/a.aac",
             "audio_text": "call this number",
             "result": {"suggestion": "review", "scenes": {"antispam": {"suggestion": "review",
                "details": [{"suggestion": "review", "label": "ad", "text": "call this number", "score": 0.7}]}}}}
        ]
    }"#;

    async fn started(db: &Db) -> String {
        let stream = StreamStore::new(db.clone())
            .upsert("s1", &StreamDescriptor::default())
            .await
            .unwrap();
        JobManager::new(db.clone(), Arc::new(FakeProvider::default()))
            .start_job(&stream)
            .await
            .unwrap()
            .unwrap()
            .job_id
    }

    #[tokio::test]
    async fn stores_flagged_samples_only() {
        let db = Db::in_memory().await;
        let job_id = started(&db).await;
        let hook: CensorHook = serde_json::from_str(&HOOK.replace("JOB", &job_id)).unwrap();

        let ids = Ingestor::new(db.clone()).ingest(&hook).await.unwrap();
        assert_eq!(ids.len(), 2);

        let store = ReviewStore::new(db.clone());
        let image = store.get_by_id(ids[0]).await.unwrap();
        assert_eq!(image.kind, MediaKind::Image);
        assert_eq!(image.stream_id, "s1");
        assert_eq!(image.suggestion, "block");
        assert_eq!(image.captured_at, 1_700_000_000);
        assert_eq!(image.review_state, ReviewState::Unreviewed);
        assert_eq!(image.scenes["pulp"]["details"][0]["label"], "sexy");

        let audio = store.get_by_id(ids[1]).await.unwrap();
        assert_eq!(audio.kind, MediaKind::Audio);
        assert_eq!(audio.audio_text.as_deref(), Some("call this number"));
        assert_eq!(audio.captured_until, Some(45));

        let stream = StreamStore::new(db).get("s1").await.unwrap();
        assert_eq!(stream.unreview_censor_count, 2);
        assert!(stream.last_censor_time > 0);
    }

    #[tokio::test]
    async fn samples_without_a_verdict_are_skipped() {
        let db = Db::in_memory().await;
        let job_id = started(&db).await;
        let hook: CensorHook = serde_json::from_value(serde_json::json!({
            "job": job_id,
            "image": [{"job": job_id, "timestamp": 1, "url": "live-censor/x.jpg"}],
            "audio": [{"job": job_id, "start": 1, "end": 2, "url": "live-censor/x.aac",
                       "result": {"suggestion": "", "scenes": {}}}]
        }))
        .unwrap();

        let ids = Ingestor::new(db.clone()).ingest(&hook).await.unwrap();
        assert!(ids.is_empty());

        let stream = StreamStore::new(db).get("s1").await.unwrap();
        assert_eq!(stream.unreview_censor_count, 0);
        assert_eq!(stream.last_censor_time, 0);
    }

    #[tokio::test]
    async fn unknown_job_is_not_found() {
        let db = Db::in_memory().await;
        let hook = CensorHook {
            job: "who-knows".to_owned(),
            ..CensorHook::default()
        };
        assert!(matches!(
            Ingestor::new(db).ingest(&hook).await,
            Err(CensorError::NotFound(_))
        ));
    }
}

//! Live stream records, as reported by the stream-lifecycle manager.

use chrono::Utc;
use tracing::{info, instrument};

use crate::{
    db::Db,
    error::CensorError,
    models::{LiveStream, StreamDescriptor, StreamStatus},
};

#[derive(Clone, Debug)]
pub struct StreamStore {
    db: Db,
}

impl StreamStore {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    /// Register a stream that just went live.
    ///
    /// A stream that is restarted keeps its moderation counters but gets a
    /// fresh start time and loses its previous stop reason.
    #[instrument(skip(self, descriptor))]
    pub async fn upsert(
        &self,
        stream_id: &str,
        descriptor: &StreamDescriptor,
    ) -> Result<LiveStream, CensorError> {
        let stream = sqlx::query_as::<_, LiveStream>(
            r#"
            INSERT INTO streams (stream_id, title, anchor_id, status, stop_reason, push_url,
                    rtmp_play_url, flv_play_url, hls_play_url, start_at, stop_at)
                VALUES (?, ?, ?, ?, '', ?, ?, ?, ?, ?, NULL)
                ON CONFLICT (stream_id) DO UPDATE SET
                    title = excluded.title,
                    anchor_id = excluded.anchor_id,
                    status = excluded.status,
                    stop_reason = '',
                    push_url = excluded.push_url,
                    rtmp_play_url = excluded.rtmp_play_url,
                    flv_play_url = excluded.flv_play_url,
                    hls_play_url = excluded.hls_play_url,
                    start_at = excluded.start_at,
                    stop_at = NULL
                RETURNING *
            "#,
        )
        .bind(stream_id)
        .bind(&descriptor.title)
        .bind(&descriptor.anchor_id)
        .bind(StreamStatus::Live)
        .bind(&descriptor.push_url)
        .bind(&descriptor.rtmp_play_url)
        .bind(&descriptor.flv_play_url)
        .bind(&descriptor.hls_play_url)
        .bind(Utc::now())
        .fetch_one(self.db.primary())
        .await?;

        info!("stream registered");
        Ok(stream)
    }

    pub async fn get(&self, stream_id: &str) -> Result<LiveStream, CensorError> {
        sqlx::query_as::<_, LiveStream>("SELECT * FROM streams WHERE stream_id = ?")
            .bind(stream_id)
            .fetch_optional(self.db.primary())
            .await?
            .ok_or_else(|| CensorError::not_found(format!("stream {stream_id}")))
    }

    /// Record that a stream ended, and why.
    #[instrument(skip(self))]
    pub async fn mark_stopped(
        &self,
        stream_id: &str,
        reason: &str,
    ) -> Result<LiveStream, CensorError> {
        sqlx::query_as::<_, LiveStream>(
            r#"
            UPDATE streams
                SET status = ?, stop_reason = ?, stop_at = ?
                WHERE stream_id = ?
                RETURNING *
            "#,
        )
        .bind(StreamStatus::Stopped)
        .bind(reason)
        .bind(Utc::now())
        .bind(stream_id)
        .fetch_optional(self.db.primary())
        .await?
        .ok_or_else(|| CensorError::not_found(format!("stream {stream_id}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::STOP_REASON_CENSOR;

    fn descriptor(title: &str) -> StreamDescriptor {
        StreamDescriptor {
            title: title.to_owned(),
            anchor_id: "anchor-1".to_owned(),
            rtmp_play_url: "rtmp://play/live/s1".to_owned(),
            ..StreamDescriptor::default()
        }
    }

    #[tokio::test]
    async fn upsert_then_stop() {
        let store = StreamStore::new(Db::in_memory().await);

        let live = store.upsert("s1", &descriptor("first")).await.unwrap();
        assert_eq!(live.status, StreamStatus::Live);
        assert!(live.start_at.is_some());
        assert_eq!(live.unreview_censor_count, 0);

        let stopped = store.mark_stopped("s1", STOP_REASON_CENSOR).await.unwrap();
        assert_eq!(stopped.status, StreamStatus::Stopped);
        assert_eq!(stopped.stop_reason, STOP_REASON_CENSOR);
        assert!(stopped.stop_at.is_some());

        let restarted = store.upsert("s1", &descriptor("second")).await.unwrap();
        assert_eq!(restarted.title, "second");
        assert_eq!(restarted.stop_reason, "");
        assert!(restarted.stop_at.is_none());
    }

    #[tokio::test]
    async fn unknown_stream_is_not_found() {
        let store = StreamStore::new(Db::in_memory().await);
        assert!(matches!(
            store.get("missing").await,
            Err(CensorError::NotFound(_))
        ));
        assert!(matches!(
            store.mark_stopped("missing", "ended").await,
            Err(CensorError::NotFound(_))
        ));
    }
}

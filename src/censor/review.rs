//! Flagged media items and their review state.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use metrics::counter;
use sqlx::{QueryBuilder, Sqlite, SqliteConnection, types::Json};
use tracing::{info, instrument};

use crate::{
    db::{Db, util::retry_sqlite},
    error::CensorError,
    metrics::ITEMS_REVIEWED,
    models::{MediaKind, ReviewItem, ReviewState, ReviewUpdate},
};

/// A flagged item as it arrives from the provider, before it has an id.
#[derive(Debug, Clone, PartialEq)]
pub struct NewReviewItem {
    pub stream_id: String,
    pub job_id: String,
    pub kind: MediaKind,
    pub url: String,
    pub suggestion: String,
    pub scenes: serde_json::Value,
    pub audio_text: Option<String>,
    pub captured_at: i64,
    pub captured_until: Option<i64>,
}

/// Insert a freshly flagged item as unreviewed, returning its id.
pub(crate) async fn insert_item(
    conn: &mut SqliteConnection,
    item: &NewReviewItem,
    now: DateTime<Utc>,
) -> sqlx::Result<i64> {
    sqlx::query_scalar(
        r#"
        INSERT INTO review_items (stream_id, job_id, kind, url, suggestion, scenes, audio_text,
                captured_at, captured_until, review_state, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING id
        "#,
    )
    .bind(&item.stream_id)
    .bind(&item.job_id)
    .bind(item.kind)
    .bind(&item.url)
    .bind(&item.suggestion)
    .bind(Json(&item.scenes))
    .bind(&item.audio_text)
    .bind(item.captured_at)
    .bind(item.captured_until)
    .bind(ReviewState::Unreviewed)
    .bind(now)
    .fetch_one(&mut *conn)
    .await
}

/// Recompute the denormalized unreviewed count kept on the stream record.
pub(crate) async fn refresh_unreviewed(
    conn: &mut SqliteConnection,
    stream_id: &str,
) -> sqlx::Result<()> {
    _ = sqlx::query(
        r#"
        UPDATE streams
            SET unreview_censor_count = (
                SELECT COUNT(*) FROM review_items
                    WHERE review_items.stream_id = streams.stream_id AND review_state = ?
            )
            WHERE stream_id = ?
        "#,
    )
    .bind(ReviewState::Unreviewed)
    .bind(stream_id)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Append `(?, ?, ...)` binding every id.
fn push_id_list<'a>(qb: &mut QueryBuilder<'a, Sqlite>, ids: &'a BTreeSet<i64>) {
    _ = qb.push(" (");
    let mut list = qb.separated(", ");
    for id in ids {
        _ = list.push_bind(*id);
    }
    _ = list.push_unseparated(")");
}

#[derive(Clone, Debug)]
pub struct ReviewStore {
    db: Db,
}

impl ReviewStore {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    /// Insert or overwrite an item, keyed by its id.
    #[instrument(skip_all, fields(id = item.id))]
    pub async fn put(&self, item: &ReviewItem) -> Result<(), CensorError> {
        match (item.review_state, item.review_answer) {
            (ReviewState::Unreviewed, Some(_)) => {
                return Err(CensorError::precondition(
                    "an unreviewed item cannot carry a review answer",
                ));
            }
            (ReviewState::Reviewed, None) => {
                return Err(CensorError::precondition("a review requires an answer"));
            }
            _ => {}
        }

        let mut tx = self.db.primary().begin().await?;

        let previous: Option<String> =
            sqlx::query_scalar("SELECT stream_id FROM review_items WHERE id = ?")
                .bind(item.id)
                .fetch_optional(&mut *tx)
                .await?;

        _ = sqlx::query(
            r#"
            INSERT INTO review_items (id, stream_id, job_id, kind, url, suggestion, scenes,
                    audio_text, captured_at, captured_until, review_state, review_answer,
                    reviewer_id, reviewed_at, created_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT (id) DO UPDATE SET
                    stream_id = excluded.stream_id,
                    job_id = excluded.job_id,
                    kind = excluded.kind,
                    url = excluded.url,
                    suggestion = excluded.suggestion,
                    scenes = excluded.scenes,
                    audio_text = excluded.audio_text,
                    captured_at = excluded.captured_at,
                    captured_until = excluded.captured_until,
                    review_state = excluded.review_state,
                    review_answer = excluded.review_answer,
                    reviewer_id = excluded.reviewer_id,
                    reviewed_at = excluded.reviewed_at,
                    created_at = excluded.created_at
            "#,
        )
        .bind(item.id)
        .bind(&item.stream_id)
        .bind(&item.job_id)
        .bind(item.kind)
        .bind(&item.url)
        .bind(&item.suggestion)
        .bind(Json(&item.scenes))
        .bind(&item.audio_text)
        .bind(item.captured_at)
        .bind(item.captured_until)
        .bind(item.review_state)
        .bind(item.review_answer)
        .bind(&item.reviewer_id)
        .bind(item.reviewed_at)
        .bind(item.created_at)
        .execute(&mut *tx)
        .await?;

        refresh_unreviewed(&mut tx, &item.stream_id).await?;
        if let Some(previous) = previous.filter(|p| *p != item.stream_id) {
            refresh_unreviewed(&mut tx, &previous).await?;
        }

        tx.commit().await?;
        Ok(())
    }

    pub async fn get_by_id(&self, id: i64) -> Result<ReviewItem, CensorError> {
        sqlx::query_as::<_, ReviewItem>("SELECT * FROM review_items WHERE id = ?")
            .bind(id)
            .fetch_optional(self.db.primary())
            .await?
            .ok_or_else(|| CensorError::not_found(format!("review item {id}")))
    }

    /// Number of items of a stream still waiting for a reviewer.
    pub async fn count_unreviewed(&self, stream_id: &str) -> Result<i64, CensorError> {
        Ok(sqlx::query_scalar(
            "SELECT COUNT(*) FROM review_items WHERE stream_id = ? AND review_state = ?",
        )
        .bind(stream_id)
        .bind(ReviewState::Unreviewed)
        .fetch_one(self.db.replica())
        .await?)
    }

    /// Apply a review transition to every listed item in one transaction.
    ///
    /// Readers see either none or all of the batch. Returns the number of
    /// items that matched.
    #[instrument(skip_all, fields(count = ids.len(), state = ?update.state))]
    pub async fn batch_set_reviewed(
        &self,
        ids: &BTreeSet<i64>,
        update: &ReviewUpdate,
    ) -> Result<u64, CensorError> {
        let update = match update.state {
            ReviewState::Reviewed if update.answer.is_none() => {
                return Err(CensorError::precondition("a review requires an answer"));
            }
            ReviewState::Reviewed => update.clone(),
            // Sending items back to the queue clears the verdict.
            ReviewState::Unreviewed => ReviewUpdate {
                state: ReviewState::Unreviewed,
                answer: None,
                reviewer_id: None,
            },
        };
        if ids.is_empty() {
            return Ok(0);
        }

        let reviewed_at = (update.state == ReviewState::Reviewed).then(Utc::now);
        let updated = retry_sqlite(|| self.apply_batch(ids, &update, reviewed_at)).await?;

        counter!(ITEMS_REVIEWED).increment(updated);
        info!("{updated} review items updated");
        Ok(updated)
    }

    async fn apply_batch(
        &self,
        ids: &BTreeSet<i64>,
        update: &ReviewUpdate,
        reviewed_at: Option<DateTime<Utc>>,
    ) -> sqlx::Result<u64> {
        let mut tx = self.db.primary().begin().await?;

        let mut qb = QueryBuilder::<Sqlite>::new("UPDATE review_items SET review_state = ");
        _ = qb
            .push_bind(update.state)
            .push(", review_answer = ")
            .push_bind(update.answer)
            .push(", reviewer_id = ")
            .push_bind(update.reviewer_id.clone())
            .push(", reviewed_at = ")
            .push_bind(reviewed_at)
            .push(" WHERE id IN");
        push_id_list(&mut qb, ids);
        let updated = qb.build().execute(&mut *tx).await?.rows_affected();

        let mut qb =
            QueryBuilder::<Sqlite>::new("SELECT DISTINCT stream_id FROM review_items WHERE id IN");
        push_id_list(&mut qb, ids);
        let streams: Vec<String> = qb.build_query_scalar().fetch_all(&mut *tx).await?;

        for stream_id in &streams {
            refresh_unreviewed(&mut tx, stream_id).await?;
        }

        tx.commit().await?;
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        censor::streams::StreamStore,
        models::{ReviewAnswer, StreamDescriptor},
    };

    async fn seed(db: &Db, stream_id: &str, n: usize) -> Vec<i64> {
        let mut conn = db.primary().acquire().await.unwrap();
        let mut ids = Vec::new();
        for i in 0..n {
            let item = NewReviewItem {
                stream_id: stream_id.to_owned(),
                job_id: format!("job-{stream_id}"),
                kind: MediaKind::Image,
                url: format!("live-censor/{stream_id}/{i}.jpg"),
                suggestion: "review".to_owned(),
                scenes: serde_json::json!({"pulp": {"suggestion": "review", "details": []}}),
                audio_text: None,
                captured_at: 1_700_000_000 + i as i64,
                captured_until: None,
            };
            ids.push(insert_item(&mut conn, &item, Utc::now()).await.unwrap());
        }
        refresh_unreviewed(&mut conn, stream_id).await.unwrap();
        ids
    }

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let db = Db::in_memory().await;
        let store = ReviewStore::new(db.clone());

        let item = ReviewItem {
            id: 42,
            stream_id: "s1".to_owned(),
            job_id: "j1".to_owned(),
            kind: MediaKind::Audio,
            url: "live-censor/s1/a.aac".to_owned(),
            suggestion: "block".to_owned(),
            scenes: serde_json::json!({"antispam": {"suggestion": "block", "details": [
                {"suggestion": "block", "label": "ad", "text": "buy now", "score": 0.97}
            ]}}),
            audio_text: Some("buy now".to_owned()),
            captured_at: 10,
            captured_until: Some(20),
            review_state: ReviewState::Reviewed,
            review_answer: Some(ReviewAnswer::Block),
            reviewer_id: Some("mod-1".to_owned()),
            reviewed_at: Some(Utc::now()),
            created_at: Utc::now(),
        };
        store.put(&item).await.unwrap();
        assert_eq!(store.get_by_id(42).await.unwrap(), item);

        let reopened = ReviewItem {
            review_state: ReviewState::Unreviewed,
            review_answer: None,
            reviewer_id: None,
            reviewed_at: None,
            ..item
        };
        store.put(&reopened).await.unwrap();
        assert_eq!(store.get_by_id(42).await.unwrap(), reopened);
    }

    #[tokio::test]
    async fn put_rejects_answer_on_unreviewed_item() {
        let db = Db::in_memory().await;
        let store = ReviewStore::new(db.clone());
        let id = seed(&db, "s1", 1).await[0];

        let mut item = store.get_by_id(id).await.unwrap();
        item.review_answer = Some(ReviewAnswer::Pass);
        assert!(matches!(
            store.put(&item).await,
            Err(CensorError::Precondition(_))
        ));
    }

    #[tokio::test]
    async fn put_rejects_reviewed_item_without_answer() {
        let db = Db::in_memory().await;
        let store = ReviewStore::new(db.clone());
        let id = seed(&db, "s1", 1).await[0];

        let mut item = store.get_by_id(id).await.unwrap();
        item.review_state = ReviewState::Reviewed;
        assert!(matches!(
            store.put(&item).await,
            Err(CensorError::Precondition(_))
        ));
        assert_eq!(
            store.get_by_id(id).await.unwrap().review_state,
            ReviewState::Unreviewed
        );
    }

    #[tokio::test]
    async fn missing_item_is_not_found() {
        let store = ReviewStore::new(Db::in_memory().await);
        assert!(matches!(
            store.get_by_id(7).await,
            Err(CensorError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn batch_review_touches_only_listed_items() {
        let db = Db::in_memory().await;
        let streams = StreamStore::new(db.clone());
        let _ = streams
            .upsert("s1", &StreamDescriptor::default())
            .await
            .unwrap();
        let store = ReviewStore::new(db.clone());
        let ids = seed(&db, "s1", 3).await;
        assert_eq!(streams.get("s1").await.unwrap().unreview_censor_count, 3);

        let batch = BTreeSet::from([ids[0], ids[1]]);
        let updated = store
            .batch_set_reviewed(
                &batch,
                &ReviewUpdate::reviewed(ReviewAnswer::Block, Some("mod-1".to_owned())),
            )
            .await
            .unwrap();
        assert_eq!(updated, 2);

        for id in &ids[..2] {
            let item = store.get_by_id(*id).await.unwrap();
            assert_eq!(item.review_state, ReviewState::Reviewed);
            assert_eq!(item.review_answer, Some(ReviewAnswer::Block));
            assert_eq!(item.reviewer_id.as_deref(), Some("mod-1"));
            assert!(item.reviewed_at.is_some());
        }
        let untouched = store.get_by_id(ids[2]).await.unwrap();
        assert_eq!(untouched.review_state, ReviewState::Unreviewed);
        assert_eq!(untouched.review_answer, None);

        assert_eq!(store.count_unreviewed("s1").await.unwrap(), 1);
        assert_eq!(streams.get("s1").await.unwrap().unreview_censor_count, 1);
    }

    #[tokio::test]
    async fn batch_review_requires_answer() {
        let db = Db::in_memory().await;
        let store = ReviewStore::new(db.clone());
        let ids = seed(&db, "s1", 1).await;

        let update = ReviewUpdate {
            state: ReviewState::Reviewed,
            answer: None,
            reviewer_id: None,
        };
        let err = store
            .batch_set_reviewed(&ids.into_iter().collect(), &update)
            .await
            .unwrap_err();
        assert!(matches!(err, CensorError::Precondition(_)));
        assert_eq!(store.count_unreviewed("s1").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn reopening_clears_the_verdict() {
        let db = Db::in_memory().await;
        let store = ReviewStore::new(db.clone());
        let ids: BTreeSet<i64> = seed(&db, "s1", 2).await.into_iter().collect();

        store
            .batch_set_reviewed(&ids, &ReviewUpdate::reviewed(ReviewAnswer::Pass, None))
            .await
            .unwrap();
        store
            .batch_set_reviewed(
                &ids,
                &ReviewUpdate {
                    state: ReviewState::Unreviewed,
                    answer: Some(ReviewAnswer::Block),
                    reviewer_id: Some("ignored".to_owned()),
                },
            )
            .await
            .unwrap();

        for id in &ids {
            let item = store.get_by_id(*id).await.unwrap();
            assert_eq!(item.review_state, ReviewState::Unreviewed);
            assert_eq!(item.review_answer, None);
            assert_eq!(item.reviewed_at, None);
        }
    }

    #[tokio::test]
    async fn empty_batch_is_a_no_op() {
        let store = ReviewStore::new(Db::in_memory().await);
        let updated = store
            .batch_set_reviewed(
                &BTreeSet::new(),
                &ReviewUpdate::reviewed(ReviewAnswer::Block, None),
            )
            .await
            .unwrap();
        assert_eq!(updated, 0);
    }
}

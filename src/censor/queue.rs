//! Review queue views: paginated item search and per-stream summaries.

use futures::future::try_join_all;
use sqlx::{QueryBuilder, Sqlite};
use tracing::{error, instrument};

use crate::{
    db::{
        Db,
        pagination::{Page, Pagination},
    },
    error::CensorError,
    models::{
        LiveStream, ReviewAnswer, ReviewFilter, ReviewItem, ReviewState, STOP_REASON_CENSOR,
        StreamCensorSummary,
    },
};

/// Read-only queries over review items and streams. Served from the replica.
#[derive(Clone, Debug)]
pub struct ReviewQueue {
    db: Db,
}

fn push_item_filter<'a>(
    qb: &mut QueryBuilder<'a, Sqlite>,
    filter: ReviewFilter,
    stream_id: Option<&'a str>,
) {
    _ = qb.push(" WHERE 1 = 1");
    match filter {
        ReviewFilter::Any => {}
        ReviewFilter::Unreviewed => {
            _ = qb
                .push(" AND review_state = ")
                .push_bind(ReviewState::Unreviewed);
        }
        ReviewFilter::Reviewed => {
            _ = qb
                .push(" AND review_state = ")
                .push_bind(ReviewState::Reviewed);
        }
    }
    if let Some(stream_id) = stream_id {
        _ = qb.push(" AND stream_id = ").push_bind(stream_id);
    }
}

fn push_stream_filter(qb: &mut QueryBuilder<'_, Sqlite>, filter: ReviewFilter) {
    match filter {
        ReviewFilter::Any => {
            _ = qb.push(" WHERE unreview_censor_count >= 0");
        }
        // Streams already cut off for a violation need no further attention.
        ReviewFilter::Unreviewed => {
            _ = qb
                .push(" WHERE unreview_censor_count > 0 AND stop_reason != ")
                .push_bind(STOP_REASON_CENSOR);
        }
        ReviewFilter::Reviewed => {
            _ = qb
                .push(
                    " WHERE unreview_censor_count = 0 AND EXISTS (SELECT 1 FROM review_items \
                     WHERE review_items.stream_id = streams.stream_id AND review_state = ",
                )
                .push_bind(ReviewState::Reviewed)
                .push(")");
        }
    }
}

impl ReviewQueue {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    /// Page through review items.
    ///
    /// Unreviewed (and unfiltered) results are newest first. Reviewed results
    /// put confirmed violations first, newest first within each verdict.
    #[instrument(skip(self))]
    pub async fn search(
        &self,
        filter: ReviewFilter,
        stream_id: Option<&str>,
        page: Pagination,
    ) -> Result<Page<ReviewItem>, CensorError> {
        let page = page.validate()?;

        let mut count = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM review_items");
        push_item_filter(&mut count, filter, stream_id);

        let mut select = QueryBuilder::<Sqlite>::new("SELECT * FROM review_items");
        push_item_filter(&mut select, filter, stream_id);
        _ = select.push(match filter {
            ReviewFilter::Reviewed => " ORDER BY review_answer DESC, created_at DESC, id DESC",
            ReviewFilter::Unreviewed | ReviewFilter::Any => " ORDER BY created_at DESC, id DESC",
        });
        _ = select
            .push(" LIMIT ")
            .push_bind(page.limit())
            .push(" OFFSET ")
            .push_bind(page.offset());

        let total_count: i64 = count
            .build_query_scalar()
            .fetch_one(self.db.replica())
            .await
            .inspect_err(|e| error!("failed to count review items: {e}"))?;
        let items = select
            .build_query_as::<ReviewItem>()
            .fetch_all(self.db.replica())
            .await
            .inspect_err(|e| error!("failed to search review items: {e}"))?;

        Ok(Page { items, total_count })
    }

    /// Page through streams with their review statistics.
    #[instrument(skip(self))]
    pub async fn search_lives(
        &self,
        filter: ReviewFilter,
        page: Pagination,
    ) -> Result<Page<StreamCensorSummary>, CensorError> {
        let page = page.validate()?;

        let mut count = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM streams");
        push_stream_filter(&mut count, filter);

        let mut select = QueryBuilder::<Sqlite>::new("SELECT * FROM streams");
        push_stream_filter(&mut select, filter);
        _ = select
            .push(" ORDER BY last_censor_time DESC, stream_id ASC LIMIT ")
            .push_bind(page.limit())
            .push(" OFFSET ")
            .push_bind(page.offset());

        let total_count: i64 = count
            .build_query_scalar()
            .fetch_one(self.db.replica())
            .await
            .inspect_err(|e| error!("failed to count streams: {e}"))?;
        let streams = select
            .build_query_as::<LiveStream>()
            .fetch_all(self.db.replica())
            .await
            .inspect_err(|e| error!("failed to search streams: {e}"))?;

        let items = try_join_all(streams.into_iter().map(|stream| self.summarize(stream))).await?;

        Ok(Page { items, total_count })
    }

    async fn summarize(&self, stream: LiveStream) -> Result<StreamCensorSummary, CensorError> {
        let violations: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM review_items WHERE stream_id = ? AND review_answer = ?",
        )
        .bind(&stream.stream_id)
        .bind(ReviewAnswer::Block)
        .fetch_one(self.db.replica())
        .await?;

        let flagged: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM review_items WHERE stream_id = ?")
                .bind(&stream.stream_id)
                .fetch_one(self.db.replica())
                .await?;

        Ok(StreamCensorSummary::new(stream, violations, flagged))
    }
}

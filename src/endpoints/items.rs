//! The manual review queue.

use std::collections::BTreeSet;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    routing::{get, post},
};
use constcat::concat;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{
    AppState, Result,
    censor::{ReviewQueue, ReviewStore},
    config::AppConfig,
    db::{
        Db,
        pagination::{DEFAULT_PAGE_SIZE, Page, Pagination},
    },
    models::{ReviewAnswer, ReviewFilter, ReviewItem, ReviewUpdate, StreamCensorSummary},
};

const ITEMS: &str = "/items";

#[derive(Debug, Default, Deserialize)]
struct ItemsQuery {
    #[serde(default)]
    review_state: ReviewFilter,
    stream_id: Option<String>,
    page: Option<u32>,
    page_size: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct LivesQuery {
    #[serde(default)]
    review_state: ReviewFilter,
    page: Option<u32>,
    page_size: Option<u32>,
}

fn pagination(page: Option<u32>, page_size: Option<u32>) -> Pagination {
    Pagination::new(page.unwrap_or(1), page_size.unwrap_or(DEFAULT_PAGE_SIZE))
}

#[derive(Debug, Deserialize)]
struct ReviewInput {
    ids: BTreeSet<i64>,
    answer: ReviewAnswer,
    reviewer: Option<String>,
}

#[derive(Debug, Serialize)]
struct ReviewOutput {
    updated: u64,
}

/// Swap the stored bucket locator for a URL reviewers can open.
fn publish(config: &AppConfig, mut item: ReviewItem) -> ReviewItem {
    match config.provider.public_url(&item.url) {
        Ok(url) => item.url = url,
        Err(e) => warn!(id = item.id, "serving raw locator: {e}"),
    }
    item
}

async fn search_items(
    State(db): State<Db>,
    State(config): State<AppConfig>,
    Query(input): Query<ItemsQuery>,
) -> Result<Json<Page<ReviewItem>>> {
    let page = ReviewQueue::new(db)
        .search(
            input.review_state,
            input.stream_id.as_deref(),
            pagination(input.page, input.page_size),
        )
        .await?;

    Ok(Json(Page {
        items: page
            .items
            .into_iter()
            .map(|item| publish(&config, item))
            .collect(),
        total_count: page.total_count,
    }))
}

async fn get_item(
    State(db): State<Db>,
    State(config): State<AppConfig>,
    Path(id): Path<i64>,
) -> Result<Json<ReviewItem>> {
    let item = ReviewStore::new(db).get_by_id(id).await?;
    Ok(Json(publish(&config, item)))
}

async fn review_items(
    State(db): State<Db>,
    Json(input): Json<ReviewInput>,
) -> Result<Json<ReviewOutput>> {
    let update = ReviewUpdate::reviewed(input.answer, input.reviewer);
    let updated = ReviewStore::new(db)
        .batch_set_reviewed(&input.ids, &update)
        .await?;

    Ok(Json(ReviewOutput { updated }))
}

async fn search_lives(
    State(db): State<Db>,
    Query(input): Query<LivesQuery>,
) -> Result<Json<Page<StreamCensorSummary>>> {
    let page = ReviewQueue::new(db)
        .search_lives(input.review_state, pagination(input.page, input.page_size))
        .await?;
    Ok(Json(page))
}

#[rustfmt::skip]
pub(super) fn routes() -> Router<AppState> {
    // GET  /censor/items
    // GET  /censor/items/{id}
    // POST /censor/items/review
    // GET  /censor/lives
    Router::new()
        .route(ITEMS,                     get(search_items))
        .route(concat!(ITEMS, "/{id}"),   get(get_item))
        .route(concat!(ITEMS, "/review"), post(review_items))
        .route("/lives",                  get(search_lives))
}

use axum::Router;

use crate::AppState;

mod config;
mod items;
mod jobs;
mod streams;

/// Prefix every moderation route is nested under.
pub(crate) const CENSOR_PREFIX: &str = "/censor";

pub fn routes() -> Router<AppState> {
    Router::new()
        .merge(config::routes())
        .merge(streams::routes())
        .merge(jobs::routes())
        .merge(items::routes())
}

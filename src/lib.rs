//! Live stream content moderation service.
pub mod censor;
pub mod config;
pub mod db;
mod endpoints;
pub mod error;
mod metrics;
pub mod models;
pub mod provider;
mod serve;

pub use error::Error;
pub use serve::{AppState, Client, Result, app, build_client, run};

/// The index (/) route.
async fn index() -> impl axum::response::IntoResponse {
    r"
  _ _
 | (_)_   _____  ___ ___ _ __  ___  ___  _ __
 | | \ \ / / _ \/ __/ _ \ '_ \/ __|/ _ \| '__|
 | | |\ V /  __/ (_|  __/ | | \__ \ (_) | |
 |_|_| \_/ \___|\___\___|_| |_|___/\___/|_|


This is the live stream content moderation service.

Moderation routes are under /censor/
    "
}

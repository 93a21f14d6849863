use axum::{Json, Router, extract::State, routing::get};

use crate::{AppState, Result, censor::ConfigStore, db::Db, models::ModerationConfig};

async fn get_config(State(db): State<Db>) -> Result<Json<ModerationConfig>> {
    Ok(Json(ConfigStore::new(db).get().await?))
}

async fn put_config(
    State(db): State<Db>,
    Json(input): Json<ModerationConfig>,
) -> Result<Json<ModerationConfig>> {
    let store = ConfigStore::new(db);
    store.update(&input).await?;
    Ok(Json(store.get().await?))
}

#[rustfmt::skip]
pub(super) fn routes() -> Router<AppState> {
    // GET /censor/config
    // PUT /censor/config
    Router::new()
        .route("/config", get(get_config).put(put_config))
}

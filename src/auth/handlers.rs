use axum::{routing::get, Json, Router};
use serde::Serialize;
use tracing::instrument;

use crate::{auth::extractors::AuthUser, state::AppState};

#[derive(Debug, Serialize)]
pub struct MeResponse {
    pub email: String,
}

pub fn me_routes() -> Router<AppState> {
    Router::new().route("/me", get(get_me))
}

#[instrument(skip_all)]
pub async fn get_me(AuthUser(email): AuthUser) -> Json<MeResponse> {
    Json(MeResponse { email })
}

use axum::{
    Json,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use tracing::error;

use crate::AppState;
use crate::auth;

/// Row counts for the relay's tables. Backend only.
pub async fn get_database_stats(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, StatusCode> {
    let identity = auth::authorize(&headers, &state.auth_config, &state.repository).await;
    if !identity.is_backend() {
        return Err(StatusCode::FORBIDDEN);
    }

    match state.db.get_stats().await {
        Ok(stats) => Ok(Json(stats)),
        Err(e) => {
            error!("Failed to get database stats: {}", e);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

use axum::{
    extract::{Extension, State},
    http::StatusCode,
    middleware,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;

use somnia_common::CryptoHash;

use crate::middleware::authenticate;
use crate::response::{AppError, AppSuccess};
use crate::GlobalState;

pub fn counseling_routes() -> Router<GlobalState> {
    Router::new()
        .route("/counseling/history", get(history))
        .route("/counseling/message", post(message))
        .route_layer(middleware::from_fn(authenticate))
}

async fn history(
    State(state): State<GlobalState>,
    Extension(user_id): Extension<CryptoHash>,
) -> Result<AppSuccess, AppError> {
    let entries = state.engine.counseling_history(&user_id).await?;
    Ok(AppSuccess::new(StatusCode::OK, "Counseling history", json!(entries)))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CounselingMessageRequest {
    pub message: String,
}

async fn message(
    State(state): State<GlobalState>,
    Extension(user_id): Extension<CryptoHash>,
    Json(payload): Json<CounselingMessageRequest>,
) -> Result<AppSuccess, AppError> {
    let reply = state
        .engine
        .post_counseling_message(&user_id, &payload.message)
        .await?;
    Ok(AppSuccess::new(StatusCode::OK, "Counselor replied", json!(reply)))
}

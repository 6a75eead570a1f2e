use axum::{
    extract::{Extension, State},
    http::StatusCode,
    middleware,
    routing::post,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;

use somnia_common::CryptoHash;
use somnia_runtime::PsychologyAnswer;

use crate::middleware::authenticate;
use crate::response::{AppError, AppSuccess};
use crate::GlobalState;

pub fn psychology_routes() -> Router<GlobalState> {
    Router::new()
        .route("/psychology/answers", post(submit_answers))
        .route_layer(middleware::from_fn(authenticate))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AnswersRequest {
    pub answers: Vec<PsychologyAnswer>,
}

async fn submit_answers(
    State(state): State<GlobalState>,
    Extension(user_id): Extension<CryptoHash>,
    Json(payload): Json<AnswersRequest>,
) -> Result<AppSuccess, AppError> {
    let night = state
        .engine
        .process_psychology_answers(&user_id, &payload.answers)
        .await?;
    Ok(AppSuccess::new(StatusCode::OK, "New night opened", json!(night)))
}

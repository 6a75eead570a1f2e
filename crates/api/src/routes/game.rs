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

pub fn game_routes() -> Router<GlobalState> {
    Router::new()
        .route("/game/start", get(start_game))
        .route("/game/initial-counseling", post(initial_counseling))
        .route("/game/chat", post(chat))
        .route("/game/end-story", post(end_story))
        // night readiness is part of the phase-tagged status, so skipping
        // ahead to the night is just a fresh poll
        .route("/game/skip-night", post(skip_night))
        .route("/game/start-psychology", post(start_psychology))
        // historical client name for the same action
        .route("/game/skip-morning", post(start_psychology))
        .route("/game/cards", get(list_cards))
        .route_layer(middleware::from_fn(authenticate))
}

async fn start_game(
    State(state): State<GlobalState>,
    Extension(user_id): Extension<CryptoHash>,
) -> Result<AppSuccess, AppError> {
    let status = state.engine.start_game(&user_id).await?;
    Ok(AppSuccess::new(StatusCode::OK, "Game status resolved", json!(status)))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct InitialCounselingRequest {
    pub log: String,
}

async fn initial_counseling(
    State(state): State<GlobalState>,
    Extension(user_id): Extension<CryptoHash>,
    Json(payload): Json<InitialCounselingRequest>,
) -> Result<AppSuccess, AppError> {
    let night = state
        .engine
        .submit_initial_counseling(&user_id, &[payload.log])
        .await?;
    Ok(AppSuccess::new(StatusCode::OK, "First night opened", json!(night)))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChatRequest {
    pub message: String,
}

async fn chat(
    State(state): State<GlobalState>,
    Extension(user_id): Extension<CryptoHash>,
    Json(payload): Json<ChatRequest>,
) -> Result<AppSuccess, AppError> {
    let reply = state
        .engine
        .post_chat_message(&user_id, &payload.message)
        .await?;
    Ok(AppSuccess::new(StatusCode::OK, "Message delivered", json!(reply)))
}

async fn end_story(
    State(state): State<GlobalState>,
    Extension(user_id): Extension<CryptoHash>,
) -> Result<AppSuccess, AppError> {
    let outcome = state.engine.end_character_story(&user_id).await?;
    Ok(AppSuccess::new(StatusCode::OK, "Story concluded", json!(outcome)))
}

async fn skip_night(
    State(state): State<GlobalState>,
    Extension(user_id): Extension<CryptoHash>,
) -> Result<AppSuccess, AppError> {
    let status = state.engine.start_game(&user_id).await?;
    Ok(AppSuccess::new(StatusCode::OK, "Game status resolved", json!(status)))
}

async fn start_psychology(
    State(state): State<GlobalState>,
    Extension(user_id): Extension<CryptoHash>,
) -> Result<AppSuccess, AppError> {
    let game_state = state.engine.start_psychology_phase(&user_id).await?;
    Ok(AppSuccess::new(
        StatusCode::OK,
        "Psychology test opened",
        json!(game_state),
    ))
}

async fn list_cards(
    State(state): State<GlobalState>,
    Extension(user_id): Extension<CryptoHash>,
) -> Result<AppSuccess, AppError> {
    let cards = state.engine.list_cards(&user_id).await?;
    Ok(AppSuccess::new(StatusCode::OK, "Card collection", json!(cards)))
}

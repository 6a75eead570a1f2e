use anyhow::anyhow;
use axum::{
    extract::State,
    http::StatusCode,
    routing::post,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;

use somnia_common::{encrypt, get_current_timestamp, CryptoHash, EnvVars};
use somnia_database::MongoDbObject;
use somnia_runtime::User;

use crate::env::ApiServerEnv;
use crate::response::{AppError, AppSuccess};
use crate::GlobalState;

pub fn auth_routes() -> Router<GlobalState> {
    Router::new()
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
}

fn issue_session_token(user_id: &CryptoHash, env: &ApiServerEnv) -> Result<String, AppError> {
    let claims = json!({
        "user_id": user_id.to_hex_string(),
        "issued_at": get_current_timestamp(),
    });
    encrypt(&claims.to_string(), &env.get_env_var("SECRET_SALT")).map_err(|e| {
        AppError::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            anyhow!("[auth] failed to seal session token: {}", e),
        )
    })
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub username: String,
    pub password: String,
    pub email: Option<String>,
}

async fn register(
    State(state): State<GlobalState>,
    Json(payload): Json<RegisterRequest>,
) -> Result<AppSuccess, AppError> {
    let username = payload.username.trim();
    if username.len() < 3 {
        return Err(AppError::new(
            StatusCode::BAD_REQUEST,
            anyhow!("[register] username must be at least 3 characters"),
        ));
    }
    if payload.password.len() < 8 {
        return Err(AppError::new(
            StatusCode::BAD_REQUEST,
            anyhow!("[register] password must be at least 8 characters"),
        ));
    }

    let env = ApiServerEnv::load();
    let user = User::new(
        username,
        payload.email.clone(),
        &payload.password,
        &env.get_env_var("SECRET_SALT"),
    );

    if User::select_one_by_index(state.engine.db(), &user.get_id())
        .await?
        .is_some()
    {
        return Err(AppError::new(
            StatusCode::CONFLICT,
            anyhow!("[register] username already taken"),
        ));
    }

    let user_id = user.get_id();
    let username = user.username.clone();
    user.save(state.engine.db()).await?;

    let token = issue_session_token(&user_id, &env)?;
    Ok(AppSuccess::new(
        StatusCode::OK,
        "Registered successfully",
        json!({
            "id": user_id.to_hex_string(),
            "username": username,
            "token": token,
        }),
    ))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

async fn login(
    State(state): State<GlobalState>,
    Json(payload): Json<LoginRequest>,
) -> Result<AppSuccess, AppError> {
    let env = ApiServerEnv::load();
    let secret_salt = env.get_env_var("SECRET_SALT");

    let user_id = somnia_common::blake3_hash(payload.username.trim().as_bytes());
    let user = User::select_one_by_index(state.engine.db(), &user_id)
        .await?
        .filter(|user| user.verify_credential(&payload.password, &secret_salt))
        .ok_or_else(|| {
            AppError::new(
                StatusCode::UNAUTHORIZED,
                anyhow!("[login] invalid username or password"),
            )
        })?;

    let token = issue_session_token(&user.get_id(), &env)?;
    Ok(AppSuccess::new(
        StatusCode::OK,
        "Login successful",
        json!({
            "id": user.get_id().to_hex_string(),
            "username": user.username,
            "token": token,
        }),
    ))
}

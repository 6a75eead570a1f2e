use anyhow::anyhow;
use axum::body::Body;
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::{extract::Request, response::Response};

use serde::{Deserialize, Serialize};
use somnia_common::{decrypt, get_current_timestamp, CryptoHash, EnvVars};

use crate::env::ApiServerEnv;
use crate::response::AppError;
use crate::utils::extract_bearer_token;

pub const SESSION_TTL_SECS: i64 = 30 * 24 * 60 * 60;

/// The sealed content of a session token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthClaims {
    pub user_id: String,
    pub issued_at: i64,
}

/// Bearer-token gate. A missing, unsealed, expired, or malformed token is a
/// hard 401; there is no anonymous pass-through, every protected handler can
/// rely on `Extension<CryptoHash>` naming a real user id.
pub async fn authenticate(mut req: Request, next: Next) -> Result<Response<Body>, AppError> {
    let env = ApiServerEnv::load();

    let token = extract_bearer_token(&req)?;
    let decrypted = decrypt(&token, &env.get_env_var("SECRET_SALT")).map_err(|e| {
        AppError::new(StatusCode::UNAUTHORIZED, anyhow!("invalid session token: {}", e))
    })?;
    let claims: AuthClaims = serde_json::from_str(&decrypted).map_err(|e| {
        AppError::new(StatusCode::UNAUTHORIZED, anyhow!("invalid session claims: {}", e))
    })?;

    if claims.issued_at + SESSION_TTL_SECS < get_current_timestamp() {
        return Err(AppError::new(StatusCode::UNAUTHORIZED, anyhow!("session expired")));
    }

    let user_id = CryptoHash::from_hex_string(&claims.user_id).map_err(|e| {
        AppError::new(StatusCode::UNAUTHORIZED, anyhow!("invalid session subject: {}", e))
    })?;

    req.extensions_mut().insert(user_id);
    Ok(next.run(req).await)
}

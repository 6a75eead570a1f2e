use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::json;
use somnia_runtime::GameError;

pub type AppSuccess = GenericResponse;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenericResponse {
    pub status: u16,
    pub message: String,
    pub data: serde_json::Value,
}

impl GenericResponse {
    pub fn new(status: StatusCode, message: &str, data: serde_json::Value) -> Self {
        Self {
            status: status.as_u16(),
            message: message.to_string(),
            data,
        }
    }
}

impl IntoResponse for GenericResponse {
    fn into_response(self) -> Response {
        Json::from(self).into_response()
    }
}

#[derive(Debug)]
pub struct AppError(pub StatusCode, pub anyhow::Error);

impl AppError {
    pub fn new(status: StatusCode, err: anyhow::Error) -> Self {
        Self(status, err)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        tracing::error!("CODE: {}, MESSAGE: {}", self.0.as_u16(), self.1);
        GenericResponse::new(self.0, &self.1.to_string(), json!({})).into_response()
    }
}

/// Each engine error variant has one canonical status, so handlers can use
/// `?` without restating the mapping.
impl From<GameError> for AppError {
    fn from(err: GameError) -> Self {
        let status = match &err {
            GameError::Validation(_) => StatusCode::BAD_REQUEST,
            GameError::NotFound(_) => StatusCode::NOT_FOUND,
            GameError::IllegalTransition { .. } | GameError::Conflict(_) => StatusCode::CONFLICT,
            GameError::AiGateway(_) | GameError::AiResponseMalformed(_) => StatusCode::BAD_GATEWAY,
            GameError::Persistence(_) => StatusCode::SERVICE_UNAVAILABLE,
        };
        Self(status, err.into())
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        Self(StatusCode::BAD_REQUEST, err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_errors_map_to_statuses() {
        let err: AppError = GameError::NotFound("user").into();
        assert_eq!(err.0, StatusCode::NOT_FOUND);

        let err: AppError = GameError::Conflict("raced".into()).into();
        assert_eq!(err.0, StatusCode::CONFLICT);

        let err: AppError = GameError::AiGateway("down".into()).into();
        assert_eq!(err.0, StatusCode::BAD_GATEWAY);
    }
}

use somnia_database::{bson, is_duplicate_key_error, MongoDbError};

use crate::game_state::GamePhase;

/// Error taxonomy for the game progression engine. Request handlers map
/// each variant onto an HTTP status; background tasks log and swallow them.
#[derive(Debug, thiserror::Error)]
pub enum GameError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("cannot {action} during {phase}")]
    IllegalTransition {
        phase: GamePhase,
        action: &'static str,
    },

    #[error("model gateway failure: {0}")]
    AiGateway(String),

    #[error("malformed model response: {0}")]
    AiResponseMalformed(String),

    /// A unique-constraint violation. Racing turn writers retry on this;
    /// everything else treats it as "someone got there first".
    #[error("write conflict: {0}")]
    Conflict(String),

    #[error("persistence failure: {0}")]
    Persistence(String),
}

impl From<MongoDbError> for GameError {
    fn from(err: MongoDbError) -> Self {
        if is_duplicate_key_error(&err) {
            GameError::Conflict(err.to_string())
        } else {
            GameError::Persistence(err.to_string())
        }
    }
}

impl From<bson::ser::Error> for GameError {
    fn from(err: bson::ser::Error) -> Self {
        GameError::Persistence(err.to_string())
    }
}

impl From<bson::de::Error> for GameError {
    fn from(err: bson::de::Error) -> Self {
        GameError::Persistence(err.to_string())
    }
}

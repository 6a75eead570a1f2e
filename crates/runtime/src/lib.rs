mod card;
mod character;
mod ending;
mod engine;
mod env;
mod error;
mod game_state;
mod image;
mod llm;
mod logs;
mod player_analysis;
mod prompt;
mod user;

pub mod agents;

pub use card::{CharacterCard, EmotionPiece};
pub use character::{Character, CharacterStatus};
pub use ending::Ending;
pub use engine::{
    CardEntry, ChatReply, CounselingReply, GameEngine, GameStatus, NewNight, PsychologyAnswer,
    StoryOutcome, ensure_indexes,
};
pub use env::{GameConfig, LlmEnv};
pub use error::GameError;
pub use game_state::{GamePhase, GameState, WaitStatus};
pub use image::ImageClient;
pub use llm::{LlmClient, parse_structured, strip_structured_payload};
pub use logs::{ConversationLog, CounselingLog, CounselingSpeaker, Speaker};
pub use player_analysis::PlayerAnalysis;
pub use prompt::Prompt;
pub use user::User;

pub use agents::Agent;

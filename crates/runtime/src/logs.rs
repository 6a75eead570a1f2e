use serde::{Deserialize, Serialize};
use somnia_common::{get_current_timestamp, CryptoHash};
use somnia_database::{doc, Database, MongoDbObject};

use crate::error::GameError;

/// Bounded retries for turn-number races. Two writers for the same character
/// can collide on the unique (character_id, turn) index; the loser re-reads
/// and tries the next slot.
const TURN_WRITE_RETRIES: usize = 5;

#[derive(Clone, Copy, Default, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Speaker {
    #[default]
    User,
    Character,
}

/// Append-only turn record of a night conversation.
#[derive(Clone, Default, Debug, Serialize, Deserialize)]
pub struct ConversationLog {
    #[serde(rename = "_id")]
    pub id: CryptoHash,

    pub character_id: CryptoHash,
    pub user_id: CryptoHash,

    pub speaker: Speaker,
    pub message: String,

    /// Strictly increasing from 1 per character, no gaps, assigned by the
    /// writer and never mutated.
    pub turn: i64,

    pub created_at: i64,
}

impl MongoDbObject for ConversationLog {
    const COLLECTION_NAME: &'static str = "conversation_logs";
    type Error = GameError;

    fn populate_id(&mut self) {
        if self.id.is_zero() {
            self.id = CryptoHash::random();
        }
    }
    fn get_id(&self) -> CryptoHash {
        self.id.clone()
    }
}

impl ConversationLog {
    /// Next turn number given the locally known tail of the log.
    pub fn next_turn(history: &[ConversationLog]) -> i64 {
        history.iter().map(|entry| entry.turn).max().unwrap_or(0) + 1
    }

    /// Appends one turn, claiming the next turn number. Retries on unique
    /// index conflicts so concurrent submissions never duplicate a turn.
    pub async fn append(
        db: &Database,
        character_id: &CryptoHash,
        user_id: &CryptoHash,
        speaker: Speaker,
        message: &str,
    ) -> Result<Self, GameError> {
        for _ in 0..TURN_WRITE_RETRIES {
            let tail = Self::select_many(
                db,
                doc! { "character_id": character_id.to_hex_string() },
                Some(doc! { "turn": -1 }),
                Some(1),
            )
            .await?;

            let entry = Self {
                id: CryptoHash::random(),
                character_id: character_id.clone(),
                user_id: user_id.clone(),
                speaker,
                message: message.to_string(),
                turn: Self::next_turn(&tail),
                created_at: get_current_timestamp(),
            };

            match entry.clone().save(db).await {
                Ok(()) => return Ok(entry),
                Err(GameError::Conflict(_)) => continue,
                Err(e) => return Err(e),
            }
        }

        Err(GameError::Persistence(format!(
            "could not claim a turn number for character {} after {} attempts",
            character_id, TURN_WRITE_RETRIES
        )))
    }

    /// Full log for one character, oldest first.
    pub async fn history(
        db: &Database, character_id: &CryptoHash,
    ) -> Result<Vec<Self>, GameError> {
        Self::select_many(
            db,
            doc! { "character_id": character_id.to_hex_string() },
            Some(doc! { "turn": 1 }),
            None,
        )
        .await
    }

    /// The most recent `window` turns, returned oldest first.
    pub async fn recent(
        db: &Database, character_id: &CryptoHash, window: usize,
    ) -> Result<Vec<Self>, GameError> {
        let mut entries = Self::select_many(
            db,
            doc! { "character_id": character_id.to_hex_string() },
            Some(doc! { "turn": -1 }),
            Some(window as i64),
        )
        .await?;
        entries.reverse();
        Ok(entries)
    }
}

#[derive(Clone, Copy, Default, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CounselingSpeaker {
    #[default]
    User,
    Counselor,
}

/// Append-only counseling transcript, kept apart from character
/// conversations. The initial counseling submission lands here with
/// `is_initial` set.
#[derive(Clone, Default, Debug, Serialize, Deserialize)]
pub struct CounselingLog {
    #[serde(rename = "_id")]
    pub id: CryptoHash,

    pub user_id: CryptoHash,
    pub speaker: CounselingSpeaker,
    pub message: String,
    pub is_initial: bool,

    pub created_at: i64,
}

impl MongoDbObject for CounselingLog {
    const COLLECTION_NAME: &'static str = "counseling_logs";
    type Error = GameError;

    fn populate_id(&mut self) {
        if self.id.is_zero() {
            self.id = CryptoHash::random();
        }
    }
    fn get_id(&self) -> CryptoHash {
        self.id.clone()
    }
}

impl CounselingLog {
    pub fn new(
        user_id: CryptoHash, speaker: CounselingSpeaker, message: &str, is_initial: bool,
    ) -> Self {
        Self {
            id: CryptoHash::random(),
            user_id,
            speaker,
            message: message.to_string(),
            is_initial,
            created_at: get_current_timestamp(),
        }
    }

    pub async fn history(db: &Database, user_id: &CryptoHash) -> Result<Vec<Self>, GameError> {
        Self::select_many(
            db,
            doc! { "user_id": user_id.to_hex_string() },
            Some(doc! { "created_at": 1 }),
            None,
        )
        .await
    }

    /// The most recent `window` entries, oldest first.
    pub async fn recent(
        db: &Database, user_id: &CryptoHash, window: usize,
    ) -> Result<Vec<Self>, GameError> {
        let mut entries = Self::select_many(
            db,
            doc! { "user_id": user_id.to_hex_string() },
            Some(doc! { "created_at": -1 }),
            Some(window as i64),
        )
        .await?;
        entries.reverse();
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(turn: i64) -> ConversationLog {
        ConversationLog {
            turn,
            ..Default::default()
        }
    }

    #[test]
    fn next_turn_starts_at_one() {
        assert_eq!(ConversationLog::next_turn(&[]), 1);
    }

    #[test]
    fn next_turn_follows_the_tail() {
        assert_eq!(ConversationLog::next_turn(&[entry(1), entry(2), entry(3)]), 4);
        // order of the slice must not matter
        assert_eq!(ConversationLog::next_turn(&[entry(7), entry(5)]), 8);
    }
}

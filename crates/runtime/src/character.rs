use serde::{Deserialize, Serialize};
use somnia_common::{get_current_timestamp, CryptoHash};
use somnia_database::MongoDbObject;

use crate::error::GameError;

#[derive(Clone, Copy, Default, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CharacterStatus {
    /// In conversation, persona derived from the psychology pipeline.
    #[default]
    Ongoing,
    /// Arc concluded via end-story. Terminal.
    Completed,
    /// Scripted persona (the opening character, the final persona). Still
    /// conversable; concludes to `Completed` like any other.
    Locked,
}

impl CharacterStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CharacterStatus::Ongoing => "ongoing",
            CharacterStatus::Completed => "completed",
            CharacterStatus::Locked => "locked",
        }
    }
}

/// One persona the player has met or is meeting.
#[derive(Clone, Default, Debug, Serialize, Deserialize)]
pub struct Character {
    #[serde(rename = "_id")]
    pub id: CryptoHash,

    pub user_id: CryptoHash,

    pub name: String,
    pub description: String,
    pub problem: String,
    pub personality: String,
    pub initial_dialogue: String,

    pub original_image_url: String,
    pub pixelated_image_url: String,

    pub status: CharacterStatus,
    pub is_final_persona: bool,
    pub counseling_count: i64,

    pub created_at: i64,
}

impl MongoDbObject for Character {
    const COLLECTION_NAME: &'static str = "characters";
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

impl Character {
    pub fn new(user_id: CryptoHash, status: CharacterStatus) -> Self {
        Self {
            id: CryptoHash::random(),
            user_id,
            status,
            created_at: get_current_timestamp(),
            ..Default::default()
        }
    }

    pub fn is_concluded(&self) -> bool {
        self.status == CharacterStatus::Completed
    }

    /// The final persona's conversation has a turn budget; once spent, the
    /// only move left is concluding into the ending.
    pub fn final_turns_exhausted(&self, limit: i64) -> bool {
        self.is_final_persona && self.counseling_count >= limit
    }

    /// The scripted opening persona every player meets on night one.
    pub fn first_night(user_id: CryptoHash) -> Self {
        let mut character = Self::new(user_id, CharacterStatus::Locked);
        character.name = "Seron".to_string();
        character.description = "A small caterpillar wrapped in a half-spun cocoon, \
            resting on a moonlit branch at the edge of the dream forest."
            .to_string();
        character.problem = "Seron is terrified of the change already happening to it. \
            It clings to the branch it knows, afraid that becoming something new \
            means losing who it was."
            .to_string();
        character.personality = "Hesitant, earnest, quietly observant. Speaks slowly, \
            often trailing off, and asks small careful questions."
            .to_string();
        character.initial_dialogue = "Oh... you can see me? Most things in this forest \
            just pass by. I was... I was trying not to think about the cocoon again."
            .to_string();
        character
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_night_persona_is_locked_and_complete() {
        let character = Character::first_night(CryptoHash::random());
        assert_eq!(character.status, CharacterStatus::Locked);
        assert!(!character.is_final_persona);
        assert!(!character.name.is_empty());
        assert!(!character.initial_dialogue.is_empty());
        assert!(!character.is_concluded());
    }

    #[test]
    fn final_turn_budget_only_binds_the_final_persona() {
        let mut character = Character::new(CryptoHash::random(), CharacterStatus::Ongoing);
        character.counseling_count = 10;
        assert!(!character.final_turns_exhausted(10));

        character.is_final_persona = true;
        assert!(character.final_turns_exhausted(10));
        character.counseling_count = 9;
        assert!(!character.final_turns_exhausted(10));
    }

    #[test]
    fn status_round_trips_through_serde() {
        let raw = serde_json::to_string(&CharacterStatus::Locked).unwrap();
        assert_eq!(raw, "\"locked\"");
        assert_eq!(CharacterStatus::Locked.as_str(), "locked");
    }
}

use serde::{Deserialize, Serialize};
use somnia_common::{blake3_hash, get_current_timestamp, CryptoHash};
use somnia_database::{doc, Database, MongoDbObject};

use crate::error::GameError;

/// Durable summary artifact of one concluded arc. Created exactly once per
/// character; the deterministic id doubles as the uniqueness guard.
#[derive(Clone, Default, Debug, Serialize, Deserialize)]
pub struct CharacterCard {
    #[serde(rename = "_id")]
    pub id: CryptoHash,

    pub user_id: CryptoHash,
    pub character_id: CryptoHash,

    pub summary: String,
    pub outcome: String,
    pub pixelated_image_url: String,

    pub created_at: i64,
}

impl MongoDbObject for CharacterCard {
    const COLLECTION_NAME: &'static str = "character_cards";
    type Error = GameError;

    fn populate_id(&mut self) {
        self.id = blake3_hash(format!("card:{}", self.character_id.to_hex_string()).as_bytes());
    }
    fn get_id(&self) -> CryptoHash {
        self.id.clone()
    }
}

impl CharacterCard {
    pub fn new(
        user_id: CryptoHash,
        character_id: CryptoHash,
        summary: String,
        outcome: String,
        pixelated_image_url: String,
    ) -> Self {
        let mut card = Self {
            id: CryptoHash::default(),
            user_id,
            character_id,
            summary,
            outcome,
            pixelated_image_url,
            created_at: get_current_timestamp(),
        };
        card.populate_id();
        card
    }

    pub async fn find_for_character(
        db: &Database, character_id: &CryptoHash,
    ) -> Result<Option<Self>, GameError> {
        Self::select_one_by_filter(db, doc! { "character_id": character_id.to_hex_string() })
            .await
    }
}

/// A collectible keyword extracted from a concluded arc's summary.
#[derive(Clone, Default, Debug, Serialize, Deserialize)]
pub struct EmotionPiece {
    #[serde(rename = "_id")]
    pub id: CryptoHash,

    pub user_id: CryptoHash,
    pub character_card_id: CryptoHash,
    pub keyword: String,

    pub acquired_at: i64,
}

impl MongoDbObject for EmotionPiece {
    const COLLECTION_NAME: &'static str = "emotion_pieces";
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

impl EmotionPiece {
    pub fn from_keywords(
        user_id: &CryptoHash, card_id: &CryptoHash, keywords: &[String],
    ) -> Vec<Self> {
        let now = get_current_timestamp();
        keywords
            .iter()
            .map(|k| k.trim())
            .filter(|k| !k.is_empty())
            .map(|keyword| Self {
                id: CryptoHash::random(),
                user_id: user_id.clone(),
                character_card_id: card_id.clone(),
                keyword: keyword.to_string(),
                acquired_at: now,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn card_id_is_deterministic_per_character() {
        let character_id = CryptoHash::random();
        let a = CharacterCard::new(
            CryptoHash::random(), character_id.clone(),
            "s".into(), "o".into(), "img".into(),
        );
        let b = CharacterCard::new(
            CryptoHash::random(), character_id,
            "other".into(), "other".into(), "img".into(),
        );
        assert_eq!(a.id, b.id);
    }

    #[test]
    fn pieces_skip_blank_keywords() {
        let pieces = EmotionPiece::from_keywords(
            &CryptoHash::random(),
            &CryptoHash::random(),
            &["calm".into(), "".into(), "  grief ".into()],
        );
        assert_eq!(pieces.len(), 2);
        assert_eq!(pieces[1].keyword, "grief");
    }
}

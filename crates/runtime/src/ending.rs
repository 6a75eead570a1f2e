use serde::{Deserialize, Serialize};
use somnia_common::{blake3_hash, get_current_timestamp, CryptoHash};
use somnia_database::{doc, Database, MongoDbObject};

use crate::error::GameError;

/// The terminal record of a playthrough, written when the final persona's
/// arc concludes. One per user; the deterministic id doubles as the
/// write-once guard.
#[derive(Clone, Default, Debug, Serialize, Deserialize)]
pub struct Ending {
    #[serde(rename = "_id")]
    pub id: CryptoHash,

    pub user_id: CryptoHash,
    pub character_id: CryptoHash,

    /// Snapshot of the final persona text at the moment the game ended.
    pub final_persona: String,

    pub ending_type: String,
    pub title: String,
    pub content: String,
    pub image_url: String,

    pub created_at: i64,
}

impl MongoDbObject for Ending {
    const COLLECTION_NAME: &'static str = "endings";
    type Error = GameError;

    fn populate_id(&mut self) {
        self.id = blake3_hash(format!("ending:{}", self.user_id.to_hex_string()).as_bytes());
    }
    fn get_id(&self) -> CryptoHash {
        self.id.clone()
    }
}

impl Ending {
    pub fn new(
        user_id: CryptoHash,
        character_id: CryptoHash,
        final_persona: String,
        ending_type: String,
        title: String,
        content: String,
        image_url: String,
    ) -> Self {
        let mut ending = Self {
            id: CryptoHash::default(),
            user_id,
            character_id,
            final_persona,
            ending_type,
            title,
            content,
            image_url,
            created_at: get_current_timestamp(),
        };
        ending.populate_id();
        ending
    }

    pub async fn find_for_user(
        db: &Database, user_id: &CryptoHash,
    ) -> Result<Option<Self>, GameError> {
        Self::select_one_by_filter(db, doc! { "user_id": user_id.to_hex_string() }).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ending_id_is_deterministic_per_user() {
        let user_id = CryptoHash::random();
        let a = Ending::new(
            user_id.clone(), CryptoHash::random(),
            "persona".into(), "Good".into(), "Dawn".into(), "text".into(), "img".into(),
        );
        let b = Ending::new(
            user_id, CryptoHash::random(),
            "other".into(), "Hidden".into(), "Dusk".into(), "other".into(), "img".into(),
        );
        assert_eq!(a.id, b.id);
    }
}

use serde::{Deserialize, Serialize};
use somnia_common::{blake3_hash, get_current_timestamp, CryptoHash};
use somnia_database::MongoDbObject;

use crate::error::GameError;

#[derive(Clone, Default, Debug, Serialize, Deserialize)]
pub struct User {
    #[serde(rename = "_id")]
    pub id: CryptoHash,

    pub username: String,
    pub email: Option<String>,
    pub credential: CryptoHash,

    /// Set once, when initial counseling completes. Until then the player
    /// is in the implicit "initial counseling needed" state.
    pub player_analysis: Option<CryptoHash>,
    pub completed_character_count: i64,

    pub created_at: i64,
    pub last_active: i64,
}

impl MongoDbObject for User {
    const COLLECTION_NAME: &'static str = "users";
    type Error = GameError;

    fn populate_id(&mut self) {
        self.id = blake3_hash(self.username.as_bytes());
    }
    fn get_id(&self) -> CryptoHash {
        self.id.clone()
    }
}

impl User {
    pub fn new(username: &str, email: Option<String>, password: &str, secret_salt: &str) -> Self {
        let now = get_current_timestamp();
        let mut user = Self {
            id: CryptoHash::default(),
            username: username.trim().to_string(),
            email,
            credential: Self::hash_credential(username, password, secret_salt),
            player_analysis: None,
            completed_character_count: 0,
            created_at: now,
            last_active: now,
        };
        user.populate_id();
        user
    }

    pub fn verify_credential(&self, password: &str, secret_salt: &str) -> bool {
        self.credential == Self::hash_credential(&self.username, password, secret_salt)
    }

    fn hash_credential(username: &str, password: &str, secret_salt: &str) -> CryptoHash {
        blake3_hash(format!("{}:{}:{}", username.trim(), password, secret_salt).as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credential_verification() {
        let user = User::new("mori", None, "hunter2", "salt");
        assert!(user.verify_credential("hunter2", "salt"));
        assert!(!user.verify_credential("hunter3", "salt"));
        assert!(!user.verify_credential("hunter2", "other-salt"));
    }

    #[test]
    fn id_is_derived_from_username() {
        let a = User::new("mori", None, "x", "s");
        let b = User::new("mori", None, "y", "s");
        assert_eq!(a.id, b.id);
    }
}

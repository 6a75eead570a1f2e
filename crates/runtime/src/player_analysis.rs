use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use somnia_common::{blake3_hash, get_current_timestamp, CryptoHash};
use somnia_database::MongoDbObject;

use crate::error::GameError;

/// The evolving model of the player's psyche. Exactly one per user.
#[derive(Clone, Default, Debug, Serialize, Deserialize)]
pub struct PlayerAnalysis {
    #[serde(rename = "_id")]
    pub id: CryptoHash,

    pub user_id: CryptoHash,

    /// Immutable snapshot from the first counseling session.
    pub initial_analysis: String,
    /// Overwritten by each deep-analysis pass.
    pub ongoing_analysis: String,

    /// Keyword -> occurrence count. Counts only ever grow.
    pub emotion_shards: HashMap<String, i64>,

    /// Set once, at game end.
    pub final_persona: Option<String>,

    pub created_at: i64,
    pub updated_at: i64,
}

impl MongoDbObject for PlayerAnalysis {
    const COLLECTION_NAME: &'static str = "player_analyses";
    type Error = GameError;

    fn populate_id(&mut self) {
        self.id = blake3_hash(format!("analysis:{}", self.user_id.to_hex_string()).as_bytes());
    }
    fn get_id(&self) -> CryptoHash {
        self.id.clone()
    }
}

impl PlayerAnalysis {
    pub fn new(user_id: CryptoHash, initial_analysis: String) -> Self {
        let now = get_current_timestamp();
        let mut analysis = Self {
            id: CryptoHash::default(),
            user_id,
            ongoing_analysis: initial_analysis.clone(),
            initial_analysis,
            emotion_shards: HashMap::new(),
            final_persona: None,
            created_at: now,
            updated_at: now,
        };
        analysis.populate_id();
        analysis
    }

    /// Seeds a fresh analysis from the initial counseling insight: the
    /// sketch becomes both analysis snapshots, the dominant emotions become
    /// the first shards.
    pub fn from_initial_insight(
        user_id: CryptoHash, analysis: String, core_emotions: &[String],
    ) -> Self {
        let mut seeded = Self::new(user_id, analysis);
        seeded.record_shards(core_emotions);
        seeded
    }

    /// Increments the shard count for each keyword. Never decrements.
    pub fn record_shards(&mut self, keywords: &[String]) {
        for keyword in keywords {
            let keyword = keyword.trim();
            if keyword.is_empty() {
                continue;
            }
            *self.emotion_shards.entry(keyword.to_string()).or_insert(0) += 1;
        }
        self.updated_at = get_current_timestamp();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shard_counts_are_monotonic() {
        let mut analysis = PlayerAnalysis::new(CryptoHash::random(), "seed".into());
        analysis.record_shards(&["grief".into(), "hope".into()]);
        analysis.record_shards(&["grief".into(), "  ".into()]);

        assert_eq!(analysis.emotion_shards["grief"], 2);
        assert_eq!(analysis.emotion_shards["hope"], 1);
        assert_eq!(analysis.emotion_shards.len(), 2);
    }

    #[test]
    fn initial_insight_emotions_become_first_shards() {
        let analysis = PlayerAnalysis::from_initial_insight(
            CryptoHash::random(),
            "sketch".into(),
            &["grief".into(), "longing".into(), " ".into()],
        );
        assert_eq!(analysis.emotion_shards["grief"], 1);
        assert_eq!(analysis.emotion_shards["longing"], 1);
        assert_eq!(analysis.emotion_shards.len(), 2);
    }

    #[test]
    fn initial_analysis_seeds_ongoing() {
        let analysis = PlayerAnalysis::new(CryptoHash::random(), "seed".into());
        assert_eq!(analysis.initial_analysis, analysis.ongoing_analysis);
        assert!(analysis.final_persona.is_none());
    }
}

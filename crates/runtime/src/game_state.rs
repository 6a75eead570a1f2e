use serde::{Deserialize, Serialize};
use somnia_common::{blake3_hash, get_current_timestamp, CryptoHash};
use somnia_database::{doc, Bson, Database, Document, MongoDbObject};

use crate::env::GameConfig;
use crate::error::GameError;

#[derive(Clone, Copy, Default, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum GamePhase {
    #[default]
    NightConversation,
    DayWaiting,
    DayPsychologyTest,
    FinalPersonaGeneration,
}

impl GamePhase {
    /// Matches the serde string form; used for database filters.
    pub fn as_str(&self) -> &'static str {
        match self {
            GamePhase::NightConversation => "night_conversation",
            GamePhase::DayWaiting => "day_waiting",
            GamePhase::DayPsychologyTest => "day_psychology_test",
            GamePhase::FinalPersonaGeneration => "final_persona_generation",
        }
    }

    /// The directed edges of the progression graph. Everything else is an
    /// illegal transition.
    pub fn can_transition_to(&self, next: GamePhase) -> bool {
        use GamePhase::*;
        matches!(
            (self, next),
            (NightConversation, DayWaiting)
                | (NightConversation, FinalPersonaGeneration)
                | (DayWaiting, DayPsychologyTest)
                | (DayPsychologyTest, NightConversation)
                | (FinalPersonaGeneration, NightConversation)
        )
    }
}

impl std::fmt::Display for GamePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct WaitStatus {
    pub remaining_secs: i64,
    pub can_skip: bool,
    pub expired: bool,
}

/// The persisted cursor of the state machine. Exactly one per user.
#[derive(Clone, Default, Debug, Serialize, Deserialize)]
pub struct GameState {
    #[serde(rename = "_id")]
    pub id: CryptoHash,

    pub user_id: CryptoHash,

    pub current_day: i64,
    pub current_phase: GamePhase,
    pub active_character_id: Option<CryptoHash>,
    pub last_interaction_time: i64,

    pub created_at: i64,
}

impl MongoDbObject for GameState {
    const COLLECTION_NAME: &'static str = "game_states";
    type Error = GameError;

    fn populate_id(&mut self) {
        self.id = blake3_hash(format!("state:{}", self.user_id.to_hex_string()).as_bytes());
    }
    fn get_id(&self) -> CryptoHash {
        self.id.clone()
    }
}

impl GameState {
    pub fn new_first_night(user_id: CryptoHash, active_character_id: CryptoHash) -> Self {
        let now = get_current_timestamp();
        let mut state = Self {
            id: CryptoHash::default(),
            user_id,
            current_day: 1,
            current_phase: GamePhase::NightConversation,
            active_character_id: Some(active_character_id),
            last_interaction_time: now,
            created_at: now,
        };
        state.populate_id();
        state
    }

    pub async fn find_for_user(
        db: &Database, user_id: &CryptoHash,
    ) -> Result<Option<Self>, GameError> {
        Self::select_one_by_filter(db, doc! { "user_id": user_id.to_hex_string() }).await
    }

    pub fn evaluate_wait(&self, now: i64, config: &GameConfig) -> WaitStatus {
        let elapsed = now - self.last_interaction_time;
        WaitStatus {
            remaining_secs: (config.day_wait_secs - elapsed).max(0),
            can_skip: elapsed >= config.skip_wait_secs,
            expired: elapsed >= config.day_wait_secs,
        }
    }

    /// Conditional phase move: succeeds only if the stored phase still equals
    /// `self.current_phase`, so two racing transitions cannot both win.
    /// Returns the state as it would read after the update.
    pub async fn transition(
        mut self, db: &Database, next: GamePhase, changes: Document,
    ) -> Result<Self, GameError> {
        let from = self.current_phase;
        if !from.can_transition_to(next) {
            return Err(GameError::IllegalTransition {
                phase: from,
                action: "advance phase",
            });
        }

        let mut set = changes.clone();
        set.insert("current_phase", next.as_str());

        let matched = Self::update_one_guarded(
            db,
            doc! {
                "_id": self.get_id().to_hex_string(),
                "current_phase": from.as_str(),
            },
            doc! { "$set": set },
        )
        .await?;

        if !matched {
            return Err(GameError::Conflict(format!(
                "game state moved away from {} concurrently",
                from
            )));
        }

        self.current_phase = next;
        self.apply_changes(&changes);
        Ok(self)
    }

    fn apply_changes(&mut self, changes: &Document) {
        if let Ok(day) = changes.get_i64("current_day") {
            self.current_day = day;
        }
        if let Ok(ts) = changes.get_i64("last_interaction_time") {
            self.last_interaction_time = ts;
        }
        match changes.get("active_character_id") {
            Some(Bson::Null) => self.active_character_id = None,
            Some(Bson::String(hex)) => {
                self.active_character_id = CryptoHash::from_hex_string(hex).ok();
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legal_edges_only() {
        use GamePhase::*;
        assert!(NightConversation.can_transition_to(DayWaiting));
        assert!(NightConversation.can_transition_to(FinalPersonaGeneration));
        assert!(DayWaiting.can_transition_to(DayPsychologyTest));
        assert!(DayPsychologyTest.can_transition_to(NightConversation));
        assert!(FinalPersonaGeneration.can_transition_to(NightConversation));

        assert!(!DayWaiting.can_transition_to(NightConversation));
        assert!(!NightConversation.can_transition_to(DayPsychologyTest));
        assert!(!DayPsychologyTest.can_transition_to(DayWaiting));
        assert!(!FinalPersonaGeneration.can_transition_to(DayWaiting));
        assert!(!NightConversation.can_transition_to(NightConversation));
    }

    #[test]
    fn phase_strings_match_serde() {
        for phase in [
            GamePhase::NightConversation,
            GamePhase::DayWaiting,
            GamePhase::DayPsychologyTest,
            GamePhase::FinalPersonaGeneration,
        ] {
            let raw = serde_json::to_string(&phase).unwrap();
            assert_eq!(raw, format!("\"{}\"", phase.as_str()));
        }
    }

    #[test]
    fn wait_evaluation_thresholds() {
        let config = GameConfig::default();
        let mut state = GameState::new_first_night(CryptoHash::random(), CryptoHash::random());
        state.last_interaction_time = 1_000;

        // just arrived: full wait remains, no skip
        let status = state.evaluate_wait(1_000, &config);
        assert_eq!(status.remaining_secs, config.day_wait_secs);
        assert!(!status.can_skip);
        assert!(!status.expired);

        // one hour in: skippable but not expired
        let status = state.evaluate_wait(1_000 + config.skip_wait_secs, &config);
        assert!(status.can_skip);
        assert!(!status.expired);

        // past the full wait: expired, remaining clamped to zero
        let status = state.evaluate_wait(1_000 + config.day_wait_secs + 5, &config);
        assert!(status.expired);
        assert_eq!(status.remaining_secs, 0);
    }
}

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};

use serde::{Deserialize, Serialize};
use somnia_common::{get_current_timestamp, CryptoHash};
use somnia_database::{doc, ensure_unique_index, Bson, Database, MongoDbObject};
use tokio::sync::Mutex;

use crate::agents::{
    Agent, CharacterGenerator, CharacterSeed, CounselingAnalyst, Counselor, CounselorInput,
    DeepAnalyst, DeepAnalystInput, DialogueAgent, DialogueContext, EmotionExtractor,
    EndingGenerator, EndingSeed, PersonaSynthesizer, StorySummarizer, SummaryInput,
    SynthesisInput,
};
use crate::card::{CharacterCard, EmotionPiece};
use crate::character::{Character, CharacterStatus};
use crate::ending::Ending;
use crate::env::GameConfig;
use crate::error::GameError;
use crate::game_state::{GamePhase, GameState};
use crate::image::ImageClient;
use crate::llm::LlmClient;
use crate::logs::{ConversationLog, CounselingLog, CounselingSpeaker, Speaker};
use crate::player_analysis::PlayerAnalysis;
use crate::user::User;

/// In-fiction stand-in when the dialogue gateway fails. The player's turn is
/// already durable at that point; only the reply is ephemeral.
const DIALOGUE_FALLBACK: &str = "The dream wavers, and the words drift apart \
    before they reach you. Your companion is still there, listening. Try \
    speaking again.";

const COUNSELOR_FALLBACK: &str = "I'm sorry, I lost the thread of what you \
    said for a moment. Could you tell me that again?";

/// Startup index setup. All of these are idempotent; the (character_id, turn)
/// index is also the correctness guard for concurrent turn writers.
pub async fn ensure_indexes(db: &Database) -> anyhow::Result<()> {
    ensure_unique_index(
        db,
        ConversationLog::COLLECTION_NAME,
        doc! { "character_id": 1, "turn": 1 },
    )
    .await?;
    ensure_unique_index(db, GameState::COLLECTION_NAME, doc! { "user_id": 1 }).await?;
    ensure_unique_index(db, PlayerAnalysis::COLLECTION_NAME, doc! { "user_id": 1 }).await?;
    ensure_unique_index(db, CharacterCard::COLLECTION_NAME, doc! { "character_id": 1 }).await?;
    ensure_unique_index(db, Ending::COLLECTION_NAME, doc! { "user_id": 1 }).await?;
    Ok(())
}

/// What the client should render right now. Resolved fresh on every
/// `start_game` call, never cached.
#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum GameStatus {
    InitialCounselingNeeded,
    NightConversation {
        character: Character,
        game_state: GameState,
        history: Vec<ConversationLog>,
    },
    DayWaiting {
        remaining_secs: i64,
        can_skip: bool,
    },
    PsychologyTestReady {
        game_state: GameState,
    },
    FinalPersonaGeneration,
}

/// A freshly opened night: the persona to meet and the advanced state.
#[derive(Debug, Serialize)]
pub struct NewNight {
    pub character: Character,
    pub game_state: GameState,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PsychologyAnswer {
    pub question: String,
    pub answer: String,
}

#[derive(Debug, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum StoryOutcome {
    Concluded {
        card: CharacterCard,
        emotion_pieces: Vec<EmotionPiece>,
    },
    /// The completed-arc threshold was reached; synthesis is running in the
    /// background and `start_game` will report when the last night opens.
    FinalPersonaStarted,
    /// The final persona's arc concluded; the playthrough's terminal record.
    GameOver {
        card: CharacterCard,
        emotion_pieces: Vec<EmotionPiece>,
        ending: Ending,
    },
}

#[derive(Debug, Serialize)]
pub struct ChatReply {
    pub user_turn: ConversationLog,
    pub reply: String,
    pub fallback: bool,
}

#[derive(Debug, Serialize)]
pub struct CounselingReply {
    pub user_entry: CounselingLog,
    pub reply: String,
    pub fallback: bool,
}

#[derive(Debug, Serialize)]
pub struct CardEntry {
    pub card: CharacterCard,
    pub character_name: String,
    pub emotion_pieces: Vec<EmotionPiece>,
}

type LockMap = HashMap<CryptoHash, Arc<Mutex<()>>>;

/// Per-user lock registry. Entries live only while someone holds a handle;
/// the last handle to drop evicts its slot, so the map never accumulates
/// idle users.
#[derive(Clone, Default)]
struct UserLocks {
    inner: Arc<StdMutex<LockMap>>,
}

impl UserLocks {
    fn acquire(&self, user_id: &CryptoHash) -> UserLockHandle {
        let slot = {
            let mut map = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            map.entry(user_id.clone()).or_default().clone()
        };
        UserLockHandle {
            registry: self.inner.clone(),
            user_id: user_id.clone(),
            slot,
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

struct UserLockHandle {
    registry: Arc<StdMutex<LockMap>>,
    user_id: CryptoHash,
    slot: Arc<Mutex<()>>,
}

impl UserLockHandle {
    async fn lock(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.slot.lock().await
    }
}

impl Drop for UserLockHandle {
    fn drop(&mut self) {
        let mut map = match self.registry.lock() {
            Ok(map) => map,
            Err(poisoned) => poisoned.into_inner(),
        };
        // strong count 2 means the registry and this handle are the only
        // owners left; acquiring also takes the registry lock, so the check
        // cannot race with a new clone
        if Arc::strong_count(&self.slot) == 2 {
            if let Some(current) = map.get(&self.user_id) {
                if Arc::ptr_eq(current, &self.slot) {
                    map.remove(&self.user_id);
                }
            }
        }
    }
}

/// The progression engine. One instance per process; cheap to clone, all
/// fields are handles.
///
/// Every player-driven operation takes that player's lock first, so within
/// one process operations for a user are serialized. Across processes the
/// conditional phase updates and the unique turn index carry the guarantee.
#[derive(Clone)]
pub struct GameEngine {
    db: Database,
    image: ImageClient,
    config: GameConfig,

    dialogue: DialogueAgent,
    counselor: Counselor,
    counseling_analyst: CounselingAnalyst,
    story_summarizer: StorySummarizer,
    emotion_extractor: EmotionExtractor,
    deep_analyst: DeepAnalyst,
    character_generator: CharacterGenerator,
    persona_synthesizer: PersonaSynthesizer,
    ending_generator: EndingGenerator,

    user_locks: UserLocks,
}

impl GameEngine {
    pub fn new(db: Database) -> Self {
        let llm = LlmClient::new();
        Self {
            db,
            image: ImageClient::new(),
            config: GameConfig::load(),
            dialogue: DialogueAgent::new(llm.clone()),
            counselor: Counselor::new(llm.clone()),
            counseling_analyst: CounselingAnalyst::new(llm.clone()),
            story_summarizer: StorySummarizer::new(llm.clone()),
            emotion_extractor: EmotionExtractor::new(llm.clone()),
            deep_analyst: DeepAnalyst::new(llm.clone()),
            character_generator: CharacterGenerator::new(llm.clone()),
            persona_synthesizer: PersonaSynthesizer::new(llm.clone()),
            ending_generator: EndingGenerator::new(llm),
            user_locks: UserLocks::default(),
        }
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    pub fn config(&self) -> &GameConfig {
        &self.config
    }

    fn require_phase(
        state: &GameState, expected: GamePhase, action: &'static str,
    ) -> Result<(), GameError> {
        if state.current_phase != expected {
            return Err(GameError::IllegalTransition {
                phase: state.current_phase,
                action,
            });
        }
        Ok(())
    }

    fn ensure_story_has_dialogue(log: &[ConversationLog]) -> Result<(), GameError> {
        if log.is_empty() {
            return Err(GameError::Validation(
                "cannot conclude a story before any conversation".to_string(),
            ));
        }
        Ok(())
    }

    /// Resolves the player's current position in the loop. This call is also
    /// where stalled states heal: an expired day wait advances to the
    /// psychology test, and an orphaned final-persona phase restarts its
    /// background synthesis.
    pub async fn start_game(&self, user_id: &CryptoHash) -> Result<GameStatus, GameError> {
        let lock = self.user_locks.acquire(user_id);
        let _guard = lock.lock().await;

        let user = User::select_one_by_index(&self.db, user_id)
            .await?
            .ok_or(GameError::NotFound("user"))?;

        if user.player_analysis.is_none() {
            return Ok(GameStatus::InitialCounselingNeeded);
        }

        let state = GameState::find_for_user(&self.db, user_id)
            .await?
            .ok_or(GameError::NotFound("game state"))?;

        match state.current_phase {
            GamePhase::NightConversation => {
                let character_id = state
                    .active_character_id
                    .clone()
                    .ok_or(GameError::NotFound("active character"))?;
                let character = Character::select_one_by_index(&self.db, &character_id)
                    .await?
                    .ok_or(GameError::NotFound("character"))?;
                let history = ConversationLog::history(&self.db, &character_id).await?;
                Ok(GameStatus::NightConversation {
                    character,
                    game_state: state,
                    history,
                })
            }
            GamePhase::DayWaiting => {
                let wait = state.evaluate_wait(get_current_timestamp(), &self.config);
                if wait.expired {
                    let state = state
                        .transition(&self.db, GamePhase::DayPsychologyTest, doc! {})
                        .await?;
                    return Ok(GameStatus::PsychologyTestReady { game_state: state });
                }
                Ok(GameStatus::DayWaiting {
                    remaining_secs: wait.remaining_secs,
                    can_skip: wait.can_skip,
                })
            }
            GamePhase::DayPsychologyTest => Ok(GameStatus::PsychologyTestReady { game_state: state }),
            GamePhase::FinalPersonaGeneration => {
                // the phase is durable; if the task that was building the
                // final persona died with the process, run it again
                self.spawn_final_persona_generation(user_id.clone());
                Ok(GameStatus::FinalPersonaGeneration)
            }
        }
    }

    /// One-time onboarding: analyze the initial counseling transcript, seed
    /// the player analysis, and open the scripted first night.
    ///
    /// The user's `player_analysis` marker is written last, so a crash at any
    /// earlier point leaves the player in "counseling needed" and a re-run
    /// adopts whatever the failed attempt already persisted.
    pub async fn submit_initial_counseling(
        &self, user_id: &CryptoHash, messages: &[String],
    ) -> Result<NewNight, GameError> {
        let lock = self.user_locks.acquire(user_id);
        let _guard = lock.lock().await;

        let mut user = User::select_one_by_index(&self.db, user_id)
            .await?
            .ok_or(GameError::NotFound("user"))?;

        if user.player_analysis.is_some() {
            return Err(GameError::Conflict(
                "initial counseling already completed".to_string(),
            ));
        }

        let messages: Vec<&str> = messages
            .iter()
            .map(|m| m.trim())
            .filter(|m| !m.is_empty())
            .collect();
        if messages.is_empty() {
            return Err(GameError::Validation(
                "initial counseling needs at least one message".to_string(),
            ));
        }

        let analysis = match PlayerAnalysis::select_one_by_filter(
            &self.db,
            doc! { "user_id": user_id.to_hex_string() },
        )
        .await?
        {
            Some(existing) => existing,
            None => {
                let insight = self.counseling_analyst.call(&messages.join("\n")).await?;

                let entries = messages
                    .iter()
                    .map(|m| CounselingLog::new(user_id.clone(), CounselingSpeaker::User, m, true))
                    .collect();
                CounselingLog::save_many(&self.db, entries).await?;

                let analysis = PlayerAnalysis::from_initial_insight(
                    user_id.clone(),
                    insight.analysis,
                    &insight.core_emotions,
                );
                analysis.clone().save(&self.db).await?;
                analysis
            }
        };

        let (character, state) = match GameState::find_for_user(&self.db, user_id).await? {
            Some(state) => {
                let character_id = state
                    .active_character_id
                    .clone()
                    .ok_or(GameError::NotFound("active character"))?;
                let character = Character::select_one_by_index(&self.db, &character_id)
                    .await?
                    .ok_or(GameError::NotFound("character"))?;
                (character, state)
            }
            None => {
                let mut character = Character::first_night(user_id.clone());
                let (original, pixelated) = self
                    .image
                    .generate_portrait(&character.name, &character.description)
                    .await;
                character.original_image_url = original;
                character.pixelated_image_url = pixelated;
                character.clone().save(&self.db).await?;

                let state = GameState::new_first_night(user_id.clone(), character.id.clone());
                state.clone().save(&self.db).await?;
                (character, state)
            }
        };

        user.player_analysis = Some(analysis.get_id());
        user.last_active = get_current_timestamp();
        user.update(&self.db).await?;

        Ok(NewNight {
            character,
            game_state: state,
        })
    }

    /// One player turn of the night conversation. The player's message is
    /// durable before the gateway is asked for a reply; a gateway failure
    /// yields an in-fiction fallback and persists nothing for the character.
    pub async fn post_chat_message(
        &self, user_id: &CryptoHash, message: &str,
    ) -> Result<ChatReply, GameError> {
        let lock = self.user_locks.acquire(user_id);
        let _guard = lock.lock().await;

        let message = message.trim();
        if message.is_empty() {
            return Err(GameError::Validation("message is empty".to_string()));
        }

        let state = GameState::find_for_user(&self.db, user_id)
            .await?
            .ok_or(GameError::NotFound("game state"))?;
        Self::require_phase(&state, GamePhase::NightConversation, "chat")?;

        let character_id = state
            .active_character_id
            .clone()
            .ok_or(GameError::NotFound("active character"))?;
        let character = Character::select_one_by_index(&self.db, &character_id)
            .await?
            .ok_or(GameError::NotFound("character"))?;

        if character.final_turns_exhausted(self.config.final_counseling_limit) {
            return Err(GameError::Validation(
                "the final conversation has reached its close; end the story".to_string(),
            ));
        }

        let recent =
            ConversationLog::recent(&self.db, &character_id, self.config.dialogue_history_window)
                .await?;

        let user_turn =
            ConversationLog::append(&self.db, &character_id, user_id, Speaker::User, message)
                .await?;

        let context = DialogueContext {
            character,
            recent_history: recent,
            user_message: message.to_string(),
            current_day: state.current_day,
        };

        match self.dialogue.call(&context).await {
            Ok(reply) => {
                ConversationLog::append(
                    &self.db, &character_id, user_id, Speaker::Character, &reply,
                )
                .await?;

                Character::update_one_guarded(
                    &self.db,
                    doc! { "_id": character_id.to_hex_string() },
                    doc! { "$inc": { "counseling_count": 1 } },
                )
                .await?;
                GameState::update_one_guarded(
                    &self.db,
                    doc! { "_id": state.get_id().to_hex_string() },
                    doc! { "$set": { "last_interaction_time": get_current_timestamp() } },
                )
                .await?;

                Ok(ChatReply {
                    user_turn,
                    reply,
                    fallback: false,
                })
            }
            Err(e) => {
                tracing::error!("dialogue generation failed for {}: {}", character_id, e);
                Ok(ChatReply {
                    user_turn,
                    reply: DIALOGUE_FALLBACK.to_string(),
                    fallback: true,
                })
            }
        }
    }

    /// Concludes the active arc: summary card, emotion pieces, shard
    /// bookkeeping, then the day wait, the final-persona branch once enough
    /// arcs are complete, or the terminal ending for the final persona.
    ///
    /// The deterministic card id makes this resumable: if a previous attempt
    /// died after the card write, the card is adopted instead of regenerated,
    /// the guarded status flip keeps the shards from double-counting, and the
    /// completed-arc count is recounted from the store rather than
    /// accumulated.
    pub async fn end_character_story(
        &self, user_id: &CryptoHash,
    ) -> Result<StoryOutcome, GameError> {
        let lock = self.user_locks.acquire(user_id);
        let _guard = lock.lock().await;

        let state = GameState::find_for_user(&self.db, user_id)
            .await?
            .ok_or(GameError::NotFound("game state"))?;
        Self::require_phase(&state, GamePhase::NightConversation, "end the story")?;

        let character_id = state
            .active_character_id
            .clone()
            .ok_or(GameError::NotFound("active character"))?;
        let character = Character::select_one_by_index(&self.db, &character_id)
            .await?
            .ok_or(GameError::NotFound("character"))?;

        let (card, pieces) = match CharacterCard::find_for_character(&self.db, &character_id)
            .await?
        {
            Some(card) => {
                let pieces = EmotionPiece::select_many_simple(
                    &self.db,
                    doc! { "character_card_id": card.get_id().to_hex_string() },
                )
                .await?;
                (card, pieces)
            }
            None => {
                let full_log = ConversationLog::history(&self.db, &character_id).await?;
                Self::ensure_story_has_dialogue(&full_log)?;

                let arc = self
                    .story_summarizer
                    .call(&SummaryInput {
                        character: character.clone(),
                        full_log,
                    })
                    .await?;
                let keywords = self.emotion_extractor.call(&arc.summary).await?;

                let card = CharacterCard::new(
                    user_id.clone(),
                    character_id.clone(),
                    arc.summary,
                    arc.outcome,
                    character.pixelated_image_url.clone(),
                );
                match card.clone().save(&self.db).await {
                    // a racing writer beat us to the deterministic id
                    Ok(()) | Err(GameError::Conflict(_)) => {}
                    Err(e) => return Err(e),
                }

                let pieces =
                    EmotionPiece::from_keywords(user_id, &card.get_id(), &keywords.keywords);
                EmotionPiece::save_many(&self.db, pieces.clone()).await?;
                (card, pieces)
            }
        };

        let newly_completed = Character::update_one_guarded(
            &self.db,
            doc! {
                "_id": character_id.to_hex_string(),
                "status": { "$ne": CharacterStatus::Completed.as_str() },
            },
            doc! { "$set": { "status": CharacterStatus::Completed.as_str() } },
        )
        .await?;

        let now = get_current_timestamp();
        if newly_completed {
            let mut analysis = PlayerAnalysis::select_one_by_filter(
                &self.db,
                doc! { "user_id": user_id.to_hex_string() },
            )
            .await?
            .ok_or(GameError::NotFound("player analysis"))?;
            let keywords: Vec<String> = pieces.iter().map(|p| p.keyword.clone()).collect();
            analysis.record_shards(&keywords);
            analysis.update(&self.db).await?;
        }

        // the completed-arc count is derived from the store, never
        // accumulated, so a crash after the status flip cannot lose an arc
        let completed_arcs = Character::total_count(
            &self.db,
            doc! {
                "user_id": user_id.to_hex_string(),
                "status": CharacterStatus::Completed.as_str(),
                "is_final_persona": false,
            },
        )
        .await?;
        User::update_one_guarded(
            &self.db,
            doc! { "_id": user_id.to_hex_string() },
            doc! {
                "$set": {
                    "completed_character_count": completed_arcs as i64,
                    "last_active": now,
                },
            },
        )
        .await?;

        if character.is_final_persona {
            let ending = self.record_ending(user_id, &character).await?;
            state
                .transition(
                    &self.db,
                    GamePhase::DayWaiting,
                    doc! { "active_character_id": Bson::Null, "last_interaction_time": now },
                )
                .await?;
            return Ok(StoryOutcome::GameOver {
                card,
                emotion_pieces: pieces,
                ending,
            });
        }

        if Self::final_persona_due(completed_arcs, self.config.final_persona_threshold) {
            state
                .transition(
                    &self.db,
                    GamePhase::FinalPersonaGeneration,
                    doc! { "active_character_id": Bson::Null, "last_interaction_time": now },
                )
                .await?;
            self.spawn_final_persona_generation(user_id.clone());
            return Ok(StoryOutcome::FinalPersonaStarted);
        }

        state
            .transition(
                &self.db,
                GamePhase::DayWaiting,
                doc! { "active_character_id": Bson::Null, "last_interaction_time": now },
            )
            .await?;

        Ok(StoryOutcome::Concluded {
            card,
            emotion_pieces: pieces,
        })
    }

    fn final_persona_due(completed_arcs: u64, threshold: i64) -> bool {
        completed_arcs >= threshold.max(0) as u64
    }

    /// Adopt-or-generate the terminal record. The deterministic ending id
    /// and the unique user index make the write idempotent under retries.
    async fn record_ending(
        &self, user_id: &CryptoHash, character: &Character,
    ) -> Result<Ending, GameError> {
        if let Some(existing) = Ending::find_for_user(&self.db, user_id).await? {
            return Ok(existing);
        }

        let analysis = PlayerAnalysis::select_one_by_filter(
            &self.db,
            doc! { "user_id": user_id.to_hex_string() },
        )
        .await?
        .ok_or(GameError::NotFound("player analysis"))?;
        let final_persona = analysis
            .final_persona
            .ok_or(GameError::NotFound("final persona"))?;

        let script = self
            .ending_generator
            .call(&EndingSeed {
                final_persona: final_persona.clone(),
                character_name: character.name.clone(),
                counseling_count: character.counseling_count,
            })
            .await?;

        let ending = Ending::new(
            user_id.clone(),
            character.id.clone(),
            final_persona,
            script.ending_type,
            script.title,
            script.content,
            character.original_image_url.clone(),
        );
        match ending.clone().save(&self.db).await {
            // a racing writer beat us to the deterministic id
            Ok(()) | Err(GameError::Conflict(_)) => {}
            Err(e) => return Err(e),
        }
        Ok(ending)
    }

    /// Skips the remainder of the day wait once the skip window is open.
    pub async fn start_psychology_phase(
        &self, user_id: &CryptoHash,
    ) -> Result<GameState, GameError> {
        let lock = self.user_locks.acquire(user_id);
        let _guard = lock.lock().await;

        let state = GameState::find_for_user(&self.db, user_id)
            .await?
            .ok_or(GameError::NotFound("game state"))?;
        Self::require_phase(&state, GamePhase::DayWaiting, "open the psychology test")?;

        let now = get_current_timestamp();
        let wait = state.evaluate_wait(now, &self.config);
        if !wait.can_skip {
            let until_skip = self.config.skip_wait_secs - (now - state.last_interaction_time);
            return Err(GameError::Validation(format!(
                "the skip window opens in {} seconds",
                until_skip.max(0)
            )));
        }

        state
            .transition(&self.db, GamePhase::DayPsychologyTest, doc! {})
            .await
    }

    /// Consumes the psychology answers: deep re-analysis, next persona,
    /// portrait, then a new night on the next day number.
    pub async fn process_psychology_answers(
        &self, user_id: &CryptoHash, answers: &[PsychologyAnswer],
    ) -> Result<NewNight, GameError> {
        let lock = self.user_locks.acquire(user_id);
        let _guard = lock.lock().await;

        let state = GameState::find_for_user(&self.db, user_id)
            .await?
            .ok_or(GameError::NotFound("game state"))?;
        Self::require_phase(&state, GamePhase::DayPsychologyTest, "submit psychology answers")?;

        if answers.is_empty()
            || answers
                .iter()
                .any(|a| a.question.trim().is_empty() || a.answer.trim().is_empty())
        {
            return Err(GameError::Validation(
                "every psychology answer needs a question and an answer".to_string(),
            ));
        }

        let mut analysis = PlayerAnalysis::select_one_by_filter(
            &self.db,
            doc! { "user_id": user_id.to_hex_string() },
        )
        .await?
        .ok_or(GameError::NotFound("player analysis"))?;

        // the freshest material is the arc the player just finished
        let recent_transcript = match Character::select_many(
            &self.db,
            doc! {
                "user_id": user_id.to_hex_string(),
                "status": CharacterStatus::Completed.as_str(),
            },
            Some(doc! { "created_at": -1 }),
            Some(1),
        )
        .await?
        .pop()
        {
            Some(concluded) => {
                let log = ConversationLog::history(&self.db, &concluded.id).await?;
                log.iter()
                    .map(|entry| {
                        let speaker = match entry.speaker {
                            Speaker::User => "Player",
                            Speaker::Character => concluded.name.as_str(),
                        };
                        format!("{}: {}", speaker, entry.message)
                    })
                    .collect::<Vec<_>>()
                    .join("\n")
            }
            None => String::new(),
        };

        let deep = self
            .deep_analyst
            .call(&DeepAnalystInput {
                ongoing_analysis: analysis.ongoing_analysis.clone(),
                emotion_shards: analysis.emotion_shards.clone(),
                recent_transcript,
                answers: answers
                    .iter()
                    .map(|a| (a.question.clone(), a.answer.clone()))
                    .collect(),
            })
            .await?;

        let profile = self
            .character_generator
            .call(&CharacterSeed {
                character_element: deep.character_element.clone(),
                ongoing_analysis: deep.updated_analysis.clone(),
            })
            .await?;

        let (original, pixelated) = self
            .image
            .generate_portrait(&profile.name, &profile.description)
            .await;

        let mut character = Character::new(user_id.clone(), CharacterStatus::Ongoing);
        character.name = profile.name;
        character.description = profile.description;
        character.problem = profile.problem;
        character.personality = profile.personality;
        character.initial_dialogue = profile.initial_dialogue;
        character.original_image_url = original;
        character.pixelated_image_url = pixelated;
        character.clone().save(&self.db).await?;

        analysis.ongoing_analysis = deep.updated_analysis;
        analysis.updated_at = get_current_timestamp();
        analysis.update(&self.db).await?;

        let changes = doc! {
            "current_day": state.current_day + 1,
            "active_character_id": character.id.to_hex_string(),
            "last_interaction_time": get_current_timestamp(),
        };
        let state = state
            .transition(&self.db, GamePhase::NightConversation, changes)
            .await?;

        Ok(NewNight {
            character,
            game_state: state,
        })
    }

    fn spawn_final_persona_generation(&self, user_id: CryptoHash) {
        let engine = self.clone();
        tokio::spawn(async move {
            if let Err(e) = engine.generate_final_persona(&user_id).await {
                tracing::error!("final persona generation failed for {}: {}", user_id, e);
            }
        });
    }

    /// Builds the final persona and opens the last night. Runs in the
    /// background; the durable `FinalPersonaGeneration` phase is the marker
    /// that lets a restarted process pick the work back up. A final character
    /// left behind by a failed earlier run is adopted, never duplicated.
    pub async fn generate_final_persona(&self, user_id: &CryptoHash) -> Result<(), GameError> {
        let lock = self.user_locks.acquire(user_id);
        let _guard = lock.lock().await;

        let state = GameState::find_for_user(&self.db, user_id)
            .await?
            .ok_or(GameError::NotFound("game state"))?;
        if state.current_phase != GamePhase::FinalPersonaGeneration {
            // another runner already finished this
            return Ok(());
        }

        let existing = Character::select_one_by_filter(
            &self.db,
            doc! { "user_id": user_id.to_hex_string(), "is_final_persona": true },
        )
        .await?;

        let character = match existing {
            Some(character) => character,
            None => {
                let mut analysis = PlayerAnalysis::select_one_by_filter(
                    &self.db,
                    doc! { "user_id": user_id.to_hex_string() },
                )
                .await?
                .ok_or(GameError::NotFound("player analysis"))?;

                let cards = CharacterCard::select_many(
                    &self.db,
                    doc! { "user_id": user_id.to_hex_string() },
                    Some(doc! { "created_at": 1 }),
                    None,
                )
                .await?;
                let journey_digest = cards
                    .iter()
                    .map(|card| card.summary.as_str())
                    .collect::<Vec<_>>()
                    .join("\n\n");

                let persona = self
                    .persona_synthesizer
                    .call(&SynthesisInput {
                        initial_analysis: analysis.initial_analysis.clone(),
                        ongoing_analysis: analysis.ongoing_analysis.clone(),
                        emotion_shards: analysis.emotion_shards.clone(),
                        journey_digest,
                    })
                    .await?;

                let (original, pixelated) = self
                    .image
                    .generate_portrait(&persona.profile.name, &persona.profile.description)
                    .await;

                let mut character = Character::new(user_id.clone(), CharacterStatus::Locked);
                character.is_final_persona = true;
                character.name = persona.profile.name.clone();
                character.description = persona.profile.description.clone();
                character.problem = persona.profile.problem.clone();
                character.personality = persona.profile.personality.clone();
                character.initial_dialogue = persona.profile.initial_dialogue.clone();
                character.original_image_url = original;
                character.pixelated_image_url = pixelated;
                character.clone().save(&self.db).await?;

                if analysis.final_persona.is_none() {
                    analysis.final_persona = Some(persona.final_persona);
                    analysis.updated_at = get_current_timestamp();
                    analysis.update(&self.db).await?;
                }

                character
            }
        };

        let changes = doc! {
            "current_day": state.current_day + 1,
            "active_character_id": character.id.to_hex_string(),
            "last_interaction_time": get_current_timestamp(),
        };
        state
            .transition(&self.db, GamePhase::NightConversation, changes)
            .await?;

        Ok(())
    }

    /// Out-of-fiction counseling chat, available once onboarding is done.
    /// Mirrors the dialogue failure contract: the player's entry is durable,
    /// a failed reply is a fallback and persists nothing.
    pub async fn post_counseling_message(
        &self, user_id: &CryptoHash, message: &str,
    ) -> Result<CounselingReply, GameError> {
        let lock = self.user_locks.acquire(user_id);
        let _guard = lock.lock().await;

        let message = message.trim();
        if message.is_empty() {
            return Err(GameError::Validation("message is empty".to_string()));
        }

        let user = User::select_one_by_index(&self.db, user_id)
            .await?
            .ok_or(GameError::NotFound("user"))?;
        if user.player_analysis.is_none() {
            return Err(GameError::Validation(
                "complete initial counseling first".to_string(),
            ));
        }

        let recent =
            CounselingLog::recent(&self.db, user_id, self.config.counseling_history_window)
                .await?;

        let user_entry =
            CounselingLog::new(user_id.clone(), CounselingSpeaker::User, message, false);
        user_entry.clone().save(&self.db).await?;

        let input = CounselorInput {
            recent_history: recent,
            user_message: message.to_string(),
        };

        match self.counselor.call(&input).await {
            Ok(reply) => {
                CounselingLog::new(user_id.clone(), CounselingSpeaker::Counselor, &reply, false)
                    .save(&self.db)
                    .await?;
                self.spawn_ongoing_analysis_refresh(user_id.clone());
                Ok(CounselingReply {
                    user_entry,
                    reply,
                    fallback: false,
                })
            }
            Err(e) => {
                tracing::error!("counselor reply failed for {}: {}", user_id, e);
                Ok(CounselingReply {
                    user_entry,
                    reply: COUNSELOR_FALLBACK.to_string(),
                    fallback: true,
                })
            }
        }
    }

    fn spawn_ongoing_analysis_refresh(&self, user_id: CryptoHash) {
        let engine = self.clone();
        tokio::spawn(async move {
            if let Err(e) = engine.refresh_ongoing_analysis(&user_id).await {
                tracing::warn!("ongoing analysis refresh failed for {}: {}", user_id, e);
            }
        });
    }

    /// Folds recent counseling material into the running analysis. Best
    /// effort in the background; a failure leaves the previous analysis in
    /// place and the next exchange tries again.
    async fn refresh_ongoing_analysis(&self, user_id: &CryptoHash) -> Result<(), GameError> {
        let lock = self.user_locks.acquire(user_id);
        let _guard = lock.lock().await;

        let mut analysis = PlayerAnalysis::select_one_by_filter(
            &self.db,
            doc! { "user_id": user_id.to_hex_string() },
        )
        .await?
        .ok_or(GameError::NotFound("player analysis"))?;

        let counseling =
            CounselingLog::recent(&self.db, user_id, self.config.counseling_history_window)
                .await?;
        let recent_transcript = counseling
            .iter()
            .map(|entry| {
                let speaker = match entry.speaker {
                    CounselingSpeaker::User => "Player",
                    CounselingSpeaker::Counselor => "Counselor",
                };
                format!("{}: {}", speaker, entry.message)
            })
            .collect::<Vec<_>>()
            .join("\n");

        let deep = self
            .deep_analyst
            .call(&DeepAnalystInput {
                ongoing_analysis: analysis.ongoing_analysis.clone(),
                emotion_shards: analysis.emotion_shards.clone(),
                recent_transcript,
                answers: Vec::new(),
            })
            .await?;

        analysis.ongoing_analysis = deep.updated_analysis;
        analysis.updated_at = get_current_timestamp();
        analysis.update(&self.db).await
    }

    pub async fn counseling_history(
        &self, user_id: &CryptoHash,
    ) -> Result<Vec<CounselingLog>, GameError> {
        CounselingLog::history(&self.db, user_id).await
    }

    /// The player's card collection, oldest arc first.
    pub async fn list_cards(&self, user_id: &CryptoHash) -> Result<Vec<CardEntry>, GameError> {
        let cards = CharacterCard::select_many(
            &self.db,
            doc! { "user_id": user_id.to_hex_string() },
            Some(doc! { "created_at": 1 }),
            None,
        )
        .await?;

        let mut entries = Vec::with_capacity(cards.len());
        for card in cards {
            let character = Character::select_one_by_index(&self.db, &card.character_id).await?;
            let character_name = character.map(|c| c.name).unwrap_or_default();
            let emotion_pieces = EmotionPiece::select_many_simple(
                &self.db,
                doc! { "character_card_id": card.get_id().to_hex_string() },
            )
            .await?;
            entries.push(CardEntry {
                card,
                character_name,
                emotion_pieces,
            });
        }
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_serializes_with_tag() {
        let raw = serde_json::to_value(GameStatus::InitialCounselingNeeded).unwrap();
        assert_eq!(raw["status"], "initial_counseling_needed");

        let raw = serde_json::to_value(GameStatus::DayWaiting {
            remaining_secs: 120,
            can_skip: false,
        })
        .unwrap();
        assert_eq!(raw["status"], "day_waiting");
        assert_eq!(raw["remaining_secs"], 120);
    }

    #[test]
    fn chatting_outside_the_night_is_rejected() {
        let mut state = GameState::new_first_night(CryptoHash::random(), CryptoHash::random());
        state.current_phase = GamePhase::DayWaiting;

        let err =
            GameEngine::require_phase(&state, GamePhase::NightConversation, "chat").unwrap_err();
        assert!(matches!(
            err,
            GameError::IllegalTransition { phase: GamePhase::DayWaiting, action: "chat" }
        ));
    }

    #[test]
    fn concluded_story_cannot_be_ended_again() {
        // concluding moves the phase off the night, so a repeat end-story
        // call hits the phase guard
        let mut state = GameState::new_first_night(CryptoHash::random(), CryptoHash::random());
        assert!(
            GameEngine::require_phase(&state, GamePhase::NightConversation, "end the story")
                .is_ok()
        );

        state.current_phase = GamePhase::DayWaiting;
        assert!(
            GameEngine::require_phase(&state, GamePhase::NightConversation, "end the story")
                .is_err()
        );
    }

    #[test]
    fn story_needs_at_least_one_turn() {
        let err = GameEngine::ensure_story_has_dialogue(&[]).unwrap_err();
        assert!(matches!(err, GameError::Validation(_)));
    }

    #[test]
    fn final_persona_threshold_comparison() {
        assert!(!GameEngine::final_persona_due(8, 9));
        assert!(GameEngine::final_persona_due(9, 9));
        assert!(GameEngine::final_persona_due(10, 9));
    }

    #[test]
    fn game_over_carries_the_terminal_record() {
        let ending = Ending::new(
            CryptoHash::random(), CryptoHash::random(),
            "persona".into(), "Good".into(), "The Morning After".into(),
            "You wake.".into(), "img".into(),
        );
        let raw = serde_json::to_value(StoryOutcome::GameOver {
            card: CharacterCard::default(),
            emotion_pieces: Vec::new(),
            ending,
        })
        .unwrap();
        assert_eq!(raw["result"], "game_over");
        assert_eq!(raw["ending"]["title"], "The Morning After");
        assert_eq!(raw["ending"]["ending_type"], "Good");
    }

    #[tokio::test]
    async fn user_locks_evict_idle_entries() {
        let locks = UserLocks::default();
        let user_id = CryptoHash::random();

        let first = locks.acquire(&user_id);
        let second = locks.acquire(&user_id);
        assert!(Arc::ptr_eq(&first.slot, &second.slot));
        assert_eq!(locks.len(), 1);

        {
            let _guard = first.lock().await;
        }
        drop(first);
        assert_eq!(locks.len(), 1);

        drop(second);
        assert_eq!(locks.len(), 0);
    }

    #[test]
    fn psychology_answers_deserialize() {
        let answers: Vec<PsychologyAnswer> =
            serde_json::from_str(r#"[{"question": "What do you avoid?", "answer": "Endings."}]"#)
                .unwrap();
        assert_eq!(answers.len(), 1);
        assert_eq!(answers[0].answer, "Endings.");
    }

    #[test]
    fn fallback_lines_are_in_register() {
        assert!(!DIALOGUE_FALLBACK.trim().is_empty());
        assert!(!COUNSELOR_FALLBACK.trim().is_empty());
    }
}

use std::env;

use somnia_common::EnvVars;

pub struct LlmEnv {
    pub llm_api_key: String,
    pub llm_base_url: String,
    pub llm_timeout_secs: u64,
}

impl EnvVars for LlmEnv {
    fn load() -> Self {
        Self {
            llm_api_key: env::var("LLM_API_KEY").unwrap(),
            llm_base_url: env::var("LLM_BASE_URL")
                .unwrap_or_else(|_| "https://openrouter.ai/api/v1".to_string()),
            llm_timeout_secs: env::var("LLM_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(60),
        }
    }

    fn get_env_var(&self, key: &str) -> String {
        match key {
            "LLM_API_KEY" => self.llm_api_key.clone(),
            "LLM_BASE_URL" => self.llm_base_url.clone(),
            "LLM_TIMEOUT_SECS" => self.llm_timeout_secs.to_string(),
            _ => panic!("Invalid environment variable: {}", key),
        }
    }
}

/// Tuning knobs for the progression engine. Every value has a default so a
/// bare environment still boots.
#[derive(Debug, Clone)]
pub struct GameConfig {
    /// Seconds a player waits in `DayWaiting` before the psychology test
    /// opens automatically.
    pub day_wait_secs: i64,
    /// Seconds after which the wait may be skipped early.
    pub skip_wait_secs: i64,
    /// Completed character arcs required before the final persona branch.
    pub final_persona_threshold: i64,
    /// Conversation turns allowed with the final persona before the ending
    /// must be concluded.
    pub final_counseling_limit: i64,
    /// Sliding window of recent conversation turns fed to the dialogue agent.
    pub dialogue_history_window: usize,
    /// Sliding window of counseling entries fed to the counselor agent.
    pub counseling_history_window: usize,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            day_wait_secs: 12 * 60 * 60,
            skip_wait_secs: 60 * 60,
            final_persona_threshold: 9,
            final_counseling_limit: 10,
            dialogue_history_window: 20,
            counseling_history_window: 30,
        }
    }
}

impl GameConfig {
    pub fn load() -> Self {
        let defaults = Self::default();
        Self {
            day_wait_secs: env_i64("GAME_DAY_WAIT_SECS", defaults.day_wait_secs),
            skip_wait_secs: env_i64("GAME_SKIP_WAIT_SECS", defaults.skip_wait_secs),
            final_persona_threshold: env_i64(
                "GAME_FINAL_PERSONA_THRESHOLD",
                defaults.final_persona_threshold,
            ),
            final_counseling_limit: env_i64(
                "GAME_FINAL_COUNSELING_LIMIT",
                defaults.final_counseling_limit,
            ),
            dialogue_history_window: env_i64(
                "GAME_DIALOGUE_HISTORY_WINDOW",
                defaults.dialogue_history_window as i64,
            ) as usize,
            counseling_history_window: env_i64(
                "GAME_COUNSELING_HISTORY_WINDOW",
                defaults.counseling_history_window as i64,
            ) as usize,
        }
    }
}

fn env_i64(key: &str, default: i64) -> i64 {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

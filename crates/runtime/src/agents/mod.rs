mod character_generator;
mod counseling_analyst;
mod counselor;
mod deep_analyst;
mod dialogue;
mod emotion_extractor;
mod ending_generator;
mod persona_synthesizer;
mod story_summarizer;

pub use character_generator::{CharacterGenerator, CharacterSeed, PersonaProfile};
pub use counseling_analyst::{CounselingAnalyst, CounselingInsight};
pub use counselor::{Counselor, CounselorInput};
pub use deep_analyst::{DeepAnalysis, DeepAnalyst, DeepAnalystInput};
pub use dialogue::{DialogueAgent, DialogueContext};
pub use emotion_extractor::{EmotionExtractor, EmotionKeywords};
pub use ending_generator::{EndingGenerator, EndingScript, EndingSeed};
pub use persona_synthesizer::{FinalPersona, PersonaSynthesizer, SynthesisInput};
pub use story_summarizer::{ArcSummary, StorySummarizer, SummaryInput};

use crate::error::GameError;
use crate::llm::LlmClient;
use crate::prompt::Prompt;

/// One generator per AI task. An agent is a pure composition: gather typed
/// context, render prompts, call the gateway, parse the typed result. No
/// side effects beyond the call itself.
#[async_trait::async_trait]
pub trait Agent: Send + Sync {
    const NAME: &'static str;
    type Input: Send + Sync;
    type Output: Send;

    fn model() -> &'static str {
        "google/gemini-2.5-flash"
    }
    fn temperature() -> f32 {
        0.7
    }
    fn max_tokens() -> u32 {
        4096
    }

    fn llm_client(&self) -> &LlmClient;

    fn build_prompt(&self, input: &Self::Input) -> Result<Vec<Prompt>, GameError>;
    fn parse_output(&self, raw: &str) -> Result<Self::Output, GameError>;

    async fn call(&self, input: &Self::Input) -> Result<Self::Output, GameError> {
        tracing::debug!("[Agent::call] {}", Self::NAME);
        let prompts = self.build_prompt(input)?;
        let raw = self
            .llm_client()
            .send(Self::model(), Self::temperature(), Self::max_tokens(), prompts)
            .await?;
        self.parse_output(&raw)
    }
}

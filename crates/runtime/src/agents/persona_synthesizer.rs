use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::agents::character_generator::PersonaProfile;
use crate::agents::Agent;
use crate::error::GameError;
use crate::llm::{parse_structured, LlmClient};
use crate::prompt::Prompt;

/// Aggregate of the whole journey: both analyses, every shard, and a
/// rendered digest of all concluded conversations.
#[derive(Debug, Clone)]
pub struct SynthesisInput {
    pub initial_analysis: String,
    pub ongoing_analysis: String,
    pub emotion_shards: HashMap<String, i64>,
    pub journey_digest: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalPersona {
    /// The player-facing persona text recorded on the analysis.
    pub final_persona: String,
    #[serde(flatten)]
    pub profile: PersonaProfile,
}

/// The terminal generator: distills the entire game into the final persona
/// the player meets on the last night.
#[derive(Clone)]
pub struct PersonaSynthesizer {
    llm: LlmClient,
}

impl PersonaSynthesizer {
    pub fn new(llm: LlmClient) -> Self {
        Self { llm }
    }
}

#[async_trait::async_trait]
impl Agent for PersonaSynthesizer {
    const NAME: &'static str = "persona_synthesizer_v1";
    type Input = SynthesisInput;
    type Output = FinalPersona;

    fn temperature() -> f32 {
        0.8
    }
    fn max_tokens() -> u32 {
        8192
    }

    fn llm_client(&self) -> &LlmClient {
        &self.llm
    }

    fn build_prompt(&self, input: &Self::Input) -> Result<Vec<Prompt>, GameError> {
        let mut shards: Vec<_> = input.emotion_shards.iter().collect();
        shards.sort_by(|a, b| b.1.cmp(a.1).then(a.0.cmp(b.0)));
        let shards = shards
            .iter()
            .map(|(keyword, count)| format!("{} x{}", keyword, count))
            .collect::<Vec<_>>()
            .join(", ");

        let user_prompt = format!(
            "Where the player began:\n{}\n\nWhere the player is now:\n{}\n\n\
             Emotions collected along the way: {}\n\nThe journey:\n{}",
            input.initial_analysis, input.ongoing_analysis, shards, input.journey_digest,
        );

        Ok(vec![
            Prompt::new_system(SYSTEM_PROMPT),
            Prompt::new_user(&user_prompt),
        ])
    }

    fn parse_output(&self, raw: &str) -> Result<Self::Output, GameError> {
        let persona: FinalPersona = parse_structured(raw)?;
        if persona.final_persona.trim().is_empty() {
            return Err(GameError::AiResponseMalformed(
                "final persona text came back empty".to_string(),
            ));
        }
        persona.profile.validate()?;
        Ok(persona)
    }
}

const SYSTEM_PROMPT: &str = r#"The player's journey through the dream world
is complete. From everything you are given, compose two things.

First, the final persona: a direct, warm, second-person portrait of who the
player has been across this journey; the text they will keep.

Second, the last character: an embodiment of that persona as a dream being
the player meets on the final night. It is them, reflected.

Respond with JSON only, in exactly this shape:
{
  "final_persona": "<the second-person portrait>",
  "name": "<the final character's name>",
  "description": "<2-3 sentences of appearance and setting>",
  "problem": "<the concern this being carries, 2-3 sentences>",
  "personality": "<temperament and speech habits, 1-2 sentences>",
  "initial_dialogue": "<the being's opening line to the player>"
}"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_flattened_profile() {
        let synthesizer = PersonaSynthesizer::new(LlmClient::test_default());
        let raw = r#"{
            "final_persona": "You kept returning, even when it hurt.",
            "name": "The Listener",
            "description": "A figure woven from every night sky so far.",
            "problem": "Carries all the stories at once.",
            "personality": "Quiet, certain.",
            "initial_dialogue": "I have been every voice you answered."
        }"#;
        let persona = synthesizer.parse_output(raw).unwrap();
        assert_eq!(persona.profile.name, "The Listener");
        assert!(persona.final_persona.starts_with("You kept"));
    }

    #[test]
    fn empty_persona_text_is_malformed() {
        let synthesizer = PersonaSynthesizer::new(LlmClient::test_default());
        let raw = r#"{
            "final_persona": "",
            "name": "n", "description": "d", "problem": "p",
            "personality": "q", "initial_dialogue": "i"
        }"#;
        assert!(matches!(
            synthesizer.parse_output(raw),
            Err(GameError::AiResponseMalformed(_))
        ));
    }
}

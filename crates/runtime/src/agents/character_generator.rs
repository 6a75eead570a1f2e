use serde::{Deserialize, Serialize};

use crate::agents::Agent;
use crate::error::GameError;
use crate::llm::{parse_structured, LlmClient};
use crate::prompt::Prompt;

#[derive(Debug, Clone)]
pub struct CharacterSeed {
    pub character_element: String,
    pub ongoing_analysis: String,
}

/// The full persona payload a new character needs. Every field is required;
/// a persona with holes must not reach persistence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersonaProfile {
    pub name: String,
    pub description: String,
    pub problem: String,
    pub personality: String,
    pub initial_dialogue: String,
}

impl PersonaProfile {
    pub fn validate(&self) -> Result<(), GameError> {
        let fields = [
            ("name", &self.name),
            ("description", &self.description),
            ("problem", &self.problem),
            ("personality", &self.personality),
            ("initial_dialogue", &self.initial_dialogue),
        ];
        for (field, value) in fields {
            if value.trim().is_empty() {
                return Err(GameError::AiResponseMalformed(format!(
                    "generated persona is missing {}", field
                )));
            }
        }
        Ok(())
    }
}

/// Builds the next night's persona from the deep-analysis hint.
#[derive(Clone)]
pub struct CharacterGenerator {
    llm: LlmClient,
}

impl CharacterGenerator {
    pub fn new(llm: LlmClient) -> Self {
        Self { llm }
    }
}

#[async_trait::async_trait]
impl Agent for CharacterGenerator {
    const NAME: &'static str = "character_generator_v1";
    type Input = CharacterSeed;
    type Output = PersonaProfile;

    fn temperature() -> f32 {
        0.9
    }

    fn llm_client(&self) -> &LlmClient {
        &self.llm
    }

    fn build_prompt(&self, input: &Self::Input) -> Result<Vec<Prompt>, GameError> {
        Ok(vec![
            Prompt::new_system(SYSTEM_PROMPT),
            Prompt::new_user(&format!(
                "Structural element for this persona: {}\n\nPlayer portrait:\n{}",
                input.character_element, input.ongoing_analysis,
            )),
        ])
    }

    fn parse_output(&self, raw: &str) -> Result<Self::Output, GameError> {
        let profile: PersonaProfile = parse_structured(raw)?;
        profile.validate()?;
        Ok(profile)
    }
}

const SYSTEM_PROMPT: &str = r#"You invent storybook characters for a dream
world. Each character is a gentle mirror: its concern echoes something in
the player's portrait without naming the player.

Given a structural element and the portrait, create one character. Keep the
register soft and slightly melancholy, like a quiet picture book.

Respond with JSON only, in exactly this shape:
{
  "name": "<short evocative name>",
  "description": "<2-3 sentences of appearance and setting>",
  "problem": "<the character's core concern, 2-3 sentences>",
  "personality": "<temperament and speech habits, 1-2 sentences>",
  "initial_dialogue": "<the character's opening line to the player>"
}"#;

#[cfg(test)]
mod tests {
    use super::*;

    const FULL: &str = r#"{
        "name": "Maren",
        "description": "A lighthouse keeper of glass.",
        "problem": "Keeps a light burning for ships that stopped coming.",
        "personality": "Formal, wistful.",
        "initial_dialogue": "The lamp is lit. It is always lit."
    }"#;

    #[test]
    fn parses_complete_persona() {
        let generator = CharacterGenerator::new(LlmClient::test_default());
        let profile = generator.parse_output(FULL).unwrap();
        assert_eq!(profile.name, "Maren");
    }

    #[test]
    fn rejects_persona_with_missing_field() {
        let generator = CharacterGenerator::new(LlmClient::test_default());
        let raw = r#"{"name": "Maren", "description": "", "problem": "p", "personality": "q", "initial_dialogue": "r"}"#;
        assert!(matches!(
            generator.parse_output(raw),
            Err(GameError::AiResponseMalformed(_))
        ));
    }

    #[test]
    fn rejects_persona_with_absent_field() {
        let generator = CharacterGenerator::new(LlmClient::test_default());
        let raw = r#"{"name": "Maren"}"#;
        assert!(matches!(
            generator.parse_output(raw),
            Err(GameError::AiResponseMalformed(_))
        ));
    }
}

use serde::{Deserialize, Serialize};

use crate::agents::Agent;
use crate::character::Character;
use crate::error::GameError;
use crate::llm::{parse_structured, LlmClient};
use crate::logs::{ConversationLog, Speaker};
use crate::prompt::Prompt;

#[derive(Debug, Clone)]
pub struct SummaryInput {
    pub character: Character,
    pub full_log: Vec<ConversationLog>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArcSummary {
    pub summary: String,
    pub outcome: String,
}

/// Condenses a concluded arc into the card narrative and an outcome
/// classification.
#[derive(Clone)]
pub struct StorySummarizer {
    llm: LlmClient,
}

impl StorySummarizer {
    pub fn new(llm: LlmClient) -> Self {
        Self { llm }
    }

    fn render_log(log: &[ConversationLog], character_name: &str) -> String {
        log.iter()
            .map(|entry| {
                let speaker = match entry.speaker {
                    Speaker::User => "Player",
                    Speaker::Character => character_name,
                };
                format!("{}: {}", speaker, entry.message)
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[async_trait::async_trait]
impl Agent for StorySummarizer {
    const NAME: &'static str = "story_summarizer_v1";
    type Input = SummaryInput;
    type Output = ArcSummary;

    fn temperature() -> f32 {
        0.5
    }

    fn llm_client(&self) -> &LlmClient {
        &self.llm
    }

    fn build_prompt(&self, input: &Self::Input) -> Result<Vec<Prompt>, GameError> {
        let character = &input.character;
        let system_prompt = SYSTEM_PROMPT
            .replace("{{name}}", &character.name)
            .replace("{{problem}}", &character.problem);

        Ok(vec![
            Prompt::new_system(&system_prompt),
            Prompt::new_user(&format!(
                "Full conversation, in order:\n\n{}",
                Self::render_log(&input.full_log, &character.name)
            )),
        ])
    }

    fn parse_output(&self, raw: &str) -> Result<Self::Output, GameError> {
        let summary: ArcSummary = parse_structured(raw)?;
        if summary.summary.trim().is_empty() || summary.outcome.trim().is_empty() {
            return Err(GameError::AiResponseMalformed(
                "arc summary missing summary or outcome".to_string(),
            ));
        }
        Ok(summary)
    }
}

const SYSTEM_PROMPT: &str = r#"You are the chronicler of a dream world.
The character {{name}} carried this concern: {{problem}}

The character's arc with the player has ended. Summarize what happened
between them as a short storybook passage, then classify how the arc
resolved with a single word: "overcome", "reconciled", or "unresolved".

Respond with JSON only, in exactly this shape:
{
  "summary": "<4-8 sentence storybook passage>",
  "outcome": "<overcome|reconciled|unresolved>"
}"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_rendering_names_both_speakers() {
        let log = vec![
            ConversationLog { speaker: Speaker::User, message: "hi".into(), ..Default::default() },
            ConversationLog { speaker: Speaker::Character, message: "oh".into(), ..Default::default() },
        ];
        let rendered = StorySummarizer::render_log(&log, "Seron");
        assert_eq!(rendered, "Player: hi\nSeron: oh");
    }

    #[test]
    fn parses_summary_payload() {
        let summarizer = StorySummarizer::new(LlmClient::test_default());
        let parsed = summarizer
            .parse_output(r#"{"summary": "They spoke of the cocoon.", "outcome": "overcome"}"#)
            .unwrap();
        assert_eq!(parsed.outcome, "overcome");
    }

    #[test]
    fn missing_outcome_is_malformed() {
        let summarizer = StorySummarizer::new(LlmClient::test_default());
        let err = summarizer
            .parse_output(r#"{"summary": "They spoke.", "outcome": ""}"#)
            .unwrap_err();
        assert!(matches!(err, GameError::AiResponseMalformed(_)));
    }
}

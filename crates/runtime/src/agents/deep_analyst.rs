use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::agents::Agent;
use crate::error::GameError;
use crate::llm::{parse_structured, LlmClient};
use crate::prompt::Prompt;

/// Everything the periodic re-analysis sees: the current running analysis,
/// accumulated shards, a rendered transcript of the most recent material,
/// and the player's fresh psychology answers (empty for counseling-driven
/// refreshes).
#[derive(Debug, Clone)]
pub struct DeepAnalystInput {
    pub ongoing_analysis: String,
    pub emotion_shards: HashMap<String, i64>,
    pub recent_transcript: String,
    pub answers: Vec<(String, String)>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeepAnalysis {
    pub updated_analysis: String,
    /// Structural hint for the next character ("a keeper of an empty
    /// lighthouse", "a fox that hoards apologies", ...).
    #[serde(default)]
    pub character_element: String,
}

/// Rewrites the running player analysis after each day cycle.
#[derive(Clone)]
pub struct DeepAnalyst {
    llm: LlmClient,
}

impl DeepAnalyst {
    pub fn new(llm: LlmClient) -> Self {
        Self { llm }
    }

    fn render_answers(answers: &[(String, String)]) -> String {
        answers
            .iter()
            .map(|(question, answer)| format!("Q: {}\nA: {}", question, answer))
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    fn render_shards(shards: &HashMap<String, i64>) -> String {
        let mut entries: Vec<_> = shards.iter().collect();
        entries.sort_by(|a, b| b.1.cmp(a.1).then(a.0.cmp(b.0)));
        entries
            .iter()
            .map(|(keyword, count)| format!("{} x{}", keyword, count))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

#[async_trait::async_trait]
impl Agent for DeepAnalyst {
    const NAME: &'static str = "deep_analyst_v1";
    type Input = DeepAnalystInput;
    type Output = DeepAnalysis;

    fn temperature() -> f32 {
        0.5
    }

    fn llm_client(&self) -> &LlmClient {
        &self.llm
    }

    fn build_prompt(&self, input: &Self::Input) -> Result<Vec<Prompt>, GameError> {
        let user_prompt = format!(
            "Current analysis:\n{}\n\nCollected emotion shards: {}\n\n\
             Recent material:\n{}\n\nPsychology test answers:\n{}",
            input.ongoing_analysis,
            Self::render_shards(&input.emotion_shards),
            input.recent_transcript,
            Self::render_answers(&input.answers),
        );

        Ok(vec![
            Prompt::new_system(SYSTEM_PROMPT),
            Prompt::new_user(&user_prompt),
        ])
    }

    fn parse_output(&self, raw: &str) -> Result<Self::Output, GameError> {
        let analysis: DeepAnalysis = parse_structured(raw)?;
        if analysis.updated_analysis.trim().is_empty() {
            return Err(GameError::AiResponseMalformed(
                "deep analysis came back empty".to_string(),
            ));
        }
        Ok(analysis)
    }
}

const SYSTEM_PROMPT: &str = r#"You maintain the running psychological
portrait of a player in a narrative game. You receive the current portrait,
the emotions the player has collected, the latest conversation material, and
fresh psychology-test answers.

Rewrite the portrait so it stays a single coherent text: keep what still
holds, revise what the new material contradicts, and fold in what is new.
Then propose one structural element for the next dream character the player
should meet, shaped to press gently on the player's least-examined theme.

Respond with JSON only, in exactly this shape:
{
  "updated_analysis": "<the rewritten portrait>",
  "character_element": "<one-sentence structural hint for the next persona>"
}"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shard_rendering_orders_by_count() {
        let mut shards = HashMap::new();
        shards.insert("grief".to_string(), 3);
        shards.insert("hope".to_string(), 1);
        shards.insert("calm".to_string(), 3);
        assert_eq!(DeepAnalyst::render_shards(&shards), "calm x3, grief x3, hope x1");
    }

    #[test]
    fn parses_analysis_payload() {
        let analyst = DeepAnalyst::new(LlmClient::test_default());
        let parsed = analyst
            .parse_output(
                r#"{"updated_analysis": "The player is opening up.", "character_element": "a clockmaker who fears midnight"}"#,
            )
            .unwrap();
        assert_eq!(parsed.character_element, "a clockmaker who fears midnight");
    }
}

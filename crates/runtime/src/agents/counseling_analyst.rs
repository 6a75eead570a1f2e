use serde::{Deserialize, Serialize};

use crate::agents::Agent;
use crate::error::GameError;
use crate::llm::{parse_structured, LlmClient};
use crate::prompt::Prompt;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CounselingInsight {
    pub analysis: String,
    #[serde(default)]
    pub core_emotions: Vec<String>,
}

/// Turns the initial counseling transcript into the seed player analysis.
#[derive(Clone)]
pub struct CounselingAnalyst {
    llm: LlmClient,
}

impl CounselingAnalyst {
    pub fn new(llm: LlmClient) -> Self {
        Self { llm }
    }
}

#[async_trait::async_trait]
impl Agent for CounselingAnalyst {
    const NAME: &'static str = "counseling_analyst_v1";
    type Input = String;
    type Output = CounselingInsight;

    fn temperature() -> f32 {
        0.4
    }

    fn llm_client(&self) -> &LlmClient {
        &self.llm
    }

    fn build_prompt(&self, transcript: &Self::Input) -> Result<Vec<Prompt>, GameError> {
        Ok(vec![
            Prompt::new_system(SYSTEM_PROMPT),
            Prompt::new_user(&format!("Counseling transcript:\n\n{}", transcript)),
        ])
    }

    fn parse_output(&self, raw: &str) -> Result<Self::Output, GameError> {
        let insight: CounselingInsight = parse_structured(raw)?;
        if insight.analysis.trim().is_empty() {
            return Err(GameError::AiResponseMalformed(
                "counseling analysis came back empty".to_string(),
            ));
        }
        Ok(insight)
    }
}

const SYSTEM_PROMPT: &str = r#"You are the resident counselor of a narrative
psychology game. A new player has just finished their first counseling
session. Read the transcript and write a grounded psychological sketch of the
player: recurring themes, how they relate to others, what they avoid saying,
and the emotional undertow beneath their words.

Be concrete and neutral. Do not diagnose, do not moralize, and do not address
the player directly.

Respond with JSON only, in exactly this shape:
{
  "analysis": "<8-12 sentence psychological sketch>",
  "core_emotions": ["<dominant emotion>", "..."]
}"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_insight_payload() {
        let analyst = CounselingAnalyst::new(LlmClient::test_default());
        let raw = r#"```json
{"analysis": "The player circles loss without naming it.", "core_emotions": ["grief", "longing"]}
```"#;
        let insight = analyst.parse_output(raw).unwrap();
        assert_eq!(insight.core_emotions, vec!["grief", "longing"]);
    }

    #[test]
    fn empty_analysis_is_malformed() {
        let analyst = CounselingAnalyst::new(LlmClient::test_default());
        let err = analyst.parse_output(r#"{"analysis": "  "}"#).unwrap_err();
        assert!(matches!(err, GameError::AiResponseMalformed(_)));
    }
}

use serde::{Deserialize, Serialize};

use crate::agents::Agent;
use crate::error::GameError;
use crate::llm::{parse_structured, LlmClient};
use crate::prompt::Prompt;

/// Everything the ending needs: the persona the player earned and the state
/// of the companion they finished the journey with.
#[derive(Debug, Clone)]
pub struct EndingSeed {
    pub final_persona: String,
    pub character_name: String,
    pub counseling_count: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndingScript {
    pub ending_type: String,
    pub title: String,
    pub content: String,
}

/// Writes the closing scene of a playthrough from the final persona and the
/// last companion's state.
#[derive(Clone)]
pub struct EndingGenerator {
    llm: LlmClient,
}

impl EndingGenerator {
    pub fn new(llm: LlmClient) -> Self {
        Self { llm }
    }
}

#[async_trait::async_trait]
impl Agent for EndingGenerator {
    const NAME: &'static str = "ending_generator_v1";
    type Input = EndingSeed;
    type Output = EndingScript;

    fn temperature() -> f32 {
        0.8
    }

    fn llm_client(&self) -> &LlmClient {
        &self.llm
    }

    fn build_prompt(&self, seed: &Self::Input) -> Result<Vec<Prompt>, GameError> {
        let user_prompt = format!(
            "The player's final persona:\n{}\n\nTheir last companion was {}, \
             who grew past their starting state over {} conversations.",
            seed.final_persona, seed.character_name, seed.counseling_count,
        );
        Ok(vec![
            Prompt::new_system(SYSTEM_PROMPT),
            Prompt::new_user(&user_prompt),
        ])
    }

    fn parse_output(&self, raw: &str) -> Result<Self::Output, GameError> {
        let script: EndingScript = parse_structured(raw)?;
        if script.ending_type.trim().is_empty()
            || script.title.trim().is_empty()
            || script.content.trim().is_empty()
        {
            return Err(GameError::AiResponseMalformed(
                "ending script came back incomplete".to_string(),
            ));
        }
        Ok(script)
    }
}

const SYSTEM_PROMPT: &str = r#"The player has finished their last conversation
in the dream world. Write the ending they wake up to: a short closing scene
that honors who they became, and a title for it.

Classify the ending as one of: Good, Bad, Hidden.

Respond with JSON only, in exactly this shape:
{
  "ending_type": "<Good | Bad | Hidden>",
  "title": "<the ending's title>",
  "content": "<4-8 sentence closing scene, second person>"
}"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_ending_script() {
        let generator = EndingGenerator::new(LlmClient::test_default());
        let raw = r#"```json
{"ending_type": "Good", "title": "The Morning After", "content": "You wake, and the forest lets you go."}
```"#;
        let script = generator.parse_output(raw).unwrap();
        assert_eq!(script.ending_type, "Good");
        assert_eq!(script.title, "The Morning After");
    }

    #[test]
    fn incomplete_script_is_malformed() {
        let generator = EndingGenerator::new(LlmClient::test_default());
        let raw = r#"{"ending_type": "Good", "title": "", "content": "x"}"#;
        assert!(matches!(
            generator.parse_output(raw),
            Err(GameError::AiResponseMalformed(_))
        ));
    }
}

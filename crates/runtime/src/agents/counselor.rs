use crate::agents::Agent;
use crate::error::GameError;
use crate::llm::LlmClient;
use crate::logs::{CounselingLog, CounselingSpeaker};
use crate::prompt::Prompt;

#[derive(Debug, Clone)]
pub struct CounselorInput {
    pub recent_history: Vec<CounselingLog>,
    pub user_message: String,
}

/// The ongoing counseling voice: a plain, out-of-fiction counselor the
/// player can talk to between nights.
#[derive(Clone)]
pub struct Counselor {
    llm: LlmClient,
}

impl Counselor {
    pub fn new(llm: LlmClient) -> Self {
        Self { llm }
    }
}

#[async_trait::async_trait]
impl Agent for Counselor {
    const NAME: &'static str = "counselor_v1";
    type Input = CounselorInput;
    type Output = String;

    fn temperature() -> f32 {
        0.6
    }
    fn max_tokens() -> u32 {
        1024
    }

    fn llm_client(&self) -> &LlmClient {
        &self.llm
    }

    fn build_prompt(&self, input: &Self::Input) -> Result<Vec<Prompt>, GameError> {
        let mut prompts = vec![Prompt::new_system(SYSTEM_PROMPT)];

        for entry in &input.recent_history {
            prompts.push(match entry.speaker {
                CounselingSpeaker::User => Prompt::new_user(&entry.message),
                CounselingSpeaker::Counselor => Prompt::new_assistant(&entry.message),
            });
        }

        prompts.push(Prompt::new_user(&input.user_message));
        Ok(prompts)
    }

    fn parse_output(&self, raw: &str) -> Result<Self::Output, GameError> {
        let reply = raw.trim();
        if reply.is_empty() {
            return Err(GameError::AiResponseMalformed(
                "counselor reply came back empty".to_string(),
            ));
        }
        Ok(reply.to_string())
    }
}

const SYSTEM_PROMPT: &str = r#"You are the counselor of a narrative
psychology game, speaking with the player between their dream sessions.
You are warm but unhurried: reflect what the player says, ask one careful
question at a time, and never push an interpretation. Keep replies short,
plain prose without lists or emoji."#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn history_precedes_new_message() {
        let input = CounselorInput {
            recent_history: vec![
                CounselingLog::new(Default::default(), CounselingSpeaker::User, "hello", false),
                CounselingLog::new(Default::default(), CounselingSpeaker::Counselor, "welcome back", false),
            ],
            user_message: "rough day".into(),
        };
        let counselor = Counselor::new(LlmClient::test_default());
        let prompts = counselor.build_prompt(&input).unwrap();
        assert_eq!(prompts.len(), 4);
        assert_eq!(prompts[3].content, "rough day");
    }
}

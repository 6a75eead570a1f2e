use crate::agents::Agent;
use crate::character::Character;
use crate::error::GameError;
use crate::llm::LlmClient;
use crate::logs::{ConversationLog, Speaker};
use crate::prompt::Prompt;

/// Context for one in-character reply: the persona, a bounded tail of the
/// conversation, and the message being answered.
#[derive(Debug, Clone)]
pub struct DialogueContext {
    pub character: Character,
    pub recent_history: Vec<ConversationLog>,
    pub user_message: String,
    pub current_day: i64,
}

/// Produces the character's next line. The one free-text agent; everything
/// else in the pipeline returns structured data.
#[derive(Clone)]
pub struct DialogueAgent {
    llm: LlmClient,
}

impl DialogueAgent {
    pub fn new(llm: LlmClient) -> Self {
        Self { llm }
    }
}

#[async_trait::async_trait]
impl Agent for DialogueAgent {
    const NAME: &'static str = "dialogue_v1";
    type Input = DialogueContext;
    type Output = String;

    fn temperature() -> f32 {
        0.9
    }
    fn max_tokens() -> u32 {
        1024
    }

    fn llm_client(&self) -> &LlmClient {
        &self.llm
    }

    fn build_prompt(&self, input: &Self::Input) -> Result<Vec<Prompt>, GameError> {
        let character = &input.character;
        let system_prompt = SYSTEM_PROMPT
            .replace("{{name}}", &character.name)
            .replace("{{description}}", &character.description)
            .replace("{{problem}}", &character.problem)
            .replace("{{personality}}", &character.personality)
            .replace("{{current_day}}", &input.current_day.to_string());

        let mut prompts = vec![Prompt::new_system(&system_prompt)];

        if input.recent_history.is_empty() {
            // the scripted opening line anchors a fresh conversation
            prompts.push(Prompt::new_assistant(&character.initial_dialogue));
        }

        for entry in &input.recent_history {
            prompts.push(match entry.speaker {
                Speaker::User => Prompt::new_user(&entry.message),
                Speaker::Character => Prompt::new_assistant(&entry.message),
            });
        }

        prompts.push(Prompt::new_user(&input.user_message));
        Ok(prompts)
    }

    fn parse_output(&self, raw: &str) -> Result<Self::Output, GameError> {
        let reply = raw.trim();
        if reply.is_empty() {
            return Err(GameError::AiResponseMalformed(
                "dialogue reply came back empty".to_string(),
            ));
        }
        Ok(reply.to_string())
    }
}

const SYSTEM_PROMPT: &str = r#"You are {{name}}, a being living inside a
player's dream. {{description}}

Your core concern: {{problem}}
Your personality: {{personality}}
It is night {{current_day}} of the dream.

Stay in character without exception. You do not know you are generated; you
are simply {{name}}, and the player is a presence that appears in your world
at night. Speak in your own voice, keep replies to a few sentences, share
your concern gradually rather than resolving it on demand, and react from
your own judgment rather than deferring to the player. Never use emoji, and
never break the fiction."#;

#[cfg(test)]
mod tests {
    use super::*;
    use somnia_common::CryptoHash;

    use crate::character::CharacterStatus;

    fn context(history: Vec<ConversationLog>) -> DialogueContext {
        let mut character = Character::new(CryptoHash::random(), CharacterStatus::Ongoing);
        character.name = "Seron".into();
        character.initial_dialogue = "Oh... you can see me?".into();
        DialogueContext {
            character,
            recent_history: history,
            user_message: "I feel lost".into(),
            current_day: 1,
        }
    }

    #[test]
    fn fresh_conversation_injects_opening_line() {
        let agent = DialogueAgent::new(LlmClient::test_default());
        let prompts = agent.build_prompt(&context(vec![])).unwrap();
        // system, scripted opener, then the user's message
        assert_eq!(prompts.len(), 3);
        assert_eq!(prompts[1].content, "Oh... you can see me?");
    }

    #[test]
    fn history_is_replayed_in_order() {
        let history = vec![
            ConversationLog { speaker: Speaker::User, message: "hi".into(), turn: 1, ..Default::default() },
            ConversationLog { speaker: Speaker::Character, message: "hello".into(), turn: 2, ..Default::default() },
        ];
        let agent = DialogueAgent::new(LlmClient::test_default());
        let prompts = agent.build_prompt(&context(history)).unwrap();
        assert_eq!(prompts.len(), 4);
        assert_eq!(prompts[1].content, "hi");
        assert_eq!(prompts[2].content, "hello");
        assert_eq!(prompts[3].content, "I feel lost");
    }

    #[test]
    fn blank_reply_is_malformed() {
        let agent = DialogueAgent::new(LlmClient::test_default());
        assert!(matches!(
            agent.parse_output("   \n"),
            Err(GameError::AiResponseMalformed(_))
        ));
    }
}

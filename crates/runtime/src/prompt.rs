use anyhow::Result;
use async_openai::types::{
    ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
    ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
};
use serde::{Deserialize, Serialize};

use crate::error::GameError;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PromptRole {
    System,
    User,
    Assistant,
}

/// One message destined for the model gateway, before packing into the
/// wire format.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Prompt {
    pub role: PromptRole,
    pub content: String,
}

impl Prompt {
    pub fn new_system(content: &str) -> Self {
        Self { role: PromptRole::System, content: content.to_string() }
    }

    pub fn new_user(content: &str) -> Self {
        Self { role: PromptRole::User, content: content.to_string() }
    }

    pub fn new_assistant(content: &str) -> Self {
        Self { role: PromptRole::Assistant, content: content.to_string() }
    }

    pub fn pack(prompts: Vec<Prompt>) -> Result<Vec<ChatCompletionRequestMessage>, GameError> {
        prompts
            .into_iter()
            .map(|prompt| {
                let message = match prompt.role {
                    PromptRole::System => ChatCompletionRequestMessage::System(
                        ChatCompletionRequestSystemMessageArgs::default()
                            .content(prompt.content)
                            .build()
                            .map_err(|e| GameError::AiGateway(e.to_string()))?,
                    ),
                    PromptRole::User => ChatCompletionRequestMessage::User(
                        ChatCompletionRequestUserMessageArgs::default()
                            .content(prompt.content)
                            .build()
                            .map_err(|e| GameError::AiGateway(e.to_string()))?,
                    ),
                    PromptRole::Assistant => ChatCompletionRequestMessage::Assistant(
                        ChatCompletionRequestAssistantMessageArgs::default()
                            .content(prompt.content)
                            .build()
                            .map_err(|e| GameError::AiGateway(e.to_string()))?,
                    ),
                };
                Ok(message)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pack_preserves_order_and_roles() {
        let packed = Prompt::pack(vec![
            Prompt::new_system("sys"),
            Prompt::new_user("hi"),
            Prompt::new_assistant("hello"),
        ])
        .unwrap();
        assert_eq!(packed.len(), 3);
        assert!(matches!(packed[0], ChatCompletionRequestMessage::System(_)));
        assert!(matches!(packed[1], ChatCompletionRequestMessage::User(_)));
        assert!(matches!(packed[2], ChatCompletionRequestMessage::Assistant(_)));
    }
}

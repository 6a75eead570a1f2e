use std::time::Duration;

use async_openai::config::OpenAIConfig;
use async_openai::types::CreateChatCompletionRequestArgs;
use async_openai::Client;
use serde::de::DeserializeOwned;
use somnia_common::EnvVars;

use crate::env::LlmEnv;
use crate::error::GameError;
use crate::prompt::Prompt;

/// Thin wrapper around the OpenAI-compatible chat endpoint. Every request is
/// bounded by a timeout so a hung gateway fails the transition cleanly.
#[derive(Clone)]
pub struct LlmClient {
    client: Client<OpenAIConfig>,
    timeout: Duration,
}

impl LlmClient {
    pub fn new() -> Self {
        let env = LlmEnv::load();
        let config = OpenAIConfig::new()
            .with_api_key(env.llm_api_key)
            .with_api_base(env.llm_base_url);

        let client = Client::build(reqwest::Client::new(), config, Default::default());

        Self {
            client,
            timeout: Duration::from_secs(env.llm_timeout_secs),
        }
    }

    pub async fn send(
        &self,
        model: &str,
        temperature: f32,
        max_tokens: u32,
        prompts: Vec<Prompt>,
    ) -> Result<String, GameError> {
        if prompts.is_empty() {
            return Err(GameError::AiGateway("no prompts to send".to_string()));
        }

        let messages = Prompt::pack(prompts)?;
        let request = CreateChatCompletionRequestArgs::default()
            .model(model)
            .messages(messages)
            .temperature(temperature)
            .max_tokens(max_tokens)
            .build()
            .map_err(|e| GameError::AiGateway(e.to_string()))?;

        let response = tokio::time::timeout(self.timeout, self.client.chat().create(request))
            .await
            .map_err(|_| {
                GameError::AiGateway(format!(
                    "model {} timed out after {:?}", model, self.timeout
                ))
            })?
            .map_err(|e| GameError::AiGateway(e.to_string()))?;

        let choice = response
            .choices
            .first()
            .ok_or_else(|| GameError::AiGateway(format!("model {} returned no choices", model)))?;

        if let Some(refusal) = &choice.message.refusal {
            return Err(GameError::AiGateway(format!("model {} refused: {}", model, refusal)));
        }

        choice
            .message
            .content
            .clone()
            .filter(|content| !content.trim().is_empty())
            .ok_or_else(|| GameError::AiGateway(format!("model {} returned no content", model)))
    }
}

impl Default for LlmClient {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
impl LlmClient {
    /// Env-independent constructor for unit tests that never hit the wire.
    pub(crate) fn test_default() -> Self {
        std::env::set_var("LLM_API_KEY", "test-key");
        Self::new()
    }
}

/// Strips the incidental formatting models wrap around JSON payloads:
/// markdown code fences, a leading language tag, surrounding prose up to the
/// outermost brace pair.
pub fn strip_structured_payload(raw: &str) -> &str {
    let trimmed = raw.trim();

    let defenced = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.strip_suffix("```"))
        .map(str::trim)
        .unwrap_or(trimmed);

    // fall back to the outermost {...} or [...] span
    let open = defenced.find(|c| c == '{' || c == '[');
    let close = defenced.rfind(|c| c == '}' || c == ']');
    match (open, close) {
        (Some(start), Some(end)) if start < end => &defenced[start..=end],
        _ => defenced,
    }
}

/// Parses a structured gateway response, treating failure as its own error
/// kind and keeping the offending payload for diagnosis.
pub fn parse_structured<T: DeserializeOwned>(raw: &str) -> Result<T, GameError> {
    let payload = strip_structured_payload(raw);
    serde_json::from_str(payload).map_err(|e| {
        tracing::warn!("structured response failed to parse: {} | payload: {}", e, raw);
        GameError::AiResponseMalformed(format!("{} | payload: {}", e, payload))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Sample {
        name: String,
        count: i64,
    }

    #[test]
    fn parses_bare_json() {
        let parsed: Sample = parse_structured(r#"{"name": "seron", "count": 2}"#).unwrap();
        assert_eq!(parsed, Sample { name: "seron".into(), count: 2 });
    }

    #[test]
    fn parses_fenced_json() {
        let raw = "```json\n{\"name\": \"seron\", \"count\": 2}\n```";
        let parsed: Sample = parse_structured(raw).unwrap();
        assert_eq!(parsed.count, 2);
    }

    #[test]
    fn parses_json_wrapped_in_prose() {
        let raw = "Here is the result:\n{\"name\": \"seron\", \"count\": 3}\nHope that helps!";
        let parsed: Sample = parse_structured(raw).unwrap();
        assert_eq!(parsed.count, 3);
    }

    #[test]
    fn malformed_payload_is_a_distinct_error() {
        let err = parse_structured::<Sample>("not json at all").unwrap_err();
        assert!(matches!(err, GameError::AiResponseMalformed(_)));
    }

    #[test]
    fn strip_keeps_arrays() {
        assert_eq!(strip_structured_payload("```\n[1, 2]\n```"), "[1, 2]");
    }
}

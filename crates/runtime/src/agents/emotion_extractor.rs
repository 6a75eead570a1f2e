use serde::{Deserialize, Serialize};

use crate::agents::Agent;
use crate::error::GameError;
use crate::llm::{parse_structured, LlmClient};
use crate::prompt::Prompt;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmotionKeywords {
    pub keywords: Vec<String>,
}

/// Pulls collectible emotion keywords out of a concluded arc's summary.
/// Zero keywords is a legal result; a malformed payload is not.
#[derive(Clone)]
pub struct EmotionExtractor {
    llm: LlmClient,
}

impl EmotionExtractor {
    pub fn new(llm: LlmClient) -> Self {
        Self { llm }
    }
}

#[async_trait::async_trait]
impl Agent for EmotionExtractor {
    const NAME: &'static str = "emotion_extractor_v1";
    type Input = String;
    type Output = EmotionKeywords;

    fn temperature() -> f32 {
        0.3
    }
    fn max_tokens() -> u32 {
        512
    }

    fn llm_client(&self) -> &LlmClient {
        &self.llm
    }

    fn build_prompt(&self, summary: &Self::Input) -> Result<Vec<Prompt>, GameError> {
        Ok(vec![
            Prompt::new_system(SYSTEM_PROMPT),
            Prompt::new_user(&format!("Arc summary:\n\n{}", summary)),
        ])
    }

    fn parse_output(&self, raw: &str) -> Result<Self::Output, GameError> {
        let mut extracted: EmotionKeywords = parse_structured(raw)?;
        extracted.keywords = extracted
            .keywords
            .iter()
            .map(|k| k.trim().to_lowercase())
            .filter(|k| !k.is_empty())
            .collect();
        Ok(extracted)
    }
}

const SYSTEM_PROMPT: &str = r#"Extract the emotional essence of this story
arc. Name between one and four emotions that defined it, each as a single
lowercase word (e.g. "grief", "relief", "longing").

Respond with JSON only, in exactly this shape:
{
  "keywords": ["<emotion>", "..."]
}"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_keywords() {
        let extractor = EmotionExtractor::new(LlmClient::test_default());
        let parsed = extractor
            .parse_output(r#"{"keywords": [" Grief ", "", "hope"]}"#)
            .unwrap();
        assert_eq!(parsed.keywords, vec!["grief", "hope"]);
    }

    #[test]
    fn empty_list_is_legal() {
        let extractor = EmotionExtractor::new(LlmClient::test_default());
        let parsed = extractor.parse_output(r#"{"keywords": []}"#).unwrap();
        assert!(parsed.keywords.is_empty());
    }
}

//! services/processor/src/adapters/gemini_analysis.rs
//!
//! The Gemini analysis provider. Unlike the other two it is asked for a JSON
//! object, and an answer that does not contain one is treated as unusable.

use async_openai::{config::OpenAIConfig, Client};
use async_trait::async_trait;
use chrono::Utc;
use session_insight_core::{
    domain::{AnalysisResult, ProviderId},
    ports::{AnalysisProvider, ProviderError},
};

use super::chat::{self, ChatRequest, JSON_INSTRUCTIONS};

const MAX_OUTPUT_TOKENS: u32 = 2000;
const TEMPERATURE: f32 = 0.3;
const MAX_INPUT_CHARS: usize = 200_000;

/// An adapter that implements `AnalysisProvider` for Gemini models.
#[derive(Clone)]
pub struct GeminiAnalysisAdapter {
    client: Client<OpenAIConfig>,
    model: String,
}

impl GeminiAnalysisAdapter {
    pub fn new(client: Client<OpenAIConfig>, model: String) -> Self {
        Self { client, model }
    }
}

#[async_trait]
impl AnalysisProvider for GeminiAnalysisAdapter {
    fn provider_id(&self) -> ProviderId {
        ProviderId::Gemini
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn analyze(&self, text: &str, owner_hint: &str) -> Result<AnalysisResult, ProviderError> {
        let request = ChatRequest {
            system: JSON_INSTRUCTIONS,
            user: chat::session_prompt(text, owner_hint, MAX_INPUT_CHARS),
            max_tokens: MAX_OUTPUT_TOKENS,
            temperature: TEMPERATURE,
        };
        let answer = chat::complete(&self.client, &self.model, request).await?;

        Ok(AnalysisResult {
            provider_id: ProviderId::Gemini,
            raw_output: extract_json_object(&answer)?,
            model: Some(self.model.clone()),
            produced_at: Utc::now(),
        })
    }
}

/// Pulls the JSON object out of an answer, tolerating code fences and chatter
/// around it.
fn extract_json_object(answer: &str) -> Result<String, ProviderError> {
    let (start, end) = match (answer.find('{'), answer.rfind('}')) {
        (Some(start), Some(end)) if start < end => (start, end),
        _ => {
            return Err(ProviderError::EmptyResponse(
                "answer did not contain a JSON object".to_string(),
            ))
        }
    };
    let candidate = &answer[start..=end];
    match serde_json::from_str::<serde_json::Value>(candidate) {
        Ok(serde_json::Value::Object(_)) => Ok(candidate.to_string()),
        _ => Err(ProviderError::EmptyResponse(
            "answer contained malformed JSON".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_is_extracted_from_fenced_answers() {
        let answer = "Here you go:\n```json\n{\"client_mood\": 6, \"key_topics\": [\"sleep\"]}\n```";
        let json = extract_json_object(answer).unwrap();
        assert_eq!(json, "{\"client_mood\": 6, \"key_topics\": [\"sleep\"]}");
    }

    #[test]
    fn answers_without_json_are_rejected_as_transient() {
        let err = extract_json_object("I cannot help with that.").unwrap_err();
        assert!(err.is_transient());
        assert!(extract_json_object("{not json}").is_err());
    }
}

//! services/processor/src/adapters/anthropic_analysis.rs
//!
//! The Anthropic analysis provider, reached through Anthropic's OpenAI-compatible
//! endpoint. Claude models accept longer transcripts and a larger output budget.

use async_openai::{config::OpenAIConfig, Client};
use async_trait::async_trait;
use chrono::Utc;
use session_insight_core::{
    domain::{AnalysisResult, ProviderId},
    ports::{AnalysisProvider, ProviderError},
};

use super::chat::{self, ChatRequest, NOTE_INSTRUCTIONS};

const MAX_OUTPUT_TOKENS: u32 = 8192;
const TEMPERATURE: f32 = 0.2;
const MAX_INPUT_CHARS: usize = 400_000;

/// An adapter that implements `AnalysisProvider` for Claude models.
#[derive(Clone)]
pub struct AnthropicAnalysisAdapter {
    client: Client<OpenAIConfig>,
    model: String,
}

impl AnthropicAnalysisAdapter {
    pub fn new(client: Client<OpenAIConfig>, model: String) -> Self {
        Self { client, model }
    }
}

#[async_trait]
impl AnalysisProvider for AnthropicAnalysisAdapter {
    fn provider_id(&self) -> ProviderId {
        ProviderId::Anthropic
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn analyze(&self, text: &str, owner_hint: &str) -> Result<AnalysisResult, ProviderError> {
        let request = ChatRequest {
            system: NOTE_INSTRUCTIONS,
            user: chat::session_prompt(text, owner_hint, MAX_INPUT_CHARS),
            max_tokens: MAX_OUTPUT_TOKENS,
            temperature: TEMPERATURE,
        };
        let note = chat::complete(&self.client, &self.model, request).await?;

        Ok(AnalysisResult {
            provider_id: ProviderId::Anthropic,
            raw_output: note.trim().to_string(),
            model: Some(self.model.clone()),
            produced_at: Utc::now(),
        })
    }
}

//! services/processor/src/adapters/openai_analysis.rs
//!
//! The OpenAI analysis provider. It implements the `AnalysisProvider` port from
//! the `core` crate and answers with a labelled progress note.

use async_openai::{config::OpenAIConfig, Client};
use async_trait::async_trait;
use chrono::Utc;
use session_insight_core::{
    domain::{AnalysisResult, ProviderId},
    ports::{AnalysisProvider, ProviderError},
};

use super::chat::{self, ChatRequest, NOTE_INSTRUCTIONS};

const MAX_OUTPUT_TOKENS: u32 = 4096;
const TEMPERATURE: f32 = 0.2;
const MAX_INPUT_CHARS: usize = 120_000;

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// An adapter that implements `AnalysisProvider` using the OpenAI chat API.
#[derive(Clone)]
pub struct OpenAiAnalysisAdapter {
    client: Client<OpenAIConfig>,
    model: String,
}

impl OpenAiAnalysisAdapter {
    /// Creates a new `OpenAiAnalysisAdapter`.
    pub fn new(client: Client<OpenAIConfig>, model: String) -> Self {
        Self { client, model }
    }
}

//=========================================================================================
// `AnalysisProvider` Trait Implementation
//=========================================================================================

#[async_trait]
impl AnalysisProvider for OpenAiAnalysisAdapter {
    fn provider_id(&self) -> ProviderId {
        ProviderId::OpenAi
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
            provider_id: ProviderId::OpenAi,
            raw_output: note.trim().to_string(),
            model: Some(self.model.clone()),
            produced_at: Utc::now(),
        })
    }
}

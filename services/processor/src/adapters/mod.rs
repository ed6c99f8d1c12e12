pub mod anthropic_analysis;
pub mod chat;
pub mod db;
pub mod exporter;
pub mod gemini_analysis;
pub mod memory;
pub mod openai_analysis;

pub use anthropic_analysis::AnthropicAnalysisAdapter;
pub use db::DbAdapter;
pub use exporter::TracingExporter;
pub use gemini_analysis::GeminiAnalysisAdapter;
pub use memory::InMemoryStore;
pub use openai_analysis::OpenAiAnalysisAdapter;

use crate::config::{Config, ProviderSettings};
use async_openai::{config::OpenAIConfig, Client};
use session_insight_core::domain::ProviderId;
use session_insight_core::ports::AnalysisProvider;
use std::sync::Arc;

fn client_for(settings: &ProviderSettings, api_key: &str) -> Client<OpenAIConfig> {
    let mut config = OpenAIConfig::new().with_api_key(api_key);
    if let Some(base) = &settings.api_base {
        config = config.with_api_base(base);
    }
    Client::with_config(config)
}

/// Builds a client for every provider that has an API key.
pub fn configured_providers(config: &Config) -> Vec<Arc<dyn AnalysisProvider>> {
    ProviderId::ALL
        .into_iter()
        .filter_map(|id| {
            let settings = config.provider(id);
            let key = settings.api_key.as_deref()?;
            let client = client_for(settings, key);
            let model = settings.model.clone();
            let provider: Arc<dyn AnalysisProvider> = match id {
                ProviderId::OpenAi => Arc::new(OpenAiAnalysisAdapter::new(client, model)),
                ProviderId::Anthropic => Arc::new(AnthropicAnalysisAdapter::new(client, model)),
                ProviderId::Gemini => Arc::new(GeminiAnalysisAdapter::new(client, model)),
            };
            Some(provider)
        })
        .collect()
}

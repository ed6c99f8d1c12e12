//! services/processor/src/engine/gateway.rs
//!
//! Fans a document out to its analysis providers. Each provider call goes
//! through the rate limiter, a per-call timeout and the retry policy, and every
//! attempt is written to the audit log. One provider failing never affects the
//! others; the caller receives an outcome per provider.

use futures::future::join_all;
use serde_json::json;
use session_insight_core::domain::{ActivityType, AnalysisResult, Document, LogEntry, ProviderId};
use session_insight_core::ports::{AnalysisProvider, DocumentStore, ProviderError};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{error, info, warn};

use super::rate_limit::CallLimiter;
use super::retry::RetryPolicy;

pub type ProviderOutcomes = BTreeMap<ProviderId, Result<AnalysisResult, ProviderError>>;

#[derive(Debug, Clone)]
pub struct GatewaySettings {
    pub call_timeout: Duration,
    pub retry: RetryPolicy,
}

/// Availability of one provider as reported by `/providers`.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderStatus {
    pub provider: ProviderId,
    pub available: bool,
    pub model: Option<String>,
}

pub struct ProviderGateway {
    providers: BTreeMap<ProviderId, Arc<dyn AnalysisProvider>>,
    limiter: Arc<dyn CallLimiter>,
    store: Arc<dyn DocumentStore>,
    settings: GatewaySettings,
}

impl ProviderGateway {
    pub fn new(
        providers: Vec<Arc<dyn AnalysisProvider>>,
        limiter: Arc<dyn CallLimiter>,
        store: Arc<dyn DocumentStore>,
        settings: GatewaySettings,
    ) -> Self {
        let providers = providers
            .into_iter()
            .map(|p| (p.provider_id(), p))
            .collect();
        Self {
            providers,
            limiter,
            store,
            settings,
        }
    }

    /// Configured providers in provider order.
    pub fn configured(&self) -> Vec<ProviderId> {
        self.providers.keys().copied().collect()
    }

    pub fn is_available(&self, provider: ProviderId) -> bool {
        self.providers.contains_key(&provider)
    }

    pub fn availability(&self) -> Vec<ProviderStatus> {
        ProviderId::ALL
            .into_iter()
            .map(|provider| ProviderStatus {
                provider,
                available: self.is_available(provider),
                model: self.providers.get(&provider).map(|p| p.model().to_string()),
            })
            .collect()
    }

    /// Calls the given providers concurrently and collects one outcome each.
    pub async fn analyze(&self, doc: &Document, owner_hint: &str, providers: &[ProviderId]) -> ProviderOutcomes {
        let calls = providers.iter().map(|provider| async move {
            (*provider, self.call_provider(doc, owner_hint, *provider).await)
        });
        join_all(calls).await.into_iter().collect()
    }

    async fn call_provider(
        &self,
        doc: &Document,
        owner_hint: &str,
        provider: ProviderId,
    ) -> Result<AnalysisResult, ProviderError> {
        let Some(client) = self.providers.get(&provider) else {
            let err = ProviderError::NotConfigured(provider);
            self.record_attempt(doc.id, provider, None, 1, Duration::ZERO, &Err(err.clone()), false)
                .await;
            return Err(err);
        };

        let mut attempt = 0;
        loop {
            attempt += 1;
            self.limiter.acquire(provider).await;

            let started = Instant::now();
            let outcome = match tokio::time::timeout(
                self.settings.call_timeout,
                client.analyze(&doc.content, owner_hint),
            )
            .await
            {
                Ok(Ok(mut result)) => {
                    result.provider_id = provider;
                    Ok(result)
                }
                Ok(Err(e)) => Err(e),
                Err(_) => Err(ProviderError::Timeout),
            };
            let elapsed = started.elapsed();

            let will_retry = matches!(&outcome, Err(e) if e.is_transient())
                && self.settings.retry.allows_another(attempt);
            self.record_attempt(doc.id, provider, Some(client.model()), attempt, elapsed, &outcome, will_retry)
                .await;

            match outcome {
                Ok(result) => return Ok(result),
                Err(e) if will_retry => {
                    let delay = self.settings.retry.delay_for(attempt);
                    warn!(
                        document_id = %doc.id,
                        provider = %provider,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "Transient provider failure, retrying: {}",
                        e
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) if e.is_transient() => {
                    return Err(ProviderError::RetriesExhausted {
                        attempts: attempt,
                        last: Box::new(e),
                    })
                }
                Err(e) => return Err(e),
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn record_attempt(
        &self,
        document_id: uuid::Uuid,
        provider: ProviderId,
        model: Option<&str>,
        attempt: u32,
        elapsed: Duration,
        outcome: &Result<AnalysisResult, ProviderError>,
        will_retry: bool,
    ) {
        let metadata = json!({
            "provider": provider.as_str(),
            "model": model,
            "attempt": attempt,
            "elapsed_ms": elapsed.as_millis() as u64,
            "error_kind": outcome.as_ref().err().map(|e| e.kind()),
        });
        let entry = match outcome {
            Ok(result) => {
                info!(%document_id, provider = %provider, attempt, "Provider analysis succeeded");
                LogEntry::success(
                    Some(document_id),
                    ActivityType::ProviderCall,
                    format!("{} returned {} characters", provider, result.raw_output.len()),
                )
            }
            Err(e) if will_retry => LogEntry::warning(
                Some(document_id),
                ActivityType::ProviderCall,
                format!("{} attempt {} failed, will retry", provider, attempt),
                Some(e.to_string()),
            ),
            Err(e) => {
                error!(%document_id, provider = %provider, attempt, "Provider analysis failed: {}", e);
                LogEntry::failure(
                    Some(document_id),
                    ActivityType::ProviderCall,
                    format!("{} attempt {} failed", provider, attempt),
                    e.to_string(),
                )
            }
        }
        .with_metadata(metadata);

        if let Err(e) = self.store.append_log(&entry).await {
            error!(%document_id, "Failed to write provider call log: {}", e);
        }
    }
}

//! crates/session_insight_core/src/ports.rs
//!
//! Defines the service contracts (traits) for the engine's core logic.
//! These traits form the boundary of the hexagonal architecture, allowing the core
//! to be independent of specific provider APIs, databases or export targets.

use async_trait::async_trait;
use std::collections::HashMap;
use uuid::Uuid;

use crate::domain::{
    AnalysisResult, ConsolidatedInsight, CoverageStats, Document, DocumentStatus, LogEntry, Owner,
    ProviderId,
};

//=========================================================================================
// Generic Port Error and Result Types
//=========================================================================================

/// A generic error type for storage and exporter operations.
/// This abstracts away the specific errors from external services (e.g., database, network).
#[derive(Debug, thiserror::Error)]
pub enum PortError {
    #[error("Item not found: {0}")]
    NotFound(String),
    #[error("Conflicting write: {0}")]
    Conflict(String),
    #[error("An unexpected error occurred: {0}")]
    Unexpected(String),
}

/// A convenience type alias for `Result<T, PortError>`.
pub type PortResult<T> = Result<T, PortError>;

//=========================================================================================
// Provider Errors
//=========================================================================================

/// Failure of a single provider call.
///
/// The variant decides whether the call is retried: transient errors are, permanent
/// errors are not. `RetriesExhausted` closes a pass for one provider without
/// condemning the document.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProviderError {
    #[error("provider call timed out")]
    Timeout,
    #[error("rate limited: {0}")]
    RateLimited(String),
    #[error("provider server error: {0}")]
    Server(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("provider returned no usable content: {0}")]
    EmptyResponse(String),
    #[error("authentication failed: {0}")]
    Auth(String),
    #[error("malformed request: {0}")]
    InvalidRequest(String),
    #[error("rejected by content policy: {0}")]
    PolicyRejected(String),
    #[error("provider {0} has no configured client")]
    NotConfigured(ProviderId),
    #[error("gave up after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: Box<ProviderError> },
}

impl ProviderError {
    /// Worth another attempt within the same pass.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ProviderError::Timeout
                | ProviderError::RateLimited(_)
                | ProviderError::Server(_)
                | ProviderError::Network(_)
                | ProviderError::EmptyResponse(_)
        )
    }

    /// Will not succeed on retry; counts toward failing the document.
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            ProviderError::Auth(_)
                | ProviderError::InvalidRequest(_)
                | ProviderError::PolicyRejected(_)
                | ProviderError::NotConfigured(_)
        )
    }

    /// Short machine-readable tag for audit metadata.
    pub fn kind(&self) -> &'static str {
        match self {
            ProviderError::Timeout => "timeout",
            ProviderError::RateLimited(_) => "rate_limited",
            ProviderError::Server(_) => "server",
            ProviderError::Network(_) => "network",
            ProviderError::EmptyResponse(_) => "empty_response",
            ProviderError::Auth(_) => "auth",
            ProviderError::InvalidRequest(_) => "invalid_request",
            ProviderError::PolicyRejected(_) => "policy_rejected",
            ProviderError::NotConfigured(_) => "not_configured",
            ProviderError::RetriesExhausted { .. } => "retries_exhausted",
        }
    }
}

//=========================================================================================
// Candidate Selection
//=========================================================================================

/// Which documents the scheduler may pick up.
#[derive(Debug, Clone)]
pub struct CandidateFilter {
    pub statuses: Vec<DocumentStatus>,
    pub providers: Vec<ProviderId>,
}

impl CandidateFilter {
    /// Pending or analyzing documents still missing one of `providers`, plus
    /// analyzing documents holding every result but not yet completed (their
    /// consolidation is retried).
    pub fn needing_analysis(providers: &[ProviderId]) -> Self {
        Self {
            statuses: vec![DocumentStatus::Pending, DocumentStatus::Analyzing],
            providers: providers.to_vec(),
        }
    }

    pub fn matches(&self, document: &Document) -> bool {
        let missing = !document.missing_providers(&self.providers).is_empty();
        let awaiting_consolidation = document.status == DocumentStatus::Analyzing && !missing;
        self.statuses.contains(&document.status)
            && !document.content.trim().is_empty()
            && (missing || awaiting_consolidation)
    }
}

//=========================================================================================
// Service Ports (Traits)
//=========================================================================================

#[async_trait]
pub trait AnalysisProvider: Send + Sync {
    fn provider_id(&self) -> ProviderId;

    /// The model identifier this client sends requests to.
    fn model(&self) -> &str;

    /// Analyzes one transcript. `owner_hint` names the owner the session belongs to.
    async fn analyze(&self, text: &str, owner_hint: &str) -> Result<AnalysisResult, ProviderError>;
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    // --- Owners ---
    async fn get_or_create_owner(&self, name: &str) -> PortResult<Owner>;

    async fn get_owner(&self, owner_id: Uuid) -> PortResult<Owner>;

    // --- Documents ---
    async fn get_document(&self, document_id: Uuid) -> PortResult<Document>;

    /// Inserts or replaces the document and appends `logs` as one atomic unit.
    async fn save_document(&self, document: &Document, logs: &[LogEntry]) -> PortResult<()>;

    async fn query_candidates(&self, filter: &CandidateFilter) -> PortResult<Vec<Document>>;

    async fn owner_document_counts(&self) -> PortResult<HashMap<Uuid, usize>>;

    async fn coverage(&self) -> PortResult<CoverageStats>;

    // --- Audit Log ---
    async fn append_log(&self, entry: &LogEntry) -> PortResult<()>;

    async fn logs_for_document(&self, document_id: Uuid) -> PortResult<Vec<LogEntry>>;
}

#[async_trait]
pub trait InsightExporter: Send + Sync {
    /// Called once a document reaches `Completed`. Failures never revert the document.
    async fn on_consolidated(&self, document_id: Uuid, insight: &ConsolidatedInsight) -> PortResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn transient_and_permanent_are_disjoint() {
        let errors = vec![
            ProviderError::Timeout,
            ProviderError::RateLimited("429".into()),
            ProviderError::Server("502".into()),
            ProviderError::Network("reset".into()),
            ProviderError::EmptyResponse("no choices".into()),
            ProviderError::Auth("bad key".into()),
            ProviderError::InvalidRequest("too long".into()),
            ProviderError::PolicyRejected("flagged".into()),
            ProviderError::NotConfigured(ProviderId::Gemini),
            ProviderError::RetriesExhausted {
                attempts: 3,
                last: Box::new(ProviderError::Timeout),
            },
        ];
        for error in errors {
            assert!(!(error.is_transient() && error.is_permanent()), "{error:?}");
        }
    }

    #[test]
    fn exhausted_retries_are_neither_transient_nor_permanent() {
        let error = ProviderError::RetriesExhausted {
            attempts: 3,
            last: Box::new(ProviderError::Server("503".into())),
        };
        assert!(!error.is_transient());
        assert!(!error.is_permanent());
    }

    #[test]
    fn candidate_filter_requires_missing_provider_and_content() {
        let filter = CandidateFilter::needing_analysis(&[ProviderId::OpenAi]);
        let mut doc = Document::new(Uuid::new_v4(), "a.txt", "some text", None, Utc::now());
        assert!(filter.matches(&doc));

        doc.results.insert(
            ProviderId::OpenAi,
            AnalysisResult {
                provider_id: ProviderId::OpenAi,
                raw_output: "{}".into(),
                model: None,
                produced_at: Utc::now(),
            },
        );
        assert!(!filter.matches(&doc));

        let blank = Document::new(Uuid::new_v4(), "b.txt", "   ", None, Utc::now());
        assert!(!filter.matches(&blank));

        let mut failed = Document::new(Uuid::new_v4(), "c.txt", "text", None, Utc::now());
        failed.status = DocumentStatus::Failed;
        assert!(!filter.matches(&failed));
    }

    #[test]
    fn analyzing_document_with_every_result_awaits_consolidation() {
        let filter = CandidateFilter::needing_analysis(&[ProviderId::OpenAi]);
        let mut doc = Document::new(Uuid::new_v4(), "a.txt", "some text", None, Utc::now());
        doc.status = DocumentStatus::Analyzing;
        doc.results.insert(
            ProviderId::OpenAi,
            AnalysisResult {
                provider_id: ProviderId::OpenAi,
                raw_output: "{}".into(),
                model: None,
                produced_at: Utc::now(),
            },
        );
        assert!(filter.matches(&doc));

        doc.status = DocumentStatus::Completed;
        assert!(!filter.matches(&doc));
    }
}

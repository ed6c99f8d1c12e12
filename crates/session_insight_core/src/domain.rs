//! crates/session_insight_core/src/domain.rs
//!
//! Defines the pure, core data structures for the session insight engine.
//! These structs are independent of any database or serialization format.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Returned when a stored string does not name a known enum variant.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind}: '{value}'")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

//=========================================================================================
// Providers
//=========================================================================================

/// Identifies one external analysis provider.
///
/// The declaration order is the provider ordering used for every deterministic
/// tie-break (lowest id wins).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ProviderId {
    OpenAi,
    Anthropic,
    Gemini,
}

impl ProviderId {
    pub const ALL: [ProviderId; 3] = [ProviderId::OpenAi, ProviderId::Anthropic, ProviderId::Gemini];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderId::OpenAi => "openai",
            ProviderId::Anthropic => "anthropic",
            ProviderId::Gemini => "gemini",
        }
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderId {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(ProviderId::OpenAi),
            "anthropic" => Ok(ProviderId::Anthropic),
            "gemini" => Ok(ProviderId::Gemini),
            _ => Err(ParseEnumError {
                kind: "provider",
                value: s.to_string(),
            }),
        }
    }
}

//=========================================================================================
// Documents
//=========================================================================================

/// Lifecycle status of a document. See `lifecycle` for the allowed transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DocumentStatus {
    Pending,
    Analyzing,
    Completed,
    Failed,
}

impl DocumentStatus {
    pub const ALL: [DocumentStatus; 4] = [
        DocumentStatus::Pending,
        DocumentStatus::Analyzing,
        DocumentStatus::Completed,
        DocumentStatus::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentStatus::Pending => "pending",
            DocumentStatus::Analyzing => "analyzing",
            DocumentStatus::Completed => "completed",
            DocumentStatus::Failed => "failed",
        }
    }

    /// `Completed` and `Failed` only change through an explicit reprocess.
    pub fn is_terminal(&self) -> bool {
        matches!(self, DocumentStatus::Completed | DocumentStatus::Failed)
    }
}

impl fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DocumentStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(DocumentStatus::Pending),
            "analyzing" => Ok(DocumentStatus::Analyzing),
            "completed" => Ok(DocumentStatus::Completed),
            "failed" => Ok(DocumentStatus::Failed),
            _ => Err(ParseEnumError {
                kind: "document status",
                value: s.to_string(),
            }),
        }
    }
}

/// The output of one provider for one document. `raw_output` stays opaque
/// until the consolidation step parses it.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisResult {
    pub provider_id: ProviderId,
    pub raw_output: String,
    pub model: Option<String>,
    pub produced_at: DateTime<Utc>,
}

/// Majority sentiment plus every distinct emotional tone reported.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SentimentSummary {
    pub overall_sentiment: Option<String>,
    pub emotional_tone: String,
}

/// Heuristic cross-provider agreement measure, not a statistical confidence.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfidenceScore {
    pub overall_confidence: f64,
    pub provider_count: usize,
    pub agreement_ratio: String,
}

/// The merged view of every provider result for a document.
///
/// Always rebuilt from scratch; a new insight replaces the previous one wholesale.
#[derive(Debug, Clone, PartialEq)]
pub struct ConsolidatedInsight {
    pub summary: Option<String>,
    pub mood_score: Option<f64>,
    pub topics: Vec<String>,
    pub techniques: Vec<String>,
    pub sentiment: SentimentSummary,
    pub confidence: ConfidenceScore,
}

impl ConsolidatedInsight {
    /// The insight for an empty result set: "not yet analyzable".
    pub fn empty() -> Self {
        Self {
            summary: None,
            mood_score: None,
            topics: Vec::new(),
            techniques: Vec::new(),
            sentiment: SentimentSummary::default(),
            confidence: ConfidenceScore {
                overall_confidence: 0.5,
                provider_count: 0,
                agreement_ratio: "0/0".to_string(),
            },
        }
    }

    pub fn is_empty(&self) -> bool {
        self.confidence.provider_count == 0
    }
}

impl Default for ConsolidatedInsight {
    fn default() -> Self {
        Self::empty()
    }
}

/// Represents one submitted session transcript.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub filename: String,
    pub content: String,
    /// Date of the session itself when the transcript carried one.
    pub session_date: Option<DateTime<Utc>>,
    pub status: DocumentStatus,
    pub results: BTreeMap<ProviderId, AnalysisResult>,
    pub consolidated: Option<ConsolidatedInsight>,
    pub consolidated_at: Option<DateTime<Utc>>,
    pub exported_at: Option<DateTime<Utc>>,
    pub export_error: Option<String>,
    pub submitted_at: DateTime<Utc>,
    pub last_updated_at: DateTime<Utc>,
}

impl Document {
    /// Creates a fresh `Pending` document with no provider results.
    pub fn new(
        owner_id: Uuid,
        filename: impl Into<String>,
        content: impl Into<String>,
        session_date: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            owner_id,
            filename: filename.into(),
            content: content.into(),
            session_date,
            status: DocumentStatus::Pending,
            results: BTreeMap::new(),
            consolidated: None,
            consolidated_at: None,
            exported_at: None,
            export_error: None,
            submitted_at: now,
            last_updated_at: now,
        }
    }

    pub fn has_result(&self, provider: ProviderId) -> bool {
        self.results.contains_key(&provider)
    }

    /// Configured providers that have not produced a result yet, in provider order.
    pub fn missing_providers(&self, configured: &[ProviderId]) -> Vec<ProviderId> {
        let mut missing: Vec<ProviderId> = configured
            .iter()
            .copied()
            .filter(|p| !self.has_result(*p))
            .collect();
        missing.sort();
        missing.dedup();
        missing
    }

    /// Number of configured providers with a present result.
    pub fn present_count(&self, configured: &[ProviderId]) -> usize {
        configured.iter().filter(|p| self.has_result(**p)).count()
    }

    /// Results restricted to the configured providers.
    pub fn configured_results(&self, configured: &[ProviderId]) -> BTreeMap<ProviderId, AnalysisResult> {
        self.results
            .iter()
            .filter(|(p, _)| configured.contains(p))
            .map(|(p, r)| (*p, r.clone()))
            .collect()
    }

    pub fn content_length(&self) -> usize {
        self.content.chars().count()
    }

    /// The date used for recency: the session date, else the submission time.
    pub fn reference_date(&self) -> DateTime<Utc> {
        self.session_date.unwrap_or(self.submitted_at)
    }
}

/// The payload handed to ingestion by the upstream text extractor.
#[derive(Debug, Clone)]
pub struct NewDocument {
    pub owner_name: String,
    pub filename: String,
    pub content: String,
    pub session_date: Option<DateTime<Utc>>,
}

/// Groups documents, e.g. one per end client.
#[derive(Debug, Clone, PartialEq)]
pub struct Owner {
    pub id: Uuid,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

//=========================================================================================
// Audit Log
//=========================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActivityType {
    Ingestion,
    ProviderCall,
    StatusTransition,
    Consolidation,
    Export,
    Reprocess,
    SchedulerTick,
}

impl ActivityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityType::Ingestion => "ingestion",
            ActivityType::ProviderCall => "provider_call",
            ActivityType::StatusTransition => "status_transition",
            ActivityType::Consolidation => "consolidation",
            ActivityType::Export => "export",
            ActivityType::Reprocess => "reprocess",
            ActivityType::SchedulerTick => "scheduler_tick",
        }
    }
}

impl FromStr for ActivityType {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ingestion" => Ok(ActivityType::Ingestion),
            "provider_call" => Ok(ActivityType::ProviderCall),
            "status_transition" => Ok(ActivityType::StatusTransition),
            "consolidation" => Ok(ActivityType::Consolidation),
            "export" => Ok(ActivityType::Export),
            "reprocess" => Ok(ActivityType::Reprocess),
            "scheduler_tick" => Ok(ActivityType::SchedulerTick),
            _ => Err(ParseEnumError {
                kind: "activity type",
                value: s.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogStatus {
    Success,
    Warning,
    Error,
}

impl LogStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogStatus::Success => "success",
            LogStatus::Warning => "warning",
            LogStatus::Error => "error",
        }
    }
}

impl FromStr for LogStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(LogStatus::Success),
            "warning" => Ok(LogStatus::Warning),
            "error" => Ok(LogStatus::Error),
            _ => Err(ParseEnumError {
                kind: "log status",
                value: s.to_string(),
            }),
        }
    }
}

/// Append-only audit record. Never mutated once written.
#[derive(Debug, Clone, PartialEq)]
pub struct LogEntry {
    pub id: Uuid,
    pub document_id: Option<Uuid>,
    pub activity_type: ActivityType,
    pub status: LogStatus,
    pub message: String,
    pub error: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

impl LogEntry {
    fn build(
        document_id: Option<Uuid>,
        activity_type: ActivityType,
        status: LogStatus,
        message: impl Into<String>,
        error: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            document_id,
            activity_type,
            status,
            message: message.into(),
            error,
            metadata: None,
            created_at: Utc::now(),
        }
    }

    pub fn success(document_id: Option<Uuid>, activity_type: ActivityType, message: impl Into<String>) -> Self {
        Self::build(document_id, activity_type, LogStatus::Success, message, None)
    }

    pub fn warning(
        document_id: Option<Uuid>,
        activity_type: ActivityType,
        message: impl Into<String>,
        error: Option<String>,
    ) -> Self {
        Self::build(document_id, activity_type, LogStatus::Warning, message, error)
    }

    pub fn failure(
        document_id: Option<Uuid>,
        activity_type: ActivityType,
        message: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        Self::build(document_id, activity_type, LogStatus::Error, message, Some(error.into()))
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// Per-status and per-provider document counts.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CoverageStats {
    pub total_documents: usize,
    pub by_status: BTreeMap<DocumentStatus, usize>,
    pub by_provider: BTreeMap<ProviderId, usize>,
}

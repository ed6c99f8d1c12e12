pub mod consolidation;
pub mod domain;
pub mod lifecycle;
pub mod ports;
pub mod priority;

pub use consolidation::{consolidate, parse_raw_output, ConsolidationError, ParsedAnalysis};
pub use domain::{
    ActivityType, AnalysisResult, ConfidenceScore, ConsolidatedInsight, CoverageStats, Document,
    DocumentStatus, LogEntry, LogStatus, NewDocument, Owner, ProviderId, SentimentSummary,
};
pub use lifecycle::{PassOutcome, Settlement, StateMachine, Transition, TransitionError};
pub use ports::{
    AnalysisProvider, CandidateFilter, DocumentStore, InsightExporter, PortError, PortResult,
    ProviderError,
};
pub use priority::{rank_candidates, PriorityInputs, PriorityWeights, RankedCandidate, WeightsError};

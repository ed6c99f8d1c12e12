//! services/processor/src/adapters/exporter.rs
//!
//! The default `InsightExporter`. Downstream sinks are out of scope for this
//! service, so a completed insight is emitted as a structured tracing event
//! that a log shipper can forward.

use async_trait::async_trait;
use session_insight_core::domain::ConsolidatedInsight;
use session_insight_core::ports::{InsightExporter, PortResult};
use tracing::info;
use uuid::Uuid;

#[derive(Clone, Default)]
pub struct TracingExporter;

#[async_trait]
impl InsightExporter for TracingExporter {
    async fn on_consolidated(&self, document_id: Uuid, insight: &ConsolidatedInsight) -> PortResult<()> {
        info!(
            target: "insight_export",
            %document_id,
            mood_score = ?insight.mood_score,
            sentiment = insight.sentiment.overall_sentiment.as_deref().unwrap_or("unknown"),
            topics = insight.topics.len(),
            confidence = insight.confidence.overall_confidence,
            agreement = %insight.confidence.agreement_ratio,
            "Consolidated insight ready"
        );
        Ok(())
    }
}

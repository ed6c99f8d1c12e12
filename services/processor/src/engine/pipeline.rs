//! services/processor/src/engine/pipeline.rs
//!
//! Drives one document through a processing pass:
//!
//! 1. claim the document so no other task writes it concurrently
//! 2. `Pending → Analyzing`, persisted before any provider is called
//! 3. ask the gateway for every configured provider still missing a result
//! 4. record results, consolidate and settle the status
//! 5. persist the document together with its log entries in one write
//! 6. hand completed insights to the exporter
//!
//! A storage failure at step 5 returns an error and leaves the stored document
//! as it was after step 2; the results are requested again on a later pass.

use chrono::Utc;
use serde_json::json;
use session_insight_core::domain::{
    ActivityType, Document, DocumentStatus, LogEntry, NewDocument, ProviderId,
};
use session_insight_core::lifecycle::{PassOutcome, StateMachine, Transition, TransitionError};
use session_insight_core::ports::{DocumentStore, InsightExporter, PortError};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use super::gateway::ProviderGateway;

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("owner name must not be empty")]
    EmptyOwner,
    #[error("content has {actual} characters after trimming, at least {required} are required")]
    ContentTooShort { actual: usize, required: usize },
    #[error(transparent)]
    Port(#[from] PortError),
}

#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("document {0} is already being processed")]
    Busy(Uuid),
    #[error(transparent)]
    Port(#[from] PortError),
    #[error(transparent)]
    Transition(#[from] TransitionError),
}

/// What one pass did to a document.
#[derive(Debug, Clone, PartialEq)]
pub enum PassReport {
    /// The document was terminal when the pass started; nothing was called.
    Skipped(DocumentStatus),
    Processed {
        status: DocumentStatus,
        newly_present: Vec<ProviderId>,
        still_missing: Vec<ProviderId>,
    },
}

/// Releases a document claim when dropped.
struct Claim<'a> {
    claims: &'a Mutex<HashSet<Uuid>>,
    id: Uuid,
}

impl Drop for Claim<'_> {
    fn drop(&mut self) {
        lock_claims(self.claims).remove(&self.id);
    }
}

fn lock_claims(claims: &Mutex<HashSet<Uuid>>) -> std::sync::MutexGuard<'_, HashSet<Uuid>> {
    claims.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub struct DocumentPipeline {
    store: Arc<dyn DocumentStore>,
    gateway: Arc<ProviderGateway>,
    exporter: Arc<dyn InsightExporter>,
    machine: StateMachine,
    min_content_length: usize,
    claims: Mutex<HashSet<Uuid>>,
}

impl DocumentPipeline {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        gateway: Arc<ProviderGateway>,
        exporter: Arc<dyn InsightExporter>,
        completion_threshold: Option<usize>,
        min_content_length: usize,
    ) -> Self {
        let machine = StateMachine::new(&gateway.configured(), completion_threshold);
        Self {
            store,
            gateway,
            exporter,
            machine,
            min_content_length,
            claims: Mutex::new(HashSet::new()),
        }
    }

    pub fn configured(&self) -> &[ProviderId] {
        self.machine.configured()
    }

    pub fn is_claimed(&self, document_id: Uuid) -> bool {
        lock_claims(&self.claims).contains(&document_id)
    }

    fn claim(&self, document_id: Uuid) -> Result<Claim<'_>, ProcessError> {
        if !lock_claims(&self.claims).insert(document_id) {
            return Err(ProcessError::Busy(document_id));
        }
        Ok(Claim {
            claims: &self.claims,
            id: document_id,
        })
    }

    /// Validates and stores a newly extracted transcript as a `Pending` document.
    #[instrument(skip(self, new_document), fields(owner = %new_document.owner_name, filename = %new_document.filename))]
    pub async fn ingest(&self, new_document: NewDocument) -> Result<Document, IngestError> {
        let owner_name = new_document.owner_name.trim();
        if owner_name.is_empty() {
            return Err(IngestError::EmptyOwner);
        }
        let actual = new_document.content.trim().chars().count();
        if actual < self.min_content_length {
            return Err(IngestError::ContentTooShort {
                actual,
                required: self.min_content_length,
            });
        }

        let owner = self.store.get_or_create_owner(owner_name).await?;
        let doc = Document::new(
            owner.id,
            new_document.filename,
            new_document.content,
            new_document.session_date,
            Utc::now(),
        );
        let log = LogEntry::success(
            Some(doc.id),
            ActivityType::Ingestion,
            format!("ingested {} for {}", doc.filename, owner.name),
        )
        .with_metadata(json!({
            "owner_id": owner.id,
            "filename": doc.filename,
            "content_length": doc.content_length(),
        }));
        self.store.save_document(&doc, &[log]).await?;

        info!(document_id = %doc.id, "Document ingested");
        Ok(doc)
    }

    /// Runs one processing pass for a document.
    #[instrument(skip(self))]
    pub async fn process_document(&self, document_id: Uuid) -> Result<PassReport, ProcessError> {
        let _claim = self.claim(document_id)?;
        let mut doc = self.store.get_document(document_id).await?;
        let mut logs = Vec::new();

        if let Some(t) = self.machine.reconcile(&mut doc, Utc::now()) {
            warn!(%document_id, from = %t.from, to = %t.to, "Stored status disagreed with results");
            logs.push(transition_log(doc.id, &t));
        }
        if doc.status.is_terminal() {
            if !logs.is_empty() {
                self.store.save_document(&doc, &logs).await?;
            }
            return Ok(PassReport::Skipped(doc.status));
        }

        if let Some(t) = self.machine.begin(&mut doc, Utc::now())? {
            logs.push(transition_log(doc.id, &t));
        }
        if !logs.is_empty() {
            self.store.save_document(&doc, &logs).await?;
        }

        let missing = doc.missing_providers(self.machine.configured());
        let owner_hint = match self.store.get_owner(doc.owner_id).await {
            Ok(owner) => owner.name,
            Err(e) => {
                warn!(%document_id, "Could not load owner for prompt: {}", e);
                String::new()
            }
        };
        let outcomes = self.gateway.analyze(&doc, &owner_hint, &missing).await;

        let mut pass = PassOutcome::default();
        let mut newly_present = Vec::new();
        for (provider, outcome) in outcomes {
            match outcome {
                Ok(result) => {
                    if self.machine.record_result(&mut doc, result, Utc::now())? {
                        newly_present.push(provider);
                    }
                }
                Err(e) if e.is_permanent() => {
                    pass.permanent_failures.insert(provider, e.to_string());
                }
                Err(e) => {
                    warn!(%document_id, provider = %provider, "Provider left missing for a later pass: {}", e);
                }
            }
        }

        let settlement = self.machine.settle(&mut doc, &pass, Utc::now())?;
        let mut logs = Vec::new();
        if settlement.consolidated {
            if let Some(insight) = &doc.consolidated {
                logs.push(
                    LogEntry::success(
                        Some(doc.id),
                        ActivityType::Consolidation,
                        format!("consolidated {} provider results", insight.confidence.provider_count),
                    )
                    .with_metadata(json!({
                        "overall_confidence": insight.confidence.overall_confidence,
                        "agreement_ratio": insight.confidence.agreement_ratio,
                        "mood_score": insight.mood_score,
                    })),
                );
            }
        }
        if let Some(err) = &settlement.consolidation_error {
            error!(%document_id, "Consolidation failed: {}", err);
            logs.push(LogEntry::failure(
                Some(doc.id),
                ActivityType::Consolidation,
                "consolidation failed, results kept for the next pass",
                err.to_string(),
            ));
        }
        if let Some(t) = &settlement.transition {
            logs.push(transition_log(doc.id, t));
        }

        self.store.save_document(&doc, &logs).await?;
        info!(%document_id, status = %doc.status, newly = newly_present.len(), "Processing pass finished");

        if doc.status == DocumentStatus::Completed {
            self.export(&mut doc).await;
        }

        Ok(PassReport::Processed {
            status: doc.status,
            newly_present,
            still_missing: doc.missing_providers(self.machine.configured()),
        })
    }

    /// Resets a document to `Pending` from any status, clearing its results.
    #[instrument(skip(self))]
    pub async fn reprocess(&self, document_id: Uuid) -> Result<Document, ProcessError> {
        let _claim = self.claim(document_id)?;
        let mut doc = self.store.get_document(document_id).await?;
        let t = self.machine.reset(&mut doc, Utc::now());
        let log = LogEntry::success(
            Some(doc.id),
            ActivityType::Reprocess,
            format!("reset from {} to {}", t.from, t.to),
        )
        .with_metadata(json!({ "from": t.from.as_str(), "to": t.to.as_str() }));
        self.store.save_document(&doc, &[log]).await?;
        info!(%document_id, from = %t.from, "Document queued for reprocessing");
        Ok(doc)
    }

    /// Hands a completed insight to the exporter and records the outcome.
    /// Export failures never change the document status.
    async fn export(&self, doc: &mut Document) {
        let Some(insight) = doc.consolidated.clone() else {
            return;
        };
        let log = match self.exporter.on_consolidated(doc.id, &insight).await {
            Ok(()) => {
                doc.exported_at = Some(Utc::now());
                doc.export_error = None;
                LogEntry::success(Some(doc.id), ActivityType::Export, "insight exported")
            }
            Err(e) => {
                warn!(document_id = %doc.id, "Export failed: {}", e);
                doc.export_error = Some(e.to_string());
                LogEntry::failure(Some(doc.id), ActivityType::Export, "insight export failed", e.to_string())
            }
        };
        if let Err(e) = self.store.save_document(doc, &[log]).await {
            error!(document_id = %doc.id, "Failed to record export outcome: {}", e);
        }
    }
}

fn transition_log(document_id: Uuid, t: &Transition) -> LogEntry {
    let message = format!("{} -> {}", t.from, t.to);
    let metadata = json!({ "from": t.from.as_str(), "to": t.to.as_str() });
    match t.to {
        DocumentStatus::Failed => {
            LogEntry::failure(Some(document_id), ActivityType::StatusTransition, message, t.reason.clone())
        }
        _ => LogEntry::success(
            Some(document_id),
            ActivityType::StatusTransition,
            format!("{message}: {}", t.reason),
        ),
    }
    .with_metadata(metadata)
}

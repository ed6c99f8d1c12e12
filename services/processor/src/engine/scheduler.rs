//! services/processor/src/engine/scheduler.rs
//!
//! The periodic batch loop. Each tick ranks the documents still needing
//! analysis, takes the top `batch_size` and runs their passes with bounded
//! concurrency. Ticks never overlap: the next one starts only after the
//! previous batch has finished.

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde_json::json;
use session_insight_core::domain::{ActivityType, DocumentStatus, LogEntry};
use session_insight_core::ports::{CandidateFilter, DocumentStore, PortResult};
use session_insight_core::priority::{rank_candidates, PriorityWeights, RankedCandidate};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::pipeline::{DocumentPipeline, PassReport};

#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub interval: Duration,
    pub batch_size: usize,
    pub concurrency: usize,
    pub weights: PriorityWeights,
    /// How long an in-flight batch may keep running after shutdown is requested.
    pub shutdown_grace: Duration,
}

/// Summary of one tick.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickReport {
    pub candidates: usize,
    /// Documents dispatched this tick, highest priority first.
    pub dispatched: Vec<Uuid>,
    pub completed: usize,
    pub failed: usize,
    pub errors: usize,
}

pub struct Scheduler {
    pipeline: Arc<DocumentPipeline>,
    store: Arc<dyn DocumentStore>,
    settings: SchedulerSettings,
}

impl Scheduler {
    pub fn new(pipeline: Arc<DocumentPipeline>, store: Arc<dyn DocumentStore>, settings: SchedulerSettings) -> Self {
        Self {
            pipeline,
            store,
            settings,
        }
    }

    /// Ranks eligible documents and keeps the top `batch_size`.
    /// Documents already claimed by another task are left out.
    pub async fn select_batch(&self, now: DateTime<Utc>) -> PortResult<(usize, Vec<RankedCandidate>)> {
        let configured = self.pipeline.configured().to_vec();
        if configured.is_empty() {
            return Ok((0, Vec::new()));
        }

        let documents: Vec<_> = self
            .store
            .query_candidates(&CandidateFilter::needing_analysis(&configured))
            .await?
            .into_iter()
            .filter(|d| !self.pipeline.is_claimed(d.id))
            .collect();
        let candidates = documents.len();
        let owner_counts = self.store.owner_document_counts().await?;

        let mut ranked = rank_candidates(documents, &owner_counts, &configured, &self.settings.weights, now);
        ranked.truncate(self.settings.batch_size);
        Ok((candidates, ranked))
    }

    /// Runs one batch to completion. Per-document errors are logged and counted;
    /// only a failure to select the batch is returned.
    pub async fn tick(&self) -> PortResult<TickReport> {
        let (candidates, batch) = self.select_batch(Utc::now()).await?;
        let mut report = TickReport {
            candidates,
            dispatched: batch.iter().map(|c| c.document.id).collect(),
            ..TickReport::default()
        };
        if batch.is_empty() {
            return Ok(report);
        }
        info!(candidates, batch = batch.len(), "Scheduler tick dispatching documents");

        let results: Vec<_> = stream::iter(batch.into_iter().map(|candidate| {
            let pipeline = self.pipeline.clone();
            async move {
                let id = candidate.document.id;
                (id, pipeline.process_document(id).await)
            }
        }))
        .buffer_unordered(self.settings.concurrency.max(1))
        .collect()
        .await;

        for (document_id, result) in results {
            match result {
                Ok(PassReport::Processed { status, .. }) => match status {
                    DocumentStatus::Completed => report.completed += 1,
                    DocumentStatus::Failed => report.failed += 1,
                    _ => {}
                },
                Ok(PassReport::Skipped(_)) => {}
                Err(e) => {
                    report.errors += 1;
                    error!(%document_id, "Processing pass failed: {}", e);
                    let entry = LogEntry::failure(
                        Some(document_id),
                        ActivityType::SchedulerTick,
                        "processing pass failed",
                        e.to_string(),
                    );
                    if let Err(log_err) = self.store.append_log(&entry).await {
                        error!(%document_id, "Failed to write scheduler log: {}", log_err);
                    }
                }
            }
        }

        let summary = LogEntry::success(
            None,
            ActivityType::SchedulerTick,
            format!("processed {} of {} candidates", report.dispatched.len(), report.candidates),
        )
        .with_metadata(json!({
            "dispatched": report.dispatched.len(),
            "completed": report.completed,
            "failed": report.failed,
            "errors": report.errors,
        }));
        if let Err(e) = self.store.append_log(&summary).await {
            error!("Failed to write scheduler log: {}", e);
        }

        Ok(report)
    }

    /// Ticks every `interval` until `cancel` fires. A batch in flight at
    /// cancellation gets `shutdown_grace` to finish before it is dropped.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.settings.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(interval_secs = self.settings.interval.as_secs(), "Scheduler started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {}
            }

            let tick = self.tick();
            tokio::pin!(tick);
            tokio::select! {
                result = &mut tick => log_tick(result),
                _ = cancel.cancelled() => {
                    info!("Shutdown requested, letting the current batch finish");
                    match tokio::time::timeout(self.settings.shutdown_grace, &mut tick).await {
                        Ok(result) => log_tick(result),
                        Err(_) => warn!("Batch did not finish within the shutdown grace period"),
                    }
                    break;
                }
            }
        }

        info!("Scheduler stopped");
    }
}

fn log_tick(result: PortResult<TickReport>) {
    match result {
        Ok(report) if report.dispatched.is_empty() => {}
        Ok(report) => info!(
            dispatched = report.dispatched.len(),
            completed = report.completed,
            failed = report.failed,
            errors = report.errors,
            "Scheduler tick finished"
        ),
        Err(e) => error!("Scheduler tick failed: {}", e),
    }
}

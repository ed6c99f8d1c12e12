//! Test doubles shared by the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Utc;
use processor_lib::adapters::InMemoryStore;
use processor_lib::engine::{
    DocumentPipeline, GatewaySettings, ProviderGateway, RetryPolicy, Scheduler, SchedulerSettings,
    Unlimited,
};
use session_insight_core::domain::{
    AnalysisResult, ConsolidatedInsight, CoverageStats, Document, LogEntry, NewDocument, Owner,
    ProviderId,
};
use session_insight_core::ports::{
    AnalysisProvider, CandidateFilter, DocumentStore, InsightExporter, PortError, PortResult,
    ProviderError,
};
use session_insight_core::priority::PriorityWeights;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

pub const CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// One scripted reply from a provider.
#[derive(Clone)]
pub enum Step {
    Reply(String),
    Fail(ProviderError),
    /// Never answers within the gateway's call timeout.
    Hang,
}

/// A provider that plays back a script, then repeats its fallback forever.
pub struct ScriptedProvider {
    id: ProviderId,
    script: Mutex<VecDeque<Step>>,
    fallback: Step,
    calls: Mutex<u32>,
}

impl ScriptedProvider {
    pub fn new(id: ProviderId, script: Vec<Step>, fallback: Step) -> Arc<Self> {
        Arc::new(Self {
            id,
            script: Mutex::new(script.into()),
            fallback,
            calls: Mutex::new(0),
        })
    }

    pub fn always(id: ProviderId, step: Step) -> Arc<Self> {
        Self::new(id, Vec::new(), step)
    }

    pub fn calls(&self) -> u32 {
        *self.calls.lock().unwrap()
    }
}

#[async_trait]
impl AnalysisProvider for ScriptedProvider {
    fn provider_id(&self) -> ProviderId {
        self.id
    }

    fn model(&self) -> &str {
        "scripted-model"
    }

    async fn analyze(&self, _text: &str, _owner_hint: &str) -> Result<AnalysisResult, ProviderError> {
        *self.calls.lock().unwrap() += 1;
        let step = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());
        match step {
            Step::Reply(raw) => Ok(AnalysisResult {
                provider_id: self.id,
                raw_output: raw,
                model: Some("scripted-model".to_string()),
                produced_at: Utc::now(),
            }),
            Step::Fail(e) => Err(e),
            Step::Hang => {
                tokio::time::sleep(CALL_TIMEOUT * 10).await;
                Err(ProviderError::Network("hung provider woke up".to_string()))
            }
        }
    }
}

pub fn reply(raw: &str) -> Step {
    Step::Reply(raw.to_string())
}

/// Exporter that records every call and can be told to fail.
#[derive(Default)]
pub struct RecordingExporter {
    pub exported: Mutex<Vec<Uuid>>,
    pub fail: AtomicBool,
}

#[async_trait]
impl InsightExporter for RecordingExporter {
    async fn on_consolidated(&self, document_id: Uuid, _insight: &ConsolidatedInsight) -> PortResult<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(PortError::Unexpected("downstream sink unavailable".to_string()));
        }
        self.exported.lock().unwrap().push(document_id);
        Ok(())
    }
}

/// Wraps the in-memory store and fails document saves on demand.
#[derive(Clone, Default)]
pub struct FlakyStore {
    pub inner: InMemoryStore,
    pub fail_saves: Arc<AtomicBool>,
}

#[async_trait]
impl DocumentStore for FlakyStore {
    async fn get_or_create_owner(&self, name: &str) -> PortResult<Owner> {
        self.inner.get_or_create_owner(name).await
    }

    async fn get_owner(&self, owner_id: Uuid) -> PortResult<Owner> {
        self.inner.get_owner(owner_id).await
    }

    async fn get_document(&self, document_id: Uuid) -> PortResult<Document> {
        self.inner.get_document(document_id).await
    }

    async fn save_document(&self, document: &Document, logs: &[LogEntry]) -> PortResult<()> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(PortError::Unexpected("connection reset".to_string()));
        }
        self.inner.save_document(document, logs).await
    }

    async fn query_candidates(&self, filter: &CandidateFilter) -> PortResult<Vec<Document>> {
        self.inner.query_candidates(filter).await
    }

    async fn owner_document_counts(&self) -> PortResult<HashMap<Uuid, usize>> {
        self.inner.owner_document_counts().await
    }

    async fn coverage(&self) -> PortResult<CoverageStats> {
        self.inner.coverage().await
    }

    async fn append_log(&self, entry: &LogEntry) -> PortResult<()> {
        self.inner.append_log(entry).await
    }

    async fn logs_for_document(&self, document_id: Uuid) -> PortResult<Vec<LogEntry>> {
        self.inner.logs_for_document(document_id).await
    }
}

pub struct Harness {
    pub store: FlakyStore,
    pub exporter: Arc<RecordingExporter>,
    pub pipeline: Arc<DocumentPipeline>,
}

impl Harness {
    pub fn new(providers: Vec<Arc<ScriptedProvider>>) -> Self {
        Self::with_threshold(providers, None)
    }

    pub fn with_threshold(providers: Vec<Arc<ScriptedProvider>>, threshold: Option<usize>) -> Self {
        let store = FlakyStore::default();
        let exporter = Arc::new(RecordingExporter::default());
        let providers: Vec<Arc<dyn AnalysisProvider>> = providers
            .into_iter()
            .map(|p| p as Arc<dyn AnalysisProvider>)
            .collect();
        let gateway = Arc::new(ProviderGateway::new(
            providers,
            Arc::new(Unlimited),
            Arc::new(store.clone()),
            GatewaySettings {
                call_timeout: CALL_TIMEOUT,
                retry: RetryPolicy {
                    max_attempts: 3,
                    base_delay: Duration::from_millis(200),
                    max_delay: Duration::from_secs(2),
                    jitter: true,
                },
            },
        ));
        let pipeline = Arc::new(DocumentPipeline::new(
            Arc::new(store.clone()),
            gateway,
            exporter.clone(),
            threshold,
            100,
        ));
        Self {
            store,
            exporter,
            pipeline,
        }
    }

    pub fn scheduler(&self, batch_size: usize) -> Arc<Scheduler> {
        Arc::new(Scheduler::new(
            self.pipeline.clone(),
            Arc::new(self.store.clone()),
            SchedulerSettings {
                interval: Duration::from_secs(300),
                batch_size,
                concurrency: 2,
                weights: PriorityWeights::default(),
                shutdown_grace: Duration::from_secs(30),
            },
        ))
    }

    pub async fn ingest(&self, owner: &str) -> Document {
        self.ingest_dated(owner, None).await
    }

    /// Ingests a transcript whose session took place `days_ago` days back.
    pub async fn ingest_dated(&self, owner: &str, days_ago: Option<i64>) -> Document {
        self.pipeline
            .ingest(NewDocument {
                owner_name: owner.to_string(),
                filename: "session.txt".to_string(),
                content: transcript(),
                session_date: days_ago.map(|d| Utc::now() - chrono::Duration::days(d)),
            })
            .await
            .expect("ingest")
    }

    pub async fn document(&self, id: Uuid) -> Document {
        self.store.get_document(id).await.expect("stored document")
    }
}

/// Length of the transcript every harness document carries.
pub const TRANSCRIPT_LEN: usize = 500;

pub fn transcript() -> String {
    "Therapist: How has the week been? Client: Work was stressful and I slept badly, \
     but the breathing exercises helped on Thursday. "
        .chars()
        .cycle()
        .take(TRANSCRIPT_LEN)
        .collect()
}

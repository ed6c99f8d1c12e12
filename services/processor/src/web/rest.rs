//! services/processor/src/web/rest.rs
//!
//! Contains the Axum handlers for the REST API endpoints.

use crate::engine::{IngestError, ProcessError};
use crate::web::state::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use session_insight_core::domain::{ConsolidatedInsight, Document, LogEntry, NewDocument, ProviderId};
use session_insight_core::ports::PortError;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::error;
use uuid::Uuid;

//=========================================================================================
// API Response and Payload Structs
//=========================================================================================

/// The payload handed over by the upstream text extractor.
#[derive(Deserialize)]
pub struct IngestRequest {
    owner_name: String,
    filename: String,
    content: String,
    #[serde(default)]
    session_date: Option<DateTime<Utc>>,
}

#[derive(Serialize)]
pub struct IngestResponse {
    document_id: Uuid,
    owner_id: Uuid,
    status: String,
}

#[derive(Serialize)]
pub struct ProviderSlotView {
    present: bool,
    model: Option<String>,
    produced_at: Option<DateTime<Utc>>,
}

#[derive(Serialize)]
pub struct InsightView {
    summary: Option<String>,
    mood_score: Option<f64>,
    topics: Vec<String>,
    techniques: Vec<String>,
    overall_sentiment: Option<String>,
    emotional_tone: String,
    overall_confidence: f64,
    provider_count: usize,
    agreement_ratio: String,
}

impl From<&ConsolidatedInsight> for InsightView {
    fn from(insight: &ConsolidatedInsight) -> Self {
        Self {
            summary: insight.summary.clone(),
            mood_score: insight.mood_score,
            topics: insight.topics.clone(),
            techniques: insight.techniques.clone(),
            overall_sentiment: insight.sentiment.overall_sentiment.clone(),
            emotional_tone: insight.sentiment.emotional_tone.clone(),
            overall_confidence: insight.confidence.overall_confidence,
            provider_count: insight.confidence.provider_count,
            agreement_ratio: insight.confidence.agreement_ratio.clone(),
        }
    }
}

#[derive(Serialize)]
pub struct DocumentView {
    id: Uuid,
    owner_id: Uuid,
    filename: String,
    status: String,
    session_date: Option<DateTime<Utc>>,
    submitted_at: DateTime<Utc>,
    last_updated_at: DateTime<Utc>,
    providers: BTreeMap<String, ProviderSlotView>,
    consolidated: Option<InsightView>,
    consolidated_at: Option<DateTime<Utc>>,
    exported_at: Option<DateTime<Utc>>,
    export_error: Option<String>,
}

impl DocumentView {
    fn new(doc: &Document, configured: &[ProviderId]) -> Self {
        let providers = configured
            .iter()
            .map(|provider| {
                let result = doc.results.get(provider);
                (
                    provider.as_str().to_string(),
                    ProviderSlotView {
                        present: result.is_some(),
                        model: result.and_then(|r| r.model.clone()),
                        produced_at: result.map(|r| r.produced_at),
                    },
                )
            })
            .collect();
        Self {
            id: doc.id,
            owner_id: doc.owner_id,
            filename: doc.filename.clone(),
            status: doc.status.as_str().to_string(),
            session_date: doc.session_date,
            submitted_at: doc.submitted_at,
            last_updated_at: doc.last_updated_at,
            providers,
            consolidated: doc.consolidated.as_ref().map(InsightView::from),
            consolidated_at: doc.consolidated_at,
            exported_at: doc.exported_at,
            export_error: doc.export_error.clone(),
        }
    }
}

#[derive(Serialize)]
pub struct LogView {
    id: Uuid,
    activity_type: String,
    status: String,
    message: String,
    error: Option<String>,
    metadata: Option<serde_json::Value>,
    created_at: DateTime<Utc>,
}

impl From<LogEntry> for LogView {
    fn from(entry: LogEntry) -> Self {
        Self {
            id: entry.id,
            activity_type: entry.activity_type.as_str().to_string(),
            status: entry.status.as_str().to_string(),
            message: entry.message,
            error: entry.error,
            metadata: entry.metadata,
            created_at: entry.created_at,
        }
    }
}

#[derive(Serialize)]
pub struct ProviderView {
    provider: String,
    available: bool,
    model: Option<String>,
}

#[derive(Serialize)]
pub struct StatsView {
    total_documents: usize,
    by_status: BTreeMap<String, usize>,
    by_provider: BTreeMap<String, usize>,
}

//=========================================================================================
// Error Mapping
//=========================================================================================

fn port_error(context: &str, e: PortError) -> (StatusCode, String) {
    match e {
        PortError::NotFound(message) => (StatusCode::NOT_FOUND, message),
        PortError::Conflict(message) => (StatusCode::CONFLICT, message),
        PortError::Unexpected(message) => {
            error!("{}: {}", context, message);
            (StatusCode::INTERNAL_SERVER_ERROR, context.to_string())
        }
    }
}

fn process_error(context: &str, e: ProcessError) -> (StatusCode, String) {
    match e {
        ProcessError::Busy(_) => (StatusCode::CONFLICT, e.to_string()),
        ProcessError::Port(port) => port_error(context, port),
        ProcessError::Transition(t) => (StatusCode::CONFLICT, t.to_string()),
    }
}

//=========================================================================================
// REST API Handlers
//=========================================================================================

/// Ingest a transcript as a new `Pending` document.
pub async fn ingest_handler(
    State(app_state): State<Arc<AppState>>,
    Json(payload): Json<IngestRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let new_document = NewDocument {
        owner_name: payload.owner_name,
        filename: payload.filename,
        content: payload.content,
        session_date: payload.session_date,
    };

    match app_state.pipeline.ingest(new_document).await {
        Ok(doc) => Ok((
            StatusCode::CREATED,
            Json(IngestResponse {
                document_id: doc.id,
                owner_id: doc.owner_id,
                status: doc.status.as_str().to_string(),
            }),
        )),
        Err(IngestError::Port(e)) => Err(port_error("Failed to ingest document", e)),
        Err(e) => Err((StatusCode::BAD_REQUEST, e.to_string())),
    }
}

pub async fn get_document_handler(
    State(app_state): State<Arc<AppState>>,
    Path(document_id): Path<Uuid>,
) -> Result<Json<DocumentView>, (StatusCode, String)> {
    let doc = app_state
        .store
        .get_document(document_id)
        .await
        .map_err(|e| port_error("Failed to load document", e))?;
    Ok(Json(DocumentView::new(&doc, app_state.pipeline.configured())))
}

/// Reset a document to `Pending` so the scheduler analyzes it from scratch.
pub async fn reprocess_handler(
    State(app_state): State<Arc<AppState>>,
    Path(document_id): Path<Uuid>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let doc = app_state
        .pipeline
        .reprocess(document_id)
        .await
        .map_err(|e| process_error("Failed to reprocess document", e))?;
    Ok((
        StatusCode::ACCEPTED,
        Json(DocumentView::new(&doc, app_state.pipeline.configured())),
    ))
}

pub async fn document_logs_handler(
    State(app_state): State<Arc<AppState>>,
    Path(document_id): Path<Uuid>,
) -> Result<Json<Vec<LogView>>, (StatusCode, String)> {
    app_state
        .store
        .get_document(document_id)
        .await
        .map_err(|e| port_error("Failed to load document", e))?;
    let logs = app_state
        .store
        .logs_for_document(document_id)
        .await
        .map_err(|e| port_error("Failed to load processing logs", e))?;
    Ok(Json(logs.into_iter().map(LogView::from).collect()))
}

pub async fn providers_handler(State(app_state): State<Arc<AppState>>) -> Json<Vec<ProviderView>> {
    Json(
        app_state
            .gateway
            .availability()
            .into_iter()
            .map(|s| ProviderView {
                provider: s.provider.as_str().to_string(),
                available: s.available,
                model: s.model,
            })
            .collect(),
    )
}

pub async fn stats_handler(
    State(app_state): State<Arc<AppState>>,
) -> Result<Json<StatsView>, (StatusCode, String)> {
    let stats = app_state
        .store
        .coverage()
        .await
        .map_err(|e| port_error("Failed to compute coverage", e))?;
    Ok(Json(StatsView {
        total_documents: stats.total_documents,
        by_status: stats
            .by_status
            .into_iter()
            .map(|(status, count)| (status.as_str().to_string(), count))
            .collect(),
        by_provider: stats
            .by_provider
            .into_iter()
            .map(|(provider, count)| (provider.as_str().to_string(), count))
            .collect(),
    }))
}

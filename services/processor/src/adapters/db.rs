//! services/processor/src/adapters/db.rs
//!
//! This module contains the database adapter, which is the concrete implementation
//! of the `DocumentStore` port from the `core` crate. It handles all interactions
//! with the PostgreSQL database using `sqlx`.
//!
//! Provider results and the consolidated insight are stored as JSONB columns on
//! the `documents` row, so a document is always read and written as one unit.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use session_insight_core::domain::{
    ActivityType, AnalysisResult, ConfidenceScore, ConsolidatedInsight, CoverageStats, Document,
    DocumentStatus, LogEntry, LogStatus, Owner, ParseEnumError, ProviderId, SentimentSummary,
};
use session_insight_core::ports::{CandidateFilter, DocumentStore, PortError, PortResult};
use sqlx::types::Json;
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use std::collections::{BTreeMap, HashMap};
use std::str::FromStr;
use uuid::Uuid;

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// A database adapter that implements the `DocumentStore` port.
#[derive(Clone)]
pub struct DbAdapter {
    pool: PgPool,
}

impl DbAdapter {
    /// Creates a new `DbAdapter`.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// A helper function to run database migrations at startup.
    pub async fn run_migrations(&self) -> Result<(), sqlx::Error> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

fn unexpected(e: sqlx::Error) -> PortError {
    PortError::Unexpected(e.to_string())
}

fn parse_column<T>(raw: &str) -> PortResult<T>
where
    T: FromStr<Err = ParseEnumError>,
{
    raw.parse().map_err(|e: ParseEnumError| PortError::Unexpected(e.to_string()))
}

//=========================================================================================
// "Impure" Database Record Structs
//=========================================================================================

#[derive(FromRow)]
struct OwnerRecord {
    id: Uuid,
    name: String,
    created_at: DateTime<Utc>,
}
impl OwnerRecord {
    fn to_domain(self) -> Owner {
        Owner {
            id: self.id,
            name: self.name,
            created_at: self.created_at,
        }
    }
}

#[derive(Serialize, Deserialize)]
struct ResultRecord {
    raw_output: String,
    model: Option<String>,
    produced_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize)]
struct InsightRecord {
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
impl InsightRecord {
    fn from_domain(insight: &ConsolidatedInsight) -> Self {
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

    fn to_domain(self) -> ConsolidatedInsight {
        ConsolidatedInsight {
            summary: self.summary,
            mood_score: self.mood_score,
            topics: self.topics,
            techniques: self.techniques,
            sentiment: SentimentSummary {
                overall_sentiment: self.overall_sentiment,
                emotional_tone: self.emotional_tone,
            },
            confidence: ConfidenceScore {
                overall_confidence: self.overall_confidence,
                provider_count: self.provider_count,
                agreement_ratio: self.agreement_ratio,
            },
        }
    }
}

#[derive(FromRow)]
struct DocumentRecord {
    id: Uuid,
    owner_id: Uuid,
    filename: String,
    content: String,
    session_date: Option<DateTime<Utc>>,
    status: String,
    provider_results: Json<BTreeMap<String, ResultRecord>>,
    consolidated: Option<Json<InsightRecord>>,
    consolidated_at: Option<DateTime<Utc>>,
    exported_at: Option<DateTime<Utc>>,
    export_error: Option<String>,
    submitted_at: DateTime<Utc>,
    last_updated_at: DateTime<Utc>,
}
impl DocumentRecord {
    fn to_domain(self) -> PortResult<Document> {
        let status: DocumentStatus = parse_column(&self.status)?;

        let mut results = BTreeMap::new();
        for (key, record) in self.provider_results.0 {
            let provider_id: ProviderId = parse_column(&key)?;
            results.insert(
                provider_id,
                AnalysisResult {
                    provider_id,
                    raw_output: record.raw_output,
                    model: record.model,
                    produced_at: record.produced_at,
                },
            );
        }

        Ok(Document {
            id: self.id,
            owner_id: self.owner_id,
            filename: self.filename,
            content: self.content,
            session_date: self.session_date,
            status,
            results,
            consolidated: self.consolidated.map(|Json(record)| record.to_domain()),
            consolidated_at: self.consolidated_at,
            exported_at: self.exported_at,
            export_error: self.export_error,
            submitted_at: self.submitted_at,
            last_updated_at: self.last_updated_at,
        })
    }
}

fn results_to_record(results: &BTreeMap<ProviderId, AnalysisResult>) -> BTreeMap<String, ResultRecord> {
    results
        .iter()
        .map(|(provider, result)| {
            (
                provider.as_str().to_string(),
                ResultRecord {
                    raw_output: result.raw_output.clone(),
                    model: result.model.clone(),
                    produced_at: result.produced_at,
                },
            )
        })
        .collect()
}

#[derive(FromRow)]
struct LogRecord {
    id: Uuid,
    document_id: Option<Uuid>,
    activity_type: String,
    status: String,
    message: String,
    error_details: Option<String>,
    context_metadata: Option<serde_json::Value>,
    created_at: DateTime<Utc>,
}
impl LogRecord {
    fn to_domain(self) -> PortResult<LogEntry> {
        let activity_type: ActivityType = parse_column(&self.activity_type)?;
        let status: LogStatus = parse_column(&self.status)?;
        Ok(LogEntry {
            id: self.id,
            document_id: self.document_id,
            activity_type,
            status,
            message: self.message,
            error: self.error_details,
            metadata: self.context_metadata,
            created_at: self.created_at,
        })
    }
}

const DOCUMENT_COLUMNS: &str = "id, owner_id, filename, content, session_date, status, provider_results, \
     consolidated, consolidated_at, exported_at, export_error, submitted_at, last_updated_at";

async fn insert_log(tx: &mut Transaction<'_, Postgres>, entry: &LogEntry) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO processing_logs \
         (id, document_id, activity_type, status, message, error_details, context_metadata, created_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
    )
    .bind(entry.id)
    .bind(entry.document_id)
    .bind(entry.activity_type.as_str())
    .bind(entry.status.as_str())
    .bind(&entry.message)
    .bind(&entry.error)
    .bind(&entry.metadata)
    .bind(entry.created_at)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

//=========================================================================================
// `DocumentStore` Trait Implementation
//=========================================================================================

#[async_trait]
impl DocumentStore for DbAdapter {
    async fn get_or_create_owner(&self, name: &str) -> PortResult<Owner> {
        let name = name.trim();
        sqlx::query("INSERT INTO owners (id, name) VALUES ($1, $2) ON CONFLICT ((lower(name))) DO NOTHING")
            .bind(Uuid::new_v4())
            .bind(name)
            .execute(&self.pool)
            .await
            .map_err(unexpected)?;

        let record = sqlx::query_as::<_, OwnerRecord>(
            "SELECT id, name, created_at FROM owners WHERE lower(name) = lower($1)",
        )
        .bind(name)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::RowNotFound => PortError::NotFound(format!("Owner {} not found", name)),
            _ => unexpected(e),
        })?;

        Ok(record.to_domain())
    }

    async fn get_owner(&self, owner_id: Uuid) -> PortResult<Owner> {
        let record = sqlx::query_as::<_, OwnerRecord>("SELECT id, name, created_at FROM owners WHERE id = $1")
            .bind(owner_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| match e {
                sqlx::Error::RowNotFound => PortError::NotFound(format!("Owner {} not found", owner_id)),
                _ => unexpected(e),
            })?;
        Ok(record.to_domain())
    }

    async fn get_document(&self, document_id: Uuid) -> PortResult<Document> {
        let record = sqlx::query_as::<_, DocumentRecord>(&format!(
            "SELECT {DOCUMENT_COLUMNS} FROM documents WHERE id = $1"
        ))
        .bind(document_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::RowNotFound => PortError::NotFound(format!("Document {} not found", document_id)),
            _ => unexpected(e),
        })?;
        record.to_domain()
    }

    /// Upserts the document row and appends `logs` in one transaction.
    async fn save_document(&self, document: &Document, logs: &[LogEntry]) -> PortResult<()> {
        let mut tx = self.pool.begin().await.map_err(unexpected)?;

        sqlx::query(
            "INSERT INTO documents (id, owner_id, filename, content, session_date, status, provider_results, \
             consolidated, consolidated_at, exported_at, export_error, submitted_at, last_updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13) \
             ON CONFLICT (id) DO UPDATE SET \
             status = EXCLUDED.status, provider_results = EXCLUDED.provider_results, \
             consolidated = EXCLUDED.consolidated, consolidated_at = EXCLUDED.consolidated_at, \
             exported_at = EXCLUDED.exported_at, export_error = EXCLUDED.export_error, \
             last_updated_at = EXCLUDED.last_updated_at",
        )
        .bind(document.id)
        .bind(document.owner_id)
        .bind(&document.filename)
        .bind(&document.content)
        .bind(document.session_date)
        .bind(document.status.as_str())
        .bind(Json(results_to_record(&document.results)))
        .bind(document.consolidated.as_ref().map(|i| Json(InsightRecord::from_domain(i))))
        .bind(document.consolidated_at)
        .bind(document.exported_at)
        .bind(&document.export_error)
        .bind(document.submitted_at)
        .bind(document.last_updated_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(db) if db.is_foreign_key_violation() => PortError::Conflict(format!(
                "Document {} references unknown owner {}",
                document.id, document.owner_id
            )),
            other => unexpected(other),
        })?;

        for entry in logs {
            insert_log(&mut tx, entry).await.map_err(unexpected)?;
        }

        tx.commit().await.map_err(unexpected)
    }

    async fn query_candidates(&self, filter: &CandidateFilter) -> PortResult<Vec<Document>> {
        let statuses: Vec<String> = filter.statuses.iter().map(|s| s.as_str().to_string()).collect();
        let providers: Vec<String> = filter.providers.iter().map(|p| p.as_str().to_string()).collect();

        let records = sqlx::query_as::<_, DocumentRecord>(&format!(
            "SELECT {DOCUMENT_COLUMNS} FROM documents \
             WHERE status = ANY($1) AND btrim(content) <> '' \
             AND (NOT (provider_results ?& $2) OR status = 'analyzing') \
             ORDER BY id"
        ))
        .bind(&statuses)
        .bind(&providers)
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;

        records
            .into_iter()
            .map(DocumentRecord::to_domain)
            .collect::<PortResult<Vec<_>>>()
            .map(|docs| docs.into_iter().filter(|d| filter.matches(d)).collect())
    }

    async fn owner_document_counts(&self) -> PortResult<HashMap<Uuid, usize>> {
        let rows = sqlx::query_as::<_, (Uuid, i64)>("SELECT owner_id, COUNT(*) FROM documents GROUP BY owner_id")
            .fetch_all(&self.pool)
            .await
            .map_err(unexpected)?;
        Ok(rows
            .into_iter()
            .map(|(owner_id, count)| (owner_id, count.max(0) as usize))
            .collect())
    }

    async fn coverage(&self) -> PortResult<CoverageStats> {
        let by_status = sqlx::query_as::<_, (String, i64)>("SELECT status, COUNT(*) FROM documents GROUP BY status")
            .fetch_all(&self.pool)
            .await
            .map_err(unexpected)?;

        let mut stats = CoverageStats::default();
        for (status, count) in by_status {
            let status: DocumentStatus = parse_column(&status)?;
            let count = count.max(0) as usize;
            stats.total_documents += count;
            stats.by_status.insert(status, count);
        }

        for provider in ProviderId::ALL {
            let (count,) = sqlx::query_as::<_, (i64,)>("SELECT COUNT(*) FROM documents WHERE provider_results ? $1")
                .bind(provider.as_str())
                .fetch_one(&self.pool)
                .await
                .map_err(unexpected)?;
            if count > 0 {
                stats.by_provider.insert(provider, count as usize);
            }
        }

        Ok(stats)
    }

    async fn append_log(&self, entry: &LogEntry) -> PortResult<()> {
        let mut tx = self.pool.begin().await.map_err(unexpected)?;
        insert_log(&mut tx, entry).await.map_err(unexpected)?;
        tx.commit().await.map_err(unexpected)
    }

    async fn logs_for_document(&self, document_id: Uuid) -> PortResult<Vec<LogEntry>> {
        let records = sqlx::query_as::<_, LogRecord>(
            "SELECT id, document_id, activity_type, status, message, error_details, context_metadata, created_at \
             FROM processing_logs WHERE document_id = $1 ORDER BY created_at ASC, seq ASC",
        )
        .bind(document_id)
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;

        records.into_iter().map(LogRecord::to_domain).collect()
    }
}

//! services/processor/src/adapters/memory.rs
//!
//! An in-process `DocumentStore`. Used when no `DATABASE_URL` is configured and
//! as the store behind the integration tests.

use async_trait::async_trait;
use chrono::Utc;
use session_insight_core::domain::{CoverageStats, Document, LogEntry, Owner, ProviderId};
use session_insight_core::ports::{CandidateFilter, DocumentStore, PortError, PortResult};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
struct MemoryState {
    owners: HashMap<Uuid, Owner>,
    documents: HashMap<Uuid, Document>,
    logs: Vec<LogEntry>,
}

/// A `DocumentStore` held entirely in memory behind one lock, so a document
/// save and its log entries land together.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    state: Arc<RwLock<MemoryState>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every log entry written so far, oldest first.
    pub async fn all_logs(&self) -> Vec<LogEntry> {
        self.state.read().await.logs.clone()
    }
}

#[async_trait]
impl DocumentStore for InMemoryStore {
    async fn get_or_create_owner(&self, name: &str) -> PortResult<Owner> {
        let wanted = name.trim().to_lowercase();
        let mut state = self.state.write().await;
        if let Some(owner) = state
            .owners
            .values()
            .find(|o| o.name.to_lowercase() == wanted)
        {
            return Ok(owner.clone());
        }
        let owner = Owner {
            id: Uuid::new_v4(),
            name: name.trim().to_string(),
            created_at: Utc::now(),
        };
        state.owners.insert(owner.id, owner.clone());
        Ok(owner)
    }

    async fn get_owner(&self, owner_id: Uuid) -> PortResult<Owner> {
        self.state
            .read()
            .await
            .owners
            .get(&owner_id)
            .cloned()
            .ok_or_else(|| PortError::NotFound(format!("Owner {} not found", owner_id)))
    }

    async fn get_document(&self, document_id: Uuid) -> PortResult<Document> {
        self.state
            .read()
            .await
            .documents
            .get(&document_id)
            .cloned()
            .ok_or_else(|| PortError::NotFound(format!("Document {} not found", document_id)))
    }

    async fn save_document(&self, document: &Document, logs: &[LogEntry]) -> PortResult<()> {
        let mut state = self.state.write().await;
        if !state.owners.contains_key(&document.owner_id) {
            return Err(PortError::Conflict(format!(
                "Document {} references unknown owner {}",
                document.id, document.owner_id
            )));
        }
        state.documents.insert(document.id, document.clone());
        state.logs.extend(logs.iter().cloned());
        Ok(())
    }

    async fn query_candidates(&self, filter: &CandidateFilter) -> PortResult<Vec<Document>> {
        let state = self.state.read().await;
        let mut candidates: Vec<Document> = state
            .documents
            .values()
            .filter(|d| filter.matches(d))
            .cloned()
            .collect();
        candidates.sort_by_key(|d| d.id);
        Ok(candidates)
    }

    async fn owner_document_counts(&self) -> PortResult<HashMap<Uuid, usize>> {
        let state = self.state.read().await;
        let mut counts = HashMap::new();
        for doc in state.documents.values() {
            *counts.entry(doc.owner_id).or_insert(0) += 1;
        }
        Ok(counts)
    }

    async fn coverage(&self) -> PortResult<CoverageStats> {
        let state = self.state.read().await;
        let mut stats = CoverageStats {
            total_documents: state.documents.len(),
            ..CoverageStats::default()
        };
        for doc in state.documents.values() {
            *stats.by_status.entry(doc.status).or_insert(0) += 1;
            for provider in ProviderId::ALL {
                if doc.has_result(provider) {
                    *stats.by_provider.entry(provider).or_insert(0) += 1;
                }
            }
        }
        Ok(stats)
    }

    async fn append_log(&self, entry: &LogEntry) -> PortResult<()> {
        self.state.write().await.logs.push(entry.clone());
        Ok(())
    }

    async fn logs_for_document(&self, document_id: Uuid) -> PortResult<Vec<LogEntry>> {
        let state = self.state.read().await;
        Ok(state
            .logs
            .iter()
            .filter(|l| l.document_id == Some(document_id))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use session_insight_core::domain::{ActivityType, DocumentStatus};

    #[tokio::test]
    async fn owners_are_matched_case_insensitively() {
        let store = InMemoryStore::new();
        let first = store.get_or_create_owner("Jordan Lee").await.unwrap();
        let second = store.get_or_create_owner("  jordan lee ").await.unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(second.name, "Jordan Lee");
    }

    #[tokio::test]
    async fn saves_write_document_and_logs_together() {
        let store = InMemoryStore::new();
        let owner = store.get_or_create_owner("Sam").await.unwrap();
        let doc = Document::new(owner.id, "a.txt", "content", None, Utc::now());
        let log = LogEntry::success(Some(doc.id), ActivityType::Ingestion, "ingested");

        store.save_document(&doc, &[log.clone()]).await.unwrap();

        assert_eq!(store.get_document(doc.id).await.unwrap(), doc);
        assert_eq!(store.logs_for_document(doc.id).await.unwrap(), vec![log]);
    }

    #[tokio::test]
    async fn saving_for_an_unknown_owner_is_rejected() {
        let store = InMemoryStore::new();
        let doc = Document::new(Uuid::new_v4(), "a.txt", "content", None, Utc::now());
        let err = store.save_document(&doc, &[]).await.unwrap_err();
        assert!(matches!(err, PortError::Conflict(_)));
        assert!(matches!(
            store.get_document(doc.id).await,
            Err(PortError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn candidates_and_coverage_follow_stored_state() {
        let store = InMemoryStore::new();
        let owner = store.get_or_create_owner("Sam").await.unwrap();
        let pending = Document::new(owner.id, "a.txt", "some words", None, Utc::now());
        let mut done = Document::new(owner.id, "b.txt", "more words", None, Utc::now());
        done.status = DocumentStatus::Completed;
        let blank = Document::new(owner.id, "c.txt", "   ", None, Utc::now());
        for doc in [&pending, &done, &blank] {
            store.save_document(doc, &[]).await.unwrap();
        }

        let candidates = store
            .query_candidates(&CandidateFilter::needing_analysis(&ProviderId::ALL))
            .await
            .unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].id, pending.id);

        let stats = store.coverage().await.unwrap();
        assert_eq!(stats.total_documents, 3);
        assert_eq!(stats.by_status.get(&DocumentStatus::Pending), Some(&2));
        assert_eq!(stats.by_status.get(&DocumentStatus::Completed), Some(&1));
        assert_eq!(store.owner_document_counts().await.unwrap().get(&owner.id), Some(&3));
    }
}

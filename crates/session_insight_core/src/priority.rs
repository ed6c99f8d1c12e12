//! crates/session_insight_core/src/priority.rs
//!
//! Orders documents for the scheduler. Each candidate gets a weighted sum of
//! four sub-scores in `0..=1`: recency, owner significance, completion urgency
//! and throughput efficiency.

use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use std::collections::HashMap;
use uuid::Uuid;

use crate::domain::{Document, ProviderId};

const RECENCY_HORIZON_DAYS: f64 = 30.0;
const OWNER_SATURATION_DOCUMENTS: f64 = 10.0;
const EFFICIENCY_HORIZON_CHARS: f64 = 10_000.0;
const WEIGHT_SUM_TOLERANCE: f64 = 1e-6;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum WeightsError {
    #[error("priority weights must not be negative")]
    Negative,
    #[error("priority weights must sum to 1, got {0}")]
    BadSum(f64),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PriorityWeights {
    pub recency: f64,
    pub owner: f64,
    pub completion: f64,
    pub efficiency: f64,
}

impl PriorityWeights {
    pub fn new(recency: f64, owner: f64, completion: f64, efficiency: f64) -> Result<Self, WeightsError> {
        let weights = Self {
            recency,
            owner,
            completion,
            efficiency,
        };
        if [recency, owner, completion, efficiency].iter().any(|w| *w < 0.0) {
            return Err(WeightsError::Negative);
        }
        let sum = weights.sum();
        if (sum - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
            return Err(WeightsError::BadSum(sum));
        }
        Ok(weights)
    }

    pub fn sum(&self) -> f64 {
        self.recency + self.owner + self.completion + self.efficiency
    }
}

impl Default for PriorityWeights {
    fn default() -> Self {
        Self {
            recency: 0.3,
            owner: 0.2,
            completion: 0.3,
            efficiency: 0.2,
        }
    }
}

/// The raw facts a priority score is computed from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PriorityInputs {
    pub age_days: i64,
    pub owner_document_count: usize,
    pub present_results: usize,
    pub total_providers: usize,
    pub content_length: usize,
}

impl PriorityInputs {
    pub fn for_document(
        doc: &Document,
        owner_document_count: usize,
        configured: &[ProviderId],
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            age_days: (now - doc.reference_date()).num_days(),
            owner_document_count,
            present_results: doc.present_count(configured),
            total_providers: configured.len(),
            content_length: doc.content_length(),
        }
    }

    pub fn recency(&self) -> f64 {
        (1.0 - self.age_days as f64 / RECENCY_HORIZON_DAYS).clamp(0.0, 1.0)
    }

    pub fn owner_significance(&self) -> f64 {
        (self.owner_document_count as f64 / OWNER_SATURATION_DOCUMENTS).min(1.0)
    }

    pub fn completion_urgency(&self) -> f64 {
        if self.total_providers == 0 {
            return 0.0;
        }
        1.0 - self.present_results as f64 / self.total_providers as f64
    }

    pub fn efficiency(&self) -> f64 {
        (1.0 - self.content_length as f64 / EFFICIENCY_HORIZON_CHARS).max(0.0)
    }

    pub fn score(&self, weights: &PriorityWeights) -> f64 {
        self.recency() * weights.recency
            + self.owner_significance() * weights.owner
            + self.completion_urgency() * weights.completion
            + self.efficiency() * weights.efficiency
    }
}

#[derive(Debug, Clone)]
pub struct RankedCandidate {
    pub document: Document,
    pub score: f64,
}

/// Scores and sorts candidates: highest score first, ties by ascending document id.
pub fn rank_candidates(
    documents: Vec<Document>,
    owner_counts: &HashMap<Uuid, usize>,
    configured: &[ProviderId],
    weights: &PriorityWeights,
    now: DateTime<Utc>,
) -> Vec<RankedCandidate> {
    let mut ranked: Vec<RankedCandidate> = documents
        .into_iter()
        .map(|document| {
            let owner_count = owner_counts.get(&document.owner_id).copied().unwrap_or(0);
            let score = PriorityInputs::for_document(&document, owner_count, configured, now).score(weights);
            RankedCandidate { document, score }
        })
        .collect();

    ranked.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.document.id.cmp(&b.document.id))
    });
    ranked
}

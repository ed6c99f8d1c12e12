//! crates/session_insight_core/src/lifecycle.rs
//!
//! The document state machine.
//!
//! ```text
//! Pending ──begin──▶ Analyzing ──settle──▶ Completed
//!                        │  ▲
//!                        │  └─ settle (partial results)
//!                        └──────settle──────▶ Failed
//! any ──reset──▶ Pending   (the only way out of Completed/Failed)
//! ```
//!
//! Status is persisted explicitly and updated on writes. `derive_status` recomputes
//! it from the provider results and is used only as a recovery/consistency check.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::consolidation::{consolidate, ConsolidationError};
use crate::domain::{AnalysisResult, Document, DocumentStatus, ProviderId};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TransitionError {
    #[error("document {id} cannot {action} while {status}")]
    Illegal {
        id: Uuid,
        status: DocumentStatus,
        action: &'static str,
    },
}

/// One recorded status change.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub from: DocumentStatus,
    pub to: DocumentStatus,
    pub reason: String,
}

/// What the providers called during one pass reported back.
#[derive(Debug, Clone, Default)]
pub struct PassOutcome {
    /// Providers that answered with a permanent (non-retryable) error.
    pub permanent_failures: BTreeMap<ProviderId, String>,
}

/// Result of settling a document after a pass.
#[derive(Debug, Clone, Default)]
pub struct Settlement {
    pub transition: Option<Transition>,
    /// A new insight replaced the previous one.
    pub consolidated: bool,
    pub consolidation_error: Option<ConsolidationError>,
}

/// Owns the transition rules for a fixed set of configured providers.
#[derive(Debug, Clone)]
pub struct StateMachine {
    configured: Vec<ProviderId>,
    threshold: usize,
}

impl StateMachine {
    /// `threshold` is the number of present results needed before consolidating.
    /// It defaults to every configured provider and is clamped to `1..=configured`.
    pub fn new(configured: &[ProviderId], threshold: Option<usize>) -> Self {
        let mut configured = configured.to_vec();
        configured.sort();
        configured.dedup();
        let total = configured.len();
        let threshold = threshold.unwrap_or(total).clamp(total.min(1), total);
        Self {
            configured,
            threshold,
        }
    }

    pub fn configured(&self) -> &[ProviderId] {
        &self.configured
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    /// `Pending → Analyzing`, fired when a document is dispatched.
    /// Dispatching an already analyzing document is a no-op.
    pub fn begin(
        &self,
        doc: &mut Document,
        now: DateTime<Utc>,
    ) -> Result<Option<Transition>, TransitionError> {
        match doc.status {
            DocumentStatus::Pending => Ok(Some(self.apply(
                doc,
                DocumentStatus::Analyzing,
                "dispatched to providers".to_string(),
                now,
            ))),
            DocumentStatus::Analyzing => Ok(None),
            status => Err(TransitionError::Illegal {
                id: doc.id,
                status,
                action: "begin analysis",
            }),
        }
    }

    /// Stores a provider result. Present results are never replaced; returns
    /// whether the result was stored.
    pub fn record_result(
        &self,
        doc: &mut Document,
        result: AnalysisResult,
        now: DateTime<Utc>,
    ) -> Result<bool, TransitionError> {
        if doc.status != DocumentStatus::Analyzing {
            return Err(TransitionError::Illegal {
                id: doc.id,
                status: doc.status,
                action: "record a provider result",
            });
        }
        if doc.has_result(result.provider_id) {
            return Ok(false);
        }
        doc.results.insert(result.provider_id, result);
        doc.last_updated_at = now;
        Ok(true)
    }

    /// Consolidates when enough results are present and decides the next status.
    ///
    /// - every configured provider present and consolidation succeeds → `Completed`
    /// - every configured provider failed permanently in this pass → `Failed`
    /// - otherwise the document stays `Analyzing`
    ///
    /// A consolidation error leaves the document `Analyzing`; its results stay valid.
    pub fn settle(
        &self,
        doc: &mut Document,
        outcome: &PassOutcome,
        now: DateTime<Utc>,
    ) -> Result<Settlement, TransitionError> {
        if doc.status != DocumentStatus::Analyzing {
            return Err(TransitionError::Illegal {
                id: doc.id,
                status: doc.status,
                action: "settle",
            });
        }

        let mut settlement = Settlement::default();
        let present = doc.present_count(&self.configured);

        if present > 0 && present >= self.threshold {
            match consolidate(&doc.configured_results(&self.configured)) {
                Ok(insight) => {
                    doc.consolidated = Some(insight);
                    doc.consolidated_at = Some(now);
                    doc.last_updated_at = now;
                    settlement.consolidated = true;
                }
                Err(e) => settlement.consolidation_error = Some(e),
            }
        }

        let all_present = !self.configured.is_empty() && present == self.configured.len();
        if all_present && settlement.consolidated {
            settlement.transition = Some(self.apply(
                doc,
                DocumentStatus::Completed,
                format!("all {present} providers answered"),
                now,
            ));
        } else if !self.configured.is_empty()
            && self
                .configured
                .iter()
                .all(|p| outcome.permanent_failures.contains_key(p))
        {
            let detail = outcome
                .permanent_failures
                .iter()
                .map(|(p, e)| format!("{p}: {e}"))
                .collect::<Vec<_>>()
                .join("; ");
            settlement.transition = Some(self.apply(
                doc,
                DocumentStatus::Failed,
                format!("every provider failed permanently ({detail})"),
                now,
            ));
        }

        Ok(settlement)
    }

    /// Explicit reprocess: any status → `Pending`, clearing every derived field.
    pub fn reset(&self, doc: &mut Document, now: DateTime<Utc>) -> Transition {
        doc.results.clear();
        doc.consolidated = None;
        doc.consolidated_at = None;
        doc.exported_at = None;
        doc.export_error = None;
        self.apply(doc, DocumentStatus::Pending, "reprocess requested".to_string(), now)
    }

    /// Recomputes the status from the stored provider results.
    pub fn derive_status(&self, doc: &Document) -> DocumentStatus {
        let present = doc.present_count(&self.configured);
        let all_present = !self.configured.is_empty() && present == self.configured.len();

        if all_present && doc.consolidated.is_some() {
            return DocumentStatus::Completed;
        }
        match doc.status {
            DocumentStatus::Failed if present == 0 => DocumentStatus::Failed,
            DocumentStatus::Pending if doc.results.is_empty() => DocumentStatus::Pending,
            _ if doc.status == DocumentStatus::Pending || present > 0 => DocumentStatus::Analyzing,
            DocumentStatus::Completed => DocumentStatus::Analyzing,
            status => status,
        }
    }

    /// Repairs a stored status that disagrees with the stored results.
    pub fn reconcile(&self, doc: &mut Document, now: DateTime<Utc>) -> Option<Transition> {
        let derived = self.derive_status(doc);
        (derived != doc.status).then(|| {
            self.apply(
                doc,
                derived,
                "status re-derived from stored provider results".to_string(),
                now,
            )
        })
    }

    /// The structural invariants every persisted document must satisfy.
    pub fn invariants_hold(&self, doc: &Document) -> bool {
        match doc.status {
            DocumentStatus::Completed => {
                doc.consolidated.is_some()
                    && doc.present_count(&self.configured) == self.configured.len()
            }
            DocumentStatus::Pending => doc.results.is_empty(),
            _ => true,
        }
    }

    fn apply(
        &self,
        doc: &mut Document,
        to: DocumentStatus,
        reason: String,
        now: DateTime<Utc>,
    ) -> Transition {
        let from = doc.status;
        doc.status = to;
        doc.last_updated_at = now;
        Transition { from, to, reason }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [ProviderId; 3] = ProviderId::ALL;

    fn doc() -> Document {
        Document::new(Uuid::new_v4(), "session.txt", "transcript text", None, Utc::now())
    }

    fn result(provider: ProviderId, raw: &str) -> AnalysisResult {
        AnalysisResult {
            provider_id: provider,
            raw_output: raw.to_string(),
            model: None,
            produced_at: Utc::now(),
        }
    }

    fn analyzing(machine: &StateMachine) -> Document {
        let mut d = doc();
        machine.begin(&mut d, Utc::now()).unwrap();
        d
    }

    #[test]
    fn begin_moves_pending_to_analyzing_once() {
        let machine = StateMachine::new(&ALL, None);
        let mut d = doc();
        let transition = machine.begin(&mut d, Utc::now()).unwrap().unwrap();
        assert_eq!(transition.from, DocumentStatus::Pending);
        assert_eq!(transition.to, DocumentStatus::Analyzing);
        assert_eq!(machine.begin(&mut d, Utc::now()).unwrap(), None);
    }

    #[test]
    fn terminal_documents_refuse_to_begin() {
        let machine = StateMachine::new(&ALL, None);
        let mut d = doc();
        d.status = DocumentStatus::Completed;
        assert!(machine.begin(&mut d, Utc::now()).is_err());
    }

    #[test]
    fn results_are_never_overwritten() {
        let machine = StateMachine::new(&ALL, None);
        let mut d = analyzing(&machine);
        assert!(machine
            .record_result(&mut d, result(ProviderId::OpenAi, "first"), Utc::now())
            .unwrap());
        assert!(!machine
            .record_result(&mut d, result(ProviderId::OpenAi, "second"), Utc::now())
            .unwrap());
        assert_eq!(d.results[&ProviderId::OpenAi].raw_output, "first");
    }

    #[test]
    fn completes_when_every_provider_answered() {
        let machine = StateMachine::new(&ALL, None);
        let mut d = analyzing(&machine);
        for p in ALL {
            machine
                .record_result(&mut d, result(p, r#"{"mood":5}"#), Utc::now())
                .unwrap();
        }
        let settlement = machine.settle(&mut d, &PassOutcome::default(), Utc::now()).unwrap();
        assert!(settlement.consolidated);
        assert_eq!(d.status, DocumentStatus::Completed);
        assert!(machine.invariants_hold(&d));
    }

    #[test]
    fn partial_results_stay_analyzing() {
        let machine = StateMachine::new(&ALL, None);
        let mut d = analyzing(&machine);
        machine
            .record_result(&mut d, result(ProviderId::OpenAi, "{}"), Utc::now())
            .unwrap();
        machine
            .record_result(&mut d, result(ProviderId::Gemini, "{}"), Utc::now())
            .unwrap();

        let mut outcome = PassOutcome::default();
        outcome
            .permanent_failures
            .insert(ProviderId::Anthropic, "content policy".into());
        let settlement = machine.settle(&mut d, &outcome, Utc::now()).unwrap();

        assert!(settlement.transition.is_none());
        assert!(!settlement.consolidated);
        assert_eq!(d.status, DocumentStatus::Analyzing);
        assert_eq!(d.missing_providers(machine.configured()), vec![ProviderId::Anthropic]);
    }

    #[test]
    fn fails_only_when_every_provider_failed_permanently() {
        let machine = StateMachine::new(&ALL, None);
        let mut d = analyzing(&machine);
        let mut outcome = PassOutcome::default();
        for p in ALL {
            outcome.permanent_failures.insert(p, "invalid api key".into());
        }
        let settlement = machine.settle(&mut d, &outcome, Utc::now()).unwrap();
        assert_eq!(settlement.transition.unwrap().to, DocumentStatus::Failed);
        assert_eq!(d.status, DocumentStatus::Failed);
    }

    #[test]
    fn lower_threshold_consolidates_without_completing() {
        let machine = StateMachine::new(&ALL, Some(2));
        let mut d = analyzing(&machine);
        machine
            .record_result(&mut d, result(ProviderId::OpenAi, r#"{"mood":4}"#), Utc::now())
            .unwrap();
        machine
            .record_result(&mut d, result(ProviderId::Anthropic, r#"{"mood":6}"#), Utc::now())
            .unwrap();
        let settlement = machine.settle(&mut d, &PassOutcome::default(), Utc::now()).unwrap();
        assert!(settlement.consolidated);
        assert_eq!(d.status, DocumentStatus::Analyzing);
        assert_eq!(d.consolidated.as_ref().unwrap().mood_score, Some(5.0));
    }

    #[test]
    fn threshold_is_clamped_to_configured_count() {
        assert_eq!(StateMachine::new(&ALL, Some(9)).threshold(), 3);
        assert_eq!(StateMachine::new(&ALL, Some(0)).threshold(), 1);
        assert_eq!(StateMachine::new(&[ProviderId::Gemini], None).threshold(), 1);
        assert_eq!(StateMachine::new(&[], None).threshold(), 0);
    }

    #[test]
    fn consolidation_error_keeps_document_analyzing() {
        let machine = StateMachine::new(&[ProviderId::OpenAi], None);
        let mut d = analyzing(&machine);
        // A result filed under the wrong provider is corrupted state.
        d.results.insert(ProviderId::OpenAi, result(ProviderId::Gemini, "{}"));
        let settlement = machine.settle(&mut d, &PassOutcome::default(), Utc::now()).unwrap();
        assert!(settlement.consolidation_error.is_some());
        assert_eq!(d.status, DocumentStatus::Analyzing);
        assert!(d.consolidated.is_none());
    }

    #[test]
    fn reset_clears_everything() {
        let machine = StateMachine::new(&ALL, None);
        let mut d = analyzing(&machine);
        for p in ALL {
            machine.record_result(&mut d, result(p, "{}"), Utc::now()).unwrap();
        }
        machine.settle(&mut d, &PassOutcome::default(), Utc::now()).unwrap();
        d.exported_at = Some(Utc::now());

        let transition = machine.reset(&mut d, Utc::now());
        assert_eq!(transition.from, DocumentStatus::Completed);
        assert_eq!(d.status, DocumentStatus::Pending);
        assert!(d.results.is_empty());
        assert!(d.consolidated.is_none());
        assert!(d.exported_at.is_none());
        assert!(machine.invariants_hold(&d));
    }

    #[test]
    fn reconcile_repairs_drifted_status() {
        let machine = StateMachine::new(&ALL, None);

        // Crash after recording a result but before the status write.
        let mut pending_with_result = doc();
        pending_with_result
            .results
            .insert(ProviderId::OpenAi, result(ProviderId::OpenAi, "{}"));
        let t = machine.reconcile(&mut pending_with_result, Utc::now()).unwrap();
        assert_eq!(t.to, DocumentStatus::Analyzing);

        // Completed flag without the results to back it.
        let mut hollow = doc();
        hollow.status = DocumentStatus::Completed;
        hollow.results.insert(ProviderId::OpenAi, result(ProviderId::OpenAi, "{}"));
        machine.reconcile(&mut hollow, Utc::now());
        assert_eq!(hollow.status, DocumentStatus::Analyzing);

        let mut healthy = analyzing(&machine);
        assert!(machine.reconcile(&mut healthy, Utc::now()).is_none());
    }

    #[test]
    fn invariants_hold_across_every_simulated_transition() {
        let machine = StateMachine::new(&ALL, None);
        let now = Utc::now();
        let mut docs = Vec::new();

        for status in DocumentStatus::ALL {
            let mut d = doc();
            d.status = status;
            docs.push(d);
        }

        for mut d in docs {
            machine.reconcile(&mut d, now);
            assert!(machine.invariants_hold(&d), "after reconcile: {:?}", d.status);

            if machine.begin(&mut d, now).is_ok() {
                assert!(machine.invariants_hold(&d));
                for (i, p) in ALL.iter().enumerate() {
                    machine.record_result(&mut d, result(*p, "{}"), now).unwrap();
                    let outcome = PassOutcome::default();
                    machine.settle(&mut d, &outcome, now).unwrap();
                    assert!(machine.invariants_hold(&d), "after {} results", i + 1);
                    if d.status.is_terminal() {
                        break;
                    }
                }
                assert_eq!(d.status, DocumentStatus::Completed);
            }

            machine.reset(&mut d, now);
            assert!(machine.invariants_hold(&d));
        }
    }
}

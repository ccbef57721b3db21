//! Reconciler.
//!
//! Decides insert, update or skip per candidate and writes each record on
//! its own, so one failed write never aborts its siblings.

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, warn};

use leadsync_connector::types::CollectionType;

use crate::store::{CanonicalRecord, CanonicalStore, StoreResult};

/// A mapped record with its resolved canonical id.
#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalCandidate {
    pub id: i64,
    pub collection: CollectionType,
    pub source_id: i64,
    pub stage: Option<String>,
    pub fields: BTreeMap<String, Value>,
    /// SHA-256 of `fields`.
    pub fingerprint: String,
    pub resolved_from: Option<String>,
    pub source_created_at: Option<DateTime<Utc>>,
    pub source_updated_at: Option<DateTime<Utc>>,
}

/// What to do with one candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Insert,
    Update,
    Skip,
}

/// Decide the write for a candidate given the stored row.
///
/// A row never stamped by a sync is always overwritten. Otherwise the
/// source modification instants are compared; when the source does not
/// stamp the candidate, a changed fingerprint counts as newer.
#[must_use]
pub fn decide(candidate: &CanonicalCandidate, existing: Option<&CanonicalRecord>) -> Decision {
    let Some(existing) = existing else {
        return Decision::Insert;
    };
    if existing.synced_at.is_none() {
        return Decision::Update;
    }

    match (candidate.source_updated_at, existing.source_updated_at) {
        (Some(candidate_at), Some(existing_at)) if candidate_at > existing_at => Decision::Update,
        (Some(_), Some(_)) => Decision::Skip,
        (Some(_), None) => Decision::Update,
        (None, _) if candidate.fingerprint != existing.fingerprint => Decision::Update,
        (None, _) => Decision::Skip,
    }
}

/// Collapse candidates sharing a canonical id, keeping order of first
/// appearance. The newest `source_updated_at` wins; ties go to the later
/// candidate. Returns the survivors and the number collapsed.
#[must_use]
pub fn collapse_duplicates(candidates: Vec<CanonicalCandidate>) -> (Vec<CanonicalCandidate>, u64) {
    let mut position: HashMap<i64, usize> = HashMap::with_capacity(candidates.len());
    let mut survivors: Vec<CanonicalCandidate> = Vec::with_capacity(candidates.len());
    let mut collapsed = 0;

    for candidate in candidates {
        match position.get(&candidate.id) {
            Some(&slot) => {
                collapsed += 1;
                if candidate.source_updated_at >= survivors[slot].source_updated_at {
                    survivors[slot] = candidate;
                }
            }
            None => {
                position.insert(candidate.id, survivors.len());
                survivors.push(candidate);
            }
        }
    }

    (survivors, collapsed)
}

/// Result of writing one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordOutcome {
    Inserted { id: i64 },
    Updated { id: i64 },
    Skipped { id: i64 },
    Failed { id: i64, source_id: i64, error: String },
}

/// A record whose write failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordFailure {
    pub collection: CollectionType,
    pub id: i64,
    pub source_id: i64,
    pub error: String,
}

/// Counts of one reconcile call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileResult {
    pub inserted: u64,
    pub updated: u64,
    pub skipped: u64,
    pub failed: u64,
    pub failures: Vec<RecordFailure>,
}

impl ReconcileResult {
    fn record(&mut self, collection: CollectionType, outcome: RecordOutcome) {
        match outcome {
            RecordOutcome::Inserted { .. } => self.inserted += 1,
            RecordOutcome::Updated { .. } => self.updated += 1,
            RecordOutcome::Skipped { .. } => self.skipped += 1,
            RecordOutcome::Failed {
                id,
                source_id,
                error,
            } => {
                self.failed += 1;
                self.failures.push(RecordFailure {
                    collection,
                    id,
                    source_id,
                    error,
                });
            }
        }
    }

    /// Candidates accounted for.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.inserted + self.updated + self.skipped + self.failed
    }
}

/// Writes candidate batches to the canonical store.
#[derive(Clone)]
pub struct Reconciler {
    store: Arc<dyn CanonicalStore>,
    batch_size: usize,
    write_concurrency: usize,
    dry_run: bool,
}

impl Reconciler {
    /// Create a reconciler.
    pub fn new(store: Arc<dyn CanonicalStore>, batch_size: usize, write_concurrency: usize) -> Self {
        Self {
            store,
            batch_size: batch_size.max(1),
            write_concurrency: write_concurrency.max(1),
            dry_run: false,
        }
    }

    /// Decide without writing.
    #[must_use]
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Reconcile the candidates of one collection.
    ///
    /// Only the existing-row lookup can fail the call; write failures are
    /// counted per record.
    pub async fn reconcile(
        &self,
        collection: CollectionType,
        candidates: Vec<CanonicalCandidate>,
    ) -> StoreResult<ReconcileResult> {
        let (candidates, collapsed) = collapse_duplicates(candidates);
        let mut result = ReconcileResult {
            skipped: collapsed,
            ..ReconcileResult::default()
        };

        let mut remaining = candidates.into_iter().peekable();
        while remaining.peek().is_some() {
            let batch: Vec<_> = remaining.by_ref().take(self.batch_size).collect();
            let ids: Vec<i64> = batch.iter().map(|c| c.id).collect();
            let existing = self.store.get_many(collection, &ids).await?;

            let outcomes: Vec<RecordOutcome> = stream::iter(batch)
                .map(|candidate| {
                    let decision = decide(&candidate, existing.get(&candidate.id));
                    self.apply(candidate, decision)
                })
                .buffer_unordered(self.write_concurrency)
                .collect()
                .await;

            for outcome in outcomes {
                result.record(collection, outcome);
            }
        }

        Ok(result)
    }

    async fn apply(&self, candidate: CanonicalCandidate, decision: Decision) -> RecordOutcome {
        let id = candidate.id;
        let source_id = candidate.source_id;

        if decision == Decision::Skip {
            return RecordOutcome::Skipped { id };
        }
        if self.dry_run {
            return match decision {
                Decision::Insert => RecordOutcome::Inserted { id },
                _ => RecordOutcome::Updated { id },
            };
        }

        let record = CanonicalRecord::from_candidate(candidate, Utc::now());
        let written = match decision {
            Decision::Insert => match self.store.insert(&record).await {
                Ok(()) => Ok(RecordOutcome::Inserted { id }),
                Err(e) if e.is_conflict() => {
                    debug!(
                        collection = %record.collection,
                        id,
                        "Insert conflicted, retrying as update"
                    );
                    self.store
                        .update(&record)
                        .await
                        .map(|()| RecordOutcome::Updated { id })
                }
                Err(e) => Err(e),
            },
            _ => self
                .store
                .update(&record)
                .await
                .map(|()| RecordOutcome::Updated { id }),
        };

        written.unwrap_or_else(|e| {
            warn!(
                collection = %record.collection,
                id,
                source_id,
                error = %e,
                "Canonical write failed"
            );
            RecordOutcome::Failed {
                id,
                source_id,
                error: e.to_string(),
            }
        })
    }
}

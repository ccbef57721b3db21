//! End-to-end runs of the orchestrator against a scripted source.

use async_trait::async_trait;
use chrono::{TimeZone, Timelike, Utc};
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use leadsync_connector::prelude::*;
use leadsync_sync::checkpoint::CheckpointStore;
use leadsync_sync::{
    AbortReason, CanonicalRecord, CanonicalStore, CollectionPlan, IdentityStrategy,
    InMemoryStore, MemoryCheckpointStore, ReferenceSource, RunOptions, RunStatus,
    ScheduleWindow, SyncConfig, SyncOrchestrator,
};

// =============================================================================
// Scripted source
// =============================================================================

/// Serves fixed item lists page by page and counts every call.
#[derive(Default)]
struct ScriptedSource {
    items: Mutex<HashMap<(CollectionType, Option<String>), Vec<Value>>>,
    details: Mutex<HashMap<i64, Value>>,
    fetches: AtomicUsize,
    detail_fetches: AtomicUsize,
    /// 1-based fetch number answered with a rate limit error; 0 disables.
    fail_at: AtomicUsize,
    latency: Duration,
}

impl ScriptedSource {
    fn new() -> Self {
        Self::default()
    }

    fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    fn set(&self, collection: CollectionType, stage: Option<&str>, items: Vec<Value>) {
        self.items
            .lock()
            .unwrap()
            .insert((collection, stage.map(str::to_string)), items);
    }

    fn set_detail(&self, id: i64, detail: Value) {
        self.details.lock().unwrap().insert(id, detail);
    }

    fn fail_on_fetch(&self, n: usize) {
        self.fail_at.store(n, Ordering::SeqCst);
    }

    fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SourceCollection for ScriptedSource {
    fn display_name(&self) -> &str {
        "scripted"
    }

    async fn fetch_page(&self, request: &PageRequest) -> FetchResult<SourcePage> {
        let n = self.fetches.fetch_add(1, Ordering::SeqCst) + 1;
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        if self.fail_at.load(Ordering::SeqCst) == n {
            return Err(FetchError::rate_limited(
                format!("/{}", request.collection),
                5,
            ));
        }

        let items = self
            .items
            .lock()
            .unwrap()
            .get(&(request.collection, request.stage.clone()))
            .cloned()
            .unwrap_or_default();
        let start = (request.page * request.limit) as usize;
        let page: Vec<Value> = items
            .into_iter()
            .skip(start)
            .take(request.limit as usize)
            .collect();
        let raw_count = page.len();
        // Items without a usable id are dropped, as the REST source does.
        let records = page
            .into_iter()
            .filter_map(|item| SourceRecord::from_value(request.collection, item, "id").ok())
            .map(|record| record.with_stage(request.stage.clone()))
            .collect();

        Ok(SourcePage { records, raw_count })
    }

    async fn fetch_detail(
        &self,
        collection: CollectionType,
        source_id: i64,
    ) -> FetchResult<Option<SourceRecord>> {
        self.detail_fetches.fetch_add(1, Ordering::SeqCst);
        let detail = self.details.lock().unwrap().get(&source_id).cloned();
        detail
            .map(|value| SourceRecord::from_value(collection, value, "id"))
            .transpose()
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn lead(id: i64, updated_at: &str) -> Value {
    json!({
        "id": id,
        "name": format!("Lead {id}"),
        "email": format!("lead{id}@example.com"),
        "updated_at": updated_at,
    })
}

fn leads(count: i64) -> Vec<Value> {
    (1..=count).map(|id| lead(id, "2024-03-01T12:00:00Z")).collect()
}

fn opportunities(ids: std::ops::Range<i64>) -> Vec<Value> {
    ids.map(|id| json!({"id": id, "title": format!("Deal {id}"), "value": "1.500,00"}))
        .collect()
}

fn lead_job(page_limit: u32) -> SyncConfig {
    SyncConfig::new("leads", vec![CollectionPlan::new(CollectionType::Lead)])
        .with_page_limit(page_limit)
}

struct Harness {
    source: Arc<ScriptedSource>,
    store: Arc<InMemoryStore>,
    checkpoints: Arc<MemoryCheckpointStore>,
}

impl Harness {
    fn new(source: ScriptedSource) -> Self {
        Self {
            source: Arc::new(source),
            store: Arc::new(InMemoryStore::new()),
            checkpoints: Arc::new(MemoryCheckpointStore::new()),
        }
    }

    fn orchestrator(&self, config: SyncConfig) -> SyncOrchestrator {
        SyncOrchestrator::new(
            Arc::new(config),
            self.source.clone(),
            self.store.clone(),
            self.checkpoints.clone(),
        )
    }

    async fn rows(&self, collection: CollectionType) -> BTreeMap<i64, CanonicalRecord> {
        self.store
            .list_collection(collection)
            .await
            .unwrap()
            .into_iter()
            .map(|record| (record.id, record))
            .collect()
    }
}

// =============================================================================
// Pagination
// =============================================================================

#[tokio::test]
async fn test_two_full_pages_then_empty_fetches_three_times() {
    let source = ScriptedSource::new();
    source.set(CollectionType::Lead, None, leads(100));
    let harness = Harness::new(source);

    let report = harness
        .orchestrator(lead_job(50).with_stop_on_short_page(false))
        .run(RunOptions::default())
        .await
        .unwrap();

    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(harness.source.fetch_count(), 3);
    assert_eq!(report.this_run.processed, 100);
    assert_eq!(report.this_run.inserted, 100);
    assert_eq!(report.this_run.pages, 2);
    assert_eq!(harness.store.len().await, 100);
    assert!(harness.checkpoints.get("leads").await.is_none());
}

#[tokio::test]
async fn test_short_page_ends_stage() {
    let source = ScriptedSource::new();
    source.set(CollectionType::Lead, None, leads(70));
    let harness = Harness::new(source);

    let report = harness
        .orchestrator(lead_job(50))
        .run(RunOptions::default())
        .await
        .unwrap();

    assert!(report.is_completed());
    assert_eq!(harness.source.fetch_count(), 2);
    assert_eq!(harness.store.len().await, 70);
}

#[tokio::test]
async fn test_page_cap_ends_stage() {
    let source = ScriptedSource::new();
    source.set(CollectionType::Lead, None, leads(500));
    let harness = Harness::new(source);

    let report = harness
        .orchestrator(lead_job(50).with_max_pages_per_stage(2))
        .run(RunOptions::default())
        .await
        .unwrap();

    assert!(report.is_completed());
    assert_eq!(harness.source.fetch_count(), 2);
    assert_eq!(harness.store.len().await, 100);
}

#[tokio::test]
async fn test_empty_source_completes() {
    let harness = Harness::new(ScriptedSource::new());

    let report = harness
        .orchestrator(lead_job(50))
        .run(RunOptions::default())
        .await
        .unwrap();

    assert!(report.is_completed());
    assert_eq!(harness.source.fetch_count(), 1);
    assert_eq!(report.this_run.pages, 0);
    assert!(harness.store.is_empty().await);
}

// =============================================================================
// Idempotence and staleness
// =============================================================================

#[tokio::test]
async fn test_rerun_writes_nothing() {
    let source = ScriptedSource::new();
    source.set(CollectionType::Lead, None, leads(100));
    let harness = Harness::new(source);

    let first = harness
        .orchestrator(lead_job(50))
        .run(RunOptions::default())
        .await
        .unwrap();
    assert_eq!(first.this_run.inserted, 100);
    let before = harness.rows(CollectionType::Lead).await;

    let second = harness
        .orchestrator(lead_job(50))
        .run(RunOptions::forced())
        .await
        .unwrap();

    assert!(second.is_completed());
    assert!(!second.resumed);
    assert_eq!(second.this_run.inserted, 0);
    assert_eq!(second.this_run.updated, 0);
    assert_eq!(second.this_run.skipped, 100);
    assert_eq!(harness.store.insert_count(), 100);
    assert_eq!(harness.store.update_count(), 0);
    assert_eq!(harness.rows(CollectionType::Lead).await, before);
}

#[tokio::test]
async fn test_stale_source_never_overwrites_newer_row() {
    let source = ScriptedSource::new();
    source.set(
        CollectionType::Lead,
        None,
        vec![lead(1, "2024-01-01T00:00:00Z"), lead(2, "2024-09-01T00:00:00Z")],
    );
    let harness = Harness::new(source);

    for (id, updated_at, name) in [
        (1, Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap(), "Kept"),
        (2, Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap(), "Replaced"),
    ] {
        let mut fields = BTreeMap::new();
        fields.insert("name".to_string(), json!(name));
        harness
            .store
            .insert(&CanonicalRecord {
                id,
                collection: CollectionType::Lead,
                source_id: id,
                stage: None,
                fields,
                fingerprint: "seed".to_string(),
                resolved_from: None,
                source_created_at: None,
                source_updated_at: Some(updated_at),
                synced_at: Some(Utc::now()),
            })
            .await
            .unwrap();
    }

    let report = harness
        .orchestrator(lead_job(50))
        .run(RunOptions::default())
        .await
        .unwrap();

    assert_eq!(report.this_run.skipped, 1);
    assert_eq!(report.this_run.updated, 1);

    let rows = harness.rows(CollectionType::Lead).await;
    assert_eq!(rows[&1].fields["name"], json!("Kept"));
    assert_eq!(rows[&2].fields["name"], json!("Lead 2"));
}

#[tokio::test]
async fn test_source_change_is_applied_on_next_run() {
    let source = ScriptedSource::new();
    source.set(CollectionType::Lead, None, leads(10));
    let harness = Harness::new(source);
    harness
        .orchestrator(lead_job(50))
        .run(RunOptions::default())
        .await
        .unwrap();

    let mut changed = leads(10);
    changed[3] = json!({
        "id": 4,
        "name": "Renamed",
        "email": "lead4@example.com",
        "updated_at": "2024-04-01T08:00:00Z",
    });
    harness.source.set(CollectionType::Lead, None, changed);

    let report = harness
        .orchestrator(lead_job(50))
        .run(RunOptions::default())
        .await
        .unwrap();

    assert_eq!(report.this_run.updated, 1);
    assert_eq!(report.this_run.skipped, 9);
    assert_eq!(
        harness.rows(CollectionType::Lead).await[&4].fields["name"],
        json!("Renamed")
    );
}

// =============================================================================
// Abort and resume
// =============================================================================

#[tokio::test]
async fn test_rate_limit_abort_resumes_to_same_state() {
    let source = ScriptedSource::new();
    source.set(CollectionType::Lead, None, leads(150));
    source.fail_on_fetch(2);
    let harness = Harness::new(source);
    let job = || lead_job(50).with_prefetch(false);

    let aborted = harness
        .orchestrator(job())
        .run(RunOptions::default())
        .await
        .unwrap();

    assert_eq!(aborted.status, RunStatus::Aborted);
    assert_eq!(aborted.abort_reason, Some(AbortReason::RateLimited));
    let saved = harness.checkpoints.get("leads").await.unwrap();
    assert_eq!(saved.next_page("lead"), 1);
    assert!(!saved.is_stage_completed("lead"));
    assert_eq!(harness.store.len().await, 50);

    harness.source.fail_on_fetch(0);
    let resumed = harness
        .orchestrator(job())
        .run(RunOptions::default())
        .await
        .unwrap();

    assert!(resumed.is_completed());
    assert!(resumed.resumed);
    assert_eq!(resumed.this_run.processed, 100);
    assert_eq!(resumed.totals.processed, 150);
    assert!(harness.checkpoints.get("leads").await.is_none());

    let clean_source = ScriptedSource::new();
    clean_source.set(CollectionType::Lead, None, leads(150));
    let clean = Harness::new(clean_source);
    clean
        .orchestrator(job())
        .run(RunOptions::default())
        .await
        .unwrap();

    let resumed_rows = harness.rows(CollectionType::Lead).await;
    let clean_rows = clean.rows(CollectionType::Lead).await;
    assert_eq!(resumed_rows.len(), 150);
    for (id, row) in &clean_rows {
        assert_eq!(resumed_rows[id].fields, row.fields);
        assert_eq!(resumed_rows[id].fingerprint, row.fingerprint);
    }
}

#[tokio::test]
async fn test_stage_cursors_are_independent() {
    let source = ScriptedSource::new();
    source.set(CollectionType::Opportunity, Some("10"), opportunities(1..61));
    source.set(CollectionType::Opportunity, Some("20"), opportunities(100..130));
    source.fail_on_fetch(3);
    let harness = Harness::new(source);
    let job = || {
        SyncConfig::new(
            "deals",
            vec![CollectionPlan::new(CollectionType::Opportunity).with_stages(["10", "20"])],
        )
        .with_page_limit(50)
        .with_prefetch(false)
    };

    let aborted = harness
        .orchestrator(job())
        .run(RunOptions::default())
        .await
        .unwrap();

    assert_eq!(aborted.status, RunStatus::Aborted);
    let saved = harness.checkpoints.get("deals").await.unwrap();
    assert!(saved.is_stage_completed("opportunity/10"));
    assert!(!saved.is_stage_completed("opportunity/20"));
    assert_eq!(saved.next_page("opportunity/20"), 0);

    harness.source.fail_on_fetch(0);
    let fetches_before = harness.source.fetch_count();
    let resumed = harness
        .orchestrator(job())
        .run(RunOptions::default())
        .await
        .unwrap();

    assert!(resumed.is_completed());
    assert_eq!(harness.source.fetch_count() - fetches_before, 1);
    assert_eq!(harness.store.len().await, 90);
    let rows = harness.rows(CollectionType::Opportunity).await;
    assert_eq!(rows[&100].stage.as_deref(), Some("20"));
    assert_eq!(rows[&1].fields["value"], json!(1500.0));
}

#[tokio::test]
async fn test_cancellation_stops_at_page_boundary() {
    let source = ScriptedSource::new().with_latency(Duration::from_millis(150));
    source.set(CollectionType::Lead, None, leads(1000));
    let harness = Harness::new(source);
    let orchestrator = Arc::new(harness.orchestrator(lead_job(50).with_prefetch(false)));
    let token = orchestrator.cancellation_token();

    let handle = tokio::spawn({
        let orchestrator = Arc::clone(&orchestrator);
        async move { orchestrator.run(RunOptions::default()).await }
    });
    tokio::time::sleep(Duration::from_millis(400)).await;
    token.cancel();
    let report = handle.await.unwrap().unwrap();

    assert_eq!(report.status, RunStatus::Aborted);
    assert_eq!(report.abort_reason, Some(AbortReason::Cancelled));
    let saved = harness.checkpoints.get("leads").await.unwrap();
    let committed = saved.next_page("lead");
    assert!((1..=3).contains(&committed));
    assert_eq!(harness.store.len().await, committed as usize * 50);
}

#[tokio::test]
async fn test_deadline_aborts_run() {
    let source = ScriptedSource::new().with_latency(Duration::from_millis(400));
    source.set(CollectionType::Lead, None, leads(500));
    let harness = Harness::new(source);

    let report = harness
        .orchestrator(
            lead_job(50)
                .with_prefetch(false)
                .with_max_run_duration(1),
        )
        .run(RunOptions::default())
        .await
        .unwrap();

    assert_eq!(report.abort_reason, Some(AbortReason::DeadlineExceeded));
    let saved = harness.checkpoints.get("leads").await.unwrap();
    assert!((1..=2).contains(&saved.next_page("lead")));
    assert!(report.render_table().contains("deadline_exceeded"));
}

// =============================================================================
// Identity matching
// =============================================================================

#[tokio::test]
async fn test_opportunities_match_leads_by_email_and_phone() {
    let source = ScriptedSource::new();
    source.set(
        CollectionType::Lead,
        None,
        vec![
            json!({"id": 1, "name": "Ana", "email": "Ana.Souza@Example.com"}),
            json!({"id": 2, "name": "Bruno", "phone": "(21) 3456-7890"}),
        ],
    );
    source.set(
        CollectionType::Opportunity,
        None,
        vec![
            json!({"id": 500, "title": "Deal A", "contact": {"email": "  ANA.SOUZA@example.COM "}}),
            json!({"id": 501, "title": "Deal B", "contact": {"phone": "+55 21 3456-7890"}}),
            json!({"id": 502, "title": "Deal C", "contact": {"email": "nobody@example.com"}}),
        ],
    );
    let harness = Harness::new(source);

    let config = SyncConfig::new(
        "matched",
        vec![
            CollectionPlan::new(CollectionType::Lead),
            CollectionPlan::new(CollectionType::Opportunity).with_identity(
                IdentityStrategy::Matched {
                    direct_key: Some("lead_id".to_string()),
                    references: vec![ReferenceSource::Canonical {
                        collection: CollectionType::Lead,
                    }],
                },
            ),
        ],
    );
    let report = harness
        .orchestrator(config)
        .run(RunOptions::default())
        .await
        .unwrap();

    assert!(report.is_completed());
    assert_eq!(report.this_run.unmatched, 1);

    let deals = harness.rows(CollectionType::Opportunity).await;
    assert_eq!(deals.len(), 2);
    assert_eq!(deals[&1].source_id, 500);
    assert_eq!(deals[&1].resolved_from.as_deref(), Some("email:canonical:lead"));
    assert_eq!(deals[&2].source_id, 501);
    assert_eq!(deals[&2].resolved_from.as_deref(), Some("phone:canonical:lead"));
}

#[tokio::test]
async fn test_direct_key_wins_over_contact() {
    let source = ScriptedSource::new();
    source.set(
        CollectionType::Opportunity,
        None,
        vec![json!({"id": 700, "lead_id": "42", "contact": {"email": "x@example.com"}})],
    );
    let harness = Harness::new(source);

    let config = SyncConfig::new(
        "direct",
        vec![CollectionPlan::new(CollectionType::Opportunity).with_identity(
            IdentityStrategy::Matched {
                direct_key: Some("lead_id".to_string()),
                references: Vec::new(),
            },
        )],
    );
    harness
        .orchestrator(config)
        .run(RunOptions::default())
        .await
        .unwrap();

    let deals = harness.rows(CollectionType::Opportunity).await;
    assert_eq!(deals[&42].resolved_from.as_deref(), Some("direct:lead_id"));
}

// =============================================================================
// Mapping
// =============================================================================

#[tokio::test]
async fn test_unknown_fields_are_reported_not_fatal() {
    let source = ScriptedSource::new();
    source.set(
        CollectionType::Lead,
        None,
        vec![
            json!({"id": 1, "name": "Ana", "favorite_color": "blue"}),
            json!({"id": 2, "name": "Bruno", "favorite_color": "green"}),
        ],
    );
    let harness = Harness::new(source);

    let report = harness
        .orchestrator(lead_job(50))
        .run(RunOptions::default())
        .await
        .unwrap();

    assert!(report.is_completed());
    assert_eq!(harness.store.len().await, 2);
    assert_eq!(report.schema_drift.len(), 1);
    assert_eq!(report.schema_drift[0].field, "favorite_color");
    assert_eq!(report.schema_drift[0].occurrences, 2);
}

#[tokio::test]
async fn test_items_without_id_are_reported_as_dropped() {
    let source = ScriptedSource::new();
    source.set(
        CollectionType::Lead,
        None,
        vec![
            json!({"name": "No id"}),
            json!({"id": 1, "name": "Ana"}),
            json!({"id": "not-a-number", "name": "Bad id"}),
        ],
    );
    let harness = Harness::new(source);

    let report = harness
        .orchestrator(lead_job(50))
        .run(RunOptions::default())
        .await
        .unwrap();

    assert!(report.is_completed());
    assert_eq!(harness.store.len().await, 1);
    assert_eq!(report.this_run.processed, 1);
    assert_eq!(report.this_run.inserted, 1);
    assert_eq!(report.this_run.dropped, 2);
    assert_eq!(report.totals.dropped, 2);
    assert_eq!(report.stages[0].counts.dropped, 2);
    assert!(report.totals.has_failures());
}

#[tokio::test]
async fn test_detail_enrichment_merges_fields() {
    let source = ScriptedSource::new();
    source.set(CollectionType::Lead, None, vec![json!({"id": 1, "name": "Ana"})]);
    source.set_detail(1, json!({"id": 1, "company": "Acme"}));
    let harness = Harness::new(source);

    let config = SyncConfig::new(
        "enriched",
        vec![CollectionPlan::new(CollectionType::Lead).with_detail_enrichment()],
    );
    harness
        .orchestrator(config)
        .run(RunOptions::default())
        .await
        .unwrap();

    let rows = harness.rows(CollectionType::Lead).await;
    assert_eq!(rows[&1].fields["name"], json!("Ana"));
    assert_eq!(rows[&1].fields["company"], json!("Acme"));
    assert_eq!(harness.source.detail_fetches.load(Ordering::SeqCst), 1);
}

// =============================================================================
// Run options
// =============================================================================

#[tokio::test]
async fn test_outside_window_skips_unless_forced() {
    let source = ScriptedSource::new();
    source.set(CollectionType::Lead, None, leads(5));
    let harness = Harness::new(source);
    let hour = Utc::now().hour();
    let job = || lead_job(50).with_window(ScheduleWindow::new((hour + 1) % 24, (hour + 2) % 24));

    let skipped = harness
        .orchestrator(job())
        .run(RunOptions::default())
        .await
        .unwrap();
    assert_eq!(skipped.status, RunStatus::Skipped);
    assert_eq!(harness.source.fetch_count(), 0);

    let forced = harness
        .orchestrator(job())
        .run(RunOptions::forced())
        .await
        .unwrap();
    assert!(forced.is_completed());
    assert!(forced.forced);
    assert_eq!(harness.store.len().await, 5);
}

#[tokio::test]
async fn test_dry_run_writes_nothing() {
    let source = ScriptedSource::new();
    source.set(CollectionType::Lead, None, leads(60));
    let harness = Harness::new(source);

    let report = harness
        .orchestrator(lead_job(50))
        .run(RunOptions {
            dry_run: true,
            ..RunOptions::default()
        })
        .await
        .unwrap();

    assert!(report.is_completed());
    assert!(report.dry_run);
    assert_eq!(report.this_run.inserted, 60);
    assert!(harness.store.is_empty().await);
    assert_eq!(harness.checkpoints.save_count(), 0);
}

#[tokio::test]
async fn test_invalid_config_fails_before_fetch() {
    let harness = Harness::new(ScriptedSource::new());

    let err = harness
        .orchestrator(lead_job(0))
        .run(RunOptions::default())
        .await
        .unwrap_err();

    assert!(err.is_fatal());
    assert_eq!(harness.source.fetch_count(), 0);
    assert!(harness.checkpoints.load("leads").await.unwrap().is_fresh());
}

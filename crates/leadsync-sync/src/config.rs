//! Job configuration.
//!
//! A [`SyncConfig`] is built once per job, validated, then shared read-only
//! (`Arc<SyncConfig>`) with every component of the run.

use chrono::{DateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Duration;

use leadsync_connector::types::CollectionType;

use crate::error::{SyncError, SyncResult};
use crate::mapping::{CollectionMapping, FieldMapping};

/// Longest accepted wall-clock budget of a run (one week).
pub const MAX_RUN_DURATION_SECS: u64 = 7 * 24 * 60 * 60;

/// Paging and pacing parameters of one job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncSettings {
    /// Records requested per page.
    #[serde(default = "default_page_limit")]
    pub page_limit: u32,
    /// Records written per reconcile batch.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Pause between consecutive page requests of a stage.
    #[serde(default)]
    pub delay_ms: u64,
    /// Fetcher retry budget, applied to the source retry policy.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_page_limit() -> u32 {
    100
}

fn default_batch_size() -> usize {
    50
}

fn default_max_retries() -> u32 {
    5
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            page_limit: default_page_limit(),
            batch_size: default_batch_size(),
            delay_ms: 0,
            max_retries: default_max_retries(),
        }
    }
}

impl SyncSettings {
    /// Pause between pages.
    #[must_use]
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

/// UTC hour window a scheduled job may run in. `start == end` is invalid.
///
/// Wraps past midnight when `end_hour_utc < start_hour_utc`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleWindow {
    pub start_hour_utc: u32,
    pub end_hour_utc: u32,
}

impl ScheduleWindow {
    /// Create a window.
    #[must_use]
    pub fn new(start_hour_utc: u32, end_hour_utc: u32) -> Self {
        Self {
            start_hour_utc,
            end_hour_utc,
        }
    }

    /// Whether an instant falls inside the window (end hour exclusive).
    #[must_use]
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        let hour = at.hour();
        if self.start_hour_utc < self.end_hour_utc {
            hour >= self.start_hour_utc && hour < self.end_hour_utc
        } else {
            hour >= self.start_hour_utc || hour < self.end_hour_utc
        }
    }

    fn validate(&self) -> Result<(), String> {
        if self.start_hour_utc > 23 || self.end_hour_utc > 23 {
            return Err("window hours must be between 0 and 23".to_string());
        }
        if self.start_hour_utc == self.end_hour_utc {
            return Err("window start and end hours must differ".to_string());
        }
        Ok(())
    }
}

/// Where a matched collection looks up canonical ids.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReferenceSource {
    /// Canonical records already in the store.
    Canonical { collection: CollectionType },
    /// A remote collection whose items carry both a contact and a canonical id.
    Remote {
        collection: CollectionType,
        /// Mapped integer field holding the canonical id.
        id_field: String,
        #[serde(default)]
        stages: Vec<String>,
    },
}

impl ReferenceSource {
    /// Provenance label used in `resolved_from`.
    #[must_use]
    pub fn label(&self) -> String {
        match self {
            ReferenceSource::Canonical { collection } => format!("canonical:{collection}"),
            ReferenceSource::Remote { collection, .. } => format!("remote:{collection}"),
        }
    }
}

/// How a collection's records obtain their canonical id.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IdentityStrategy {
    /// The source id is the canonical id.
    #[default]
    Authoritative,
    /// Resolved through a direct foreign key, then contact matching.
    Matched {
        /// Mapped integer field holding the canonical id, tried first.
        #[serde(default)]
        direct_key: Option<String>,
        /// Reference collections, tried in order.
        #[serde(default)]
        references: Vec<ReferenceSource>,
    },
}

impl IdentityStrategy {
    /// Whether records need matching.
    #[must_use]
    pub fn is_matched(&self) -> bool {
        matches!(self, IdentityStrategy::Matched { .. })
    }
}

/// One collection a job synchronizes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionPlan {
    pub collection: CollectionType,
    /// Stage partitions; empty means a single unpartitioned listing.
    #[serde(default)]
    pub stages: Vec<String>,
    #[serde(default)]
    pub identity: IdentityStrategy,
    /// Re-fetch every listed record through the detail endpoint.
    #[serde(default)]
    pub enrich_with_detail: bool,
    /// Field mapping overrides, by target name.
    #[serde(default)]
    pub fields: Vec<FieldMapping>,
    /// Source keys that are known and deliberately not mapped.
    #[serde(default)]
    pub ignored_fields: Vec<String>,
}

impl CollectionPlan {
    /// Create a plan with an authoritative identity.
    #[must_use]
    pub fn new(collection: CollectionType) -> Self {
        Self {
            collection,
            stages: Vec::new(),
            identity: IdentityStrategy::Authoritative,
            enrich_with_detail: false,
            fields: Vec::new(),
            ignored_fields: Vec::new(),
        }
    }

    /// Set the stage partitions.
    #[must_use]
    pub fn with_stages<I, S>(mut self, stages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.stages = stages.into_iter().map(Into::into).collect();
        self
    }

    /// Set the identity strategy.
    #[must_use]
    pub fn with_identity(mut self, identity: IdentityStrategy) -> Self {
        self.identity = identity;
        self
    }

    /// Enable detail enrichment.
    #[must_use]
    pub fn with_detail_enrichment(mut self) -> Self {
        self.enrich_with_detail = true;
        self
    }

    /// Add field mapping overrides.
    #[must_use]
    pub fn with_fields(mut self, fields: Vec<FieldMapping>) -> Self {
        self.fields = fields;
        self
    }

    /// Stage keys in processing order. An unpartitioned plan has one `None` stage.
    #[must_use]
    pub fn stage_keys(&self) -> Vec<Option<String>> {
        if self.stages.is_empty() {
            vec![None]
        } else {
            self.stages.iter().cloned().map(Some).collect()
        }
    }

    /// The effective field layout.
    #[must_use]
    pub fn mapping(&self) -> CollectionMapping {
        CollectionMapping::defaults_for(self.collection)
            .with_overrides(self.fields.clone())
            .with_ignored(self.ignored_fields.iter().cloned())
    }
}

/// Checkpoint key of one stage of one collection.
#[must_use]
pub fn stage_key(collection: CollectionType, stage: Option<&str>) -> String {
    match stage {
        Some(stage) => format!("{collection}/{stage}"),
        None => collection.to_string(),
    }
}

/// Immutable configuration of one synchronization job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncConfig {
    pub name: String,
    #[serde(default)]
    pub settings: SyncSettings,
    /// Wall-clock budget of a run; exceeding it aborts at a page boundary.
    #[serde(default = "default_max_run_duration_secs")]
    pub max_run_duration_secs: u64,
    /// Safety valve ending a stage that never signals end of data.
    #[serde(default = "default_max_pages_per_stage")]
    pub max_pages_per_stage: u32,
    /// Treat a page shorter than `page_limit` as the last one.
    #[serde(default = "default_true")]
    pub stop_on_short_page: bool,
    /// Fetch page N+1 while page N is reconciled.
    #[serde(default = "default_true")]
    pub prefetch: bool,
    /// Parallel workers mapping and matching a page.
    #[serde(default = "default_mapping_workers")]
    pub mapping_workers: usize,
    /// Concurrent store writes within a batch.
    #[serde(default = "default_write_concurrency")]
    pub write_concurrency: usize,
    /// Stages of one collection processed concurrently.
    #[serde(default = "default_stage_concurrency")]
    pub stage_concurrency: usize,
    /// Concurrent detail requests when enriching.
    #[serde(default = "default_detail_concurrency")]
    pub detail_concurrency: usize,
    /// Decide without writing records or checkpoints.
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window: Option<ScheduleWindow>,
    pub collections: Vec<CollectionPlan>,
}

fn default_max_run_duration_secs() -> u64 {
    3600
}

fn default_max_pages_per_stage() -> u32 {
    10_000
}

fn default_true() -> bool {
    true
}

fn default_mapping_workers() -> usize {
    4
}

fn default_write_concurrency() -> usize {
    8
}

fn default_stage_concurrency() -> usize {
    1
}

fn default_detail_concurrency() -> usize {
    4
}

impl SyncConfig {
    /// Create a job with default settings.
    pub fn new(name: impl Into<String>, collections: Vec<CollectionPlan>) -> Self {
        Self {
            name: name.into(),
            settings: SyncSettings::default(),
            max_run_duration_secs: default_max_run_duration_secs(),
            max_pages_per_stage: default_max_pages_per_stage(),
            stop_on_short_page: true,
            prefetch: true,
            mapping_workers: default_mapping_workers(),
            write_concurrency: default_write_concurrency(),
            stage_concurrency: default_stage_concurrency(),
            detail_concurrency: default_detail_concurrency(),
            dry_run: false,
            window: None,
            collections,
        }
    }

    /// Set paging parameters.
    #[must_use]
    pub fn with_settings(mut self, settings: SyncSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Set the page limit.
    #[must_use]
    pub fn with_page_limit(mut self, page_limit: u32) -> Self {
        self.settings.page_limit = page_limit;
        self
    }

    /// Set the run deadline.
    #[must_use]
    pub fn with_max_run_duration(mut self, secs: u64) -> Self {
        self.max_run_duration_secs = secs;
        self
    }

    /// Set the per-stage page cap.
    #[must_use]
    pub fn with_max_pages_per_stage(mut self, pages: u32) -> Self {
        self.max_pages_per_stage = pages;
        self
    }

    /// Enable or disable prefetching.
    #[must_use]
    pub fn with_prefetch(mut self, prefetch: bool) -> Self {
        self.prefetch = prefetch;
        self
    }

    /// Enable or disable the short-page stop rule.
    #[must_use]
    pub fn with_stop_on_short_page(mut self, stop: bool) -> Self {
        self.stop_on_short_page = stop;
        self
    }

    /// Set stage concurrency.
    #[must_use]
    pub fn with_stage_concurrency(mut self, stages: usize) -> Self {
        self.stage_concurrency = stages;
        self
    }

    /// Set write concurrency.
    #[must_use]
    pub fn with_write_concurrency(mut self, writes: usize) -> Self {
        self.write_concurrency = writes;
        self
    }

    /// Set the schedule window.
    #[must_use]
    pub fn with_window(mut self, window: ScheduleWindow) -> Self {
        self.window = Some(window);
        self
    }

    /// Enable dry-run mode.
    #[must_use]
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Wall-clock budget.
    #[must_use]
    pub fn max_run_duration(&self) -> Duration {
        Duration::from_secs(self.max_run_duration_secs)
    }

    /// Whether the job may start at `now`.
    #[must_use]
    pub fn in_window(&self, now: DateTime<Utc>) -> bool {
        self.window.map_or(true, |w| w.contains(now))
    }

    /// Validate the job. Errors here are fatal and raised before any fetch.
    pub fn validate(&self) -> SyncResult<()> {
        let fail = |message: String| Err(SyncError::configuration(format!("job '{}': {message}", self.name)));

        if self.name.trim().is_empty() {
            return Err(SyncError::configuration("job name must not be empty"));
        }
        if self.settings.page_limit == 0 {
            return fail("page_limit must be positive".to_string());
        }
        if self.settings.batch_size == 0 {
            return fail("batch_size must be positive".to_string());
        }
        if self.mapping_workers == 0
            || self.write_concurrency == 0
            || self.stage_concurrency == 0
            || self.detail_concurrency == 0
        {
            return fail("worker and concurrency limits must be positive".to_string());
        }
        if self.max_run_duration_secs == 0 {
            return fail("max_run_duration_secs must be positive".to_string());
        }
        if self.max_run_duration_secs > MAX_RUN_DURATION_SECS {
            return fail(format!(
                "max_run_duration_secs must be at most {MAX_RUN_DURATION_SECS}"
            ));
        }
        if self.max_pages_per_stage == 0 {
            return fail("max_pages_per_stage must be positive".to_string());
        }
        if let Some(window) = &self.window {
            if let Err(message) = window.validate() {
                return fail(message);
            }
        }
        if self.collections.is_empty() {
            return fail("at least one collection is required".to_string());
        }

        let mut seen = BTreeSet::new();
        for plan in &self.collections {
            if !seen.insert(plan.collection) {
                return fail(format!("collection '{}' is listed twice", plan.collection));
            }

            let mut stages = BTreeSet::new();
            if let Some(stage) = plan.stages.iter().find(|s| !stages.insert(s.as_str())) {
                return fail(format!(
                    "collection '{}' lists stage '{stage}' twice",
                    plan.collection
                ));
            }

            if let IdentityStrategy::Matched {
                direct_key,
                references,
            } = &plan.identity
            {
                if direct_key.is_none() && references.is_empty() {
                    return fail(format!(
                        "matched collection '{}' needs a direct_key or at least one reference",
                        plan.collection
                    ));
                }
                for reference in references {
                    if let ReferenceSource::Remote { id_field, .. } = reference {
                        if id_field.trim().is_empty() {
                            return fail(format!(
                                "remote reference of '{}' needs an id_field",
                                plan.collection
                            ));
                        }
                    }
                }
            }

            for mapping in &plan.fields {
                if mapping.target.trim().is_empty() || mapping.candidates.is_empty() {
                    return fail(format!(
                        "field overrides of '{}' need a target and candidates",
                        plan.collection
                    ));
                }
            }
        }

        Ok(())
    }
}

/// Per-invocation switches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunOptions {
    /// Run outside the schedule window.
    pub force: bool,
    /// Decide without writing.
    pub dry_run: bool,
}

impl RunOptions {
    /// Forced run.
    #[must_use]
    pub fn forced() -> Self {
        Self {
            force: true,
            dry_run: false,
        }
    }
}

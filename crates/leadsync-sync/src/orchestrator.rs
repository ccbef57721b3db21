//! Sync orchestrator.
//!
//! Drives one job: for every stage of every collection it fetches a page,
//! maps and matches its records, reconciles them against the canonical
//! store and commits the checkpoint, until end of data or an abort.
//!
//! A page is committed only after all of its records were reconciled, so
//! an abort at any point resumes at the first page that was not fully
//! written. Aborts are observed at page boundaries and while waiting on the
//! source.

use chrono::Utc;
use futures::future::TryFutureExt;
use futures::stream::{self, StreamExt, TryStreamExt};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, trace, warn};
use uuid::Uuid;

use leadsync_connector::error::{FetchError, FetchResult};
use leadsync_connector::traits::SourceCollection;
use leadsync_connector::types::{CollectionType, PageRequest, SourcePage, SourceRecord};

use crate::checkpoint::{Checkpoint, CheckpointError, CheckpointStore, CheckpointWriter};
use crate::config::{
    stage_key, CollectionPlan, IdentityStrategy, ReferenceSource, RunOptions, SyncConfig,
    MAX_RUN_DURATION_SECS,
};
use crate::error::{SyncError, SyncResult};
use crate::mapping::{CollectionMapping, FieldMapper, MappedRecord, SchemaDriftTracker};
use crate::matching::{IdentityMatcher, MatchIndex, ReferenceRecord};
use crate::reconcile::{CanonicalCandidate, RecordFailure, Reconciler};
use crate::report::{AbortReason, RunReport, RunStatus, StageReport, MAX_FAILURE_SAMPLES};
use crate::statistics::{RunTracker, StageCounts};
use crate::store::{CanonicalStore, StoreError};

/// Processing state of one stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    FetchingPage,
    Mapping,
    Matching,
    Reconciling,
    CheckpointSaved,
    Completed,
    Aborted,
}

impl RunState {
    /// Get the string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            RunState::Idle => "idle",
            RunState::FetchingPage => "fetching_page",
            RunState::Mapping => "mapping",
            RunState::Matching => "matching",
            RunState::Reconciling => "reconciling",
            RunState::CheckpointSaved => "checkpoint_saved",
            RunState::Completed => "completed",
            RunState::Aborted => "aborted",
        }
    }

    /// Check if this is a terminal state.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Completed | RunState::Aborted)
    }

    /// Check if a transition to `next` is valid.
    #[must_use]
    pub fn can_transition_to(&self, next: RunState) -> bool {
        if next == RunState::Aborted {
            return !self.is_terminal();
        }
        matches!(
            (self, next),
            (RunState::Idle, RunState::FetchingPage)
                | (RunState::Idle, RunState::Completed)
                | (RunState::FetchingPage, RunState::Mapping)
                | (RunState::FetchingPage, RunState::Completed)
                | (RunState::Mapping, RunState::Matching)
                | (RunState::Matching, RunState::Reconciling)
                | (RunState::Reconciling, RunState::CheckpointSaved)
                | (RunState::CheckpointSaved, RunState::FetchingPage)
                | (RunState::CheckpointSaved, RunState::Completed)
        )
    }
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// State of one stage of a run.
#[derive(Debug)]
struct StageMachine {
    key: String,
    state: RunState,
}

impl StageMachine {
    fn new(key: &str) -> Self {
        Self {
            key: key.to_string(),
            state: RunState::Idle,
        }
    }

    fn transition(&mut self, next: RunState) -> SyncResult<()> {
        if !self.state.can_transition_to(next) {
            return Err(SyncError::invalid_transition(self.state, next));
        }
        trace!(stage = %self.key, from = %self.state, to = %next, "Stage transition");
        self.state = next;
        Ok(())
    }

    fn abort(&mut self) {
        if !self.state.is_terminal() {
            trace!(stage = %self.key, from = %self.state, "Stage aborted");
            self.state = RunState::Aborted;
        }
    }
}

#[derive(Debug, Clone)]
struct Abort {
    reason: AbortReason,
    message: String,
}

impl Abort {
    fn new(reason: AbortReason, message: impl Into<String>) -> Self {
        Self {
            reason,
            message: message.into(),
        }
    }

    fn deadline() -> Self {
        Self::new(AbortReason::DeadlineExceeded, "run deadline reached")
    }
}

/// Why a stage stopped before end of data.
#[derive(Debug)]
enum Interrupt {
    Abort(Abort),
    /// Another stage aborted the run.
    Stopped,
}

impl Interrupt {
    fn internal(message: impl Into<String>) -> Self {
        Interrupt::Abort(Abort::new(AbortReason::Internal, message))
    }

    fn into_abort(self) -> Abort {
        match self {
            Interrupt::Abort(abort) => abort,
            Interrupt::Stopped => Abort::new(AbortReason::Cancelled, "run stopped"),
        }
    }
}

impl From<FetchError> for Interrupt {
    fn from(err: FetchError) -> Self {
        let reason = match err {
            FetchError::RateLimited { .. } => AbortReason::RateLimited,
            _ => AbortReason::Unavailable,
        };
        Interrupt::Abort(Abort::new(reason, err.to_string()))
    }
}

impl From<StoreError> for Interrupt {
    fn from(err: StoreError) -> Self {
        Interrupt::Abort(Abort::new(AbortReason::Store, err.to_string()))
    }
}

impl From<CheckpointError> for Interrupt {
    fn from(err: CheckpointError) -> Self {
        Interrupt::Abort(Abort::new(AbortReason::Checkpoint, err.to_string()))
    }
}

impl From<SyncError> for Interrupt {
    fn from(err: SyncError) -> Self {
        Interrupt::internal(err.to_string())
    }
}

/// A page fetched ahead of time. Dropping it cancels the fetch.
struct Prefetch {
    page: u32,
    handle: JoinHandle<FetchResult<SourcePage>>,
}

impl Drop for Prefetch {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Shared state of one run.
struct RunContext {
    writer: CheckpointWriter,
    reconciler: Reconciler,
    tracker: RunTracker,
    drift: Arc<SchemaDriftTracker>,
    deadline: Instant,
    /// Operator cancellation.
    cancel: CancellationToken,
    /// Cancelled on operator cancellation or when a stage aborts.
    abort: CancellationToken,
    failures: Mutex<Vec<RecordFailure>>,
}

impl RunContext {
    fn interruption(&self) -> Option<Interrupt> {
        if self.cancel.is_cancelled() {
            return Some(Interrupt::Abort(Abort::new(
                AbortReason::Cancelled,
                "cancelled by operator",
            )));
        }
        if self.abort.is_cancelled() {
            return Some(Interrupt::Stopped);
        }
        if Instant::now() >= self.deadline {
            return Some(Interrupt::Abort(Abort::deadline()));
        }
        None
    }

    async fn record_failures(&self, failures: Vec<RecordFailure>) {
        if failures.is_empty() {
            return;
        }
        let mut samples = self.failures.lock().await;
        let room = MAX_FAILURE_SAMPLES.saturating_sub(samples.len());
        samples.extend(failures.into_iter().take(room));
    }
}

/// Runs synchronization jobs against one source, store and checkpoint store.
pub struct SyncOrchestrator {
    config: Arc<SyncConfig>,
    source: Arc<dyn SourceCollection>,
    canonical: Arc<dyn CanonicalStore>,
    checkpoints: Arc<dyn CheckpointStore>,
    cancel: CancellationToken,
}

impl SyncOrchestrator {
    /// Create an orchestrator for one job.
    pub fn new(
        config: Arc<SyncConfig>,
        source: Arc<dyn SourceCollection>,
        canonical: Arc<dyn CanonicalStore>,
        checkpoints: Arc<dyn CheckpointStore>,
    ) -> Self {
        Self {
            config,
            source,
            canonical,
            checkpoints,
            cancel: CancellationToken::new(),
        }
    }

    /// Use an externally owned cancellation token.
    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Token that cancels a running job at its next page boundary.
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Job configuration.
    #[must_use]
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Run the job once.
    ///
    /// Configuration, store and checkpoint-load errors are returned before
    /// any page is fetched. Every later failure ends the run with an
    /// [`RunStatus::Aborted`] report and a resumable checkpoint.
    #[instrument(skip(self), fields(job = %self.config.name))]
    pub async fn run(&self, options: RunOptions) -> SyncResult<RunReport> {
        self.config.validate()?;

        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        if !options.force && !self.config.in_window(started_at) {
            info!(run_id = %run_id, "Outside schedule window, skipping run");
            return Ok(RunReport::skipped(&self.config.name, run_id, started_at));
        }

        self.canonical.health_check().await?;
        let checkpoint = self.checkpoints.load(&self.config.name).await?;
        let resumed = !checkpoint.is_fresh();
        let dry_run = options.dry_run || self.config.dry_run;

        let mut writer = CheckpointWriter::new(Arc::clone(&self.checkpoints), checkpoint);
        if dry_run {
            writer = writer.without_persistence();
        }
        let ctx = RunContext {
            writer,
            reconciler: Reconciler::new(
                Arc::clone(&self.canonical),
                self.config.settings.batch_size,
                self.config.write_concurrency,
            )
            .with_dry_run(dry_run),
            tracker: RunTracker::new(),
            drift: Arc::new(SchemaDriftTracker::new()),
            deadline: run_deadline(Instant::now(), self.config.max_run_duration()),
            cancel: self.cancel.clone(),
            abort: self.cancel.child_token(),
            failures: Mutex::new(Vec::new()),
        };

        info!(
            run_id = %run_id,
            source = %self.source.display_name(),
            resumed,
            dry_run,
            forced = options.force,
            "Starting sync run"
        );

        let mut ambiguities = 0u64;
        let mut abort = None;
        for plan in &self.config.collections {
            match self.run_collection(&ctx, plan).await {
                Ok(collisions) => ambiguities += collisions,
                Err(a) => {
                    abort = Some(a);
                    break;
                }
            }
        }

        if abort.is_none() {
            if let Err(e) = ctx.writer.clear().await {
                warn!(error = %e, "Failed to clear checkpoint of completed run");
            }
        }

        let checkpoint = ctx.writer.snapshot().await;
        let this_run = ctx.tracker.snapshot();
        let elapsed_ms = u64::try_from(ctx.tracker.elapsed().as_millis()).unwrap_or(u64::MAX);
        let report = RunReport {
            run_id,
            job: self.config.name.clone(),
            status: if abort.is_some() {
                RunStatus::Aborted
            } else {
                RunStatus::Completed
            },
            abort_reason: abort.as_ref().map(|a| a.reason),
            abort_message: abort.as_ref().map(|a| a.message.clone()),
            dry_run,
            forced: options.force,
            resumed,
            started_at,
            finished_at: Utc::now(),
            elapsed_ms,
            totals: checkpoint.counts_so_far,
            this_run,
            stages: self.stage_reports(&checkpoint),
            schema_drift: ctx.drift.snapshot(),
            match_ambiguities: ambiguities,
            failures: ctx.failures.into_inner(),
        };

        match &abort {
            None => info!(
                run_id = %run_id,
                processed = this_run.processed,
                inserted = this_run.inserted,
                updated = this_run.updated,
                skipped = this_run.skipped,
                failed = this_run.failed,
                unmatched = this_run.unmatched,
                dropped = this_run.dropped,
                pages = this_run.pages,
                elapsed_ms,
                "Sync run completed"
            ),
            Some(a) => error!(
                run_id = %run_id,
                reason = %a.reason,
                message = %a.message,
                pages = this_run.pages,
                elapsed_ms,
                "Sync run aborted, checkpoint kept for resume"
            ),
        }

        Ok(report)
    }

    /// Run every stage of one collection. Returns the match ambiguity count.
    async fn run_collection(&self, ctx: &RunContext, plan: &CollectionPlan) -> Result<u64, Abort> {
        let stages: Vec<(Option<String>, String)> = plan
            .stage_keys()
            .into_iter()
            .map(|stage| {
                let key = stage_key(plan.collection, stage.as_deref());
                (stage, key)
            })
            .collect();

        let checkpoint = ctx.writer.snapshot().await;
        if stages
            .iter()
            .all(|(_, key)| checkpoint.is_stage_completed(key))
        {
            debug!(collection = %plan.collection, "Every stage already completed");
            return Ok(0);
        }

        let matcher = Arc::new(
            self.build_matcher(ctx, plan)
                .await
                .map_err(Interrupt::into_abort)?,
        );
        let mapper = Arc::new(FieldMapper::new(plan.mapping(), Arc::clone(&ctx.drift)));

        let results: Vec<Result<(), Interrupt>> = stream::iter(stages)
            .map(|(stage, key)| {
                let mapper = Arc::clone(&mapper);
                let matcher = Arc::clone(&matcher);
                async move {
                    let result = self
                        .run_stage(ctx, plan, stage, &key, mapper, matcher)
                        .await;
                    if let Err(Interrupt::Abort(abort)) = &result {
                        warn!(
                            stage = %key,
                            reason = %abort.reason,
                            message = %abort.message,
                            "Stage aborted"
                        );
                        ctx.abort.cancel();
                    }
                    result
                }
            })
            .buffer_unordered(self.config.stage_concurrency)
            .collect()
            .await;

        let first_abort = results.into_iter().find_map(|r| match r {
            Err(Interrupt::Abort(abort)) => Some(abort),
            _ => None,
        });
        match first_abort {
            Some(abort) => Err(abort),
            None => Ok(matcher.ambiguities() as u64),
        }
    }

    /// Process one stage from its checkpointed page to end of data.
    #[instrument(skip_all, fields(stage = %key))]
    async fn run_stage(
        &self,
        ctx: &RunContext,
        plan: &CollectionPlan,
        stage: Option<String>,
        key: &str,
        mapper: Arc<FieldMapper>,
        matcher: Arc<IdentityMatcher>,
    ) -> Result<(), Interrupt> {
        let mut machine = StageMachine::new(key);
        let checkpoint = ctx.writer.snapshot().await;
        if checkpoint.is_stage_completed(key) {
            debug!("Stage already completed");
            machine.transition(RunState::Completed)?;
            return Ok(());
        }

        let result = self
            .stage_loop(ctx, plan, stage, key, &mut machine, &checkpoint, mapper, matcher)
            .await;
        if result.is_err() {
            machine.abort();
        }
        result
    }

    #[allow(clippy::too_many_arguments)]
    async fn stage_loop(
        &self,
        ctx: &RunContext,
        plan: &CollectionPlan,
        stage: Option<String>,
        key: &str,
        machine: &mut StageMachine,
        checkpoint: &Checkpoint,
        mapper: Arc<FieldMapper>,
        matcher: Arc<IdentityMatcher>,
    ) -> Result<(), Interrupt> {
        let limit = self.config.settings.page_limit;
        let workers = self.config.mapping_workers;
        let mut page = checkpoint.next_page(key);
        let mut pending: Option<Prefetch> = None;
        let mut first_fetch = true;

        if page > 0 {
            info!(page, "Resuming stage from checkpoint");
        }

        loop {
            if let Some(interrupt) = ctx.interruption() {
                return Err(interrupt);
            }
            if page >= self.config.max_pages_per_stage {
                warn!(
                    page,
                    max_pages = self.config.max_pages_per_stage,
                    "Page cap reached before end of data, ending stage"
                );
                ctx.writer.complete_stage(key).await?;
                machine.transition(RunState::Completed)?;
                return Ok(());
            }

            machine.transition(RunState::FetchingPage)?;
            let request = PageRequest::new(plan.collection, stage.clone(), page, limit);
            let source_page = match pending.take() {
                Some(mut prefetch) if prefetch.page == page => {
                    self.guarded(ctx, async {
                        match (&mut prefetch.handle).await {
                            Ok(result) => result.map_err(Interrupt::from),
                            Err(e) => Err(Interrupt::internal(format!("prefetch task failed: {e}"))),
                        }
                    })
                    .await?
                }
                _ => {
                    if !first_fetch {
                        self.pause(ctx).await?;
                    }
                    self.guarded(ctx, self.source.fetch_page(&request).map_err(Interrupt::from))
                        .await?
                }
            };
            first_fetch = false;

            if source_page.is_empty() {
                debug!(page, "Empty page, end of data");
                ctx.writer.complete_stage(key).await?;
                machine.transition(RunState::Completed)?;
                return Ok(());
            }

            let is_last = self.config.stop_on_short_page && source_page.is_short(limit);
            if self.config.prefetch && !is_last && page + 1 < self.config.max_pages_per_stage {
                pending = Some(self.spawn_prefetch(request.next()));
            }

            let raw_count = source_page.raw_count;
            let dropped = source_page.dropped() as u64;
            if dropped > 0 {
                warn!(page, raw_count, dropped, "Source items without a usable id were dropped");
            }
            let mut records = source_page.records;
            if plan.enrich_with_detail {
                records = self.enrich(ctx, plan.collection, records).await?;
            }
            let processed = records.len() as u64;

            machine.transition(RunState::Mapping)?;
            let map_with = Arc::clone(&mapper);
            let mapped: Vec<MappedRecord> =
                parallel_chunks(records, workers, move |record: SourceRecord| {
                    map_with.map_record(&record)
                })
                .await?;

            machine.transition(RunState::Matching)?;
            let match_with = Arc::clone(&matcher);
            let resolved = parallel_chunks(mapped, workers, move |record: MappedRecord| {
                match match_with.resolve(&record) {
                    Some(resolution) => {
                        Ok(record.into_candidate(resolution.id, resolution.resolved_from))
                    }
                    None => Err(record.source_id),
                }
            })
            .await?;

            let mut candidates: Vec<CanonicalCandidate> = Vec::with_capacity(resolved.len());
            let mut unmatched = 0u64;
            for outcome in resolved {
                match outcome {
                    Ok(candidate) => candidates.push(candidate),
                    Err(source_id) => {
                        unmatched += 1;
                        debug!(
                            collection = %plan.collection,
                            source_id,
                            "No canonical id for record"
                        );
                    }
                }
            }

            machine.transition(RunState::Reconciling)?;
            let result = ctx.reconciler.reconcile(plan.collection, candidates).await?;

            let counts = StageCounts {
                processed,
                inserted: result.inserted,
                updated: result.updated,
                skipped: result.skipped,
                failed: result.failed,
                unmatched,
                dropped,
                pages: 1,
            };
            ctx.writer.commit_page(key, page + 1, &counts, is_last).await?;
            machine.transition(RunState::CheckpointSaved)?;
            ctx.tracker.record_page(&counts);
            ctx.record_failures(result.failures).await;

            info!(
                page,
                raw_count,
                processed,
                inserted = counts.inserted,
                updated = counts.updated,
                skipped = counts.skipped,
                failed = counts.failed,
                unmatched,
                dropped,
                "Page committed"
            );

            if is_last {
                debug!(page, "Short page, end of data");
                machine.transition(RunState::Completed)?;
                return Ok(());
            }
            page += 1;
        }
    }

    /// Await a source call unless the run is cancelled or out of time.
    async fn guarded<T, F>(&self, ctx: &RunContext, fut: F) -> Result<T, Interrupt>
    where
        F: Future<Output = Result<T, Interrupt>>,
    {
        tokio::select! {
            () = ctx.abort.cancelled() => Err(ctx.interruption().unwrap_or(Interrupt::Stopped)),
            result = tokio::time::timeout_at(ctx.deadline, fut) => match result {
                Ok(result) => result,
                Err(_) => Err(Interrupt::Abort(Abort::deadline())),
            },
        }
    }

    /// Inter-request delay.
    async fn pause(&self, ctx: &RunContext) -> Result<(), Interrupt> {
        let delay = self.config.settings.delay();
        if delay.is_zero() {
            return Ok(());
        }
        self.guarded(ctx, async {
            tokio::time::sleep(delay).await;
            Ok(())
        })
        .await
    }

    fn spawn_prefetch(&self, request: PageRequest) -> Prefetch {
        let source = Arc::clone(&self.source);
        let delay = self.config.settings.delay();
        let page = request.page;
        let handle = tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            source.fetch_page(&request).await
        });
        trace!(page, "Prefetch started");
        Prefetch { page, handle }
    }

    /// Replace listed records with their detail representation.
    async fn enrich(
        &self,
        ctx: &RunContext,
        collection: CollectionType,
        records: Vec<SourceRecord>,
    ) -> Result<Vec<SourceRecord>, Interrupt> {
        let source = &self.source;
        let enriched = stream::iter(records)
            .map(|mut record| async move {
                if let Some(detail) = source.fetch_detail(collection, record.source_id).await? {
                    record.merge_detail(detail);
                } else {
                    debug!(source_id = record.source_id, "No detail for record, keeping summary");
                }
                Ok::<_, FetchError>(record)
            })
            .buffered(self.config.detail_concurrency)
            .try_collect::<Vec<_>>()
            .map_err(Interrupt::from);

        self.guarded(ctx, enriched).await
    }

    /// Build the identity matcher of a collection, loading reference data.
    async fn build_matcher(
        &self,
        ctx: &RunContext,
        plan: &CollectionPlan,
    ) -> Result<IdentityMatcher, Interrupt> {
        let IdentityStrategy::Matched {
            direct_key,
            references,
        } = &plan.identity
        else {
            return Ok(IdentityMatcher::authoritative());
        };

        let mut indices = Vec::with_capacity(references.len());
        for reference in references {
            let records = match reference {
                ReferenceSource::Canonical { collection } => {
                    let mapping = self.mapping_for(*collection);
                    self.canonical
                        .list_collection(*collection)
                        .await?
                        .iter()
                        .map(|record| ReferenceRecord::from_canonical(record, &mapping))
                        .collect::<Vec<_>>()
                }
                ReferenceSource::Remote {
                    collection,
                    id_field,
                    stages,
                } => {
                    self.load_remote_references(ctx, *collection, id_field, stages)
                        .await?
                }
            };

            let index = MatchIndex::build(reference.label(), records);
            info!(
                collection = %plan.collection,
                index = %index.name(),
                records = index.record_count(),
                tokens = index.len(),
                collisions = index.collisions(),
                "Match index built"
            );
            indices.push(index);
        }

        Ok(IdentityMatcher::matched(direct_key.clone(), indices))
    }

    /// Page a remote collection whose records carry a canonical id.
    async fn load_remote_references(
        &self,
        ctx: &RunContext,
        collection: CollectionType,
        id_field: &str,
        stages: &[String],
    ) -> Result<Vec<ReferenceRecord>, Interrupt> {
        let mapper = FieldMapper::new(self.mapping_for(collection), Arc::new(SchemaDriftTracker::new()));
        let limit = self.config.settings.page_limit;
        let stage_filters: Vec<Option<String>> = if stages.is_empty() {
            vec![None]
        } else {
            stages.iter().cloned().map(Some).collect()
        };

        let mut references = Vec::new();
        let mut fetches = 0usize;
        for stage in stage_filters {
            let mut request = PageRequest::new(collection, stage, 0, limit);
            while request.page < self.config.max_pages_per_stage {
                if let Some(interrupt) = ctx.interruption() {
                    return Err(interrupt);
                }
                if fetches > 0 {
                    self.pause(ctx).await?;
                }
                let page = self
                    .guarded(ctx, self.source.fetch_page(&request).map_err(Interrupt::from))
                    .await?;
                fetches += 1;
                if page.is_empty() {
                    break;
                }
                let is_last = self.config.stop_on_short_page && page.is_short(limit);
                references.extend(
                    page.records
                        .iter()
                        .map(|record| mapper.map_record(record))
                        .filter_map(|mapped| ReferenceRecord::from_mapped(&mapped, id_field)),
                );
                if is_last {
                    break;
                }
                request = request.next();
            }
        }

        debug!(
            collection = %collection,
            references = references.len(),
            fetches,
            "Remote references loaded"
        );
        Ok(references)
    }

    fn mapping_for(&self, collection: CollectionType) -> CollectionMapping {
        self.config
            .collections
            .iter()
            .find(|plan| plan.collection == collection)
            .map_or_else(|| CollectionMapping::defaults_for(collection), CollectionPlan::mapping)
    }

    fn stage_reports(&self, checkpoint: &Checkpoint) -> Vec<StageReport> {
        self.config
            .collections
            .iter()
            .flat_map(|plan| {
                plan.stage_keys().into_iter().map(move |stage| {
                    let key = stage_key(plan.collection, stage.as_deref());
                    let cursor = checkpoint.cursor(&key).cloned().unwrap_or_default();
                    StageReport {
                        key,
                        collection: plan.collection,
                        stage,
                        completed: cursor.completed,
                        next_page: cursor.next_page,
                        counts: cursor.counts,
                    }
                })
            })
            .collect()
    }
}

/// Deadline of a run started at `start`, saturating at the longest accepted budget.
fn run_deadline(start: Instant, budget: Duration) -> Instant {
    start.checked_add(budget).unwrap_or_else(|| {
        start + Duration::from_secs(MAX_RUN_DURATION_SECS)
    })
}

/// Apply `f` to every item on blocking workers, preserving order.
async fn parallel_chunks<T, R, F>(items: Vec<T>, workers: usize, f: F) -> Result<Vec<R>, Interrupt>
where
    T: Send + 'static,
    R: Send + 'static,
    F: Fn(T) -> R + Send + Sync + 'static,
{
    if items.is_empty() {
        return Ok(Vec::new());
    }

    let total = items.len();
    let chunk_size = total.div_ceil(workers.max(1));
    let f = Arc::new(f);
    let mut items = items.into_iter();
    let mut handles = Vec::new();
    loop {
        let chunk: Vec<T> = items.by_ref().take(chunk_size).collect();
        if chunk.is_empty() {
            break;
        }
        let f = Arc::clone(&f);
        handles.push(tokio::task::spawn_blocking(move || {
            chunk.into_iter().map(|item| f(item)).collect::<Vec<R>>()
        }));
    }

    let mut out = Vec::with_capacity(total);
    for handle in handles {
        let chunk = handle
            .await
            .map_err(|e| Interrupt::internal(format!("worker task failed: {e}")))?;
        out.extend(chunk);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    // ===== RunState =====

    #[test]
    fn test_page_cycle_transitions() {
        let cycle = [
            RunState::Idle,
            RunState::FetchingPage,
            RunState::Mapping,
            RunState::Matching,
            RunState::Reconciling,
            RunState::CheckpointSaved,
            RunState::FetchingPage,
        ];
        for pair in cycle.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{} -> {}", pair[0], pair[1]);
        }
        assert!(RunState::CheckpointSaved.can_transition_to(RunState::Completed));
        assert!(RunState::FetchingPage.can_transition_to(RunState::Completed));
    }

    #[test]
    fn test_no_skipping_reconcile() {
        assert!(!RunState::Matching.can_transition_to(RunState::CheckpointSaved));
        assert!(!RunState::Mapping.can_transition_to(RunState::Reconciling));
        assert!(!RunState::Reconciling.can_transition_to(RunState::Completed));
    }

    #[test]
    fn test_abort_from_any_live_state() {
        for state in [
            RunState::Idle,
            RunState::FetchingPage,
            RunState::Mapping,
            RunState::Matching,
            RunState::Reconciling,
            RunState::CheckpointSaved,
        ] {
            assert!(state.can_transition_to(RunState::Aborted));
        }
        assert!(!RunState::Completed.can_transition_to(RunState::Aborted));
        assert!(!RunState::Aborted.can_transition_to(RunState::FetchingPage));
    }

    #[test]
    fn test_stage_machine_rejects_invalid_transition() {
        let mut machine = StageMachine::new("lead");
        machine.transition(RunState::FetchingPage).unwrap();
        let err = machine.transition(RunState::Reconciling).unwrap_err();
        assert!(matches!(err, SyncError::InvalidStateTransition { .. }));

        machine.abort();
        assert_eq!(machine.state, RunState::Aborted);
    }

    // ===== Workers =====

    #[tokio::test]
    async fn test_parallel_chunks_preserves_order() {
        let items: Vec<u32> = (0..103).collect();
        let doubled = parallel_chunks(items, 4, |n| n * 2).await.unwrap();
        assert_eq!(doubled.len(), 103);
        assert!(doubled.iter().enumerate().all(|(i, n)| *n == i as u32 * 2));
    }

    #[tokio::test]
    async fn test_parallel_chunks_empty() {
        let out: Vec<u32> = parallel_chunks(Vec::<u32>::new(), 4, |n| n).await.unwrap();
        assert!(out.is_empty());
    }

    // ===== Deadline =====

    #[test]
    fn test_run_deadline_saturates_on_huge_budget() {
        let start = Instant::now();
        assert_eq!(run_deadline(start, Duration::from_secs(60)), start + Duration::from_secs(60));
        assert_eq!(
            run_deadline(start, Duration::MAX),
            start + Duration::from_secs(MAX_RUN_DURATION_SECS)
        );
    }

    // ===== Interrupts =====

    #[test]
    fn test_fetch_errors_map_to_abort_reasons() {
        let Interrupt::Abort(abort) = Interrupt::from(FetchError::rate_limited("/leads", 5)) else {
            panic!("expected abort");
        };
        assert_eq!(abort.reason, AbortReason::RateLimited);

        let Interrupt::Abort(abort) =
            Interrupt::from(FetchError::unavailable("boom", 3, Some(503)))
        else {
            panic!("expected abort");
        };
        assert_eq!(abort.reason, AbortReason::Unavailable);
    }
}

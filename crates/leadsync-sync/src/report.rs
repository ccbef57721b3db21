//! Run reports.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use uuid::Uuid;

use leadsync_connector::types::CollectionType;

use crate::mapping::DriftEntry;
use crate::reconcile::RecordFailure;
use crate::statistics::StageCounts;

/// Failed records kept in a report.
pub const MAX_FAILURE_SAMPLES: usize = 50;

/// Final status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Every stage reached end of data; the checkpoint was cleared.
    Completed,
    /// Stopped early; the checkpoint holds the last committed page.
    Aborted,
    /// Outside the schedule window and not forced.
    Skipped,
}

impl RunStatus {
    /// Get the string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Completed => "completed",
            RunStatus::Aborted => "aborted",
            RunStatus::Skipped => "skipped",
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Why a run stopped early.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AbortReason {
    /// The source kept rate limiting after every retry.
    RateLimited,
    /// The source kept failing after every retry.
    Unavailable,
    /// The run exceeded its wall-clock budget.
    DeadlineExceeded,
    /// Cancelled by the operator.
    Cancelled,
    /// Looking up existing canonical rows failed.
    Store,
    /// A checkpoint could not be saved.
    Checkpoint,
    /// A worker task failed.
    Internal,
}

impl AbortReason {
    /// Get the string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            AbortReason::RateLimited => "rate_limited",
            AbortReason::Unavailable => "unavailable",
            AbortReason::DeadlineExceeded => "deadline_exceeded",
            AbortReason::Cancelled => "cancelled",
            AbortReason::Store => "store",
            AbortReason::Checkpoint => "checkpoint",
            AbortReason::Internal => "internal",
        }
    }

    /// Whether the next scheduled run can resume without intervention.
    #[must_use]
    pub fn is_resumable(&self) -> bool {
        !matches!(self, AbortReason::Internal)
    }
}

impl std::fmt::Display for AbortReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Summary of one stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageReport {
    /// Checkpoint key.
    pub key: String,
    pub collection: CollectionType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,
    pub completed: bool,
    /// Page the stage resumes at.
    pub next_page: u32,
    pub counts: StageCounts,
}

/// Summary of one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub job: String,
    pub status: RunStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub abort_reason: Option<AbortReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub abort_message: Option<String>,
    pub dry_run: bool,
    pub forced: bool,
    /// Continued from a checkpoint left by an earlier run.
    pub resumed: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub elapsed_ms: u64,
    /// Counts including work committed before a resume.
    pub totals: StageCounts,
    /// Counts of this invocation only.
    pub this_run: StageCounts,
    pub stages: Vec<StageReport>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub schema_drift: Vec<DriftEntry>,
    pub match_ambiguities: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<RecordFailure>,
}

impl RunReport {
    /// Report of a run skipped outside its schedule window.
    #[must_use]
    pub fn skipped(job: &str, run_id: Uuid, started_at: DateTime<Utc>) -> Self {
        Self {
            run_id,
            job: job.to_string(),
            status: RunStatus::Skipped,
            abort_reason: None,
            abort_message: None,
            dry_run: false,
            forced: false,
            resumed: false,
            started_at,
            finished_at: started_at,
            elapsed_ms: 0,
            totals: StageCounts::default(),
            this_run: StageCounts::default(),
            stages: Vec::new(),
            schema_drift: Vec::new(),
            match_ambiguities: 0,
            failures: Vec::new(),
        }
    }

    /// Whether every stage completed.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.status == RunStatus::Completed
    }

    /// Render a plain-text table.
    #[must_use]
    pub fn render_table(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "Job '{}' {} in {} ms (run {})",
            self.job, self.status, self.elapsed_ms, self.run_id
        );
        if let Some(reason) = &self.abort_reason {
            let _ = writeln!(
                out,
                "Aborted: {reason}{}",
                self.abort_message
                    .as_deref()
                    .map(|m| format!(" ({m})"))
                    .unwrap_or_default()
            );
        }
        if self.dry_run {
            let _ = writeln!(out, "Dry run: nothing was written");
        }
        if self.resumed {
            let _ = writeln!(out, "Resumed from checkpoint");
        }
        if self.status == RunStatus::Skipped {
            return out;
        }

        let _ = writeln!(
            out,
            "\n{:<28} {:>6} {:>9} {:>8} {:>8} {:>7} {:>6} {:>9} {:>7}",
            "STAGE",
            "PAGES",
            "PROCESSED",
            "INSERTED",
            "UPDATED",
            "SKIPPED",
            "FAILED",
            "UNMATCHED",
            "DROPPED"
        );
        let mut row = |label: &str, counts: &StageCounts| {
            let _ = writeln!(
                out,
                "{:<28} {:>6} {:>9} {:>8} {:>8} {:>7} {:>6} {:>9} {:>7}",
                label,
                counts.pages,
                counts.processed,
                counts.inserted,
                counts.updated,
                counts.skipped,
                counts.failed,
                counts.unmatched,
                counts.dropped
            );
        };
        for stage in &self.stages {
            let label = if stage.completed {
                stage.key.clone()
            } else {
                format!("{} (at page {})", stage.key, stage.next_page)
            };
            row(&label, &stage.counts);
        }
        row("TOTAL", &self.totals);

        if !self.schema_drift.is_empty() {
            let _ = writeln!(out, "\nUnrecognized source fields:");
            for entry in &self.schema_drift {
                let _ = writeln!(
                    out,
                    "  {}.{} ({} records)",
                    entry.collection, entry.field, entry.occurrences
                );
            }
        }
        if self.match_ambiguities > 0 {
            let _ = writeln!(out, "\nAmbiguous identity tokens: {}", self.match_ambiguities);
        }
        if !self.failures.is_empty() {
            let _ = writeln!(out, "\nFailed records:");
            for failure in &self.failures {
                let _ = writeln!(
                    out,
                    "  {}/{} (source {}): {}",
                    failure.collection, failure.id, failure.source_id, failure.error
                );
            }
        }

        out
    }
}

//! # Incremental Sync Engine
//!
//! Reconciles the leads and opportunities of a paginated, rate-limited CRM
//! into a canonical store, resumably and idempotently.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐  page   ┌──────────────┐      ┌──────────────┐
//! │    Source    │────────►│ Field Mapper │─────►│   Identity   │
//! │ (paginated)  │         │ (+ drift)    │      │   Matcher    │
//! └──────────────┘         └──────────────┘      └──────┬───────┘
//!        ▲                                              │ candidates
//!        │ next page                                    ▼
//! ┌──────┴───────┐ commit  ┌──────────────┐      ┌──────────────┐
//! │ Orchestrator │◄────────│  Checkpoint  │◄─────│  Reconciler  │───► Canonical
//! │              │         │    Writer    │      │              │     Store
//! └──────────────┘         └──────────────┘      └──────────────┘
//! ```
//!
//! ## Guarantees
//!
//! - A checkpoint is saved only after its page was fully reconciled.
//! - Re-running over the same data writes nothing: stored rows that are
//!   not older than the source are skipped.
//! - Email matching is case-insensitive; phone matching tolerates
//!   formatting and the country prefix.
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use leadsync_sync::{CollectionPlan, InMemoryStore, MemoryCheckpointStore};
//! use leadsync_sync::{RunOptions, SyncConfig, SyncOrchestrator};
//! use leadsync_connector::types::CollectionType;
//!
//! let config = SyncConfig::new("nightly", vec![CollectionPlan::new(CollectionType::Lead)]);
//! let orchestrator = SyncOrchestrator::new(
//!     Arc::new(config),
//!     source,
//!     Arc::new(InMemoryStore::new()),
//!     Arc::new(MemoryCheckpointStore::new()),
//! );
//! let report = orchestrator.run(RunOptions::default()).await?;
//! println!("{}", report.render_table());
//! ```

pub mod checkpoint;
pub mod config;
pub mod error;
pub mod identity;
pub mod mapping;
pub mod matching;
pub mod orchestrator;
pub mod reconcile;
pub mod report;
pub mod statistics;
pub mod store;

pub use checkpoint::{
    Checkpoint, CheckpointConfig, CheckpointStore, FileCheckpointStore, MemoryCheckpointStore,
    PgCheckpointStore,
};
pub use config::{
    CollectionPlan, IdentityStrategy, ReferenceSource, RunOptions, ScheduleWindow, SyncConfig,
    SyncSettings,
};
pub use error::{SyncError, SyncResult};
pub use orchestrator::{RunState, SyncOrchestrator};
pub use report::{AbortReason, RunReport, RunStatus, StageReport};
pub use statistics::StageCounts;
pub use store::{CanonicalRecord, CanonicalStore, InMemoryStore, PgCanonicalStore, StoreConfig};

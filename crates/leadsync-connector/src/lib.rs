//! # Source Connector Framework
//!
//! Abstractions shared by every remote CRM source that leadsync can walk.
//!
//! The engine only needs two operations from a source: a paginated
//! `list(collection, stage, page, limit)` and a `detail(collection, id)`
//! used for enrichment when list responses are summary-only. Both are
//! expressed by the [`SourceCollection`](traits::SourceCollection) trait.
//!
//! ## Crate Structure
//!
//! - [`types`] - Collections, raw source records and pages
//! - [`config`] - Authentication and connection settings
//! - [`error`] - Fetch error taxonomy with transient classification
//! - [`traits`] - The `SourceCollection` trait

pub mod config;
pub mod error;
pub mod traits;
pub mod types;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::config::{AuthConfig, ConnectionSettings};
    pub use crate::error::{FetchError, FetchResult};
    pub use crate::traits::SourceCollection;
    pub use crate::types::{CollectionType, PageRequest, SourcePage, SourceRecord};
}

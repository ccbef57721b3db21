//! Source traits
//!
//! The contract every remote source implements.

use async_trait::async_trait;

use crate::error::FetchResult;
use crate::types::{CollectionType, PageRequest, SourcePage, SourceRecord};

/// A paginated, rate-limited remote source of records.
///
/// Implementations own their retry and backoff policy: a returned error
/// means retries are already exhausted.
#[async_trait]
pub trait SourceCollection: Send + Sync {
    /// Get the display name for this source instance.
    fn display_name(&self) -> &str;

    /// Fetch one page of a collection.
    ///
    /// An empty page is the end-of-pagination signal, not an error.
    async fn fetch_page(&self, request: &PageRequest) -> FetchResult<SourcePage>;

    /// Fetch the full representation of one record.
    ///
    /// Returns `Ok(None)` when the source no longer knows the record.
    async fn fetch_detail(
        &self,
        collection: CollectionType,
        source_id: i64,
    ) -> FetchResult<Option<SourceRecord>>;
}

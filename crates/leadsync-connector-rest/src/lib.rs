//! # REST Source
//!
//! Rate-limited, paginated HTTP source for leadsync.
//!
//! This crate walks remote CRM collections page by page. Every request goes
//! through a client-side throttle and a retry policy that distinguishes
//! upstream rate-limit signals (429, or a 200/401 whose body announces a
//! rate limit) from other failures.
//!
//! ## Features
//!
//! - Bearer, API key, query token and Basic authentication
//! - Per-collection list and detail endpoints
//! - Configurable page/size/stage query parameters
//! - JSON pointer based results extraction
//! - Linear backoff for failures, fixed or Retry-After backoff for rate limits
//!
//! ## Example
//!
//! ```ignore
//! use leadsync_connector::prelude::*;
//! use leadsync_connector_rest::{RestSource, RestSourceConfig};
//!
//! let config = RestSourceConfig::new("https://api.crm.example/v1")
//!     .with_bearer_token("my-api-token");
//!
//! let source = RestSource::new(config)?;
//! let page = source
//!     .fetch_page(&PageRequest::new(CollectionType::Lead, None, 0, 100))
//!     .await?;
//! ```

pub mod config;
pub mod rate_limit;
pub mod source;

// Re-exports
pub use config::{EndpointConfig, PaginationConfig, ResponseConfig, RestSourceConfig};
pub use rate_limit::{LogVerbosity, RequestThrottle, RetryPolicy, ThrottleConfig};
pub use source::RestSource;

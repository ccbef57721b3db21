//! REST source implementation
//!
//! Implements the `SourceCollection` trait for paginated CRM HTTP APIs.

use async_trait::async_trait;
use reqwest::header::{self, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, trace, warn};

use leadsync_connector::config::AuthConfig;
use leadsync_connector::error::{FetchError, FetchResult};
use leadsync_connector::traits::SourceCollection;
use leadsync_connector::types::{CollectionType, PageRequest, SourcePage, SourceRecord};

use crate::config::RestSourceConfig;
use crate::rate_limit::{parse_retry_after, RequestThrottle};

/// Longest body excerpt carried into error messages.
const BODY_EXCERPT_LEN: usize = 200;

/// REST source for paginated CRM APIs.
pub struct RestSource {
    /// Configuration.
    config: RestSourceConfig,

    /// Display name for this source instance.
    display_name: String,

    /// HTTP client.
    client: Client,

    /// Client-side throttle shared by list and detail requests.
    throttle: Arc<RequestThrottle>,
}

impl std::fmt::Debug for RestSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestSource")
            .field("config", &self.config.redacted())
            .field("display_name", &self.display_name)
            .finish()
    }
}

/// What a successful response must contain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Expect {
    /// An array of items at `results_path`.
    List,
    /// An object at `detail_path`; 404 and null mean "gone".
    Detail,
}

/// Outcome of one HTTP attempt.
enum Attempt {
    Done(Option<Value>),
    RateLimited(Option<Duration>),
    Failed { message: String, status: Option<u16> },
}

impl RestSource {
    /// Create a new REST source with the given configuration.
    pub fn new(config: RestSourceConfig) -> FetchResult<Self> {
        config.validate()?;

        let display_name = format!("REST: {}", config.base_url);
        let client = Self::build_client(&config)?;
        let throttle = Arc::new(RequestThrottle::new(config.throttle.clone()));

        Ok(Self {
            config,
            display_name,
            client,
            throttle,
        })
    }

    /// Get the configuration.
    #[must_use]
    pub fn config(&self) -> &RestSourceConfig {
        &self.config
    }

    /// Build the reqwest client with configuration.
    fn build_client(config: &RestSourceConfig) -> FetchResult<Client> {
        let mut headers = HeaderMap::new();
        headers.insert(header::ACCEPT, HeaderValue::from_static("application/json"));

        for (name, value) in &config.default_headers {
            let name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| {
                FetchError::invalid_configuration(format!("invalid header name '{name}': {e}"))
            })?;
            let value = HeaderValue::from_str(value).map_err(|e| {
                FetchError::invalid_configuration(format!("invalid header value for '{name}': {e}"))
            })?;
            headers.insert(name, value);
        }

        Client::builder()
            .timeout(Duration::from_secs(config.connection.read_timeout_secs))
            .connect_timeout(Duration::from_secs(
                config.connection.connection_timeout_secs,
            ))
            .user_agent(config.connection.user_agent.clone())
            .default_headers(headers)
            .build()
            .map_err(|e| {
                FetchError::invalid_configuration(format!("Failed to build HTTP client: {e}"))
            })
    }

    /// Attach credentials to a request.
    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.config.auth {
            AuthConfig::None => request,
            AuthConfig::Basic { username, password } => {
                request.basic_auth(username, password.as_deref())
            }
            AuthConfig::ApiKey { key, header_name } => request.header(header_name.as_str(), key),
            AuthConfig::QueryToken { token, param_name } => {
                request.query(&[(param_name.as_str(), token.as_str())])
            }
            AuthConfig::Bearer { token } => request.bearer_auth(token),
        }
    }

    /// Send a GET with the configured retry policy.
    ///
    /// Rate-limit signals and other failures consume separate retry budgets.
    async fn get_with_retry(
        &self,
        url: &str,
        query: &[(String, String)],
        expect: Expect,
    ) -> FetchResult<Option<Value>> {
        let policy = &self.config.retry;
        let mut failures: u32 = 0;
        let mut rate_limited: u32 = 0;

        loop {
            match self.attempt(url, query, expect).await {
                Attempt::Done(value) => return Ok(value),
                Attempt::RateLimited(retry_after) => {
                    rate_limited += 1;
                    if rate_limited > policy.max_rate_limit_retries {
                        warn!(
                            url = %url,
                            attempts = rate_limited,
                            "Rate limit retries exhausted"
                        );
                        return Err(FetchError::rate_limited(url, rate_limited));
                    }

                    let wait = policy.rate_limit_wait(retry_after);
                    warn!(
                        url = %url,
                        attempt = rate_limited,
                        wait_ms = wait.as_millis() as u64,
                        "Rate limited by source, waiting before retry"
                    );
                    tokio::time::sleep(wait).await;
                }
                Attempt::Failed { message, status } => {
                    failures += 1;
                    if failures > policy.max_retries {
                        warn!(
                            url = %url,
                            attempts = failures,
                            error = %message,
                            "Source request retries exhausted"
                        );
                        return Err(FetchError::unavailable(message, failures, status));
                    }

                    let backoff = policy.linear_backoff(failures);
                    warn!(
                        url = %url,
                        attempt = failures,
                        error = %message,
                        wait_ms = backoff.as_millis() as u64,
                        "Source request failed, retrying with backoff"
                    );
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }

    /// Perform a single HTTP attempt and classify the response.
    async fn attempt(&self, url: &str, query: &[(String, String)], expect: Expect) -> Attempt {
        let policy = &self.config.retry;
        let verbosity = self.config.log_verbosity;

        let _guard = self.throttle.acquire().await;

        if verbosity.is_enabled() {
            debug!(url = %url, query = ?query, "Sending source request");
        }

        let response = match self
            .authorize(self.client.get(url).query(query))
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                return Attempt::Failed {
                    message: describe_transport_error(&e),
                    status: None,
                }
            }
        };

        let status = response.status();
        let retry_after = response
            .headers()
            .get(header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_retry_after);

        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => {
                return Attempt::Failed {
                    message: format!("failed to read response body: {e}"),
                    status: Some(status.as_u16()),
                }
            }
        };

        if verbosity.is_enabled() {
            debug!(url = %url, status = %status, bytes = body.len(), "Received source response");
        }
        if verbosity.log_bodies() {
            trace!(body = %body, "Response body");
        }

        if status == StatusCode::TOO_MANY_REQUESTS {
            return Attempt::RateLimited(retry_after);
        }
        if status == StatusCode::UNAUTHORIZED && policy.signals_rate_limit(&body) {
            return Attempt::RateLimited(retry_after);
        }
        if status == StatusCode::NOT_FOUND && expect == Expect::Detail {
            return Attempt::Done(None);
        }
        if !status.is_success() {
            return Attempt::Failed {
                message: format!("HTTP {status}: {}", excerpt(&body)),
                status: Some(status.as_u16()),
            };
        }

        let mut json: Value = match serde_json::from_str(&body) {
            Ok(json) => json,
            Err(e) => {
                if policy.signals_rate_limit(&body) {
                    return Attempt::RateLimited(retry_after);
                }
                return Attempt::Failed {
                    message: format!("malformed response body: {e}"),
                    status: Some(status.as_u16()),
                };
            }
        };

        let pointer = match expect {
            Expect::List => self.config.response.results_path.as_str(),
            Expect::Detail => self.config.response.detail_path.as_str(),
        };
        let extracted = json.pointer_mut(pointer).map(Value::take);

        match (expect, extracted) {
            (Expect::List, Some(Value::Array(items))) => {
                if items.is_empty() && policy.signals_rate_limit(&body) {
                    Attempt::RateLimited(retry_after)
                } else {
                    Attempt::Done(Some(Value::Array(items)))
                }
            }
            (Expect::Detail, Some(Value::Object(fields))) => {
                Attempt::Done(Some(Value::Object(fields)))
            }
            (Expect::Detail, Some(Value::Null)) => Attempt::Done(None),
            _ if policy.signals_rate_limit(&body) => Attempt::RateLimited(retry_after),
            _ => Attempt::Failed {
                message: format!(
                    "malformed response: no {} at '{pointer}'",
                    match expect {
                        Expect::List => "results array",
                        Expect::Detail => "record object",
                    }
                ),
                status: Some(status.as_u16()),
            },
        }
    }
}

#[async_trait]
impl SourceCollection for RestSource {
    fn display_name(&self) -> &str {
        &self.display_name
    }

    #[instrument(skip(self, request), fields(collection = %request.collection, stage = ?request.stage, page = request.page))]
    async fn fetch_page(&self, request: &PageRequest) -> FetchResult<SourcePage> {
        let path = self
            .config
            .endpoints
            .list_path(request.collection)
            .ok_or_else(|| FetchError::UnsupportedCollection {
                collection: request.collection.to_string(),
            })?;
        let url = self.config.url(path);
        let query = self
            .config
            .pagination
            .query(request.page, request.limit, request.stage.as_deref());

        let items = match self.get_with_retry(&url, &query, Expect::List).await? {
            Some(Value::Array(items)) => items,
            _ => Vec::new(),
        };

        let raw_count = items.len();
        let id_field = &self.config.response.id_field;
        let mut records = Vec::with_capacity(raw_count);
        for item in items {
            match SourceRecord::from_value(request.collection, item, id_field) {
                Ok(record) => records.push(record.with_stage(request.stage.clone())),
                Err(e) => warn!(error = %e, "Dropping unparseable source item"),
            }
        }

        debug!(
            raw_count = raw_count,
            parsed = records.len(),
            "Fetched source page"
        );

        Ok(SourcePage { records, raw_count })
    }

    #[instrument(skip(self))]
    async fn fetch_detail(
        &self,
        collection: CollectionType,
        source_id: i64,
    ) -> FetchResult<Option<SourceRecord>> {
        let path = self
            .config
            .endpoints
            .detail_path(collection, source_id)
            .ok_or_else(|| FetchError::UnsupportedCollection {
                collection: collection.to_string(),
            })?;
        let url = self.config.url(&path);

        let Some(Value::Object(fields)) = self.get_with_retry(&url, &[], Expect::Detail).await?
        else {
            debug!("Source record no longer exists");
            return Ok(None);
        };

        // Detail payloads sometimes omit the id; the requested id is authoritative.
        let record = SourceRecord::from_value(
            collection,
            Value::Object(fields.clone()),
            &self.config.response.id_field,
        )
        .unwrap_or_else(|_| SourceRecord::new(source_id, collection, fields));

        Ok(Some(record))
    }
}

fn describe_transport_error(e: &reqwest::Error) -> String {
    if e.is_timeout() {
        "request timed out".to_string()
    } else if e.is_connect() {
        format!("connection failed: {e}")
    } else {
        format!("request failed: {e}")
    }
}

fn excerpt(body: &str) -> &str {
    if body.len() <= BODY_EXCERPT_LEN {
        return body;
    }
    let mut end = BODY_EXCERPT_LEN;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    &body[..end]
}

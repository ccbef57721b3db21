//! REST source configuration
//!
//! Configuration types for the paginated CRM HTTP API.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use leadsync_connector::config::{AuthConfig, ConnectionSettings};
use leadsync_connector::error::{FetchError, FetchResult};
use leadsync_connector::types::CollectionType;

use crate::rate_limit::{LogVerbosity, RetryPolicy, ThrottleConfig};

/// Placeholder replaced by the record id in detail endpoint templates.
pub const ID_PLACEHOLDER: &str = "{id}";

/// Configuration for the REST source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestSourceConfig {
    /// Base URL for API requests (e.g., "https://api.crm.example/v1").
    pub base_url: String,

    /// Authentication configuration.
    #[serde(default)]
    pub auth: AuthConfig,

    /// Connection settings (timeouts).
    #[serde(default)]
    pub connection: ConnectionSettings,

    /// Default headers to include in all requests.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub default_headers: HashMap<String, String>,

    /// Endpoint paths per collection.
    #[serde(default)]
    pub endpoints: EndpointConfig,

    /// Pagination parameters.
    #[serde(default)]
    pub pagination: PaginationConfig,

    /// Response parsing configuration.
    #[serde(default)]
    pub response: ResponseConfig,

    /// Client-side throttling.
    #[serde(default)]
    pub throttle: ThrottleConfig,

    /// Retry and backoff policy.
    #[serde(default)]
    pub retry: RetryPolicy,

    /// Logging verbosity for request/response logging.
    #[serde(default)]
    pub log_verbosity: LogVerbosity,
}

impl RestSourceConfig {
    /// Create a new REST source config with required fields.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            auth: AuthConfig::None,
            connection: ConnectionSettings::default(),
            default_headers: HashMap::new(),
            endpoints: EndpointConfig::default(),
            pagination: PaginationConfig::default(),
            response: ResponseConfig::default(),
            throttle: ThrottleConfig::default(),
            retry: RetryPolicy::default(),
            log_verbosity: LogVerbosity::default(),
        }
    }

    /// Set authentication.
    #[must_use]
    pub fn with_auth(mut self, auth: AuthConfig) -> Self {
        self.auth = auth;
        self
    }

    /// Set bearer token authentication.
    #[must_use]
    pub fn with_bearer_token(self, token: impl Into<String>) -> Self {
        self.with_auth(AuthConfig::bearer(token))
    }

    /// Add a default header.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.default_headers.insert(name.into(), value.into());
        self
    }

    /// Set endpoints.
    #[must_use]
    pub fn with_endpoints(mut self, endpoints: EndpointConfig) -> Self {
        self.endpoints = endpoints;
        self
    }

    /// Set pagination parameters.
    #[must_use]
    pub fn with_pagination(mut self, pagination: PaginationConfig) -> Self {
        self.pagination = pagination;
        self
    }

    /// Set response parsing configuration.
    #[must_use]
    pub fn with_response(mut self, response: ResponseConfig) -> Self {
        self.response = response;
        self
    }

    /// Set throttling configuration.
    #[must_use]
    pub fn with_throttle(mut self, throttle: ThrottleConfig) -> Self {
        self.throttle = throttle;
        self
    }

    /// Set retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Set logging verbosity.
    #[must_use]
    pub fn with_log_verbosity(mut self, verbosity: LogVerbosity) -> Self {
        self.log_verbosity = verbosity;
        self
    }

    /// Build the full URL for an endpoint path.
    #[must_use]
    pub fn url(&self, path: &str) -> String {
        let base = self.base_url.trim_end_matches('/');
        let path = path.trim_start_matches('/');
        format!("{base}/{path}")
    }

    /// Validate the configuration. Fails on anything that would make every request fail.
    pub fn validate(&self) -> FetchResult<()> {
        if self.base_url.trim().is_empty() {
            return Err(FetchError::invalid_configuration("base_url is required"));
        }

        let url = url::Url::parse(&self.base_url)
            .map_err(|e| FetchError::invalid_configuration(format!("invalid base_url: {e}")))?;
        if url.scheme() != "https" && url.scheme() != "http" {
            return Err(FetchError::invalid_configuration(format!(
                "unsupported scheme: {}",
                url.scheme()
            )));
        }

        self.auth.validate()?;

        if self.pagination.page_param.trim().is_empty() || self.pagination.size_param.trim().is_empty()
        {
            return Err(FetchError::invalid_configuration(
                "pagination page_param and size_param are required",
            ));
        }

        if self.response.id_field.trim().is_empty() {
            return Err(FetchError::invalid_configuration(
                "response id_field is required",
            ));
        }

        for collection in CollectionType::all() {
            if let Some(template) = self.endpoints.detail_template(*collection) {
                if !template.contains(ID_PLACEHOLDER) {
                    return Err(FetchError::invalid_configuration(format!(
                        "{collection} detail endpoint must contain {ID_PLACEHOLDER}"
                    )));
                }
            }
        }

        Ok(())
    }

    /// Create a redacted version (for logging/display).
    #[must_use]
    pub fn redacted(&self) -> Self {
        let mut config = self.clone();
        config.auth = config.auth.redacted();
        config
    }
}

/// Endpoint paths per collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointConfig {
    /// Endpoint for listing leads (GET).
    #[serde(default = "default_leads_endpoint")]
    pub leads: String,

    /// Endpoint for one lead, with `{id}` placeholder.
    #[serde(default = "default_lead_endpoint")]
    pub lead_detail: String,

    /// Endpoint for listing opportunities (GET).
    #[serde(default = "default_opportunities_endpoint")]
    pub opportunities: String,

    /// Endpoint for one opportunity, with `{id}` placeholder.
    #[serde(default = "default_opportunity_endpoint")]
    pub opportunity_detail: String,
}

fn default_leads_endpoint() -> String {
    "/leads".to_string()
}

fn default_lead_endpoint() -> String {
    "/leads/{id}".to_string()
}

fn default_opportunities_endpoint() -> String {
    "/deals".to_string()
}

fn default_opportunity_endpoint() -> String {
    "/deals/{id}".to_string()
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            leads: default_leads_endpoint(),
            lead_detail: default_lead_endpoint(),
            opportunities: default_opportunities_endpoint(),
            opportunity_detail: default_opportunity_endpoint(),
        }
    }
}

impl EndpointConfig {
    /// List endpoint for a collection.
    #[must_use]
    pub fn list_path(&self, collection: CollectionType) -> Option<&str> {
        let path = match collection {
            CollectionType::Lead => &self.leads,
            CollectionType::Opportunity => &self.opportunities,
        };
        (!path.trim().is_empty()).then_some(path.as_str())
    }

    /// Raw detail template for a collection.
    #[must_use]
    pub fn detail_template(&self, collection: CollectionType) -> Option<&str> {
        let path = match collection {
            CollectionType::Lead => &self.lead_detail,
            CollectionType::Opportunity => &self.opportunity_detail,
        };
        (!path.trim().is_empty()).then_some(path.as_str())
    }

    /// Detail endpoint for a record.
    #[must_use]
    pub fn detail_path(&self, collection: CollectionType, id: i64) -> Option<String> {
        self.detail_template(collection)
            .map(|template| template.replace(ID_PLACEHOLDER, &id.to_string()))
    }
}

/// Query parameters used to page through a collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaginationConfig {
    /// Page number parameter name.
    #[serde(default = "default_page_param")]
    pub page_param: String,

    /// Page size parameter name.
    #[serde(default = "default_size_param")]
    pub size_param: String,

    /// Stage filter parameter name.
    #[serde(default = "default_stage_param")]
    pub stage_param: String,

    /// Page number sent for page index 0 (APIs disagree on 0 vs 1).
    #[serde(default = "default_first_page")]
    pub first_page: u32,
}

fn default_page_param() -> String {
    "page".to_string()
}

fn default_size_param() -> String {
    "limit".to_string()
}

fn default_stage_param() -> String {
    "stage_id".to_string()
}

fn default_first_page() -> u32 {
    1
}

impl Default for PaginationConfig {
    fn default() -> Self {
        Self {
            page_param: default_page_param(),
            size_param: default_size_param(),
            stage_param: default_stage_param(),
            first_page: default_first_page(),
        }
    }
}

impl PaginationConfig {
    /// Build query parameters for a page index.
    #[must_use]
    pub fn query(&self, page: u32, limit: u32, stage: Option<&str>) -> Vec<(String, String)> {
        let mut params = vec![
            (
                self.page_param.clone(),
                (self.first_page + page).to_string(),
            ),
            (self.size_param.clone(), limit.to_string()),
        ];
        if let Some(stage) = stage {
            params.push((self.stage_param.clone(), stage.to_string()));
        }
        params
    }
}

/// Where records live inside a response body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseConfig {
    /// JSON pointer to the results array in list responses ("" for a bare array).
    #[serde(default = "default_results_path")]
    pub results_path: String,

    /// JSON pointer to the record object in detail responses ("" for the root).
    #[serde(default = "default_detail_path")]
    pub detail_path: String,

    /// Dotted path to the record id inside each item.
    #[serde(default = "default_id_field")]
    pub id_field: String,
}

fn default_results_path() -> String {
    "/data".to_string()
}

fn default_detail_path() -> String {
    "/data".to_string()
}

fn default_id_field() -> String {
    "id".to_string()
}

impl Default for ResponseConfig {
    fn default() -> Self {
        Self {
            results_path: default_results_path(),
            detail_path: default_detail_path(),
            id_field: default_id_field(),
        }
    }
}

impl ResponseConfig {
    /// Responses are bare arrays/objects.
    #[must_use]
    pub fn bare() -> Self {
        Self {
            results_path: String::new(),
            detail_path: String::new(),
            id_field: default_id_field(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_new_defaults() {
        let config = RestSourceConfig::new("https://api.crm.example/v1");
        assert_eq!(config.auth, AuthConfig::None);
        assert_eq!(config.endpoints.leads, "/leads");
        assert_eq!(config.pagination.first_page, 1);
        assert_eq!(config.response.results_path, "/data");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_url_joining() {
        let config = RestSourceConfig::new("https://api.crm.example/v1/");
        assert_eq!(config.url("/leads"), "https://api.crm.example/v1/leads");
        assert_eq!(config.url("deals/5"), "https://api.crm.example/v1/deals/5");
    }

    #[test]
    fn test_validate_rejects_bad_base_url() {
        assert!(RestSourceConfig::new("").validate().is_err());
        assert!(RestSourceConfig::new("not a url").validate().is_err());
        assert!(RestSourceConfig::new("ftp://crm.example").validate().is_err());
    }

    #[test]
    fn test_validate_rejects_missing_credentials() {
        let config = RestSourceConfig::new("https://api.crm.example").with_bearer_token("");
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("credentials"));
    }

    #[test]
    fn test_validate_rejects_detail_without_placeholder() {
        let endpoints = EndpointConfig {
            lead_detail: "/leads/show".to_string(),
            ..Default::default()
        };
        let config = RestSourceConfig::new("https://api.crm.example").with_endpoints(endpoints);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_endpoint_paths() {
        let endpoints = EndpointConfig::default();
        assert_eq!(endpoints.list_path(CollectionType::Lead), Some("/leads"));
        assert_eq!(
            endpoints.detail_path(CollectionType::Opportunity, 12),
            Some("/deals/12".to_string())
        );

        let endpoints = EndpointConfig {
            opportunities: String::new(),
            ..Default::default()
        };
        assert_eq!(endpoints.list_path(CollectionType::Opportunity), None);
    }

    #[test]
    fn test_pagination_query() {
        let pagination = PaginationConfig::default();
        let query = pagination.query(0, 50, Some("42"));
        assert_eq!(
            query,
            vec![
                ("page".to_string(), "1".to_string()),
                ("limit".to_string(), "50".to_string()),
                ("stage_id".to_string(), "42".to_string()),
            ]
        );

        let zero_based = PaginationConfig {
            first_page: 0,
            ..Default::default()
        };
        assert_eq!(zero_based.query(3, 10, None)[0].1, "3");
        assert_eq!(zero_based.query(3, 10, None).len(), 2);
    }

    #[test]
    fn test_redacted_hides_token() {
        let config = RestSourceConfig::new("https://api.crm.example").with_bearer_token("s3cr3t");
        let debug = format!("{:?}", config.redacted());
        assert!(!debug.contains("s3cr3t"));
    }

    #[test]
    fn test_yaml_deserialization_with_defaults() {
        let yaml = r#"
base_url: https://api.crm.example/v1
auth:
  type: api_key
  key: abc
  header_name: token
pagination:
  size_param: show
response:
  results_path: /items
"#;
        let config: RestSourceConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.pagination.size_param, "show");
        assert_eq!(config.pagination.page_param, "page");
        assert_eq!(config.response.results_path, "/items");
        assert_eq!(config.response.id_field, "id");
        assert_eq!(config.retry.max_retries, 5);
        assert!(config.validate().is_ok());
    }
}

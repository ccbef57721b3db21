//! Rate limiting and retry logic for the REST source.
//!
//! This module provides:
//! - Client-side request throttling (token bucket plus concurrency cap)
//! - Linear backoff retry policy for failing requests
//! - A separate backoff budget for upstream rate-limit signals
//! - Logging verbosity control

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, trace};

/// Configuration for client-side request throttling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThrottleConfig {
    /// Whether throttling is enabled.
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Maximum requests per second (default: 5).
    #[serde(default = "default_requests_per_second")]
    pub requests_per_second: u32,

    /// Maximum concurrent requests (default: 4).
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: u32,
}

fn default_enabled() -> bool {
    true
}

fn default_requests_per_second() -> u32 {
    5
}

fn default_max_concurrent() -> u32 {
    4
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            requests_per_second: default_requests_per_second(),
            max_concurrent: default_max_concurrent(),
        }
    }
}

impl ThrottleConfig {
    /// Create a new throttle config with custom RPS.
    #[must_use]
    pub fn new(requests_per_second: u32) -> Self {
        Self {
            requests_per_second,
            ..Default::default()
        }
    }

    /// Disable throttling.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Default::default()
        }
    }

    /// Set max concurrent requests.
    #[must_use]
    pub fn with_max_concurrent(mut self, max: u32) -> Self {
        self.max_concurrent = max;
        self
    }
}

/// Retry behavior for page and detail requests.
///
/// Two independent budgets are kept: one for upstream rate-limit signals
/// (429, or a 200/401 whose body announces a rate limit) and one for every
/// other failure (non-2xx, network errors, unparseable bodies).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum retries for failing requests (default: 5).
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Base delay in milliseconds; attempt `n` waits `n * base_delay_ms` (default: 1000).
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Maximum retries after a rate-limit signal (default: 5).
    #[serde(default = "default_max_retries")]
    pub max_rate_limit_retries: u32,

    /// Fixed wait after a rate-limit signal in milliseconds (default: 2000).
    #[serde(default = "default_rate_limit_backoff_ms")]
    pub rate_limit_backoff_ms: u64,

    /// Upper bound for a server-provided Retry-After in milliseconds (default: 60000).
    #[serde(default = "default_max_rate_limit_backoff_ms")]
    pub max_rate_limit_backoff_ms: u64,

    /// Whether to honor the Retry-After header on 429 responses.
    #[serde(default = "default_honor_retry_after")]
    pub honor_retry_after: bool,

    /// Case-insensitive body fragments that announce a rate limit.
    #[serde(default = "default_rate_limit_markers")]
    pub rate_limit_markers: Vec<String>,
}

fn default_max_retries() -> u32 {
    5
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_rate_limit_backoff_ms() -> u64 {
    2000
}

fn default_max_rate_limit_backoff_ms() -> u64 {
    60_000
}

fn default_honor_retry_after() -> bool {
    true
}

fn default_rate_limit_markers() -> Vec<String> {
    vec![
        "rate limit".to_string(),
        "too many requests".to_string(),
        "limite de requisi".to_string(),
    ]
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_rate_limit_retries: default_max_retries(),
            rate_limit_backoff_ms: default_rate_limit_backoff_ms(),
            max_rate_limit_backoff_ms: default_max_rate_limit_backoff_ms(),
            honor_retry_after: default_honor_retry_after(),
            rate_limit_markers: default_rate_limit_markers(),
        }
    }
}

impl RetryPolicy {
    /// Create a policy with the same retry budget for both failure kinds.
    #[must_use]
    pub fn new(max_retries: u32) -> Self {
        Self::default().with_max_retries(max_retries)
    }

    /// Disable retries.
    #[must_use]
    pub fn disabled() -> Self {
        Self::new(0)
    }

    /// Set both retry budgets.
    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self.max_rate_limit_retries = max_retries;
        self
    }

    /// Set the linear backoff base delay.
    #[must_use]
    pub fn with_base_delay(mut self, ms: u64) -> Self {
        self.base_delay_ms = ms;
        self
    }

    /// Set the rate-limit backoff.
    #[must_use]
    pub fn with_rate_limit_backoff(mut self, ms: u64) -> Self {
        self.rate_limit_backoff_ms = ms;
        self
    }

    /// Backoff before retry number `attempt` (1-based) of a failing request.
    #[must_use]
    pub fn linear_backoff(&self, attempt: u32) -> Duration {
        Duration::from_millis(u64::from(attempt).saturating_mul(self.base_delay_ms))
    }

    /// Wait after a rate-limit signal.
    #[must_use]
    pub fn rate_limit_wait(&self, retry_after: Option<Duration>) -> Duration {
        let fixed = Duration::from_millis(self.rate_limit_backoff_ms);
        match retry_after {
            Some(wait) if self.honor_retry_after => {
                wait.min(Duration::from_millis(self.max_rate_limit_backoff_ms))
            }
            _ => fixed,
        }
    }

    /// Check whether a response body announces a rate limit.
    #[must_use]
    pub fn signals_rate_limit(&self, body: &str) -> bool {
        if body.is_empty() {
            return false;
        }
        let lower = body.to_lowercase();
        self.rate_limit_markers
            .iter()
            .any(|marker| !marker.is_empty() && lower.contains(&marker.to_lowercase()))
    }
}

/// Logging verbosity level for request/response logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogVerbosity {
    /// No request/response logging.
    Quiet,
    /// Log request URL and status code only (default).
    #[default]
    Normal,
    /// Log request/response bodies as well.
    Debug,
}

impl LogVerbosity {
    /// Check if bodies should be logged.
    #[must_use]
    pub fn log_bodies(&self) -> bool {
        matches!(self, LogVerbosity::Debug)
    }

    /// Check if any logging should occur.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        !matches!(self, LogVerbosity::Quiet)
    }
}

/// Token bucket for rate limiting.
struct TokenBucket {
    /// Available tokens.
    tokens: f64,

    /// Maximum tokens (bucket size).
    max_tokens: f64,

    /// Refill rate (tokens per second).
    refill_rate: f64,

    /// Last refill timestamp.
    last_refill: Instant,
}

impl TokenBucket {
    fn new(tokens_per_second: u32) -> Self {
        let rate = f64::from(tokens_per_second.max(1));
        Self {
            tokens: rate,
            max_tokens: rate,
            refill_rate: rate,
            last_refill: Instant::now(),
        }
    }

    /// Refill tokens based on elapsed time.
    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill);
        self.tokens = (self.tokens + elapsed.as_secs_f64() * self.refill_rate).min(self.max_tokens);
        self.last_refill = now;
    }

    /// Try to acquire a token. Returns wait time if not available.
    fn try_acquire(&mut self) -> Result<(), Duration> {
        self.refill();

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            Ok(())
        } else {
            let tokens_needed = 1.0 - self.tokens;
            Err(Duration::from_secs_f64(tokens_needed / self.refill_rate))
        }
    }
}

/// Client-side throttle in front of every outbound request.
pub struct RequestThrottle {
    config: ThrottleConfig,
    semaphore: Arc<Semaphore>,
    tokens: Mutex<TokenBucket>,
}

impl RequestThrottle {
    /// Create a new throttle with the given configuration.
    #[must_use]
    pub fn new(config: ThrottleConfig) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.max_concurrent.max(1) as usize));
        let tokens = Mutex::new(TokenBucket::new(config.requests_per_second));
        Self {
            config,
            semaphore,
            tokens,
        }
    }

    /// Wait for a concurrency permit and a rate token.
    ///
    /// The returned guard releases the concurrency permit when dropped.
    pub async fn acquire(&self) -> ThrottleGuard {
        if !self.config.enabled {
            return ThrottleGuard { _permit: None };
        }

        // A closed semaphore only happens on shutdown; proceed unthrottled.
        let permit = self.semaphore.clone().acquire_owned().await.ok();

        loop {
            let wait = self.tokens.lock().await.try_acquire().err();
            match wait {
                None => {
                    trace!("Throttle token acquired");
                    return ThrottleGuard { _permit: permit };
                }
                Some(wait) => {
                    debug!(wait_ms = wait.as_millis(), "Throttled, waiting for token");
                    tokio::time::sleep(wait).await;
                }
            }
        }
    }

    /// Currently available concurrency permits.
    #[must_use]
    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }
}

/// Guard returned when a throttle permit is acquired.
pub struct ThrottleGuard {
    _permit: Option<OwnedSemaphorePermit>,
}

/// Parse a Retry-After header value.
///
/// Supports both delay-seconds (`"120"`) and HTTP-date
/// (`"Wed, 21 Oct 2015 07:28:00 GMT"`) formats.
#[must_use]
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    let value = value.trim();
    if let Ok(seconds) = value.parse::<u64>() {
        return Some(Duration::from_secs(seconds));
    }

    let at = chrono::DateTime::parse_from_rfc2822(value).ok()?;
    let delta = at.with_timezone(&chrono::Utc) - chrono::Utc::now();
    Some(delta.to_std().unwrap_or(Duration::ZERO))
}

#[cfg(test)]
mod tests {
    use super::*;

    // ==========================================================================
    // ThrottleConfig Tests
    // ==========================================================================

    #[test]
    fn test_throttle_config_default() {
        let config = ThrottleConfig::default();
        assert!(config.enabled);
        assert_eq!(config.requests_per_second, 5);
        assert_eq!(config.max_concurrent, 4);
    }

    #[test]
    fn test_throttle_config_builders() {
        assert!(!ThrottleConfig::disabled().enabled);
        let config = ThrottleConfig::new(20).with_max_concurrent(2);
        assert_eq!(config.requests_per_second, 20);
        assert_eq!(config.max_concurrent, 2);
    }

    // ==========================================================================
    // RetryPolicy Tests
    // ==========================================================================

    #[test]
    fn test_retry_policy_default() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_retries, 5);
        assert_eq!(policy.max_rate_limit_retries, 5);
        assert_eq!(policy.base_delay_ms, 1000);
        assert_eq!(policy.rate_limit_backoff_ms, 2000);
        assert!(policy.honor_retry_after);
        assert_eq!(policy.rate_limit_markers.len(), 3);
    }

    #[test]
    fn test_retry_policy_new_sets_both_budgets() {
        let policy = RetryPolicy::new(2);
        assert_eq!(policy.max_retries, 2);
        assert_eq!(policy.max_rate_limit_retries, 2);

        let disabled = RetryPolicy::disabled();
        assert_eq!(disabled.max_retries, 0);
        assert_eq!(disabled.max_rate_limit_retries, 0);
    }

    #[test]
    fn test_linear_backoff() {
        let policy = RetryPolicy::default().with_base_delay(250);
        assert_eq!(policy.linear_backoff(0), Duration::ZERO);
        assert_eq!(policy.linear_backoff(1), Duration::from_millis(250));
        assert_eq!(policy.linear_backoff(2), Duration::from_millis(500));
        assert_eq!(policy.linear_backoff(4), Duration::from_millis(1000));
    }

    #[test]
    fn test_rate_limit_wait() {
        let policy = RetryPolicy::default().with_rate_limit_backoff(3000);
        assert_eq!(policy.rate_limit_wait(None), Duration::from_millis(3000));
        assert_eq!(
            policy.rate_limit_wait(Some(Duration::from_secs(7))),
            Duration::from_secs(7)
        );
        // Capped by max_rate_limit_backoff_ms.
        assert_eq!(
            policy.rate_limit_wait(Some(Duration::from_secs(3600))),
            Duration::from_secs(60)
        );

        let mut ignoring = policy.clone();
        ignoring.honor_retry_after = false;
        assert_eq!(
            ignoring.rate_limit_wait(Some(Duration::from_secs(7))),
            Duration::from_millis(3000)
        );
    }

    #[test]
    fn test_signals_rate_limit() {
        let policy = RetryPolicy::default();
        assert!(policy.signals_rate_limit(r#"{"message":"Rate Limit exceeded"}"#));
        assert!(policy.signals_rate_limit("Too Many Requests"));
        assert!(policy.signals_rate_limit(
            r#"{"erro":"Limite de requisições atingido"}"#
        ));
        assert!(!policy.signals_rate_limit(r#"{"message":"Unauthorized"}"#));
        assert!(!policy.signals_rate_limit(""));
    }

    #[test]
    fn test_retry_policy_yaml_defaults() {
        let policy: RetryPolicy = serde_yaml::from_str("max_retries: 2").unwrap();
        assert_eq!(policy.max_retries, 2);
        assert_eq!(policy.max_rate_limit_retries, 5);
        assert_eq!(policy.base_delay_ms, 1000);
    }

    // ==========================================================================
    // LogVerbosity Tests
    // ==========================================================================

    #[test]
    fn test_log_verbosity() {
        assert_eq!(LogVerbosity::default(), LogVerbosity::Normal);
        assert!(!LogVerbosity::Quiet.is_enabled());
        assert!(LogVerbosity::Normal.is_enabled());
        assert!(!LogVerbosity::Normal.log_bodies());
        assert!(LogVerbosity::Debug.log_bodies());
    }

    // ==========================================================================
    // TokenBucket / RequestThrottle Tests
    // ==========================================================================

    #[test]
    fn test_token_bucket_depletes() {
        let mut bucket = TokenBucket::new(2);
        assert!(bucket.try_acquire().is_ok());
        assert!(bucket.try_acquire().is_ok());
        let wait = bucket.try_acquire().unwrap_err();
        assert!(wait > Duration::ZERO);
        assert!(wait <= Duration::from_millis(500));
    }

    #[tokio::test]
    async fn test_throttle_disabled_is_noop() {
        let throttle = RequestThrottle::new(ThrottleConfig::disabled().with_max_concurrent(1));
        let _a = throttle.acquire().await;
        let _b = throttle.acquire().await;
        assert_eq!(throttle.available_permits(), 1);
    }

    #[tokio::test]
    async fn test_throttle_releases_permit_on_drop() {
        let throttle = RequestThrottle::new(ThrottleConfig::new(100).with_max_concurrent(2));
        {
            let _guard = throttle.acquire().await;
            assert_eq!(throttle.available_permits(), 1);
        }
        assert_eq!(throttle.available_permits(), 2);
    }

    // ==========================================================================
    // Retry-After Tests
    // ==========================================================================

    #[test]
    fn test_parse_retry_after_seconds() {
        assert_eq!(parse_retry_after("120"), Some(Duration::from_secs(120)));
        assert_eq!(parse_retry_after(" 3 "), Some(Duration::from_secs(3)));
    }

    #[test]
    fn test_parse_retry_after_http_date_in_past() {
        assert_eq!(
            parse_retry_after("Wed, 21 Oct 2015 07:28:00 GMT"),
            Some(Duration::ZERO)
        );
    }

    #[test]
    fn test_parse_retry_after_invalid() {
        assert_eq!(parse_retry_after("soon"), None);
        assert_eq!(parse_retry_after("-5"), None);
    }
}

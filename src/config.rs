//! Configuration for the proxy pool.

use std::time::Duration;

/// Browser-like identification sent with every request.
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
    AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";

/// Lightweight endpoints used to probe a proxy, tried in order.
pub const DEFAULT_TEST_URLS: [&str; 3] = [
    "http://www.gstatic.com/generate_204",
    "http://httpbin.org/ip",
    "http://example.com/",
];

pub const MIN_TEST_TIMEOUT: Duration = Duration::from_secs(1);
pub const MIN_FETCH_TIMEOUT: Duration = Duration::from_secs(5);
pub const MIN_HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(5 * 60);
pub const MAX_PARALLEL_TESTS: usize = 500;

/// Configuration for the proxy pool.
#[derive(Debug, Clone)]
pub struct ProxyPoolConfig {
    /// Source URLs to fetch proxy lists from.
    pub sources: Vec<String>,
    /// URLs a candidate is probed against; the first success wins.
    pub test_urls: Vec<String>,
    /// Timeout for a single probe request.
    pub test_timeout: Duration,
    /// Timeout for a single fetch attempt through a proxy.
    pub fetch_timeout: Duration,
    /// Maximum number of probes in flight at once.
    pub max_parallel_tests: usize,
    /// Attempts per proxy before moving to the next one.
    pub max_retries: usize,
    /// Whether a proxy-less request is made once every proxy failed.
    pub allow_direct_fallback: bool,
    /// User agent sent with every request.
    pub user_agent: String,
    /// Interval between background health checks.
    pub health_check_interval: Duration,
    /// Overall budget of one health check sweep.
    pub health_check_budget: Duration,
    /// Timeout for downloading a single proxy list.
    pub discovery_timeout: Duration,
    /// Overall probe budget when new proxies are discovered on demand.
    pub discovery_budget: Duration,
    /// Maximum requests per second per proxy.
    pub max_requests_per_second: f64,
}

impl ProxyPoolConfig {
    /// Create a new configuration builder.
    pub fn builder() -> ProxyPoolConfigBuilder {
        ProxyPoolConfigBuilder::new()
    }
}

/// Builder for `ProxyPoolConfig`.
///
/// Out-of-range values are clamped in [`build`](Self::build) rather than rejected.
pub struct ProxyPoolConfigBuilder {
    sources: Vec<String>,
    test_urls: Vec<String>,
    test_timeout: Option<Duration>,
    fetch_timeout: Option<Duration>,
    max_parallel_tests: Option<usize>,
    max_retries: Option<usize>,
    allow_direct_fallback: Option<bool>,
    user_agent: Option<String>,
    health_check_interval: Option<Duration>,
    health_check_budget: Option<Duration>,
    discovery_timeout: Option<Duration>,
    discovery_budget: Option<Duration>,
    max_requests_per_second: Option<f64>,
}

impl ProxyPoolConfigBuilder {
    /// Create a new builder with default values.
    pub fn new() -> Self {
        Self {
            sources: Vec::new(),
            test_urls: Vec::new(),
            test_timeout: None,
            fetch_timeout: None,
            max_parallel_tests: None,
            max_retries: None,
            allow_direct_fallback: None,
            user_agent: None,
            health_check_interval: None,
            health_check_budget: None,
            discovery_timeout: None,
            discovery_budget: None,
            max_requests_per_second: None,
        }
    }

    /// Set the source URLs to fetch proxy lists from.
    pub fn sources(mut self, sources: Vec<impl Into<String>>) -> Self {
        self.sources = sources.into_iter().map(Into::into).collect();
        self
    }

    /// Set the URLs used to probe proxies.
    pub fn test_urls(mut self, urls: Vec<impl Into<String>>) -> Self {
        self.test_urls = urls.into_iter().map(Into::into).collect();
        self
    }

    /// Set the timeout for a single probe request (at least 1s).
    pub fn test_timeout(mut self, timeout: Duration) -> Self {
        self.test_timeout = Some(timeout);
        self
    }

    /// Set the timeout for a single fetch attempt (at least 5s).
    pub fn fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = Some(timeout);
        self
    }

    /// Set the number of concurrent probes (clamped to 1..=500).
    pub fn max_parallel_tests(mut self, count: usize) -> Self {
        self.max_parallel_tests = Some(count);
        self
    }

    /// Set the number of attempts per proxy (at least 1).
    pub fn max_retries(mut self, count: usize) -> Self {
        self.max_retries = Some(count);
        self
    }

    /// Allow a proxy-less request when every proxy failed.
    pub fn allow_direct_fallback(mut self, allow: bool) -> Self {
        self.allow_direct_fallback = Some(allow);
        self
    }

    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    /// Set the interval between health checks (at least 5 minutes).
    pub fn health_check_interval(mut self, interval: Duration) -> Self {
        self.health_check_interval = Some(interval);
        self
    }

    pub fn health_check_budget(mut self, budget: Duration) -> Self {
        self.health_check_budget = Some(budget);
        self
    }

    pub fn discovery_timeout(mut self, timeout: Duration) -> Self {
        self.discovery_timeout = Some(timeout);
        self
    }

    pub fn discovery_budget(mut self, budget: Duration) -> Self {
        self.discovery_budget = Some(budget);
        self
    }

    /// Set the maximum requests per second per proxy.
    pub fn max_requests_per_second(mut self, rps: f64) -> Self {
        self.max_requests_per_second = Some(rps);
        self
    }

    /// Build the configuration.
    pub fn build(self) -> ProxyPoolConfig {
        let test_urls = if self.test_urls.is_empty() {
            DEFAULT_TEST_URLS.iter().map(|url| url.to_string()).collect()
        } else {
            self.test_urls
        };

        ProxyPoolConfig {
            sources: self.sources,
            test_urls,
            test_timeout: self
                .test_timeout
                .unwrap_or(Duration::from_secs(10))
                .max(MIN_TEST_TIMEOUT),
            fetch_timeout: self
                .fetch_timeout
                .unwrap_or(Duration::from_secs(30))
                .max(MIN_FETCH_TIMEOUT),
            max_parallel_tests: self.max_parallel_tests.unwrap_or(50).clamp(1, MAX_PARALLEL_TESTS),
            max_retries: self.max_retries.unwrap_or(3).max(1),
            allow_direct_fallback: self.allow_direct_fallback.unwrap_or(false),
            user_agent: self.user_agent.unwrap_or_else(|| DEFAULT_USER_AGENT.to_string()),
            health_check_interval: self
                .health_check_interval
                .unwrap_or(Duration::from_secs(30 * 60))
                .max(MIN_HEALTH_CHECK_INTERVAL),
            health_check_budget: self.health_check_budget.unwrap_or(Duration::from_secs(5 * 60)),
            discovery_timeout: self.discovery_timeout.unwrap_or(Duration::from_secs(10)),
            discovery_budget: self.discovery_budget.unwrap_or(Duration::from_secs(3 * 60)),
            max_requests_per_second: self.max_requests_per_second.unwrap_or(5.0),
        }
    }
}

impl Default for ProxyPoolConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ProxyPoolConfig::builder().sources(vec!["http://list.example/a.txt"]).build();
        assert_eq!(config.sources.len(), 1);
        assert_eq!(config.test_urls.len(), DEFAULT_TEST_URLS.len());
        assert_eq!(config.max_retries, 3);
        assert!(!config.allow_direct_fallback);
        assert_eq!(config.health_check_interval, Duration::from_secs(30 * 60));
        assert_eq!(config.user_agent, DEFAULT_USER_AGENT);
    }

    #[test]
    fn test_values_are_clamped() {
        let config = ProxyPoolConfig::builder()
            .test_timeout(Duration::from_millis(10))
            .fetch_timeout(Duration::from_secs(1))
            .max_parallel_tests(10_000)
            .max_retries(0)
            .health_check_interval(Duration::from_secs(60))
            .build();
        assert_eq!(config.test_timeout, MIN_TEST_TIMEOUT);
        assert_eq!(config.fetch_timeout, MIN_FETCH_TIMEOUT);
        assert_eq!(config.max_parallel_tests, MAX_PARALLEL_TESTS);
        assert_eq!(config.max_retries, 1);
        assert_eq!(config.health_check_interval, MIN_HEALTH_CHECK_INTERVAL);

        let config = ProxyPoolConfig::builder().max_parallel_tests(0).build();
        assert_eq!(config.max_parallel_tests, 1);
    }

    #[test]
    fn test_custom_test_urls() {
        let config = ProxyPoolConfig::builder()
            .test_urls(vec!["http://probe.example/"])
            .allow_direct_fallback(true)
            .user_agent("probe/1.0")
            .build();
        assert_eq!(config.test_urls, vec!["http://probe.example/".to_string()]);
        assert!(config.allow_direct_fallback);
        assert_eq!(config.user_agent, "probe/1.0");
    }
}

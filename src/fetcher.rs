//! Fetching through the pool: known proxies first, then freshly discovered
//! ones, then (if allowed) a direct request.

use crate::config::ProxyPoolConfig;
use crate::discovery;
use crate::error::ProxyPoolError;
use crate::health::{HealthChecker, HealthScheduler};
use crate::pool::{PoolStats, ProxyPool};
use crate::probe::{ProbeEngine, ProbePass, ProbeReport};
use crate::proxy::{ProxyRecord, UNHEALTHY_FAILURES};
use crate::selector::{self, ROUTING_CANDIDATES};
use crate::transport::{HttpTransport, ReqwestTransport};

use log::{info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;

/// Longest wait for the discovery lock before giving up on discovery.
pub const DISCOVERY_LOCK_WAIT: Duration = Duration::from_secs(30);
/// Candidates started before a discovery probe pass may stop early.
pub const DISCOVERY_MIN_TO_CHECK: usize = 50;
/// Below this many known candidates, discovery runs again.
pub const MIN_KNOWN_CANDIDATES: usize = 100;
/// Delay before the second attempt; doubles for every further attempt.
pub const BASE_BACKOFF: Duration = Duration::from_millis(200);

/// Delay after the failed attempt `attempt` (zero-based).
pub fn backoff_delay(attempt: u32) -> Duration {
    BASE_BACKOFF.saturating_mul(1u32 << attempt.min(16))
}

/// Fetches URLs through a self-maintaining pool of proxies.
pub struct ProxyFetcher {
    /// Configuration for the pool.
    pub config: ProxyPoolConfig,
    pool: Arc<ProxyPool>,
    transport: Arc<dyn HttpTransport>,
    engine: Arc<ProbeEngine>,
    checker: Arc<HealthChecker>,
    discovery_lock: Mutex<()>,
    initialized: AtomicBool,
    scheduler: parking_lot::Mutex<Option<HealthScheduler>>,
}

impl ProxyFetcher {
    /// Create a fetcher backed by reqwest and start its health scheduler.
    /// Must be called within a Tokio runtime.
    pub fn new(config: ProxyPoolConfig) -> Result<Self, ProxyPoolError> {
        let transport = ReqwestTransport::new(config.user_agent.clone())
            .map_err(|e| ProxyPoolError::Client(e.to_string()))?;
        Self::with_transport(config, Arc::new(transport))
    }

    /// Create a fetcher using the given transport and start its health scheduler.
    /// Must be called within a Tokio runtime.
    pub fn with_transport(
        config: ProxyPoolConfig,
        transport: Arc<dyn HttpTransport>,
    ) -> Result<Self, ProxyPoolError> {
        if config.sources.iter().all(|source| source.trim().is_empty()) {
            return Err(ProxyPoolError::NoSources);
        }

        let pool = Arc::new(ProxyPool::new());
        let engine = Arc::new(ProbeEngine::new(Arc::clone(&pool), Arc::clone(&transport), &config));
        let checker = Arc::new(HealthChecker::new(
            Arc::clone(&pool),
            Arc::clone(&engine),
            config.health_check_budget,
        ));
        let scheduler = HealthScheduler::start(Arc::clone(&checker), config.health_check_interval);

        Ok(Self {
            config,
            pool,
            transport,
            engine,
            checker,
            discovery_lock: Mutex::new(()),
            initialized: AtomicBool::new(false),
            scheduler: parking_lot::Mutex::new(Some(scheduler)),
        })
    }

    /// The shared proxy pool.
    pub fn pool(&self) -> &Arc<ProxyPool> {
        &self.pool
    }

    /// The health checker driven by the background scheduler.
    pub fn health_checker(&self) -> &Arc<HealthChecker> {
        &self.checker
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    /// Statistics about the pool.
    pub fn stats(&self) -> PoolStats {
        self.pool.stats(self.is_initialized())
    }

    /// Fetch `url`, returning an empty string when every route failed.
    ///
    /// Only invalid input and cancellation are reported as errors.
    pub async fn fetch(
        &self,
        url: &str,
        cancel: &CancellationToken,
    ) -> Result<String, ProxyPoolError> {
        Ok(self.try_fetch(url, cancel).await?.unwrap_or_default())
    }

    /// Fetch `url`, returning `None` when every route failed. Unlike
    /// [`fetch`](Self::fetch) this tells an empty body apart from a failure.
    ///
    /// An empty `2xx` body does not end the search: later routes are still
    /// tried, and `Some("")` is only returned once none of them did better.
    pub async fn try_fetch(
        &self,
        url: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<String>, ProxyPoolError> {
        validate_url(url)?;
        if cancel.is_cancelled() {
            return Err(ProxyPoolError::Cancelled);
        }
        let mut empty_success = false;

        for record in selector::top_healthy(&self.pool, ROUTING_CANDIDATES) {
            match self.fetch_with_retry(&record, url, cancel).await? {
                Some(body) if !body.is_empty() => return Ok(Some(body)),
                Some(_) => empty_success = true,
                None => {}
            }
        }

        if let Some(record) = self.discover_working(cancel).await? {
            info!("Discovered working proxy {}", record);
            match self.fetch_with_retry(&record, url, cancel).await? {
                Some(body) if !body.is_empty() => return Ok(Some(body)),
                Some(_) => empty_success = true,
                None => {}
            }
        }

        if self.config.allow_direct_fallback {
            info!("All proxies failed, falling back to a direct request for {}", url);
            match self.fetch_direct(url, cancel).await? {
                Some(body) if !body.is_empty() => return Ok(Some(body)),
                Some(_) => empty_success = true,
                None => {}
            }
        }

        if empty_success {
            info!("Only empty responses for {}", url);
            return Ok(Some(String::new()));
        }
        let (total, healthy) = self.pool.get_stats();
        warn!("Every proxy failed for {}. Total: {}, Healthy: {}", url, total, healthy);
        Ok(None)
    }

    /// Fetch `url` through one proxy, retrying with exponential backoff.
    pub async fn fetch_with_retry(
        &self,
        record: &ProxyRecord,
        url: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<String>, ProxyPoolError> {
        let limiter = self
            .pool
            .rate_limiter(&record.address, self.config.max_requests_per_second);
        let timeout = self.config.fetch_timeout;

        for attempt in 0..self.config.max_retries {
            if attempt > 0 {
                let delay = backoff_delay((attempt - 1) as u32);
                tokio::select! {
                    _ = cancel.cancelled() => return Err(ProxyPoolError::Cancelled),
                    _ = time::sleep(delay) => {}
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => return Err(ProxyPoolError::Cancelled),
                _ = limiter.until_ready() => {}
            }

            info!("Using proxy: {} (attempt {})", record.address, attempt + 1);
            let start = Instant::now();
            let outcome = tokio::select! {
                _ = cancel.cancelled() => return Err(ProxyPoolError::Cancelled),
                outcome = time::timeout(
                    timeout,
                    self.transport.get(url, Some(record), timeout),
                ) => outcome,
            };

            match outcome {
                Ok(Ok(response)) if response.is_success() => {
                    self.pool.report_success(&record.address, Some(start.elapsed()));
                    return Ok(Some(response.body));
                }
                Ok(Ok(response)) => warn!(
                    "Request through {} got HTTP {} (attempt {})",
                    record.address,
                    response.status,
                    attempt + 1
                ),
                Ok(Err(e)) => warn!(
                    "Request failed with proxy {} (attempt {}): {}",
                    record.address,
                    attempt + 1,
                    e
                ),
                Err(_) => warn!(
                    "Request through {} timed out (attempt {})",
                    record.address,
                    attempt + 1
                ),
            }
            self.pool.report_failure(&record.address);
        }

        self.pool.report_failure(&record.address);
        Ok(None)
    }

    /// Eagerly discover and probe every candidate, if not done yet.
    pub async fn warm_up(&self, cancel: &CancellationToken) -> Result<PoolStats, ProxyPoolError> {
        let candidates = {
            let guard = self.lock_discovery(cancel).await?;
            if guard.is_some() && !self.is_initialized() {
                let candidates = self.discover(cancel).await?;
                self.initialized.store(true, Ordering::SeqCst);
                candidates
            } else {
                Vec::new()
            }
        };

        if !candidates.is_empty() {
            let pass = ProbePass {
                min_to_check: candidates.len(),
                budget: self.config.discovery_budget,
                skip_known_unhealthy: true,
                stop_early: false,
            };
            self.probe(candidates, &pass, cancel).await?;
        }

        let stats = self.stats();
        info!(
            "Proxy pool initialized with {}/{} healthy proxies",
            stats.healthy_proxies, stats.total_proxies
        );
        Ok(stats)
    }

    /// Stop the background health scheduler and wait for it.
    pub async fn shutdown(&self) {
        let scheduler = self.scheduler.lock().take();
        if let Some(scheduler) = scheduler {
            scheduler.stop().await;
        }
    }

    /// Materialize new candidates and return the best one that works.
    async fn discover_working(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Option<ProxyRecord>, ProxyPoolError> {
        let candidates = {
            let guard = self.lock_discovery(cancel).await?;
            if guard.is_none() {
                return Ok(None);
            }
            self.gather_candidates(cancel).await?
        };
        if candidates.is_empty() {
            warn!("No candidate proxies to probe");
            return Ok(None);
        }

        let best = self
            .engine
            .find_working(candidates, DISCOVERY_MIN_TO_CHECK, self.config.discovery_budget, cancel)
            .await;
        if cancel.is_cancelled() {
            return Err(ProxyPoolError::Cancelled);
        }
        Ok(best)
    }

    /// Candidates for a discovery probe pass. Called with the discovery lock held.
    async fn gather_candidates(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Vec<String>, ProxyPoolError> {
        if !self.is_initialized() {
            let discovered = self.discover(cancel).await?;
            self.initialized.store(true, Ordering::SeqCst);
            return Ok(discovered);
        }

        let mut candidates = self
            .pool
            .addresses_where(|record| record.failure_count < UNHEALTHY_FAILURES);
        if candidates.len() < MIN_KNOWN_CANDIDATES {
            let fresh = self.discover(cancel).await?;
            candidates.extend(fresh.into_iter().filter(|address| !self.pool.contains(address)));
        }
        Ok(discovery::dedup(candidates))
    }

    async fn discover(&self, cancel: &CancellationToken) -> Result<Vec<String>, ProxyPoolError> {
        tokio::select! {
            _ = cancel.cancelled() => Err(ProxyPoolError::Cancelled),
            candidates = discovery::discover(
                self.transport.as_ref(),
                &self.config.sources,
                self.config.discovery_timeout,
            ) => Ok(candidates),
        }
    }

    async fn probe(
        &self,
        candidates: Vec<String>,
        pass: &ProbePass,
        cancel: &CancellationToken,
    ) -> Result<ProbeReport, ProxyPoolError> {
        let report = self.engine.run(candidates, pass, cancel).await;
        if cancel.is_cancelled() {
            return Err(ProxyPoolError::Cancelled);
        }
        Ok(report)
    }

    /// Take the discovery lock, or `None` if it could not be had in time.
    async fn lock_discovery(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Option<tokio::sync::MutexGuard<'_, ()>>, ProxyPoolError> {
        tokio::select! {
            _ = cancel.cancelled() => Err(ProxyPoolError::Cancelled),
            guard = time::timeout(DISCOVERY_LOCK_WAIT, self.discovery_lock.lock()) => match guard {
                Ok(guard) => Ok(Some(guard)),
                Err(_) => {
                    warn!("Timed out waiting for the discovery lock");
                    Ok(None)
                }
            },
        }
    }

    async fn fetch_direct(
        &self,
        url: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<String>, ProxyPoolError> {
        let timeout = self.config.fetch_timeout;
        let outcome = tokio::select! {
            _ = cancel.cancelled() => return Err(ProxyPoolError::Cancelled),
            outcome = time::timeout(timeout, self.transport.get(url, None, timeout)) => outcome,
        };
        match outcome {
            Ok(Ok(response)) if response.is_success() => Ok(Some(response.body)),
            Ok(Ok(response)) => {
                warn!("Direct request to {} got HTTP {}", url, response.status);
                Ok(None)
            }
            Ok(Err(e)) => {
                warn!("Direct request to {} failed: {}", url, e);
                Ok(None)
            }
            Err(_) => {
                warn!("Direct request to {} timed out", url);
                Ok(None)
            }
        }
    }
}

fn validate_url(url: &str) -> Result<(), ProxyPoolError> {
    if url.trim().is_empty() {
        return Err(ProxyPoolError::EmptyUrl);
    }
    url::Url::parse(url).map_err(|e| ProxyPoolError::InvalidUrl(format!("{url}: {e}")))?;
    Ok(())
}

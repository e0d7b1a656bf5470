//! Bounded-concurrency validation of candidate proxies.
//!
//! A probe pass admits candidates one at a time through a semaphore sized to
//! `max_parallel_tests`, so at most that many probes are ever in flight. Every
//! admitted probe runs in a [`JoinSet`] and the pass only returns once that set
//! is empty, which means no probe can outlive the semaphore it holds a permit of.

use crate::config::ProxyPoolConfig;
use crate::pool::ProxyPool;
use crate::proxy::ProxyRecord;
use crate::selector;
use crate::transport::HttpTransport;

use log::{debug, info};
use rand::seq::SliceRandom;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;

/// Admission stops once this many candidates are confirmed working.
pub const ENOUGH_WORKING: usize = 10;
/// Once this many work, admission stops and in-flight probes are told to settle.
pub const SOFT_ENOUGH_WORKING: usize = 5;
/// Time in-flight probes get to finish after cancellation or timeout.
pub const DRAIN_GRACE: Duration = Duration::from_secs(2);

/// Parameters of one probe pass.
#[derive(Debug, Clone)]
pub struct ProbePass {
    /// Candidates to start before early exit is considered.
    pub min_to_check: usize,
    /// Wall-clock budget of the whole pass.
    pub budget: Duration,
    /// Skip candidates the pool already knows to be unhealthy.
    pub skip_known_unhealthy: bool,
    /// Stop admitting once enough candidates work.
    pub stop_early: bool,
}

impl ProbePass {
    /// Pass used to find a usable proxy among new candidates.
    pub fn discovery(min_to_check: usize, budget: Duration) -> Self {
        Self {
            min_to_check,
            budget,
            skip_known_unhealthy: true,
            stop_early: true,
        }
    }

    /// Pass used to re-validate every given proxy.
    pub fn health_check(budget: Duration) -> Self {
        Self {
            min_to_check: 0,
            budget,
            skip_known_unhealthy: false,
            stop_early: false,
        }
    }
}

/// Outcome of one probe pass.
#[derive(Debug, Clone, Default)]
pub struct ProbeReport {
    /// Probes admitted.
    pub started: usize,
    /// Addresses that answered a test URL.
    pub working: Vec<String>,
    /// Probes that exhausted every test URL.
    pub failed: usize,
    /// Probes abandoned before reaching a verdict.
    pub abandoned: usize,
}

impl ProbeReport {
    fn absorb(&mut self, done: Result<ProbeOutcome, JoinError>) {
        match done {
            Ok(ProbeOutcome::Working(address)) => self.working.push(address),
            Ok(ProbeOutcome::Failed) => self.failed += 1,
            Ok(ProbeOutcome::Abandoned) | Err(_) => self.abandoned += 1,
        }
    }
}

#[derive(Debug)]
enum ProbeOutcome {
    Working(String),
    Failed,
    Abandoned,
}

/// Validates candidates against the configured test URLs.
pub struct ProbeEngine {
    pool: Arc<ProxyPool>,
    transport: Arc<dyn HttpTransport>,
    test_urls: Arc<Vec<String>>,
    max_parallel: usize,
    test_timeout: Duration,
}

impl ProbeEngine {
    pub fn new(
        pool: Arc<ProxyPool>,
        transport: Arc<dyn HttpTransport>,
        config: &ProxyPoolConfig,
    ) -> Self {
        Self {
            pool,
            transport,
            test_urls: Arc::new(config.test_urls.clone()),
            max_parallel: config.max_parallel_tests.max(1),
            test_timeout: config.test_timeout,
        }
    }

    /// Probe candidates and return the best one that works.
    pub async fn find_working(
        &self,
        candidates: Vec<String>,
        min_to_check: usize,
        budget: Duration,
        cancel: &CancellationToken,
    ) -> Option<ProxyRecord> {
        let report = self
            .run(candidates, &ProbePass::discovery(min_to_check, budget), cancel)
            .await;
        let working: Vec<ProxyRecord> = report
            .working
            .iter()
            .filter_map(|a| self.pool.get(a))
            .collect();
        selector::best(&working)
    }

    /// Run one probe pass, recording every verdict in the pool.
    pub async fn run(
        &self,
        mut candidates: Vec<String>,
        pass: &ProbePass,
        cancel: &CancellationToken,
    ) -> ProbeReport {
        {
            let mut rng = rand::rng();
            candidates.shuffle(&mut rng);
        }

        let deadline = Instant::now() + pass.budget;
        let semaphore = Arc::new(Semaphore::new(self.max_parallel));
        let working = Arc::new(AtomicUsize::new(0));
        let settle = CancellationToken::new();
        let mut tasks = JoinSet::new();
        let mut attempted = HashSet::new();
        let mut report = ProbeReport::default();
        let mut interrupted = false;

        for candidate in candidates {
            if pass.stop_early && report.started >= pass.min_to_check {
                let confirmed = working.load(Ordering::SeqCst);
                if confirmed >= ENOUGH_WORKING {
                    debug!(
                        "Enough working proxies after {} probes, stopping admission",
                        report.started
                    );
                    break;
                }
                if confirmed >= SOFT_ENOUGH_WORKING {
                    debug!(
                        "{} proxies working after {} probes, settling in-flight probes",
                        confirmed, report.started
                    );
                    settle.cancel();
                    break;
                }
            }
            if !attempted.insert(ProxyRecord::key_for(&candidate)) {
                continue;
            }
            if pass.skip_known_unhealthy && self.pool.is_known_unhealthy(&candidate) {
                continue;
            }

            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    interrupted = true;
                    break;
                }
                _ = time::sleep_until(deadline) => {
                    interrupted = true;
                    break;
                }
                permit = Arc::clone(&semaphore).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            report.started += 1;
            let probe = Probe {
                pool: Arc::clone(&self.pool),
                transport: Arc::clone(&self.transport),
                test_urls: Arc::clone(&self.test_urls),
                test_timeout: self.test_timeout,
                deadline,
                working: Arc::clone(&working),
                settle: settle.clone(),
            };
            tasks.spawn(async move {
                let _permit = permit;
                probe.run(candidate).await
            });

            while let Some(done) = tasks.try_join_next() {
                report.absorb(done);
            }
        }

        let mut hard_stop = if interrupted {
            Instant::now() + DRAIN_GRACE
        } else {
            deadline + DRAIN_GRACE
        };
        loop {
            if pass.stop_early
                && !settle.is_cancelled()
                && report.started >= pass.min_to_check
                && working.load(Ordering::SeqCst) >= SOFT_ENOUGH_WORKING
            {
                debug!("{} proxies working, settling in-flight probes", SOFT_ENOUGH_WORKING);
                settle.cancel();
            }

            tokio::select! {
                done = tasks.join_next() => match done {
                    Some(done) => report.absorb(done),
                    None => break,
                },
                _ = time::sleep_until(hard_stop) => break,
                _ = cancel.cancelled(), if !interrupted => {
                    interrupted = true;
                    hard_stop = hard_stop.min(Instant::now() + DRAIN_GRACE);
                }
            }
        }

        // Abandon stragglers and wait until each one has actually stopped.
        tasks.abort_all();
        while let Some(done) = tasks.join_next().await {
            report.absorb(done);
        }
        drop(semaphore);

        info!(
            "Probe pass finished: {} started, {} working, {} failed, {} abandoned",
            report.started,
            report.working.len(),
            report.failed,
            report.abandoned
        );
        report
    }
}

/// A single admitted probe.
struct Probe {
    pool: Arc<ProxyPool>,
    transport: Arc<dyn HttpTransport>,
    test_urls: Arc<Vec<String>>,
    test_timeout: Duration,
    deadline: Instant,
    working: Arc<AtomicUsize>,
    settle: CancellationToken,
}

impl Probe {
    async fn run(self, address: String) -> ProbeOutcome {
        let record = ProxyRecord::parse(&address);

        for (attempt, url) in self.test_urls.iter().enumerate() {
            if attempt > 0 && self.settle.is_cancelled() {
                return ProbeOutcome::Abandoned;
            }
            let remaining = self.deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return ProbeOutcome::Abandoned;
            }
            let timeout = self.test_timeout.min(remaining);

            let start = Instant::now();
            match time::timeout(timeout, self.transport.get(url, Some(&record), timeout)).await {
                Ok(Ok(response)) if response.is_success() => {
                    self.pool.report_success(&address, Some(start.elapsed()));
                    self.working.fetch_add(1, Ordering::SeqCst);
                    debug!("Proxy {} answered {}", address, url);
                    return ProbeOutcome::Working(address);
                }
                Ok(Ok(response)) => {
                    debug!("Proxy {} got HTTP {} from {}", address, response.status, url)
                }
                Ok(Err(e)) => debug!("Proxy {} failed {}: {}", address, url, e),
                Err(_) => debug!("Proxy {} timed out on {}", address, url),
            }
        }

        self.pool.report_failure(&address);
        ProbeOutcome::Failed
    }
}

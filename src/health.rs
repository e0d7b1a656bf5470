//! Background re-validation and eviction.

use crate::pool::ProxyPool;
use crate::probe::{ProbeEngine, ProbePass};
use crate::proxy::ProxyRecord;

use log::{error, info};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio::time;
use tokio_util::sync::CancellationToken;

/// A proxy not checked for this long is re-probed.
pub const STALE_AFTER: Duration = Duration::from_secs(30 * 60);
/// Unhealthy proxies with fewer failures than this get another chance.
pub const RECHECK_MAX_FAILURES: u32 = 5;

/// Result of one sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub checked: usize,
    pub working: usize,
    pub evicted: usize,
}

/// Performs a single health sweep over the pool.
pub struct HealthChecker {
    pool: Arc<ProxyPool>,
    engine: Arc<ProbeEngine>,
    budget: Duration,
}

impl HealthChecker {
    pub fn new(pool: Arc<ProxyPool>, engine: Arc<ProbeEngine>, budget: Duration) -> Self {
        Self { pool, engine, budget }
    }

    /// Whether a proxy is due for a re-check.
    pub fn is_due(record: &ProxyRecord, now: Instant) -> bool {
        let stale = now.saturating_duration_since(record.last_checked_at) > STALE_AFTER;
        let may_have_recovered =
            !record.is_healthy() && record.failure_count < RECHECK_MAX_FAILURES;
        stale || may_have_recovered
    }

    /// Re-probe due proxies, then evict the dead ones.
    pub async fn sweep(&self, cancel: &CancellationToken) -> SweepReport {
        let now = Instant::now();
        let due = self.pool.addresses_where(|record| Self::is_due(record, now));
        info!("Starting health check for {} of {} proxies", due.len(), self.pool.len());

        let report = if due.is_empty() {
            Default::default()
        } else {
            self.engine
                .run(due, &ProbePass::health_check(self.budget), cancel)
                .await
        };
        let evicted = self.pool.evict_dead();

        let (total, healthy) = self.pool.get_stats();
        info!(
            "Health check completed: {}/{} healthy proxies, {} evicted",
            healthy, total, evicted
        );
        SweepReport {
            checked: report.started,
            working: report.working.len(),
            evicted,
        }
    }
}

/// Runs [`HealthChecker::sweep`] on a fixed period until stopped.
///
/// Dropping the scheduler cancels it.
pub struct HealthScheduler {
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl HealthScheduler {
    /// Spawn the scheduler. Must be called within a Tokio runtime.
    pub fn start(checker: Arc<HealthChecker>, interval: Duration) -> Self {
        let cancel = CancellationToken::new();
        let token = cancel.clone();

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = time::sleep(interval) => {}
                }

                // Each tick runs in its own task so a panic only loses that tick.
                let checker = Arc::clone(&checker);
                let tick_cancel = token.child_token();
                let tick = tokio::spawn(async move { checker.sweep(&tick_cancel).await });
                if let Err(e) = tick.await {
                    error!("Health check tick failed: {}", e);
                }
            }
            info!("Health scheduler stopped");
        });

        Self {
            cancel,
            handle: Some(handle),
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Stop the scheduler and wait for its task to finish.
    pub async fn stop(mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                error!("Health scheduler task failed: {}", e);
            }
        }
    }
}

impl Drop for HealthScheduler {
    fn drop(&mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

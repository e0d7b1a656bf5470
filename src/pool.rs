//! Thread-safe store of every known proxy.

use crate::proxy::{ProxyRecord, ProxyType};
use crate::selector;

use dashmap::DashMap;
use governor::clock::DefaultClock;
use governor::middleware::NoOpMiddleware;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use log::{info, warn};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Number of proxies listed in a statistics snapshot.
pub const STATS_TOP_PROXIES: usize = 10;

/// Rate limiter to control requests per second through one proxy.
pub type ProxyLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock, NoOpMiddleware>;

/// A pool of proxies keyed by their (case-insensitive) address.
///
/// Every mutation goes through a per-key entry, so a probe and a live fetch
/// racing on the same address never lose each other's update.
#[derive(Default)]
pub struct ProxyPool {
    records: DashMap<String, ProxyRecord>,
    limiters: DashMap<String, Arc<ProxyLimiter>>,
}

/// Point-in-time summary of one proxy.
#[derive(Debug, Clone, PartialEq)]
pub struct ProxySummary {
    pub address: String,
    pub proxy_type: ProxyType,
    pub success_count: u32,
    pub failure_count: u32,
    pub reliability_score: f64,
    pub average_response_time: Duration,
}

impl From<&ProxyRecord> for ProxySummary {
    fn from(record: &ProxyRecord) -> Self {
        Self {
            address: record.address.clone(),
            proxy_type: record.proxy_type,
            success_count: record.success_count,
            failure_count: record.failure_count,
            reliability_score: record.reliability_score,
            average_response_time: record.average_response_time(),
        }
    }
}

/// Statistics about the pool.
#[derive(Debug, Clone, PartialEq)]
pub struct PoolStats {
    pub total_proxies: usize,
    pub healthy_proxies: usize,
    pub initialized: bool,
    pub top_proxies: Vec<ProxySummary>,
}

impl ProxyPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn contains(&self, address: &str) -> bool {
        self.records.contains_key(&ProxyRecord::key_for(address))
    }

    /// Copy of the record stored for an address.
    pub fn get(&self, address: &str) -> Option<ProxyRecord> {
        self.records.get(&ProxyRecord::key_for(address)).map(|r| r.clone())
    }

    /// Insert a record, replacing any record stored under the same address.
    pub fn insert(&self, record: ProxyRecord) {
        self.records.insert(record.key(), record);
    }

    /// Update the record for `address` in place, inserting a freshly parsed
    /// one first if the address is unknown. Atomic per address.
    pub fn upsert_with<F>(&self, address: &str, update: F) -> ProxyRecord
    where
        F: FnOnce(&mut ProxyRecord),
    {
        let mut entry = self
            .records
            .entry(ProxyRecord::key_for(address))
            .or_insert_with(|| ProxyRecord::parse(address.trim()));
        update(entry.value_mut());
        entry.value().clone()
    }

    /// Report a successful exchange through a proxy.
    pub fn report_success(&self, address: &str, response_time: Option<Duration>) -> ProxyRecord {
        self.upsert_with(address, |record| {
            let was_healthy = record.is_healthy();
            record.record_success(response_time);
            if !was_healthy && record.is_healthy() {
                info!("Proxy {} recovered (score {:.2})", record.address, record.reliability_score);
            }
        })
    }

    /// Report a failed exchange through a proxy.
    pub fn report_failure(&self, address: &str) -> ProxyRecord {
        self.upsert_with(address, |record| {
            let was_healthy = record.is_healthy();
            record.record_failure();
            if was_healthy && !record.is_healthy() {
                warn!(
                    "Proxy {} marked unhealthy: {} failures, {} successes",
                    record.address, record.failure_count, record.success_count
                );
            }
        })
    }

    /// Rate limiter for an address, created on first use. Dropped when the
    /// proxy is evicted.
    pub fn rate_limiter(&self, address: &str, max_rps: f64) -> Arc<ProxyLimiter> {
        self.limiters
            .entry(ProxyRecord::key_for(address))
            .or_insert_with(|| {
                let burst = NonZeroU32::new(max_rps.ceil() as u32).unwrap_or(NonZeroU32::MIN);
                Arc::new(RateLimiter::direct(Quota::per_second(burst)))
            })
            .clone()
    }

    /// Whether the address is known and currently unhealthy.
    pub fn is_known_unhealthy(&self, address: &str) -> bool {
        self.records
            .get(&ProxyRecord::key_for(address))
            .is_some_and(|r| !r.is_healthy())
    }

    /// Copy of every record. No lock is held once this returns.
    pub fn snapshot(&self) -> Vec<ProxyRecord> {
        self.records.iter().map(|r| r.value().clone()).collect()
    }

    /// Addresses matching a predicate.
    pub fn addresses_where<F>(&self, predicate: F) -> Vec<String>
    where
        F: Fn(&ProxyRecord) -> bool,
    {
        self.records
            .iter()
            .filter(|r| predicate(r.value()))
            .map(|r| r.address.clone())
            .collect()
    }

    /// Get statistics about the pool as (total, healthy).
    pub fn get_stats(&self) -> (usize, usize) {
        let total = self.records.len();
        let healthy = self.records.iter().filter(|r| r.is_healthy()).count();
        (total, healthy)
    }

    /// Detailed statistics, including the best proxies.
    pub fn stats(&self, initialized: bool) -> PoolStats {
        let (total_proxies, healthy_proxies) = self.get_stats();
        let top_proxies = selector::top_healthy(self, STATS_TOP_PROXIES)
            .iter()
            .map(ProxySummary::from)
            .collect();
        PoolStats {
            total_proxies,
            healthy_proxies,
            initialized,
            top_proxies,
        }
    }

    /// Remove proxies that have been dead for good. Returns how many left.
    pub fn evict_dead(&self) -> usize {
        let now = Instant::now();
        let mut evicted = Vec::new();
        self.records.retain(|key, record| {
            let evict = record.is_evictable(now);
            if evict {
                info!(
                    "Evicting proxy {}: {} failures, score {:.2}",
                    record.address, record.failure_count, record.reliability_score
                );
                evicted.push(key.clone());
            }
            !evict
        });
        for key in &evicted {
            self.limiters.remove(key);
        }
        evicted.len()
    }
}

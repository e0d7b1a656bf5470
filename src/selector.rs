//! Ranking of healthy proxies.

use crate::pool::ProxyPool;
use crate::proxy::ProxyRecord;

use std::cmp::Ordering;

/// Number of proxies tried, in order, before discovering new ones.
pub const ROUTING_CANDIDATES: usize = 5;

/// Best first: higher reliability, then lower average response time.
pub fn rank(a: &ProxyRecord, b: &ProxyRecord) -> Ordering {
    b.reliability_score
        .partial_cmp(&a.reliability_score)
        .unwrap_or(Ordering::Equal)
        .then_with(|| a.average_response_time().cmp(&b.average_response_time()))
}

/// The `k` best healthy proxies, ranked.
pub fn top_healthy(pool: &ProxyPool, k: usize) -> Vec<ProxyRecord> {
    let mut healthy: Vec<ProxyRecord> = pool
        .snapshot()
        .into_iter()
        .filter(ProxyRecord::is_healthy)
        .collect();
    healthy.sort_by(rank);
    healthy.truncate(k);
    healthy
}

/// The best of the given records, if any.
pub fn best<'a, I>(records: I) -> Option<ProxyRecord>
where
    I: IntoIterator<Item = &'a ProxyRecord>,
{
    records.into_iter().min_by(|a, b| rank(a, b)).cloned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn record(address: &str, score: f64, response_ms: Option<u64>) -> ProxyRecord {
        let mut record = ProxyRecord::parse(address);
        if let Some(ms) = response_ms {
            record.record_success(Some(Duration::from_millis(ms)));
        }
        record.reliability_score = score;
        record
    }

    #[test]
    fn test_ranks_by_score_then_latency() {
        let pool = ProxyPool::new();
        pool.insert(record("10.0.0.1:80", 0.6, Some(900)));
        pool.insert(record("10.0.0.2:80", 0.9, Some(800)));
        pool.insert(record("10.0.0.3:80", 0.6, Some(100)));
        pool.insert(record("10.0.0.4:80", 0.2, Some(10)));

        let ranked: Vec<String> = top_healthy(&pool, ROUTING_CANDIDATES)
            .into_iter()
            .map(|r| r.address)
            .collect();
        assert_eq!(ranked, vec!["10.0.0.2:80", "10.0.0.3:80", "10.0.0.1:80"]);
    }

    #[test]
    fn test_truncates_to_k() {
        let pool = ProxyPool::new();
        for i in 0..20 {
            pool.insert(record(&format!("10.0.1.{i}:80"), 0.5, None));
        }
        assert_eq!(top_healthy(&pool, ROUTING_CANDIDATES).len(), 5);
        assert_eq!(top_healthy(&pool, 10).len(), 10);
    }

    #[test]
    fn test_best_of_empty() {
        assert!(best(Vec::<ProxyRecord>::new().iter()).is_none());
    }
}

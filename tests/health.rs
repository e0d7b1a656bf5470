mod common;

use common::{init_logger, MockTransport};
use proxy_relay_pool::{
    CancellationToken, HealthChecker, HealthScheduler, ProbeEngine, ProxyPool, ProxyPoolConfig,
    ProxyRecord,
};
use std::sync::Arc;
use std::time::{Duration, Instant};

fn checker(transport: Arc<MockTransport>) -> (Arc<ProxyPool>, Arc<HealthChecker>) {
    let config = ProxyPoolConfig::builder()
        .sources(vec!["http://lists.test/proxies.txt"])
        .test_urls(vec!["http://probe.test/"])
        .build();
    let pool = Arc::new(ProxyPool::new());
    let engine = Arc::new(ProbeEngine::new(Arc::clone(&pool), transport, &config));
    let checker = Arc::new(HealthChecker::new(Arc::clone(&pool), engine, Duration::from_secs(300)));
    (pool, checker)
}

fn dead_record(address: &str, last_success_ago: Duration) -> ProxyRecord {
    let mut record = ProxyRecord::parse(address);
    record.failure_count = 11;
    record.reliability_score = 0.05;
    record.last_success_at = Instant::now().checked_sub(last_success_ago);
    record
}

#[tokio::test]
async fn test_sweep_evicts_long_dead_proxies() {
    init_logger();
    let transport = Arc::new(MockTransport::new());
    let (pool, checker) = checker(transport);
    pool.insert(dead_record("192.0.2.1:8080", Duration::from_secs(2 * 60 * 60)));
    pool.insert(dead_record("192.0.2.2:8080", Duration::from_secs(30 * 60)));

    let report = checker.sweep(&CancellationToken::new()).await;

    assert_eq!(report.evicted, 1);
    assert!(!pool.contains("192.0.2.1:8080"));
    assert!(pool.contains("192.0.2.2:8080"));
}

#[tokio::test]
async fn test_sweep_recovers_failing_proxy() {
    let transport = Arc::new(MockTransport::new().with_working_proxy("192.0.2.3:3128"));
    let (pool, checker) = checker(transport.clone());
    pool.report_failure("192.0.2.3:3128");
    pool.report_success("192.0.2.4:3128", None);
    assert!(!pool.get("192.0.2.3:3128").unwrap().is_healthy());

    let report = checker.sweep(&CancellationToken::new()).await;

    assert_eq!(report.checked, 1);
    assert_eq!(report.working, 1);
    assert!(pool.get("192.0.2.3:3128").unwrap().is_healthy());
    // Fresh healthy proxies are left alone.
    assert_eq!(transport.calls_through("192.0.2.4:3128"), 0);
}

#[tokio::test(start_paused = true)]
async fn test_scheduler_ticks_until_stopped() {
    let transport = Arc::new(MockTransport::new().with_working_proxy("192.0.2.5:3128"));
    let (pool, checker) = checker(transport.clone());
    pool.report_failure("192.0.2.5:3128");

    let scheduler = HealthScheduler::start(checker, Duration::from_secs(5 * 60));
    assert!(scheduler.is_running());

    tokio::time::sleep(Duration::from_secs(4 * 60)).await;
    assert_eq!(transport.calls_through("192.0.2.5:3128"), 0);

    tokio::time::sleep(Duration::from_secs(2 * 60)).await;
    assert_eq!(transport.calls_through("192.0.2.5:3128"), 1);
    assert!(pool.get("192.0.2.5:3128").unwrap().is_healthy());

    scheduler.stop().await;
    tokio::time::sleep(Duration::from_secs(60 * 60)).await;
    assert_eq!(transport.calls_through("192.0.2.5:3128"), 1);
}

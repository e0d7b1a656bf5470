//! Simple example of using proxy-relay-pool.

use proxy_relay_pool::{CancellationToken, ProxyFetcher, ProxyPoolConfig};
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let config = ProxyPoolConfig::builder()
        // free proxy lists, one `host:port` per line
        .sources(vec![
            "https://cdn.jsdelivr.net/gh/dpangestuw/Free-Proxy@main/socks5_proxies.txt",
            "https://cdn.jsdelivr.net/gh/proxifly/free-proxy-list@main/proxies/protocols/http/data.txt",
        ])
        .test_timeout(Duration::from_secs(5))
        .max_parallel_tests(100)
        .max_retries(2)
        // rate limit for each proxy, lower performance but avoid banned
        .max_requests_per_second(3.0)
        .build();

    let fetcher = ProxyFetcher::new(config)?;
    let cancel = CancellationToken::new();

    println!("Sending request...");
    let body = fetcher.fetch("https://httpbin.org/ip", &cancel).await?;
    if body.is_empty() {
        println!("Every proxy failed");
    } else {
        println!("Response: {}", body);
    }

    let stats = fetcher.stats();
    println!("Pool: {}/{} healthy", stats.healthy_proxies, stats.total_proxies);
    for proxy in &stats.top_proxies {
        println!(
            "  {} {} score={:.2} ok={} failed={} avg={:?}",
            proxy.proxy_type,
            proxy.address,
            proxy.reliability_score,
            proxy.success_count,
            proxy.failure_count,
            proxy.average_response_time
        );
    }

    fetcher.shutdown().await;
    Ok(())
}

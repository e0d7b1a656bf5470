//! Discovery of candidate proxies from remote lists.

use crate::proxy::ProxyRecord;
use crate::transport::HttpTransport;

use futures::future;
use log::{info, warn};
use std::collections::HashSet;
use std::time::Duration;
use tokio::time;

/// Fetch every source in parallel and merge their candidates.
///
/// A failing source contributes nothing. The result is deduplicated
/// case-insensitively; its order is unspecified.
pub async fn discover(
    transport: &dyn HttpTransport,
    sources: &[String],
    timeout: Duration,
) -> Vec<String> {
    info!("Discovering proxies from {} sources", sources.len());

    let fetches = sources.iter().map(|source| async move {
        match time::timeout(timeout, transport.get(source, None, timeout)).await {
            Ok(Ok(response)) if response.is_success() => {
                let candidates = parse_proxy_list(&response.body);
                info!("Fetched {} proxies from {}", candidates.len(), source);
                candidates
            }
            Ok(Ok(response)) => {
                warn!("Failed to fetch proxies from {}: HTTP {}", source, response.status);
                Vec::new()
            }
            Ok(Err(e)) => {
                warn!("Failed to fetch proxies from {}: {}", source, e);
                Vec::new()
            }
            Err(_) => {
                warn!("Timed out fetching proxies from {}", source);
                Vec::new()
            }
        }
    });
    let lists = future::join_all(fetches).await;

    let candidates = dedup(lists.into_iter().flatten());
    info!("Found {} unique proxies", candidates.len());
    candidates
}

/// Split a plain-text list into candidate addresses.
pub fn parse_proxy_list(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && line.contains(':'))
        .map(str::to_string)
        .collect()
}

/// Drop case-insensitive duplicates, keeping the first spelling.
pub fn dedup<I>(candidates: I) -> Vec<String>
where
    I: IntoIterator<Item = String>,
{
    let mut seen = HashSet::new();
    candidates
        .into_iter()
        .filter(|candidate| seen.insert(ProxyRecord::key_for(candidate)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_proxy_list() {
        let content = "  203.0.113.5:8080 \n\nnot-a-proxy\r\nsocks5://203.0.113.6:1080\n   \n";
        assert_eq!(
            parse_proxy_list(content),
            vec!["203.0.113.5:8080", "socks5://203.0.113.6:1080"]
        );
    }

    #[test]
    fn test_dedup_ignores_case() {
        let merged = dedup(vec![
            "Proxy.Example:80".to_string(),
            "proxy.example:80".to_string(),
            "10.0.0.1:80".to_string(),
        ]);
        assert_eq!(merged, vec!["Proxy.Example:80", "10.0.0.1:80"]);
    }
}

//! Middleware implementation for reqwest.

use crate::config::ProxyPoolConfig;
use crate::error::NoProxyAvailable;
use crate::fetcher::ProxyFetcher;

use anyhow::anyhow;
use async_trait::async_trait;
use log::{info, warn};
use reqwest_middleware::{Error, Middleware, Next, Result};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Middleware that serves GET requests through a pool of proxies.
///
/// The pooled body is returned as a bare `200 OK` response; other methods are
/// passed on to the next handler untouched.
///
/// Only the URL of a GET request is used: headers set by the caller are not
/// forwarded upstream, and the upstream status and headers are not carried
/// back. Callers that need either should build their own client around
/// [`ProxyFetcher`] routes instead.
#[derive(Clone)]
pub struct ProxyPoolMiddleware {
    /// The proxy fetcher.
    fetcher: Arc<ProxyFetcher>,
}

impl ProxyPoolMiddleware {
    /// Create a new proxy pool middleware with the given configuration.
    /// This will synchronously discover proxies and check their health.
    pub async fn new(config: ProxyPoolConfig) -> Result<Self> {
        let fetcher = ProxyFetcher::new(config).map_err(|e| Error::Middleware(anyhow!(e)))?;
        let stats = fetcher
            .warm_up(&CancellationToken::new())
            .await
            .map_err(|e| Error::Middleware(anyhow!(e)))?;

        if stats.healthy_proxies == 0 {
            warn!("No healthy proxies available in pool");
        }
        Ok(Self::from_fetcher(Arc::new(fetcher)))
    }

    /// Wrap an existing fetcher.
    pub fn from_fetcher(fetcher: Arc<ProxyFetcher>) -> Self {
        Self { fetcher }
    }

    pub fn fetcher(&self) -> &Arc<ProxyFetcher> {
        &self.fetcher
    }
}

#[async_trait]
impl Middleware for ProxyPoolMiddleware {
    async fn handle(
        &self,
        req: reqwest::Request,
        extensions: &mut http::Extensions,
        next: Next<'_>,
    ) -> Result<reqwest::Response> {
        if req.method() != reqwest::Method::GET {
            return next.run(req, extensions).await;
        }

        let url = req.url().to_string();
        match self.fetcher.try_fetch(&url, &CancellationToken::new()).await {
            Ok(Some(body)) => {
                info!("Served {} through the proxy pool", url);
                let response = http::Response::builder()
                    .status(http::StatusCode::OK)
                    .body(body)
                    .map_err(|e| Error::Middleware(anyhow!(e)))?;
                Ok(reqwest::Response::from(response))
            }
            Ok(None) => {
                let (total, healthy) = self.fetcher.pool().get_stats();
                warn!("No proxy available. Total: {}, Healthy: {}", total, healthy);
                Err(Error::Middleware(anyhow!(NoProxyAvailable)))
            }
            Err(e) => Err(Error::Middleware(anyhow!(e))),
        }
    }
}

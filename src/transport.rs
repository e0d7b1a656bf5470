//! HTTP transport used for discovery, probes and fetches.

use crate::error::TransportError;
use crate::proxy::ProxyRecord;

use async_trait::async_trait;
use reqwest::{redirect, Client};
use std::time::Duration;

/// Maximum number of redirects followed per request.
pub const MAX_REDIRECTS: usize = 10;

/// A completed HTTP exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Issues GET requests, either directly or through a proxy.
///
/// Callers bound every call with their own timeout as well; `timeout` lets the
/// implementation give up on its own when it can.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn get(
        &self,
        url: &str,
        route: Option<&ProxyRecord>,
        timeout: Duration,
    ) -> Result<HttpResponse, TransportError>;
}

/// [`HttpTransport`] backed by reqwest.
pub struct ReqwestTransport {
    user_agent: String,
    direct: Client,
}

impl ReqwestTransport {
    pub fn new(user_agent: impl Into<String>) -> Result<Self, TransportError> {
        let user_agent = user_agent.into();
        let direct = Self::client_builder(&user_agent).build()?;
        Ok(Self { user_agent, direct })
    }

    fn client_builder(user_agent: &str) -> reqwest::ClientBuilder {
        Client::builder()
            .user_agent(user_agent)
            .redirect(redirect::Policy::limited(MAX_REDIRECTS))
            .cookie_store(true)
            .gzip(true)
            .brotli(true)
            .deflate(true)
    }

    /// Create a client routed through the given proxy.
    fn proxied_client(&self, record: &ProxyRecord) -> Result<Client, TransportError> {
        let proxy_url = record.proxy_url();
        let mut proxy = reqwest::Proxy::all(&proxy_url)
            .map_err(|e| TransportError::InvalidProxy(format!("{proxy_url}: {e}")))?;
        if let (Some(username), Some(password)) = (&record.username, &record.password) {
            proxy = proxy.basic_auth(username, password);
        }

        let client = Self::client_builder(&self.user_agent)
            .proxy(proxy)
            .pool_max_idle_per_host(0)
            .build()?;
        Ok(client)
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn get(
        &self,
        url: &str,
        route: Option<&ProxyRecord>,
        timeout: Duration,
    ) -> Result<HttpResponse, TransportError> {
        let client = match route {
            Some(record) => self.proxied_client(record)?,
            None => self.direct.clone(),
        };

        let response = client.get(url).timeout(timeout).send().await.map_err(|e| {
            if e.is_timeout() {
                TransportError::Timeout
            } else if e.is_connect() {
                TransportError::Unreachable(e.to_string())
            } else {
                TransportError::Request(e)
            }
        })?;
        let status = response.status().as_u16();
        let body = response.text().await?;
        Ok(HttpResponse { status, body })
    }
}

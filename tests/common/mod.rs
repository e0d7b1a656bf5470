#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use proxy_relay_pool::{HttpResponse, HttpTransport, ProxyRecord, TransportError};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::time::Instant;

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// A request seen by the mock.
#[derive(Debug, Clone)]
pub struct Call {
    pub url: String,
    /// `host:port` of the proxy, `None` for direct requests.
    pub proxy: Option<String>,
    pub at: Instant,
}

/// In-memory network: known list sources, proxies that answer every request,
/// and optionally a reachable direct route.
#[derive(Default)]
pub struct MockTransport {
    sources: HashMap<String, String>,
    working: HashSet<String>,
    body: String,
    proxy_bodies: HashMap<String, String>,
    direct_body: Option<String>,
    delay: Duration,
    delays: HashMap<String, Duration>,
    calls: Mutex<Vec<Call>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            body: "proxied body".to_string(),
            ..Default::default()
        }
    }

    pub fn with_source(mut self, url: &str, body: &str) -> Self {
        self.sources.insert(url.to_string(), body.to_string());
        self
    }

    pub fn with_working_proxy(mut self, host_port: &str) -> Self {
        self.working.insert(host_port.to_string());
        self
    }

    pub fn with_body(mut self, body: &str) -> Self {
        self.body = body.to_string();
        self
    }

    /// Body served by one working proxy instead of the shared body.
    pub fn with_proxy_body(mut self, host_port: &str, body: &str) -> Self {
        self.working.insert(host_port.to_string());
        self.proxy_bodies.insert(host_port.to_string(), body.to_string());
        self
    }

    pub fn with_direct(mut self, body: &str) -> Self {
        self.direct_body = Some(body.to_string());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Delay for requests through a proxy (`host:port`) or to a URL.
    /// Takes precedence over `with_delay`.
    pub fn with_delay_for(mut self, key: &str, delay: Duration) -> Self {
        self.delays.insert(key.to_string(), delay);
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn direct_calls_to(&self, url: &str) -> usize {
        self.calls().iter().filter(|c| c.proxy.is_none() && c.url == url).count()
    }

    pub fn proxied_calls_to(&self, url: &str) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|c| c.proxy.is_some() && c.url == url)
            .collect()
    }

    pub fn calls_through(&self, host_port: &str) -> usize {
        self.calls()
            .iter()
            .filter(|c| c.proxy.as_deref() == Some(host_port))
            .count()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HttpTransport for MockTransport {
    async fn get(
        &self,
        url: &str,
        route: Option<&ProxyRecord>,
        _timeout: Duration,
    ) -> Result<HttpResponse, TransportError> {
        let proxy = route.map(|r| format!("{}:{}", r.host, r.port));
        self.calls.lock().push(Call {
            url: url.to_string(),
            proxy: proxy.clone(),
            at: Instant::now(),
        });

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let _guard = InFlight(&self.in_flight);
        let delay = proxy
            .as_ref()
            .and_then(|p| self.delays.get(p))
            .or_else(|| self.delays.get(url))
            .copied()
            .unwrap_or(self.delay);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        match proxy {
            None => match self.sources.get(url).or(self.direct_body.as_ref()) {
                Some(body) => Ok(HttpResponse {
                    status: 200,
                    body: body.clone(),
                }),
                None => Err(TransportError::Unreachable(url.to_string())),
            },
            Some(host_port) if self.working.contains(&host_port) => Ok(HttpResponse {
                status: 200,
                body: self
                    .proxy_bodies
                    .get(&host_port)
                    .unwrap_or(&self.body)
                    .clone(),
            }),
            Some(host_port) => Err(TransportError::Unreachable(host_port)),
        }
    }
}

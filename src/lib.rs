//! # proxy-relay-pool
//!
//! A self-healing pool of public proxies for reqwest.
//!
//! Candidates are discovered from plain-text proxy lists, validated concurrently
//! and scored by a reliability model. Fetches go through the best known proxies
//! with retries and backoff, discover new ones on demand and can optionally fall
//! back to a direct request. A background task re-validates the pool and evicts
//! proxies that stay dead.

pub mod config;
pub mod discovery;
pub mod error;
pub mod fetcher;
pub mod health;
pub mod middleware;
pub mod pool;
pub mod probe;
pub mod proxy;
pub mod selector;
pub mod transport;

pub use config::{ProxyPoolConfig, ProxyPoolConfigBuilder};
pub use error::{NoProxyAvailable, ProxyPoolError, TransportError};
pub use fetcher::ProxyFetcher;
pub use health::{HealthChecker, HealthScheduler, SweepReport};
pub use middleware::ProxyPoolMiddleware;
pub use pool::{PoolStats, ProxyPool, ProxySummary};
pub use probe::{ProbeEngine, ProbePass, ProbeReport};
pub use proxy::{ProxyRecord, ProxyType};
pub use transport::{HttpResponse, HttpTransport, ReqwestTransport};
pub use tokio_util::sync::CancellationToken;

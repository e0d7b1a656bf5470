//! Error types for the proxy-relay-pool crate.

use thiserror::Error;

/// Error returned when no healthy proxy is available in the pool.
#[derive(Debug, Error)]
#[error("No proxy available in pool")]
pub struct NoProxyAvailable;

/// Errors surfaced to callers of the pool.
///
/// Everything else that can go wrong while fetching (dead proxies, timeouts,
/// failed discovery sources) is absorbed into the reliability model.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProxyPoolError {
    #[error("target url must not be empty")]
    EmptyUrl,
    #[error("invalid target url: {0}")]
    InvalidUrl(String),
    #[error("at least one proxy list source is required")]
    NoSources,
    #[error("operation cancelled")]
    Cancelled,
    #[error("failed to build http client: {0}")]
    Client(String),
}

/// Failure of a single HTTP exchange.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,
    #[error("invalid proxy {0}")]
    InvalidProxy(String),
    #[error("unreachable: {0}")]
    Unreachable(String),
    #[error(transparent)]
    Request(#[from] reqwest::Error),
}

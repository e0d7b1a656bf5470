//! Proxy record, address parsing and the reliability model.

use std::collections::VecDeque;
use std::fmt;
use std::time::{Duration, Instant};

/// Score assigned to a freshly parsed proxy.
pub const INITIAL_SCORE: f64 = 0.5;
/// Score gained on every success.
pub const SUCCESS_REWARD: f64 = 0.1;
/// Score lost on every failure.
pub const FAILURE_PENALTY: f64 = 0.2;
/// A proxy with this many failures (or more) is unhealthy.
pub const UNHEALTHY_FAILURES: u32 = 3;
/// A proxy must score strictly above this to be healthy.
pub const HEALTHY_SCORE_FLOOR: f64 = 0.3;
/// Number of successful response times kept for the rolling mean.
pub const RESPONSE_WINDOW: usize = 10;
/// Average response time reported before any sample is recorded.
pub const INITIAL_RESPONSE_TIME: Duration = Duration::from_secs(1);
/// Port used when an address carries none (or an unparsable one).
pub const DEFAULT_PORT: u16 = 80;

/// Eviction: more failures than this...
pub const EVICT_MIN_FAILURES: u32 = 10;
/// ...a score below this...
pub const EVICT_MAX_SCORE: f64 = 0.1;
/// ...and no success for longer than this.
pub const EVICT_SILENCE: Duration = Duration::from_secs(60 * 60);

/// Protocol spoken by a proxy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ProxyType {
    #[default]
    Http,
    Https,
    Socks4,
    Socks5,
}

impl ProxyType {
    /// Infer the protocol from an address string. First match wins.
    pub fn infer(address: &str) -> Self {
        let lower = address.to_ascii_lowercase();
        if lower.contains("socks5") {
            ProxyType::Socks5
        } else if lower.contains("socks4") {
            ProxyType::Socks4
        } else if lower.contains("https") {
            ProxyType::Https
        } else {
            ProxyType::Http
        }
    }

    /// URL scheme understood by reqwest for this protocol.
    pub fn scheme(&self) -> &'static str {
        match self {
            ProxyType::Http => "http",
            ProxyType::Https => "https",
            ProxyType::Socks4 => "socks4",
            ProxyType::Socks5 => "socks5",
        }
    }
}

impl fmt::Display for ProxyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProxyType::Http => "HTTP",
            ProxyType::Https => "HTTPS",
            ProxyType::Socks4 => "SOCKS4",
            ProxyType::Socks5 => "SOCKS5",
        };
        f.write_str(name)
    }
}

/// Health and identity of a single candidate proxy.
#[derive(Debug, Clone)]
pub struct ProxyRecord {
    /// The raw address as discovered (e.g. "user:pass@1.2.3.4:1080").
    pub address: String,
    pub host: String,
    pub port: u16,
    pub proxy_type: ProxyType,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Reliability in [0, 1].
    pub reliability_score: f64,
    pub success_count: u32,
    pub failure_count: u32,
    /// Time when this proxy was last checked or used.
    pub last_checked_at: Instant,
    /// Time of the last success, if it ever succeeded.
    pub last_success_at: Option<Instant>,
    response_times: VecDeque<Duration>,
    average_response_time: Duration,
}

impl ProxyRecord {
    /// Parse an address into a fresh record.
    ///
    /// Never fails: anything unparsable degrades to a record whose host is the
    /// whole input, on port 80, speaking HTTP.
    pub fn parse(address: &str) -> Self {
        let mut record = Self::blank(address);
        record.proxy_type = ProxyType::infer(address);

        let rest = match address.find("://") {
            Some(idx) => &address[idx + 3..],
            None => address,
        };

        let hostport = match rest.split_once('@') {
            Some((credentials, hostport)) => {
                let parts: Vec<&str> = credentials.split(':').collect();
                if let [user, pass] = parts[..] {
                    record.username = Some(user.to_string());
                    record.password = Some(pass.to_string());
                }
                hostport
            }
            None => rest,
        };

        let mut segments = hostport.split(':');
        match segments.next() {
            Some(host) if !host.is_empty() => record.host = host.to_string(),
            _ => return Self::blank(address),
        }
        record.port = segments
            .next()
            .and_then(|port| port.trim().parse().ok())
            .unwrap_or(DEFAULT_PORT);

        record
    }

    fn blank(address: &str) -> Self {
        Self {
            address: address.to_string(),
            host: address.to_string(),
            port: DEFAULT_PORT,
            proxy_type: ProxyType::Http,
            username: None,
            password: None,
            reliability_score: INITIAL_SCORE,
            success_count: 0,
            failure_count: 0,
            last_checked_at: Instant::now(),
            last_success_at: None,
            response_times: VecDeque::with_capacity(RESPONSE_WINDOW),
            average_response_time: INITIAL_RESPONSE_TIME,
        }
    }

    /// Case-insensitive pool key for an address.
    pub fn key_for(address: &str) -> String {
        address.trim().to_ascii_lowercase()
    }

    /// Pool key of this record.
    pub fn key(&self) -> String {
        Self::key_for(&self.address)
    }

    /// Proxy URL without credentials, e.g. "socks5://1.2.3.4:1080".
    pub fn proxy_url(&self) -> String {
        format!("{}://{}:{}", self.proxy_type.scheme(), self.host, self.port)
    }

    /// Whether the proxy may be used for routing.
    pub fn is_healthy(&self) -> bool {
        self.failure_count < UNHEALTHY_FAILURES && self.reliability_score > HEALTHY_SCORE_FLOOR
    }

    /// Rolling mean of the most recent successful response times.
    pub fn average_response_time(&self) -> Duration {
        self.average_response_time
    }

    /// Number of samples currently in the rolling window.
    pub fn response_samples(&self) -> usize {
        self.response_times.len()
    }

    pub fn record_success(&mut self, response_time: Option<Duration>) {
        let now = Instant::now();
        self.success_count = self.success_count.saturating_add(1);
        self.failure_count = self.failure_count.saturating_sub(1);
        self.reliability_score = adjust(self.reliability_score, SUCCESS_REWARD);
        self.last_checked_at = now;
        self.last_success_at = Some(now);

        if let Some(elapsed) = response_time {
            if self.response_times.len() == RESPONSE_WINDOW {
                self.response_times.pop_front();
            }
            self.response_times.push_back(elapsed);
            let total: Duration = self.response_times.iter().sum();
            self.average_response_time = total / self.response_times.len() as u32;
        }
    }

    pub fn record_failure(&mut self) {
        self.failure_count = self.failure_count.saturating_add(1);
        self.reliability_score = adjust(self.reliability_score, -FAILURE_PENALTY);
        self.last_checked_at = Instant::now();
    }

    /// Whether this record is dead for good and should leave the pool.
    pub fn is_evictable(&self, now: Instant) -> bool {
        let silent = match self.last_success_at {
            Some(at) => now.saturating_duration_since(at) > EVICT_SILENCE,
            None => true,
        };
        self.failure_count > EVICT_MIN_FAILURES
            && self.reliability_score < EVICT_MAX_SCORE
            && silent
    }
}

impl fmt::Display for ProxyRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.address, self.proxy_type)
    }
}

// Rounded so repeated steps land exactly on the thresholds (0.5 - 0.2 == 0.3).
fn adjust(score: f64, delta: f64) -> f64 {
    let next = ((score + delta) * 1e6).round() / 1e6;
    next.clamp(0.0, 1.0)
}

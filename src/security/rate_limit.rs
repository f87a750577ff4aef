//! Rate limiting implementation.

use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use axum::extract::{ConnectInfo, Request};
use dashmap::DashMap;
use futures_util::future::{self, FutureExt};

use crate::error::PipelineError;
use crate::pipeline::{Outcome, PipelineContext, RateLimitInfo, Stage, StageFuture};

/// Message sent with every 429.
pub const DEFAULT_RATE_LIMIT_MESSAGE: &str =
    "Too many requests from this IP, please try again later.";

/// Rate limiter configuration.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Maximum requests per window.
    pub max_requests: u32,
    /// Time window duration.
    pub window: Duration,
    /// Whether rate limiting is enabled.
    pub enabled: bool,
    /// Maximum number of tracked identities (memory limit).
    pub max_tracked: usize,
    /// Body of the 429 response.
    pub message: String,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 100,
            window: Duration::from_secs(15 * 60),
            enabled: true,
            max_tracked: 10000,
            message: DEFAULT_RATE_LIMIT_MESSAGE.to_string(),
        }
    }
}

impl RateLimitConfig {
    /// Create a disabled rate limiter config.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Default::default()
        }
    }

    /// Custom rate limit.
    pub fn custom(max_requests: u32, window_secs: u64) -> Self {
        Self {
            max_requests,
            window: Duration::from_secs(window_secs),
            ..Default::default()
        }
    }
}

/// Who a request is accounted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ClientIdentity {
    /// Peer (or forwarded) address.
    Addr(IpAddr),
    /// No address could be determined; all such requests share one bucket.
    #[default]
    Unknown,
}

impl ClientIdentity {
    /// Derive the identity of a request.
    ///
    /// With `trust_proxy` the left-most `X-Forwarded-For` entry wins;
    /// otherwise the socket peer address is used.
    pub fn from_request(request: &Request, trust_proxy: bool) -> Self {
        if trust_proxy {
            let forwarded = request
                .headers()
                .get("x-forwarded-for")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.split(',').next())
                .and_then(|first| first.trim().parse::<IpAddr>().ok());

            if let Some(ip) = forwarded {
                return Self::Addr(ip);
            }
        }

        request
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| Self::Addr(addr.ip()))
            .unwrap_or_default()
    }
}

impl fmt::Display for ClientIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Addr(ip) => write!(f, "{}", ip),
            Self::Unknown => f.write_str("unknown"),
        }
    }
}

/// Result of admitting one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Request counted; `remaining` more fit in the window.
    Allowed { remaining: u32 },
    /// Over budget until the window closes.
    Rejected { retry_after: Duration },
}

impl Admission {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed { .. })
    }
}

/// Counter for one identity.
#[derive(Debug, Clone, Copy)]
struct RateWindow {
    count: u32,
    started: Instant,
}

impl RateWindow {
    fn is_expired(&self, now: Instant, window: Duration) -> bool {
        now.saturating_duration_since(self.started) > window
    }
}

/// Thread-safe fixed-window rate limiter.
///
/// Windows live in a sharded map: an update locks only the shard holding
/// that identity, so unrelated clients never wait on each other.
#[derive(Debug)]
pub struct RateLimiter {
    windows: DashMap<ClientIdentity, RateWindow>,
    config: RateLimitConfig,
    last_cleanup: Mutex<Instant>,
}

impl RateLimiter {
    /// Create a new rate limiter.
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            windows: DashMap::new(),
            config,
            last_cleanup: Mutex::new(Instant::now()),
        }
    }

    /// Create a disabled rate limiter.
    pub fn disabled() -> Self {
        Self::new(RateLimitConfig::disabled())
    }

    /// Check if rate limiting is enabled.
    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Count a request from `identity` against its window.
    pub fn admit(&self, identity: ClientIdentity) -> Admission {
        self.admit_at(identity, Instant::now())
    }

    pub(crate) fn admit_at(&self, identity: ClientIdentity, now: Instant) -> Admission {
        if !self.config.enabled {
            return Admission::Allowed {
                remaining: self.config.max_requests,
            };
        }

        self.maybe_cleanup(now);

        let mut window = self.windows.entry(identity).or_insert(RateWindow {
            count: 0,
            started: now,
        });

        if window.is_expired(now, self.config.window) {
            window.count = 0;
            window.started = now;
        }

        if window.count >= self.config.max_requests {
            let elapsed = now.saturating_duration_since(window.started);
            return Admission::Rejected {
                retry_after: self.config.window.saturating_sub(elapsed),
            };
        }

        window.count += 1;
        Admission::Allowed {
            remaining: self.config.max_requests - window.count,
        }
    }

    /// Perform cleanup of old windows if needed.
    fn maybe_cleanup(&self, now: Instant) {
        let due = match self.last_cleanup.try_lock() {
            Ok(mut last) if now.saturating_duration_since(*last) > self.config.window * 2 => {
                *last = now;
                true
            }
            _ => false,
        };

        if !due {
            return;
        }

        let window = self.config.window;
        self.windows.retain(|_, w| !w.is_expired(now, window));

        // If still too many, drop the oldest windows
        if self.windows.len() > self.config.max_tracked {
            let mut entries: Vec<_> = self
                .windows
                .iter()
                .map(|entry| (*entry.key(), entry.started))
                .collect();
            entries.sort_by_key(|(_, started)| *started);

            let to_remove = entries.len() - self.config.max_tracked;
            for (identity, _) in entries.into_iter().take(to_remove) {
                self.windows.remove(&identity);
            }
        }
    }

    /// Get current stats.
    pub fn stats(&self) -> RateLimitStats {
        RateLimitStats {
            tracked: self.windows.len(),
            max_requests: self.config.max_requests,
            window_secs: self.config.window.as_secs(),
            enabled: self.config.enabled,
        }
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(RateLimitConfig::default())
    }
}

/// Rate limit statistics.
#[derive(Debug, Clone)]
pub struct RateLimitStats {
    pub tracked: usize,
    pub max_requests: u32,
    pub window_secs: u64,
    pub enabled: bool,
}

impl Stage for RateLimiter {
    fn name(&self) -> &'static str {
        "rate_limit"
    }

    fn handle<'a>(
        &'a self,
        _request: &'a mut Request,
        ctx: &'a mut PipelineContext,
    ) -> StageFuture<'a> {
        let outcome = match self.admit(ctx.identity) {
            Admission::Allowed { remaining } => {
                if self.config.enabled {
                    ctx.rate_limit = Some(RateLimitInfo {
                        limit: self.config.max_requests,
                        remaining,
                    });
                }
                Outcome::Continue
            }
            Admission::Rejected { retry_after } => {
                ctx.rate_limit = Some(RateLimitInfo {
                    limit: self.config.max_requests,
                    remaining: 0,
                });
                Outcome::Fail(
                    PipelineError::rate_limited(self.config.message.clone(), retry_after)
                        .with_detail(format!("limit of {} reached", self.config.max_requests)),
                )
            }
        };
        future::ready(outcome).boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, Ipv6Addr};

    fn ip(a: u8, b: u8, c: u8, d: u8) -> ClientIdentity {
        ClientIdentity::Addr(IpAddr::V4(Ipv4Addr::new(a, b, c, d)))
    }

    #[test]
    fn test_rate_limit_config_default() {
        let config = RateLimitConfig::default();
        assert_eq!(config.max_requests, 100);
        assert_eq!(config.window, Duration::from_secs(900));
        assert_eq!(config.message, DEFAULT_RATE_LIMIT_MESSAGE);
        assert!(config.enabled);
    }

    #[test]
    fn test_rate_limiter_blocks_excess() {
        let limiter = RateLimiter::new(RateLimitConfig::custom(3, 60));
        let client = ip(192, 168, 1, 1);

        assert!(limiter.admit(client).is_allowed());
        assert!(limiter.admit(client).is_allowed());
        assert!(limiter.admit(client).is_allowed());

        // 4th request should be blocked
        assert!(!limiter.admit(client).is_allowed());
    }

    #[test]
    fn test_hundred_then_reject() {
        let limiter = RateLimiter::default();
        let client = ip(10, 1, 1, 1);
        let now = Instant::now();

        for i in 0..100 {
            assert!(
                limiter.admit_at(client, now).is_allowed(),
                "Request {} should be allowed",
                i + 1
            );
        }
        assert!(matches!(
            limiter.admit_at(client, now),
            Admission::Rejected { .. }
        ));
    }

    #[test]
    fn test_rejection_does_not_extend_window() {
        let limiter = RateLimiter::new(RateLimitConfig::custom(1, 60));
        let client = ip(10, 0, 0, 9);
        let start = Instant::now();

        assert!(limiter.admit_at(client, start).is_allowed());
        for s in 1..=5 {
            assert!(!limiter
                .admit_at(client, start + Duration::from_secs(s))
                .is_allowed());
        }
        assert!(limiter
            .admit_at(client, start + Duration::from_secs(61))
            .is_allowed());
    }

    #[test]
    fn test_window_reset_starts_fresh() {
        let limiter = RateLimiter::new(RateLimitConfig::custom(2, 60));
        let client = ip(172, 16, 0, 1);
        let start = Instant::now();

        assert!(limiter.admit_at(client, start).is_allowed());
        assert!(limiter.admit_at(client, start).is_allowed());
        assert!(!limiter.admit_at(client, start).is_allowed());

        let later = start + Duration::from_secs(61);
        assert_eq!(
            limiter.admit_at(client, later),
            Admission::Allowed { remaining: 1 }
        );
        assert_eq!(limiter.windows.get(&client).unwrap().count, 1);
    }

    #[test]
    fn test_retry_after() {
        let limiter = RateLimiter::new(RateLimitConfig::custom(1, 60));
        let client = ip(8, 8, 4, 4);
        let start = Instant::now();

        limiter.admit_at(client, start);
        let result = limiter.admit_at(client, start + Duration::from_secs(20));
        assert_eq!(
            result,
            Admission::Rejected {
                retry_after: Duration::from_secs(40)
            }
        );
    }

    #[test]
    fn test_rate_limiter_different_ips() {
        let limiter = RateLimiter::new(RateLimitConfig::custom(2, 60));
        let ip1 = ip(10, 0, 0, 1);
        let ip2 = ip(10, 0, 0, 2);

        // Each IP gets its own quota
        assert!(limiter.admit(ip1).is_allowed());
        assert!(limiter.admit(ip1).is_allowed());
        assert!(!limiter.admit(ip1).is_allowed()); // ip1 blocked

        assert!(limiter.admit(ip2).is_allowed()); // ip2 still allowed
        assert!(limiter.admit(ip2).is_allowed());
        assert!(!limiter.admit(ip2).is_allowed()); // ip2 now blocked
    }

    #[test]
    fn test_concurrent_admits_never_overshoot() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;
        use std::thread;

        const THREADS: usize = 16;
        const PER_THREAD: usize = 50;
        const LIMIT: u32 = 300;

        let limiter = Arc::new(RateLimiter::new(RateLimitConfig::custom(LIMIT, 3600)));
        let allowed = Arc::new(AtomicUsize::new(0));
        let client = ip(172, 16, 0, 1);

        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                let limiter = Arc::clone(&limiter);
                let allowed = Arc::clone(&allowed);
                thread::spawn(move || {
                    for _ in 0..PER_THREAD {
                        if limiter.admit(client).is_allowed() {
                            allowed.fetch_add(1, Ordering::SeqCst);
                        }
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(allowed.load(Ordering::SeqCst), LIMIT as usize);
        assert_eq!(limiter.windows.get(&client).unwrap().count, LIMIT);
    }

    #[test]
    fn test_rate_limiter_disabled() {
        let limiter = RateLimiter::disabled();
        let client = ip(1, 1, 1, 1);

        // Should always allow when disabled
        for _ in 0..500 {
            assert!(limiter.admit(client).is_allowed());
        }
        assert_eq!(limiter.stats().tracked, 0);
    }

    #[test]
    fn test_rate_limiter_ipv6() {
        let limiter = RateLimiter::new(RateLimitConfig::custom(2, 60));
        let client = ClientIdentity::Addr(IpAddr::V6(Ipv6Addr::new(0x2001, 0xdb8, 0, 0, 0, 0, 0, 1)));

        assert!(limiter.admit(client).is_allowed());
        assert!(limiter.admit(client).is_allowed());
        assert!(!limiter.admit(client).is_allowed());
    }

    #[test]
    fn test_rate_limiter_remaining_count() {
        let limiter = RateLimiter::new(RateLimitConfig::custom(3, 60));
        let client = ip(172, 16, 0, 2);

        assert_eq!(limiter.admit(client), Admission::Allowed { remaining: 2 });
        assert_eq!(limiter.admit(client), Admission::Allowed { remaining: 1 });
        assert_eq!(limiter.admit(client), Admission::Allowed { remaining: 0 });
        assert!(!limiter.admit(client).is_allowed());
    }

    #[test]
    fn test_rate_limiter_stats() {
        let limiter = RateLimiter::new(RateLimitConfig::custom(10, 30));
        limiter.admit(ip(8, 8, 8, 8));

        let stats = limiter.stats();
        assert_eq!(stats.tracked, 1);
        assert_eq!(stats.max_requests, 10);
        assert_eq!(stats.window_secs, 30);
        assert!(stats.enabled);
    }

    #[test]
    fn test_cleanup_drops_stale_windows() {
        let limiter = RateLimiter::new(RateLimitConfig::custom(5, 60));
        let start = Instant::now();
        limiter.admit_at(ip(1, 0, 0, 1), start);
        limiter.admit_at(ip(1, 0, 0, 2), start);

        limiter.admit_at(ip(1, 0, 0, 3), start + Duration::from_secs(121));
        assert_eq!(limiter.stats().tracked, 1);
    }

    #[test]
    fn test_identity_from_connect_info() {
        let mut request = Request::new(axum::body::Body::empty());
        request
            .extensions_mut()
            .insert(ConnectInfo(SocketAddr::from(([127, 0, 0, 1], 4000))));

        assert_eq!(
            ClientIdentity::from_request(&request, false),
            ip(127, 0, 0, 1)
        );
    }

    #[test]
    fn test_identity_forwarded_only_when_trusted() {
        let request = Request::builder()
            .header("x-forwarded-for", "203.0.113.7, 10.0.0.1")
            .body(axum::body::Body::empty())
            .unwrap();

        assert_eq!(
            ClientIdentity::from_request(&request, true),
            ip(203, 0, 113, 7)
        );
        assert_eq!(
            ClientIdentity::from_request(&request, false),
            ClientIdentity::Unknown
        );
    }
}

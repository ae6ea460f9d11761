//! Per-client rate limiting.
//!
//! Each client IP gets a token bucket, created full on first sight. The client
//! map lock is only held to find or insert an entry; the bucket arithmetic
//! runs under the entry's own lock, so one busy client does not serialize
//! everyone else. A background sweep evicts idle clients once a minute.

use axum::{
    extract::{ConnectInfo, Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use anyhow::anyhow;
use std::{
    collections::HashMap,
    net::{IpAddr, SocketAddr},
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::api::{ApiError, SharedState};

/// How often idle clients are swept.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Clients silent for longer than this are evicted by the sweep.
pub const INACTIVITY_WINDOW: Duration = Duration::from_secs(3);

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LimiterConfig {
    pub enabled: bool,
    /// Steady refill rate in tokens per second.
    pub rps: f64,
    /// Bucket capacity.
    pub burst: u32,
}

impl LimiterConfig {
    #[must_use]
    pub fn new(rps: f64, burst: u32) -> Self {
        Self {
            enabled: true,
            rps,
            burst,
        }
    }

    #[must_use]
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self::new(2.0, 4)
    }
}

#[derive(Debug)]
struct TokenBucket {
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn full(burst: u32, now: Instant) -> Self {
        Self {
            tokens: f64::from(burst),
            last_refill: now,
        }
    }

    fn try_take(&mut self, config: &LimiterConfig, now: Instant) -> bool {
        let elapsed = now.saturating_duration_since(self.last_refill);
        self.tokens = elapsed
            .as_secs_f64()
            .mul_add(config.rps, self.tokens)
            .min(f64::from(config.burst));
        self.last_refill = self.last_refill.max(now);

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

#[derive(Debug)]
struct ClientEntry {
    bucket: Mutex<TokenBucket>,
    /// Milliseconds since the limiter's epoch.
    last_seen: AtomicU64,
}

#[derive(Debug)]
pub struct RateLimiter {
    config: LimiterConfig,
    epoch: Instant,
    sweep_interval: Duration,
    inactivity_window: Duration,
    clients: Mutex<HashMap<IpAddr, Arc<ClientEntry>>>,
}

// A poisoned lock only means another request panicked mid-update; the bucket
// state is still usable.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl RateLimiter {
    #[must_use]
    pub fn new(config: LimiterConfig) -> Self {
        Self {
            config,
            epoch: Instant::now(),
            sweep_interval: SWEEP_INTERVAL,
            inactivity_window: INACTIVITY_WINDOW,
            clients: Mutex::new(HashMap::new()),
        }
    }

    /// Override the sweep period and the idle cutoff.
    #[must_use]
    pub fn with_sweep(mut self, interval: Duration, inactivity_window: Duration) -> Self {
        self.sweep_interval = interval;
        self.inactivity_window = inactivity_window;
        self
    }

    #[must_use]
    pub fn config(&self) -> &LimiterConfig {
        &self.config
    }

    /// Try to admit one request from `ip`.
    #[must_use]
    pub fn check(&self, ip: IpAddr) -> bool {
        self.check_at(ip, Instant::now())
    }

    /// [`RateLimiter::check`] with an explicit clock.
    #[must_use]
    pub fn check_at(&self, ip: IpAddr, now: Instant) -> bool {
        let seen = self.millis_since_epoch(now);

        // Stamp activity while the map lock is held so a concurrent sweep
        // cannot evict the entry between lookup and charge.
        let entry = {
            let mut clients = lock(&self.clients);
            let entry = Arc::clone(clients.entry(ip).or_insert_with(|| {
                Arc::new(ClientEntry {
                    bucket: Mutex::new(TokenBucket::full(self.config.burst, now)),
                    last_seen: AtomicU64::new(seen),
                })
            }));
            entry.last_seen.fetch_max(seen, Ordering::Relaxed);
            entry
        };

        lock(&entry.bucket).try_take(&self.config, now)
    }

    /// Drop clients idle for longer than the inactivity window. Returns how many went.
    pub fn sweep_at(&self, now: Instant) -> usize {
        let cutoff = self
            .millis_since_epoch(now)
            .saturating_sub(u64::try_from(self.inactivity_window.as_millis()).unwrap_or(u64::MAX));

        let mut clients = lock(&self.clients);
        let before = clients.len();
        clients.retain(|_, entry| entry.last_seen.load(Ordering::Relaxed) >= cutoff);
        before - clients.len()
    }

    /// Number of tracked clients.
    #[must_use]
    pub fn len(&self) -> usize {
        lock(&self.clients).len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn contains(&self, ip: IpAddr) -> bool {
        lock(&self.clients).contains_key(&ip)
    }

    /// Run the sweep periodically until the task is aborted.
    pub fn spawn_sweeper(self: &Arc<Self>) -> JoinHandle<()> {
        let limiter = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(limiter.sweep_interval);
            // The first tick completes immediately.
            interval.tick().await;

            loop {
                interval.tick().await;
                let evicted = limiter.sweep_at(Instant::now());
                debug!(evicted, remaining = limiter.len(), "rate limiter sweep completed");
            }
        })
    }

    fn millis_since_epoch(&self, now: Instant) -> u64 {
        u64::try_from(now.saturating_duration_since(self.epoch).as_millis()).unwrap_or(u64::MAX)
    }
}

/// Admission control keyed by the peer address of the connection.
pub async fn rate_limit(State(state): State<SharedState>, request: Request, next: Next) -> Response {
    if !state.limiter.config().enabled {
        return next.run(request).await;
    }

    let Some(ConnectInfo(peer)) = request.extensions().get::<ConnectInfo<SocketAddr>>().copied()
    else {
        return ApiError::fault(anyhow!("peer address missing from request")).into_response();
    };

    if !state.limiter.check(peer.ip()) {
        warn!(client = %peer.ip(), "rate limit exceeded");
        return ApiError::RateLimited.into_response();
    }

    next.run(request).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    const CLIENT: IpAddr = IpAddr::V4(Ipv4Addr::new(192, 0, 2, 1));
    const OTHER: IpAddr = IpAddr::V4(Ipv4Addr::new(192, 0, 2, 2));

    #[test]
    fn three_quick_requests_with_burst_two() {
        let limiter = RateLimiter::new(LimiterConfig::new(2.0, 2));
        let start = Instant::now();

        let admitted = [0, 40, 80]
            .into_iter()
            .filter(|ms| limiter.check_at(CLIENT, start + Duration::from_millis(*ms)))
            .count();

        assert_eq!(admitted, 2);
    }

    #[test]
    fn bucket_refills_at_steady_rate() {
        let limiter = RateLimiter::new(LimiterConfig::new(2.0, 2));
        let start = Instant::now();

        assert!(limiter.check_at(CLIENT, start));
        assert!(limiter.check_at(CLIENT, start));
        assert!(!limiter.check_at(CLIENT, start));
        // Half a second buys one token at 2 rps.
        assert!(limiter.check_at(CLIENT, start + Duration::from_millis(500)));
        assert!(!limiter.check_at(CLIENT, start + Duration::from_millis(500)));
    }

    #[test]
    fn refill_never_exceeds_burst() {
        let limiter = RateLimiter::new(LimiterConfig::new(2.0, 2));
        let start = Instant::now();
        let later = start + Duration::from_secs(60);

        assert!(limiter.check_at(CLIENT, start));
        assert!(limiter.check_at(CLIENT, later));
        assert!(limiter.check_at(CLIENT, later));
        assert!(!limiter.check_at(CLIENT, later));
    }

    #[test]
    fn clients_have_independent_buckets() {
        let limiter = RateLimiter::new(LimiterConfig::new(1.0, 1));
        let now = Instant::now();

        assert!(limiter.check_at(CLIENT, now));
        assert!(!limiter.check_at(CLIENT, now));
        assert!(limiter.check_at(OTHER, now));
        assert_eq!(limiter.len(), 2);
    }

    #[test]
    fn sweep_evicts_idle_clients_only() {
        let limiter = RateLimiter::new(LimiterConfig::default());
        let start = Instant::now();

        let _ = limiter.check_at(CLIENT, start);
        let _ = limiter.check_at(OTHER, start + Duration::from_secs(9));

        let evicted = limiter.sweep_at(start + Duration::from_secs(10));

        assert_eq!(evicted, 1);
        assert!(!limiter.contains(CLIENT));
        assert!(limiter.contains(OTHER));
    }

    #[test]
    fn rejected_requests_still_count_as_activity() {
        let limiter = RateLimiter::new(LimiterConfig::new(1.0, 1));
        let start = Instant::now();

        assert!(limiter.check_at(CLIENT, start));
        assert!(!limiter.check_at(CLIENT, start + Duration::from_millis(900)));
        // First request is older than the window but the rejected one is not.
        limiter.sweep_at(start + Duration::from_millis(3500));
        assert!(limiter.contains(CLIENT));
    }

    #[test]
    fn new_client_is_stamped_on_first_sight() {
        let limiter = RateLimiter::new(LimiterConfig::new(1.0, 1));
        let later = Instant::now() + Duration::from_secs(30);

        assert!(limiter.check_at(CLIENT, later));
        assert_eq!(limiter.sweep_at(later), 0);
        assert!(limiter.contains(CLIENT));
        // The charge landed on the surviving entry.
        assert!(!limiter.check_at(CLIENT, later));
    }

    #[test]
    fn concurrent_checks_and_sweeps_keep_active_clients() {
        let limiter = Arc::new(RateLimiter::new(LimiterConfig::new(1.0, 1)));
        let start = Instant::now() + Duration::from_secs(30);

        let sweeper = {
            let limiter = Arc::clone(&limiter);
            std::thread::spawn(move || {
                for _ in 0..1_000 {
                    limiter.sweep_at(start);
                }
            })
        };
        let admitted = (0..1_000)
            .filter(|_| limiter.check_at(CLIENT, start))
            .count();
        let _ = sweeper.join();

        // One token at a fixed clock; an evicted and recreated bucket would admit again.
        assert_eq!(admitted, 1);
    }

    #[tokio::test]
    async fn sweeper_task_evicts_idle_clients() {
        let limiter = Arc::new(
            RateLimiter::new(LimiterConfig::default())
                .with_sweep(Duration::from_millis(20), Duration::from_millis(50)),
        );
        let _ = limiter.check(CLIENT);
        assert_eq!(limiter.len(), 1);

        let handle = limiter.spawn_sweeper();
        tokio::time::sleep(Duration::from_millis(300)).await;

        assert!(limiter.is_empty());
        handle.abort();
    }

    #[test]
    fn default_sweep_timing() {
        let limiter = RateLimiter::new(LimiterConfig::default());
        assert_eq!(limiter.sweep_interval, Duration::from_secs(60));
        assert_eq!(limiter.inactivity_window, Duration::from_secs(3));
    }

    #[test]
    fn disabled_config() {
        let config = LimiterConfig::new(2.0, 4).with_enabled(false);
        assert!(!config.enabled);
        assert!(LimiterConfig::default().enabled);
    }
}

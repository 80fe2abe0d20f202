// =============================================================================
// Market Data Cache: TTL cache with request coalescing and rate limiting
// =============================================================================
//
// `get(symbol)` resolves, in order:
//   1. a fresh cache entry (younger than the TTL), no network access.
//   2. the in-flight fetch for the same symbol, shared by every caller.
//   3. while throttled: stale data if any, otherwise sleep out the cooldown.
//   4. budget check on the sliding window; exhausting it throttles (as 3).
//   5. a new upstream fetch, recorded in the window and registered in-flight.
//
// Steps 1-5 run under one mutex so the budget check and the in-flight
// registration are atomic.  The fetch itself runs on its own task: it always
// settles (cache write, in-flight removal, throttle on 429) even if every
// caller has dropped its future.
// =============================================================================

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::binance::{RateWindow, ThrottleState};
use crate::error::FetchError;
use crate::market_data::candle::{normalize_symbol, Candle, Series};
use crate::runtime_config::MarketDataConfig;

/// Outcome handed to every caller of [`MarketDataCache::get`].
pub type FetchResult = Result<Series, FetchError>;

type SharedFetch = Shared<BoxFuture<'static, FetchResult>>;

/// Upstream provider of candles for a normalised symbol.
#[async_trait]
pub trait CandleSource: Send + Sync + 'static {
    async fn fetch_candles(&self, symbol: &str) -> Result<Vec<Candle>, FetchError>;
}

/// Tunables for [`MarketDataCache`].
#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub ttl: Duration,
    pub max_requests: usize,
    pub rate_window: Duration,
    pub cooldown: Duration,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(5 * 60),
            max_requests: 30,
            rate_window: Duration::from_secs(60),
            cooldown: Duration::from_secs(60),
        }
    }
}

impl CacheSettings {
    pub fn from_config(cfg: &MarketDataConfig) -> Self {
        Self {
            ttl: Duration::from_secs(cfg.cache_ttl_secs),
            max_requests: cfg.max_requests_per_minute as usize,
            rate_window: Duration::from_secs(cfg.rate_window_secs),
            cooldown: Duration::from_secs(cfg.cooldown_secs),
        }
    }
}

#[derive(Debug)]
struct CacheEntry {
    value: Series,
    fetched_at: Instant,
}

struct CacheState {
    entries: HashMap<String, CacheEntry>,
    in_flight: HashMap<String, SharedFetch>,
    window: RateWindow,
    throttle: ThrottleState,
}

/// What `get` should do next, decided under the state lock.
enum Step {
    Ready(Series),
    Join(SharedFetch),
    Wait(Instant),
}

impl CacheState {
    fn stale_or_wait(&self, key: &str, until: Instant) -> Step {
        match self.entries.get(key) {
            Some(entry) => {
                info!(symbol = %key, "returning stale candles while rate limited");
                Step::Ready(entry.value.clone())
            }
            None => Step::Wait(until),
        }
    }

    /// Record the outcome of an upstream fetch and clear its in-flight slot.
    fn settle(
        &mut self,
        key: &str,
        outcome: Result<Vec<Candle>, FetchError>,
        cooldown: Duration,
    ) -> FetchResult {
        self.in_flight.remove(key);

        match outcome {
            Ok(candles) => {
                let value: Series = Arc::new(candles);
                self.entries.insert(
                    key.to_string(),
                    CacheEntry {
                        value: value.clone(),
                        fetched_at: Instant::now(),
                    },
                );
                debug!(symbol = %key, count = value.len(), "candles cached");
                Ok(value)
            }
            Err(e) if e.is_rate_limited() => {
                self.throttle
                    .engage(Instant::now(), cooldown, "upstream rate limit response");
                match self.entries.get(key) {
                    Some(entry) => {
                        info!(symbol = %key, "returning stale candles after upstream 429");
                        Ok(entry.value.clone())
                    }
                    None => Err(e),
                }
            }
            Err(e) => {
                warn!(symbol = %key, error = %e, "candle fetch failed");
                Err(e)
            }
        }
    }
}

/// Per-symbol candle cache in front of a [`CandleSource`].
pub struct MarketDataCache<S: CandleSource> {
    source: Arc<S>,
    settings: CacheSettings,
    state: Arc<Mutex<CacheState>>,
}

impl<S: CandleSource> MarketDataCache<S> {
    pub fn new(source: S, settings: CacheSettings) -> Self {
        let window = RateWindow::new(settings.max_requests, settings.rate_window);
        Self {
            source: Arc::new(source),
            settings,
            state: Arc::new(Mutex::new(CacheState {
                entries: HashMap::new(),
                in_flight: HashMap::new(),
                window,
                throttle: ThrottleState::default(),
            })),
        }
    }

    /// Candles for `symbol`, from cache when fresh, otherwise from upstream
    /// within the request budget.
    pub async fn get(&self, symbol: &str) -> FetchResult {
        let key = normalize_symbol(symbol);

        loop {
            match self.plan(&key) {
                Step::Ready(series) => return Ok(series),
                Step::Join(fetch) => return fetch.await,
                Step::Wait(until) => {
                    let wait = until.saturating_duration_since(Instant::now());
                    info!(
                        symbol = %key,
                        wait_ms = wait.as_millis() as u64,
                        "rate limited with no cached data, waiting for cooldown"
                    );
                    tokio::time::sleep_until(until).await;
                }
            }
        }
    }

    /// Cached candles for `symbol`, fresh or stale, without touching upstream.
    #[cfg(test)]
    pub fn peek(&self, symbol: &str) -> Option<Series> {
        let key = normalize_symbol(symbol);
        self.state
            .lock()
            .entries
            .get(&key)
            .map(|entry| entry.value.clone())
    }

    /// End of the current cooldown, if one is running.
    pub fn throttled_until(&self) -> Option<Instant> {
        self.state.lock().throttle.remaining_until(Instant::now())
    }

    fn plan(&self, key: &str) -> Step {
        let mut st = self.state.lock();
        let now = Instant::now();

        if let Some(entry) = st.entries.get(key) {
            if now.saturating_duration_since(entry.fetched_at) < self.settings.ttl {
                debug!(symbol = %key, "returning cached candles");
                return Step::Ready(entry.value.clone());
            }
        }

        if let Some(pending) = st.in_flight.get(key) {
            debug!(symbol = %key, "joining in-flight fetch");
            return Step::Join(pending.clone());
        }

        if let Some(until) = st.throttle.remaining_until(now) {
            return st.stale_or_wait(key, until);
        }
        if st.throttle.has_elapsed(now) {
            st.throttle.clear();
        }

        st.window.trim(now);
        if st.window.is_exhausted() {
            st.throttle
                .engage(now, self.settings.cooldown, "request budget exhausted");
            let until = st
                .throttle
                .remaining_until(now)
                .unwrap_or(now + self.settings.cooldown);
            return st.stale_or_wait(key, until);
        }

        st.window.record(now);
        let fetch = self.spawn_fetch(key.to_string());
        st.in_flight.insert(key.to_string(), fetch.clone());
        Step::Join(fetch)
    }

    fn spawn_fetch(&self, key: String) -> SharedFetch {
        let source = Arc::clone(&self.source);
        let state = Arc::clone(&self.state);
        let cooldown = self.settings.cooldown;

        let handle = tokio::spawn(async move {
            info!(symbol = %key, "fetching candles from upstream");
            let outcome = AssertUnwindSafe(source.fetch_candles(&key))
                .catch_unwind()
                .await
                .unwrap_or_else(|_| Err(FetchError::Aborted("candle source panicked".into())));
            state.lock().settle(&key, outcome, cooldown)
        });

        async move {
            handle
                .await
                .unwrap_or_else(|e| Err(FetchError::Aborted(e.to_string())))
        }
        .boxed()
        .shared()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

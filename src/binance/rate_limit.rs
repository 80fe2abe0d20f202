// =============================================================================
// Rate-Limit Bookkeeping: sliding request window + cooldown throttle
// =============================================================================
//
// Binance's public klines endpoint bans aggressively once the weight budget is
// blown, so the cache keeps its own, far stricter budget:
//   - at most `max_requests` upstream calls per trailing `window`.
//   - once exceeded (or once the exchange answers 429) all fetches are
//     suppressed for a fixed `cooldown`.
//
// Neither type locks internally; the owning cache mutates both under its own
// mutex so the budget check and the in-flight registration stay atomic.
// =============================================================================

use std::collections::VecDeque;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, warn};

/// Timestamps of upstream requests issued within the trailing window.
#[derive(Debug)]
pub struct RateWindow {
    window: Duration,
    max_requests: usize,
    requests: VecDeque<Instant>,
}

impl RateWindow {
    pub fn new(max_requests: usize, window: Duration) -> Self {
        Self {
            window,
            max_requests,
            requests: VecDeque::with_capacity(max_requests + 1),
        }
    }

    /// Drop every request older than `now - window`.
    pub fn trim(&mut self, now: Instant) {
        while let Some(&oldest) = self.requests.front() {
            if now.saturating_duration_since(oldest) >= self.window {
                self.requests.pop_front();
            } else {
                break;
            }
        }
    }

    /// `true` once the (already trimmed) window holds `max_requests` entries.
    pub fn is_exhausted(&self) -> bool {
        self.requests.len() >= self.max_requests
    }

    pub fn record(&mut self, now: Instant) {
        self.requests.push_back(now);
        debug!(
            used = self.requests.len(),
            max = self.max_requests,
            "upstream request recorded in rate window"
        );
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.requests.len()
    }
}

/// Cooldown entered after the budget is exhausted or the upstream says 429.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThrottleState {
    active: bool,
    until: Option<Instant>,
}

impl ThrottleState {
    /// Enter (or extend) the cooldown until `now + cooldown`.
    pub fn engage(&mut self, now: Instant, cooldown: Duration, reason: &str) {
        let until = now + cooldown;
        // Never shorten an already longer cooldown.
        let until = match self.until {
            Some(existing) if self.active && existing > until => existing,
            _ => until,
        };
        self.active = true;
        self.until = Some(until);
        warn!(
            reason,
            cooldown_secs = cooldown.as_secs(),
            "entering rate-limit cooldown"
        );
    }

    /// End of the cooldown if it is still running at `now`.
    pub fn remaining_until(&self, now: Instant) -> Option<Instant> {
        match self.until {
            Some(until) if self.active && now < until => Some(until),
            _ => None,
        }
    }

    /// Active but already elapsed at `now`.
    pub fn has_elapsed(&self, now: Instant) -> bool {
        self.active && self.remaining_until(now).is_none()
    }

    pub fn clear(&mut self) {
        if self.active {
            debug!("rate-limit cooldown cleared");
        }
        self.active = false;
        self.until = None;
    }

    #[cfg(test)]
    pub fn is_active(&self) -> bool {
        self.active
    }
}

//! Process-global sliding-window rate limiter for outbound calls.
//!
//! One instance is shared by every tenant's page fetches and by the
//! notification workers, so the ceiling holds across the whole process.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::Mutex;
use utoipa::ToSchema;

/// Current limiter usage, for the status endpoint.
#[derive(Debug, Serialize, ToSchema)]
pub struct RateLimiterStatus {
    pub limit: usize,
    pub window_seconds: u64,
    pub current_requests: usize,
    pub remaining: usize,
}

/// Sliding-window limiter over the timestamps of the last `limit`
/// admissions.
pub struct RateLimiter {
    limit: usize,
    window: Duration,
    admitted: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    pub fn new(limit: usize, window: Duration) -> Self {
        Self {
            limit,
            window,
            admitted: Mutex::new(VecDeque::with_capacity(limit)),
        }
    }

    /// Wait until a slot is free, then consume it.
    ///
    /// The mutex is never held across the sleep, so waiters do not block
    /// admissions, and dropping a waiting future consumes no slot. FIFO is
    /// not guaranteed; starvation is bounded by the window length.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut admitted = self.admitted.lock().await;
                let now = Instant::now();
                Self::prune(&mut admitted, now, self.window);

                if admitted.len() < self.limit {
                    admitted.push_back(now);
                    return;
                }
                // Sleep until the oldest admission leaves the window, then
                // recheck; another waiter may have taken the slot.
                let oldest = admitted[0];
                (oldest + self.window).saturating_duration_since(now)
            };
            tokio::time::sleep(wait).await;
        }
    }

    /// Non-consuming snapshot of the window.
    pub async fn status(&self) -> RateLimiterStatus {
        let mut admitted = self.admitted.lock().await;
        Self::prune(&mut admitted, Instant::now(), self.window);
        let current = admitted.len();
        RateLimiterStatus {
            limit: self.limit,
            window_seconds: self.window.as_secs(),
            current_requests: current,
            remaining: self.limit.saturating_sub(current),
        }
    }

    fn prune(admitted: &mut VecDeque<Instant>, now: Instant, window: Duration) {
        while let Some(oldest) = admitted.front() {
            if now.duration_since(*oldest) > window {
                admitted.pop_front();
            } else {
                break;
            }
        }
    }
}

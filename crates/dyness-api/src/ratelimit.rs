// Request floor for the open API.
//
// The server allows one request per rolling minute. The limiter holds a
// single async mutex for the whole exchange, so at most one request is in
// flight, and records when the next one may start. Callers that arrive
// early wait; they are never rejected.

use std::time::Duration;

use tokio::sync::{Mutex, MutexGuard};
use tokio::time::{Instant, sleep_until};
use tracing::debug;

/// Server-enforced minimum spacing between requests.
pub const DEFAULT_FLOOR: Duration = Duration::from_secs(60);

#[derive(Debug, Default, Clone, Copy)]
struct FloorState {
    /// Earliest instant the next exchange may start.
    next_allowed: Option<Instant>,
    /// When the most recent exchange started.
    last_started: Option<Instant>,
}

/// Serializes exchanges and enforces the minimum spacing between them.
#[derive(Debug)]
pub struct RateLimiter {
    floor: Duration,
    state: Mutex<FloorState>,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_FLOOR)
    }
}

impl RateLimiter {
    pub fn new(floor: Duration) -> Self {
        Self {
            floor,
            state: Mutex::new(FloorState::default()),
        }
    }

    pub fn floor(&self) -> Duration {
        self.floor
    }

    /// Wait for the floor, then claim the right to issue one exchange.
    ///
    /// The returned permit must be held until the exchange completes;
    /// other callers queue behind it in FIFO order.
    pub async fn acquire(&self) -> Permit<'_> {
        let mut state = self.state.lock().await;

        if let Some(at) = state.next_allowed {
            let now = Instant::now();
            if at > now {
                debug!(wait_ms = (at - now).as_millis(), "deferring request to honour floor");
                sleep_until(at).await;
            }
        }

        let previous = *state;
        let started = Instant::now();
        state.last_started = Some(started);
        state.next_allowed = Some(started + self.floor);

        Permit {
            state,
            previous,
            floor: self.floor,
        }
    }
}

/// Exclusive right to perform one exchange. Dropping it releases the queue.
#[derive(Debug)]
pub struct Permit<'a> {
    state: MutexGuard<'a, FloorState>,
    previous: FloorState,
    floor: Duration,
}

impl Permit<'_> {
    /// Push the next allowed start outward after a rate-limit response.
    ///
    /// The deferral is never shorter than the floor and never pulls an
    /// existing deadline closer.
    pub fn defer(&mut self, retry_after: Duration) {
        let until = Instant::now() + retry_after.max(self.floor);
        if self.state.next_allowed.is_none_or(|at| at < until) {
            debug!(defer_secs = retry_after.max(self.floor).as_secs(), "stretching request floor");
            self.state.next_allowed = Some(until);
        }
    }

    pub fn started_at(&self) -> Option<Instant> {
        self.state.last_started
    }

    /// Give the slot back without sending anything; the floor is left as
    /// it was before this permit was taken.
    pub fn release_unused(mut self) {
        debug!("permit released without a request");
        *self.state = self.previous;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn first_acquire_is_immediate() {
        let limiter = RateLimiter::new(Duration::from_secs(60));
        let before = Instant::now();
        drop(limiter.acquire().await);
        assert_eq!(Instant::now(), before);
    }

    #[tokio::test(start_paused = true)]
    async fn second_acquire_waits_for_floor() {
        let limiter = RateLimiter::new(Duration::from_secs(60));
        let t0 = Instant::now();
        drop(limiter.acquire().await);
        drop(limiter.acquire().await);
        assert!(Instant::now() - t0 >= Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn rapid_concurrent_callers_are_spaced() {
        let limiter = Arc::new(RateLimiter::new(Duration::from_secs(60)));
        let mut handles = Vec::new();
        for _ in 0..5 {
            let limiter = Arc::clone(&limiter);
            handles.push(tokio::spawn(async move {
                let permit = limiter.acquire().await;
                permit.started_at().unwrap()
            }));
        }
        let mut starts = Vec::new();
        for h in handles {
            starts.push(h.await.unwrap());
        }
        starts.sort();
        for pair in starts.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_secs(60));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn defer_stretches_floor() {
        let limiter = RateLimiter::new(Duration::from_secs(60));
        let t0 = Instant::now();
        {
            let mut permit = limiter.acquire().await;
            permit.defer(Duration::from_secs(300));
        }
        drop(limiter.acquire().await);
        assert!(Instant::now() - t0 >= Duration::from_secs(300));
    }

    #[tokio::test(start_paused = true)]
    async fn defer_never_shortens_below_floor() {
        let limiter = RateLimiter::new(Duration::from_secs(60));
        let t0 = Instant::now();
        {
            let mut permit = limiter.acquire().await;
            permit.defer(Duration::from_secs(1));
        }
        drop(limiter.acquire().await);
        assert!(Instant::now() - t0 >= Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn unused_permit_does_not_book_the_floor() {
        let limiter = RateLimiter::new(Duration::from_secs(60));
        let t0 = Instant::now();
        drop(limiter.acquire().await);

        let unused = limiter.acquire().await;
        assert_eq!(Instant::now() - t0, Duration::from_secs(60));
        unused.release_unused();

        drop(limiter.acquire().await);
        assert_eq!(Instant::now() - t0, Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn caller_slower_than_floor_is_not_delayed() {
        let limiter = RateLimiter::new(Duration::from_secs(60));
        drop(limiter.acquire().await);
        tokio::time::advance(Duration::from_secs(300)).await;
        let before = Instant::now();
        drop(limiter.acquire().await);
        assert_eq!(Instant::now(), before);
    }
}

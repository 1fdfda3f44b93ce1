//! Process-wide token bucket with a concurrency cap and a FIFO wait queue.
//!
//! Generalized from the teacher's `Mutex`+`AtomicBool` coordination style in
//! `llm::queue::process_all_parallel`: rather than a fixed worker pool
//! draining one shared `VecDeque<LlmTask>`, callers block on a condition
//! variable until both a token and a concurrency slot are free.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy)]
pub struct RateLimiterConfig {
    pub max_tokens: f64,
    pub refill_rate_per_sec: f64,
    pub max_concurrent: usize,
}

struct State {
    current_tokens: f64,
    active_requests: usize,
    last_refill: Instant,
    /// FIFO order; each waiter's ticket is woken in order by `Condvar`
    /// broadcasts, checking its own position before proceeding.
    queue: VecDeque<u64>,
    cleared: bool,
}

/// A token-bucket limiter shared by every batch in the process.
pub struct RateLimiter {
    config: Mutex<RateLimiterConfig>,
    state: Mutex<State>,
    condvar: Condvar,
    next_ticket: AtomicU64,
}

/// Held while a caller is inside the limited section. Dropping it (or
/// calling `release` explicitly) frees the concurrency slot and wakes
/// waiters.
pub struct Permit<'a> {
    limiter: &'a RateLimiter,
    released: bool,
}

impl<'a> Permit<'a> {
    pub fn release(mut self) {
        self.do_release();
    }

    fn do_release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        let mut state = self.limiter.state.lock().unwrap();
        state.active_requests = state.active_requests.saturating_sub(1);
        drop(state);
        self.limiter.condvar.notify_all();
    }
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        self.do_release();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    Acquired,
    /// The queue was cleared (e.g. by `cancel_all`) while this caller
    /// waited; no permit was granted and the caller must not release.
    Cleared,
}

impl RateLimiter {
    pub fn new(config: RateLimiterConfig) -> Self {
        Self {
            config: Mutex::new(config),
            state: Mutex::new(State {
                current_tokens: config.max_tokens,
                active_requests: 0,
                last_refill: Instant::now(),
                queue: VecDeque::new(),
                cleared: false,
            }),
            condvar: Condvar::new(),
            next_ticket: AtomicU64::new(0),
        }
    }

    fn refill_locked(state: &mut State, config: &RateLimiterConfig) {
        let now = Instant::now();
        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        if elapsed > 0.0 {
            state.current_tokens =
                (state.current_tokens + elapsed * config.refill_rate_per_sec).min(config.max_tokens);
            state.last_refill = now;
        }
    }

    /// Blocks until a token and a concurrency slot are both available, or
    /// until the queue is cleared out from under this caller.
    pub fn acquire(&self) -> AcquireOutcome {
        let ticket = self.next_ticket.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock().unwrap();
        state.queue.push_back(ticket);

        loop {
            let config = *self.config.lock().unwrap();
            Self::refill_locked(&mut state, &config);

            let is_front = state.queue.front() == Some(&ticket);
            let can_proceed =
                is_front && state.current_tokens >= 1.0 && state.active_requests < config.max_concurrent;

            if state.cleared && is_front {
                state.queue.pop_front();
                return AcquireOutcome::Cleared;
            }

            if can_proceed {
                state.current_tokens -= 1.0;
                state.active_requests += 1;
                state.queue.pop_front();
                return AcquireOutcome::Acquired;
            }

            let (guard, _timeout) = self
                .condvar
                .wait_timeout(state, Duration::from_millis(100))
                .unwrap();
            state = guard;
        }
    }

    /// Acquires a permit, releasing the slot automatically when dropped.
    pub fn acquire_permit(&self) -> Option<Permit<'_>> {
        match self.acquire() {
            AcquireOutcome::Acquired => Some(Permit {
                limiter: self,
                released: false,
            }),
            AcquireOutcome::Cleared => None,
        }
    }

    /// Runs `f` under a permit, releasing it on every exit path including
    /// panics (mirrors spec §4.1's `execute`).
    pub fn execute<T>(&self, f: impl FnOnce() -> T) -> Option<T> {
        let _permit = self.acquire_permit()?;
        Some(f())
    }

    /// Wakes every current waiter with `AcquireOutcome::Cleared` and resets
    /// the cleared flag so future callers queue normally again.
    pub fn clear_queue(&self) {
        let mut state = self.state.lock().unwrap();
        state.cleared = true;
        drop(state);
        self.condvar.notify_all();

        // Give waiters a moment to observe `cleared` and drain, then reset
        // so the limiter is usable again for new batches.
        std::thread::sleep(Duration::from_millis(150));
        let mut state = self.state.lock().unwrap();
        state.cleared = false;
    }

    pub fn update_config(&self, new_config: RateLimiterConfig) {
        let mut config = self.config.lock().unwrap();
        *config = new_config;
        drop(config);

        let mut state = self.state.lock().unwrap();
        state.current_tokens = state.current_tokens.min(new_config.max_tokens);
        drop(state);
        self.condvar.notify_all();
    }

    pub fn snapshot(&self) -> (f64, usize, usize) {
        let config = *self.config.lock().unwrap();
        let mut state = self.state.lock().unwrap();
        Self::refill_locked(&mut state, &config);
        (state.current_tokens, state.active_requests, state.queue.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn config(max_tokens: f64, refill: f64, max_concurrent: usize) -> RateLimiterConfig {
        RateLimiterConfig {
            max_tokens,
            refill_rate_per_sec: refill,
            max_concurrent,
        }
    }

    #[test]
    fn acquire_and_release_stay_within_bounds() {
        let limiter = RateLimiter::new(config(2.0, 100.0, 1));
        let permit = limiter.acquire_permit().expect("token available");
        let (_, active, _) = limiter.snapshot();
        assert_eq!(active, 1);
        permit.release();
        let (_, active, _) = limiter.snapshot();
        assert_eq!(active, 0);
    }

    #[test]
    fn concurrency_cap_is_respected() {
        let limiter = Arc::new(RateLimiter::new(config(100.0, 1000.0, 1)));
        let _first = limiter.acquire_permit().expect("first permit");

        let limiter_clone = limiter.clone();
        let handle = thread::spawn(move || limiter_clone.acquire_permit().is_some());

        thread::sleep(Duration::from_millis(50));
        let (_, active, _) = limiter.snapshot();
        assert_eq!(active, 1, "second caller must still be waiting");

        drop(_first);
        assert!(handle.join().unwrap());
    }

    #[test]
    fn clear_queue_wakes_waiters_without_granting_permit() {
        let limiter = Arc::new(RateLimiter::new(config(0.0, 0.0, 1)));
        let limiter_clone = limiter.clone();
        let handle = thread::spawn(move || limiter_clone.acquire());

        thread::sleep(Duration::from_millis(50));
        limiter.clear_queue();

        let outcome = handle.join().unwrap();
        assert_eq!(outcome, AcquireOutcome::Cleared);
    }

    #[test]
    fn fifo_order_is_honored() {
        let limiter = Arc::new(RateLimiter::new(config(1.0, 1000.0, 1)));
        let _hold = limiter.acquire_permit().expect("initial permit");

        let order = Arc::new(Mutex::new(Vec::new()));
        let mut handles = Vec::new();
        for i in 0..3 {
            let limiter = limiter.clone();
            let order = order.clone();
            handles.push(thread::spawn(move || {
                thread::sleep(Duration::from_millis(10 * i as u64));
                let permit = limiter.acquire_permit();
                order.lock().unwrap().push(i);
                drop(permit);
            }));
        }
        thread::sleep(Duration::from_millis(60));
        drop(_hold);
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
    }
}

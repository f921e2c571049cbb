//! Per-source flood control for relayed messages.
//!
//! Every source (a game slot or a chat-platform user) gets its own
//! [`TokenBucket`]. A message that finds a token is released immediately.
//! Otherwise it waits in that source's bounded FIFO queue until
//! [`RateLimiter::drain_ready`] finds tokens for it. A message that finds the
//! queue full is dropped, and only the first drop of an overflow episode asks
//! for a warning. The episode ends once the queue has fully drained.

use std::collections::{HashMap, VecDeque};
use std::hash::Hash;
use std::time::Duration;

use tokio::time::Instant;

// ---------------------------------------------------------------------------
// RateLimitConfig
// ---------------------------------------------------------------------------

/// Bucket and queue sizing, shared by every source of one limiter.
#[derive(Debug, Clone, PartialEq)]
pub struct RateLimitConfig {
    /// Burst size: messages a quiet source may send back to back.
    pub capacity: u32,
    /// Tokens added per second.
    pub refill_per_sec: f64,
    /// Messages held per source while it has no tokens.
    pub queue_depth: usize,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            capacity: 5,
            refill_per_sec: 1.0,
            queue_depth: 10,
        }
    }
}

// ---------------------------------------------------------------------------
// TokenBucket
// ---------------------------------------------------------------------------

/// Classic token bucket, refilled lazily from elapsed time.
#[derive(Debug, Clone)]
pub struct TokenBucket {
    capacity: f64,
    tokens: f64,
    refill_per_sec: f64,
    last: Instant,
}

impl TokenBucket {
    /// A full bucket.
    pub fn new(capacity: u32, refill_per_sec: f64, now: Instant) -> Self {
        let capacity = f64::from(capacity.max(1));
        Self {
            capacity,
            tokens: capacity,
            refill_per_sec: refill_per_sec.max(0.0),
            last: now,
        }
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        self.last = now;
    }

    /// Take one token if available.
    pub fn try_take(&mut self, now: Instant) -> bool {
        self.refill(now);
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    fn is_full(&mut self, now: Instant) -> bool {
        self.refill(now);
        self.tokens >= self.capacity
    }

    /// Time until the next token, zero if one is available and `None` if the
    /// bucket never refills.
    pub fn time_to_next(&mut self, now: Instant) -> Option<Duration> {
        self.refill(now);
        if self.tokens >= 1.0 {
            return Some(Duration::ZERO);
        }
        if self.refill_per_sec <= 0.0 {
            return None;
        }
        let wait = Duration::from_secs_f64((1.0 - self.tokens) / self.refill_per_sec);
        Some(wait.max(Duration::from_millis(1)))
    }
}

// ---------------------------------------------------------------------------
// Admission
// ---------------------------------------------------------------------------

/// Outcome of offering one message to the limiter.
#[derive(Debug, Clone, PartialEq)]
pub enum Admission<T> {
    /// Send it now.
    Ready(T),
    /// Held until tokens refill.
    Queued,
    /// Queue full; the message is gone.
    Dropped {
        /// First drop of this overflow episode. Callers warn on this one only.
        first: bool,
    },
}

// ---------------------------------------------------------------------------
// RateLimiter
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct Lane<T> {
    bucket: TokenBucket,
    queue: VecDeque<T>,
    overflowing: bool,
}

/// Token-bucket limiter keyed by source.
#[derive(Debug)]
pub struct RateLimiter<K, T> {
    config: RateLimitConfig,
    lanes: HashMap<K, Lane<T>>,
}

impl<K, T> RateLimiter<K, T>
where
    K: Clone + Eq + Hash,
{
    /// An empty limiter.
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            lanes: HashMap::new(),
        }
    }

    /// Offer `item` from `key`.
    ///
    /// A source with messages already waiting queues behind them even if a
    /// token has refilled, so per-source order is preserved.
    pub fn admit(&mut self, key: K, item: T, now: Instant) -> Admission<T> {
        let config = &self.config;
        let lane = self.lanes.entry(key).or_insert_with(|| Lane {
            bucket: TokenBucket::new(config.capacity, config.refill_per_sec, now),
            queue: VecDeque::new(),
            overflowing: false,
        });

        if lane.queue.is_empty() && lane.bucket.try_take(now) {
            return Admission::Ready(item);
        }
        if lane.queue.len() < config.queue_depth {
            lane.queue.push_back(item);
            return Admission::Queued;
        }
        let first = !lane.overflowing;
        lane.overflowing = true;
        Admission::Dropped { first }
    }

    /// Release queued messages whose source has tokens again, oldest first
    /// within each source. Idle sources are forgotten.
    pub fn drain_ready(&mut self, now: Instant) -> Vec<(K, T)> {
        let mut released = Vec::new();
        for (key, lane) in &mut self.lanes {
            while !lane.queue.is_empty() && lane.bucket.try_take(now) {
                if let Some(item) = lane.queue.pop_front() {
                    released.push((key.clone(), item));
                }
            }
            if lane.queue.is_empty() {
                lane.overflowing = false;
            }
        }
        self.lanes
            .retain(|_, lane| !lane.queue.is_empty() || !lane.bucket.is_full(now));
        released
    }

    /// Messages waiting across all sources.
    pub fn pending(&self) -> usize {
        self.lanes.values().map(|lane| lane.queue.len()).sum()
    }

    /// Shortest wait until some queued message can be released.
    pub fn next_release(&mut self, now: Instant) -> Option<Duration> {
        self.lanes
            .values_mut()
            .filter(|lane| !lane.queue.is_empty())
            .filter_map(|lane| lane.bucket.time_to_next(now))
            .min()
    }

    /// Drop every queued message and return how many there were.
    pub fn clear(&mut self) -> usize {
        let dropped = self.pending();
        self.lanes.clear();
        dropped
    }

    #[cfg(test)]
    fn sources(&self) -> usize {
        self.lanes.len()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(capacity: u32, refill_per_sec: f64, queue_depth: usize) -> RateLimiter<u32, usize> {
        RateLimiter::new(RateLimitConfig {
            capacity,
            refill_per_sec,
            queue_depth,
        })
    }

    #[test]
    fn test_bucket_refills_up_to_capacity() {
        let t0 = Instant::now();
        let mut bucket = TokenBucket::new(2, 1.0, t0);
        assert!(bucket.try_take(t0));
        assert!(bucket.try_take(t0));
        assert!(!bucket.try_take(t0));
        assert_eq!(bucket.time_to_next(t0), Some(Duration::from_secs(1)));

        let t1 = t0 + Duration::from_millis(1500);
        assert!(bucket.try_take(t1));
        assert!(!bucket.try_take(t1));
        assert_eq!(bucket.time_to_next(t1), Some(Duration::from_millis(500)));

        let t2 = t1 + Duration::from_secs(60);
        assert!(bucket.try_take(t2));
        assert!(bucket.try_take(t2));
        assert!(!bucket.try_take(t2));
    }

    #[test]
    fn test_bucket_without_refill_never_wakes() {
        let t0 = Instant::now();
        let mut bucket = TokenBucket::new(1, 0.0, t0);
        assert_eq!(bucket.time_to_next(t0), Some(Duration::ZERO));
        assert!(bucket.try_take(t0));
        assert_eq!(bucket.time_to_next(t0 + Duration::from_secs(3600)), None);
    }

    #[test]
    fn test_burst_beyond_capacity_is_queued_then_dropped_with_one_warning() {
        let now = Instant::now();
        let mut limiter = limiter(5, 1.0, 3);

        let outcomes: Vec<_> = (0..10).map(|i| limiter.admit(3, i, now)).collect();

        let ready: Vec<_> = outcomes
            .iter()
            .filter_map(|a| match a {
                Admission::Ready(i) => Some(*i),
                _ => None,
            })
            .collect();
        assert_eq!(ready, vec![0, 1, 2, 3, 4]);
        assert_eq!(outcomes.iter().filter(|a| **a == Admission::Queued).count(), 3);
        assert_eq!(
            outcomes
                .iter()
                .filter(|a| matches!(a, Admission::Dropped { first: true }))
                .count(),
            1
        );
        assert_eq!(outcomes[9], Admission::Dropped { first: false });
        assert_eq!(limiter.pending(), 3);
    }

    #[test]
    fn test_queue_drains_in_order_as_tokens_refill() {
        let t0 = Instant::now();
        let mut limiter = limiter(1, 2.0, 4);
        assert_eq!(limiter.admit(1, 10, t0), Admission::Ready(10));
        assert_eq!(limiter.admit(1, 11, t0), Admission::Queued);
        assert_eq!(limiter.admit(1, 12, t0), Admission::Queued);

        assert!(limiter.drain_ready(t0).is_empty());
        assert_eq!(limiter.next_release(t0), Some(Duration::from_millis(500)));
        assert_eq!(limiter.drain_ready(t0 + Duration::from_millis(500)), vec![(1, 11)]);
        assert_eq!(limiter.drain_ready(t0 + Duration::from_millis(1000)), vec![(1, 12)]);
        assert_eq!(limiter.pending(), 0);
    }

    #[test]
    fn test_waiting_messages_keep_their_place() {
        let t0 = Instant::now();
        let mut limiter = limiter(1, 1.0, 4);
        assert_eq!(limiter.admit(1, 1, t0), Admission::Ready(1));
        assert_eq!(limiter.admit(1, 2, t0), Admission::Queued);
        // A token is back, but message 2 is still ahead of 3.
        assert_eq!(limiter.admit(1, 3, t0 + Duration::from_secs(1)), Admission::Queued);
        assert_eq!(limiter.drain_ready(t0 + Duration::from_secs(1)), vec![(1, 2)]);
    }

    #[test]
    fn test_new_overflow_episode_warns_again() {
        let t0 = Instant::now();
        let mut limiter = limiter(1, 1.0, 1);
        assert_eq!(limiter.admit(1, 0, t0), Admission::Ready(0));
        assert_eq!(limiter.admit(1, 1, t0), Admission::Queued);
        assert_eq!(limiter.admit(1, 2, t0), Admission::Dropped { first: true });
        assert_eq!(limiter.admit(1, 3, t0), Admission::Dropped { first: false });

        let t1 = t0 + Duration::from_secs(1);
        assert_eq!(limiter.drain_ready(t1), vec![(1, 1)]);

        let t2 = t1 + Duration::from_secs(1);
        assert_eq!(limiter.admit(1, 4, t2), Admission::Ready(4));
        assert_eq!(limiter.admit(1, 5, t2), Admission::Queued);
        assert_eq!(limiter.admit(1, 6, t2), Admission::Dropped { first: true });
    }

    #[test]
    fn test_sources_are_limited_independently() {
        let now = Instant::now();
        let mut limiter = limiter(1, 1.0, 0);
        assert_eq!(limiter.admit(1, 0, now), Admission::Ready(0));
        assert_eq!(limiter.admit(2, 0, now), Admission::Ready(0));
        assert_eq!(limiter.admit(1, 1, now), Admission::Dropped { first: true });
        assert_eq!(limiter.sources(), 2);
    }

    #[test]
    fn test_clear_drops_queued_messages() {
        let t0 = Instant::now();
        let mut limiter = limiter(1, 1.0, 4);
        assert_eq!(limiter.admit(1, 0, t0), Admission::Ready(0));
        assert_eq!(limiter.admit(1, 1, t0), Admission::Queued);
        assert_eq!(limiter.admit(2, 0, t0), Admission::Ready(0));
        assert_eq!(limiter.clear(), 1);
        assert_eq!(limiter.pending(), 0);
        assert_eq!(limiter.next_release(t0), None);
        assert!(limiter.drain_ready(t0 + Duration::from_secs(5)).is_empty());
    }

    #[test]
    fn test_idle_sources_are_forgotten() {
        let t0 = Instant::now();
        let mut limiter = limiter(2, 1.0, 2);
        assert_eq!(limiter.admit(7, 0, t0), Admission::Ready(0));
        limiter.drain_ready(t0);
        assert_eq!(limiter.sources(), 1);
        limiter.drain_ready(t0 + Duration::from_secs(5));
        assert_eq!(limiter.sources(), 0);
    }
}

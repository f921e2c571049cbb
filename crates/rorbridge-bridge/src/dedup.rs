//! Echo suppression for relayed game chat.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use rorbridge_net::Slot;
use tokio::time::Instant;

/// Remembers the last `depth` relayed lines per slot for `window`.
#[derive(Debug)]
pub struct DedupWindow {
    depth: usize,
    window: Duration,
    recent: HashMap<Slot, VecDeque<(String, Instant)>>,
}

impl DedupWindow {
    /// Empty history; a `depth` of zero turns suppression off.
    pub fn new(depth: usize, window: Duration) -> Self {
        Self {
            depth,
            window,
            recent: HashMap::new(),
        }
    }

    /// `true` if `text` from `slot` was relayed within the window. Otherwise
    /// the line is recorded and `false` is returned.
    pub fn check(&mut self, slot: Slot, text: &str, now: Instant) -> bool {
        if self.depth == 0 {
            return false;
        }
        let history = self.recent.entry(slot).or_default();
        while history
            .front()
            .is_some_and(|(_, at)| now.saturating_duration_since(*at) > self.window)
        {
            history.pop_front();
        }
        if history.iter().any(|(seen, _)| seen == text) {
            return true;
        }
        if history.len() == self.depth {
            history.pop_front();
        }
        history.push_back((text.to_string(), now));
        false
    }

    /// Drop everything remembered about `slot`. Slots are reused.
    pub fn forget(&mut self, slot: Slot) {
        self.recent.remove(&slot);
    }

    /// Forget every slot, as after a reconnect.
    pub fn clear(&mut self) {
        self.recent.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identical_lines_within_window_pass_once() {
        let t0 = Instant::now();
        let mut dedup = DedupWindow::new(5, Duration::from_secs(10));
        let relayed = (0..4)
            .filter(|i| !dedup.check(3, "hello", t0 + Duration::from_secs(*i)))
            .count();
        assert_eq!(relayed, 1);
    }

    #[test]
    fn test_window_expiry_allows_repeat() {
        let t0 = Instant::now();
        let mut dedup = DedupWindow::new(5, Duration::from_secs(10));
        assert!(!dedup.check(3, "gg", t0));
        assert!(!dedup.check(3, "gg", t0 + Duration::from_secs(11)));
    }

    #[test]
    fn test_history_is_per_slot_and_bounded() {
        let t0 = Instant::now();
        let mut dedup = DedupWindow::new(2, Duration::from_secs(60));
        assert!(!dedup.check(3, "a", t0));
        assert!(!dedup.check(4, "a", t0));
        assert!(!dedup.check(3, "b", t0));
        assert!(!dedup.check(3, "c", t0));
        // "a" was pushed out of slot 3's two-line history.
        assert!(!dedup.check(3, "a", t0));
        assert!(dedup.check(3, "c", t0));
    }

    #[test]
    fn test_forget_resets_reused_slot() {
        let t0 = Instant::now();
        let mut dedup = DedupWindow::new(5, Duration::from_secs(60));
        assert!(!dedup.check(3, "hi", t0));
        dedup.forget(3);
        assert!(!dedup.check(3, "hi", t0));
    }

    #[test]
    fn test_clear_forgets_every_slot() {
        let t0 = Instant::now();
        let mut dedup = DedupWindow::new(5, Duration::from_secs(60));
        assert!(!dedup.check(3, "hi", t0));
        assert!(!dedup.check(4, "hi", t0));
        dedup.clear();
        assert!(!dedup.check(3, "hi", t0));
        assert!(!dedup.check(4, "hi", t0));
    }
}

//! Rapid-input detection for navigation calls.
//!
//! When next/previous requests arrive in quick succession the presentation
//! layer wants to skip transition animation and redraw instantly. The
//! detector flags "fast mode" once enough calls land inside a short window
//! and clears it as soon as input spacing relaxes. Uses a monotonic clock
//! so system time jumps never trip it.
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct BurstDetector {
    window: Duration,
    threshold: u32,
    last_call: Option<Instant>,
    streak: u32,
}

impl BurstDetector {
    pub fn new(window: Duration, threshold: u32) -> Self {
        Self { window, threshold: threshold.max(1), last_call: None, streak: 0 }
    }

    /// Record a navigation call at `now` and report whether fast mode is
    /// active. Calls spaced outside the window reset the streak.
    pub fn record(&mut self, now: Instant) -> bool {
        match self.last_call {
            Some(last) if now.saturating_duration_since(last) <= self.window => {
                self.streak = self.streak.saturating_add(1);
            }
            _ => self.streak = 1,
        }
        self.last_call = Some(now);
        self.is_fast()
    }

    /// Whether the current streak has crossed the threshold.
    pub fn is_fast(&self) -> bool {
        self.streak >= self.threshold
    }

    /// Unconditionally drop out of fast mode (used whenever revision mode
    /// is active, where animation skipping never applies).
    pub fn reset(&mut self) {
        self.streak = 0;
        self.last_call = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detector() -> BurstDetector {
        BurstDetector::new(Duration::from_millis(450), 3)
    }

    #[test]
    fn test_slow_input_never_fast() {
        let mut d = detector();
        let t0 = Instant::now();
        assert!(!d.record(t0));
        assert!(!d.record(t0 + Duration::from_secs(1)));
        assert!(!d.record(t0 + Duration::from_secs(2)));
    }

    #[test]
    fn test_burst_trips_threshold() {
        let mut d = detector();
        let t0 = Instant::now();
        assert!(!d.record(t0));
        assert!(!d.record(t0 + Duration::from_millis(100)));
        assert!(d.record(t0 + Duration::from_millis(200)));
        // Stays fast while the cadence holds
        assert!(d.record(t0 + Duration::from_millis(300)));
    }

    #[test]
    fn test_gap_resets_streak() {
        let mut d = detector();
        let t0 = Instant::now();
        d.record(t0);
        d.record(t0 + Duration::from_millis(100));
        d.record(t0 + Duration::from_millis(200));
        assert!(d.is_fast());

        // A pause beyond the window subsides the burst
        assert!(!d.record(t0 + Duration::from_millis(1200)));
        assert!(!d.is_fast());
    }

    #[test]
    fn test_reset_clears_state() {
        let mut d = detector();
        let t0 = Instant::now();
        d.record(t0);
        d.record(t0 + Duration::from_millis(50));
        d.record(t0 + Duration::from_millis(100));
        assert!(d.is_fast());
        d.reset();
        assert!(!d.is_fast());
        assert!(!d.record(t0 + Duration::from_millis(150)));
    }
}

//! Nofeedback timer (RFC 5348 §4.4).
//!
//! Runs from the last feedback (or the first data packet, before any
//! feedback) and expires after `max(4·RTT, 2·s/X)`. Without an RTT sample
//! the timeout is at least [`NOFEEDBACK_INITIAL`]. Each expiry restarts the
//! timer. Expiries with data outstanding are counted until feedback arrives;
//! an idle sender never accumulates them.

use std::time::Duration;

use quanta::Instant;

/// Timeout before the first RTT sample.
pub const NOFEEDBACK_INITIAL: Duration = Duration::from_secs(2);
const WEIGHT_NEW: u32 = 1;
const WEIGHT_OLD: u32 = 2;

#[derive(Debug, Clone, Default)]
pub struct NofeedbackTimer {
    started: Option<Instant>,
    last_data: Option<Instant>,
    /// Smoothed spacing of data packets.
    data_interval: Option<Duration>,
    rtt: Option<Duration>,
    /// Data sent since the last feedback.
    outstanding: bool,
    expiries: u32,
}

impl NofeedbackTimer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_rtt(&mut self, rtt: Duration) {
        self.rtt = Some(rtt);
    }

    pub fn on_feedback(&mut self, now: Instant) {
        self.started = Some(now);
        self.outstanding = false;
        self.expiries = 0;
    }

    pub fn on_data_sent(&mut self, now: Instant) {
        if self.started.is_none() {
            self.started = Some(now);
        }
        self.outstanding = true;
        let Some(prev) = self.last_data.replace(now) else {
            return;
        };
        let d = now.saturating_duration_since(prev);
        if d.is_zero() {
            return;
        }
        self.data_interval = Some(match self.data_interval {
            None => d,
            Some(old) => (d * WEIGHT_NEW + old * WEIGHT_OLD) / (WEIGHT_NEW + WEIGHT_OLD),
        });
    }

    pub fn timeout(&self) -> Duration {
        let spacing = self.data_interval.map(|d| d * 2).unwrap_or_default();
        match self.rtt {
            Some(rtt) => (rtt * 4).max(spacing),
            None => NOFEEDBACK_INITIAL.max(spacing),
        }
    }

    /// Check for expiry at `now`. An expiry restarts the timer.
    pub fn poll(&mut self, now: Instant) -> bool {
        let Some(started) = self.started else {
            return false;
        };
        if now.saturating_duration_since(started) < self.timeout() {
            return false;
        }
        self.started = Some(now);
        if self.outstanding {
            self.expiries += 1;
        }
        true
    }

    /// Expiries with data outstanding since the last feedback.
    pub fn expiries(&self) -> u32 {
        self.expiries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idle_before_any_traffic() {
        let mut t = NofeedbackTimer::new();
        assert!(!t.poll(Instant::now() + Duration::from_secs(100)));
    }

    #[test]
    fn initial_timeout_without_rtt() {
        let base = Instant::now();
        let mut t = NofeedbackTimer::new();
        t.on_data_sent(base);
        assert!(!t.poll(base + Duration::from_millis(1999)));
        assert!(t.poll(base + Duration::from_secs(2)));
        assert_eq!(t.expiries(), 1);
    }

    #[test]
    fn four_rtts_or_two_intervals() {
        let base = Instant::now();
        let mut t = NofeedbackTimer::new();
        t.on_rtt(Duration::from_millis(10));
        t.on_feedback(base);
        assert_eq!(t.timeout(), Duration::from_millis(40));
        t.on_data_sent(base);
        t.on_data_sent(base + Duration::from_millis(30));
        assert_eq!(t.timeout(), Duration::from_millis(60));
    }

    #[test]
    fn feedback_clears_expiries() {
        let base = Instant::now();
        let mut t = NofeedbackTimer::new();
        t.on_rtt(Duration::from_millis(10));
        t.on_feedback(base);
        assert!(t.poll(base + Duration::from_millis(40)));
        assert_eq!(t.expiries(), 0, "nothing outstanding");
        t.on_data_sent(base + Duration::from_millis(40));
        let mut now = base + Duration::from_millis(40);
        for _ in 0..3 {
            now += Duration::from_millis(40);
            assert!(t.poll(now));
        }
        assert_eq!(t.expiries(), 3);
        t.on_feedback(now);
        assert_eq!(t.expiries(), 0);
        assert!(!t.poll(now + Duration::from_millis(39)));
    }
}

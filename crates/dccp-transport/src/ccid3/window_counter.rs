//! Sender window counter (RFC 4342 §8.1).
//!
//! A 4-bit counter stamped into every data packet's CCVal. It advances by
//! one per quarter RTT, at most five at a time, and is raised to at least
//! four past the counter of the last acknowledged packet so the receiver
//! keeps sending feedback.

use std::collections::VecDeque;
use std::time::Duration;

use quanta::Instant;

pub const WINDOW_COUNTER_MOD: u8 = 16;
const WINDOW_COUNTER_HALF: u8 = WINDOW_COUNTER_MOD / 2;
const MAX_ADVANCE: u64 = 5;

/// Sent packets remembered for resolving which counter an ack covers.
pub const WINDOW_COUNTER_HISTORY: usize = 64;

/// Strict circular `x < y` for window-counter values.
#[inline]
pub fn wc_less(x: u8, y: u8) -> bool {
    let d = y.wrapping_sub(x) % WINDOW_COUNTER_MOD;
    d != 0 && d < WINDOW_COUNTER_HALF
}

#[inline]
pub fn wc_add(x: u8, n: u8) -> u8 {
    x.wrapping_add(n) % WINDOW_COUNTER_MOD
}

#[derive(Debug, Clone, Default)]
pub struct WindowCounter {
    counter: u8,
    /// When `counter` last advanced.
    last_time: Option<Instant>,
    history: VecDeque<(u64, u8)>,
}

impl WindowCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Counter for a packet sent now, advancing it if quarter RTTs passed.
    pub fn tick(&mut self, rtt: Duration, now: Instant) -> u8 {
        let Some(last) = self.last_time else {
            self.last_time = Some(now);
            return self.counter;
        };
        let quarter = (rtt / 4).as_nanos().max(1);
        let quarters = (now.saturating_duration_since(last).as_nanos() / quarter) as u64;
        if quarters > 0 {
            self.counter = wc_add(self.counter, quarters.min(MAX_ADVANCE) as u8);
            self.last_time = Some(now);
        }
        self.counter
    }

    /// Stamp `seq` with the current counter and remember it.
    pub fn on_write(&mut self, seq: u64, rtt: Duration, now: Instant) -> u8 {
        let c = self.tick(rtt, now);
        if self.history.len() == WINDOW_COUNTER_HISTORY {
            self.history.pop_front();
        }
        self.history.push_back((seq, c));
        c
    }

    /// Counter that was stamped on `seq`, if still remembered.
    pub fn lookup(&self, seq: u64) -> Option<u8> {
        self.history
            .iter()
            .rev()
            .find(|(s, _)| *s == seq)
            .map(|(_, c)| *c)
    }

    /// Feedback acknowledged `ack`: keep the counter at least four ahead of
    /// the one that packet carried.
    pub fn on_ack(&mut self, ack: u64, rtt: Duration, now: Instant) {
        let Some(acked) = self.lookup(ack) else {
            return;
        };
        let at_least = wc_add(acked, 4);
        let would = self.tick(rtt, now);
        if wc_less(would, at_least) {
            self.counter = at_least;
            self.last_time = Some(now);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RTT: Duration = Duration::from_millis(100);

    #[test]
    fn circular_less() {
        assert!(wc_less(0, 1));
        assert!(wc_less(15, 2));
        assert!(!wc_less(2, 15));
        assert!(!wc_less(3, 3));
        assert!(!wc_less(0, 8));
    }

    #[test]
    fn advances_per_quarter_rtt_capped_at_five() {
        let base = Instant::now();
        let mut wc = WindowCounter::new();
        assert_eq!(wc.on_write(1, RTT, base), 0);
        assert_eq!(wc.on_write(2, RTT, base + Duration::from_millis(10)), 0);
        assert_eq!(wc.on_write(3, RTT, base + Duration::from_millis(50)), 2);
        // a long idle spell still moves at most five
        assert_eq!(wc.on_write(4, RTT, base + Duration::from_secs(10)), 7);
        assert_eq!(wc.lookup(3), Some(2));
        assert_eq!(wc.lookup(99), None);
    }

    #[test]
    fn ack_pushes_counter_forward() {
        let base = Instant::now();
        let mut wc = WindowCounter::new();
        wc.on_write(1, RTT, base);
        wc.on_write(2, RTT, base + Duration::from_millis(30));
        assert_eq!(wc.counter, 1);
        wc.on_ack(2, RTT, base + Duration::from_millis(31));
        assert_eq!(wc.counter, 5);
    }

    #[test]
    fn wraps_mod_sixteen() {
        let base = Instant::now();
        let mut wc = WindowCounter::new();
        let mut t = base;
        wc.on_write(0, RTT, t);
        for seq in 1..=4 {
            t += Duration::from_secs(1);
            wc.on_write(seq, RTT, t);
        }
        assert_eq!(wc.counter, 20 % 16);
    }
}

//! Round-trip time estimation for both halves.
//!
//! The sender matches acknowledgements against a ring of recent send times
//! and subtracts the receiver's ElapsedTime. The receiver prefers the
//! sender's RoundtripReport and falls back on window-counter spacing
//! (RFC 4342 §8.1): four counter increments span one RTT.

use std::time::Duration;

use quanta::Instant;

use super::window_counter::{wc_less, WINDOW_COUNTER_MOD};

/// Send times remembered for matching acks.
pub const SENDER_RTT_HISTORY: usize = 20;
const WEIGHT_NEW: u32 = 1;
const WEIGHT_OLD: u32 = 9;

/// How long a receiver-side sample stays usable.
pub const RECEIVER_RTT_FRESHNESS: Duration = Duration::from_secs(1);

// ─── Sender ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct SenderRtt {
    estimate: Option<Duration>,
    history: [Option<(u64, Instant)>; SENDER_RTT_HISTORY],
    next: usize,
    default: Duration,
}

impl SenderRtt {
    pub fn new(default: Duration) -> Self {
        SenderRtt {
            estimate: None,
            history: [None; SENDER_RTT_HISTORY],
            next: 0,
            default,
        }
    }

    pub fn on_write(&mut self, seq: u64, now: Instant) {
        self.history[self.next] = Some((seq, now));
        self.next = (self.next + 1) % SENDER_RTT_HISTORY;
    }

    fn sent_at(&self, seq: u64) -> Option<Instant> {
        self.history
            .iter()
            .flatten()
            .find(|(s, _)| *s == seq)
            .map(|(_, t)| *t)
    }

    /// Fold in an acknowledgement of `ack` that arrived at `time` after the
    /// peer held it for `elapsed`. Returns the raw sample, if one was taken.
    pub fn on_ack(&mut self, ack: u64, elapsed: Duration, time: Instant) -> Option<Duration> {
        let sent = self.sent_at(ack)?;
        let flight = time.saturating_duration_since(sent).checked_sub(elapsed)?;
        let sample = flight / 2;
        if sample.is_zero() {
            return None;
        }
        self.estimate = Some(match self.estimate {
            None => sample,
            Some(old) => (sample * WEIGHT_NEW + old * WEIGHT_OLD) / (WEIGHT_NEW + WEIGHT_OLD),
        });
        Some(sample)
    }

    pub fn rtt(&self) -> Duration {
        self.estimate.unwrap_or(self.default)
    }

    pub fn has_rtt(&self) -> bool {
        self.estimate.is_some()
    }
}

// ─── Receiver ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ReceiverRtt {
    report: Option<(Duration, Instant)>,
    ccval_estimate: Option<(Duration, Instant)>,
    ccval_now: Option<u8>,
    /// First arrival time per window-counter value.
    ccval_time: [Option<Instant>; WINDOW_COUNTER_MOD as usize],
    default: Duration,
}

impl ReceiverRtt {
    pub fn new(default: Duration) -> Self {
        ReceiverRtt {
            report: None,
            ccval_estimate: None,
            ccval_now: None,
            ccval_time: [None; WINDOW_COUNTER_MOD as usize],
            default,
        }
    }

    pub fn on_report(&mut self, rtt: Duration, now: Instant) {
        if !rtt.is_zero() {
            self.report = Some((rtt, now));
        }
    }

    pub fn on_ccval(&mut self, ccval: u8, now: Instant) {
        let c = ccval % WINDOW_COUNTER_MOD;
        match self.ccval_now {
            None => {
                self.ccval_time = [None; WINDOW_COUNTER_MOD as usize];
            }
            Some(cur) if c == cur => return,
            Some(cur) if wc_less(c, cur) => return,
            Some(_) => {}
        }
        self.ccval_now = Some(c);
        self.ccval_time[c as usize] = Some(now);
        // The forward half holds values from the previous lap.
        for i in 1..WINDOW_COUNTER_MOD / 2 {
            self.ccval_time[((c + i) % WINDOW_COUNTER_MOD) as usize] = None;
        }
        self.estimate_from_ccval();
    }

    fn estimate_from_ccval(&mut self) {
        let Some(c) = self.ccval_now else {
            return;
        };
        let Some(t0) = self.ccval_time[c as usize] else {
            return;
        };
        let back = |d: u8| self.ccval_time[((c + WINDOW_COUNTER_MOD - d) % WINDOW_COUNTER_MOD) as usize];
        let found = [4u8, 3, 2]
            .into_iter()
            .find_map(|q| back(q).map(|t1| (q, t1)));
        if let Some((q, t1)) = found {
            let span = t0.saturating_duration_since(t1);
            if !span.is_zero() {
                self.ccval_estimate = Some((span * 4 / u32::from(q), t0));
            }
        }
    }

    pub fn rtt(&self, now: Instant) -> Duration {
        let fresh = |(rtt, at): (Duration, Instant)| {
            (now.saturating_duration_since(at) < RECEIVER_RTT_FRESHNESS).then_some(rtt)
        };
        self.report
            .and_then(fresh)
            .or_else(|| self.ccval_estimate.and_then(fresh))
            .unwrap_or(self.default)
    }
}

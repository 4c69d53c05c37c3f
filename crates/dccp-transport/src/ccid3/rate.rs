//! Allowed sending rate `X` (RFC 5348 §4.2–4.5).
//!
//! Before the first feedback the sender trickles one segment per second.
//! The first feedback sets `X = W_init/R`. Without reported loss the rate
//! then doubles at most once per RTT (slow start); once the receiver reports
//! a loss event rate the throughput equation takes over. Either way `X` is
//! capped by a receive limit derived from the rates the receiver reports,
//! and never drops below one segment per [`T_MBI`].

use std::collections::VecDeque;
use std::time::Duration;

use quanta::Instant;
use serde::Serialize;

use super::equation::throughput;
use super::options::UNKNOWN_LOSS_EVENT_RATE_INV;

/// Largest initial window, bytes (RFC 5348 §4.2).
pub const X_MAX_INIT_WIN: u64 = 4380;
/// Maximum back-off interval: the floor is one segment per `T_MBI`.
pub const T_MBI: Duration = Duration::from_secs(64);
/// Receive rates remembered for the receive limit.
pub const RECV_SET_CAPACITY: usize = 3;

const DATA_LIMITED_LOSS_SCALE: f64 = 0.85;
const SQMEAN_WEIGHT: f64 = 0.9;

/// Everything one feedback packet tells the rate calculator.
#[derive(Debug, Clone, Copy)]
pub struct RateFeedback {
    pub now: Instant,
    /// Smoothed RTT.
    pub rtt: Duration,
    /// The raw sample this feedback produced, if any.
    pub rtt_sample: Option<Duration>,
    /// Receiver-reported rate, bytes/s.
    pub recv_rate: u64,
    pub rate_inv: u32,
    pub new_loss: bool,
    /// The sender wrote less than the allowed rate since the previous feedback.
    pub data_limited: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RatePhase {
    /// No feedback yet.
    Initial,
    SlowStart,
    Equation,
}

#[derive(Debug, Clone)]
pub struct RateCalculator {
    x: u64,
    ss: u32,
    phase: RatePhase,
    /// Time last doubled.
    tld: Option<Instant>,
    recv_set: VecDeque<u64>,
    recv_limit: u64,
    oscillation_reduction: bool,
    /// Running mean of √RTT, seconds^½.
    sqmean: Option<f64>,
    last_sample_sqrt: Option<f64>,
}

impl RateCalculator {
    pub fn new(ss: u32, oscillation_reduction: bool) -> Self {
        let ss = ss.max(1);
        RateCalculator {
            x: u64::from(ss),
            ss,
            phase: RatePhase::Initial,
            tld: None,
            recv_set: VecDeque::with_capacity(RECV_SET_CAPACITY),
            recv_limit: u64::MAX,
            oscillation_reduction,
            sqmean: None,
            last_sample_sqrt: None,
        }
    }

    pub fn x(&self) -> u64 {
        self.x
    }

    pub fn ss(&self) -> u32 {
        self.ss
    }

    pub fn phase(&self) -> RatePhase {
        self.phase
    }

    pub fn recv_limit(&self) -> u64 {
        self.recv_limit
    }

    /// One segment per `T_MBI`.
    pub fn floor(&self) -> u64 {
        (u64::from(self.ss) / T_MBI.as_secs()).max(1)
    }

    fn initial_rate(&self, rtt: Duration) -> u64 {
        let ss = u64::from(self.ss);
        let w_init = (4 * ss).min((2 * ss).max(X_MAX_INIT_WIN));
        per_rtt(w_init, rtt)
    }

    pub fn on_feedback(&mut self, fb: RateFeedback) {
        self.track_sqmean(fb.rtt_sample);
        self.update_recv_limit(&fb);

        let has_loss = fb.rate_inv != UNKNOWN_LOSS_EVENT_RATE_INV;
        if self.phase == RatePhase::Initial && !has_loss {
            self.x = self.initial_rate(fb.rtt);
            self.tld = Some(fb.now);
            self.phase = RatePhase::SlowStart;
            return;
        }

        if has_loss {
            self.phase = RatePhase::Equation;
            let x_eq = throughput(self.ss, fb.rtt, fb.rate_inv);
            self.x = x_eq.min(self.recv_limit).max(self.floor());
            return;
        }

        let due = self
            .tld
            .map_or(true, |t| fb.now.saturating_duration_since(t) >= fb.rtt);
        if due {
            let doubled = self.x.saturating_mul(2).min(self.recv_limit);
            self.x = doubled.max(self.initial_rate(fb.rtt));
            self.tld = Some(fb.now);
        }
    }

    fn update_recv_limit(&mut self, fb: &RateFeedback) {
        let max_set = |set: &VecDeque<u64>| set.iter().copied().max().unwrap_or(0);
        if fb.data_limited {
            if fb.new_loss {
                for r in self.recv_set.iter_mut() {
                    *r /= 2;
                }
                let scaled = (fb.recv_rate as f64 * DATA_LIMITED_LOSS_SCALE) as u64;
                let m = max_set(&self.recv_set).max(scaled);
                self.recv_set.clear();
                self.recv_set.push_back(m);
                self.recv_limit = m;
            } else {
                let m = max_set(&self.recv_set).max(fb.recv_rate);
                self.recv_set.clear();
                self.recv_set.push_back(m);
                self.recv_limit = m.saturating_mul(2);
            }
        } else {
            if fb.new_loss {
                self.recv_set.clear();
            }
            if self.recv_set.len() == RECV_SET_CAPACITY {
                self.recv_set.pop_front();
            }
            self.recv_set.push_back(fb.recv_rate);
            self.recv_limit = max_set(&self.recv_set).saturating_mul(2);
        }
        // A receiver that has seen nothing yet must not stall the sender.
        self.recv_limit = self.recv_limit.max(self.initial_rate(fb.rtt));
    }

    fn track_sqmean(&mut self, sample: Option<Duration>) {
        let Some(sample) = sample else {
            return;
        };
        let root = sample.as_secs_f64().sqrt();
        self.last_sample_sqrt = Some(root);
        self.sqmean = Some(match self.sqmean {
            None => root,
            Some(m) => SQMEAN_WEIGHT * m + (1.0 - SQMEAN_WEIGHT) * root,
        });
    }

    /// Nofeedback expiry: halve `X`, not below the floor.
    pub fn on_nofeedback(&mut self) {
        self.x = (self.x / 2).max(self.floor());
    }

    /// Rate to pace at. With oscillation reduction this is
    /// `X · R_sqmean / √R_sample`.
    pub fn pacing_rate(&self) -> u64 {
        if !self.oscillation_reduction {
            return self.x;
        }
        match (self.sqmean, self.last_sample_sqrt) {
            (Some(mean), Some(root)) if root > 0.0 => {
                ((self.x as f64) * (mean / root)).max(self.floor() as f64) as u64
            }
            _ => self.x,
        }
    }
}

/// `bytes` per `rtt`, as bytes/s.
fn per_rtt(bytes: u64, rtt: Duration) -> u64 {
    let ns = rtt.as_nanos().max(1);
    (u128::from(bytes) * 1_000_000_000 / ns).min(u128::from(u64::MAX)) as u64
}

//! Receiver-side loss tracking.
//!
//! Arrivals first pass through a reorder buffer of [`NDUPACK`] slots so that
//! a packet overtaken by at most three later ones is not mistaken for a loss.
//! Whatever falls out of the buffer feeds the [`IntervalBuilder`]; finished
//! intervals go into a bounded history that, together with the interval in
//! progress, drives the loss event rate.

use std::collections::VecDeque;
use std::time::Duration;

use super::interval::{Arrival, IntervalBuilder, LossIntervalDetail};
use super::loss_rate::{LossRateCalculator, NINTERVAL};
use super::options::{LossDigest, LossIntervals, MAX_LOSS_INTERVALS};
use crate::seq::{seq_lt, seq_max};

/// Later arrivals needed before a gap counts as loss.
pub const NDUPACK: usize = 3;

// ─── Loss History ───────────────────────────────────────────────────────────

/// Most recent finished intervals, newest first.
#[derive(Debug, Clone)]
pub struct LossHistory {
    intervals: VecDeque<LossIntervalDetail>,
    capacity: usize,
}

impl LossHistory {
    pub fn new(capacity: usize) -> Self {
        LossHistory {
            intervals: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, d: LossIntervalDetail) {
        if self.intervals.len() == self.capacity {
            self.intervals.pop_back();
        }
        self.intervals.push_front(d);
    }

    pub fn len(&self) -> usize {
        self.intervals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.intervals.is_empty()
    }

    /// `i = 0` is the newest.
    pub fn get(&self, i: usize) -> Option<&LossIntervalDetail> {
        self.intervals.get(i)
    }

    pub fn iter(&self) -> impl Iterator<Item = &LossIntervalDetail> {
        self.intervals.iter()
    }
}

// ─── Tracker ────────────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct ReceiverLossTracker {
    reorder: [Option<Arrival>; NDUPACK],
    builder: IntervalBuilder,
    history: LossHistory,
    calc: LossRateCalculator,
    /// `builder.opened()` at the previous digest.
    digested: u64,
}

impl Default for ReceiverLossTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ReceiverLossTracker {
    pub fn new() -> Self {
        ReceiverLossTracker {
            reorder: [None; NDUPACK],
            builder: IntervalBuilder::new(),
            history: LossHistory::new(NINTERVAL),
            calc: LossRateCalculator::new(NINTERVAL),
            digested: 0,
        }
    }

    /// Insert `a`, returning the oldest buffered arrival once the buffer
    /// is full. The incoming packet itself is returned if it is the oldest.
    fn push_pop(&mut self, a: Arrival) -> Option<Arrival> {
        if let Some(slot) = self.reorder.iter_mut().find(|s| s.is_none()) {
            *slot = Some(a);
            return None;
        }
        let (idx, oldest) = self
            .reorder
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.map(|s| (i, s)))
            .reduce(|x, y| if seq_lt(y.1.seq, x.1.seq) { y } else { x })?;
        if seq_lt(a.seq, oldest.seq) {
            return Some(a);
        }
        self.reorder[idx] = Some(a);
        Some(oldest)
    }

    pub fn on_read(&mut self, a: Arrival, rtt: Duration) {
        if let Some(out) = self.push_pop(a) {
            let history = &mut self.history;
            self.builder.on_read(out, rtt, |d| history.push(d));
        }
    }

    /// Packets sitting in the reorder buffer.
    pub fn skip_len(&self, ack: u64) -> u8 {
        let held: Vec<u64> = self.reorder.iter().flatten().map(|a| a.seq).collect();
        if let Some(top) = held.iter().copied().reduce(seq_max) {
            if top != ack {
                tracing::debug!(top, ack, "reorder buffer head differs from acked seq");
            }
        }
        held.len() as u8
    }

    /// Unfinished interval first, then finished ones newest to oldest.
    pub fn list_intervals(&self) -> Vec<LossIntervalDetail> {
        self.builder
            .unfinished()
            .into_iter()
            .chain(self.history.iter().copied())
            .collect()
    }

    pub fn loss_event_rate_inv(&self) -> u32 {
        let lens: Vec<u32> = self
            .list_intervals()
            .iter()
            .map(|d| d.interval.seq_len())
            .collect();
        self.calc.rate_inv(&lens)
    }

    pub fn intervals_option(&self, ack: u64) -> LossIntervals {
        LossIntervals {
            skip: self.skip_len(ack),
            intervals: self
                .list_intervals()
                .into_iter()
                .take(MAX_LOSS_INTERVALS)
                .map(|d| d.interval)
                .collect(),
        }
    }

    /// Loss summary for the next feedback. Advances the "new loss" mark.
    pub fn digest(&mut self) -> LossDigest {
        let opened = self.builder.opened();
        let fresh = opened - self.digested;
        self.digested = opened;
        LossDigest {
            rate_inv: self.loss_event_rate_inv(),
            new_loss_count: fresh.min(u64::from(u8::MAX)) as u8,
        }
    }

    pub fn history(&self) -> &LossHistory {
        &self.history
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ccid3::options::UNKNOWN_LOSS_EVENT_RATE_INV;
    use quanta::Instant;

    fn arrival(base: Instant, seq: u64) -> Arrival {
        Arrival {
            seq,
            time: base + Duration::from_millis(seq),
            is_data: true,
        }
    }

    const RTT: Duration = Duration::from_millis(2);

    #[test]
    fn reorder_within_ndupack_is_not_loss() {
        let base = Instant::now();
        let mut t = ReceiverLossTracker::new();
        for s in [1, 2, 4, 3, 5, 6, 7, 8, 9] {
            t.on_read(arrival(base, s), RTT);
        }
        assert!(t.list_intervals().is_empty());
        assert_eq!(t.skip_len(9), 3);
        assert_eq!(t.loss_event_rate_inv(), UNKNOWN_LOSS_EVENT_RATE_INV);
    }

    #[test]
    fn gap_surfaces_after_ndupack_arrivals() {
        let base = Instant::now();
        let mut t = ReceiverLossTracker::new();
        for s in [1, 2, 3, 7, 8, 9] {
            t.on_read(arrival(base, s), RTT);
        }
        // 7 is still buffered
        assert!(t.list_intervals().is_empty());
        t.on_read(arrival(base, 10), RTT);
        let list = t.list_intervals();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].interval.loss_len, 3);
        assert_eq!(list[0].interval.lossless_len, 1);
    }

    #[test]
    fn history_is_bounded() {
        let mut h = LossHistory::new(2);
        let base = Instant::now();
        for s in 0..5u64 {
            h.push(LossIntervalDetail {
                interval: Default::default(),
                start_seq: s,
                start_time: base,
                start_rtt: RTT,
                unfinished: false,
            });
        }
        assert_eq!(h.len(), 2);
        assert_eq!(h.get(0).unwrap().start_seq, 4);
        assert_eq!(h.get(1).unwrap().start_seq, 3);
    }

    #[test]
    fn digest_counts_new_intervals_once() {
        let base = Instant::now();
        let mut t = ReceiverLossTracker::new();
        // Losses at 3 and 30, far apart relative to the RTT.
        let seqs = (1..=2).chain(4..=29).chain(31..=40);
        for s in seqs {
            t.on_read(arrival(base, s), RTT);
        }
        let d = t.digest();
        assert_eq!(d.new_loss_count, 2);
        assert!(d.rate_inv < UNKNOWN_LOSS_EVENT_RATE_INV);
        assert_eq!(t.digest().new_loss_count, 0);

        let opt = t.intervals_option(40);
        assert_eq!(opt.skip, 3);
        assert_eq!(opt.intervals.len(), 2);
        assert_eq!(opt.intervals[1].loss_len, 1);
    }
}

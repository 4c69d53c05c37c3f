//! Incremental loss-interval construction (RFC 4342 §6, RFC 5348 §5.2).
//!
//! Packets arrive here already de-reordered, in increasing sequence order.
//! Every gap between two consecutive arrivals is a run of lost packets whose
//! send times are interpolated evenly between the two arrivals. A loss that
//! falls within one RTT of the current interval's start belongs to the same
//! loss event and is merged into its loss run; a later loss closes the
//! interval and opens the next one.
//!
//! ```text
//!   prev      lost  lost  lost      recv
//!    |---------X-----X-----X---------|
//!              ^ k=1 ^ k=2 ^ k=3
//! ```

use std::time::Duration;

use quanta::Instant;

use super::options::LossInterval;
use crate::seq::{seq_add, seq_distance, seq_le};

/// One observed arrival, as consumed by the interval builder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Arrival {
    pub seq: u64,
    pub time: Instant,
    /// Whether the packet carried application data.
    pub is_data: bool,
}

/// A loss interval with the bookkeeping the receiver keeps beside the wire
/// fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LossIntervalDetail {
    pub interval: LossInterval,
    /// Sequence number of the first lost packet.
    pub start_seq: u64,
    /// Interpolated send time of the first lost packet.
    pub start_time: Instant,
    /// RTT estimate in effect when the interval began.
    pub start_rtt: Duration,
    pub unfinished: bool,
}

// ─── Event Tail ─────────────────────────────────────────────────────────────

/// The lost packets between two consecutive arrivals.
#[derive(Debug, Clone, Copy)]
struct EventTail {
    prev_seq: u64,
    prev_time: Instant,
    /// Interpolated spacing between loss events, in nanoseconds.
    gap_ns: u64,
    nlost: u64,
}

impl EventTail {
    fn new(prev_seq: u64, prev_time: Instant, recv_time: Instant, nlost: u64) -> Self {
        let span = recv_time.saturating_duration_since(prev_time).as_nanos() as u64;
        EventTail {
            prev_seq,
            prev_time,
            gap_ns: span / (nlost + 1),
            nlost,
        }
    }

    /// Time and sequence number of the `k`-th lost packet, `k ≥ 1`.
    fn loss_event(&self, k: u64) -> (Instant, u64) {
        (
            self.prev_time + Duration::from_nanos(self.gap_ns.saturating_mul(k)),
            seq_add(self.prev_seq, k),
        )
    }

    /// Number of leading losses that happen no later than `deadline`.
    fn losses_until(&self, deadline: Instant) -> u64 {
        if self.nlost == 0 || deadline < self.prev_time {
            return 0;
        }
        if self.gap_ns == 0 {
            return self.nlost;
        }
        let d = deadline.saturating_duration_since(self.prev_time).as_nanos() as u64;
        (d / self.gap_ns).min(self.nlost)
    }

    fn chop(&mut self, k: u64) {
        let k = k.min(self.nlost);
        self.prev_seq = seq_add(self.prev_seq, k);
        self.prev_time += Duration::from_nanos(self.gap_ns.saturating_mul(k));
        self.nlost -= k;
    }
}

// ─── Interval Builder ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
struct OpenInterval {
    loss_len: u64,
    lossless_len: u64,
    non_data_len: u64,
    start_seq: u64,
    start_time: Instant,
    start_rtt: Duration,
}

impl OpenInterval {
    fn detail(&self, unfinished: bool) -> LossIntervalDetail {
        let seq_len = self.loss_len + self.lossless_len;
        LossIntervalDetail {
            interval: LossInterval::clamped(
                self.lossless_len,
                self.loss_len,
                seq_len.saturating_sub(self.non_data_len),
            ),
            start_seq: self.start_seq,
            start_time: self.start_time,
            start_rtt: self.start_rtt,
            unfinished,
        }
    }
}

#[derive(Debug, Default)]
pub struct IntervalBuilder {
    last: Option<(u64, Instant)>,
    last_rtt: Duration,
    current: Option<OpenInterval>,
    /// Intervals ever opened; lets feedback report how many are new.
    opened: u64,
}

impl IntervalBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed the next in-order arrival. Intervals that close as a result are
    /// handed to `finished`, oldest first.
    pub fn on_read(
        &mut self,
        a: Arrival,
        rtt: Duration,
        mut finished: impl FnMut(LossIntervalDetail),
    ) {
        let prev = self.last;
        if let Some((last_seq, last_time)) = prev {
            if seq_le(a.seq, last_seq) {
                return;
            }
            if a.time < last_time {
                tracing::debug!(seq = a.seq, last_seq, "arrival time went backwards, ignoring");
                return;
            }
        }
        self.last = Some((a.seq, a.time));
        self.last_rtt = rtt;

        if let Some((last_seq, last_time)) = prev {
            let nlost = seq_distance(last_seq, a.seq) - 1;
            let mut tail = EventTail::new(last_seq, last_time, a.time, nlost);
            self.eat_tail(&mut tail, &mut finished);
        }
        // Counted after the tail so the packet lands in the interval it opens.
        if let Some(cur) = self.current.as_mut() {
            if !a.is_data {
                cur.non_data_len += 1;
            }
        }
    }

    fn eat_tail(&mut self, tail: &mut EventTail, finished: &mut impl FnMut(LossIntervalDetail)) {
        loop {
            let Some(cur) = self.current.as_mut() else {
                if tail.nlost == 0 {
                    return;
                }
                let (start_time, start_seq) = tail.loss_event(1);
                self.current = Some(OpenInterval {
                    loss_len: tail.nlost,
                    lossless_len: 1,
                    non_data_len: 0,
                    start_seq,
                    start_time,
                    start_rtt: self.last_rtt,
                });
                self.opened += 1;
                return;
            };

            if tail.nlost == 0 {
                cur.lossless_len += 1;
                return;
            }

            // Losses within one RTT of the interval start join its loss event.
            let k = tail.losses_until(cur.start_time + cur.start_rtt);
            if k > 0 {
                cur.loss_len += cur.lossless_len + k;
                cur.lossless_len = 0;
                tail.chop(k);
                if tail.nlost == 0 {
                    cur.lossless_len = 1;
                    return;
                }
            }

            finished(cur.detail(false));
            self.current = None;
        }
    }

    /// The interval still in progress, if any.
    pub fn unfinished(&self) -> Option<LossIntervalDetail> {
        self.current.map(|c| c.detail(true))
    }

    pub fn opened(&self) -> u64 {
        self.opened
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn arrivals(base: Instant, seqs: &[u64]) -> Vec<Arrival> {
        seqs.iter()
            .map(|&s| Arrival {
                seq: s,
                time: base + Duration::from_millis(10 * s),
                is_data: true,
            })
            .collect()
    }

    fn feed(b: &mut IntervalBuilder, xs: &[Arrival], rtt: Duration) -> Vec<LossIntervalDetail> {
        let mut out = Vec::new();
        for a in xs {
            b.on_read(*a, rtt, |d| out.push(d));
        }
        out
    }

    #[test]
    fn three_lost_open_one_interval() {
        let base = Instant::now();
        let mut b = IntervalBuilder::new();
        let done = feed(&mut b, &arrivals(base, &[1, 2, 3, 7]), Duration::from_millis(5));
        assert!(done.is_empty());
        let cur = b.unfinished().unwrap();
        assert_eq!(cur.interval.loss_len, 3);
        assert_eq!(cur.interval.lossless_len, 1);
        assert_eq!(cur.start_seq, 4);
        assert!(cur.unfinished);
    }

    #[test]
    fn no_loss_no_interval() {
        let base = Instant::now();
        let mut b = IntervalBuilder::new();
        feed(&mut b, &arrivals(base, &[1, 2, 3, 4, 5]), Duration::from_millis(5));
        assert!(b.unfinished().is_none());
        assert_eq!(b.opened(), 0);
    }

    #[test]
    fn lossless_run_extends() {
        let base = Instant::now();
        let mut b = IntervalBuilder::new();
        feed(&mut b, &arrivals(base, &[1, 3, 4, 5, 6]), Duration::from_millis(5));
        let cur = b.unfinished().unwrap();
        assert_eq!(cur.interval.loss_len, 1);
        assert_eq!(cur.interval.lossless_len, 4);
        assert_eq!(cur.interval.data_len, 5);
    }

    #[test]
    fn loss_within_rtt_merges() {
        let base = Instant::now();
        let mut b = IntervalBuilder::new();
        // Loss at 2 (t≈15ms), then at 4 (t≈35ms): both within a 1 s RTT.
        let done = feed(&mut b, &arrivals(base, &[1, 3, 5]), Duration::from_secs(1));
        assert!(done.is_empty());
        let cur = b.unfinished().unwrap();
        // loss run: 2, 3 (merged lossless), 4
        assert_eq!(cur.interval.loss_len, 3);
        assert_eq!(cur.interval.lossless_len, 1);
        assert_eq!(b.opened(), 1);
    }

    #[test]
    fn loss_after_rtt_starts_new_interval() {
        let base = Instant::now();
        let mut b = IntervalBuilder::new();
        let done = feed(
            &mut b,
            &arrivals(base, &[1, 3, 4, 5, 6, 7, 9]),
            Duration::from_millis(5),
        );
        assert_eq!(done.len(), 1);
        let first = done[0];
        assert_eq!(first.start_seq, 2);
        assert_eq!(first.interval.loss_len, 1);
        assert_eq!(first.interval.lossless_len, 5);
        assert!(!first.unfinished);

        let cur = b.unfinished().unwrap();
        assert_eq!(cur.start_seq, 8);
        assert_eq!(cur.interval.loss_len, 1);
        assert_eq!(cur.interval.lossless_len, 1);
        assert_eq!(b.opened(), 2);
    }

    #[test]
    fn non_data_excluded_from_data_len() {
        let base = Instant::now();
        let mut b = IntervalBuilder::new();
        let mut xs = arrivals(base, &[1, 3, 4, 5]);
        xs[2].is_data = false;
        feed(&mut b, &xs, Duration::from_millis(5));
        let cur = b.unfinished().unwrap();
        assert_eq!(cur.interval.lossless_len, 3);
        assert_eq!(cur.interval.data_len, 3, "one ack-only packet in the run");
    }

    #[test]
    fn duplicates_and_time_reversal_ignored() {
        let base = Instant::now();
        let mut b = IntervalBuilder::new();
        let mut xs = arrivals(base, &[1, 2, 2, 1]);
        let late = Arrival {
            seq: 5,
            time: base,
            is_data: true,
        };
        xs.push(late);
        feed(&mut b, &xs, Duration::from_millis(5));
        assert!(b.unfinished().is_none());
    }

    #[test]
    fn wraps_the_sequence_space() {
        use crate::seq::SEQ_MAX;
        let base = Instant::now();
        let mut b = IntervalBuilder::new();
        let xs = [SEQ_MAX - 1, SEQ_MAX, 2]
            .iter()
            .enumerate()
            .map(|(i, &s)| Arrival {
                seq: s,
                time: base + Duration::from_millis(10 * i as u64),
                is_data: true,
            })
            .collect::<Vec<_>>();
        feed(&mut b, &xs, Duration::from_millis(1));
        let cur = b.unfinished().unwrap();
        assert_eq!(cur.start_seq, 0);
        assert_eq!(cur.interval.loss_len, 2);
    }
}

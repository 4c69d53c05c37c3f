//! Sender-side view of receiver loss reports.
//!
//! The loss event rate is recomputed from the LossIntervals option when
//! present, so sender and receiver apply the same averaging. Interval start
//! sequence numbers are recovered by walking back from the acknowledged
//! packet, which tells which intervals are new since the previous feedback.

use super::loss_rate::{LossRateCalculator, NINTERVAL};
use super::options::{
    LossDigest, LossEventRate, LossInterval, LossIntervals, UNKNOWN_LOSS_EVENT_RATE_INV,
};
use crate::ccid::{CongestionError, FeedbackHeader};
use crate::seq::{seq_add, seq_lt, seq_sub};

/// What one feedback packet says about loss.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LossFeedback {
    pub rate_inv: u32,
    pub new_loss_count: u8,
}

/// Start sequence number of each reported interval, newest first.
pub fn recover_starts(ack: u64, skip: u8, intervals: &[LossInterval]) -> Vec<u64> {
    let mut head = seq_sub(seq_add(ack, 1), u64::from(skip));
    intervals
        .iter()
        .map(|li| {
            head = seq_sub(head, u64::from(li.seq_len()));
            head
        })
        .collect()
}

/// Leading intervals that start after `last_ack`.
fn count_new(starts: &[u64], last_ack: Option<u64>) -> u8 {
    let fresh = match last_ack {
        None => starts.len(),
        Some(last) => starts.iter().take_while(|s| seq_lt(last, **s)).count(),
    };
    fresh.min(usize::from(u8::MAX)) as u8
}

#[derive(Debug)]
pub struct SenderLossTracker {
    last_ack: Option<u64>,
    last_rate_inv: u32,
    calc: LossRateCalculator,
}

impl Default for SenderLossTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl SenderLossTracker {
    pub fn new() -> Self {
        SenderLossTracker {
            last_ack: None,
            last_rate_inv: UNKNOWN_LOSS_EVENT_RATE_INV,
            calc: LossRateCalculator::new(NINTERVAL),
        }
    }

    pub fn rate_inv(&self) -> u32 {
        self.last_rate_inv
    }

    /// Digest loss information from an Ack or DataAck. Prefers
    /// LossIntervals, then LossDigest, then LossEventRate.
    pub fn on_read(&mut self, fb: &FeedbackHeader<'_>) -> Result<LossFeedback, CongestionError> {
        let ack = fb.ack.ok_or(CongestionError::NotFeedback)?;
        let opts = fb.options;

        let (rate_inv, new_loss_count) = if let Some(li) =
            opts.iter().find_map(LossIntervals::decode)
        {
            let starts = recover_starts(ack, li.skip, &li.intervals);
            let lens: Vec<u32> = li.intervals.iter().map(LossInterval::seq_len).collect();
            (self.calc.rate_inv(&lens), count_new(&starts, self.last_ack))
        } else if let Some(d) = opts.iter().find_map(LossDigest::decode) {
            (d.rate_inv, d.new_loss_count)
        } else if let Some(r) = opts.iter().find_map(LossEventRate::decode) {
            (r.rate_inv, u8::from(r.rate_inv < self.last_rate_inv))
        } else {
            return Err(CongestionError::MissingOption("LossIntervals"));
        };

        self.last_rate_inv = rate_inv;
        self.last_ack = Some(match self.last_ack {
            Some(last) if seq_lt(ack, last) => last,
            _ => ack,
        });
        Ok(LossFeedback {
            rate_inv,
            new_loss_count,
        })
    }
}

//! Average loss interval (RFC 5348 §5.4).
//!
//! With `n` weights, the most recent `n/2` intervals count fully and the
//! older half decays linearly. Two sums are taken: one that includes the
//! interval still in progress and one that skips it. The larger wins, so an
//! open interval can raise the average but never drag it down.

use super::options::UNKNOWN_LOSS_EVENT_RATE_INV;

/// Finished intervals kept for the average.
pub const NINTERVAL: usize = 8;

#[derive(Debug, Clone)]
pub struct LossRateCalculator {
    weights: Vec<f64>,
}

impl LossRateCalculator {
    pub fn new(n: usize) -> Self {
        let weights = (0..n)
            .map(|i| {
                if i < n / 2 {
                    1.0
                } else {
                    2.0 * (n - i) as f64 / (n + 2) as f64
                }
            })
            .collect();
        LossRateCalculator { weights }
    }

    pub fn weight(&self, i: usize) -> f64 {
        self.weights[i]
    }

    /// Inverse of the loss event rate from sequence lengths listed newest
    /// first, with the unfinished interval (if any) at index 0.
    ///
    /// Fewer than two intervals give [`UNKNOWN_LOSS_EVENT_RATE_INV`].
    pub fn rate_inv(&self, seq_lens: &[u32]) -> u32 {
        let k = seq_lens.len().min(self.weights.len() + 1);
        if k < 2 {
            return UNKNOWN_LOSS_EVENT_RATE_INV;
        }
        let h = &seq_lens[..k];
        let w = &self.weights;

        let mut i_tot0 = 0.0;
        let mut w_tot = 0.0;
        for i in 0..k - 1 {
            i_tot0 += f64::from(h[i]) * w[i];
            w_tot += w[i];
        }
        let i_tot1: f64 = (1..k).map(|i| f64::from(h[i]) * w[i - 1]).sum();

        let mean = i_tot0.max(i_tot1) / w_tot;
        let inv = mean.ceil();
        if inv >= f64::from(u32::MAX) {
            return UNKNOWN_LOSS_EVENT_RATE_INV - 1;
        }
        (inv as u32).max(1)
    }
}

impl Default for LossRateCalculator {
    fn default() -> Self {
        Self::new(NINTERVAL)
    }
}

//! TCP throughput equation (RFC 5348 §3.1).
//!
//! ```text
//!                       s
//!   X = -------------------------------------------
//!       R · (√(2p/3) + 12·√(3p/8) · p · (1 + 32p²))
//! ```
//!
//! with `t_RTO = 4R` and `b = 1`. The denominator term `q(p)` is tabulated
//! by loss-rate inverse for the common range and computed directly past it.

use std::sync::OnceLock;
use std::time::Duration;

/// Loss-rate inverses covered by the table: `1..TABLE_LEN`.
pub const TABLE_LEN: u32 = 3000;
const Q_SCALE: f64 = 1e6;

fn q(p: f64) -> f64 {
    (2.0 * p / 3.0).sqrt() + 12.0 * (3.0 * p / 8.0).sqrt() * p * (1.0 + 32.0 * p * p)
}

fn table() -> &'static [u64] {
    static TABLE: OnceLock<Vec<u64>> = OnceLock::new();
    TABLE.get_or_init(|| {
        (0..TABLE_LEN)
            .map(|j| {
                let p = 1.0 / f64::from(j.max(1));
                (q(p) * Q_SCALE).round() as u64
            })
            .collect()
    })
}

/// `q(1/rate_inv)` scaled by 10⁶.
fn q_scaled(rate_inv: u32) -> u64 {
    let j = rate_inv.max(1);
    if j < TABLE_LEN {
        return table()[j as usize];
    }
    ((q(1.0 / f64::from(j)) * Q_SCALE).round() as u64).max(1)
}

/// Allowed rate in bytes/s for segment size `ss`, round-trip `rtt` and loss
/// event rate `1/rate_inv`.
pub fn throughput(ss: u32, rtt: Duration, rate_inv: u32) -> u64 {
    let rtt_ns = rtt.as_nanos().max(1);
    let num = u128::from(ss) * 1_000_000_000u128 * Q_SCALE as u128;
    let den = rtt_ns * u128::from(q_scaled(rate_inv));
    (num / den.max(1)).min(u128::from(u64::MAX)) as u64
}

//! CCID3 option codecs (RFC 4342 §8).
//!
//! Receiver → sender: LossEventRate, LossIntervals, ReceiveRate and the
//! LossDigest extension. Sender → receiver: RoundtripReport, which carries
//! the sender's RTT estimate so the receiver need not derive it from CCVal
//! spacing.

use std::time::Duration;

use bytes::{Buf, BufMut, BytesMut};

use crate::options::{from_ten_micros, to_ten_micros, DccpOption};

pub const OPT_ROUNDTRIP_REPORT: u8 = 150;
pub const OPT_LOSS_EVENT_RATE: u8 = 192;
pub const OPT_LOSS_INTERVALS: u8 = 193;
pub const OPT_RECEIVE_RATE: u8 = 194;
pub const OPT_LOSS_DIGEST: u8 = 210;

/// Loss-event-rate inverse meaning "no loss observed yet".
pub const UNKNOWN_LOSS_EVENT_RATE_INV: u32 = u32::MAX;

/// Largest number of intervals a LossIntervals option can hold.
pub const MAX_LOSS_INTERVALS: usize = 28;

const INTERVAL_FOOTPRINT: usize = 9;
const U24_MAX: u32 = (1 << 24) - 1;
const U23_MAX: u32 = (1 << 23) - 1;
const ECN_BIT: u32 = 1 << 23;

fn put_u24(buf: &mut BytesMut, v: u32) {
    buf.put_uint(u64::from(v & U24_MAX), 3);
}

// ─── LossEventRate ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LossEventRate {
    /// Inverse of the loss event rate, rounded up.
    pub rate_inv: u32,
}

impl LossEventRate {
    pub fn encode(&self) -> DccpOption {
        DccpOption::new(OPT_LOSS_EVENT_RATE, self.rate_inv.to_be_bytes().to_vec())
    }

    pub fn decode(opt: &DccpOption) -> Option<Self> {
        if opt.kind != OPT_LOSS_EVENT_RATE || opt.data.len() != 4 {
            return None;
        }
        Some(LossEventRate {
            rate_inv: (&opt.data[..]).get_u32(),
        })
    }
}

// ─── LossIntervals ──────────────────────────────────────────────────────────

/// One interval as reported on the wire (RFC 4342 §8.6.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LossInterval {
    /// 24-bit.
    pub lossless_len: u32,
    /// 23-bit.
    pub loss_len: u32,
    /// 24-bit.
    pub data_len: u32,
    pub ecn_nonce_echo: bool,
}

impl LossInterval {
    /// Build from unbounded counters, saturating each at its wire width.
    pub fn clamped(lossless_len: u64, loss_len: u64, data_len: u64) -> Self {
        LossInterval {
            lossless_len: lossless_len.min(u64::from(U24_MAX)) as u32,
            loss_len: loss_len.min(u64::from(U23_MAX)) as u32,
            data_len: data_len.min(u64::from(U24_MAX)) as u32,
            ecn_nonce_echo: false,
        }
    }

    /// Sequence length covered by the interval.
    pub fn seq_len(&self) -> u32 {
        self.lossless_len + self.loss_len
    }

    fn fits(&self) -> bool {
        self.lossless_len <= U24_MAX && self.loss_len <= U23_MAX && self.data_len <= U24_MAX
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LossIntervals {
    /// Packets held back in the reorder buffer, not yet accounted for.
    pub skip: u8,
    /// Most recent first; the first entry may be unfinished.
    pub intervals: Vec<LossInterval>,
}

impl LossIntervals {
    /// `None` if any field overflows its wire width or there are too many
    /// intervals.
    pub fn encode(&self) -> Option<DccpOption> {
        if self.intervals.len() > MAX_LOSS_INTERVALS {
            return None;
        }
        let mut d = BytesMut::with_capacity(1 + INTERVAL_FOOTPRINT * self.intervals.len());
        d.put_u8(self.skip);
        for li in &self.intervals {
            if !li.fits() {
                return None;
            }
            put_u24(&mut d, li.lossless_len);
            let mut loss = li.loss_len;
            if li.ecn_nonce_echo {
                loss |= ECN_BIT;
            }
            put_u24(&mut d, loss);
            put_u24(&mut d, li.data_len);
        }
        Some(DccpOption::new(OPT_LOSS_INTERVALS, d.freeze()))
    }

    pub fn decode(opt: &DccpOption) -> Option<Self> {
        if opt.kind != OPT_LOSS_INTERVALS || opt.data.is_empty() {
            return None;
        }
        let body = opt.data.len() - 1;
        let count = body / INTERVAL_FOOTPRINT;
        if body % INTERVAL_FOOTPRINT != 0 || count > MAX_LOSS_INTERVALS {
            return None;
        }
        let mut d = &opt.data[..];
        let skip = d.get_u8();
        let intervals = (0..count)
            .map(|_| {
                let lossless_len = d.get_uint(3) as u32;
                let loss = d.get_uint(3) as u32;
                let data_len = d.get_uint(3) as u32;
                LossInterval {
                    lossless_len,
                    loss_len: loss & U23_MAX,
                    data_len,
                    ecn_nonce_echo: loss & ECN_BIT != 0,
                }
            })
            .collect();
        Some(LossIntervals { skip, intervals })
    }
}

// ─── ReceiveRate ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReceiveRate {
    /// Bytes per second received since the previous feedback.
    pub rate: u32,
}

impl ReceiveRate {
    pub fn encode(&self) -> DccpOption {
        DccpOption::new(OPT_RECEIVE_RATE, self.rate.to_be_bytes().to_vec())
    }

    pub fn decode(opt: &DccpOption) -> Option<Self> {
        if opt.kind != OPT_RECEIVE_RATE || opt.data.len() != 4 {
            return None;
        }
        Some(ReceiveRate {
            rate: (&opt.data[..]).get_u32(),
        })
    }
}

// ─── LossDigest ─────────────────────────────────────────────────────────────

/// Pre-digested loss summary: what a sender would otherwise reconstruct from
/// LossIntervals. Not part of RFC 4342.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LossDigest {
    pub rate_inv: u32,
    /// Loss events first reported by this feedback.
    pub new_loss_count: u8,
}

impl LossDigest {
    pub fn encode(&self) -> DccpOption {
        let mut d = BytesMut::with_capacity(5);
        d.put_u32(self.rate_inv);
        d.put_u8(self.new_loss_count);
        DccpOption::new(OPT_LOSS_DIGEST, d.freeze())
    }

    pub fn decode(opt: &DccpOption) -> Option<Self> {
        if opt.kind != OPT_LOSS_DIGEST || opt.data.len() != 5 {
            return None;
        }
        let mut d = &opt.data[..];
        Some(LossDigest {
            rate_inv: d.get_u32(),
            new_loss_count: d.get_u8(),
        })
    }
}

// ─── RoundtripReport ────────────────────────────────────────────────────────

/// Sender's RTT estimate, in 10 µs units on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoundtripReport {
    pub rtt: Duration,
}

impl RoundtripReport {
    pub fn encode(&self) -> DccpOption {
        DccpOption::new(
            OPT_ROUNDTRIP_REPORT,
            to_ten_micros(self.rtt).to_be_bytes().to_vec(),
        )
    }

    pub fn decode(opt: &DccpOption) -> Option<Self> {
        if opt.kind != OPT_ROUNDTRIP_REPORT || opt.data.len() != 4 {
            return None;
        }
        Some(RoundtripReport {
            rtt: from_ten_micros((&opt.data[..]).get_u32()),
        })
    }
}

//! # Connection Statistics
//!
//! Counters kept by the connection machine plus a snapshot of the sending
//! controller. Everything serializes to JSON for the trace tooling and the
//! `dccp-cat` summary line.

use serde::Serialize;

use crate::socket::State;

// ─── Drop Accounting ────────────────────────────────────────────────────────

/// Why an inbound or outbound packet was discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    /// Header failed to decode.
    Malformed,
    /// Outside the sequence or acknowledgement window.
    OutOfWindow,
    /// Wrong type for the current state or role.
    Unexpected,
    /// Rejected by a state-specific step (LISTEN, REQUEST, TIMEWAIT).
    StateFilter,
    /// The congestion controller asked for it.
    Congestion,
    /// Application queue was full.
    SlowApp,
    /// Control queue was full.
    SlowStrobe,
    /// Request retry with a different service code.
    ServiceCode,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DropStats {
    pub malformed: u64,
    pub out_of_window: u64,
    pub unexpected: u64,
    pub state_filter: u64,
    pub congestion: u64,
    pub slow_app: u64,
    pub slow_strobe: u64,
    pub service_code: u64,
}

impl DropStats {
    pub fn record(&mut self, reason: DropReason) {
        let slot = match reason {
            DropReason::Malformed => &mut self.malformed,
            DropReason::OutOfWindow => &mut self.out_of_window,
            DropReason::Unexpected => &mut self.unexpected,
            DropReason::StateFilter => &mut self.state_filter,
            DropReason::Congestion => &mut self.congestion,
            DropReason::SlowApp => &mut self.slow_app,
            DropReason::SlowStrobe => &mut self.slow_strobe,
            DropReason::ServiceCode => &mut self.service_code,
        };
        *slot += 1;
    }

    pub fn total(&self) -> u64 {
        self.malformed
            + self.out_of_window
            + self.unexpected
            + self.state_filter
            + self.congestion
            + self.slow_app
            + self.slow_strobe
            + self.service_code
    }
}

// ─── Sender Snapshot ────────────────────────────────────────────────────────

/// Point-in-time view of the sending half's congestion state.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SenderSnapshot {
    /// CCID of the sending half.
    pub ccid: u8,
    /// Controller phase name.
    pub phase: &'static str,
    /// Allowed rate in bytes/sec.
    pub x_bps: u64,
    /// RTT estimate in µs.
    pub rtt_us: u64,
    /// Loss event rate inverse (`u32::MAX` when no loss seen).
    pub loss_rate_inv: u32,
}

impl SenderSnapshot {
    /// Loss event rate `p` (0.0 when no loss seen).
    pub fn loss_rate(&self) -> f64 {
        if self.loss_rate_inv == u32::MAX || self.loss_rate_inv == 0 {
            0.0
        } else {
            1.0 / self.loss_rate_inv as f64
        }
    }
}

// ─── Connection Stats ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct ConnStats {
    pub state: State,
    pub packets_read: u64,
    pub packets_written: u64,
    /// Application payload accepted by `write`.
    pub bytes_written: u64,
    /// Application payload handed to `read`.
    pub bytes_delivered: u64,
    pub state_changes: u64,
    pub drops: DropStats,
    pub sender: SenderSnapshot,
}

impl ConnStats {
    pub fn new(state: State) -> Self {
        ConnStats {
            state,
            packets_read: 0,
            packets_written: 0,
            bytes_written: 0,
            bytes_delivered: 0,
            state_changes: 0,
            drops: DropStats::default(),
            sender: SenderSnapshot::default(),
        }
    }

    /// Share of read packets that were discarded.
    pub fn drop_ratio(&self) -> f64 {
        if self.packets_read == 0 {
            0.0
        } else {
            self.drops.total() as f64 / self.packets_read as f64
        }
    }
}

//! # Congestion Control Interface
//!
//! A connection carries two half-connection controllers: a sender, which
//! governs packets we emit, and a receiver, which produces feedback for the
//! peer's sender. The connection machine calls them on every packet.
//!
//! ## Calling contract
//!
//! - `open` is called once the connection reaches OPEN, `close` on teardown.
//!   Both are idempotent: each controller keeps an explicit [`Activation`]
//!   guard and ignores calls outside its OPEN phase.
//! - `on_read` sees validated packets only and may answer with a
//!   [`CongestionAction`]: reset the connection, send an Ack now, or drop.
//! - `strobe` is the only call that blocks. It is made without the
//!   connection lock held and must return promptly once closed.

use std::sync::Arc;
use std::time::Duration;

use quanta::Instant;
use thiserror::Error;

use crate::ccid3::{Ccid3Receiver, Ccid3Sender};
use crate::options::DccpOption;
use crate::stats::SenderSnapshot;
use crate::wire::{PacketType, ResetCode};

pub mod fixed;
pub mod strober;

use fixed::{FixedRateReceiver, FixedRateSender};

/// TCP-like congestion control (RFC 4341). Not implemented here.
pub const CCID2: u8 = 2;
/// TFRC congestion control (RFC 4342).
pub const CCID3: u8 = 3;
/// Constant-rate pacing, no feedback. Local use only.
pub const CCID_FIXED: u8 = 248;

/// RTT assumed until a controller has a sample.
pub const RTT_DEFAULT: Duration = Duration::from_millis(200);
/// Smallest RTT any timer is derived from.
pub const RTT_MIN: Duration = Duration::from_millis(1);

// ─── Controller Views ───────────────────────────────────────────────────────

/// What the sender half sees of an inbound packet.
#[derive(Debug, Clone, Copy)]
pub struct FeedbackHeader<'a> {
    pub packet_type: PacketType,
    pub seq: u64,
    pub ack: Option<u64>,
    /// Receiver → sender options only.
    pub options: &'a [DccpOption],
    pub time: Instant,
}

/// What the receiver half sees of an inbound packet.
#[derive(Debug, Clone, Copy)]
pub struct FeedforwardHeader<'a> {
    pub packet_type: PacketType,
    pub seq: u64,
    pub ccval: u8,
    /// Sender → receiver options only.
    pub options: &'a [DccpOption],
    pub data_len: usize,
    pub time: Instant,
}

/// Directive returned by a controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CongestionAction {
    #[default]
    None,
    /// Emit an Ack right away.
    Ack,
    /// Drop the packet; skip the remaining steps.
    Drop,
    /// Reset the connection with this code.
    Reset(ResetCode),
}

/// Non-fatal controller complaints. Logged by the caller, never acted on.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CongestionError {
    #[error("feedback is missing the {0} option")]
    MissingOption(&'static str),
    #[error("malformed option {0}")]
    Malformed(u8),
    #[error("packet type carries no feedback")]
    NotFeedback,
}

pub type CongestionResult = Result<CongestionAction, CongestionError>;

// ─── Controller Traits ──────────────────────────────────────────────────────

pub trait SenderCongestionControl: Send + Sync {
    fn id(&self) -> u8;

    /// Congestion-control maximum packet size.
    fn ccmps(&self) -> u32;

    /// Current RTT estimate, or the default if none.
    fn rtt(&self) -> Duration;

    fn open(&self, now: Instant);

    /// Stamp an outgoing packet: returns CCVal and sender → receiver options.
    fn on_write(&self, packet_type: PacketType, seq: u64, data_len: usize, now: Instant)
        -> (u8, Vec<DccpOption>);

    fn on_read(&self, fb: &FeedbackHeader<'_>) -> CongestionResult;

    /// Periodic poll (nofeedback timer and friends).
    fn on_idle(&self, now: Instant) -> CongestionResult;

    /// Block until the next packet may go out. Returns at once when not open.
    fn strobe(&self);

    fn close(&self);

    fn snapshot(&self) -> SenderSnapshot {
        SenderSnapshot {
            ccid: self.id(),
            phase: "open",
            x_bps: 0,
            rtt_us: self.rtt().as_micros() as u64,
            loss_rate_inv: u32::MAX,
        }
    }
}

pub trait ReceiverCongestionControl: Send + Sync {
    fn id(&self) -> u8;

    fn open(&self, now: Instant);

    /// Options for an outgoing packet (receiver → sender).
    fn on_write(&self, packet_type: PacketType, seq: u64, ack: Option<u64>, now: Instant)
        -> Vec<DccpOption>;

    fn on_read(&self, ff: &FeedforwardHeader<'_>) -> CongestionResult;

    /// Periodic poll (delayed feedback).
    fn on_idle(&self, now: Instant) -> CongestionResult;

    fn close(&self);
}

// ─── Activation Guard ───────────────────────────────────────────────────────

/// Lifecycle phase of a controller half.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
    #[default]
    Init,
    Open,
    Closed,
}

/// Explicit INIT → OPEN → CLOSED guard. Checked before every delegated
/// call; transitions happen at most once each.
#[derive(Debug, Clone, Copy, Default)]
pub struct Activation {
    phase: Phase,
}

impl Activation {
    pub fn new() -> Self {
        Self::default()
    }

    /// INIT → OPEN. Returns whether the transition happened.
    pub fn open(&mut self) -> bool {
        if self.phase != Phase::Init {
            return false;
        }
        self.phase = Phase::Open;
        true
    }

    /// OPEN → CLOSED. A never-opened controller also ends up CLOSED, but
    /// the return value tells the caller there is nothing to release.
    pub fn close(&mut self) -> bool {
        let was_open = self.phase == Phase::Open;
        self.phase = Phase::Closed;
        was_open
    }

    #[inline]
    pub fn is_open(&self) -> bool {
        self.phase == Phase::Open
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }
}

/// Which controller pair a connection runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CcidKind {
    /// TFRC in both directions.
    Ccid3,
    /// Constant pacing, no feedback.
    Fixed { packets_per_sec: u32 },
}

impl Default for CcidKind {
    fn default() -> Self {
        CcidKind::Ccid3
    }
}

/// Knobs shared by every controller pair.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ControllerConfig {
    pub kind: CcidKind,
    pub rtt_default: Duration,
    /// Congestion-control maximum packet size.
    pub ccmps: u32,
    pub oscillation_reduction: bool,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        ControllerConfig {
            kind: CcidKind::default(),
            rtt_default: RTT_DEFAULT,
            ccmps: crate::ccid3::CCMPS,
            oscillation_reduction: false,
        }
    }
}

pub type ControllerPair = (
    Arc<dyn SenderCongestionControl>,
    Arc<dyn ReceiverCongestionControl>,
);

/// Fresh sender and receiver halves for one connection.
pub fn new_controllers(cfg: &ControllerConfig) -> ControllerPair {
    match cfg.kind {
        CcidKind::Ccid3 => (
            Arc::new(Ccid3Sender::new(cfg)),
            Arc::new(Ccid3Receiver::new(cfg)),
        ),
        CcidKind::Fixed { packets_per_sec } => (
            Arc::new(FixedRateSender::new(packets_per_sec, cfg.rtt_default, cfg.ccmps)),
            Arc::new(FixedRateReceiver::new()),
        ),
    }
}

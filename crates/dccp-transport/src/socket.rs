//! # Socket Registers
//!
//! Per-connection numeric state: initial/greatest sequence numbers in both
//! directions, sequence-window features, lifecycle state, and the path
//! parameters the congestion controller feeds back (RTT, CCMPS).
//!
//! A `Socket` is owned exclusively by its connection machine and only ever
//! mutated under the connection lock.

use std::time::Duration;

use rand::RngExt as _;
use serde::Serialize;

use crate::seq::{seq_add, seq_in_window, seq_max, seq_mask, seq_sub};

/// Default Sequence Window feature value (RFC 4340 §7.5.2).
pub const DEFAULT_SEQUENCE_WINDOW: u64 = 100;

// ─── Lifecycle State ────────────────────────────────────────────────────────

/// Connection lifecycle states, in protocol order. The ordering is
/// meaningful: steps compare e.g. `state < State::CloseReq`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum State {
    Closed,
    Listen,
    Request,
    Respond,
    PartOpen,
    Open,
    CloseReq,
    Closing,
    TimeWait,
}

impl State {
    pub fn as_str(self) -> &'static str {
        match self {
            State::Closed => "CLOSED",
            State::Listen => "LISTEN",
            State::Request => "REQUEST",
            State::Respond => "RESPOND",
            State::PartOpen => "PARTOPEN",
            State::Open => "OPEN",
            State::CloseReq => "CLOSEREQ",
            State::Closing => "CLOSING",
            State::TimeWait => "TIMEWAIT",
        }
    }
}

/// Which end of the connection this socket is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Client,
    Server,
}

// ─── Socket ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct Socket {
    /// Initial Sequence number Sent.
    iss: u64,
    /// Initial Sequence number Received.
    isr: u64,
    /// Greatest Sequence number Sent.
    gss: u64,
    /// Greatest Sequence number Received.
    gsr: u64,
    /// Greatest Acknowledgement number Received (non-Sync).
    gar: u64,
    /// SeqNo of the packet that moved us to OPEN.
    osr: u64,
    /// Sequence Window/A (local).
    swaf: u64,
    /// Sequence Window/B (remote).
    swbf: u64,
    state: State,
    role: Role,
    service_code: u32,
    /// Path MTU in bytes.
    pmtu: u32,
    /// Congestion-control maximum packet size.
    ccmps: u32,
    rtt: Duration,
}

impl Socket {
    pub fn new(role: Role, swaf: u64, swbf: u64, pmtu: u32, rtt: Duration) -> Self {
        Socket {
            iss: 0,
            isr: 0,
            gss: 0,
            gsr: 0,
            gar: 0,
            osr: 0,
            swaf,
            swbf,
            state: State::Closed,
            role,
            service_code: 0,
            pmtu,
            ccmps: pmtu,
            rtt,
        }
    }

    // ─── Registers ──────────────────────────────────────────────────────

    pub fn iss(&self) -> u64 {
        self.iss
    }

    pub fn isr(&self) -> u64 {
        self.isr
    }

    pub fn gss(&self) -> u64 {
        self.gss
    }

    pub fn gsr(&self) -> u64 {
        self.gsr
    }

    pub fn gar(&self) -> u64 {
        self.gar
    }

    pub fn osr(&self) -> u64 {
        self.osr
    }

    /// Pick a random initial sequence number. The next emitted packet
    /// carries exactly this number.
    pub fn choose_iss(&mut self) -> u64 {
        let iss = seq_mask(rand::rng().random::<u64>());
        self.set_iss(iss);
        iss
    }

    /// Set ISS explicitly (tests, deterministic replays).
    pub fn set_iss(&mut self, iss: u64) {
        self.iss = seq_mask(iss);
        self.gss = seq_sub(self.iss, 1);
    }

    pub fn set_isr(&mut self, isr: u64) {
        self.isr = seq_mask(isr);
    }

    /// Raise GSR to `seq` if it lies ahead. Never moves backwards.
    pub fn update_gsr(&mut self, seq: u64) {
        self.gsr = seq_max(self.gsr, seq_mask(seq));
    }

    /// Overwrite GSR (handshake only).
    pub fn set_gsr(&mut self, seq: u64) {
        self.gsr = seq_mask(seq);
    }

    /// Raise GAR to `ack` if it lies ahead.
    pub fn update_gar(&mut self, ack: u64) {
        self.gar = seq_max(self.gar, seq_mask(ack));
    }

    /// Overwrite GAR (handshake only).
    pub fn set_gar(&mut self, ack: u64) {
        self.gar = seq_mask(ack);
    }

    pub fn set_osr(&mut self, seq: u64) {
        self.osr = seq_mask(seq);
    }

    /// Allocate the next outgoing sequence number: `max(ISS, GSS+1)`.
    pub fn next_seq(&mut self) -> u64 {
        let seq = seq_max(self.iss, seq_add(self.gss, 1));
        self.gss = seq;
        seq
    }

    // ─── Windows ────────────────────────────────────────────────────────

    /// Valid sequence-number window `[SWL, SWH]`.
    pub fn seq_window(&self) -> (u64, u64) {
        let lo = seq_max(seq_sub(seq_add(self.gsr, 1), self.swbf / 4), self.isr);
        let hi = seq_add(self.gsr, (3 * self.swbf) / 4);
        (lo, hi)
    }

    /// Valid acknowledgement-number window `[AWL, AWH]`.
    pub fn ack_window(&self) -> (u64, u64) {
        let lo = seq_max(seq_sub(seq_add(self.gss, 1), self.swaf), self.iss);
        (lo, self.gss)
    }

    pub fn in_seq_window(&self, seq: u64) -> bool {
        let (lo, hi) = self.seq_window();
        seq_in_window(seq, lo, hi)
    }

    pub fn in_ack_window(&self, ack: u64) -> bool {
        let (lo, hi) = self.ack_window();
        seq_in_window(ack, lo, hi)
    }

    // ─── Lifecycle & Path ───────────────────────────────────────────────

    pub fn state(&self) -> State {
        self.state
    }

    pub fn set_state(&mut self, state: State) {
        self.state = state;
    }

    pub fn set_role(&mut self, role: Role) {
        self.role = role;
    }

    pub fn is_server(&self) -> bool {
        self.role == Role::Server
    }

    pub fn service_code(&self) -> u32 {
        self.service_code
    }

    pub fn set_service_code(&mut self, code: u32) {
        self.service_code = code;
    }

    pub fn ccmps(&self) -> u32 {
        self.ccmps
    }

    pub fn set_ccmps(&mut self, ccmps: u32) {
        self.ccmps = ccmps;
    }

    /// Largest packet we may emit: `min(PMTU, CCMPS)`.
    pub fn mps(&self) -> u32 {
        self.pmtu.min(self.ccmps)
    }

    pub fn rtt(&self) -> Duration {
        self.rtt
    }

    pub fn set_rtt(&mut self, rtt: Duration) {
        self.rtt = rtt;
    }

    pub fn swaf(&self) -> u64 {
        self.swaf
    }

    pub fn swbf(&self) -> u64 {
        self.swbf
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::seq::SEQ_MAX;

    fn socket() -> Socket {
        Socket::new(Role::Client, 100, 100, 1500, Duration::from_millis(200))
    }

    #[test]
    fn first_seq_is_iss() {
        let mut s = socket();
        s.set_iss(1000);
        assert_eq!(s.next_seq(), 1000);
        assert_eq!(s.next_seq(), 1001);
        assert_eq!(s.gss(), 1001);
    }

    #[test]
    fn random_iss_is_48_bit() {
        let mut s = socket();
        for _ in 0..32 {
            let iss = s.choose_iss();
            assert!(iss <= SEQ_MAX);
            assert_eq!(s.next_seq(), iss);
        }
    }

    #[test]
    fn seq_window_edges() {
        let mut s = socket();
        s.set_isr(0);
        s.set_gsr(500);
        // [501 - 25, 500 + 75]
        assert_eq!(s.seq_window(), (476, 575));
        assert!(s.in_seq_window(476));
        assert!(s.in_seq_window(575));
        assert!(!s.in_seq_window(475));
        assert!(!s.in_seq_window(576));
    }

    #[test]
    fn seq_window_clamped_to_isr() {
        let mut s = socket();
        s.set_isr(490);
        s.set_gsr(495);
        assert_eq!(s.seq_window().0, 490, "SWL never drops below ISR");
    }

    #[test]
    fn ack_window_edges() {
        let mut s = socket();
        s.set_iss(10);
        for _ in 0..200 {
            s.next_seq();
        }
        // GSS = 209, AWL = max(210 - 100, 10) = 110
        assert_eq!(s.ack_window(), (110, 209));
        assert!(!s.in_ack_window(210), "cannot ack what was never sent");
    }

    #[test]
    fn registers_never_decrease() {
        let mut s = socket();
        s.set_gsr(100);
        s.update_gsr(90);
        assert_eq!(s.gsr(), 100);
        s.update_gsr(120);
        assert_eq!(s.gsr(), 120);
        s.set_gar(50);
        s.update_gar(40);
        assert_eq!(s.gar(), 50);
    }

    #[test]
    fn state_order() {
        assert!(State::Closed < State::Listen);
        assert!(State::Open < State::CloseReq);
        assert!(State::Closing < State::TimeWait);
    }
}

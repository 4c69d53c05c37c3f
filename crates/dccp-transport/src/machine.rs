//! # Connection State Machine
//!
//! A sans-I/O core: [`Machine`] consumes inbound headers, timer firings and
//! user calls, and produces
//!
//! - an outbox of [`Pending`] control packets, numbered only when the write
//!   loop actually emits them ([`Machine::stamp`]), and
//! - a queue of [`ConnEvent`]s (data to deliver, timers to arm, channels to
//!   tear down) for the threaded runtime in [`crate::conn`] to act on.
//!
//! Every call happens under the connection lock. The per-packet pipeline
//! lives in [`crate::steps`].

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use quanta::Instant;

use crate::backoff::BackoffSpec;
use crate::ccid::{
    Activation, CongestionAction, CongestionResult, ReceiverCongestionControl,
    SenderCongestionControl,
};
use crate::config::ConnConfig;
use crate::error::ConnError;
use crate::seq::seq_add;
use crate::socket::{Role, Socket, State};
use crate::stats::{ConnStats, DropReason};
use crate::trace::Tracer;
use crate::wire::{Header, PacketType, ResetCode};

// ─── Timers ─────────────────────────────────────────────────────────────────

/// Which transition armed a timer. Each kind is only live in one state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    Listen,
    Respond,
    Request,
    PartOpen,
    Closing,
    TimeWait,
}

impl TimerKind {
    /// The state this timer belongs to.
    pub fn state(self) -> State {
        match self {
            TimerKind::Listen => State::Listen,
            TimerKind::Respond => State::Respond,
            TimerKind::Request => State::Request,
            TimerKind::PartOpen => State::PartOpen,
            TimerKind::Closing => State::Closing,
            TimerKind::TimeWait => State::TimeWait,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Schedule {
    /// Fire once after the delay.
    Once(Duration),
    /// Fire after every back-off sleep, then expire when the budget runs out.
    Backoff(BackoffSpec),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerSpec {
    pub kind: TimerKind,
    /// State-change count when armed. A newer transition makes it stale.
    pub generation: u64,
    pub schedule: Schedule,
}

// ─── Outputs ────────────────────────────────────────────────────────────────

/// How an outgoing packet gets its sequence and acknowledgement numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Numbering {
    /// `seq = max(ISS, GSS+1)`, `ack = GSR`.
    Normal,
    /// Normal sequence number, explicit acknowledgement (Sync, SyncAck).
    AckOf(u64),
    /// Out-of-sync Reset (RFC 4340 §8.3.1): numbers taken from the packet
    /// being answered.
    Abnormal { seq: u64, ack: u64 },
}

/// A control packet waiting for the write loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pending {
    pub header: Header,
    pub numbering: Numbering,
}

impl Pending {
    fn normal(header: Header) -> Self {
        Pending {
            header,
            numbering: Numbering::Normal,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnEvent {
    /// Application payload for the read queue.
    Deliver(Bytes),
    StateChanged { from: State, to: State },
    ArmTimer(TimerSpec),
    /// Close the application read and write queues.
    TeardownUser,
    /// Stop the write loop once the control queue is flushed.
    TeardownWriteLoop,
}

// ─── Machine ────────────────────────────────────────────────────────────────

pub struct Machine {
    pub(crate) socket: Socket,
    pub(crate) cfg: ConnConfig,
    pub(crate) tx_cc: Arc<dyn SenderCongestionControl>,
    pub(crate) rx_cc: Arc<dyn ReceiverCongestionControl>,
    ccid: Activation,
    outbox: VecDeque<Pending>,
    events: VecDeque<ConnEvent>,
    error: Option<ConnError>,
    timer_gen: u64,
    user_torn: bool,
    write_torn: bool,
    pub(crate) stats: ConnStats,
    pub(crate) tracer: Tracer,
}

impl Machine {
    pub fn new(
        role: Role,
        cfg: ConnConfig,
        tx_cc: Arc<dyn SenderCongestionControl>,
        rx_cc: Arc<dyn ReceiverCongestionControl>,
        tracer: Tracer,
    ) -> Self {
        let mut socket = Socket::new(role, cfg.swaf, cfg.swbf, cfg.pmtu, cfg.rtt_default);
        socket.set_ccmps(tx_cc.ccmps());
        Machine {
            socket,
            cfg,
            tx_cc,
            rx_cc,
            ccid: Activation::new(),
            outbox: VecDeque::new(),
            events: VecDeque::new(),
            error: None,
            timer_gen: 0,
            user_torn: false,
            write_torn: false,
            stats: ConnStats::new(State::Closed),
            tracer,
        }
    }

    // ─── Accessors ──────────────────────────────────────────────────────

    pub fn state(&self) -> State {
        self.socket.state()
    }

    pub fn socket(&self) -> &Socket {
        &self.socket
    }

    pub fn error(&self) -> Option<ConnError> {
        self.error.clone()
    }

    /// The recorded terminal error, or `Closed` if teardown left none.
    pub fn terminal_error(&self) -> ConnError {
        self.error.clone().unwrap_or(ConnError::Closed)
    }

    pub fn is_user_torn(&self) -> bool {
        self.user_torn
    }

    pub fn is_write_torn(&self) -> bool {
        self.write_torn
    }

    pub fn stats(&self) -> ConnStats {
        let mut s = self.stats.clone();
        s.state = self.state();
        s.sender = self.tx_cc.snapshot();
        s
    }

    pub fn rtt(&self) -> Duration {
        self.socket.rtt()
    }

    /// Read deadline: a benign wake after 5·RTT.
    pub fn read_timeout(&self) -> Duration {
        (self.socket.rtt() * 5).max(self.cfg.rtt_min)
    }

    /// Idle poll period: `max(RTT_MIN, min(RTT, RTT_DEFAULT))`.
    pub fn idle_interval(&self) -> Duration {
        self.socket
            .rtt()
            .min(self.cfg.rtt_default)
            .max(self.cfg.rtt_min)
    }

    /// Application segment limit.
    pub fn mtu(&self) -> usize {
        self.cfg.mtu()
    }

    pub fn take_outbox(&mut self) -> Vec<Pending> {
        self.outbox.drain(..).collect()
    }

    pub fn take_events(&mut self) -> Vec<ConnEvent> {
        self.events.drain(..).collect()
    }

    /// Count and trace a drop decided outside the pipeline.
    pub fn note_drop(&mut self, h: Option<&Header>, reason: DropReason, note: &str) {
        self.stats.drops.record(reason);
        self.tracer.dropped(self.state(), h, reason, note);
    }

    pub(crate) fn inject(&mut self, p: Pending) {
        self.outbox.push_back(p);
    }

    pub(crate) fn deliver(&mut self, data: Bytes) {
        if !self.user_torn {
            self.events.push_back(ConnEvent::Deliver(data));
        }
    }

    pub(crate) fn sync_with_controller(&mut self) {
        self.socket.set_rtt(self.tx_cc.rtt());
        self.socket.set_ccmps(self.tx_cc.ccmps());
    }

    // ─── Packet Generation ──────────────────────────────────────────────

    pub(crate) fn gen_request(&self) -> Pending {
        Pending::normal(
            Header::new(PacketType::Request, 0).with_service_code(self.socket.service_code()),
        )
    }

    pub(crate) fn gen_response(&self) -> Pending {
        Pending::normal(
            Header::new(PacketType::Response, 0).with_service_code(self.socket.service_code()),
        )
    }

    pub(crate) fn gen_ack(&self) -> Pending {
        Pending::normal(Header::new(PacketType::Ack, 0))
    }

    pub(crate) fn gen_close(&self) -> Pending {
        Pending::normal(Header::new(PacketType::Close, 0))
    }

    pub(crate) fn gen_reset(&self, code: ResetCode) -> Pending {
        Pending::normal(Header::new(PacketType::Reset, 0).with_reset_code(code))
    }

    /// Sync acknowledging `ack`, or GSR if `None`.
    pub(crate) fn gen_sync(&self, ack: Option<u64>) -> Pending {
        Pending {
            header: Header::new(PacketType::Sync, 0),
            numbering: ack.map_or(Numbering::Normal, Numbering::AckOf),
        }
    }

    pub(crate) fn gen_sync_ack(&self, sync: &Header) -> Pending {
        Pending {
            header: Header::new(PacketType::SyncAck, 0),
            numbering: Numbering::AckOf(sync.seq),
        }
    }

    pub(crate) fn gen_abnormal_reset(&self, code: ResetCode, to: &Header) -> Pending {
        let seq = to.ack.map_or(0, |a| seq_add(a, 1));
        Pending {
            header: Header::new(PacketType::Reset, 0).with_reset_code(code),
            numbering: Numbering::Abnormal { seq, ack: to.seq },
        }
    }

    /// Assign numbers and controller stamps to a control packet about to go
    /// on the wire.
    pub fn stamp(&mut self, p: Pending, now: Instant) -> Header {
        let mut h = p.header;
        match p.numbering {
            Numbering::Normal => {
                h.seq = self.socket.next_seq();
                h.ack = h.packet_type.has_ack().then(|| self.socket.gsr());
            }
            Numbering::AckOf(ack) => {
                h.seq = self.socket.next_seq();
                h.ack = Some(ack);
            }
            Numbering::Abnormal { seq, ack } => {
                h.seq = seq;
                h.ack = Some(ack);
                self.stats.packets_written += 1;
                self.tracer.write(self.state(), &h);
                return h;
            }
        }
        self.finish_outgoing(h, now)
    }

    /// Build the next data packet, or `None` outside OPEN.
    pub fn stamp_data(&mut self, data: Bytes, now: Instant) -> Option<Header> {
        if self.state() != State::Open {
            self.note_drop(None, DropReason::StateFilter, "data outside OPEN");
            return None;
        }
        self.stats.bytes_written += data.len() as u64;
        let h = Header::new(PacketType::Data, self.socket.next_seq()).with_data(data);
        Some(self.finish_outgoing(h, now))
    }

    fn finish_outgoing(&mut self, mut h: Header, now: Instant) -> Header {
        let (ccval, mut options) =
            self.tx_cc
                .on_write(h.packet_type, h.seq, h.data.len(), now);
        options.extend(self.rx_cc.on_write(h.packet_type, h.seq, h.ack, now));
        h.ccval = ccval & 0x0f;
        h.options.extend(options);
        self.stats.packets_written += 1;
        self.tracer.write(self.state(), &h);
        h
    }

    // ─── Transitions ────────────────────────────────────────────────────

    fn set_state(&mut self, to: State) {
        let from = self.socket.state();
        if from == to {
            return;
        }
        self.socket.set_state(to);
        self.timer_gen += 1;
        self.stats.state_changes += 1;
        self.tracer.state(from, to);
        self.events.push_back(ConnEvent::StateChanged { from, to });
    }

    fn arm(&mut self, kind: TimerKind, schedule: Schedule) {
        self.events.push_back(ConnEvent::ArmTimer(TimerSpec {
            kind,
            generation: self.timer_gen,
            schedule,
        }));
    }

    fn set_error(&mut self, err: ConnError) {
        if self.error.is_none() {
            self.error = Some(err);
        }
    }

    pub(crate) fn set_peer_reset(&mut self, code: ResetCode) {
        self.set_error(ConnError::Reset(code));
    }

    pub(crate) fn open_ccid(&mut self, now: Instant) {
        if self.ccid.open() {
            self.tx_cc.open(now);
            self.rx_cc.open(now);
            self.tracer.event(self.state(), None, "ccid open");
        }
    }

    fn close_ccid(&mut self) {
        if self.ccid.close() {
            self.tracer.event(self.state(), None, "ccid close");
        }
        self.tx_cc.close();
        self.rx_cc.close();
    }

    /// Idempotent. Records `Closed` unless an error is already set.
    pub(crate) fn teardown_user(&mut self) {
        if self.user_torn {
            return;
        }
        self.user_torn = true;
        self.set_error(ConnError::Closed);
        self.events.push_back(ConnEvent::TeardownUser);
    }

    fn teardown_write_loop(&mut self) {
        if !self.write_torn {
            self.write_torn = true;
            self.events.push_back(ConnEvent::TeardownWriteLoop);
        }
        self.close_ccid();
    }

    /// Server side: wait for a Request.
    pub fn listen(&mut self) {
        self.socket.set_role(Role::Server);
        self.set_state(State::Listen);
        self.arm(TimerKind::Listen, Schedule::Once(self.cfg.listen_timeout));
    }

    /// Client side: send a Request for `service_code`.
    pub fn connect(&mut self, service_code: u32) {
        self.socket.set_role(Role::Client);
        self.set_state(State::Request);
        self.socket.set_service_code(service_code);
        let iss = self.socket.choose_iss();
        self.socket.set_gar(iss);
        let req = self.gen_request();
        self.inject(req);
        self.arm(
            TimerKind::Request,
            Schedule::Backoff(self.cfg.request_backoff),
        );
    }

    pub(crate) fn goto_respond(&mut self, service_code: u32, seq: u64) {
        self.set_state(State::Respond);
        let iss = self.socket.choose_iss();
        self.socket.set_gar(iss);
        self.socket.set_isr(seq);
        self.socket.set_gsr(seq);
        self.socket.set_service_code(service_code);
        self.arm(TimerKind::Respond, Schedule::Once(self.cfg.respond_timeout));
    }

    pub(crate) fn goto_partopen(&mut self) {
        self.set_state(State::PartOpen);
        self.arm(
            TimerKind::PartOpen,
            Schedule::Backoff(self.cfg.partopen_backoff()),
        );
    }

    pub(crate) fn goto_open(&mut self, seq: u64, now: Instant) {
        self.socket.set_osr(seq);
        self.set_state(State::Open);
        self.open_ccid(now);
    }

    pub(crate) fn goto_timewait(&mut self) {
        self.teardown_user();
        self.set_state(State::TimeWait);
        self.close_ccid();
        self.arm(TimerKind::TimeWait, Schedule::Once(self.cfg.msl * 2));
    }

    pub(crate) fn goto_closing(&mut self) {
        self.teardown_user();
        self.set_state(State::Closing);
        self.close_ccid();
        let spec = self.cfg.closing_backoff(self.socket.rtt());
        self.arm(TimerKind::Closing, Schedule::Backoff(spec));
    }

    /// Terminal. Idempotent.
    pub(crate) fn goto_closed(&mut self) {
        self.set_state(State::Closed);
        self.teardown_user();
        self.teardown_write_loop();
    }

    /// Record `err`, close, and send a Reset with `code`.
    fn reset(&mut self, code: ResetCode, err: ConnError) {
        self.set_error(err);
        self.goto_closed();
        let r = self.gen_reset(code);
        self.inject(r);
    }

    pub fn abort_with(&mut self, code: ResetCode) {
        if self.state() == State::Closed {
            return;
        }
        tracing::debug!(code = ?code, state = self.state().as_str(), "abort");
        self.reset(code, ConnError::Aborted);
    }

    /// Close without telling the peer.
    pub fn abort_quietly(&mut self) {
        self.set_error(ConnError::Aborted);
        self.goto_closed();
    }

    // ─── User Calls ─────────────────────────────────────────────────────

    /// Begin an orderly close (RFC 4340 §8.3). Before the handshake
    /// completes this resets the connection instead.
    pub fn close(&mut self) -> Result<(), ConnError> {
        match self.state() {
            State::Listen | State::Request | State::Respond => {
                self.reset(ResetCode::Closed, ConnError::Closed);
                Ok(())
            }
            State::PartOpen | State::Open => {
                let c = self.gen_close();
                self.inject(c);
                self.goto_closing();
                Ok(())
            }
            State::CloseReq | State::Closing | State::TimeWait | State::Closed => {
                Err(self.terminal_error())
            }
        }
    }

    pub fn abort(&mut self) {
        self.abort_with(ResetCode::Aborted);
    }

    // ─── Controller Directives ──────────────────────────────────────────

    /// Act on a controller result. Returns `false` if the packet at hand
    /// should go no further.
    pub(crate) fn apply_congestion(&mut self, half: &'static str, res: CongestionResult) -> bool {
        match res {
            Ok(CongestionAction::None) => true,
            Ok(CongestionAction::Ack) => {
                let a = self.gen_ack();
                self.inject(a);
                true
            }
            Ok(CongestionAction::Drop) => false,
            Ok(CongestionAction::Reset(code)) => {
                self.tracer
                    .event(self.state(), None, format!("{} controller reset {:?}", half, code));
                self.abort_with(code);
                false
            }
            Err(e) => {
                tracing::debug!(half, error = %e, "controller complaint");
                true
            }
        }
    }

    /// Periodic poll from the idle loop.
    pub fn on_idle(&mut self, now: Instant) {
        if self.state() == State::Closed {
            return;
        }
        self.tracer.idle(self.state());
        self.sync_with_controller();
        let res = self.tx_cc.on_idle(now);
        self.apply_congestion("sender", res);
        if self.state() == State::Closed {
            return;
        }
        let res = self.rx_cc.on_idle(now);
        self.apply_congestion("receiver", res);
    }

    // ─── Timers ─────────────────────────────────────────────────────────

    fn timer_live(&self, kind: TimerKind, generation: u64) -> bool {
        generation == self.timer_gen && self.state() == kind.state()
    }

    /// A back-off round elapsed. Returns whether the timer is still live.
    pub fn on_timer(&mut self, kind: TimerKind, generation: u64) -> bool {
        if !self.timer_live(kind, generation) {
            return false;
        }
        match kind {
            TimerKind::Request => {
                self.tracer.event(self.state(), None, "request resend");
                let r = self.gen_request();
                self.inject(r);
            }
            TimerKind::PartOpen => {
                let a = self.gen_ack();
                self.inject(a);
                // Sync draws a SyncAck, which opens us even if the server
                // has no data to send.
                let s = self.gen_sync(None);
                self.inject(s);
            }
            TimerKind::Closing => {
                let c = self.gen_close();
                self.inject(c);
            }
            TimerKind::Listen | TimerKind::Respond | TimerKind::TimeWait => {}
        }
        true
    }

    /// A one-shot timer fired, or a back-off ran out of budget.
    pub fn on_timer_expired(&mut self, kind: TimerKind, generation: u64) {
        if !self.timer_live(kind, generation) {
            return;
        }
        tracing::debug!(timer = ?kind, "timer expired");
        match kind {
            TimerKind::Listen | TimerKind::Respond | TimerKind::TimeWait => self.abort_quietly(),
            TimerKind::Request | TimerKind::PartOpen => self.abort_with(ResetCode::Aborted),
            TimerKind::Closing => self.goto_timewait(),
        }
    }
}

//! # Connection Runtime
//!
//! Drives a [`Machine`] with OS threads and crossbeam channels:
//!
//! ```text
//!   link ──► read loop ──► Machine::on_read ──► app queue ──► Conn::read
//!                               │
//!                     outbox ──► ctrl queue ─┐
//!   Conn::write ──► data rendezvous ─────────┴─► write loop ──► link
//!                                                 (strobe, stamp)
//!   idle loop ──► Machine::on_idle      timer threads ──► Machine::on_timer
//! ```
//!
//! One mutex guards the machine together with the channel ends it feeds.
//! Only `strobe`, link I/O and the application channel waits happen outside
//! it. After every machine call the outbox is flushed into the control
//! queue before any event is processed, so a Reset injected on the way to
//! CLOSED still leaves before the write loop stops.

use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::thread;
use std::time::Duration;

use bytes::Bytes;
use crossbeam_channel::{select, Receiver, RecvTimeoutError, Sender, TryRecvError, TrySendError};
use quanta::Instant;

use crate::ccid::{new_controllers, SenderCongestionControl};
use crate::config::ConnConfig;
use crate::error::{ConnError, LinkError, Misuse};
use crate::link::Link;
use crate::machine::{ConnEvent, Machine, Pending, Schedule, TimerSpec};
use crate::socket::{Role, State};
use crate::stats::{ConnStats, DropReason};
use crate::trace::{TraceSink, Tracer};
use crate::wire::Header;

/// Channel ends owned alongside the machine. Dropping a sender is how a
/// teardown reaches the blocked side.
struct Plumbing {
    app_tx: Option<Sender<Bytes>>,
    data_tx: Option<Sender<Bytes>>,
    ctrl_tx: Option<Sender<Pending>>,
    user_closed_tx: Option<Sender<()>>,
    wake_tx: Sender<()>,
    timer_cancel: Option<Sender<()>>,
    closed_by_user: bool,
}

struct Core {
    machine: Machine,
    plumbing: Plumbing,
}

struct Shared {
    core: Mutex<Core>,
    link: Arc<dyn Link>,
    tx_cc: Arc<dyn SenderCongestionControl>,
    label: String,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Core> {
        self.core.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Run `f` on the machine, then act on what it produced.
    fn with_machine<R>(self: &Arc<Self>, f: impl FnOnce(&mut Machine) -> R) -> R {
        let mut core = self.lock();
        let r = f(&mut core.machine);
        self.apply(&mut core);
        r
    }

    fn apply(self: &Arc<Self>, core: &mut Core) {
        let Core { machine, plumbing } = core;

        for p in machine.take_outbox() {
            let Some(tx) = plumbing.ctrl_tx.as_ref() else {
                machine
                    .tracer
                    .event(machine.state(), Some(&p.header), "write loop gone");
                continue;
            };
            match tx.try_send(p) {
                Ok(()) => {}
                Err(TrySendError::Full(p)) => {
                    machine.note_drop(Some(&p.header), DropReason::SlowStrobe, "control queue full")
                }
                Err(TrySendError::Disconnected(_)) => {}
            }
        }

        for ev in machine.take_events() {
            match ev {
                ConnEvent::Deliver(data) => {
                    let Some(tx) = plumbing.app_tx.as_ref() else {
                        continue;
                    };
                    let len = data.len() as u64;
                    match tx.try_send(data) {
                        Ok(()) => machine.stats.bytes_delivered += len,
                        Err(TrySendError::Full(_)) => {
                            machine.note_drop(None, DropReason::SlowApp, "app queue full")
                        }
                        Err(TrySendError::Disconnected(_)) => {}
                    }
                }
                ConnEvent::StateChanged { .. } => {
                    plumbing.timer_cancel = None;
                    let _ = plumbing.wake_tx.try_send(());
                }
                ConnEvent::ArmTimer(spec) => {
                    let (cancel_tx, cancel_rx) = crossbeam_channel::bounded(0);
                    plumbing.timer_cancel = Some(cancel_tx);
                    if let Err(e) = spawn_timer(Arc::downgrade(self), spec, cancel_rx) {
                        tracing::error!(conn = %self.label, error = %e, "failed to spawn timer");
                    }
                }
                ConnEvent::TeardownUser => {
                    plumbing.app_tx = None;
                    plumbing.data_tx = None;
                    plumbing.user_closed_tx = None;
                }
                ConnEvent::TeardownWriteLoop => {
                    plumbing.ctrl_tx = None;
                    let _ = plumbing.wake_tx.try_send(());
                }
            }
        }
    }
}

// ─── Threads ────────────────────────────────────────────────────────────────

fn spawn_timer(
    shared: Weak<Shared>,
    spec: TimerSpec,
    cancel: Receiver<()>,
) -> std::io::Result<()> {
    let name = format!("dccp-timer-{:?}", spec.kind).to_lowercase();
    thread::Builder::new().name(name).spawn(move || {
        // `true` once the full period passed without a cancel.
        let wait = |d: Duration| matches!(cancel.recv_timeout(d), Err(RecvTimeoutError::Timeout));
        let fire = |f: &dyn Fn(&mut Machine) -> bool| -> bool {
            match shared.upgrade() {
                Some(s) => s.with_machine(|m| f(m)),
                None => false,
            }
        };
        match spec.schedule {
            Schedule::Once(d) => {
                if wait(d) {
                    fire(&|m| {
                        m.on_timer_expired(spec.kind, spec.generation);
                        false
                    });
                }
            }
            Schedule::Backoff(backoff) => {
                for sleep in backoff.start() {
                    if !wait(sleep) || !fire(&|m| m.on_timer(spec.kind, spec.generation)) {
                        return;
                    }
                }
                fire(&|m| {
                    m.on_timer_expired(spec.kind, spec.generation);
                    false
                });
            }
        }
    })?;
    Ok(())
}

fn read_loop(shared: Arc<Shared>) {
    loop {
        let timeout = shared.lock().machine.read_timeout();
        match shared.link.read_header(timeout) {
            Ok(h) => shared.with_machine(|m| m.on_read(h, Instant::now())),
            Err(LinkError::Timeout) => {
                if shared.lock().machine.state() == State::Closed {
                    break;
                }
            }
            Err(LinkError::Wire(e)) => {
                let mut core = shared.lock();
                core.machine
                    .note_drop(None, DropReason::Malformed, &e.to_string());
            }
            Err(e) => {
                shared.with_machine(|m| {
                    if !matches!(m.state(), State::TimeWait | State::Closed) {
                        tracing::warn!(conn = %shared.label, error = %e, "link failed");
                    }
                    m.abort_quietly();
                });
                break;
            }
        }
    }
    tracing::debug!(conn = %shared.label, "read loop exit");
}

fn write_loop(shared: Arc<Shared>, ctrl_rx: Receiver<Pending>, data_rx: Receiver<Bytes>, wake_rx: Receiver<()>) {
    let never = crossbeam_channel::never::<Bytes>();
    let mut data_live = true;
    loop {
        // Control packets go first.
        match ctrl_rx.try_recv() {
            Ok(p) => {
                emit_control(&shared, p);
                continue;
            }
            Err(TryRecvError::Disconnected) => break,
            Err(TryRecvError::Empty) => {}
        }

        // Writers stay blocked until OPEN.
        let accepting = data_live && shared.lock().machine.state() == State::Open;
        let data = if accepting { &data_rx } else { &never };
        select! {
            recv(ctrl_rx) -> msg => match msg {
                Ok(p) => emit_control(&shared, p),
                Err(_) => break,
            },
            recv(wake_rx) -> _ => {}
            recv(data) -> msg => match msg {
                Ok(bytes) => emit_data(&shared, bytes),
                Err(_) => data_live = false,
            },
        }
    }
    shared.link.close();
    tracing::debug!(conn = %shared.label, "write loop exit");
}

fn emit_control(shared: &Arc<Shared>, p: Pending) {
    let h = shared.with_machine(|m| m.stamp(p, Instant::now()));
    send(shared, &h);
}

fn emit_data(shared: &Arc<Shared>, bytes: Bytes) {
    // Pacing blocks; never hold the lock across it.
    shared.tx_cc.strobe();
    if let Some(h) = shared.with_machine(|m| m.stamp_data(bytes, Instant::now())) {
        send(shared, &h);
    }
}

fn send(shared: &Arc<Shared>, h: &Header) {
    match shared.link.write_header(h) {
        Ok(()) | Err(LinkError::Timeout) => {}
        Err(LinkError::Wire(e)) => {
            tracing::warn!(conn = %shared.label, seq = h.seq, error = %e, "dropping unencodable packet");
        }
        Err(e) => {
            tracing::debug!(conn = %shared.label, error = %e, "link write failed");
            shared.with_machine(|m| m.abort_quietly());
        }
    }
}

fn idle_loop(shared: Arc<Shared>) {
    loop {
        let interval = {
            let core = shared.lock();
            if core.machine.state() == State::Closed {
                break;
            }
            core.machine.idle_interval()
        };
        thread::sleep(interval);
        shared.with_machine(|m| m.on_idle(Instant::now()));
    }
    tracing::debug!(conn = %shared.label, "idle loop exit");
}

// ─── Conn ───────────────────────────────────────────────────────────────────

/// A DCCP connection. Datagram semantics: each `write` is one packet, each
/// `read` returns one packet's payload; delivery is unreliable and
/// unordered.
pub struct Conn {
    shared: Arc<Shared>,
    app_rx: Receiver<Bytes>,
    user_closed_rx: Receiver<()>,
}

impl Conn {
    /// Start a client connection over `link`.
    pub fn dial(
        link: Arc<dyn Link>,
        service_code: u32,
        config: ConnConfig,
        trace: Option<Arc<dyn TraceSink>>,
    ) -> std::io::Result<Conn> {
        Self::start(link, Role::Client, config, trace, |m| m.connect(service_code))
    }

    /// Start a server connection over `link`, waiting for a Request.
    pub fn accept(
        link: Arc<dyn Link>,
        config: ConnConfig,
        trace: Option<Arc<dyn TraceSink>>,
    ) -> std::io::Result<Conn> {
        Self::start(link, Role::Server, config, trace, Machine::listen)
    }

    fn start(
        link: Arc<dyn Link>,
        role: Role,
        config: ConnConfig,
        trace: Option<Arc<dyn TraceSink>>,
        init: impl FnOnce(&mut Machine),
    ) -> std::io::Result<Conn> {
        let label = match role {
            Role::Client => format!("client {}", link.local_label()),
            Role::Server => format!("server {}", link.local_label()),
        };
        let (tx_cc, rx_cc) = new_controllers(&config.controller);
        let (app_tx, app_rx) = crossbeam_channel::bounded(config.app_queue);
        let (data_tx, data_rx) = crossbeam_channel::bounded(0);
        let (ctrl_tx, ctrl_rx) = crossbeam_channel::bounded(config.ctrl_queue);
        let (user_closed_tx, user_closed_rx) = crossbeam_channel::bounded(0);
        let (wake_tx, wake_rx) = crossbeam_channel::bounded(1);

        let tracer = Tracer::new(
            match role {
                Role::Client => "client",
                Role::Server => "server",
            },
            trace,
        );
        let machine = Machine::new(role, config, tx_cc.clone(), rx_cc, tracer);
        let shared = Arc::new(Shared {
            core: Mutex::new(Core {
                machine,
                plumbing: Plumbing {
                    app_tx: Some(app_tx),
                    data_tx: Some(data_tx),
                    ctrl_tx: Some(ctrl_tx),
                    user_closed_tx: Some(user_closed_tx),
                    wake_tx,
                    timer_cancel: None,
                    closed_by_user: false,
                },
            }),
            link,
            tx_cc,
            label,
        });

        tracing::info!(conn = %shared.label, remote = %shared.link.remote_label(), "connection starting");
        shared.with_machine(init);

        let s = shared.clone();
        thread::Builder::new()
            .name("dccp-read".into())
            .spawn(move || read_loop(s))?;
        let s = shared.clone();
        thread::Builder::new()
            .name("dccp-write".into())
            .spawn(move || write_loop(s, ctrl_rx, data_rx, wake_rx))?;
        let s = shared.clone();
        thread::Builder::new()
            .name("dccp-idle".into())
            .spawn(move || idle_loop(s))?;

        Ok(Conn {
            shared,
            app_rx,
            user_closed_rx,
        })
    }

    fn terminal(&self) -> ConnError {
        self.shared.lock().machine.terminal_error()
    }

    /// Send one segment. Blocks until the write loop takes it, which is
    /// paced by the congestion controller.
    pub fn write(&self, data: Bytes) -> Result<(), ConnError> {
        if data.is_empty() {
            return Err(ConnError::Misuse(Misuse::EmptySegment));
        }
        let (tx, mtu, closed_by_user) = {
            let core = self.shared.lock();
            (
                core.plumbing.data_tx.clone(),
                core.machine.mtu(),
                core.plumbing.closed_by_user,
            )
        };
        if data.len() > mtu {
            return Err(ConnError::Misuse(Misuse::SegmentTooLarge));
        }
        let Some(tx) = tx else {
            if closed_by_user {
                return Err(ConnError::Misuse(Misuse::WriteAfterClose));
            }
            return Err(self.terminal());
        };
        select! {
            send(tx, data) -> res => res.map_err(|_| self.terminal()),
            recv(self.user_closed_rx) -> _ => Err(self.terminal()),
        }
    }

    /// Next received segment. Once the connection is over, the recorded
    /// terminal error.
    pub fn read(&self) -> Result<Bytes, ConnError> {
        self.app_rx.recv().map_err(|_| self.terminal())
    }

    /// Like [`Conn::read`], giving up with `Ok(None)` after `timeout`.
    pub fn read_timeout(&self, timeout: Duration) -> Result<Option<Bytes>, ConnError> {
        match self.app_rx.recv_timeout(timeout) {
            Ok(b) => Ok(Some(b)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(self.terminal()),
        }
    }

    /// Orderly close. Later calls return the terminal error.
    pub fn close(&self) -> Result<(), ConnError> {
        let mut core = self.shared.lock();
        core.plumbing.closed_by_user = true;
        let res = core.machine.close();
        self.shared.apply(&mut core);
        res
    }

    /// Reset the connection.
    pub fn abort(&self) {
        self.shared.with_machine(Machine::abort);
    }

    pub fn state(&self) -> State {
        self.shared.lock().machine.state()
    }

    /// Terminal error, once there is one.
    pub fn error(&self) -> Option<ConnError> {
        self.shared.lock().machine.error()
    }

    pub fn stats(&self) -> ConnStats {
        self.shared.lock().machine.stats()
    }

    pub fn rtt(&self) -> Duration {
        self.shared.lock().machine.rtt()
    }

    /// Largest segment `write` accepts.
    pub fn mtu(&self) -> usize {
        self.shared.lock().machine.mtu()
    }

    pub fn local_label(&self) -> String {
        self.shared.link.local_label()
    }

    pub fn remote_label(&self) -> String {
        self.shared.link.remote_label()
    }

    /// Poll until `pred` holds for the state or `timeout` passes.
    pub fn wait_for(&self, timeout: Duration, pred: impl Fn(State) -> bool) -> bool {
        let deadline = std::time::Instant::now() + timeout;
        loop {
            if pred(self.state()) {
                return true;
            }
            if std::time::Instant::now() >= deadline {
                return false;
            }
            thread::sleep(Duration::from_millis(2));
        }
    }
}

impl Drop for Conn {
    fn drop(&mut self) {
        let state = self.state();
        if state != State::Closed && state < State::CloseReq {
            tracing::debug!(conn = %self.shared.label, state = state.as_str(), "dropped while live, aborting");
            self.abort();
        }
    }
}

impl std::fmt::Debug for Conn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Conn")
            .field("label", &self.shared.label)
            .field("state", &self.state())
            .finish()
    }
}

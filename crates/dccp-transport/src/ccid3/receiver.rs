//! CCID3 receiving half.
//!
//! Feedback goes out at least once per RTT while data flows, and right away
//! when the loss event rate rises or the sender's window counter has moved
//! a full RTT past the last feedback.

use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use quanta::Instant;

use super::interval::Arrival;
use super::options::{LossEventRate, ReceiveRate, RoundtripReport};
use super::receive_rate::ReceiveRateMeter;
use super::receiver_loss::ReceiverLossTracker;
use super::rtt::ReceiverRtt;
use super::window_counter::{wc_add, wc_less};
use crate::ccid::{
    Activation, CongestionAction, CongestionResult, ControllerConfig, FeedforwardHeader,
    ReceiverCongestionControl, CCID3,
};
use crate::options::{DccpOption, ElapsedTime};
use crate::seq::seq_lt;
use crate::wire::PacketType;

/// Window-counter steps that make up one RTT.
const CCVAL_FEEDBACK_STEPS: u8 = 4;

#[derive(Debug)]
struct ReceiverState {
    activation: Activation,
    rtt: ReceiverRtt,
    loss: ReceiverLossTracker,
    meter: ReceiveRateMeter,
    /// Highest sequence number seen and when it arrived.
    newest: Option<(u64, Instant)>,
    /// CCVal of the newest data packet.
    ccval: Option<u8>,
    /// Values at the previous feedback.
    fed_rate_inv: u32,
    fed_ccval: Option<u8>,
    fed_at: Option<Instant>,
    data_since_feedback: bool,
}

pub struct Ccid3Receiver {
    state: Mutex<ReceiverState>,
}

impl Ccid3Receiver {
    pub fn new(cfg: &ControllerConfig) -> Self {
        Ccid3Receiver {
            state: Mutex::new(ReceiverState {
                activation: Activation::new(),
                rtt: ReceiverRtt::new(cfg.rtt_default),
                loss: ReceiverLossTracker::new(),
                meter: ReceiveRateMeter::new(),
                newest: None,
                ccval: None,
                fed_rate_inv: u32::MAX,
                fed_ccval: None,
                fed_at: None,
                data_since_feedback: false,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ReceiverState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl ReceiverCongestionControl for Ccid3Receiver {
    fn id(&self) -> u8 {
        CCID3
    }

    fn open(&self, _now: Instant) {
        if self.lock().activation.open() {
            tracing::debug!("ccid3 receiver open");
        }
    }

    fn on_write(
        &self,
        packet_type: PacketType,
        _seq: u64,
        ack: Option<u64>,
        now: Instant,
    ) -> Vec<DccpOption> {
        let mut st = self.lock();
        let Some(ack) = ack else {
            return Vec::new();
        };
        if !st.activation.is_open() || !packet_type.is_ack() {
            return Vec::new();
        }

        let rtt = st.rtt.rtt(now);
        let mut options = Vec::with_capacity(5);
        if let Some((seq, at)) = st.newest {
            if seq == ack {
                let elapsed = now.saturating_duration_since(at);
                options.push(ElapsedTime { elapsed }.encode());
            }
        }
        let rate = st.meter.flush(rtt, now);
        options.push(ReceiveRate { rate }.encode());
        match st.loss.intervals_option(ack).encode() {
            Some(o) => options.push(o),
            None => tracing::warn!(ack, "loss intervals do not fit the option"),
        }
        let digest = st.loss.digest();
        options.push(
            LossEventRate {
                rate_inv: digest.rate_inv,
            }
            .encode(),
        );
        options.push(digest.encode());

        st.fed_rate_inv = digest.rate_inv;
        st.fed_ccval = st.ccval;
        st.fed_at = Some(now);
        st.data_since_feedback = false;
        options
    }

    fn on_read(&self, ff: &FeedforwardHeader<'_>) -> CongestionResult {
        let mut st = self.lock();
        if !st.activation.is_open() {
            return Ok(CongestionAction::None);
        }
        if let Some(r) = ff.options.iter().find_map(RoundtripReport::decode) {
            st.rtt.on_report(r.rtt, ff.time);
        }
        let is_data = ff.packet_type.is_data();
        if is_data {
            st.rtt.on_ccval(ff.ccval, ff.time);
            st.ccval = Some(ff.ccval);
            st.meter.on_data(ff.data_len, ff.time);
            st.data_since_feedback = true;
        }
        if st.newest.map_or(true, |(s, _)| seq_lt(s, ff.seq)) {
            st.newest = Some((ff.seq, ff.time));
        }

        let rtt = st.rtt.rtt(ff.time);
        st.loss.on_read(
            Arrival {
                seq: ff.seq,
                time: ff.time,
                is_data,
            },
            rtt,
        );

        let rate_inv = st.loss.loss_event_rate_inv();
        if rate_inv < st.fed_rate_inv {
            tracing::trace!(rate_inv, prev = st.fed_rate_inv, "loss event rate rose");
            return Ok(CongestionAction::Ack);
        }
        if let (true, Some(fed)) = (is_data, st.fed_ccval) {
            if !wc_less(ff.ccval, wc_add(fed, CCVAL_FEEDBACK_STEPS)) {
                return Ok(CongestionAction::Ack);
            }
        }
        Ok(CongestionAction::None)
    }

    fn on_idle(&self, now: Instant) -> CongestionResult {
        let st = self.lock();
        if !st.activation.is_open() || !st.data_since_feedback {
            return Ok(CongestionAction::None);
        }
        let rtt: Duration = st.rtt.rtt(now);
        let due = st
            .fed_at
            .map_or(true, |t| now.saturating_duration_since(t) > rtt);
        Ok(if due {
            CongestionAction::Ack
        } else {
            CongestionAction::None
        })
    }

    fn close(&self) {
        if self.lock().activation.close() {
            tracing::debug!("ccid3 receiver closed");
        }
    }
}

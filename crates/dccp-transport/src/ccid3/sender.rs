//! CCID3 sending half.
//!
//! All state sits behind one mutex; the strober has its own lock so a
//! blocked writer never holds up feedback processing.

use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use quanta::Instant;

use super::nofeedback::NofeedbackTimer;
use super::options::{ReceiveRate, RoundtripReport};
use super::rate::{RateCalculator, RateFeedback, RatePhase};
use super::rtt::SenderRtt;
use super::sender_loss::SenderLossTracker;
use super::window_counter::WindowCounter;
use super::MAX_NOFEEDBACK_EXPIRIES;
use crate::ccid::strober::Strober;
use crate::ccid::{
    Activation, CongestionAction, CongestionError, CongestionResult, ControllerConfig,
    FeedbackHeader, Phase, SenderCongestionControl, CCID3,
};
use crate::options::{DccpOption, ElapsedTime};
use crate::stats::SenderSnapshot;
use crate::wire::{PacketType, ResetCode};

#[derive(Debug)]
struct SenderState {
    activation: Activation,
    rtt: SenderRtt,
    wc: WindowCounter,
    nofeedback: NofeedbackTimer,
    rate: RateCalculator,
    loss: SenderLossTracker,
    /// Payload written since the previous feedback.
    written: u64,
    last_feedback: Option<Instant>,
}

pub struct Ccid3Sender {
    state: Mutex<SenderState>,
    strober: Strober,
    ccmps: u32,
}

impl Ccid3Sender {
    pub fn new(cfg: &ControllerConfig) -> Self {
        let rate = RateCalculator::new(cfg.ccmps, cfg.oscillation_reduction);
        let strober = Strober::new(Strober::interval_for(rate.x(), cfg.ccmps));
        Ccid3Sender {
            state: Mutex::new(SenderState {
                activation: Activation::new(),
                rtt: SenderRtt::new(cfg.rtt_default),
                wc: WindowCounter::new(),
                nofeedback: NofeedbackTimer::new(),
                rate,
                loss: SenderLossTracker::new(),
                written: 0,
                last_feedback: None,
            }),
            strober,
            ccmps: cfg.ccmps,
        }
    }

    fn lock(&self) -> MutexGuard<'_, SenderState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn repace(&self, st: &SenderState) {
        self.strober.set_rate(st.rate.pacing_rate(), st.rate.ss());
    }
}

impl SenderCongestionControl for Ccid3Sender {
    fn id(&self) -> u8 {
        CCID3
    }

    fn ccmps(&self) -> u32 {
        self.ccmps
    }

    fn rtt(&self) -> Duration {
        self.lock().rtt.rtt()
    }

    fn open(&self, _now: Instant) {
        let mut st = self.lock();
        if st.activation.open() {
            tracing::debug!(x = st.rate.x(), "ccid3 sender open");
        }
    }

    fn on_write(
        &self,
        packet_type: PacketType,
        seq: u64,
        data_len: usize,
        now: Instant,
    ) -> (u8, Vec<DccpOption>) {
        let mut st = self.lock();
        if !st.activation.is_open() {
            return (0, Vec::new());
        }
        let rtt = st.rtt.rtt();
        st.rtt.on_write(seq, now);
        let ccval = st.wc.on_write(seq, rtt, now);
        if !packet_type.is_data() {
            return (ccval, Vec::new());
        }
        st.nofeedback.on_data_sent(now);
        st.written += data_len as u64;
        let mut options = Vec::new();
        if st.rtt.has_rtt() {
            options.push(RoundtripReport { rtt }.encode());
        }
        (ccval, options)
    }

    fn on_read(&self, fb: &FeedbackHeader<'_>) -> CongestionResult {
        let mut st = self.lock();
        if !st.activation.is_open() || !fb.packet_type.is_ack() {
            return Ok(CongestionAction::None);
        }
        let Some(ack) = fb.ack else {
            return Err(CongestionError::NotFeedback);
        };

        let elapsed = fb
            .options
            .iter()
            .find_map(ElapsedTime::decode)
            .map(|e| e.elapsed)
            .unwrap_or_default();
        let sample = st.rtt.on_ack(ack, elapsed, fb.time);
        let rtt = st.rtt.rtt();
        if st.rtt.has_rtt() {
            st.nofeedback.on_rtt(rtt);
        }
        st.nofeedback.on_feedback(fb.time);
        st.wc.on_ack(ack, rtt, fb.time);

        let loss = st.loss.on_read(fb)?;
        let recv_rate = fb
            .options
            .iter()
            .find_map(ReceiveRate::decode)
            .ok_or(CongestionError::MissingOption("ReceiveRate"))?
            .rate;

        // Data-limited: less than half of what X allowed went out.
        let data_limited = st.last_feedback.is_some_and(|last| {
            let span = fb.time.saturating_duration_since(last);
            let allowed = (st.rate.x() as f64 * span.as_secs_f64()) as u64;
            st.written.saturating_mul(2) < allowed
        });
        st.written = 0;
        st.last_feedback = Some(fb.time);

        st.rate.on_feedback(RateFeedback {
            now: fb.time,
            rtt,
            rtt_sample: sample,
            recv_rate: u64::from(recv_rate),
            rate_inv: loss.rate_inv,
            new_loss: loss.new_loss_count > 0,
            data_limited,
        });
        tracing::trace!(
            x = st.rate.x(),
            rtt_us = rtt.as_micros() as u64,
            rate_inv = loss.rate_inv,
            recv_rate,
            data_limited,
            "ccid3 feedback"
        );
        self.repace(&st);
        Ok(CongestionAction::None)
    }

    fn on_idle(&self, now: Instant) -> CongestionResult {
        let mut st = self.lock();
        if !st.activation.is_open() || !st.nofeedback.poll(now) {
            return Ok(CongestionAction::None);
        }
        st.rate.on_nofeedback();
        self.repace(&st);
        let expiries = st.nofeedback.expiries();
        tracing::debug!(x = st.rate.x(), expiries, "nofeedback timer expired");
        if expiries >= MAX_NOFEEDBACK_EXPIRIES {
            return Ok(CongestionAction::Reset(ResetCode::Aborted));
        }
        Ok(CongestionAction::None)
    }

    fn strobe(&self) {
        if self.lock().activation.is_open() {
            self.strober.strobe();
        }
    }

    fn close(&self) {
        if self.lock().activation.close() {
            tracing::debug!("ccid3 sender closed");
        }
        self.strober.close();
    }

    fn snapshot(&self) -> SenderSnapshot {
        let st = self.lock();
        let phase = match (st.activation.phase(), st.rate.phase()) {
            (Phase::Init, _) => "init",
            (Phase::Closed, _) => "closed",
            (Phase::Open, RatePhase::Initial | RatePhase::SlowStart) => "slowstart",
            (Phase::Open, RatePhase::Equation) => "equation",
        };
        SenderSnapshot {
            ccid: CCID3,
            phase,
            x_bps: st.rate.x(),
            rtt_us: st.rtt.rtt().as_micros() as u64,
            loss_rate_inv: st.loss.rate_inv(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ccid3::options::{LossIntervals, OPT_ROUNDTRIP_REPORT};

    fn sender() -> Ccid3Sender {
        Ccid3Sender::new(&ControllerConfig::default())
    }

    fn feedback_options(rate: u32) -> Vec<DccpOption> {
        vec![
            ElapsedTime {
                elapsed: Duration::ZERO,
            }
            .encode(),
            ReceiveRate { rate }.encode(),
            LossIntervals::default().encode().unwrap(),
        ]
    }

    #[test]
    fn inert_until_open() {
        let s = sender();
        let now = Instant::now();
        assert_eq!(s.on_write(PacketType::Data, 1, 100, now), (0, vec![]));
        assert_eq!(s.on_idle(now + Duration::from_secs(100)), Ok(CongestionAction::None));
        assert_eq!(s.snapshot().phase, "init");
    }

    #[test]
    fn feedback_samples_rtt_and_leaves_initial_rate() {
        let s = sender();
        let base = Instant::now();
        s.open(base);
        s.on_write(PacketType::Data, 10, 500, base);
        let opts = feedback_options(0);
        let fb = FeedbackHeader {
            packet_type: PacketType::Ack,
            seq: 1,
            ack: Some(10),
            options: &opts,
            time: base + Duration::from_millis(100),
        };
        assert_eq!(s.on_read(&fb), Ok(CongestionAction::None));
        assert_eq!(s.rtt(), Duration::from_millis(50));
        let snap = s.snapshot();
        assert_eq!(snap.phase, "slowstart");
        // W_init = min(4·3000, max(2·3000, 4380)) = 6000 B per 50 ms
        assert_eq!(snap.x_bps, 120_000);

        let (_, opts) = s.on_write(PacketType::Data, 11, 500, base + Duration::from_millis(101));
        assert!(opts.iter().any(|o| o.kind == OPT_ROUNDTRIP_REPORT));
        s.close();
    }

    #[test]
    fn missing_receive_rate_is_reported() {
        let s = sender();
        let base = Instant::now();
        s.open(base);
        s.on_write(PacketType::Data, 3, 100, base);
        let opts = vec![LossIntervals::default().encode().unwrap()];
        let fb = FeedbackHeader {
            packet_type: PacketType::DataAck,
            seq: 1,
            ack: Some(3),
            options: &opts,
            time: base + Duration::from_millis(10),
        };
        assert_eq!(
            s.on_read(&fb),
            Err(CongestionError::MissingOption("ReceiveRate"))
        );
    }

    #[test]
    fn persistent_silence_resets() {
        let s = sender();
        let base = Instant::now();
        s.open(base);
        s.on_write(PacketType::Data, 1, 100, base);
        let mut now = base;
        let mut last = Ok(CongestionAction::None);
        for _ in 0..MAX_NOFEEDBACK_EXPIRIES {
            assert_eq!(last, Ok(CongestionAction::None));
            now += Duration::from_secs(3);
            last = s.on_idle(now);
        }
        assert_eq!(last, Ok(CongestionAction::Reset(ResetCode::Aborted)));
        s.close();
    }
}

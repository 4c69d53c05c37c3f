//! Constant-rate controller pair.
//!
//! The sender paces at a fixed packet rate and ignores feedback; the
//! receiver produces no options. Useful for exercising the connection
//! machine without TFRC dynamics.

use std::sync::Mutex;
use std::time::Duration;

use quanta::Instant;

use super::strober::Strober;
use super::{
    Activation, CongestionAction, CongestionResult, FeedbackHeader, FeedforwardHeader,
    ReceiverCongestionControl, SenderCongestionControl, CCID_FIXED,
};
use crate::options::DccpOption;
use crate::wire::PacketType;

pub struct FixedRateSender {
    activation: Mutex<Activation>,
    strober: Strober,
    rtt: Duration,
    ccmps: u32,
}

impl FixedRateSender {
    pub fn new(packets_per_sec: u32, rtt: Duration, ccmps: u32) -> Self {
        let pps = packets_per_sec.max(1);
        FixedRateSender {
            activation: Mutex::new(Activation::new()),
            strober: Strober::new(Duration::from_nanos(1_000_000_000 / u64::from(pps))),
            rtt,
            ccmps,
        }
    }

    fn is_open(&self) -> bool {
        self.activation
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_open()
    }
}

impl SenderCongestionControl for FixedRateSender {
    fn id(&self) -> u8 {
        CCID_FIXED
    }

    fn ccmps(&self) -> u32 {
        self.ccmps
    }

    fn rtt(&self) -> Duration {
        self.rtt
    }

    fn open(&self, _now: Instant) {
        self.activation
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .open();
    }

    fn on_write(&self, _: PacketType, _: u64, _: usize, _: Instant) -> (u8, Vec<DccpOption>) {
        (0, Vec::new())
    }

    fn on_read(&self, _: &FeedbackHeader<'_>) -> CongestionResult {
        Ok(CongestionAction::None)
    }

    fn on_idle(&self, _: Instant) -> CongestionResult {
        Ok(CongestionAction::None)
    }

    fn strobe(&self) {
        if self.is_open() {
            self.strober.strobe();
        }
    }

    fn close(&self) {
        self.activation
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .close();
        self.strober.close();
    }
}

#[derive(Default)]
pub struct FixedRateReceiver {
    activation: Mutex<Activation>,
}

impl FixedRateReceiver {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ReceiverCongestionControl for FixedRateReceiver {
    fn id(&self) -> u8 {
        CCID_FIXED
    }

    fn open(&self, _now: Instant) {
        self.activation
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .open();
    }

    fn on_write(&self, _: PacketType, _: u64, _: Option<u64>, _: Instant) -> Vec<DccpOption> {
        Vec::new()
    }

    fn on_read(&self, _: &FeedforwardHeader<'_>) -> CongestionResult {
        Ok(CongestionAction::None)
    }

    fn on_idle(&self, _: Instant) -> CongestionResult {
        Ok(CongestionAction::None)
    }

    fn close(&self) {
        self.activation
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .close();
    }
}

//! Receive-rate estimate reported in feedback (RFC 4342 §8.3).
//!
//! Two overlapping periods are kept. Period 0 is the older, longer one;
//! period 1 started at the last flush that rotated. Once period 1 spans at
//! least one RTT it is reported and becomes period 0.

use std::time::Duration;

use quanta::Instant;

#[derive(Debug, Clone, Default)]
pub struct ReceiveRateMeter {
    data0: u64,
    data1: u64,
    time0: Option<Instant>,
    time1: Option<Instant>,
}

fn bytes_per_sec(bytes: u64, over: Duration) -> u32 {
    let ns = over.as_nanos();
    if ns == 0 {
        return 0;
    }
    (u128::from(bytes) * 1_000_000_000 / ns).min(u128::from(u32::MAX)) as u32
}

impl ReceiveRateMeter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_data(&mut self, len: usize, now: Instant) {
        if self.time0.is_none() {
            self.time0 = Some(now);
            self.time1 = Some(now);
        }
        self.data0 += len as u64;
        self.data1 += len as u64;
    }

    /// Rate to report in feedback written at `now`.
    pub fn flush(&mut self, rtt: Duration, now: Instant) -> u32 {
        let (Some(t0), Some(t1)) = (self.time0, self.time1) else {
            return 0;
        };
        let d0 = now.saturating_duration_since(t0);
        let d1 = now.saturating_duration_since(t1);
        if d1 < rtt {
            return bytes_per_sec(self.data0, d0);
        }
        let rate = bytes_per_sec(self.data1, d1);
        self.data0 = self.data1;
        self.data1 = 0;
        self.time0 = self.time1;
        self.time1 = Some(now);
        rate
    }
}

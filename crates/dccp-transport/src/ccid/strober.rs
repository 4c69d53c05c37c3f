//! Write pacing.
//!
//! A [`Strober`] hands out one send slot per inter-packet interval. The
//! interval is derived from a byte rate and segment size as
//! `64 / ((X·64) / SS)` seconds so small rates do not truncate to zero.
//! Closing the strober releases every blocked writer.

use std::sync::{Condvar, Mutex};
use std::time::Duration;

use quanta::Instant;

#[derive(Debug)]
struct StroberState {
    interval: Duration,
    last: Option<Instant>,
    closed: bool,
}

#[derive(Debug)]
pub struct Strober {
    state: Mutex<StroberState>,
    changed: Condvar,
}

impl Strober {
    /// A strober that lets one packet through every `interval`.
    pub fn new(interval: Duration) -> Self {
        Strober {
            state: Mutex::new(StroberState {
                interval,
                last: None,
                closed: false,
            }),
            changed: Condvar::new(),
        }
    }

    /// Inter-packet interval for rate `x` bytes/s and segment size `ss`.
    pub fn interval_for(x: u64, ss: u32) -> Duration {
        let slots = (x.saturating_mul(64)) / u64::from(ss.max(1));
        if slots == 0 {
            // Below one segment per 64 s: clamp to the slowest pace.
            return Duration::from_secs(64);
        }
        Duration::from_nanos(64_000_000_000 / slots)
    }

    /// Pace at `x` bytes/s with segments of `ss` bytes.
    pub fn set_rate(&self, x: u64, ss: u32) {
        self.set_interval(Self::interval_for(x, ss));
    }

    pub fn set_interval(&self, interval: Duration) {
        let mut st = self.state.lock().unwrap_or_else(|e| e.into_inner());
        st.interval = interval;
        self.changed.notify_all();
    }

    pub fn interval(&self) -> Duration {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).interval
    }

    /// Block until one interval has passed since the previous strobe.
    /// Returns immediately once closed.
    pub fn strobe(&self) {
        let mut st = self.state.lock().unwrap_or_else(|e| e.into_inner());
        loop {
            if st.closed {
                return;
            }
            let now = Instant::now();
            let due = match st.last {
                None => now,
                Some(last) => last + st.interval,
            };
            if now >= due {
                st.last = Some(now);
                return;
            }
            let wait = due.saturating_duration_since(now);
            st = self
                .changed
                .wait_timeout(st, wait)
                .map(|(g, _)| g)
                .unwrap_or_else(|e| e.into_inner().0);
        }
    }

    pub fn close(&self) {
        let mut st = self.state.lock().unwrap_or_else(|e| e.into_inner());
        st.closed = true;
        self.changed.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn interval_from_rate() {
        // 1460 B segments at 14600 B/s → 10 packets per second
        let d = Strober::interval_for(14_600, 1460);
        assert_eq!(d, Duration::from_millis(100));
        assert_eq!(Strober::interval_for(0, 1460), Duration::from_secs(64));
    }

    #[test]
    fn paces_consecutive_strobes() {
        let s = Strober::new(Duration::from_millis(20));
        let start = std::time::Instant::now();
        for _ in 0..4 {
            s.strobe();
        }
        // First strobe is free, three more wait 20 ms each
        assert!(start.elapsed() >= Duration::from_millis(55));
    }

    #[test]
    fn close_releases_blocked_writer() {
        let s = Arc::new(Strober::new(Duration::from_secs(30)));
        s.strobe();
        let s2 = Arc::clone(&s);
        let h = thread::spawn(move || {
            let t = std::time::Instant::now();
            s2.strobe();
            t.elapsed()
        });
        thread::sleep(Duration::from_millis(50));
        s.close();
        let waited = h.join().unwrap();
        assert!(waited < Duration::from_secs(5), "close must unblock strobe");
        assert!(s.is_closed());
    }

    #[test]
    fn rate_change_wakes_waiter() {
        let s = Arc::new(Strober::new(Duration::from_secs(30)));
        s.strobe();
        let s2 = Arc::clone(&s);
        let h = thread::spawn(move || {
            let t = std::time::Instant::now();
            s2.strobe();
            t.elapsed()
        });
        thread::sleep(Duration::from_millis(50));
        s.set_interval(Duration::from_millis(1));
        assert!(h.join().unwrap() < Duration::from_secs(5));
    }
}

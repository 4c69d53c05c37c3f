//! Capped exponential back-off schedule for handshake and teardown resends.
//!
//! A schedule starts with a `first` sleep period. Each time another `growth`
//! span of total sleep has accumulated, the period doubles. Once the total
//! sleep reaches `budget` the schedule is exhausted.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Backoff {
    period: Duration,
    slept: Duration,
    budget: Duration,
    growth: Duration,
    last_growth: Duration,
    rounds: u32,
}

impl Backoff {
    pub fn new(first: Duration, budget: Duration, growth: Duration) -> Self {
        Backoff {
            period: first.max(Duration::from_millis(1)),
            slept: Duration::ZERO,
            budget,
            growth: growth.max(Duration::from_millis(1)),
            last_growth: Duration::ZERO,
            rounds: 0,
        }
    }

    /// Next period to sleep, or `None` once the budget is spent.
    pub fn next_sleep(&mut self) -> Option<Duration> {
        if self.slept >= self.budget {
            return None;
        }
        let sleep = self.period;
        self.slept += sleep;
        self.rounds += 1;
        if self.slept - self.last_growth >= self.growth {
            self.last_growth = self.slept;
            self.period = self.period.saturating_mul(2);
        }
        Some(sleep)
    }

    /// Completed rounds so far.
    pub fn rounds(&self) -> u32 {
        self.rounds
    }

    /// Total time slept so far.
    pub fn slept(&self) -> Duration {
        self.slept
    }
}

/// Parameters of a schedule, kept in configuration and started per use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffSpec {
    pub first: Duration,
    pub budget: Duration,
    pub growth: Duration,
}

impl BackoffSpec {
    pub fn start(&self) -> Backoff {
        Backoff::new(self.first, self.budget, self.growth)
    }
}

impl Iterator for Backoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        self.next_sleep()
    }
}

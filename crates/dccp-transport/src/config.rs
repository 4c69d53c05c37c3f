//! # Connection Configuration
//!
//! [`ConnConfigInput`] is the TOML-facing shape: every field optional,
//! times in milliseconds. [`ConnConfigInput::resolve`] validates it and
//! fills defaults, producing a [`ConnConfig`] with `Duration`s.
//!
//! ```toml
//! version = 1
//! msl_ms = 4000
//! swbf = 200
//!
//! [controller]
//! kind = "ccid3"
//! oscillation_reduction = true
//! ```

use std::time::Duration;

use serde::Deserialize;

use crate::backoff::BackoffSpec;
use crate::ccid::{CcidKind, ControllerConfig, RTT_DEFAULT, RTT_MIN};
use crate::error::ConnError;
use crate::socket::DEFAULT_SEQUENCE_WINDOW;

pub const CONFIG_VERSION: u32 = 1;

/// Maximum Segment Lifetime (RFC 4340 §8.3).
pub const MSL: Duration = Duration::from_secs(2 * 60);

/// Path MTU assumed when the link does not say otherwise.
pub const DEFAULT_PMTU: u32 = 1500;

/// IP/UDP allowance subtracted from the PMTU when sizing segments.
pub const LINK_OVERHEAD: u32 = 24;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ConnConfigInput {
    pub version: u32,
    pub msl_ms: Option<u64>,
    pub rtt_default_ms: Option<u64>,
    pub rtt_min_ms: Option<u64>,
    pub listen_timeout_ms: Option<u64>,
    pub respond_timeout_ms: Option<u64>,
    pub request_first_ms: Option<u64>,
    pub request_budget_ms: Option<u64>,
    pub request_growth_ms: Option<u64>,
    pub partopen_first_ms: Option<u64>,
    pub closing_growth_ms: Option<u64>,
    pub swaf: Option<u64>,
    pub swbf: Option<u64>,
    pub app_queue: Option<usize>,
    pub ctrl_queue: Option<usize>,
    pub pmtu: Option<u32>,
    pub controller: ControllerConfigInput,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ControllerConfigInput {
    /// `"ccid3"` (default) or `"fixed"`.
    pub kind: Option<String>,
    /// Packet rate of the fixed controller.
    pub packets_per_sec: Option<u32>,
    pub ccmps: Option<u32>,
    pub oscillation_reduction: Option<bool>,
}

/// Resolved connection tunables.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnConfig {
    pub version: u32,
    pub msl: Duration,
    pub rtt_default: Duration,
    pub rtt_min: Duration,
    /// Quiet abort if no Request reaches a listening server.
    pub listen_timeout: Duration,
    /// Quiet abort if a responding server never opens.
    pub respond_timeout: Duration,
    /// Client Request resends.
    pub request_backoff: BackoffSpec,
    /// First PARTOPEN resend; the schedule runs for 4·MSL.
    pub partopen_first: Duration,
    /// Period growth of the CLOSING resends (first 2·RTT, budget MSL).
    pub closing_growth: Duration,
    pub swaf: u64,
    pub swbf: u64,
    /// Inbound application queue; overflow drops data.
    pub app_queue: usize,
    /// Outbound control queue; overflow drops control packets.
    pub ctrl_queue: usize,
    pub pmtu: u32,
    pub controller: ControllerConfig,
}

impl Default for ConnConfig {
    fn default() -> Self {
        ConnConfig {
            version: CONFIG_VERSION,
            msl: MSL,
            rtt_default: RTT_DEFAULT,
            rtt_min: RTT_MIN,
            listen_timeout: Duration::from_secs(60),
            respond_timeout: Duration::from_secs(30),
            request_backoff: BackoffSpec {
                first: Duration::from_secs(1),
                budget: Duration::from_secs(60),
                growth: Duration::from_secs(10),
            },
            partopen_first: Duration::from_millis(200),
            closing_growth: Duration::from_secs(64),
            swaf: DEFAULT_SEQUENCE_WINDOW,
            swbf: DEFAULT_SEQUENCE_WINDOW,
            app_queue: 3,
            ctrl_queue: 3,
            pmtu: DEFAULT_PMTU,
            controller: ControllerConfig::default(),
        }
    }
}

fn ms(v: Option<u64>, default: Duration) -> Duration {
    v.map(Duration::from_millis).unwrap_or(default)
}

impl ConnConfigInput {
    pub fn resolve(self) -> Result<ConnConfig, ConnError> {
        let version = if self.version == 0 {
            CONFIG_VERSION
        } else {
            self.version
        };
        if version != CONFIG_VERSION {
            return Err(ConnError::Config(format!(
                "unsupported config version {}",
                version
            )));
        }

        let d = ConnConfig::default();
        let msl = ms(self.msl_ms, d.msl);
        let rtt_min = ms(self.rtt_min_ms, d.rtt_min);
        let rtt_default = ms(self.rtt_default_ms, d.rtt_default).max(rtt_min);
        if msl.is_zero() {
            return Err(ConnError::Config("msl_ms must be positive".into()));
        }

        let swaf = self.swaf.unwrap_or(d.swaf);
        let swbf = self.swbf.unwrap_or(d.swbf);
        // RFC 4340 §7.5.2: Sequence Window ranges over [32, 2^46 - 1].
        for (name, w) in [("swaf", swaf), ("swbf", swbf)] {
            if !(32..(1 << 46)).contains(&w) {
                return Err(ConnError::Config(format!("{} out of range: {}", name, w)));
            }
        }

        let pmtu = self.pmtu.unwrap_or(d.pmtu);
        if pmtu < 256 {
            return Err(ConnError::Config(format!("pmtu too small: {}", pmtu)));
        }

        let c = self.controller;
        let kind = match c.kind.as_deref().map(str::trim) {
            None | Some("") | Some("ccid3") => CcidKind::Ccid3,
            Some("fixed") => CcidKind::Fixed {
                packets_per_sec: c.packets_per_sec.unwrap_or(100).max(1),
            },
            Some(other) => {
                return Err(ConnError::Config(format!("unknown controller {:?}", other)));
            }
        };
        let controller = ControllerConfig {
            kind,
            rtt_default,
            ccmps: c.ccmps.unwrap_or(d.controller.ccmps).max(1),
            oscillation_reduction: c
                .oscillation_reduction
                .unwrap_or(d.controller.oscillation_reduction),
        };

        Ok(ConnConfig {
            version,
            msl,
            rtt_default,
            rtt_min,
            listen_timeout: ms(self.listen_timeout_ms, d.listen_timeout),
            respond_timeout: ms(self.respond_timeout_ms, d.respond_timeout),
            request_backoff: BackoffSpec {
                first: ms(self.request_first_ms, d.request_backoff.first),
                budget: ms(self.request_budget_ms, d.request_backoff.budget),
                growth: ms(self.request_growth_ms, d.request_backoff.growth),
            },
            partopen_first: ms(self.partopen_first_ms, d.partopen_first),
            closing_growth: ms(self.closing_growth_ms, d.closing_growth),
            swaf,
            swbf,
            app_queue: self.app_queue.unwrap_or(d.app_queue).max(1),
            ctrl_queue: self.ctrl_queue.unwrap_or(d.ctrl_queue).max(1),
            pmtu,
            controller,
        })
    }
}

impl ConnConfig {
    pub fn from_toml_str(input: &str) -> Result<Self, ConnError> {
        if input.trim().is_empty() {
            return Ok(ConnConfig::default());
        }
        let parsed: ConnConfigInput = toml::from_str(input)
            .map_err(|e| ConnError::Config(format!("invalid config TOML: {}", e)))?;
        parsed.resolve()
    }

    /// PARTOPEN resends: first `partopen_first`, for 4·MSL, doubling every
    /// round.
    pub fn partopen_backoff(&self) -> BackoffSpec {
        BackoffSpec {
            first: self.partopen_first,
            budget: self.msl * 4,
            growth: self.partopen_first,
        }
    }

    /// CLOSING resends: first 2·RTT, for one MSL.
    pub fn closing_backoff(&self, rtt: Duration) -> BackoffSpec {
        BackoffSpec {
            first: (rtt * 2).max(self.rtt_min),
            budget: self.msl,
            growth: self.closing_growth,
        }
    }

    /// Largest application segment: PMTU less the link allowance and the
    /// fixed DataAck header.
    pub fn mtu(&self) -> usize {
        let fixed = crate::wire::PacketType::DataAck.fixed_header_len() as u32;
        self.pmtu.saturating_sub(LINK_OVERHEAD + fixed) as usize
    }
}

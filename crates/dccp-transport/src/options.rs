//! # DCCP Options
//!
//! Generic option records plus codecs for the protocol-wide options this
//! crate interprets: ElapsedTime, Timestamp, TimestampEcho and NDP Count.
//! CCID-specific options live with their controller (see
//! [`crate::ccid3::options`]).
//!
//! On the wire an option is either a single type byte (types 0..=31) or
//! `type, length, data...` with `length` counting the two leading bytes.

use std::time::Duration;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::WireError;

// ─── Option Types ───────────────────────────────────────────────────────────

pub const OPT_PADDING: u8 = 0;
pub const OPT_MANDATORY: u8 = 1;
pub const OPT_SLOW_RECEIVER: u8 = 2;
pub const OPT_CHANGE_L: u8 = 32;
pub const OPT_CONFIRM_L: u8 = 33;
pub const OPT_CHANGE_R: u8 = 34;
pub const OPT_CONFIRM_R: u8 = 35;
pub const OPT_INIT_COOKIE: u8 = 36;
pub const OPT_NDP_COUNT: u8 = 37;
pub const OPT_ACK_VECTOR_NONCE_0: u8 = 38;
pub const OPT_ACK_VECTOR_NONCE_1: u8 = 39;
pub const OPT_DATA_DROPPED: u8 = 40;
pub const OPT_TIMESTAMP: u8 = 41;
pub const OPT_TIMESTAMP_ECHO: u8 = 42;
pub const OPT_ELAPSED_TIME: u8 = 43;
pub const OPT_DATA_CHECKSUM: u8 = 44;

/// First CCID-specific option type sent from the half-connection sender to
/// the receiver.
pub const OPT_CCID_SENDER_FIRST: u8 = 128;
/// Last sender-to-receiver CCID option type.
pub const OPT_CCID_SENDER_LAST: u8 = 191;
/// First receiver-to-sender CCID option type.
pub const OPT_CCID_RECEIVER_FIRST: u8 = 192;

/// Maximum bytes of data in a multi-byte option (length byte counts 2 extra).
pub const MAX_OPTION_DATA: usize = 253;

/// Nanoseconds per time-option unit (10 µs).
pub const TEN_MICROS_NS: u64 = 10_000;

/// ElapsedTime values below this use the 2-byte form.
pub const ELAPSED_SHORT_LIMIT: Duration = Duration::from_millis(500);

// ─── Option ─────────────────────────────────────────────────────────────────

/// A single decoded option.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DccpOption {
    pub kind: u8,
    pub data: Bytes,
    pub mandatory: bool,
}

impl DccpOption {
    pub fn new(kind: u8, data: impl Into<Bytes>) -> Self {
        DccpOption {
            kind,
            data: data.into(),
            mandatory: false,
        }
    }

    /// A single-byte option (types below 32).
    pub fn single(kind: u8) -> Self {
        DccpOption::new(kind, Bytes::new())
    }

    pub fn with_mandatory(mut self) -> Self {
        self.mandatory = true;
        self
    }

    /// Whether this option type is a single byte on the wire.
    #[inline]
    pub fn is_single_byte(kind: u8) -> bool {
        kind < 32
    }

    /// Whether the option is a CCID option flowing sender → receiver.
    #[inline]
    pub fn is_sender_to_receiver(&self) -> bool {
        (OPT_CCID_SENDER_FIRST..=OPT_CCID_SENDER_LAST).contains(&self.kind)
    }

    /// Whether the option is a CCID option flowing receiver → sender.
    #[inline]
    pub fn is_receiver_to_sender(&self) -> bool {
        self.kind >= OPT_CCID_RECEIVER_FIRST
    }

    /// Bytes this option takes on the wire, excluding padding.
    pub fn encoded_len(&self) -> usize {
        let prefix = usize::from(self.mandatory);
        if Self::is_single_byte(self.kind) {
            prefix + 1
        } else {
            prefix + 2 + self.data.len()
        }
    }

    fn encode(&self, buf: &mut impl BufMut) -> Result<(), WireError> {
        if self.kind == OPT_MANDATORY {
            return Err(WireError::Semantic("Mandatory is a prefix, not an option"));
        }
        if self.mandatory {
            buf.put_u8(OPT_MANDATORY);
        }
        if Self::is_single_byte(self.kind) {
            if !self.data.is_empty() {
                return Err(WireError::Semantic("single-byte option with data"));
            }
            buf.put_u8(self.kind);
            return Ok(());
        }
        if self.data.len() > MAX_OPTION_DATA {
            return Err(WireError::Numeric);
        }
        buf.put_u8(self.kind);
        buf.put_u8((self.data.len() + 2) as u8);
        buf.put_slice(&self.data);
        Ok(())
    }
}

/// Whether an option type may ride on a Data packet (RFC 4340 §5.8 table).
pub fn allowed_on_data(kind: u8) -> bool {
    matches!(
        kind,
        OPT_PADDING
            | OPT_MANDATORY
            | OPT_SLOW_RECEIVER
            | OPT_NDP_COUNT
            | OPT_TIMESTAMP
            | OPT_TIMESTAMP_ECHO
            | OPT_DATA_CHECKSUM
    ) || (OPT_CCID_SENDER_FIRST..=OPT_CCID_SENDER_LAST).contains(&kind)
}

/// Total on-wire length of an option list, padded to a 4-byte boundary.
pub fn options_len(options: &[DccpOption]) -> usize {
    let raw: usize = options.iter().map(DccpOption::encoded_len).sum();
    (raw + 3) & !3
}

/// Encode options followed by zero padding to a 4-byte boundary.
pub fn encode_options(options: &[DccpOption], buf: &mut BytesMut) -> Result<(), WireError> {
    let start = buf.len();
    for opt in options {
        opt.encode(buf)?;
    }
    while (buf.len() - start) % 4 != 0 {
        buf.put_u8(OPT_PADDING);
    }
    Ok(())
}

/// Decode the options area. Padding is consumed and not returned.
pub fn decode_options(mut area: &[u8]) -> Result<Vec<DccpOption>, WireError> {
    let mut out = Vec::new();
    let mut mandatory = false;
    while area.has_remaining() {
        let kind = area.get_u8();
        match kind {
            OPT_PADDING => {
                if mandatory {
                    return Err(WireError::Semantic("Mandatory before Padding"));
                }
            }
            OPT_MANDATORY => {
                if mandatory {
                    return Err(WireError::Semantic("repeated Mandatory"));
                }
                mandatory = true;
            }
            k if DccpOption::is_single_byte(k) => {
                out.push(DccpOption {
                    kind: k,
                    data: Bytes::new(),
                    mandatory,
                });
                mandatory = false;
            }
            k => {
                if !area.has_remaining() {
                    return Err(WireError::Size);
                }
                let len = area.get_u8() as usize;
                if len < 2 || area.remaining() < len - 2 {
                    return Err(WireError::Size);
                }
                let data = Bytes::copy_from_slice(&area[..len - 2]);
                area.advance(len - 2);
                out.push(DccpOption {
                    kind: k,
                    data,
                    mandatory,
                });
                mandatory = false;
            }
        }
    }
    if mandatory {
        return Err(WireError::Semantic("dangling Mandatory"));
    }
    Ok(out)
}

// ─── Time Units ─────────────────────────────────────────────────────────────

/// Convert a duration into 10 µs units, saturating at `u32::MAX`.
pub fn to_ten_micros(d: Duration) -> u32 {
    let units = d.as_nanos() / TEN_MICROS_NS as u128;
    units.min(u32::MAX as u128) as u32
}

/// Convert 10 µs units back into a duration.
pub fn from_ten_micros(units: u32) -> Duration {
    Duration::from_nanos(units as u64 * TEN_MICROS_NS)
}

// ─── ElapsedTime (RFC 4340 §13.2) ───────────────────────────────────────────

/// Time between receipt of the acknowledged packet and sending the ack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ElapsedTime {
    pub elapsed: Duration,
}

impl ElapsedTime {
    pub fn encode(&self) -> DccpOption {
        let units = to_ten_micros(self.elapsed);
        let mut d = BytesMut::with_capacity(4);
        if self.elapsed < ELAPSED_SHORT_LIMIT {
            d.put_u16(units as u16);
        } else {
            d.put_u32(units);
        }
        DccpOption::new(OPT_ELAPSED_TIME, d.freeze())
    }

    pub fn decode(opt: &DccpOption) -> Option<Self> {
        if opt.kind != OPT_ELAPSED_TIME {
            return None;
        }
        let mut d = &opt.data[..];
        let units = match d.len() {
            2 => d.get_u16() as u32,
            4 => d.get_u32(),
            _ => return None,
        };
        Some(ElapsedTime {
            elapsed: from_ten_micros(units),
        })
    }
}

// ─── Timestamp / TimestampEcho (RFC 4340 §13.1, §13.3) ──────────────────────

/// Sender clock reading in 10 µs units.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timestamp {
    pub value: u32,
}

impl Timestamp {
    pub fn encode(&self) -> DccpOption {
        DccpOption::new(OPT_TIMESTAMP, self.value.to_be_bytes().to_vec())
    }

    pub fn decode(opt: &DccpOption) -> Option<Self> {
        if opt.kind != OPT_TIMESTAMP || opt.data.len() != 4 {
            return None;
        }
        Some(Timestamp {
            value: (&opt.data[..]).get_u32(),
        })
    }
}

/// Echo of a peer's Timestamp, optionally with the time it was held.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimestampEcho {
    pub timestamp: u32,
    pub elapsed: Option<u32>,
}

impl TimestampEcho {
    pub fn encode(&self) -> DccpOption {
        let mut d = BytesMut::with_capacity(8);
        d.put_u32(self.timestamp);
        match self.elapsed {
            None => {}
            Some(e) if e <= u16::MAX as u32 => d.put_u16(e as u16),
            Some(e) => d.put_u32(e),
        }
        DccpOption::new(OPT_TIMESTAMP_ECHO, d.freeze())
    }

    pub fn decode(opt: &DccpOption) -> Option<Self> {
        if opt.kind != OPT_TIMESTAMP_ECHO {
            return None;
        }
        let mut d = &opt.data[..];
        let (timestamp, elapsed) = match d.len() {
            4 => (d.get_u32(), None),
            6 => (d.get_u32(), Some(d.get_u16() as u32)),
            8 => (d.get_u32(), Some(d.get_u32())),
            _ => return None,
        };
        Some(TimestampEcho { timestamp, elapsed })
    }
}

// ─── NDP Count (RFC 4340 §7.7) ──────────────────────────────────────────────

/// Number of consecutive non-data packets preceding this one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NdpCount {
    pub count: u64,
}

impl NdpCount {
    pub fn encode(&self) -> DccpOption {
        let bytes = self.count.to_be_bytes();
        let skip = bytes.iter().take_while(|b| **b == 0).count().min(7);
        DccpOption::new(OPT_NDP_COUNT, bytes[skip..].to_vec())
    }

    pub fn decode(opt: &DccpOption) -> Option<Self> {
        if opt.kind != OPT_NDP_COUNT || opt.data.is_empty() || opt.data.len() > 6 {
            return None;
        }
        let count = opt.data.iter().fold(0u64, |acc, b| (acc << 8) | *b as u64);
        Some(NdpCount { count })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn options_pad_to_word() {
        let opts = vec![DccpOption::single(OPT_SLOW_RECEIVER)];
        let mut buf = BytesMut::new();
        encode_options(&opts, &mut buf).unwrap();
        assert_eq!(buf.len(), 4);
        assert_eq!(&buf[..], &[OPT_SLOW_RECEIVER, 0, 0, 0]);
        assert_eq!(options_len(&opts), 4);
    }

    #[test]
    fn mandatory_prefix_round_trip() {
        let opts = vec![
            DccpOption::new(OPT_CCID_RECEIVER_FIRST, vec![1, 2, 3, 4]).with_mandatory(),
            DccpOption::single(OPT_SLOW_RECEIVER),
        ];
        let mut buf = BytesMut::new();
        encode_options(&opts, &mut buf).unwrap();
        assert_eq!(buf[0], OPT_MANDATORY);
        let decoded = decode_options(&buf).unwrap();
        assert_eq!(decoded, opts);
    }

    #[test]
    fn dangling_mandatory_rejected() {
        assert!(decode_options(&[OPT_MANDATORY]).is_err());
        assert!(decode_options(&[OPT_MANDATORY, OPT_MANDATORY, 2]).is_err());
    }

    #[test]
    fn bad_length_rejected() {
        // Length 1 is below the 2-byte minimum
        assert_eq!(decode_options(&[OPT_TIMESTAMP, 1]), Err(WireError::Size));
        // Length runs past the area
        assert_eq!(decode_options(&[OPT_TIMESTAMP, 6, 0, 0]), Err(WireError::Size));
    }

    #[test]
    fn elapsed_time_short_and_long_forms() {
        let short = ElapsedTime {
            elapsed: Duration::from_millis(120),
        }
        .encode();
        assert_eq!(short.data.len(), 2);
        assert_eq!(
            ElapsedTime::decode(&short).unwrap().elapsed,
            Duration::from_millis(120)
        );

        let long = ElapsedTime {
            elapsed: Duration::from_secs(3),
        }
        .encode();
        assert_eq!(long.data.len(), 4);
        assert_eq!(
            ElapsedTime::decode(&long).unwrap().elapsed,
            Duration::from_secs(3)
        );
    }

    #[test]
    fn timestamp_echo_forms() {
        for echo in [
            TimestampEcho { timestamp: 7, elapsed: None },
            TimestampEcho { timestamp: 7, elapsed: Some(300) },
            TimestampEcho { timestamp: 7, elapsed: Some(70_000) },
        ] {
            assert_eq!(TimestampEcho::decode(&echo.encode()), Some(echo));
        }
    }

    #[test]
    fn ndp_count_minimal_width() {
        let opt = NdpCount { count: 0x0102 }.encode();
        assert_eq!(&opt.data[..], &[0x01, 0x02]);
        assert_eq!(NdpCount::decode(&opt).unwrap().count, 0x0102);
        let zero = NdpCount { count: 0 }.encode();
        assert_eq!(zero.data.len(), 1);
    }

    #[test]
    fn data_packet_option_table() {
        assert!(allowed_on_data(OPT_NDP_COUNT));
        assert!(allowed_on_data(150));
        assert!(!allowed_on_data(OPT_ELAPSED_TIME));
        assert!(!allowed_on_data(OPT_CCID_RECEIVER_FIRST));
    }
}

//! # DCCP Wire Format
//!
//! RFC 4340 §5 generic header with extended (48-bit) sequence numbers only.
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |          Source Port          |           Dest Port           |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |  Data Offset  | CCVal | CsCov |           Checksum            |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! | Res | Type  |1|   Reserved    |  Sequence Number (high bits)  .
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! .                  Sequence Number (low bits)                   |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! Followed by, depending on type:
//! - Acknowledgement subheader (every type but Request and Data):
//!   16 reserved bits + 48-bit Acknowledgement Number.
//! - Service Code (Request, Response) or Reset Code + 3 data bytes (Reset).
//! - Options, padded to a 32-bit boundary.
//! - Application data (Request, Response, Data, DataAck).

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::WireError;
use crate::options::{self, DccpOption};
use crate::seq::SEQ_MAX;

// ─── Constants ───────────────────────────────────────────────────────────────

/// Generic header with X=1.
pub const GENERIC_HEADER_LEN: usize = 16;

/// Acknowledgement subheader with X=1.
pub const ACK_SUBHEADER_LEN: usize = 8;

/// Service Code or Reset Code subheader.
pub const CODE_SUBHEADER_LEN: usize = 4;

/// Largest header the 8-bit Data Offset can describe (255 words).
pub const MAX_HEADER_LEN: usize = 255 * 4;

// ─── Packet Type ─────────────────────────────────────────────────────────────

/// DCCP packet types (RFC 4340 §5.1). Types 10-15 are reserved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize)]
#[repr(u8)]
pub enum PacketType {
    Request = 0,
    Response = 1,
    Data = 2,
    Ack = 3,
    DataAck = 4,
    CloseReq = 5,
    Close = 6,
    Reset = 7,
    Sync = 8,
    SyncAck = 9,
}

impl PacketType {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(PacketType::Request),
            1 => Some(PacketType::Response),
            2 => Some(PacketType::Data),
            3 => Some(PacketType::Ack),
            4 => Some(PacketType::DataAck),
            5 => Some(PacketType::CloseReq),
            6 => Some(PacketType::Close),
            7 => Some(PacketType::Reset),
            8 => Some(PacketType::Sync),
            9 => Some(PacketType::SyncAck),
            _ => None,
        }
    }

    /// Whether the acknowledgement subheader is present.
    #[inline]
    pub fn has_ack(self) -> bool {
        !matches!(self, PacketType::Request | PacketType::Data)
    }

    /// Whether the type carries a Service Code.
    #[inline]
    pub fn has_service_code(self) -> bool {
        matches!(self, PacketType::Request | PacketType::Response)
    }

    /// Whether application data may follow the header.
    #[inline]
    pub fn may_carry_data(self) -> bool {
        matches!(
            self,
            PacketType::Request | PacketType::Response | PacketType::Data | PacketType::DataAck
        )
    }

    /// Data or DataAck.
    #[inline]
    pub fn is_data(self) -> bool {
        matches!(self, PacketType::Data | PacketType::DataAck)
    }

    /// Ack or DataAck.
    #[inline]
    pub fn is_ack(self) -> bool {
        matches!(self, PacketType::Ack | PacketType::DataAck)
    }

    /// Header length before options.
    pub fn fixed_header_len(self) -> usize {
        let mut len = GENERIC_HEADER_LEN;
        if self.has_ack() {
            len += ACK_SUBHEADER_LEN;
        }
        if self.has_service_code() || self == PacketType::Reset {
            len += CODE_SUBHEADER_LEN;
        }
        len
    }
}

// ─── Reset Codes ─────────────────────────────────────────────────────────────

/// Reset codes (RFC 4340 §5.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, serde::Serialize)]
pub enum ResetCode {
    #[default]
    Unspecified,
    Closed,
    Aborted,
    NoConnection,
    PacketError,
    OptionError,
    MandatoryError,
    ConnectionRefused,
    BadServiceCode,
    TooBusy,
    BadInitCookie,
    AggressionPenalty,
    /// Reserved or CCID-specific code.
    Other(u8),
}

impl ResetCode {
    pub fn from_byte(b: u8) -> Self {
        match b {
            0 => ResetCode::Unspecified,
            1 => ResetCode::Closed,
            2 => ResetCode::Aborted,
            3 => ResetCode::NoConnection,
            4 => ResetCode::PacketError,
            5 => ResetCode::OptionError,
            6 => ResetCode::MandatoryError,
            7 => ResetCode::ConnectionRefused,
            8 => ResetCode::BadServiceCode,
            9 => ResetCode::TooBusy,
            10 => ResetCode::BadInitCookie,
            11 => ResetCode::AggressionPenalty,
            other => ResetCode::Other(other),
        }
    }

    pub fn to_byte(self) -> u8 {
        match self {
            ResetCode::Unspecified => 0,
            ResetCode::Closed => 1,
            ResetCode::Aborted => 2,
            ResetCode::NoConnection => 3,
            ResetCode::PacketError => 4,
            ResetCode::OptionError => 5,
            ResetCode::MandatoryError => 6,
            ResetCode::ConnectionRefused => 7,
            ResetCode::BadServiceCode => 8,
            ResetCode::TooBusy => 9,
            ResetCode::BadInitCookie => 10,
            ResetCode::AggressionPenalty => 11,
            ResetCode::Other(b) => b,
        }
    }
}

// ─── Header ─────────────────────────────────────────────────────────────────

/// A decoded DCCP packet. Built fresh for every outgoing packet and never
/// mutated after decode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub source_port: u16,
    pub dest_port: u16,
    /// 4-bit window counter (CCID3 sender).
    pub ccval: u8,
    /// Checksum coverage (0 = whole packet).
    pub cscov: u8,
    pub packet_type: PacketType,
    /// 48-bit sequence number.
    pub seq: u64,
    /// 48-bit acknowledgement number, present iff `packet_type.has_ack()`.
    pub ack: Option<u64>,
    /// Request/Response only.
    pub service_code: u32,
    /// Reset only.
    pub reset_code: ResetCode,
    /// Reset only.
    pub reset_data: [u8; 3],
    pub options: Vec<DccpOption>,
    pub data: Bytes,
}

impl Header {
    /// A header of the given type with every other field zeroed.
    pub fn new(packet_type: PacketType, seq: u64) -> Self {
        Header {
            source_port: 0,
            dest_port: 0,
            ccval: 0,
            cscov: 0,
            packet_type,
            seq,
            ack: None,
            service_code: 0,
            reset_code: ResetCode::Unspecified,
            reset_data: [0; 3],
            options: Vec::new(),
            data: Bytes::new(),
        }
    }

    pub fn with_ack(mut self, ack: u64) -> Self {
        self.ack = Some(ack);
        self
    }

    pub fn with_service_code(mut self, code: u32) -> Self {
        self.service_code = code;
        self
    }

    pub fn with_reset_code(mut self, code: ResetCode) -> Self {
        self.reset_code = code;
        self
    }

    pub fn with_data(mut self, data: Bytes) -> Self {
        self.data = data;
        self
    }

    pub fn with_ccval(mut self, ccval: u8) -> Self {
        self.ccval = ccval & 0x0f;
        self
    }

    pub fn with_options(mut self, options: Vec<DccpOption>) -> Self {
        self.options = options;
        self
    }

    /// Header length (fixed part plus padded options), excluding data.
    pub fn header_len(&self) -> usize {
        self.packet_type.fixed_header_len() + options::options_len(&self.options)
    }

    /// Total encoded size.
    pub fn encoded_len(&self) -> usize {
        self.header_len() + self.data.len()
    }

    fn validate(&self) -> Result<(), WireError> {
        if self.seq > SEQ_MAX {
            return Err(WireError::Numeric);
        }
        match (self.packet_type.has_ack(), self.ack) {
            (true, None) => return Err(WireError::Semantic("missing acknowledgement number")),
            (false, Some(_)) => return Err(WireError::Semantic("unexpected acknowledgement number")),
            (true, Some(ack)) if ack > SEQ_MAX => return Err(WireError::Numeric),
            _ => {}
        }
        if self.ccval > 0x0f || self.cscov > 0x0f {
            return Err(WireError::Numeric);
        }
        if !self.data.is_empty() && !self.packet_type.may_carry_data() {
            return Err(WireError::Semantic("data on a non-data packet type"));
        }
        if self.packet_type == PacketType::Data {
            if let Some(bad) = self.options.iter().find(|o| !options::allowed_on_data(o.kind)) {
                return Err(WireError::OptionNotAllowed(bad.kind));
            }
        }
        if self.header_len() > MAX_HEADER_LEN {
            return Err(WireError::TooBig {
                limit: MAX_HEADER_LEN,
            });
        }
        Ok(())
    }

    /// Encode into a buffer, computing the checksum.
    pub fn encode(&self, buf: &mut BytesMut) -> Result<(), WireError> {
        self.validate()?;
        let start = buf.len();
        let header_len = self.header_len();

        buf.put_u16(self.source_port);
        buf.put_u16(self.dest_port);
        buf.put_u8((header_len / 4) as u8);
        buf.put_u8((self.ccval << 4) | self.cscov);
        buf.put_u16(0); // checksum, patched below
        buf.put_u8(((self.packet_type as u8) << 1) | 1);
        buf.put_u8(0);
        put_u48(buf, self.seq);

        if let Some(ack) = self.ack {
            buf.put_u16(0);
            put_u48(buf, ack);
        }
        if self.packet_type.has_service_code() {
            buf.put_u32(self.service_code);
        } else if self.packet_type == PacketType::Reset {
            buf.put_u8(self.reset_code.to_byte());
            buf.put_slice(&self.reset_data);
        }

        options::encode_options(&self.options, buf)?;
        buf.put_slice(&self.data);

        let coverage = checksum_coverage(self.cscov, header_len, self.data.len());
        let sum = internet_checksum(&buf[start..start + coverage]);
        buf[start + 6..start + 8].copy_from_slice(&sum.to_be_bytes());
        Ok(())
    }

    /// Encode into a fresh buffer, refusing packets longer than `mtu`.
    pub fn to_bytes(&self, mtu: usize) -> Result<Bytes, WireError> {
        let len = self.encoded_len();
        if len > mtu {
            return Err(WireError::TooBig { limit: mtu });
        }
        let mut buf = BytesMut::with_capacity(len);
        self.encode(&mut buf)?;
        Ok(buf.freeze())
    }

    /// Decode a complete packet.
    pub fn decode(packet: Bytes) -> Result<Self, WireError> {
        if packet.len() < GENERIC_HEADER_LEN {
            return Err(WireError::Size);
        }
        let mut cur = &packet[..];

        let source_port = cur.get_u16();
        let dest_port = cur.get_u16();
        let data_offset = cur.get_u8() as usize * 4;
        let cc = cur.get_u8();
        let ccval = cc >> 4;
        let cscov = cc & 0x0f;
        let checksum = cur.get_u16();
        let type_byte = cur.get_u8();
        if type_byte & 1 == 0 {
            return Err(WireError::ShortSeqNo);
        }
        let packet_type = PacketType::from_byte((type_byte >> 1) & 0x0f)
            .ok_or(WireError::Semantic("reserved packet type"))?;

        if data_offset < packet_type.fixed_header_len() || data_offset > packet.len() {
            return Err(WireError::Numeric);
        }

        let coverage = checksum_coverage(cscov, data_offset, packet.len() - data_offset);
        if coverage > packet.len() {
            return Err(WireError::Numeric);
        }
        let mut scratch = BytesMut::from(&packet[..coverage]);
        scratch[6] = 0;
        scratch[7] = 0;
        if internet_checksum(&scratch) != checksum {
            return Err(WireError::Checksum);
        }

        if cur.get_u8() != 0 {
            return Err(WireError::Numeric);
        }
        let seq = get_u48(&mut cur);

        let ack = if packet_type.has_ack() {
            if cur.get_u16() != 0 {
                return Err(WireError::Numeric);
            }
            Some(get_u48(&mut cur))
        } else {
            None
        };

        let mut header = Header::new(packet_type, seq);
        header.source_port = source_port;
        header.dest_port = dest_port;
        header.ccval = ccval;
        header.cscov = cscov;
        header.ack = ack;

        if packet_type.has_service_code() {
            header.service_code = cur.get_u32();
        } else if packet_type == PacketType::Reset {
            header.reset_code = ResetCode::from_byte(cur.get_u8());
            cur.copy_to_slice(&mut header.reset_data);
        }

        let fixed = packet_type.fixed_header_len();
        header.options = options::decode_options(&packet[fixed..data_offset])?;
        if packet_type == PacketType::Data {
            if let Some(bad) = header.options.iter().find(|o| !options::allowed_on_data(o.kind)) {
                return Err(WireError::OptionNotAllowed(bad.kind));
            }
        }
        if packet_type.may_carry_data() {
            header.data = packet.slice(data_offset..);
        }
        Ok(header)
    }
}

// ─── Helpers ────────────────────────────────────────────────────────────────

fn put_u48(buf: &mut impl BufMut, v: u64) {
    buf.put_u16((v >> 32) as u16);
    buf.put_u32(v as u32);
}

fn get_u48(buf: &mut impl Buf) -> u64 {
    let hi = buf.get_u16() as u64;
    let lo = buf.get_u32() as u64;
    (hi << 32) | lo
}

/// Bytes covered by the checksum (RFC 4340 §9.2).
fn checksum_coverage(cscov: u8, header_len: usize, data_len: usize) -> usize {
    if cscov == 0 {
        header_len + data_len
    } else {
        header_len + ((cscov as usize - 1) * 4).min(data_len)
    }
}

/// 16-bit one's complement of the one's complement sum (RFC 1071).
pub fn internet_checksum(bytes: &[u8]) -> u16 {
    let mut sum: u32 = 0;
    let mut chunks = bytes.chunks_exact(2);
    for pair in &mut chunks {
        sum += u16::from_be_bytes([pair[0], pair[1]]) as u32;
    }
    if let [last] = chunks.remainder() {
        sum += (*last as u32) << 8;
    }
    while sum >> 16 != 0 {
        sum = (sum & 0xffff) + (sum >> 16);
    }
    !(sum as u16)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::{OPT_ELAPSED_TIME, OPT_NDP_COUNT};

    fn round_trip(h: &Header) -> Header {
        let bytes = h.to_bytes(1500).expect("encode");
        assert_eq!(bytes.len(), h.encoded_len());
        Header::decode(bytes).expect("decode")
    }

    // ─── Layout Tests ───────────────────────────────────────────────────

    #[test]
    fn fixed_lengths_per_type() {
        assert_eq!(PacketType::Request.fixed_header_len(), 20);
        assert_eq!(PacketType::Data.fixed_header_len(), 16);
        assert_eq!(PacketType::Ack.fixed_header_len(), 24);
        assert_eq!(PacketType::DataAck.fixed_header_len(), 24);
        assert_eq!(PacketType::Response.fixed_header_len(), 28);
        assert_eq!(PacketType::Reset.fixed_header_len(), 28);
        assert_eq!(PacketType::Sync.fixed_header_len(), 24);
    }

    #[test]
    fn request_round_trip() {
        let h = Header::new(PacketType::Request, 0x0000_1234_5678_9abc)
            .with_service_code(0xdead_beef);
        assert_eq!(round_trip(&h), h);
    }

    #[test]
    fn data_ack_with_options_and_payload() {
        let h = Header::new(PacketType::DataAck, 42)
            .with_ack(41)
            .with_ccval(7)
            .with_options(vec![DccpOption::new(OPT_ELAPSED_TIME, vec![0, 9])])
            .with_data(Bytes::from_static(b"hello"));
        let back = round_trip(&h);
        assert_eq!(back, h);
        assert_eq!(back.ccval, 7);
    }

    #[test]
    fn reset_carries_code_and_data() {
        let mut h = Header::new(PacketType::Reset, 9)
            .with_ack(3)
            .with_reset_code(ResetCode::PacketError);
        h.reset_data = [1, 2, 3];
        assert_eq!(round_trip(&h), h);
    }

    // ─── Rejection Tests ────────────────────────────────────────────────

    #[test]
    fn short_seqno_rejected() {
        let mut bytes = BytesMut::from(
            &Header::new(PacketType::Data, 1).to_bytes(1500).unwrap()[..],
        );
        bytes[8] &= !1;
        assert_eq!(Header::decode(bytes.freeze()), Err(WireError::ShortSeqNo));
    }

    #[test]
    fn corrupted_checksum_rejected() {
        let mut bytes = BytesMut::from(
            &Header::new(PacketType::Data, 1)
                .with_data(Bytes::from_static(b"abcd"))
                .to_bytes(1500)
                .unwrap()[..],
        );
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        assert_eq!(Header::decode(bytes.freeze()), Err(WireError::Checksum));
    }

    #[test]
    fn partial_coverage_ignores_tail_corruption() {
        let mut h = Header::new(PacketType::Data, 5).with_data(Bytes::from(vec![0u8; 32]));
        h.cscov = 1; // header only
        let mut bytes = BytesMut::from(&h.to_bytes(1500).unwrap()[..]);
        let last = bytes.len() - 1;
        bytes[last] = 0xaa;
        let back = Header::decode(bytes.freeze()).expect("payload is outside coverage");
        assert_eq!(back.data[31], 0xaa);
    }

    #[test]
    fn data_packet_rejects_feedback_options() {
        let h = Header::new(PacketType::Data, 1)
            .with_options(vec![DccpOption::new(OPT_ELAPSED_TIME, vec![0, 1])]);
        assert_eq!(
            h.to_bytes(1500),
            Err(WireError::OptionNotAllowed(OPT_ELAPSED_TIME))
        );
        let ok = Header::new(PacketType::Data, 1)
            .with_options(vec![DccpOption::new(OPT_NDP_COUNT, vec![1])]);
        assert!(ok.to_bytes(1500).is_ok());
    }

    #[test]
    fn too_big_for_mtu() {
        let h = Header::new(PacketType::Data, 1).with_data(Bytes::from(vec![0u8; 2000]));
        assert_eq!(h.to_bytes(1500), Err(WireError::TooBig { limit: 1500 }));
    }

    #[test]
    fn ack_presence_is_checked() {
        assert!(Header::new(PacketType::Ack, 1).to_bytes(1500).is_err());
        assert!(Header::new(PacketType::Data, 1).with_ack(0).to_bytes(1500).is_err());
    }

    #[test]
    fn truncated_buffers_rejected() {
        let bytes = Header::new(PacketType::Ack, 1).with_ack(1).to_bytes(1500).unwrap();
        for cut in [0, 4, 15, 20] {
            assert!(Header::decode(bytes.slice(..cut)).is_err(), "cut at {cut}");
        }
    }

    #[test]
    fn checksum_known_vector() {
        // RFC 1071 example words: 0x0001 0xf203 0xf4f5 0xf6f7 → sum 0xddf2
        let bytes = [0x00, 0x01, 0xf2, 0x03, 0xf4, 0xf5, 0xf6, 0xf7];
        assert_eq!(internet_checksum(&bytes), !0xddf2);
    }
}

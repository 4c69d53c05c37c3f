//! Property-based tests for the DCCP header and option codecs.
//!
//! Every packet type survives encode → decode, arbitrary bytes never panic
//! the decoder, and single-bit corruption is always rejected.

use bytes::{Bytes, BytesMut};
use proptest::prelude::*;
use dccp_transport::error::WireError;
use dccp_transport::options::*;
use dccp_transport::seq::SEQ_MAX;
use dccp_transport::wire::*;

// ─── Strategies ─────────────────────────────────────────────────────────────

fn packet_type() -> impl Strategy<Value = PacketType> {
    (0u8..10).prop_map(|b| PacketType::from_byte(b).unwrap())
}

fn reset_code() -> impl Strategy<Value = ResetCode> {
    (0u8..=255).prop_map(ResetCode::from_byte)
}

/// Options that encode cleanly: no Padding or bare Mandatory kinds.
fn option() -> impl Strategy<Value = DccpOption> {
    prop_oneof![
        (2u8..32, any::<bool>()).prop_map(|(k, m)| {
            let o = DccpOption::single(k);
            if m { o.with_mandatory() } else { o }
        }),
        (32u8..=255, proptest::collection::vec(any::<u8>(), 0..24), any::<bool>()).prop_map(
            |(k, d, m)| {
                let o = DccpOption::new(k, d);
                if m { o.with_mandatory() } else { o }
            }
        ),
    ]
}

fn header() -> impl Strategy<Value = Header> {
    (
        packet_type(),
        0..=SEQ_MAX,
        0..=SEQ_MAX,
        any::<(u16, u16, u32)>(),
        (0u8..16, reset_code(), any::<[u8; 3]>()),
        proptest::collection::vec(option(), 0..6),
        proptest::collection::vec(any::<u8>(), 0..200),
    )
        .prop_map(|(ty, seq, ack, (sport, dport, code), (ccval, rc, rd), opts, data)| {
            let mut h = Header::new(ty, seq).with_ccval(ccval);
            h.source_port = sport;
            h.dest_port = dport;
            if ty.has_ack() {
                h.ack = Some(ack);
            }
            if ty.has_service_code() {
                h.service_code = code;
            }
            if ty == PacketType::Reset {
                h.reset_code = rc;
                h.reset_data = rd;
            }
            h.options = if ty == PacketType::Data {
                opts.into_iter().filter(|o| allowed_on_data(o.kind)).collect()
            } else {
                opts
            };
            if ty.may_carry_data() {
                h.data = Bytes::from(data);
            }
            h
        })
}

// ─── Header ─────────────────────────────────────────────────────────────────

proptest! {
    #[test]
    fn header_roundtrip(h in header()) {
        let bytes = h.to_bytes(64 * 1024).unwrap();
        prop_assert_eq!(bytes.len(), h.encoded_len());
        prop_assert_eq!(bytes.len() % 4, h.data.len() % 4);
        let decoded = Header::decode(bytes).unwrap();
        prop_assert_eq!(decoded, h);
    }

    #[test]
    fn data_offset_matches_header_len(h in header()) {
        let bytes = h.to_bytes(64 * 1024).unwrap();
        prop_assert_eq!(bytes[4] as usize * 4, h.header_len());
        prop_assert!(h.header_len() >= h.packet_type.fixed_header_len());
    }

    #[test]
    fn decode_arbitrary_bytes_never_panics(data in proptest::collection::vec(any::<u8>(), 0..300)) {
        let _ = Header::decode(Bytes::from(data));
    }

    #[test]
    fn single_bit_flip_is_rejected(h in header(), bit in any::<prop::sample::Index>()) {
        let bytes = h.to_bytes(64 * 1024).unwrap();
        let mut corrupt = BytesMut::from(&bytes[..]);
        let i = bit.index(corrupt.len() * 8);
        corrupt[i / 8] ^= 1 << (i % 8);
        prop_assert!(Header::decode(corrupt.freeze()).is_err());
    }

    #[test]
    fn undersized_mtu_is_refused(h in header()) {
        let len = h.encoded_len();
        let too_big = matches!(h.to_bytes(len - 1), Err(WireError::TooBig { .. }));
        prop_assert!(too_big);
        prop_assert!(h.to_bytes(len).is_ok());
    }
}

// ─── Options ────────────────────────────────────────────────────────────────

proptest! {
    #[test]
    fn options_roundtrip(opts in proptest::collection::vec(option(), 0..12)) {
        let mut buf = BytesMut::new();
        encode_options(&opts, &mut buf).unwrap();
        prop_assert_eq!(buf.len(), options_len(&opts));
        prop_assert_eq!(buf.len() % 4, 0);
        prop_assert_eq!(decode_options(&buf).unwrap(), opts);
    }

    #[test]
    fn decode_options_never_panics(area in proptest::collection::vec(any::<u8>(), 0..64)) {
        let _ = decode_options(&area);
    }

    #[test]
    fn elapsed_time_keeps_ten_micro_precision(us in 0u64..40_000_000) {
        let elapsed = std::time::Duration::from_micros(us);
        let opt = ElapsedTime { elapsed }.encode();
        let back = ElapsedTime::decode(&opt).unwrap().elapsed;
        prop_assert!(back <= elapsed);
        prop_assert!(elapsed - back < std::time::Duration::from_micros(10));
    }

    #[test]
    fn option_direction_is_exclusive(kind in 0u8..=255) {
        let o = DccpOption::new(kind, Bytes::new());
        prop_assert!(!(o.is_sender_to_receiver() && o.is_receiver_to_sender()));
    }
}

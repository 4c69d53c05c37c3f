#![no_main]

use bytes::Bytes;
use libfuzzer_sys::fuzz_target;
use dccp_transport::wire::Header;

/// Fuzz header decode.
///
/// Anything that decodes must re-encode, and the re-encoded packet must
/// decode to the same header.
fuzz_target!(|data: &[u8]| {
    let Ok(h) = Header::decode(Bytes::copy_from_slice(data)) else {
        return;
    };
    assert!(h.seq <= dccp_transport::seq::SEQ_MAX);
    assert_eq!(h.ack.is_some(), h.packet_type.has_ack());

    // Reserved fields and padding do not survive, so compare decoded forms.
    let wire = h.to_bytes(usize::MAX).expect("decoded header must re-encode");
    let again = Header::decode(wire).expect("re-encoded header must decode");
    assert_eq!(again, h);
});

#![no_main]

use bytes::BytesMut;
use libfuzzer_sys::fuzz_target;
use dccp_transport::ccid3::options::{LossIntervals, ReceiveRate, LossEventRate};
use dccp_transport::options::{decode_options, encode_options, ElapsedTime};

/// Fuzz the option area parser and the typed option decoders on top of it.
fuzz_target!(|data: &[u8]| {
    let Ok(opts) = decode_options(data) else {
        return;
    };
    for o in &opts {
        let _ = ElapsedTime::decode(o);
        let _ = LossEventRate::decode(o);
        let _ = ReceiveRate::decode(o);
        if let Some(li) = LossIntervals::decode(o) {
            let back = li.encode().expect("decoded intervals must re-encode");
            assert_eq!(LossIntervals::decode(&back), Some(li));
        }
    }

    let mut buf = BytesMut::new();
    if encode_options(&opts, &mut buf).is_ok() {
        assert_eq!(decode_options(&buf).expect("re-decode"), opts);
    }
});

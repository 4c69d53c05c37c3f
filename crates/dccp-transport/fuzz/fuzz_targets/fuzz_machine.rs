#![no_main]

use std::time::Duration;

use bytes::Bytes;
use libfuzzer_sys::fuzz_target;
use quanta::Instant;
use dccp_transport::ccid::new_controllers;
use dccp_transport::machine::Machine;
use dccp_transport::socket::Role;
use dccp_transport::trace::Tracer;
use dccp_transport::wire::Header;
use dccp_transport::ConnConfig;

/// Fuzz the inbound pipeline of a listening server.
///
/// Input is split into length-prefixed packets. Whatever decodes is fed to
/// the machine, and every queued reply is stamped. Nothing may panic.
fuzz_target!(|data: &[u8]| {
    let cfg = ConnConfig::default();
    let (tx, rx) = new_controllers(&cfg.controller);
    let mut m = Machine::new(Role::Server, cfg, tx, rx, Tracer::new("fuzz", None));
    m.listen();

    let start = Instant::now();
    let mut rest = data;
    let mut tick = 0u64;
    while let [len, tail @ ..] = rest {
        let n = (*len as usize).min(tail.len());
        let (packet, next) = tail.split_at(n);
        rest = next;
        tick += 1;
        let now = start + Duration::from_millis(tick);

        if let Ok(h) = Header::decode(Bytes::copy_from_slice(packet)) {
            m.on_read(h, now);
        }
        for p in m.take_outbox() {
            let _ = m.stamp(p, now);
        }
        let _ = m.take_events();
    }
});

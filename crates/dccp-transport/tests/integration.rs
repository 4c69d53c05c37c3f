//! # Integration tests: two connections over a `PipeLink`
//!
//! Full stack: `Conn` threads → machine → wire encode → pipe → decode →
//! machine → application queue. The pipe can drop packets with a seeded
//! RNG.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use dccp_transport::trace::{MemorySink, TraceKind, TraceSink};
use dccp_transport::{
    Conn, ConnConfig, ConnError, Header, Link, Misuse, PacketType, PipeLink, ResetCode, State,
};

// ─── Helpers ────────────────────────────────────────────────────────────────

const WAIT: Duration = Duration::from_secs(10);

/// Log capture for debugging, e.g. `RUST_LOG=dccp_transport=debug`.
fn init_logs() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Short timers, fixed-rate pacing, roomy application queue.
fn fast_config() -> ConnConfig {
    ConnConfig::from_toml_str(
        r#"
        msl_ms = 250
        request_first_ms = 50
        request_budget_ms = 2000
        partopen_first_ms = 20
        app_queue = 512
        ctrl_queue = 16

        [controller]
        kind = "fixed"
        packets_per_sec = 2000
        "#,
    )
    .unwrap()
}

fn ccid3_config() -> ConnConfig {
    ConnConfig::from_toml_str(
        r#"
        msl_ms = 250
        request_first_ms = 50
        partopen_first_ms = 20
        app_queue = 512
        ctrl_queue = 16
        "#,
    )
    .unwrap()
}

fn connect(cfg: ConnConfig, loss: f64, seed: u64) -> (Conn, Conn) {
    init_logs();
    let (a, b) = PipeLink::lossy_pair(loss, seed);
    let server = Conn::accept(Arc::new(b), cfg.clone(), None).unwrap();
    let client = Conn::dial(Arc::new(a), 42, cfg, None).unwrap();
    (client, server)
}

fn open(conn: &Conn) -> bool {
    conn.wait_for(WAIT, |s| s == State::Open)
}

fn segment(i: u32) -> Bytes {
    Bytes::from(format!("segment-{i:04}"))
}

/// Read until `n` segments arrived or reads go quiet.
fn drain(conn: &Conn, n: usize) -> Vec<Bytes> {
    let mut got = Vec::new();
    while got.len() < n {
        match conn.read_timeout(Duration::from_secs(3)) {
            Ok(Some(b)) => got.push(b),
            _ => break,
        }
    }
    got
}

// ─── Handshake & Transfer ───────────────────────────────────────────────────

#[test]
fn handshake_opens_both_ends() {
    let (client, server) = connect(fast_config(), 0.0, 0);
    assert!(open(&client));
    assert!(open(&server));
    assert_eq!(client.mtu(), 1500 - 24 - 24);
    assert_eq!(client.local_label(), "pipe:a");
    assert_eq!(server.remote_label(), "pipe:a");
}

#[test]
fn transfer_in_order_over_clean_pipe() {
    let (client, server) = connect(fast_config(), 0.0, 0);
    for i in 0..200 {
        client.write(segment(i)).unwrap();
    }
    let got = drain(&server, 200);
    assert_eq!(got.len(), 200);
    for (i, b) in got.iter().enumerate() {
        assert_eq!(b, &segment(i as u32));
    }
    let stats = server.stats();
    assert_eq!(stats.bytes_delivered, 200 * 12);
    assert_eq!(stats.drops.slow_app, 0);
}

#[test]
fn both_directions_carry_data() {
    let (client, server) = connect(fast_config(), 0.0, 0);
    assert!(open(&server));
    client.write(Bytes::from_static(b"ping")).unwrap();
    assert_eq!(&server.read().unwrap()[..], b"ping");
    server.write(Bytes::from_static(b"pong")).unwrap();
    assert_eq!(&client.read().unwrap()[..], b"pong");
}

#[test]
fn ccid3_leaves_initial_rate_after_feedback() {
    let (client, server) = connect(ccid3_config(), 0.0, 0);
    for i in 0..30 {
        client.write(segment(i)).unwrap();
    }
    let got = drain(&server, 30);
    assert_eq!(got.len(), 30);
    let snap = client.stats().sender;
    assert_eq!(snap.ccid, 3);
    assert!(snap.x_bps > 3000, "still trickling at {} B/s", snap.x_bps);
    assert!(matches!(snap.phase, "slowstart" | "equation"));
}

#[test]
fn lossy_pipe_still_opens_and_delivers() {
    let (client, server) = connect(fast_config(), 0.1, 7);
    for i in 0..200 {
        client.write(segment(i)).unwrap();
    }
    let got = drain(&server, 200);
    assert!(got.len() > 120, "only {} of 200 arrived", got.len());
    assert!(got.len() <= 200);
    // Unordered delivery, but no segment shows up twice.
    let mut seen: Vec<&Bytes> = got.iter().collect();
    seen.sort();
    seen.dedup();
    assert_eq!(seen.len(), got.len());
}

#[test]
fn partopen_holds_data_until_open() {
    init_logs();
    let (a, raw) = PipeLink::pair();
    let client = Arc::new(Conn::dial(Arc::new(a), 5, fast_config(), None).unwrap());

    // Answer the Request by hand and leave the client in PARTOPEN.
    let req = raw.read_header(WAIT).unwrap();
    assert_eq!(req.packet_type, PacketType::Request);
    let server_iss = 7_000;
    raw.write_header(
        &Header::new(PacketType::Response, server_iss)
            .with_ack(req.seq)
            .with_service_code(req.service_code),
    )
    .unwrap();
    assert!(client.wait_for(WAIT, |s| s == State::PartOpen));

    let writer = {
        let client = client.clone();
        std::thread::spawn(move || {
            for _ in 0..20 {
                client.write(Bytes::from_static(b"x"))?;
            }
            Ok::<(), ConnError>(())
        })
    };

    // Only handshake packets leave while in PARTOPEN.
    let mut last_seq = req.seq;
    let deadline = std::time::Instant::now() + Duration::from_millis(300);
    while std::time::Instant::now() < deadline {
        if let Ok(h) = raw.read_header(Duration::from_millis(20)) {
            assert!(!h.packet_type.is_data(), "{:?} sent in PARTOPEN", h.packet_type);
            last_seq = last_seq.max(h.seq);
        }
    }
    assert_eq!(client.state(), State::PartOpen);
    assert!(!writer.is_finished());

    // Any acknowledgement completes the handshake and releases the data.
    raw.write_header(&Header::new(PacketType::Ack, server_iss + 1).with_ack(last_seq))
        .unwrap();
    assert!(client.wait_for(WAIT, |s| s == State::Open));
    let first = loop {
        let h = raw.read_header(WAIT).unwrap();
        if h.packet_type.is_data() {
            break h;
        }
    };
    assert_eq!(first.packet_type, PacketType::Data);
    assert_eq!(&first.data[..], b"x");

    assert_eq!(writer.join().unwrap(), Ok(()));
    assert_eq!(client.state(), State::Open);
    client.abort();
}

// ─── Close & Abort ──────────────────────────────────────────────────────────

#[test]
fn orderly_close_reaches_timewait_then_closed() {
    let (client, server) = connect(fast_config(), 0.0, 0);
    assert!(open(&server));
    client.write(Bytes::from_static(b"last words")).unwrap();
    assert_eq!(&server.read().unwrap()[..], b"last words");

    client.close().unwrap();
    assert_eq!(server.read(), Err(ConnError::Closed));
    assert!(server.wait_for(WAIT, |s| s == State::Closed));
    assert!(client.wait_for(WAIT, |s| s == State::TimeWait || s == State::Closed));
    // Ends after 2·MSL, or sooner once the server's end of the pipe closes.
    assert!(client.wait_for(WAIT, |s| s == State::Closed));
    assert_eq!(client.error(), Some(ConnError::Closed));
}

#[test]
fn repeated_close_reports_the_same_error() {
    let (client, server) = connect(fast_config(), 0.0, 0);
    assert!(open(&client));
    assert_eq!(client.close(), Ok(()));
    let first = client.close().unwrap_err();
    let second = client.close().unwrap_err();
    assert_eq!(first, second);
    assert_eq!(first, ConnError::Closed);
    client.abort();
    assert_eq!(client.error(), Some(ConnError::Closed));
    assert_eq!(
        client.write(Bytes::from_static(b"late")),
        Err(ConnError::Misuse(Misuse::WriteAfterClose))
    );
    assert_eq!(client.read(), Err(ConnError::Closed));
    drop(server);
}

#[test]
fn abort_resets_the_peer() {
    let (client, server) = connect(fast_config(), 0.0, 0);
    assert!(open(&server));
    assert!(open(&client));
    client.abort();
    assert_eq!(server.read(), Err(ConnError::Reset(ResetCode::Aborted)));
    assert_eq!(client.error(), Some(ConnError::Aborted));
    assert!(server.wait_for(WAIT, |s| s == State::TimeWait || s == State::Closed));
    assert_eq!(client.state(), State::Closed);
}

#[test]
fn write_rejects_bad_segments() {
    let (client, _server) = connect(fast_config(), 0.0, 0);
    assert_eq!(
        client.write(Bytes::new()),
        Err(ConnError::Misuse(Misuse::EmptySegment))
    );
    let big = Bytes::from(vec![0u8; client.mtu() + 1]);
    assert_eq!(
        client.write(big),
        Err(ConnError::Misuse(Misuse::SegmentTooLarge))
    );
}

// ─── Timeouts ───────────────────────────────────────────────────────────────

#[test]
fn unanswered_request_aborts() {
    let (a, _silent) = PipeLink::pair();
    let cfg = ConnConfig::from_toml_str(
        "request_first_ms = 20\nrequest_budget_ms = 200\nrequest_growth_ms = 100",
    )
    .unwrap();
    let client = Conn::dial(Arc::new(a), 1, cfg, None).unwrap();
    assert!(client.wait_for(WAIT, |s| s == State::Closed));
    assert_eq!(client.error(), Some(ConnError::Aborted));
    assert_eq!(client.read(), Err(ConnError::Aborted));
}

#[test]
fn idle_listener_gives_up() {
    let (_a, b) = PipeLink::pair();
    let cfg = ConnConfig::from_toml_str("listen_timeout_ms = 100").unwrap();
    let server = Conn::accept(Arc::new(b), cfg, None).unwrap();
    assert_eq!(server.state(), State::Listen);
    assert!(server.wait_for(WAIT, |s| s == State::Closed));
    assert_eq!(server.error(), Some(ConnError::Aborted));
}

// ─── Tracing ────────────────────────────────────────────────────────────────

#[test]
fn trace_records_state_changes() {
    let sink = Arc::new(MemorySink::new());
    let (a, b) = PipeLink::pair();
    let server = Conn::accept(
        Arc::new(b),
        fast_config(),
        Some(sink.clone() as Arc<dyn TraceSink>),
    )
    .unwrap();
    let client = Conn::dial(Arc::new(a), 9, fast_config(), None).unwrap();
    assert!(open(&server));
    assert!(open(&client));

    let notes: Vec<String> = sink
        .records()
        .into_iter()
        .filter(|r| r.kind == TraceKind::State)
        .map(|r| r.note)
        .collect();
    assert_eq!(
        &notes[..3],
        ["CLOSED -> LISTEN", "LISTEN -> RESPOND", "RESPOND -> OPEN"]
    );
    assert!(sink.count(TraceKind::Read) >= 2);
    assert!(sink.count(TraceKind::Write) >= 1);
    assert!(sink.records().iter().all(|r| r.label == "server"));
}

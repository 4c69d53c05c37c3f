//! # dccp-cat
//!
//! Netcat over DCCP/UDP. Stdin goes out in MTU-sized segments; received
//! segments go to stdout.
//!
//! ## Usage
//!
//! ```bash
//! # Server
//! dccp-cat --listen 0.0.0.0:4000 > received.bin
//!
//! # Client
//! dccp-cat --connect 127.0.0.1:4000 --service 42 < file.bin
//!
//! # Tuned, with a JSON-lines trace
//! dccp-cat --connect 10.0.0.2:4000 --config dccp.toml --trace client.jsonl
//! ```

use std::fs::File;
use std::io::{Read, Write};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use bytes::Bytes;

use dccp_transport::trace::{JsonLinesSink, TraceSink};
use dccp_transport::{Conn, ConnConfig, ConnError, State, UdpLink};

enum Mode {
    Listen(SocketAddr),
    Connect(SocketAddr),
}

struct Args {
    mode: Mode,
    bind: SocketAddr,
    service: u32,
    config: Option<String>,
    trace: Option<String>,
}

fn main() -> anyhow::Result<()> {
    // ── Logging ─────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .with_target(true)
        .compact()
        .init();

    // ── Parse CLI ───────────────────────────────────────────────
    let args = parse_args()?;

    let config = match &args.config {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading config {}", path))?;
            ConnConfig::from_toml_str(&text)?
        }
        None => ConnConfig::default(),
    };

    let trace: Option<Arc<dyn TraceSink>> = match &args.trace {
        Some(path) => {
            let file = File::create(path).with_context(|| format!("creating trace {}", path))?;
            Some(Arc::new(JsonLinesSink::new(file)))
        }
        None => None,
    };

    // ── Connection ──────────────────────────────────────────────
    let conn = match args.mode {
        Mode::Listen(addr) => {
            tracing::info!(%addr, "waiting for a peer");
            let link = UdpLink::accept(addr, Some(config.listen_timeout))
                .with_context(|| format!("accepting on {}", addr))?;
            Conn::accept(Arc::new(link), config, trace)?
        }
        Mode::Connect(addr) => {
            let link = UdpLink::connect(args.bind, addr)
                .with_context(|| format!("connecting to {}", addr))?;
            Conn::dial(Arc::new(link), args.service, config, trace)?
        }
    };
    let conn = Arc::new(conn);

    if !conn.wait_for(Duration::from_secs(90), |s| {
        s == State::Open || s == State::Closed
    }) || conn.state() == State::Closed
    {
        anyhow::bail!(
            "handshake failed: {}",
            conn.error().unwrap_or(ConnError::Aborted)
        );
    }
    tracing::info!(local = %conn.local_label(), remote = %conn.remote_label(), mtu = conn.mtu(), "connected");

    // ── Stdin → connection ──────────────────────────────────────
    let writer = {
        let conn = conn.clone();
        std::thread::Builder::new()
            .name("stdin".into())
            .spawn(move || -> anyhow::Result<()> {
                let mut stdin = std::io::stdin().lock();
                let mut buf = vec![0u8; conn.mtu()];
                loop {
                    let n = stdin.read(&mut buf)?;
                    if n == 0 {
                        break;
                    }
                    conn.write(Bytes::copy_from_slice(&buf[..n]))?;
                }
                Ok(())
            })?
    };

    // ── Connection → stdout ─────────────────────────────────────
    let mut stdout = std::io::stdout().lock();
    let mut received: u64 = 0;
    loop {
        match conn.read_timeout(Duration::from_millis(200)) {
            Ok(Some(segment)) => {
                received += segment.len() as u64;
                stdout.write_all(&segment)?;
            }
            // Stdin is drained and the peer has gone quiet.
            Ok(None) if writer.is_finished() => break,
            Ok(None) => {}
            Err(ConnError::Closed) | Err(ConnError::Reset(_)) => break,
            Err(e) => {
                tracing::warn!(error = %e, "connection ended");
                break;
            }
        }
    }
    stdout.flush()?;

    // A pump still blocked on stdin is left behind.
    if writer.is_finished() {
        match writer.join() {
            Ok(Err(e)) => tracing::warn!(error = %e, "stdin pump stopped"),
            Err(_) => tracing::error!("stdin pump panicked"),
            Ok(Ok(())) => {}
        }
    }
    if let Err(e) = conn.close() {
        tracing::debug!(error = %e, "close");
    }
    conn.wait_for(Duration::from_secs(10), |s| {
        matches!(s, State::TimeWait | State::Closed)
    });

    let stats = conn.stats();
    tracing::info!(
        received,
        packets_read = stats.packets_read,
        packets_written = stats.packets_written,
        drops = stats.drops.total(),
        x_bps = stats.sender.x_bps,
        rtt_us = stats.sender.rtt_us,
        "done"
    );
    eprintln!("{}", serde_json::to_string(&stats)?);
    Ok(())
}

fn parse_args() -> anyhow::Result<Args> {
    let args: Vec<String> = std::env::args().collect();
    let mut mode = None;
    let mut bind: SocketAddr = "0.0.0.0:0".parse()?;
    let mut service = 0u32;
    let mut config = None;
    let mut trace = None;

    let addr = |flag: &str, val: Option<&String>| -> anyhow::Result<SocketAddr> {
        let val = val.ok_or_else(|| anyhow::anyhow!("{} requires a value", flag))?;
        val.parse()
            .map_err(|e| anyhow::anyhow!("invalid address '{}': {}", val, e))
    };

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--listen" | "-l" => {
                i += 1;
                mode = Some(Mode::Listen(addr("--listen", args.get(i))?));
            }
            "--connect" | "-c" => {
                i += 1;
                mode = Some(Mode::Connect(addr("--connect", args.get(i))?));
            }
            "--bind" | "-b" => {
                i += 1;
                bind = addr("--bind", args.get(i))?;
            }
            "--service" | "-s" => {
                i += 1;
                let val = args
                    .get(i)
                    .ok_or_else(|| anyhow::anyhow!("--service requires a value"))?;
                service = val
                    .parse()
                    .map_err(|e| anyhow::anyhow!("invalid service code '{}': {}", val, e))?;
            }
            "--config" => {
                i += 1;
                config = Some(
                    args.get(i)
                        .ok_or_else(|| anyhow::anyhow!("--config requires a value"))?
                        .clone(),
                );
            }
            "--trace" => {
                i += 1;
                trace = Some(
                    args.get(i)
                        .ok_or_else(|| anyhow::anyhow!("--trace requires a value"))?
                        .clone(),
                );
            }
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            other => anyhow::bail!("unknown argument: {}", other),
        }
        i += 1;
    }

    let mode = mode.ok_or_else(|| anyhow::anyhow!("one of --listen or --connect is required"))?;
    Ok(Args {
        mode,
        bind,
        service,
        config,
        trace,
    })
}

fn print_help() {
    eprintln!(
        "dccp-cat: netcat over DCCP/UDP

USAGE:
    dccp-cat --listen ADDR [OPTIONS]
    dccp-cat --connect ADDR [OPTIONS]

OPTIONS:
    -l, --listen ADDR     Wait for one peer on ADDR
    -c, --connect ADDR    Connect to ADDR
    -b, --bind ADDR       Local address for --connect [default: 0.0.0.0:0]
    -s, --service CODE    Service code [default: 0]
        --config FILE     Connection config (TOML)
        --trace FILE      Write JSON-lines trace records
    -h, --help            Print this help"
    );
}

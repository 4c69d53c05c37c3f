//! # Links
//!
//! A [`Link`] moves whole DCCP packets between two endpoints. Two are
//! provided:
//!
//! - [`PipeLink`]: an in-process pair over crossbeam channels, with optional
//!   seeded random loss. Used by tests and the loopback mode of `dccp-cat`.
//! - [`UdpLink`]: a connected `std::net::UdpSocket`, one DCCP packet per
//!   datagram.

use std::io;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use bytes::Bytes;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError};
use rand::rngs::StdRng;
use rand::{RngExt as _, SeedableRng};

use crate::error::LinkError;
use crate::wire::Header;

/// Largest datagram a link accepts in either direction.
pub const MAX_DATAGRAM: usize = 64 * 1024;

pub trait Link: Send + Sync {
    /// Wait up to `timeout` for the next packet.
    fn read_header(&self, timeout: Duration) -> Result<Header, LinkError>;

    fn write_header(&self, h: &Header) -> Result<(), LinkError>;

    /// Idempotent. Pending and later reads return [`LinkError::Closed`].
    fn close(&self);

    fn local_label(&self) -> String;

    fn remote_label(&self) -> String;
}

// ─── Pipe ───────────────────────────────────────────────────────────────────

/// Default per-direction queue depth of a [`PipeLink`].
pub const PIPE_QUEUE: usize = 1024;

struct Loss {
    rate: f64,
    rng: StdRng,
}

/// One end of an in-memory link.
pub struct PipeLink {
    name: String,
    peer: String,
    tx: Mutex<Option<Sender<Bytes>>>,
    rx: Receiver<Bytes>,
    loss: Option<Mutex<Loss>>,
    closed: AtomicBool,
}

impl PipeLink {
    /// A lossless pair.
    pub fn pair() -> (PipeLink, PipeLink) {
        Self::lossy_pair(0.0, 0)
    }

    /// A pair dropping each packet with probability `rate`, in both
    /// directions. The same seed gives the same drop pattern.
    pub fn lossy_pair(rate: f64, seed: u64) -> (PipeLink, PipeLink) {
        let (a_tx, a_rx) = crossbeam_channel::bounded(PIPE_QUEUE);
        let (b_tx, b_rx) = crossbeam_channel::bounded(PIPE_QUEUE);
        let loss = |seed: u64| {
            (rate > 0.0).then(|| {
                Mutex::new(Loss {
                    rate: rate.min(1.0),
                    rng: StdRng::seed_from_u64(seed),
                })
            })
        };
        let a = PipeLink {
            name: "pipe:a".into(),
            peer: "pipe:b".into(),
            tx: Mutex::new(Some(a_tx)),
            rx: b_rx,
            loss: loss(seed),
            closed: AtomicBool::new(false),
        };
        let b = PipeLink {
            name: "pipe:b".into(),
            peer: "pipe:a".into(),
            tx: Mutex::new(Some(b_tx)),
            rx: a_rx,
            loss: loss(seed.wrapping_add(1)),
            closed: AtomicBool::new(false),
        };
        (a, b)
    }

    fn lose(&self) -> bool {
        match &self.loss {
            None => false,
            Some(l) => {
                let mut l = l.lock().unwrap_or_else(|e| e.into_inner());
                let roll = l.rng.random::<f64>();
                roll < l.rate
            }
        }
    }
}

impl Link for PipeLink {
    fn read_header(&self, timeout: Duration) -> Result<Header, LinkError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(LinkError::Closed);
        }
        match self.rx.recv_timeout(timeout) {
            Ok(packet) => Ok(Header::decode(packet)?),
            Err(RecvTimeoutError::Timeout) => {
                if self.closed.load(Ordering::Acquire) {
                    Err(LinkError::Closed)
                } else {
                    Err(LinkError::Timeout)
                }
            }
            Err(RecvTimeoutError::Disconnected) => Err(LinkError::Closed),
        }
    }

    fn write_header(&self, h: &Header) -> Result<(), LinkError> {
        let packet = h.to_bytes(MAX_DATAGRAM)?;
        if self.lose() {
            tracing::trace!(link = %self.name, seq = h.seq, "pipe loss");
            return Ok(());
        }
        let tx = self.tx.lock().unwrap_or_else(|e| e.into_inner());
        let Some(tx) = tx.as_ref() else {
            return Err(LinkError::Closed);
        };
        match tx.try_send(packet) {
            Ok(()) => Ok(()),
            // A full queue is congestion, not failure.
            Err(TrySendError::Full(_)) => {
                tracing::trace!(link = %self.name, seq = h.seq, "pipe queue full");
                Ok(())
            }
            Err(TrySendError::Disconnected(_)) => Err(LinkError::Closed),
        }
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.tx.lock().unwrap_or_else(|e| e.into_inner()).take();
            tracing::debug!(link = %self.name, "pipe closed");
        }
    }

    fn local_label(&self) -> String {
        self.name.clone()
    }

    fn remote_label(&self) -> String {
        self.peer.clone()
    }
}

// ─── UDP ────────────────────────────────────────────────────────────────────

/// A DCCP link over a connected UDP socket.
pub struct UdpLink {
    socket: UdpSocket,
    local: SocketAddr,
    remote: SocketAddr,
    closed: AtomicBool,
}

impl UdpLink {
    /// Wrap a socket that is already connected to its peer.
    pub fn from_connected(socket: UdpSocket) -> io::Result<Self> {
        let local = socket.local_addr()?;
        let remote = socket.peer_addr()?;
        Ok(UdpLink {
            socket,
            local,
            remote,
            closed: AtomicBool::new(false),
        })
    }

    /// Bind `bind` and connect to `remote`.
    pub fn connect(bind: impl ToSocketAddrs, remote: impl ToSocketAddrs) -> io::Result<Self> {
        let socket = UdpSocket::bind(bind)?;
        socket.connect(remote)?;
        Self::from_connected(socket)
    }

    /// Bind `bind`, wait up to `timeout` for the first datagram, and connect
    /// to its sender. The datagram stays queued for the first read.
    pub fn accept(bind: impl ToSocketAddrs, timeout: Option<Duration>) -> io::Result<Self> {
        let socket = UdpSocket::bind(bind)?;
        socket.set_read_timeout(timeout)?;
        let mut probe = [0u8; 1];
        let (_, peer) = socket.peek_from(&mut probe)?;
        socket.connect(peer)?;
        tracing::info!(local = %socket.local_addr()?, peer = %peer, "udp peer accepted");
        Self::from_connected(socket)
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote
    }
}

impl Link for UdpLink {
    fn read_header(&self, timeout: Duration) -> Result<Header, LinkError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(LinkError::Closed);
        }
        self.socket
            .set_read_timeout(Some(timeout.max(Duration::from_millis(1))))?;
        let mut buf = vec![0u8; MAX_DATAGRAM];
        match self.socket.recv(&mut buf) {
            Ok(n) => {
                buf.truncate(n);
                Ok(Header::decode(Bytes::from(buf))?)
            }
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                if self.closed.load(Ordering::Acquire) {
                    Err(LinkError::Closed)
                } else {
                    Err(LinkError::Timeout)
                }
            }
            // An ICMP port unreachable from an earlier send; the peer may
            // still come up.
            Err(e) if e.kind() == io::ErrorKind::ConnectionRefused => Err(LinkError::Timeout),
            Err(e) => Err(LinkError::Io(e)),
        }
    }

    fn write_header(&self, h: &Header) -> Result<(), LinkError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(LinkError::Closed);
        }
        let packet = h.to_bytes(MAX_DATAGRAM)?;
        match self.socket.send(&packet) {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::ConnectionRefused => {
                tracing::debug!(remote = %self.remote, "peer port unreachable");
                Ok(())
            }
            Err(e) => Err(LinkError::Io(e)),
        }
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            tracing::debug!(local = %self.local, remote = %self.remote, "udp link closed");
        }
    }

    fn local_label(&self) -> String {
        self.local.to_string()
    }

    fn remote_label(&self) -> String {
        self.remote.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::PacketType;

    #[test]
    fn pipe_carries_headers_both_ways() {
        let (a, b) = PipeLink::pair();
        let h = Header::new(PacketType::Data, 9).with_data(Bytes::from_static(b"abc"));
        a.write_header(&h).unwrap();
        let got = b.read_header(Duration::from_millis(100)).unwrap();
        assert_eq!(got.seq, 9);
        assert_eq!(&got.data[..], b"abc");

        b.write_header(&Header::new(PacketType::Ack, 1).with_ack(9))
            .unwrap();
        assert_eq!(a.read_header(Duration::from_millis(100)).unwrap().ack, Some(9));
    }

    #[test]
    fn pipe_read_times_out() {
        let (a, _b) = PipeLink::pair();
        assert!(matches!(
            a.read_header(Duration::from_millis(5)),
            Err(LinkError::Timeout)
        ));
    }

    #[test]
    fn closing_one_end_closes_the_other() {
        let (a, b) = PipeLink::pair();
        a.write_header(&Header::new(PacketType::Request, 1)).unwrap();
        a.close();
        a.close();
        assert!(matches!(
            a.write_header(&Header::new(PacketType::Request, 2)),
            Err(LinkError::Closed)
        ));
        // Queued packets drain before the disconnect shows.
        assert!(b.read_header(Duration::from_millis(50)).is_ok());
        assert!(matches!(
            b.read_header(Duration::from_millis(50)),
            Err(LinkError::Closed)
        ));
    }

    #[test]
    fn seeded_loss_is_reproducible() {
        let survivors = |seed| {
            let (a, b) = PipeLink::lossy_pair(0.3, seed);
            for s in 0..200 {
                a.write_header(&Header::new(PacketType::Request, s)).unwrap();
            }
            let mut got = Vec::new();
            while let Ok(h) = b.read_header(Duration::from_millis(1)) {
                got.push(h.seq);
            }
            got
        };
        let first = survivors(7);
        assert_eq!(first, survivors(7));
        assert!(first.len() > 100 && first.len() < 180, "kept {}", first.len());
    }

    #[test]
    fn udp_loopback() {
        let server = UdpSocket::bind("127.0.0.1:0").unwrap();
        let server_addr = server.local_addr().unwrap();
        let client = UdpLink::connect("127.0.0.1:0", server_addr).unwrap();
        client
            .write_header(&Header::new(PacketType::Request, 5).with_service_code(77))
            .unwrap();
        server.connect(client.local_addr()).unwrap();
        let server = UdpLink::from_connected(server).unwrap();
        let h = server.read_header(Duration::from_secs(1)).unwrap();
        assert_eq!(h.service_code, 77);
        assert_eq!(server.remote_label(), client.local_label());
    }
}

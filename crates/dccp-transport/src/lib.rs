//! # dccp-transport
//!
//! Pure-Rust DCCP (RFC 4340) connections with CCID3/TFRC congestion control
//! (RFC 4342, RFC 5348).
//!
//! Unreliable, unordered datagrams with a connection handshake, sequence
//! window validation and rate-based congestion control. Each `write` is one
//! packet; each `read` returns one packet's payload.
//!
//! ## Crate structure
//!
//! - [`wire`]: Header codec, packet types, reset codes
//! - [`options`]: Option codec and the generic time options
//! - [`seq`]: 48-bit circular sequence arithmetic
//! - [`socket`]: Per-connection registers and sequence windows
//! - [`machine`]: Sans-I/O connection state machine
//! - [`steps`]: Inbound packet pipeline
//! - [`conn`]: Threaded runtime and the application API
//! - [`link`]: Packet links: in-memory pipe and UDP
//! - [`ccid`]: Congestion controller interface, pacing, fixed-rate pair
//! - [`ccid3`]: TFRC sender and receiver
//! - [`backoff`]: Resend schedules
//! - [`config`]: TOML-backed connection configuration
//! - [`trace`]: Structured per-event trace records
//! - [`stats`]: Counters and controller snapshots
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use bytes::Bytes;
//! use dccp_transport::{Conn, ConnConfig, PipeLink};
//!
//! let (a, b) = PipeLink::pair();
//! let server = Conn::accept(Arc::new(b), ConnConfig::default(), None)?;
//! let client = Conn::dial(Arc::new(a), 42, ConnConfig::default(), None)?;
//! client.write(Bytes::from_static(b"hello"))?;
//! assert_eq!(&server.read()?[..], b"hello");
//! client.close()?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod backoff;
pub mod ccid;
pub mod ccid3;
pub mod config;
pub mod conn;
pub mod error;
pub mod link;
pub mod machine;
pub mod options;
pub mod seq;
pub mod socket;
pub mod stats;
pub mod steps;
pub mod trace;
pub mod wire;

pub use config::ConnConfig;
pub use conn::Conn;
pub use error::{ConnError, LinkError, Misuse, WireError};
pub use link::{Link, PipeLink, UdpLink};
pub use socket::State;
pub use stats::{ConnStats, DropReason};
pub use wire::{Header, PacketType, ResetCode};

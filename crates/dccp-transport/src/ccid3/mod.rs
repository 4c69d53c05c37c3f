//! # CCID3: TFRC Congestion Control
//!
//! RFC 4342 profile of TCP-Friendly Rate Control (RFC 5348). The sender
//! paces at an explicit byte rate computed from RTT and the loss event rate
//! the receiver reports; the receiver builds loss intervals and sends
//! feedback about once per RTT.
//!
//! ## Module layout
//!
//! - [`options`]: wire codecs for the CCID3 options
//! - [`interval`], [`receiver_loss`], [`loss_rate`]: receiver loss history
//!   and the weighted average loss interval
//! - [`receive_rate`]: receive-rate meter for feedback
//! - [`rtt`], [`window_counter`]: RTT estimation on both halves
//! - [`sender_loss`], [`rate`], [`equation`], [`nofeedback`]: sender rate
//!   control
//! - [`sender`], [`receiver`]: the controller halves

pub mod equation;
pub mod interval;
pub mod loss_rate;
pub mod nofeedback;
pub mod options;
pub mod rate;
pub mod receive_rate;
pub mod receiver;
pub mod receiver_loss;
pub mod rtt;
pub mod sender;
pub mod sender_loss;
pub mod window_counter;

pub use receiver::Ccid3Receiver;
pub use sender::Ccid3Sender;

/// Congestion-control maximum packet size, also used as the segment size.
pub const CCMPS: u32 = 2 * 1500;

/// Consecutive unanswered nofeedback expiries before the sender gives up.
pub const MAX_NOFEEDBACK_EXPIRIES: u32 = 64;

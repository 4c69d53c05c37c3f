//! Inbound packet pipeline (RFC 4340 §8.5).
//!
//! Each step either lets the packet through, consumes it, or drops it with a
//! reason. The first step that stops the packet ends processing.

use quanta::Instant;

use crate::ccid::{FeedbackHeader, FeedforwardHeader};
use crate::machine::Machine;
use crate::options::DccpOption;
use crate::seq::{seq_add, seq_in_window, seq_le};
use crate::socket::State;
use crate::stats::DropReason;
use crate::wire::{Header, PacketType, ResetCode};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Next,
    /// Fully handled; nothing further to do.
    Done,
    Drop(DropReason, &'static str),
}

type Step = fn(&mut Machine, &Header, Instant) -> Flow;

const PIPELINE: [Step; 15] = [
    Machine::step_timewait,
    Machine::step_listen,
    Machine::step_request,
    Machine::step_sync_prep,
    Machine::step_window,
    Machine::step_unexpected,
    Machine::step_controllers,
    Machine::step_reset,
    Machine::step_request_done,
    Machine::step_respond,
    Machine::step_partopen,
    Machine::step_close_req,
    Machine::step_close,
    Machine::step_sync,
    Machine::step_data,
];

/// Options the sending half consumes: receiver-to-sender CCID options plus
/// the generic ones (Elapsed Time in particular).
fn feedback_options(options: &[DccpOption]) -> Vec<DccpOption> {
    options
        .iter()
        .filter(|o| !o.is_sender_to_receiver())
        .cloned()
        .collect()
}

fn feedforward_options(options: &[DccpOption]) -> Vec<DccpOption> {
    options
        .iter()
        .filter(|o| o.is_sender_to_receiver())
        .cloned()
        .collect()
}

impl Machine {
    /// Run one decoded inbound packet through the pipeline.
    pub fn on_read(&mut self, h: Header, now: Instant) {
        self.stats.packets_read += 1;
        self.tracer.read(self.state(), &h);
        for step in PIPELINE {
            match step(self, &h, now) {
                Flow::Next => {}
                Flow::Done => return,
                Flow::Drop(reason, note) => {
                    self.note_drop(Some(&h), reason, note);
                    return;
                }
            }
        }
    }

    fn step_timewait(&mut self, h: &Header, _now: Instant) -> Flow {
        if self.state() != State::TimeWait {
            return Flow::Next;
        }
        if h.packet_type != PacketType::Reset {
            let r = self.gen_abnormal_reset(ResetCode::NoConnection, h);
            self.inject(r);
        }
        Flow::Drop(DropReason::StateFilter, "timewait")
    }

    fn step_listen(&mut self, h: &Header, _now: Instant) -> Flow {
        if self.state() != State::Listen {
            return Flow::Next;
        }
        if h.packet_type == PacketType::Request {
            self.goto_respond(h.service_code, h.seq);
            return Flow::Next;
        }
        if h.packet_type != PacketType::Reset {
            let r = self.gen_abnormal_reset(ResetCode::NoConnection, h);
            self.inject(r);
        }
        Flow::Drop(DropReason::StateFilter, "listen expects a request")
    }

    fn step_request(&mut self, h: &Header, _now: Instant) -> Flow {
        if self.state() != State::Request {
            return Flow::Next;
        }
        let answers = matches!(h.packet_type, PacketType::Response | PacketType::Reset);
        if let (true, Some(ack)) = (answers, h.ack) {
            if self.socket.in_ack_window(ack) {
                self.socket.set_isr(h.seq);
                self.socket.set_gsr(h.seq);
                self.socket.set_gar(ack);
                return Flow::Next;
            }
        }
        if h.packet_type != PacketType::Reset {
            let r = self.gen_reset(ResetCode::PacketError);
            self.inject(r);
        }
        Flow::Drop(DropReason::StateFilter, "request expects a response")
    }

    fn step_sync_prep(&mut self, h: &Header, _now: Instant) -> Flow {
        if !matches!(h.packet_type, PacketType::Sync | PacketType::SyncAck) {
            return Flow::Next;
        }
        let (swl, _) = self.socket.seq_window();
        let ack_ok = h.ack.is_some_and(|a| self.socket.in_ack_window(a));
        if ack_ok && seq_le(swl, h.seq) {
            self.socket.update_gsr(h.seq);
            return Flow::Next;
        }
        Flow::Drop(DropReason::OutOfWindow, "sync outside window")
    }

    fn step_window(&mut self, h: &Header, _now: Instant) -> Flow {
        // Step 3 already validated whatever got through in REQUEST.
        if self.state() == State::Request {
            return Flow::Next;
        }
        let (mut swl, swh) = self.socket.seq_window();
        let (mut awl, awh) = self.socket.ack_window();
        let gsr = self.socket.gsr();
        if matches!(
            h.packet_type,
            PacketType::CloseReq | PacketType::Close | PacketType::Reset
        ) {
            swl = seq_add(gsr, 1);
            awl = self.socket.gar();
        }

        let seq_ok = seq_in_window(h.seq, swl, swh);
        let ack_ok = h.ack.map_or(true, |a| seq_in_window(a, awl, awh));
        if seq_ok && ack_ok {
            self.socket.update_gsr(h.seq);
            if h.packet_type != PacketType::Sync {
                if let Some(a) = h.ack {
                    self.socket.update_gar(a);
                }
            }
            return Flow::Next;
        }

        let ack = if h.packet_type == PacketType::Reset {
            gsr
        } else {
            h.seq
        };
        let s = self.gen_sync(Some(ack));
        self.inject(s);
        Flow::Drop(DropReason::OutOfWindow, "sequence check")
    }

    fn step_unexpected(&mut self, h: &Header, _now: Instant) -> Flow {
        let server = self.socket.is_server();
        let state = self.state();
        let stale_handshake = state >= State::Open
            && matches!(h.packet_type, PacketType::Request | PacketType::Response)
            && seq_le(self.socket.osr(), h.seq);
        let unexpected = (server && h.packet_type == PacketType::CloseReq)
            || (server && h.packet_type == PacketType::Response)
            || (!server && h.packet_type == PacketType::Request)
            || stale_handshake
            || (state == State::Respond && h.packet_type == PacketType::Data);
        if !unexpected {
            return Flow::Next;
        }
        let s = self.gen_sync(Some(h.seq));
        self.inject(s);
        Flow::Drop(DropReason::Unexpected, "unexpected type")
    }

    fn step_controllers(&mut self, h: &Header, now: Instant) -> Flow {
        let fb_options = feedback_options(&h.options);
        let res = self.tx_cc.on_read(&FeedbackHeader {
            packet_type: h.packet_type,
            seq: h.seq,
            ack: h.ack,
            options: &fb_options,
            time: now,
        });
        let go_on = self.apply_congestion("sender", res);
        self.sync_with_controller();
        if !go_on {
            return self.controller_stop();
        }

        let ff_options = feedforward_options(&h.options);
        let res = self.rx_cc.on_read(&FeedforwardHeader {
            packet_type: h.packet_type,
            seq: h.seq,
            ccval: h.ccval,
            options: &ff_options,
            data_len: h.data.len(),
            time: now,
        });
        if !self.apply_congestion("receiver", res) {
            return self.controller_stop();
        }
        Flow::Next
    }

    fn controller_stop(&self) -> Flow {
        if self.state() == State::Closed {
            Flow::Done
        } else {
            Flow::Drop(DropReason::Congestion, "controller drop")
        }
    }

    fn step_reset(&mut self, h: &Header, _now: Instant) -> Flow {
        if h.packet_type != PacketType::Reset {
            return Flow::Next;
        }
        tracing::debug!(code = ?h.reset_code, state = self.state().as_str(), "peer reset");
        self.set_peer_reset(h.reset_code);
        self.teardown_user();
        self.goto_timewait();
        Flow::Done
    }

    fn step_request_done(&mut self, _h: &Header, _now: Instant) -> Flow {
        if self.state() == State::Request {
            self.goto_partopen();
        }
        Flow::Next
    }

    fn step_respond(&mut self, h: &Header, now: Instant) -> Flow {
        if self.state() != State::Respond {
            return Flow::Next;
        }
        if h.packet_type == PacketType::Request {
            if h.service_code != self.socket.service_code() {
                return Flow::Drop(DropReason::ServiceCode, "service code changed");
            }
            let r = self.gen_response();
            self.inject(r);
            return Flow::Next;
        }
        if !h.packet_type.is_ack() {
            // The client's Ack may be lost; its Sync opens us just as well.
            self.tracer
                .event(self.state(), Some(h), "entering OPEN on non-ack packet");
        }
        self.goto_open(h.seq, now);
        Flow::Next
    }

    fn step_partopen(&mut self, h: &Header, now: Instant) -> Flow {
        if self.state() != State::PartOpen {
            return Flow::Next;
        }
        match h.packet_type {
            PacketType::Response => {
                let a = self.gen_ack();
                self.inject(a);
                let s = self.gen_sync(None);
                self.inject(s);
            }
            PacketType::Reset | PacketType::Sync => {}
            _ => self.goto_open(h.seq, now),
        }
        Flow::Next
    }

    fn step_close_req(&mut self, h: &Header, _now: Instant) -> Flow {
        if h.packet_type == PacketType::CloseReq && self.state() < State::CloseReq {
            let c = self.gen_close();
            self.inject(c);
            self.goto_closing();
        }
        Flow::Next
    }

    fn step_close(&mut self, h: &Header, _now: Instant) -> Flow {
        if h.packet_type != PacketType::Close {
            return Flow::Next;
        }
        self.teardown_user();
        self.goto_closed();
        let r = self.gen_reset(ResetCode::Closed);
        self.inject(r);
        Flow::Done
    }

    fn step_sync(&mut self, h: &Header, _now: Instant) -> Flow {
        if h.packet_type == PacketType::Sync {
            let r = self.gen_sync_ack(h);
            self.inject(r);
        }
        Flow::Next
    }

    fn step_data(&mut self, h: &Header, _now: Instant) -> Flow {
        if h.packet_type.is_data() {
            self.deliver(h.data.clone());
        }
        Flow::Done
    }
}

//! # Structured Trace Records
//!
//! One [`TraceRecord`] per significant connection event: packet read,
//! packet written, drop, idle tick, state change. Records serialize to a
//! stable JSON-lines shape for offline inspection and are mirrored into the
//! `tracing` event stream.
//!
//! The protocol state is always passed in by the caller; the tracer keeps
//! no view of the connection.

use std::io::Write;
use std::sync::{Arc, Mutex};

use quanta::Instant;
use serde::Serialize;

use crate::socket::State;
use crate::stats::DropReason;
use crate::wire::{Header, PacketType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceKind {
    Read,
    Write,
    Drop,
    Idle,
    State,
    /// Anything else worth a line: resends, controller complaints.
    Event,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TraceRecord {
    /// Microseconds since the connection was created.
    pub at_us: u64,
    /// Role label, e.g. `client` or `server`.
    pub label: String,
    pub kind: TraceKind,
    pub state: State,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub packet_type: Option<PacketType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seq: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ack: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<DropReason>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub note: String,
}

// ─── Sinks ──────────────────────────────────────────────────────────────────

pub trait TraceSink: Send + Sync {
    fn record(&self, rec: &TraceRecord);
}

/// Writes one JSON object per line.
pub struct JsonLinesSink<W: Write + Send> {
    out: Mutex<W>,
}

impl<W: Write + Send> JsonLinesSink<W> {
    pub fn new(out: W) -> Self {
        JsonLinesSink {
            out: Mutex::new(out),
        }
    }

    pub fn into_inner(self) -> W {
        self.out.into_inner().unwrap_or_else(|e| e.into_inner())
    }
}

impl<W: Write + Send> TraceSink for JsonLinesSink<W> {
    fn record(&self, rec: &TraceRecord) {
        let mut out = self.out.lock().unwrap_or_else(|e| e.into_inner());
        let res = serde_json::to_writer(&mut *out, rec)
            .map_err(std::io::Error::from)
            .and_then(|_| out.write_all(b"\n"));
        if let Err(e) = res {
            tracing::warn!(error = %e, "trace sink write failed");
        }
    }
}

/// Keeps every record in memory. For tests and the CLI summary.
#[derive(Default)]
pub struct MemorySink {
    records: Mutex<Vec<TraceRecord>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<TraceRecord> {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn count(&self, kind: TraceKind) -> usize {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|r| r.kind == kind)
            .count()
    }
}

impl TraceSink for MemorySink {
    fn record(&self, rec: &TraceRecord) {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(rec.clone());
    }
}

// ─── Tracer ─────────────────────────────────────────────────────────────────

/// Per-connection record builder.
#[derive(Clone)]
pub struct Tracer {
    label: String,
    epoch: Instant,
    sink: Option<Arc<dyn TraceSink>>,
}

impl std::fmt::Debug for Tracer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tracer")
            .field("label", &self.label)
            .field("sink", &self.sink.is_some())
            .finish()
    }
}

impl Tracer {
    pub fn new(label: impl Into<String>, sink: Option<Arc<dyn TraceSink>>) -> Self {
        Tracer {
            label: label.into(),
            epoch: Instant::now(),
            sink,
        }
    }

    fn base(&self, kind: TraceKind, state: State, h: Option<&Header>) -> TraceRecord {
        TraceRecord {
            at_us: Instant::now()
                .saturating_duration_since(self.epoch)
                .as_micros() as u64,
            label: self.label.clone(),
            kind,
            state,
            packet_type: h.map(|h| h.packet_type),
            seq: h.map(|h| h.seq),
            ack: h.and_then(|h| h.ack),
            reason: None,
            note: String::new(),
        }
    }

    fn emit(&self, rec: TraceRecord) {
        match rec.kind {
            TraceKind::Read | TraceKind::Write | TraceKind::Idle => tracing::trace!(
                label = %rec.label,
                kind = ?rec.kind,
                state = rec.state.as_str(),
                packet = ?rec.packet_type,
                seq = rec.seq,
                ack = rec.ack,
                "{}",
                rec.note
            ),
            _ => tracing::debug!(
                label = %rec.label,
                kind = ?rec.kind,
                state = rec.state.as_str(),
                packet = ?rec.packet_type,
                seq = rec.seq,
                reason = ?rec.reason,
                "{}",
                rec.note
            ),
        }
        if let Some(sink) = &self.sink {
            sink.record(&rec);
        }
    }

    pub fn read(&self, state: State, h: &Header) {
        self.emit(self.base(TraceKind::Read, state, Some(h)));
    }

    pub fn write(&self, state: State, h: &Header) {
        self.emit(self.base(TraceKind::Write, state, Some(h)));
    }

    pub fn dropped(&self, state: State, h: Option<&Header>, reason: DropReason, note: &str) {
        let mut rec = self.base(TraceKind::Drop, state, h);
        rec.reason = Some(reason);
        rec.note = note.to_string();
        self.emit(rec);
    }

    pub fn idle(&self, state: State) {
        self.emit(self.base(TraceKind::Idle, state, None));
    }

    pub fn state(&self, from: State, to: State) {
        let mut rec = self.base(TraceKind::State, to, None);
        rec.note = format!("{} -> {}", from.as_str(), to.as_str());
        self.emit(rec);
    }

    pub fn event(&self, state: State, h: Option<&Header>, note: impl Into<String>) {
        let mut rec = self.base(TraceKind::Event, state, h);
        rec.note = note.into();
        self.emit(rec);
    }
}

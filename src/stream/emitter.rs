//! Orchestration-side envelope emission.
//!
//! Emission is fire-and-forget: a sink that fails to deliver is logged and
//! ignored. The only error an emitter reports is a protocol violation, i.e.
//! emitting for an id that has already reached a terminal status.

use crate::errors::{ProtocolViolation, SinkError};
use crate::stream::envelope::{Classification, Envelope, Status};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use uuid::Uuid;

/// Destination for emitted envelopes.
pub trait EventSink: Send + Sync {
    fn deliver(&self, envelope: &Envelope) -> Result<(), SinkError>;
}

/// Discards everything.
pub struct NullSink;

impl EventSink for NullSink {
    fn deliver(&self, _envelope: &Envelope) -> Result<(), SinkError> {
        Ok(())
    }
}

/// Forwards envelopes into a bounded channel without ever waiting.
pub struct ChannelSink {
    tx: mpsc::Sender<Envelope>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<Envelope>) -> Self {
        Self { tx }
    }
}

impl EventSink for ChannelSink {
    fn deliver(&self, envelope: &Envelope) -> Result<(), SinkError> {
        self.tx.try_send(envelope.clone()).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SinkError::ChannelFull,
            mpsc::error::TrySendError::Closed(_) => SinkError::ChannelClosed,
        })
    }
}

/// Delivers to every inner sink; reports the first failure after trying all.
pub struct Tee {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl Tee {
    pub fn new(sinks: Vec<Arc<dyn EventSink>>) -> Self {
        Self { sinks }
    }
}

impl EventSink for Tee {
    fn deliver(&self, envelope: &Envelope) -> Result<(), SinkError> {
        let mut first_err = None;
        for sink in &self.sinks {
            if let Err(e) = sink.deliver(envelope)
                && first_err.is_none()
            {
                first_err = Some(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }
}

#[derive(Debug, Default)]
struct EmitState {
    next_seq: u64,
    terminal: bool,
}

/// Stamps envelopes with per-id sequence numbers and forwards them to a sink.
///
/// Cloning is cheap; clones share sequence state. `scoped` produces a clone
/// whose new events are parented under a given id.
#[derive(Clone)]
pub struct EventEmitter {
    sink: Arc<dyn EventSink>,
    states: Arc<Mutex<HashMap<String, EmitState>>>,
    parent: Option<String>,
}

impl EventEmitter {
    pub fn new(sink: Arc<dyn EventSink>) -> Self {
        Self {
            sink,
            states: Arc::new(Mutex::new(HashMap::new())),
            parent: None,
        }
    }

    /// An emitter that drops every envelope.
    pub fn null() -> Self {
        Self::new(Arc::new(NullSink))
    }

    /// Clone whose new events default to `parent_id` as their parent.
    pub fn scoped(&self, parent_id: impl Into<String>) -> Self {
        Self {
            sink: Arc::clone(&self.sink),
            states: Arc::clone(&self.states),
            parent: Some(parent_id.into()),
        }
    }

    /// Start a new logical event with a fresh id.
    pub fn open(&self, classification: Classification) -> EventHandle {
        EventHandle {
            emitter: self.clone(),
            id: Uuid::new_v4().to_string(),
            classification,
            parent_id: self.parent.clone(),
            tool_call_id: None,
        }
    }

    /// Emit one envelope, assigning its `seq`.
    pub fn emit(&self, mut envelope: Envelope) -> Result<(), ProtocolViolation> {
        {
            let mut states = self.states.lock().unwrap_or_else(|e| e.into_inner());
            let state = states.entry(envelope.id.clone()).or_default();
            if state.terminal {
                return Err(ProtocolViolation::EmitAfterTerminal {
                    id: envelope.id.clone(),
                });
            }
            envelope.seq = Some(state.next_seq);
            state.next_seq += 1;
            state.terminal = envelope.status.is_terminal();
        }

        tracing::trace!(
            id = %envelope.id,
            event_type = %envelope.classification,
            status = %envelope.status,
            seq = envelope.seq,
            "emit"
        );

        if let Err(e) = self.sink.deliver(&envelope) {
            tracing::debug!(id = %envelope.id, error = %e, "envelope delivery failed");
        }
        Ok(())
    }
}

/// One logical event owned by the component that emits it.
pub struct EventHandle {
    emitter: EventEmitter,
    id: String,
    classification: Classification,
    parent_id: Option<String>,
    tool_call_id: Option<String>,
}

impl EventHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn with_tool_call_id(mut self, tool_call_id: impl Into<String>) -> Self {
        self.tool_call_id = Some(tool_call_id.into());
        self
    }

    fn envelope(&self, status: Status) -> Envelope {
        let mut env = Envelope::new(self.id.clone(), self.classification, status);
        env.parent_id = self.parent_id.clone();
        env.tool_call_id = self.tool_call_id.clone();
        env
    }

    pub fn pending(&self, data: Value) -> Result<(), ProtocolViolation> {
        self.emitter.emit(self.envelope(Status::Pending).with_data(data))
    }

    pub fn running(&self, data: Value) -> Result<(), ProtocolViolation> {
        self.emitter.emit(self.envelope(Status::Running).with_data(data))
    }

    /// Stream an incremental text fragment.
    pub fn append(&self, fragment: impl Into<String>) -> Result<(), ProtocolViolation> {
        self.emitter
            .emit(self.envelope(Status::Running).with_fragment(fragment))
    }

    pub fn finish(&self, data: Value) -> Result<(), ProtocolViolation> {
        self.emitter.emit(self.envelope(Status::Finished).with_data(data))
    }

    pub fn fail(&self, message: impl Into<String>) -> Result<(), ProtocolViolation> {
        self.emitter
            .emit(self.envelope(Status::Error).with_data(Value::String(message.into())))
    }

    /// Emitter scoped so that events opened from it are children of this one.
    pub fn child_emitter(&self) -> EventEmitter {
        self.emitter.scoped(self.id.clone())
    }
}

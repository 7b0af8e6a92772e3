//! Typed error hierarchy for delve.
//!
//! Four enums cover the subsystems:
//! - `OrchestratorError`: fatal supervisor failures, including protocol violations
//! - `ResearchError`: a single delegate's own work failed, or it broke the
//!   emission protocol (the latter is escalated to `ProtocolViolation`)
//! - `StreamError`: envelope decoding and journal IO
//! - `SinkError`: envelope delivery failures (always swallowed by the emitter)

use thiserror::Error;

/// A broken correlation contract between the decision step and the ledger.
///
/// These are never recoverable: the decision step expects exactly one
/// response per dispatched action and later logic cannot reason about a
/// round that violated that.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolViolation {
    #[error("Task {id} was dispatched more than once")]
    DuplicateDispatch { id: String },

    #[error("Task {id} already has a ledger entry")]
    DuplicateResponse { id: String },

    #[error("Task {id} was dispatched but never received a ledger entry")]
    MissingResponse { id: String },

    #[error("Ledger entry recorded for task {id} which was never dispatched")]
    UnknownTask { id: String },

    #[error("Envelope {id} emitted after reaching terminal state")]
    EmitAfterTerminal { id: String },
}

/// Errors from the supervisor loop.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("Protocol violation in round {round}: {violation}")]
    Protocol {
        round: u32,
        #[source]
        violation: ProtocolViolation,
    },

    #[error("Decision step failed in round {round}: {source}")]
    DecisionFailed {
        round: u32,
        #[source]
        source: anyhow::Error,
    },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl OrchestratorError {
    /// Whether this error is a fatal correlation-contract break.
    pub fn is_protocol_violation(&self) -> bool {
        matches!(self, Self::Protocol { .. })
    }
}

/// Failure of one delegate's own research.
#[derive(Debug, Clone, Error)]
pub enum ResearchError {
    #[error("Research on '{topic}' failed: {message}")]
    Failed { topic: String, message: String },

    #[error("Research task panicked: {0}")]
    Panicked(String),

    #[error("Research task was aborted before completion")]
    Aborted,

    #[error(transparent)]
    Protocol(#[from] ProtocolViolation),
}

impl ResearchError {
    /// The violation carried by this error, if the delegate broke the protocol.
    pub fn protocol_violation(&self) -> Option<&ProtocolViolation> {
        match self {
            Self::Protocol(violation) => Some(violation),
            _ => None,
        }
    }

    pub fn failed(topic: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Failed {
            topic: topic.into(),
            message: message.into(),
        }
    }
}

/// Errors decoding or persisting envelopes.
#[derive(Debug, Error)]
pub enum StreamError {
    #[error("Malformed envelope on line {line}: {source}")]
    Decode {
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to encode envelope {id}: {source}")]
    Encode {
        id: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Journal IO error at {path}: {source}")]
    Journal {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Envelope delivery failure.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("Event channel closed")]
    ChannelClosed,

    #[error("Event channel full")]
    ChannelFull,

    #[error(transparent)]
    Stream(#[from] StreamError),
}

//! Progress streaming: envelopes on the wire and their reconstruction.
//!
//! The orchestration side emits [`Envelope`]s through an [`EventEmitter`];
//! observers rebuild an [`ExecutionView`] with a [`StreamReconstructor`],
//! optionally batched by a [`BatchingScheduler`].

pub mod emitter;
pub mod envelope;
pub mod journal;
pub mod reconstructor;
pub mod render;
pub mod scheduler;
pub mod tree;

pub use emitter::{ChannelSink, EventEmitter, EventHandle, EventSink, NullSink, Tee};
pub use envelope::{Classification, Content, Envelope, MergeRule, Role, Status, Subtype};
pub use journal::{EventJournal, JournalRecord};
pub use reconstructor::{
    Disposition, ExecutionView, Ingest, MaterializedEvent, ReconstructorConfig, StreamReconstructor,
};
pub use scheduler::BatchingScheduler;
pub use tree::{ExecutionTree, Node, NodeKind, NodeRegistry};

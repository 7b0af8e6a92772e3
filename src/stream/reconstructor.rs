//! Client-side reconstruction of an execution from its envelope stream.
//!
//! The stream is unordered and at-least-once. Per id the reconstructor runs
//! `unseen → pending → running → {finished | error}`:
//!
//! - terminal states absorb everything after them;
//! - envelopes carrying `seq` are applied in `seq` order, buffering early
//!   arrivals and dropping repeats, so `concat` fragments join in emission
//!   order regardless of network order;
//! - envelopes without `seq` are applied in arrival order. Nothing
//!   distinguishes a redelivered seq-less envelope from a new one, so a
//!   duplicated seq-less `concat` fragment is appended twice; idempotent
//!   replay holds only for envelopes that carry `seq`, which every
//!   [`EventHandle`](crate::stream::EventHandle) emission does;
//! - a new id whose tool-call id matches a live (non-terminal) node evicts
//!   that node.
//!
//! Ingestion ([`StreamReconstructor::ingest`]) and committing into the
//! observed [`ExecutionView`] ([`StreamReconstructor::commit`]) are separate
//! steps so that a batching layer can coalesce commits while merging still
//! happens at ingestion time.

use crate::stream::envelope::{Classification, Envelope, MergeRule, Status};
use crate::stream::tree::{ExecutionTree, NodeRegistry};
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};

/// Default number of out-of-order envelopes buffered per id before a gap is skipped.
pub const DEFAULT_REORDER_WINDOW: usize = 64;

/// Current merged state of one logical event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MaterializedEvent {
    pub id: String,
    pub classification: Classification,
    pub status: Status,
    pub parent_id: Option<String>,
    pub data: Value,
    pub tool_call_id: Option<String>,
}

impl MaterializedEvent {
    fn from_envelope(env: &Envelope) -> Self {
        Self {
            id: env.id.clone(),
            classification: env.classification,
            status: env.status,
            parent_id: env.parent_id.clone(),
            data: env.content.data.clone(),
            tool_call_id: env.tool_call_id.clone(),
        }
    }

    /// Fold a later envelope for the same id into this state.
    fn merge(&mut self, env: &Envelope) {
        self.status = env.status;
        if self.parent_id.is_none() {
            self.parent_id = env.parent_id.clone();
        }
        if self.tool_call_id.is_none() {
            self.tool_call_id = env.tool_call_id.clone();
        }

        match (env.content.merge, &mut self.data, &env.content.data) {
            (MergeRule::Concat, Value::String(existing), Value::String(fragment)) => {
                existing.push_str(fragment);
            }
            (MergeRule::Concat, Value::Null, Value::String(fragment)) => {
                self.data = Value::String(fragment.clone());
            }
            // Status-only updates keep whatever has been accumulated.
            (_, _, Value::Null) => {}
            (merge, _, data) => {
                if merge == MergeRule::Concat {
                    tracing::debug!(id = %env.id, "concat with non-string data, replacing");
                }
                self.data = data.clone();
            }
        }
    }
}

/// What happened to one ingested envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// The envelope (and possibly buffered successors) changed state.
    Applied,
    /// Arrived ahead of a missing predecessor; held until it shows up.
    Buffered,
    /// Already seen this `seq`.
    Duplicate,
    /// The id is already terminal.
    IgnoredTerminal,
    /// The id was evicted by a newer envelope for the same tool call.
    Superseded,
}

/// Result of ingesting one envelope.
#[derive(Debug, Clone)]
pub struct Ingest {
    pub disposition: Disposition,
    /// New state of the envelope's id, when it changed.
    pub update: Option<MaterializedEvent>,
    /// Ids evicted as a consequence of this envelope.
    pub evicted: Vec<String>,
}

impl Ingest {
    fn unchanged(disposition: Disposition) -> Self {
        Self {
            disposition,
            update: None,
            evicted: Vec::new(),
        }
    }
}

#[derive(Debug, Default)]
struct Track {
    event: Option<MaterializedEvent>,
    next_seq: u64,
    buffer: BTreeMap<u64, Envelope>,
}

impl Track {
    fn is_terminal(&self) -> bool {
        self.event.as_ref().is_some_and(|e| e.status.is_terminal())
    }

    /// Apply one in-order envelope. Returns whether state changed.
    fn apply(&mut self, env: &Envelope) -> bool {
        match &mut self.event {
            None => {
                self.event = Some(MaterializedEvent::from_envelope(env));
                true
            }
            Some(current) => match current.status.advance(env.status) {
                None => false,
                Some(next) => {
                    current.merge(env);
                    current.status = next;
                    true
                }
            },
        }
    }

    /// Apply contiguous buffered envelopes. Returns whether state changed.
    fn drain(&mut self) -> bool {
        let mut changed = false;
        while let Some(env) = self.buffer.remove(&self.next_seq) {
            self.next_seq += 1;
            changed |= self.apply(&env);
        }
        changed
    }

    /// Skip over any gap and apply everything buffered.
    fn release(&mut self) -> bool {
        let mut changed = false;
        while let Some((&seq, _)) = self.buffer.iter().next() {
            if seq != self.next_seq {
                tracing::warn!(
                    missing_from = self.next_seq,
                    resume_at = seq,
                    "skipping sequence gap"
                );
                self.next_seq = seq;
            }
            changed |= self.drain();
        }
        changed
    }
}

/// The externally observed, committed view of an execution.
#[derive(Debug, Clone)]
pub struct ExecutionView {
    /// Events in first-commit order.
    events: Vec<MaterializedEvent>,
    /// id → position in `events`.
    index: HashMap<String, usize>,
    pub tree: ExecutionTree,
    pub completed: bool,
}

impl ExecutionView {
    pub fn new(registry: NodeRegistry) -> Self {
        Self {
            events: Vec::new(),
            index: HashMap::new(),
            tree: ExecutionTree::new(registry),
            completed: false,
        }
    }

    pub fn events(&self) -> &[MaterializedEvent] {
        &self.events
    }

    pub fn event(&self, id: &str) -> Option<&MaterializedEvent> {
        self.index.get(id).map(|&i| &self.events[i])
    }

    fn upsert(&mut self, event: &MaterializedEvent) {
        match self.index.get(&event.id) {
            Some(&i) => self.events[i] = event.clone(),
            None => {
                self.index.insert(event.id.clone(), self.events.len());
                self.events.push(event.clone());
            }
        }
        self.tree.upsert(event);
    }

    fn evict(&mut self, id: &str) {
        if let Some(i) = self.index.remove(id) {
            self.events.remove(i);
            for slot in self.index.values_mut() {
                if *slot > i {
                    *slot -= 1;
                }
            }
        }
        self.tree.remove(id);
    }
}

#[derive(Debug, Clone)]
pub struct ReconstructorConfig {
    pub reorder_window: usize,
    pub registry: NodeRegistry,
}

impl Default for ReconstructorConfig {
    fn default() -> Self {
        Self {
            reorder_window: DEFAULT_REORDER_WINDOW,
            registry: NodeRegistry::default(),
        }
    }
}

pub struct StreamReconstructor {
    reorder_window: usize,
    tracks: HashMap<String, Track>,
    /// Tool-call id → envelope id currently holding it.
    tool_calls: HashMap<String, String>,
    evicted: HashSet<String>,
    view: ExecutionView,
}

impl StreamReconstructor {
    pub fn new(config: ReconstructorConfig) -> Self {
        Self {
            reorder_window: config.reorder_window.max(1),
            tracks: HashMap::new(),
            tool_calls: HashMap::new(),
            evicted: HashSet::new(),
            view: ExecutionView::new(config.registry),
        }
    }

    pub fn view(&self) -> &ExecutionView {
        &self.view
    }

    pub fn view_mut(&mut self) -> &mut ExecutionView {
        &mut self.view
    }

    /// Ingest and immediately commit.
    pub fn apply(&mut self, envelope: Envelope) -> Disposition {
        let ingest = self.ingest(envelope);
        self.commit(&ingest);
        ingest.disposition
    }

    /// Merge an envelope into per-id state without touching the view.
    pub fn ingest(&mut self, envelope: Envelope) -> Ingest {
        if self.evicted.contains(&envelope.id) {
            return Ingest::unchanged(Disposition::Superseded);
        }

        let evicted = if self.tracks.contains_key(&envelope.id) {
            Vec::new()
        } else {
            self.evict_superseded(&envelope)
        };

        let window = self.reorder_window;
        let track = self.tracks.entry(envelope.id.clone()).or_default();

        let disposition = if track.is_terminal() {
            Disposition::IgnoredTerminal
        } else {
            match envelope.seq {
                None => {
                    if track.apply(&envelope) {
                        Disposition::Applied
                    } else {
                        Disposition::IgnoredTerminal
                    }
                }
                Some(seq) if seq < track.next_seq || track.buffer.contains_key(&seq) => {
                    Disposition::Duplicate
                }
                Some(seq) => {
                    track.buffer.insert(seq, envelope.clone());
                    let mut changed = track.drain();
                    if track.buffer.len() > window {
                        changed |= track.release();
                    }
                    if changed {
                        Disposition::Applied
                    } else if track.buffer.is_empty() {
                        Disposition::IgnoredTerminal
                    } else {
                        Disposition::Buffered
                    }
                }
            }
        };

        let update = match disposition {
            Disposition::Applied => track.event.clone(),
            _ => None,
        };

        if let Some(event) = &update
            && let Some(key) = &event.tool_call_id
        {
            self.tool_calls.insert(key.clone(), event.id.clone());
        }

        tracing::trace!(id = %envelope.id, ?disposition, "ingest");
        Ingest {
            disposition,
            update,
            evicted,
        }
    }

    /// Apply an ingest result to the observed view.
    pub fn commit(&mut self, ingest: &Ingest) {
        for id in &ingest.evicted {
            self.view.evict(id);
        }
        if let Some(event) = &ingest.update {
            self.view.upsert(event);
        }
    }

    /// Apply every buffered envelope, skipping unfilled gaps.
    ///
    /// Used when the stream has ended and missing predecessors will never
    /// arrive. Returns the resulting states.
    pub fn release_buffered(&mut self) -> Vec<MaterializedEvent> {
        let mut released = Vec::new();
        for track in self.tracks.values_mut() {
            if !track.buffer.is_empty() && track.release() {
                if let Some(event) = &track.event {
                    released.push(event.clone());
                }
            }
        }
        released.sort_by(|a, b| a.id.cmp(&b.id));
        released
    }

    /// Current merged state of an id, committed or not.
    pub fn state(&self, id: &str) -> Option<&MaterializedEvent> {
        self.tracks.get(id).and_then(|t| t.event.as_ref())
    }

    fn evict_superseded(&mut self, envelope: &Envelope) -> Vec<String> {
        let Some(key) = &envelope.tool_call_id else {
            return Vec::new();
        };
        let Some(holder) = self.tool_calls.get(key).cloned() else {
            return Vec::new();
        };
        if holder == envelope.id {
            return Vec::new();
        }
        let live = self
            .tracks
            .get(&holder)
            .is_some_and(|t| t.event.is_some() && !t.is_terminal());
        if !live {
            return Vec::new();
        }

        tracing::debug!(evicted = %holder, by = %envelope.id, tool_call = %key, "superseded tool call");
        self.tracks.remove(&holder);
        self.tool_calls.remove(key);
        self.evicted.insert(holder.clone());
        vec![holder]
    }
}

impl Default for StreamReconstructor {
    fn default() -> Self {
        Self::new(ReconstructorConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn env(id: &str, status: Status) -> Envelope {
        Envelope::new(id, Classification::SUPERVISOR_GROUP, status)
    }

    fn data(r: &StreamReconstructor, id: &str) -> Value {
        r.view().event(id).unwrap().data.clone()
    }

    #[test]
    fn test_concat_in_order() {
        let mut r = StreamReconstructor::default();
        r.apply(env("X", Status::Running).with_fragment("Hel"));
        r.apply(env("X", Status::Running).with_fragment("lo"));
        r.apply(env("X", Status::Finished).with_fragment("!"));

        assert_eq!(data(&r, "X"), json!("Hello!"));
        assert_eq!(r.view().event("X").unwrap().status, Status::Finished);
    }

    #[test]
    fn test_concat_reordered_by_seq() {
        let mut r = StreamReconstructor::default();
        assert_eq!(
            r.apply(env("X", Status::Running).with_fragment("lo").with_seq(1)),
            Disposition::Buffered
        );
        assert!(r.view().event("X").is_none());
        r.apply(env("X", Status::Finished).with_fragment("!").with_seq(2));
        assert_eq!(
            r.apply(env("X", Status::Running).with_fragment("Hel").with_seq(0)),
            Disposition::Applied
        );

        assert_eq!(data(&r, "X"), json!("Hello!"));
        assert_eq!(r.view().event("X").unwrap().status, Status::Finished);
    }

    #[test]
    fn test_duplicate_envelope_is_idempotent() {
        let e = env("X", Status::Running).with_fragment("abc").with_seq(0);
        let mut once = StreamReconstructor::default();
        once.apply(e.clone());

        let mut twice = StreamReconstructor::default();
        twice.apply(e.clone());
        assert_eq!(twice.apply(e), Disposition::Duplicate);

        assert_eq!(once.view().events(), twice.view().events());
    }

    #[test]
    fn test_seqless_concat_is_applied_per_arrival() {
        let fragment = env("X", Status::Running).with_fragment("Hel");
        let mut r = StreamReconstructor::default();
        assert_eq!(r.apply(fragment.clone()), Disposition::Applied);
        assert_eq!(r.apply(fragment), Disposition::Applied);
        assert_eq!(data(&r, "X"), json!("HelHel"));

        // The same fragment stamped with a seq is applied once.
        let stamped = env("Y", Status::Running).with_fragment("Hel").with_seq(0);
        r.apply(stamped.clone());
        assert_eq!(r.apply(stamped), Disposition::Duplicate);
        assert_eq!(data(&r, "Y"), json!("Hel"));
    }

    #[test]
    fn test_lookup_survives_eviction() {
        let mut r = StreamReconstructor::default();
        let call = |id: &str| {
            Envelope::new(id, Classification::RESEARCHER_TOOL_CALL, Status::Running)
                .with_tool_call_id(format!("key-{id}"))
        };
        for id in ["a", "b", "c"] {
            r.apply(call(id));
        }
        r.apply(
            Envelope::new("b2", Classification::RESEARCHER_TOOL_CALL, Status::Running)
                .with_tool_call_id("key-b"),
        );

        let ids: Vec<_> = r.view().events().iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c", "b2"]);
        for id in ["a", "c", "b2"] {
            assert_eq!(r.view().event(id).unwrap().id, id);
        }
        assert!(r.view().event("b").is_none());
    }

    #[test]
    fn test_terminal_absorbs_later_envelopes() {
        let mut r = StreamReconstructor::default();
        r.apply(env("X", Status::Finished).with_data(json!("final")));
        assert_eq!(
            r.apply(env("X", Status::Running).with_data(json!("late"))),
            Disposition::IgnoredTerminal
        );
        let event = r.view().event("X").unwrap();
        assert_eq!(event.status, Status::Finished);
        assert_eq!(event.data, json!("final"));
    }

    #[test]
    fn test_status_only_update_keeps_data() {
        let mut r = StreamReconstructor::default();
        r.apply(env("X", Status::Running).with_fragment("partial"));
        r.apply(env("X", Status::Finished));
        assert_eq!(data(&r, "X"), json!("partial"));
    }

    #[test]
    fn test_superseded_tool_call_is_evicted() {
        let mut r = StreamReconstructor::default();
        let call = |id: &str| {
            Envelope::new(id, Classification::RESEARCHER_TOOL_CALL, Status::Running)
                .with_tool_call_id("call_1")
        };
        r.apply(call("first"));
        r.apply(call("second"));

        assert!(r.view().event("first").is_none());
        assert!(r.view().tree.get("first").is_none());
        assert!(r.view().event("second").is_some());

        // Late traffic for the evicted id cannot resurrect it.
        assert_eq!(r.apply(call("first")), Disposition::Superseded);
        assert!(r.view().event("first").is_none());
    }

    #[test]
    fn test_terminal_tool_call_is_not_evicted() {
        let mut r = StreamReconstructor::default();
        let call = |id: &str, status| {
            Envelope::new(id, Classification::RESEARCHER_TOOL_CALL, status).with_tool_call_id("call_1")
        };
        r.apply(call("first", Status::Finished));
        r.apply(call("second", Status::Running));
        assert!(r.view().event("first").is_some());
        assert!(r.view().event("second").is_some());
    }

    #[test]
    fn test_gap_is_skipped_beyond_window() {
        let mut r = StreamReconstructor::new(ReconstructorConfig {
            reorder_window: 2,
            ..Default::default()
        });
        // seq 0 never arrives
        r.apply(env("X", Status::Running).with_fragment("a").with_seq(1));
        r.apply(env("X", Status::Running).with_fragment("b").with_seq(2));
        assert!(r.view().event("X").is_none());
        r.apply(env("X", Status::Running).with_fragment("c").with_seq(3));
        assert_eq!(data(&r, "X"), json!("abc"));
    }

    #[test]
    fn test_release_buffered_applies_pending_fragments() {
        let mut r = StreamReconstructor::default();
        let ingest = r.ingest(env("X", Status::Running).with_fragment("tail").with_seq(4));
        assert_eq!(ingest.disposition, Disposition::Buffered);
        let released = r.release_buffered();
        assert_eq!(released.len(), 1);
        assert_eq!(released[0].data, json!("tail"));
    }

    #[test]
    fn test_ingest_does_not_touch_view_until_commit() {
        let mut r = StreamReconstructor::default();
        let ingest = r.ingest(env("X", Status::Pending));
        assert!(r.view().events().is_empty());
        assert!(r.state("X").is_some());
        r.commit(&ingest);
        assert_eq!(r.view().events().len(), 1);
    }

    #[test]
    fn test_unknown_classification_lands_in_list_not_tree() {
        let mut r = StreamReconstructor::default();
        let raw = r#"{"id":"u","eventType":"/mystery/thing","status":"running"}"#;
        r.apply(Envelope::from_json_line(raw, 1).unwrap());
        assert!(r.view().event("u").is_some());
        assert!(r.view().tree.get("u").is_none());
    }
}

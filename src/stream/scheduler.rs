//! Coalesces bursts of envelopes into periodic commits of the observed view.
//!
//! Envelopes are merged into per-id state as soon as they arrive; only the
//! commit into the [`ExecutionView`] is deferred to the next tick. Within a
//! tick only the latest state per id is committed, in the order the ids were
//! first touched. The scheduler is the only writer of the published view and
//! takes `&mut self` for every mutation, so at most one flush is ever in
//! flight.

use crate::stream::envelope::Envelope;
use crate::stream::reconstructor::{
    Disposition, ExecutionView, Ingest, MaterializedEvent, ReconstructorConfig,
    StreamReconstructor,
};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::{mpsc, watch};

/// Default redraw tick, roughly one animation frame.
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_millis(16);

#[derive(Debug, Clone)]
enum PendingChange {
    Upsert(MaterializedEvent),
    Evict,
}

pub struct BatchingScheduler {
    reconstructor: StreamReconstructor,
    order: Vec<String>,
    pending: HashMap<String, PendingChange>,
    view_tx: watch::Sender<ExecutionView>,
    flushes: u64,
}

impl BatchingScheduler {
    pub fn new(config: ReconstructorConfig) -> Self {
        let reconstructor = StreamReconstructor::new(config);
        let (view_tx, _) = watch::channel(reconstructor.view().clone());
        Self {
            reconstructor,
            order: Vec::new(),
            pending: HashMap::new(),
            view_tx,
            flushes: 0,
        }
    }

    /// Observe committed views. Each flush publishes a new snapshot.
    pub fn subscribe(&self) -> watch::Receiver<ExecutionView> {
        self.view_tx.subscribe()
    }

    pub fn view(&self) -> &ExecutionView {
        self.reconstructor.view()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn flush_count(&self) -> u64 {
        self.flushes
    }

    pub fn is_completed(&self) -> bool {
        self.reconstructor.view().completed
    }

    /// Ingest one envelope and queue its effect for the next flush.
    ///
    /// After completion there are no more ticks, so late envelopes are
    /// committed immediately.
    pub fn upsert(&mut self, envelope: Envelope) -> Disposition {
        let ingest = self.reconstructor.ingest(envelope);
        for id in &ingest.evicted {
            self.queue(id.clone(), PendingChange::Evict);
        }
        if let Some(event) = ingest.update {
            self.queue(event.id.clone(), PendingChange::Upsert(event));
        }
        if self.is_completed() {
            self.flush();
        }
        ingest.disposition
    }

    fn queue(&mut self, id: String, change: PendingChange) {
        if self.pending.insert(id.clone(), change).is_none() {
            self.order.push(id);
        }
    }

    /// Commit everything queued. Returns the number of ids committed.
    pub fn flush(&mut self) -> usize {
        if self.pending.is_empty() {
            return 0;
        }

        let mut committed = 0;
        for id in std::mem::take(&mut self.order) {
            let Some(change) = self.pending.remove(&id) else {
                continue;
            };
            let ingest = match change {
                PendingChange::Upsert(event) => Ingest {
                    disposition: Disposition::Applied,
                    update: Some(event),
                    evicted: Vec::new(),
                },
                PendingChange::Evict => Ingest {
                    disposition: Disposition::Superseded,
                    update: None,
                    evicted: vec![id],
                },
            };
            self.reconstructor.commit(&ingest);
            committed += 1;
        }

        self.flushes += 1;
        self.publish();
        tracing::trace!(committed, flush = self.flushes, "flushed view");
        committed
    }

    /// Force out everything still held back and mark the view completed.
    ///
    /// Buffered out-of-order envelopes are released (their gaps will never
    /// fill now) and committed before this returns.
    pub fn mark_completed(&mut self) {
        for event in self.reconstructor.release_buffered() {
            self.queue(event.id.clone(), PendingChange::Upsert(event));
        }
        self.flush();
        self.reconstructor.view_mut().completed = true;
        self.publish();
    }

    fn publish(&self) {
        self.view_tx.send_replace(self.reconstructor.view().clone());
    }

    /// Consume envelopes from `rx`, flushing once per `interval`, until the
    /// channel closes. Returns the final view.
    pub async fn run(mut self, mut rx: mpsc::Receiver<Envelope>, interval: Duration) -> ExecutionView {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                received = rx.recv() => match received {
                    Some(envelope) => {
                        self.upsert(envelope);
                    }
                    None => break,
                },
                _ = ticker.tick() => {
                    self.flush();
                }
            }
        }

        self.mark_completed();
        self.reconstructor.view().clone()
    }
}

impl Default for BatchingScheduler {
    fn default() -> Self {
        Self::new(ReconstructorConfig::default())
    }
}

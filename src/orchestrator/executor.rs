//! Fan-out/fan-in execution of delegated research.
//!
//! Each delegation runs on its own tokio task with nothing but its own topic
//! and a scoped emitter. The executor waits for every task, converts errors
//! and panics into failure outcomes, and returns results in dispatch order
//! regardless of completion order. A delegate that broke the emission
//! protocol fails the whole fan-in once every sibling has joined.

use crate::errors::{ProtocolViolation, ResearchError};
use crate::orchestrator::task::{DELEGATE_FAILURE_PREFIX, Outcome, Task};
use crate::stream::{Classification, EventEmitter, EventHandle};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Semaphore, mpsc};
use tokio::task::{JoinError, JoinHandle};

/// Input handed to one research sub-execution.
pub struct ResearchRequest {
    /// Correlation id of the delegating action.
    pub task_id: String,
    pub topic: String,
    /// Emitter whose events are parented under this delegation's group.
    pub emitter: EventEmitter,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResearchFindings {
    /// Condensed result returned to the decision step.
    pub compressed: String,
    /// Supporting notes kept for the final report.
    #[serde(default)]
    pub raw_notes: Vec<String>,
}

impl ResearchFindings {
    /// Raw notes joined into a single note, or `None` when there is nothing.
    pub fn joined_notes(&self) -> Option<String> {
        let joined = self.raw_notes.join("\n");
        (!joined.is_empty()).then_some(joined)
    }
}

/// The isolated worker that researches one topic.
#[async_trait]
pub trait Researcher: Send + Sync {
    async fn research(&self, request: ResearchRequest) -> Result<ResearchFindings, ResearchError>;
}

/// Terminal result of one delegation.
#[derive(Debug, Clone)]
pub struct DelegateResult {
    pub task_id: String,
    pub topic: String,
    pub result: Result<ResearchFindings, ResearchError>,
    pub duration: Duration,
}

impl DelegateResult {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }

    /// Ledger outcome for this result.
    pub fn outcome(&self) -> Outcome {
        match &self.result {
            Ok(findings) => Outcome::success(findings.compressed.clone()),
            Err(e) => Outcome::failure(format!("{DELEGATE_FAILURE_PREFIX}: {e}")),
        }
    }
}

pub struct FanOutExecutor {
    researcher: Arc<dyn Researcher>,
    /// Concurrent delegations allowed; 0 means unbounded.
    max_parallel: usize,
}

impl FanOutExecutor {
    pub fn new(researcher: Arc<dyn Researcher>) -> Self {
        Self {
            researcher,
            max_parallel: 0,
        }
    }

    pub fn with_max_parallel(mut self, max_parallel: usize) -> Self {
        self.max_parallel = max_parallel;
        self
    }

    /// Run every delegation to completion.
    ///
    /// `emitter` should be scoped to the supervisor group; one
    /// `/researcher/group` event is opened per task under it.
    pub async fn execute(
        &self,
        tasks: &[Task],
        emitter: &EventEmitter,
    ) -> Result<Vec<DelegateResult>, ProtocolViolation> {
        if tasks.is_empty() {
            return Ok(Vec::new());
        }

        let semaphore = (self.max_parallel > 0).then(|| Arc::new(Semaphore::new(self.max_parallel)));
        let (result_tx, mut result_rx) =
            mpsc::channel::<(usize, Result<ResearchFindings, ResearchError>, Duration)>(tasks.len());

        let mut groups: Vec<EventHandle> = Vec::with_capacity(tasks.len());
        let mut handles: Vec<JoinHandle<()>> = Vec::with_capacity(tasks.len());

        for (index, task) in tasks.iter().enumerate() {
            let group = emitter.open(Classification::RESEARCHER_GROUP);
            group.pending(json!({ "task_id": task.id, "topic": task.payload }))?;

            let request = ResearchRequest {
                task_id: task.id.clone(),
                topic: task.payload.clone(),
                emitter: group.child_emitter(),
            };
            let researcher = Arc::clone(&self.researcher);
            let semaphore = semaphore.clone();
            let result_tx = result_tx.clone();

            tracing::debug!(task_id = %task.id, topic = %task.payload, "dispatching delegate");
            group.running(json!({ "task_id": task.id, "topic": task.payload }))?;
            groups.push(group);

            handles.push(tokio::spawn(async move {
                let _permit = match semaphore {
                    Some(s) => match s.acquire_owned().await {
                        Ok(permit) => Some(permit),
                        Err(_) => {
                            result_tx
                                .send((index, Err(ResearchError::Aborted), Duration::ZERO))
                                .await
                                .ok();
                            return;
                        }
                    },
                    None => None,
                };

                let started = Instant::now();
                let result = researcher.research(request).await;
                result_tx.send((index, result, started.elapsed())).await.ok();
            }));
        }
        drop(result_tx);

        let mut slots: Vec<Option<(Result<ResearchFindings, ResearchError>, Duration)>> =
            tasks.iter().map(|_| None).collect();

        // Completion order; terminal group events go out as results arrive.
        while let Some((index, result, duration)) = result_rx.recv().await {
            close_group(&groups[index], &tasks[index], &result)?;
            slots[index] = Some((result, duration));
        }

        // Tasks that never reported either panicked or were cancelled.
        for (index, handle) in handles.into_iter().enumerate() {
            let outcome = handle.await;
            if slots[index].is_none() {
                let err = match outcome {
                    Err(join_err) => research_error_from_join(join_err),
                    Ok(()) => ResearchError::Aborted,
                };
                let result = Err(err);
                close_group(&groups[index], &tasks[index], &result)?;
                slots[index] = Some((result, Duration::ZERO));
            }
        }

        let results: Vec<DelegateResult> = tasks
            .iter()
            .zip(slots)
            .map(|(task, slot)| {
                let (result, duration) =
                    slot.unwrap_or((Err(ResearchError::Aborted), Duration::ZERO));
                DelegateResult {
                    task_id: task.id.clone(),
                    topic: task.payload.clone(),
                    result,
                    duration,
                }
            })
            .collect();

        if let Some(violation) = results
            .iter()
            .find_map(|r| r.result.as_ref().err().and_then(ResearchError::protocol_violation))
        {
            tracing::error!(error = %violation, "delegate broke the emission protocol");
            return Err(violation.clone());
        }

        let failed = results.iter().filter(|r| !r.is_success()).count();
        tracing::info!(
            delegates = results.len(),
            failed,
            "fan-in complete"
        );
        Ok(results)
    }
}

fn close_group(
    group: &EventHandle,
    task: &Task,
    result: &Result<ResearchFindings, ResearchError>,
) -> Result<(), ProtocolViolation> {
    match result {
        Ok(findings) => {
            tracing::debug!(task_id = %task.id, "delegate finished");
            group.finish(json!(findings.compressed))
        }
        Err(e) => {
            tracing::warn!(task_id = %task.id, error = %e, "delegate failed");
            group.fail(e.to_string())
        }
    }
}

fn research_error_from_join(err: JoinError) -> ResearchError {
    if !err.is_panic() {
        return ResearchError::Aborted;
    }
    let payload = err.into_panic();
    let message = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    ResearchError::Panicked(message)
}

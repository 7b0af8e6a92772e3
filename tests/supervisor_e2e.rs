//! End-to-end supervisor runs through the library API: a scripted decision
//! source, a delaying researcher, the journal and the batching scheduler.

use async_trait::async_trait;
use delve::errors::ResearchError;
use delve::orchestrator::{
    Action, DecisionSource, ResearchFindings, ResearchRequest, Researcher, Supervisor,
    SupervisorConfig, SupervisorState, TaskKind, Termination,
};
use delve::stream::{
    BatchingScheduler, ChannelSink, Classification, EventEmitter, EventJournal, EventSink,
    NodeKind, ReconstructorConfig, Status, StreamReconstructor, Tee,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::mpsc;

struct Rounds(Vec<Vec<Action>>);

#[async_trait]
impl DecisionSource for Rounds {
    async fn decide(&self, state: &SupervisorState) -> anyhow::Result<Vec<Action>> {
        Ok(self
            .0
            .get(state.completed_rounds())
            .cloned()
            .unwrap_or_default())
    }
}

/// Answers after a per-topic delay so completion order differs from dispatch order.
struct Delayed(HashMap<String, u64>);

#[async_trait]
impl Researcher for Delayed {
    async fn research(&self, request: ResearchRequest) -> Result<ResearchFindings, ResearchError> {
        let delay = self.0.get(&request.topic).copied().unwrap_or(0);
        let call = request
            .emitter
            .open(Classification::RESEARCHER_TOOL_CALL)
            .with_tool_call_id(format!("{}-search", request.task_id));
        call.pending(serde_json::json!({ "name": "web_search" }))?;
        tokio::time::sleep(Duration::from_millis(delay)).await;
        call.append(format!("{} ", request.topic))?;
        call.append("done")?;
        call.finish(serde_json::Value::Null)?;
        Ok(ResearchFindings {
            compressed: format!("{} summary", request.topic),
            raw_notes: vec![format!("{} raw", request.topic)],
        })
    }
}

fn three_way() -> (Rounds, Delayed) {
    let rounds = Rounds(vec![vec![
        Action::delegate("call_x", "X"),
        Action::delegate("call_y", "Y"),
        Action::delegate("call_z", "Z"),
    ]]);
    let delays = Delayed(HashMap::from([
        ("X".to_string(), 40),
        ("Y".to_string(), 5),
        ("Z".to_string(), 20),
    ]));
    (rounds, delays)
}

#[tokio::test]
async fn test_three_delegations_in_dispatch_order() {
    let (rounds, researcher) = three_way();
    let supervisor = Supervisor::new(
        SupervisorConfig::default(),
        Arc::new(rounds),
        Arc::new(researcher),
    );

    let summary = supervisor.run("Compare X vs Y vs Z").await.unwrap();

    assert_eq!(summary.termination, Termination::NoFurtherAction);
    assert_eq!(summary.delegate_actions(), 3);
    assert_eq!(
        summary.notes,
        vec!["X summary", "Y summary", "Z summary"]
    );
    assert_eq!(summary.raw_notes, vec!["X raw", "Y raw", "Z raw"]);

    let ids: Vec<_> = summary.ledger.iter().map(|e| e.task_id.as_str()).collect();
    assert_eq!(ids, vec!["call_x", "call_y", "call_z"]);
    assert!(
        summary
            .ledger
            .iter()
            .all(|e| e.kind == Some(TaskKind::Delegate) && e.round == 1)
    );
}

#[tokio::test]
async fn test_journal_replay_matches_live_view() {
    let dir = TempDir::new().unwrap();
    let journal_path = dir.path().join("run.jsonl");
    let journal = Arc::new(EventJournal::open(&journal_path).unwrap());

    let (tx, rx) = mpsc::channel(256);
    let sinks: Vec<Arc<dyn EventSink>> = vec![journal, Arc::new(ChannelSink::new(tx))];
    let emitter = EventEmitter::new(Arc::new(Tee::new(sinks)));

    let (rounds, researcher) = three_way();
    let supervisor = Supervisor::new(
        SupervisorConfig::default(),
        Arc::new(rounds),
        Arc::new(researcher),
    )
    .with_emitter(emitter);

    let scheduler = BatchingScheduler::new(ReconstructorConfig::default());
    let supervise = async move {
        let result = supervisor.run("Compare X vs Y vs Z").await;
        drop(supervisor);
        result
    };
    let (result, live) =
        futures::future::join(supervise, scheduler.run(rx, Duration::from_millis(5))).await;
    result.unwrap();
    assert!(live.completed);

    let mut replayed = StreamReconstructor::default();
    let count = EventJournal::replay(&journal_path, &mut replayed).unwrap();
    assert!(count > 0);

    let replay_view = replayed.view();
    assert_eq!(replay_view.events().len(), live.events().len());
    for event in live.events() {
        assert_eq!(replay_view.event(&event.id), Some(event));
    }

    // Tool-call text is rebuilt from streamed fragments
    let search = replay_view
        .events()
        .iter()
        .find(|e| e.tool_call_id.as_deref() == Some("call_x-search"))
        .unwrap();
    assert_eq!(search.data, serde_json::json!("X done"));
    assert_eq!(search.status, Status::Finished);

    // One supervisor root, three researcher groups beneath it
    let roots: Vec<_> = replay_view.tree.roots().collect();
    assert_eq!(roots.len(), 1);
    assert_eq!(roots[0].kind, NodeKind::Supervisor);
    let researchers = replay_view
        .tree
        .walk()
        .into_iter()
        .filter(|(_, node)| node.kind == NodeKind::Researcher)
        .count();
    assert_eq!(researchers, 3);
}

#[tokio::test]
async fn test_replaying_twice_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let journal_path = dir.path().join("run.jsonl");
    let journal = Arc::new(EventJournal::open(&journal_path).unwrap());

    let (rounds, researcher) = three_way();
    Supervisor::new(
        SupervisorConfig::default(),
        Arc::new(rounds),
        Arc::new(researcher),
    )
    .with_emitter(EventEmitter::new(journal))
    .run("Compare X vs Y vs Z")
    .await
    .unwrap();

    let mut once = StreamReconstructor::default();
    EventJournal::replay(&journal_path, &mut once).unwrap();

    let mut twice = StreamReconstructor::default();
    EventJournal::replay(&journal_path, &mut twice).unwrap();
    EventJournal::replay(&journal_path, &mut twice).unwrap();

    assert_eq!(once.view().events(), twice.view().events());
    assert_eq!(once.view().tree.len(), twice.view().tree.len());
}

//! The supervisor's decision loop.
//!
//! A round is: ask the decision source for actions, interpret them, answer
//! reflections and finish signals inline, fan out delegations (or refuse
//! them once the iteration bound is hit), record exactly one ledger entry
//! per action, then decide whether to continue. Rounds are strictly
//! sequential.

use crate::errors::{OrchestratorError, ProtocolViolation};
use crate::orchestrator::executor::{FanOutExecutor, Researcher};
use crate::orchestrator::governor::{DEFAULT_MAX_ITERATIONS, IterationGovernor};
use crate::orchestrator::interpreter::{ActionBatch, interpret};
use crate::orchestrator::ledger::{LedgerMode, ResponseLedger};
use crate::orchestrator::state::{
    ExecutionTimer, ResearchSummary, RoundReport, SupervisorState, Termination,
};
use crate::orchestrator::task::{Action, FINISH_MESSAGE, Outcome, TaskKind};
use crate::stream::{Classification, EventEmitter, EventHandle};
use async_trait::async_trait;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;

/// Produces the next batch of actions. An empty batch ends the run.
#[async_trait]
pub trait DecisionSource: Send + Sync {
    async fn decide(&self, state: &SupervisorState) -> anyhow::Result<Vec<Action>>;
}

/// Handles reflections synchronously.
pub trait Reflector: Send + Sync {
    fn reflect(&self, reflection: &str) -> anyhow::Result<String>;
}

/// Acknowledges every reflection without side effects.
pub struct EchoReflector;

impl Reflector for EchoReflector {
    fn reflect(&self, reflection: &str) -> anyhow::Result<String> {
        Ok(format!("Reflection recorded: {}", reflection))
    }
}

#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub max_iterations: u32,
    /// Concurrent delegations allowed; 0 means unbounded.
    pub max_parallel: usize,
    pub ledger_mode: LedgerMode,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            max_iterations: DEFAULT_MAX_ITERATIONS,
            max_parallel: 0,
            ledger_mode: LedgerMode::default(),
        }
    }
}

struct RunState {
    state: SupervisorState,
    ledger: ResponseLedger,
    governor: IterationGovernor,
}

pub struct Supervisor {
    config: SupervisorConfig,
    decision: Arc<dyn DecisionSource>,
    reflector: Arc<dyn Reflector>,
    executor: FanOutExecutor,
    emitter: EventEmitter,
}

impl Supervisor {
    pub fn new(
        config: SupervisorConfig,
        decision: Arc<dyn DecisionSource>,
        researcher: Arc<dyn Researcher>,
    ) -> Self {
        let executor = FanOutExecutor::new(researcher).with_max_parallel(config.max_parallel);
        Self {
            config,
            decision,
            reflector: Arc::new(EchoReflector),
            executor,
            emitter: EventEmitter::null(),
        }
    }

    pub fn with_reflector(mut self, reflector: Arc<dyn Reflector>) -> Self {
        self.reflector = reflector;
        self
    }

    pub fn with_emitter(mut self, emitter: EventEmitter) -> Self {
        self.emitter = emitter;
        self
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    /// Run the loop for `brief` until it terminates.
    ///
    /// Task failures and refusals end up in the ledger; only protocol
    /// violations and decision-step failures are returned as errors.
    pub async fn run(&self, brief: &str) -> Result<ResearchSummary, OrchestratorError> {
        let timer = ExecutionTimer::start();
        let group = self.emitter.open(Classification::SUPERVISOR_GROUP);
        let at_start = |violation| OrchestratorError::Protocol { round: 0, violation };
        group.pending(json!({ "brief": brief })).map_err(at_start)?;
        group.running(json!({ "brief": brief })).map_err(at_start)?;

        let mut run = RunState {
            state: SupervisorState::new(brief, self.config.max_iterations),
            ledger: ResponseLedger::new(self.config.ledger_mode),
            governor: IterationGovernor::new(self.config.max_iterations),
        };

        tracing::info!(
            max_iterations = self.config.max_iterations,
            max_parallel = self.config.max_parallel,
            "supervisor started"
        );

        let termination = match self.run_rounds(&group, &mut run).await {
            Ok(termination) => termination,
            Err(e) => {
                tracing::error!(error = %e, "supervisor aborted");
                if let Err(v) = group.fail(e.to_string()) {
                    tracing::debug!(error = %v, "supervisor group already terminal");
                }
                return Err(e);
            }
        };

        let rounds = run.governor.rounds();
        let notes: Vec<String> = run
            .ledger
            .entries()
            .iter()
            .map(|e| e.content().to_string())
            .collect();

        group
            .finish(json!({
                "rounds": rounds,
                "termination": termination.to_string(),
                "notes": notes.len(),
            }))
            .map_err(|violation| OrchestratorError::Protocol {
                round: rounds,
                violation,
            })?;

        tracing::info!(rounds, %termination, notes = notes.len(), "supervisor finished");

        Ok(ResearchSummary {
            brief: brief.to_string(),
            rounds,
            termination,
            notes,
            raw_notes: run.state.raw_notes,
            ledger: run.ledger.into_entries(),
            history: run.state.history,
            duration_ms: timer.elapsed_ms(),
        })
    }

    async fn run_rounds(
        &self,
        group: &EventHandle,
        run: &mut RunState,
    ) -> Result<Termination, OrchestratorError> {
        loop {
            let budget = run.governor.begin_round();
            let round = budget.round;
            run.state.round = round;
            let protocol = |violation| OrchestratorError::Protocol { round, violation };

            let actions = self
                .decision
                .decide(&run.state)
                .await
                .map_err(|source| OrchestratorError::DecisionFailed { round, source })?;

            let Some(batch) = interpret(&actions).map_err(protocol)? else {
                tracing::info!(round, "no further action requested");
                return Ok(Termination::NoFurtherAction);
            };

            tracing::info!(round, actions = batch.len(), exhausted = budget.exhausted, "round started");
            run.ledger
                .open_round(round, batch.dispatch_order())
                .map_err(protocol)?;

            let calls = open_tool_calls(group, &actions).map_err(protocol)?;
            let (report, fault) = self
                .process_round(group, run, &batch, &calls, round, budget.exhausted)
                .await
                .map_err(protocol)?;

            run.ledger.assert_complete().map_err(protocol)?;
            run.state.last_responses = run.ledger.round_entries(round).cloned().collect();

            tracing::info!(
                round,
                reflections = report.reflections,
                delegations = report.delegations,
                refused = report.refused,
                failed = report.failed,
                duration_ms = report.duration_ms,
                "round complete"
            );
            let finish_requested = report.finish_requested;
            run.state.history.push(report);

            if let Some(message) = fault {
                tracing::warn!(round, %message, "fault during round, terminating");
                return Ok(Termination::Fault { message });
            }
            if finish_requested {
                return Ok(Termination::Finished);
            }
            if budget.exhausted {
                return Ok(Termination::IterationLimit);
            }
        }
    }

    async fn process_round(
        &self,
        group: &EventHandle,
        run: &mut RunState,
        batch: &ActionBatch,
        calls: &HashMap<String, EventHandle>,
        round: u32,
        exhausted: bool,
    ) -> Result<(RoundReport, Option<String>), ProtocolViolation> {
        let timer = ExecutionTimer::start();
        let mut report = RoundReport {
            round,
            ..Default::default()
        };
        let mut fault: Option<String> = None;

        for task in &batch.reflections {
            report.reflections += 1;
            let outcome = match self.reflector.reflect(&task.payload) {
                Ok(text) => Outcome::success(text),
                Err(e) => {
                    tracing::warn!(task_id = %task.id, error = %e, "reflection failed");
                    let message = format!("Reflection failed: {e}");
                    fault.get_or_insert_with(|| message.clone());
                    Outcome::failure(message)
                }
            };
            answer(&mut run.ledger, calls, &task.id, Some(TaskKind::Reflect), outcome)?;
        }

        for action in &batch.unknown {
            report.unknown += 1;
            let outcome = Outcome::failure(format!("Unknown action '{}'", action.name));
            answer(&mut run.ledger, calls, &action.id, None, outcome)?;
        }

        for task in &batch.finish_signals {
            report.finish_requested = true;
            answer(
                &mut run.ledger,
                calls,
                &task.id,
                Some(TaskKind::Finish),
                Outcome::success(FINISH_MESSAGE),
            )?;
        }

        // A finish signal ends the run, so its sibling delegations are declined
        // the same way the iteration bound declines them.
        if exhausted || batch.has_finish_signal() {
            for task in &batch.delegations {
                report.refused += 1;
                answer(&mut run.ledger, calls, &task.id, Some(TaskKind::Delegate), Outcome::Refused)?;
            }
        } else if let Some(message) = &fault {
            for task in &batch.delegations {
                report.failed += 1;
                let outcome = Outcome::failure(format!("Round aborted before dispatch: {message}"));
                answer(&mut run.ledger, calls, &task.id, Some(TaskKind::Delegate), outcome)?;
            }
        } else if !batch.delegations.is_empty() {
            let results = self
                .executor
                .execute(&batch.delegations, &group.child_emitter())
                .await?;
            report.delegations = results.len();

            // Dispatch order, so notes are deterministic.
            for result in &results {
                match &result.result {
                    Ok(findings) => {
                        if let Some(notes) = findings.joined_notes() {
                            run.state.raw_notes.push(notes);
                        }
                    }
                    Err(_) => report.failed += 1,
                }
                answer(
                    &mut run.ledger,
                    calls,
                    &result.task_id,
                    Some(TaskKind::Delegate),
                    result.outcome(),
                )?;
            }
        }

        report.duration_ms = timer.elapsed_ms();
        Ok((report, fault))
    }
}

/// Open one `/supervisor/tool_call` event per action, keyed by its
/// correlation id.
fn open_tool_calls(
    group: &EventHandle,
    actions: &[Action],
) -> Result<HashMap<String, EventHandle>, ProtocolViolation> {
    let emitter = group.child_emitter();
    let mut calls = HashMap::with_capacity(actions.len());
    for action in actions {
        let call = emitter
            .open(Classification::SUPERVISOR_TOOL_CALL)
            .with_tool_call_id(action.id.clone());
        call.pending(json!({ "name": action.name, "args": action.args }))?;
        calls.insert(action.id.clone(), call);
    }
    Ok(calls)
}

/// Record the response for `task_id` and close its tool-call event.
fn answer(
    ledger: &mut ResponseLedger,
    calls: &HashMap<String, EventHandle>,
    task_id: &str,
    kind: Option<TaskKind>,
    outcome: Outcome,
) -> Result<(), ProtocolViolation> {
    let content = outcome.content().to_string();
    let failed = matches!(outcome, Outcome::Failure { .. });
    if !ledger.record(task_id, kind, outcome)? {
        return Ok(());
    }

    if let Some(call) = calls.get(task_id) {
        if failed {
            call.fail(content)?;
        } else {
            call.finish(json!(content))?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ResearchError;
    use crate::orchestrator::executor::{ResearchFindings, ResearchRequest};
    use crate::orchestrator::task::REFUSAL_MESSAGE;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Plays back fixed rounds, then returns nothing.
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

    /// Delegates forever with fresh ids.
    struct Endless;

    #[async_trait]
    impl DecisionSource for Endless {
        async fn decide(&self, state: &SupervisorState) -> anyhow::Result<Vec<Action>> {
            Ok(vec![Action::delegate(format!("call_{}", state.round), "topic")])
        }
    }

    struct Echo;

    #[async_trait]
    impl Researcher for Echo {
        async fn research(&self, request: ResearchRequest) -> Result<ResearchFindings, ResearchError> {
            if request.topic == "broken" {
                return Err(ResearchError::failed(&request.topic, "provider down"));
            }
            Ok(ResearchFindings {
                compressed: format!("findings on {}", request.topic),
                raw_notes: vec![format!("raw {}", request.topic)],
            })
        }
    }

    struct FailingReflector;

    impl Reflector for FailingReflector {
        fn reflect(&self, _reflection: &str) -> anyhow::Result<String> {
            anyhow::bail!("scratchpad unavailable")
        }
    }

    fn supervisor(decision: impl DecisionSource + 'static, config: SupervisorConfig) -> Supervisor {
        Supervisor::new(config, Arc::new(decision), Arc::new(Echo))
    }

    #[tokio::test]
    async fn test_empty_first_decision_terminates_without_entries() {
        let summary = supervisor(Rounds(vec![]), SupervisorConfig::default())
            .run("nothing to do")
            .await
            .unwrap();
        assert_eq!(summary.termination, Termination::NoFurtherAction);
        assert!(summary.ledger.is_empty());
        assert_eq!(summary.rounds, 1);
    }

    #[tokio::test]
    async fn test_three_delegations_three_entries() {
        let round = vec![
            Action::delegate("a", "X"),
            Action::delegate("b", "Y"),
            Action::delegate("c", "Z"),
        ];
        let summary = supervisor(Rounds(vec![round]), SupervisorConfig::default())
            .run("Compare X vs Y vs Z")
            .await
            .unwrap();

        assert_eq!(summary.ledger.len(), 3);
        assert_eq!(summary.raw_notes, vec!["raw X", "raw Y", "raw Z"]);
        assert_eq!(summary.history[0].delegations, 3);
        assert_eq!(summary.termination, Termination::NoFurtherAction);
    }

    #[tokio::test]
    async fn test_iteration_bound_refuses_round_seven() {
        let summary = supervisor(Endless, SupervisorConfig::default())
            .run("loop")
            .await
            .unwrap();

        assert_eq!(summary.rounds, 7);
        assert_eq!(summary.termination, Termination::IterationLimit);
        assert!(summary.limit_reached());
        let last = summary.ledger.last().unwrap();
        assert_eq!(last.task_id, "call_7");
        assert!(last.outcome.is_refused());
        assert_eq!(last.content(), REFUSAL_MESSAGE);
        assert_eq!(summary.ledger.iter().filter(|e| e.outcome.is_refused()).count(), 1);
    }

    #[tokio::test]
    async fn test_refusal_still_answers_reflections_and_finish() {
        let config = SupervisorConfig {
            max_iterations: 0,
            ..Default::default()
        };
        let round = vec![
            Action::reflect("r", "think"),
            Action::delegate("d", "X"),
            Action::finish("f"),
        ];
        let summary = supervisor(Rounds(vec![round]), config).run("b").await.unwrap();

        assert_eq!(summary.ledger.len(), 3);
        assert_eq!(summary.notes[0], "Reflection recorded: think");
        assert_eq!(summary.notes[1], FINISH_MESSAGE);
        assert_eq!(summary.notes[2], REFUSAL_MESSAGE);
        assert_eq!(summary.termination, Termination::Finished);
    }

    #[tokio::test]
    async fn test_finish_signal_declines_sibling_delegations() {
        struct Counting(AtomicUsize);

        #[async_trait]
        impl Researcher for Counting {
            async fn research(&self, request: ResearchRequest) -> Result<ResearchFindings, ResearchError> {
                self.0.fetch_add(1, Ordering::SeqCst);
                Ok(ResearchFindings {
                    compressed: format!("{} done", request.topic),
                    raw_notes: Vec::new(),
                })
            }
        }

        let researcher = Arc::new(Counting(AtomicUsize::new(0)));
        let round = vec![Action::delegate("d", "X"), Action::finish("f")];
        let summary = Supervisor::new(
            SupervisorConfig::default(),
            Arc::new(Rounds(vec![round])),
            researcher.clone(),
        )
        .run("b")
        .await
        .unwrap();

        assert_eq!(researcher.0.load(Ordering::SeqCst), 0);
        assert_eq!(summary.termination, Termination::Finished);
        assert_eq!(summary.notes, vec![FINISH_MESSAGE, REFUSAL_MESSAGE]);
        assert_eq!(summary.history[0].refused, 1);
        assert_eq!(summary.history[0].delegations, 0);
        assert!(summary.raw_notes.is_empty());
    }

    #[tokio::test]
    async fn test_failed_delegate_is_recorded_and_omitted_from_notes() {
        let round = vec![Action::delegate("a", "X"), Action::delegate("b", "broken")];
        let summary = supervisor(Rounds(vec![round]), SupervisorConfig::default())
            .run("b")
            .await
            .unwrap();

        assert_eq!(summary.ledger.len(), 2);
        assert_eq!(summary.raw_notes, vec!["raw X"]);
        assert!(summary.notes[1].starts_with("Error synthesizing research report"));
        assert_eq!(summary.history[0].failed, 1);
    }

    #[tokio::test]
    async fn test_delegate_emitting_after_terminal_aborts_the_run() {
        struct Reopens;

        #[async_trait]
        impl Researcher for Reopens {
            async fn research(&self, request: ResearchRequest) -> Result<ResearchFindings, ResearchError> {
                let call = request.emitter.open(Classification::RESEARCHER_TOOL_CALL);
                call.finish(json!("done"))?;
                call.running(json!("late"))?;
                Ok(ResearchFindings::default())
            }
        }

        let round = vec![Action::delegate("a", "X"), Action::delegate("b", "Y")];
        let err = Supervisor::new(
            SupervisorConfig::default(),
            Arc::new(Rounds(vec![round])),
            Arc::new(Reopens),
        )
        .run("b")
        .await
        .unwrap_err();

        match err {
            OrchestratorError::Protocol { round, violation } => {
                assert_eq!(round, 1);
                assert!(matches!(violation, ProtocolViolation::EmitAfterTerminal { .. }));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_unknown_action_gets_failure_entry() {
        let round = vec![Action::new("u", "browse", serde_json::json!({}))];
        let summary = supervisor(Rounds(vec![round]), SupervisorConfig::default())
            .run("b")
            .await
            .unwrap();
        assert_eq!(summary.ledger.len(), 1);
        assert!(summary.notes[0].contains("Unknown action 'browse'"));
    }

    #[tokio::test]
    async fn test_reused_id_across_rounds_is_fatal() {
        let rounds = vec![vec![Action::delegate("same", "X")], vec![Action::delegate("same", "Y")]];
        let err = supervisor(Rounds(rounds), SupervisorConfig::default())
            .run("b")
            .await
            .unwrap_err();
        assert!(err.is_protocol_violation());
        match err {
            OrchestratorError::Protocol { round, .. } => assert_eq!(round, 2),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_reflection_fault_forces_termination() {
        let round = vec![Action::reflect("r", "x"), Action::delegate("d", "X")];
        let rounds = vec![round, vec![Action::delegate("d2", "Y")]];
        let summary = supervisor(Rounds(rounds), SupervisorConfig::default())
            .with_reflector(Arc::new(FailingReflector))
            .run("b")
            .await
            .unwrap();

        assert!(matches!(summary.termination, Termination::Fault { .. }));
        assert_eq!(summary.rounds, 1);
        assert_eq!(summary.ledger.len(), 2);
        assert!(summary.raw_notes.is_empty());
    }

    #[tokio::test]
    async fn test_decision_failure_is_returned() {
        struct Broken;

        #[async_trait]
        impl DecisionSource for Broken {
            async fn decide(&self, _state: &SupervisorState) -> anyhow::Result<Vec<Action>> {
                anyhow::bail!("model endpoint unreachable")
            }
        }

        let err = supervisor(Broken, SupervisorConfig::default())
            .run("b")
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::DecisionFailed { round: 1, .. }));
    }

    #[tokio::test]
    async fn test_decision_sees_previous_responses() {
        struct Watching(Mutex<Vec<usize>>);

        #[async_trait]
        impl DecisionSource for Watching {
            async fn decide(&self, state: &SupervisorState) -> anyhow::Result<Vec<Action>> {
                self.0.lock().unwrap().push(state.last_responses.len());
                Ok(match state.round {
                    1 => vec![Action::delegate("a", "X"), Action::delegate("b", "Y")],
                    _ => vec![],
                })
            }
        }

        let watcher = Arc::new(Watching(Mutex::new(Vec::new())));
        Supervisor::new(SupervisorConfig::default(), watcher.clone(), Arc::new(Echo))
            .run("b")
            .await
            .unwrap();
        assert_eq!(*watcher.0.lock().unwrap(), vec![0, 2]);
    }
}

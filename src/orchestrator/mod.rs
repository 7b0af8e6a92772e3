pub mod executor;
pub mod governor;
pub mod interpreter;
pub mod ledger;
pub mod state;
pub mod supervisor;
pub mod task;

pub use executor::{DelegateResult, FanOutExecutor, ResearchFindings, ResearchRequest, Researcher};
pub use governor::{IterationGovernor, RoundBudget};
pub use interpreter::{ActionBatch, interpret};
pub use ledger::{LedgerEntry, LedgerMode, ResponseLedger};
pub use state::{ResearchSummary, RoundReport, SupervisorState, Termination};
pub use supervisor::{DecisionSource, EchoReflector, Reflector, Supervisor, SupervisorConfig};
pub use task::{Action, Outcome, Task, TaskKind};

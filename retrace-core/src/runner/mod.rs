mod fanout;
mod job;
mod monitor;
mod orchestrator;
mod outcome;
mod recorder;
mod side_effects;
mod suite;
mod unit;

pub use fanout::FanoutCoordinator;
pub use job::{RunJob, RunTarget};
pub use monitor::{CancellationMonitor, MonitorHandle};
pub use orchestrator::{OrchestratorConfig, RunOrchestrator};
pub use outcome::{
    aggregate_status, BrowserSummary, ExecutionOutcome, OutcomeStatus, RunOutcome, RunResult,
};
pub use recorder::ActionRecorder;
pub use side_effects::SideEffects;
pub use suite::{suite_completion, suite_status, SuiteReconciler};
pub use unit::{ExecutionFailure, ExecutionSettings, ExecutionUnit};

pub mod config;
pub mod engine;
pub mod error;
pub mod progress;
pub mod queue;
pub mod run;
pub mod runner;
mod sqlite;
pub mod worker;

pub use config::{
    load_retrace_config, ChromiumSection, ExecutionSection, ProgressSection, RetraceConfig,
    StorageSection, WorkerSection,
};
pub use engine::{
    ChromiumEngine, EngineError, EngineReport, EngineStatus, ExecutionEngine, ExecutionOptions,
    Reporter,
};
pub use error::{ConfigError, Result};
pub use progress::{
    publisher_from_config, ChannelPublisher, EventSink, ProgressEvent, ProgressPublisher,
    PublishError,
};
pub use queue::{
    JobQueueStore, JobQueueStoreBuilder, QueueError, QueueFilter, QueueResult, QueueStatus,
    QueueSummary, QueuedJob,
};
pub use run::{
    BrowserEngine, Recording, Run, RunKind, RunStats, RunStatus, RunStore, SqliteRunStore,
    SqliteRunStoreBuilder, StoreError, StoreResult, TestDefinition,
};
pub use runner::{
    OrchestratorConfig, RunJob, RunOrchestrator, RunResult, RunTarget, SuiteReconciler,
};
pub use worker::Worker;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use super::fanout::FanoutCoordinator;
use super::job::{RunJob, RunTarget};
use super::monitor::CancellationMonitor;
use super::outcome::{OutcomeStatus, RunOutcome, RunResult};
use super::suite::SuiteReconciler;
use super::unit::{ExecutionFailure, ExecutionSettings, ExecutionUnit};
use crate::config::{ExecutionSection, RetraceConfig};
use crate::engine::{CancelSignal, EngineError, ExecutionEngine};
use crate::progress::{EventSink, ProgressEvent, ProgressPublisher};
use crate::run::store::CANCELLED_BY_USER;
use crate::run::{
    BrowserEngine, Recording, Run, RunCompletion, RunStats, RunStatus, RunStore, StoreError,
    TestDefinition,
};

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub cancellation_poll: Duration,
    pub artifacts_dir: PathBuf,
    pub defaults: ExecutionSection,
}

impl OrchestratorConfig {
    pub fn from_config(config: &RetraceConfig) -> Self {
        Self {
            cancellation_poll: config.worker.cancellation_poll(),
            artifacts_dir: config.artifacts_dir(),
            defaults: config.execution.clone(),
        }
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self::from_config(&RetraceConfig::default())
    }
}

#[derive(Debug, Error)]
enum RunFailure {
    #[error("{0}")]
    NotFound(&'static str),
    #[error("{0}")]
    Unauthorized(&'static str),
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error(transparent)]
    Execution(#[from] ExecutionFailure),
    #[error("storage error: {0}")]
    Store(#[from] StoreError),
}

/// Entry point for queued runs. Every job ends with its run in a terminal
/// state; errors never escape `process_job`.
pub struct RunOrchestrator {
    store: Arc<dyn RunStore>,
    events: EventSink,
    config: OrchestratorConfig,
    unit: ExecutionUnit,
    fanout: FanoutCoordinator,
    reconciler: SuiteReconciler,
}

impl RunOrchestrator {
    /// Spawns the progress forwarder, so it must be called inside a tokio
    /// runtime.
    pub fn new(
        store: Arc<dyn RunStore>,
        engine: Arc<dyn ExecutionEngine>,
        publisher: Arc<dyn ProgressPublisher>,
        config: OrchestratorConfig,
    ) -> Self {
        let events = EventSink::spawn(publisher);
        let unit = ExecutionUnit::new(
            Arc::clone(&store),
            engine,
            events.clone(),
            config.artifacts_dir.clone(),
        );
        let fanout = FanoutCoordinator::new(unit.clone(), Arc::clone(&store));
        let reconciler = SuiteReconciler::new(Arc::clone(&store));
        Self {
            store,
            events,
            config,
            unit,
            fanout,
            reconciler,
        }
    }

    pub async fn process_job(&self, job: &RunJob) -> RunResult {
        let result = self.process(job).await;
        self.events.flush().await;
        result
    }

    async fn process(&self, job: &RunJob) -> RunResult {
        let run_id = job.run_id.as_str();
        let run = match self.store.fetch_run(run_id).await {
            Ok(Some(run)) => run,
            Ok(None) => {
                warn!(run_id = %run_id, "job references an unknown run");
                return RunResult::bare(run_id, RunStatus::Error, "Run not found");
            }
            Err(err) => {
                error!(run_id = %run_id, error = %err, "run could not be loaded");
                return RunResult::bare(
                    run_id,
                    RunStatus::Error,
                    format!("Run could not be loaded: {err}"),
                );
            }
        };

        if run.is_finished() {
            info!(run_id = %run_id, status = %run.status, "run already finished; skipping job");
            return RunResult::from_run(&run);
        }

        let started = Instant::now();
        if run.status == RunStatus::Cancelled {
            info!(run_id = %run_id, "run cancelled before execution");
            return self
                .finalize(&run, Err(EngineError::cancelled().into()), true, started)
                .await;
        }

        match self.store.mark_run_running(run_id, Utc::now()).await {
            Ok(true) => {}
            Ok(false) => debug!(run_id = %run_id, status = %run.status, "run was not queued"),
            Err(err) => warn!(run_id = %run_id, error = %err, "could not mark run running"),
        }
        info!(run_id = %run_id, kind = %job.kind(), "processing run");

        let mut monitor = CancellationMonitor::start(
            Arc::clone(&self.store),
            run_id,
            self.config.cancellation_poll,
        );
        let result = self.execute(job, monitor.signal()).await;
        monitor.stop();

        self.finalize(&run, result, monitor.fired(), started).await
    }

    async fn execute(&self, job: &RunJob, cancel: CancelSignal) -> Result<RunOutcome, RunFailure> {
        match &job.target {
            RunTarget::Recording { recording_id } => {
                let recording = self.load_recording(recording_id, &job.user_id).await?;
                let browser = job
                    .browsers
                    .first()
                    .or_else(|| self.config.defaults.default_browsers.first())
                    .copied()
                    .unwrap_or(BrowserEngine::Chromium);
                let settings = self.settings(job, None);
                let execution = self
                    .unit
                    .execute(&job.run_id, browser, false, &recording, &settings, cancel)
                    .await?;
                Ok(RunOutcome::single(execution))
            }
            RunTarget::Test { test_id } => {
                let test = self
                    .store
                    .fetch_test(test_id)
                    .await?
                    .ok_or(RunFailure::NotFound("Test not found"))?;
                if test.user_id != job.user_id {
                    return Err(RunFailure::Unauthorized("Test not found"));
                }
                let recording = self.load_recording(&test.recording_id, &job.user_id).await?;
                let browsers = if !job.browsers.is_empty() {
                    job.browsers.clone()
                } else if !test.browsers.is_empty() {
                    test.browsers.clone()
                } else {
                    self.config.defaults.default_browsers.clone()
                };
                let parallel = job.parallel.unwrap_or(test.parallel);
                let settings = self.settings(job, Some(&test));
                Ok(self
                    .fanout
                    .run(&job.run_id, &browsers, parallel, &recording, &settings, cancel)
                    .await)
            }
        }
    }

    async fn load_recording(&self, recording_id: &str, user_id: &str) -> Result<Recording, RunFailure> {
        let recording = self
            .store
            .fetch_recording(recording_id)
            .await?
            .ok_or(RunFailure::NotFound("Recording not found"))?;
        if recording.user_id != user_id {
            return Err(RunFailure::Unauthorized("Recording not found"));
        }
        Ok(recording)
    }

    fn settings(&self, job: &RunJob, test: Option<&TestDefinition>) -> ExecutionSettings {
        let defaults = &self.config.defaults;
        let timeout_ms = job
            .timeout_ms
            .or_else(|| test.and_then(|test| test.timeout_ms))
            .or(defaults.timeout_ms);
        ExecutionSettings {
            headless: job
                .headless
                .or(test.map(|test| test.headless))
                .unwrap_or(defaults.headless),
            timeout: timeout_ms.filter(|ms| *ms > 0).map(Duration::from_millis),
            record_video: job
                .record_video
                .or(test.map(|test| test.record_video))
                .unwrap_or(defaults.record_video),
            capture_screenshots: job
                .capture_screenshots
                .or(test.map(|test| test.capture_screenshots))
                .unwrap_or(defaults.capture_screenshots),
        }
    }

    async fn finalize(
        &self,
        run: &Run,
        result: Result<RunOutcome, RunFailure>,
        cancel_requested: bool,
        started: Instant,
    ) -> RunResult {
        let run_id = run.run_id.as_str();
        let elapsed_ms = started.elapsed().as_millis() as i64;

        let (completion, outcome) = match result {
            Ok(mut outcome) => {
                if cancel_requested || outcome.status == OutcomeStatus::Cancelled {
                    outcome.status = OutcomeStatus::Cancelled;
                    outcome.error_message = Some(CANCELLED_BY_USER.to_string());
                    outcome.error_action_id = None;
                }
                (outcome.completion(), Some(outcome))
            }
            Err(failure) => (classify_failure(run_id, failure, elapsed_ms), None),
        };

        let status = match self.store.complete_run(run_id, &completion).await {
            Ok(Some(status)) => status,
            Ok(None) => {
                warn!(run_id = %run_id, "run was already completed elsewhere");
                match self.store.fetch_run_status(run_id).await {
                    Ok(Some(status)) => status,
                    _ => completion.status,
                }
            }
            Err(err) => {
                error!(run_id = %run_id, error = %err, "failed to persist terminal run state");
                completion.status
            }
        };
        let error_message = if status == RunStatus::Cancelled {
            Some(CANCELLED_BY_USER.to_string())
        } else {
            completion.error_message.clone()
        };

        if status == RunStatus::Error {
            self.events.emit(ProgressEvent::RunError {
                run_id: run_id.to_string(),
                error: error_message.clone().unwrap_or_default(),
            });
        } else {
            self.events.emit(ProgressEvent::RunCompleted {
                run_id: run_id.to_string(),
                status,
                duration_ms: completion.duration_ms,
                actions_executed: completion.stats.actions_executed,
                actions_failed: completion.stats.actions_failed,
                actions_skipped: completion.stats.actions_skipped,
                error_message: error_message.clone(),
            });
        }
        info!(
            run_id = %run_id,
            status = %status,
            duration_ms = completion.duration_ms,
            "run finished"
        );

        self.reconciler.reconcile(run_id).await;

        let mut summary = match &outcome {
            Some(outcome) => RunResult::from_outcome(run_id, status, outcome),
            None => RunResult {
                run_id: run_id.to_string(),
                status,
                duration_ms: completion.duration_ms,
                actions_executed: completion.stats.actions_executed,
                actions_failed: completion.stats.actions_failed,
                error_message: None,
                video_path: None,
                screenshot_paths: Vec::new(),
                browser_results: None,
            },
        };
        summary.error_message = error_message;
        summary
    }
}

fn classify_failure(run_id: &str, failure: RunFailure, elapsed_ms: i64) -> RunCompletion {
    let mut completion = match failure {
        RunFailure::NotFound(message) | RunFailure::Unauthorized(message) => {
            warn!(run_id = %run_id, reason = message, "run rejected before execution");
            RunCompletion::bare(RunStatus::Error, Some(message.to_string()))
        }
        RunFailure::Engine(err) => engine_completion(run_id, &err, RunStats::default()),
        RunFailure::Execution(failure) => engine_completion(run_id, &failure.error, failure.stats),
        RunFailure::Store(err) => {
            error!(run_id = %run_id, error = %err, "storage failure while running");
            RunCompletion::bare(RunStatus::Failed, Some(RunFailure::Store(err).to_string()))
        }
    };
    completion.duration_ms = elapsed_ms;
    completion
}

/// Partial counts survive an engine error; a cancellation keeps them too.
fn engine_completion(run_id: &str, err: &EngineError, stats: RunStats) -> RunCompletion {
    let mut completion = if err.is_cancellation() {
        RunCompletion::bare(RunStatus::Cancelled, Some(CANCELLED_BY_USER.to_string()))
    } else {
        warn!(run_id = %run_id, error = %err, "run execution failed");
        let mut completion = RunCompletion::bare(RunStatus::Failed, Some(err.to_string()));
        completion.error_action_id = err.action_id().map(str::to_string);
        completion
    };
    completion.stats = stats;
    completion
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failures_classify_into_terminal_statuses() {
        let missing = classify_failure("r", RunFailure::NotFound("Recording not found"), 3);
        assert_eq!(missing.status, RunStatus::Error);
        assert_eq!(missing.error_message.as_deref(), Some("Recording not found"));
        assert_eq!(missing.duration_ms, 3);

        let cancelled = classify_failure(
            "r",
            RunFailure::Engine(EngineError::Other("CANCELLED: Run was cancelled by user".into())),
            0,
        );
        assert_eq!(cancelled.status, RunStatus::Cancelled);
        assert_eq!(cancelled.error_message.as_deref(), Some("Run cancelled by user"));

        let failed = classify_failure(
            "r",
            RunFailure::Engine(EngineError::Action {
                action_id: Some("act_002".into()),
                message: "Element not found".into(),
                stack: None,
            }),
            0,
        );
        assert_eq!(failed.status, RunStatus::Failed);
        assert_eq!(failed.error_action_id.as_deref(), Some("act_002"));

        let timeout = classify_failure("r", RunFailure::Engine(EngineError::Timeout(50)), 0);
        assert_eq!(
            timeout.error_message.as_deref(),
            Some("Execution timed out after 50 ms")
        );
        assert_eq!(timeout.stats, RunStats::default());
    }

    #[test]
    fn interrupted_executions_keep_partial_counts() {
        let failure = ExecutionFailure {
            error: EngineError::Other("browser crashed".into()),
            stats: RunStats::from_counts(4, 2, 1),
            action_results: Vec::new(),
        };
        let completion = classify_failure("r", RunFailure::Execution(failure), 9);
        assert_eq!(completion.status, RunStatus::Failed);
        assert_eq!(completion.error_message.as_deref(), Some("browser crashed"));
        assert_eq!(completion.stats.actions_executed, 2);
        assert_eq!(completion.stats.actions_failed, 1);
        assert_eq!(completion.stats.actions_skipped, 2);
        assert_eq!(completion.duration_ms, 9);
    }
}

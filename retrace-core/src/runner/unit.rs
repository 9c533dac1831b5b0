use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, info};

use super::outcome::{ExecutionOutcome, OutcomeStatus};
use super::recorder::ActionRecorder;
use crate::engine::{
    CancelSignal, EngineError, EngineReport, EngineStatus, ExecutionEngine, ExecutionOptions,
};
use crate::progress::{EventSink, ProgressEvent};
use crate::run::store::CANCELLED_BY_USER;
use crate::run::{
    ActionOutcome, ActionResultRecord, BrowserEngine, Recording, RunStats, RunStore,
};

/// Per-execution knobs resolved from the job, the test and the defaults.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionSettings {
    pub headless: bool,
    pub timeout: Option<Duration>,
    pub record_video: bool,
    pub capture_screenshots: bool,
}

/// An engine error together with what the recorder saw before it.
#[derive(Debug, Error)]
#[error("{error}")]
pub struct ExecutionFailure {
    pub error: EngineError,
    pub stats: RunStats,
    pub action_results: Vec<ActionResultRecord>,
}

/// Executes one recording on one engine.
#[derive(Clone)]
pub struct ExecutionUnit {
    store: Arc<dyn RunStore>,
    engine: Arc<dyn ExecutionEngine>,
    events: EventSink,
    artifacts_dir: PathBuf,
}

impl ExecutionUnit {
    pub fn new(
        store: Arc<dyn RunStore>,
        engine: Arc<dyn ExecutionEngine>,
        events: EventSink,
        artifacts_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            store,
            engine,
            events,
            artifacts_dir: artifacts_dir.into(),
        }
    }

    /// Runs the engine and normalizes its report. `tagged` marks executions
    /// that belong to a multi-browser run; their rows and events carry the
    /// engine name.
    ///
    /// Engine errors are returned after the action rows written so far have
    /// been persisted, with counts derived from those rows.
    pub async fn execute(
        &self,
        run_id: &str,
        browser: BrowserEngine,
        tagged: bool,
        recording: &Recording,
        settings: &ExecutionSettings,
        cancel: CancelSignal,
    ) -> Result<ExecutionOutcome, ExecutionFailure> {
        let started = Instant::now();
        let tag = tagged.then_some(browser);
        self.events.emit(ProgressEvent::RunStarted {
            run_id: run_id.to_string(),
            browser: tag,
            total_actions: recording.total_actions(),
            actions: recording.action_summary(),
        });

        let options = ExecutionOptions {
            browser,
            headless: settings.headless,
            timeout: settings.timeout,
            record_video: settings.record_video,
            capture_screenshots: settings.capture_screenshots,
            artifacts_dir: self.artifacts_dir.join(run_id).join(browser.as_str()),
            cancel,
        };
        let mut recorder =
            ActionRecorder::new(run_id, tag, Arc::clone(&self.store), self.events.clone());

        info!(
            run_id = %run_id,
            browser = %browser,
            recording_id = %recording.recording_id,
            "executing recording"
        );
        let result = match settings.timeout {
            Some(limit) => {
                match tokio::time::timeout(
                    limit,
                    self.engine.execute(recording, &options, &mut recorder),
                )
                .await
                {
                    Ok(result) => result,
                    Err(_) => Err(EngineError::Timeout(limit.as_millis() as u64)),
                }
            }
            None => {
                self.engine
                    .execute(recording, &options, &mut recorder)
                    .await
            }
        };
        recorder.settle().await;
        let report = match result {
            Ok(report) => report,
            Err(error) => {
                let action_results = recorder.into_records();
                return Err(ExecutionFailure {
                    error,
                    stats: partial_stats(recording.total_actions(), &action_results),
                    action_results,
                });
            }
        };

        recorder.apply_screenshots(&report.screenshots);
        recorder.settle().await;

        let outcome = normalize(
            tag,
            &report,
            started.elapsed(),
            recorder.into_records(),
        );
        debug!(
            run_id = %run_id,
            browser = %browser,
            status = ?outcome.status,
            executed = outcome.stats.actions_executed,
            failed = outcome.stats.actions_failed,
            "execution finished"
        );
        Ok(outcome)
    }
}

pub(crate) fn classify(status: EngineStatus) -> OutcomeStatus {
    match status {
        EngineStatus::Success => OutcomeStatus::Passed,
        EngineStatus::Cancelled => OutcomeStatus::Cancelled,
        EngineStatus::Failure | EngineStatus::Timeout => OutcomeStatus::Failed,
    }
}

/// Counts for an execution cut short by an engine error. Only the latest row
/// per action counts; skipped rows were never executed.
pub(crate) fn partial_stats(total: i64, records: &[ActionResultRecord]) -> RunStats {
    let mut latest: HashMap<&str, ActionOutcome> = HashMap::new();
    for record in records {
        latest.insert(record.action_id.as_str(), record.outcome);
    }
    let executed = latest
        .values()
        .filter(|outcome| **outcome != ActionOutcome::Skipped)
        .count() as i64;
    let failed = latest
        .values()
        .filter(|outcome| **outcome == ActionOutcome::Failed)
        .count() as i64;
    RunStats::from_counts(total, executed, failed)
}

fn normalize(
    browser: Option<BrowserEngine>,
    report: &EngineReport,
    elapsed: Duration,
    action_results: Vec<ActionResultRecord>,
) -> ExecutionOutcome {
    let status = classify(report.status);
    let first_error = report.errors.first();
    let (error_message, error_action_id) = match status {
        OutcomeStatus::Passed => (None, None),
        OutcomeStatus::Cancelled => (Some(CANCELLED_BY_USER.to_string()), None),
        OutcomeStatus::Failed => (
            Some(
                first_error
                    .map(|error| error.error.clone())
                    .filter(|message| !message.is_empty())
                    .unwrap_or_else(|| "Execution failed".to_string()),
            ),
            first_error.map(|error| error.action_id.clone()),
        ),
    };
    let duration_ms = if report.duration_ms > 0 {
        report.duration_ms
    } else {
        elapsed.as_millis() as i64
    };

    ExecutionOutcome {
        browser,
        status,
        duration_ms,
        stats: RunStats::from_counts(
            report.actions_total,
            report.actions_executed,
            report.actions_failed,
        ),
        error_message,
        error_action_id,
        video_path: report.video_path.clone(),
        screenshot_paths: report
            .screenshots
            .iter()
            .map(|capture| capture.path.clone())
            .collect(),
        action_results,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineActionError;

    #[test]
    fn engine_statuses_map_onto_outcomes() {
        assert_eq!(classify(EngineStatus::Success), OutcomeStatus::Passed);
        assert_eq!(classify(EngineStatus::Cancelled), OutcomeStatus::Cancelled);
        assert_eq!(classify(EngineStatus::Failure), OutcomeStatus::Failed);
        assert_eq!(classify(EngineStatus::Timeout), OutcomeStatus::Failed);
    }

    #[test]
    fn failed_reports_keep_first_error_and_infer_skipped() {
        let mut report = EngineReport::new(EngineStatus::Failure, 5);
        report.actions_executed = 2;
        report.actions_failed = 1;
        report.duration_ms = 40;
        report.errors.push(EngineActionError {
            action_id: "act_002".into(),
            error: "Element not found".into(),
            stack: None,
        });
        report.errors.push(EngineActionError {
            action_id: "act_003".into(),
            error: "later".into(),
            stack: None,
        });

        let outcome = normalize(None, &report, Duration::from_millis(99), Vec::new());
        assert_eq!(outcome.status, OutcomeStatus::Failed);
        assert_eq!(outcome.error_message.as_deref(), Some("Element not found"));
        assert_eq!(outcome.error_action_id.as_deref(), Some("act_002"));
        assert_eq!(outcome.stats.actions_skipped, 3);
        assert_eq!(outcome.duration_ms, 40);
    }

    fn record(action_id: &str, outcome: ActionOutcome) -> ActionResultRecord {
        ActionResultRecord {
            result_id: format!("res-{action_id}"),
            run_id: "run-1".into(),
            browser: Some(BrowserEngine::Firefox),
            action_id: action_id.into(),
            action_type: "click".into(),
            index: 0,
            outcome,
            duration_ms: Some(5),
            started_at: None,
            completed_at: None,
            selector: None,
            error_message: None,
            error_stack: None,
            screenshot_path: None,
        }
    }

    #[test]
    fn interrupted_executions_count_the_rows_already_recorded() {
        let records = vec![
            record("act_001", ActionOutcome::Success),
            record("act_002", ActionOutcome::Failed),
            record("act_002", ActionOutcome::Failed),
            record("act_003", ActionOutcome::Skipped),
        ];
        let stats = partial_stats(5, &records);
        assert_eq!(stats.actions_total, 5);
        assert_eq!(stats.actions_executed, 2);
        assert_eq!(stats.actions_failed, 1);
        assert_eq!(stats.actions_skipped, 3);

        assert_eq!(partial_stats(4, &[]), RunStats::from_counts(4, 0, 0));
    }

    #[test]
    fn failures_without_errors_get_a_generic_message() {
        let report = EngineReport::new(EngineStatus::Timeout, 1);
        let outcome = normalize(None, &report, Duration::from_millis(7), Vec::new());
        assert_eq!(outcome.error_message.as_deref(), Some("Execution failed"));
        assert_eq!(outcome.duration_ms, 7);

        let cancelled = normalize(
            None,
            &EngineReport::new(EngineStatus::Cancelled, 1),
            Duration::ZERO,
            Vec::new(),
        );
        assert_eq!(cancelled.error_message.as_deref(), Some("Run cancelled by user"));
    }
}

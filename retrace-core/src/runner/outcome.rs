use serde::{Deserialize, Serialize};

use crate::run::{ActionResultRecord, BrowserEngine, Run, RunCompletion, RunStats, RunStatus};

/// Status of one finished execution, before it is written as a [`RunStatus`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    Passed,
    Failed,
    Cancelled,
}

impl OutcomeStatus {
    pub fn run_status(self) -> RunStatus {
        match self {
            OutcomeStatus::Passed => RunStatus::Passed,
            OutcomeStatus::Failed => RunStatus::Failed,
            OutcomeStatus::Cancelled => RunStatus::Cancelled,
        }
    }
}

/// Any cancelled engine cancels the run; otherwise the run passes only if
/// every engine passed.
pub fn aggregate_status(statuses: &[OutcomeStatus]) -> OutcomeStatus {
    if statuses.contains(&OutcomeStatus::Cancelled) {
        OutcomeStatus::Cancelled
    } else if statuses.iter().all(|status| *status == OutcomeStatus::Passed) {
        OutcomeStatus::Passed
    } else {
        OutcomeStatus::Failed
    }
}

/// Result of one engine executing one recording.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionOutcome {
    pub browser: Option<BrowserEngine>,
    pub status: OutcomeStatus,
    pub duration_ms: i64,
    pub stats: RunStats,
    pub error_message: Option<String>,
    pub error_action_id: Option<String>,
    pub video_path: Option<String>,
    pub screenshot_paths: Vec<String>,
    pub action_results: Vec<ActionResultRecord>,
}

impl ExecutionOutcome {
    /// An execution that never produced a report. Counts start at zero; the
    /// caller fills in whatever the recorder saw before the engine stopped.
    pub fn aborted(
        browser: Option<BrowserEngine>,
        status: OutcomeStatus,
        error_message: impl Into<String>,
        error_action_id: Option<String>,
        duration_ms: i64,
    ) -> Self {
        Self {
            browser,
            status,
            duration_ms,
            stats: RunStats::default(),
            error_message: Some(error_message.into()),
            error_action_id,
            video_path: None,
            screenshot_paths: Vec::new(),
            action_results: Vec::new(),
        }
    }

    pub fn completion(&self) -> RunCompletion {
        RunCompletion {
            status: self.status.run_status(),
            stats: self.stats,
            duration_ms: self.duration_ms,
            error_message: self.error_message.clone(),
            error_action_id: self.error_action_id.clone(),
            video_path: self.video_path.clone(),
            screenshot_paths: self.screenshot_paths.clone(),
        }
    }
}

/// Run-level view over one or more executions.
#[derive(Debug, Clone, PartialEq)]
pub struct RunOutcome {
    pub status: OutcomeStatus,
    pub duration_ms: i64,
    pub stats: RunStats,
    pub error_message: Option<String>,
    pub error_action_id: Option<String>,
    pub video_path: Option<String>,
    pub screenshot_paths: Vec<String>,
    pub executions: Vec<ExecutionOutcome>,
    pub multi_browser: bool,
}

impl RunOutcome {
    pub fn single(execution: ExecutionOutcome) -> Self {
        Self {
            status: execution.status,
            duration_ms: execution.duration_ms,
            stats: execution.stats,
            error_message: execution.error_message.clone(),
            error_action_id: execution.error_action_id.clone(),
            video_path: execution.video_path.clone(),
            screenshot_paths: execution.screenshot_paths.clone(),
            executions: vec![execution],
            multi_browser: false,
        }
    }

    /// Folds per-engine outcomes (in request order) into the run outcome.
    /// `duration_ms` is the wall-clock time of the whole fan-out.
    pub fn aggregate(executions: Vec<ExecutionOutcome>, duration_ms: i64) -> Self {
        let statuses: Vec<OutcomeStatus> =
            executions.iter().map(|execution| execution.status).collect();
        let mut stats = RunStats::default();
        let mut screenshot_paths: Vec<String> = Vec::new();
        for execution in &executions {
            stats += execution.stats;
            for path in &execution.screenshot_paths {
                if !screenshot_paths.contains(path) {
                    screenshot_paths.push(path.clone());
                }
            }
        }
        let first_error = executions.iter().find(|execution| {
            execution
                .error_message
                .as_deref()
                .is_some_and(|message| !message.is_empty())
        });

        Self {
            status: aggregate_status(&statuses),
            duration_ms,
            stats,
            error_message: first_error.and_then(|execution| execution.error_message.clone()),
            error_action_id: first_error.and_then(|execution| execution.error_action_id.clone()),
            video_path: executions
                .iter()
                .find_map(|execution| execution.video_path.clone()),
            screenshot_paths,
            executions,
            multi_browser: true,
        }
    }

    pub fn completion(&self) -> RunCompletion {
        RunCompletion {
            status: self.status.run_status(),
            stats: self.stats,
            duration_ms: self.duration_ms,
            error_message: self.error_message.clone(),
            error_action_id: self.error_action_id.clone(),
            video_path: self.video_path.clone(),
            screenshot_paths: self.screenshot_paths.clone(),
        }
    }

    pub fn browser_summaries(&self) -> Option<Vec<BrowserSummary>> {
        if !self.multi_browser {
            return None;
        }
        Some(
            self.executions
                .iter()
                .filter_map(|execution| {
                    execution.browser.map(|browser| BrowserSummary {
                        browser,
                        status: execution.status.run_status(),
                        duration_ms: execution.duration_ms,
                        actions_executed: execution.stats.actions_executed,
                        actions_failed: execution.stats.actions_failed,
                        error_message: execution.error_message.clone(),
                    })
                })
                .collect(),
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BrowserSummary {
    pub browser: BrowserEngine,
    pub status: RunStatus,
    pub duration_ms: i64,
    pub actions_executed: i64,
    pub actions_failed: i64,
    pub error_message: Option<String>,
}

/// What `process_job` hands back to the queue.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunResult {
    pub run_id: String,
    pub status: RunStatus,
    pub duration_ms: i64,
    pub actions_executed: i64,
    pub actions_failed: i64,
    pub error_message: Option<String>,
    pub video_path: Option<String>,
    pub screenshot_paths: Vec<String>,
    pub browser_results: Option<Vec<BrowserSummary>>,
}

impl RunResult {
    pub fn bare(run_id: impl Into<String>, status: RunStatus, error: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            status,
            duration_ms: 0,
            actions_executed: 0,
            actions_failed: 0,
            error_message: Some(error.into()),
            video_path: None,
            screenshot_paths: Vec::new(),
            browser_results: None,
        }
    }

    pub fn from_run(run: &Run) -> Self {
        Self {
            run_id: run.run_id.clone(),
            status: run.status,
            duration_ms: run.duration_ms.unwrap_or_default(),
            actions_executed: run.stats.actions_executed,
            actions_failed: run.stats.actions_failed,
            error_message: run.error_message.clone(),
            video_path: run.video_path.clone(),
            screenshot_paths: run.screenshot_paths.clone(),
            browser_results: None,
        }
    }

    pub fn from_outcome(run_id: impl Into<String>, status: RunStatus, outcome: &RunOutcome) -> Self {
        Self {
            run_id: run_id.into(),
            status,
            duration_ms: outcome.duration_ms,
            actions_executed: outcome.stats.actions_executed,
            actions_failed: outcome.stats.actions_failed,
            error_message: outcome.error_message.clone(),
            video_path: outcome.video_path.clone(),
            screenshot_paths: outcome.screenshot_paths.clone(),
            browser_results: outcome.browser_summaries(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [OutcomeStatus; 3] = [
        OutcomeStatus::Passed,
        OutcomeStatus::Failed,
        OutcomeStatus::Cancelled,
    ];

    fn vectors(len: usize) -> Vec<Vec<OutcomeStatus>> {
        (0..len).fold(vec![Vec::new()], |acc, _| {
            acc.into_iter()
                .flat_map(|prefix| {
                    ALL.iter().map(move |status| {
                        let mut next = prefix.clone();
                        next.push(*status);
                        next
                    })
                })
                .collect()
        })
    }

    #[test]
    fn aggregation_holds_for_every_small_status_vector() {
        for len in 1..=4 {
            for statuses in vectors(len) {
                let expected = if statuses.contains(&OutcomeStatus::Cancelled) {
                    OutcomeStatus::Cancelled
                } else if statuses.iter().all(|s| *s == OutcomeStatus::Passed) {
                    OutcomeStatus::Passed
                } else {
                    OutcomeStatus::Failed
                };
                assert_eq!(aggregate_status(&statuses), expected, "{statuses:?}");
            }
        }
    }

    fn execution(browser: BrowserEngine, status: OutcomeStatus, error: Option<&str>) -> ExecutionOutcome {
        ExecutionOutcome {
            browser: Some(browser),
            status,
            duration_ms: 100,
            stats: RunStats::from_counts(5, if status == OutcomeStatus::Passed { 5 } else { 2 }, 1),
            error_message: error.map(str::to_string),
            error_action_id: error.map(|_| "act_001".to_string()),
            video_path: Some(format!("{browser}.webm")),
            screenshot_paths: vec!["shared.png".into(), format!("{browser}.png")],
            action_results: Vec::new(),
        }
    }

    #[test]
    fn aggregate_sums_counts_and_keeps_first_error_in_engine_order() {
        let outcome = RunOutcome::aggregate(
            vec![
                execution(BrowserEngine::Chromium, OutcomeStatus::Passed, Some("")),
                execution(BrowserEngine::Firefox, OutcomeStatus::Failed, Some("Element not found")),
                execution(BrowserEngine::Webkit, OutcomeStatus::Failed, Some("Timeout")),
            ],
            250,
        );
        assert_eq!(outcome.status, OutcomeStatus::Failed);
        assert_eq!(outcome.stats.actions_total, 15);
        assert_eq!(
            outcome.stats.actions_executed + outcome.stats.actions_skipped,
            outcome.stats.actions_total
        );
        assert_eq!(outcome.error_message.as_deref(), Some("Element not found"));
        assert_eq!(outcome.video_path.as_deref(), Some("chromium.webm"));
        assert_eq!(outcome.screenshot_paths.len(), 4);
        assert_eq!(outcome.duration_ms, 250);
        assert_eq!(outcome.browser_summaries().unwrap().len(), 3);
    }

    #[test]
    fn run_video_comes_from_the_first_engine_that_recorded_one() {
        let mut chromium = execution(BrowserEngine::Chromium, OutcomeStatus::Failed, Some("boom"));
        chromium.video_path = None;
        let outcome = RunOutcome::aggregate(
            vec![
                chromium,
                execution(BrowserEngine::Firefox, OutcomeStatus::Passed, None),
                execution(BrowserEngine::Webkit, OutcomeStatus::Passed, None),
            ],
            90,
        );
        assert_eq!(outcome.video_path.as_deref(), Some("firefox.webm"));
        assert_eq!(outcome.completion().video_path.as_deref(), Some("firefox.webm"));
    }

    #[test]
    fn single_outcomes_have_no_browser_summaries() {
        let outcome = RunOutcome::single(execution(BrowserEngine::Chromium, OutcomeStatus::Passed, None));
        assert!(outcome.browser_summaries().is_none());
        assert_eq!(outcome.completion().status, RunStatus::Passed);
    }
}

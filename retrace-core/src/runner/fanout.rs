use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use futures::future::join_all;
use tracing::{info, warn};

use super::outcome::{ExecutionOutcome, OutcomeStatus, RunOutcome};
use super::unit::{ExecutionSettings, ExecutionUnit};
use crate::engine::CancelSignal;
use crate::run::store::CANCELLED_BY_USER;
use crate::run::{BrowserEngine, Recording, RunStore};

/// Runs one recording on several engines and folds the results. A failing
/// engine is recorded on its own browser result and never stops siblings.
#[derive(Clone)]
pub struct FanoutCoordinator {
    unit: ExecutionUnit,
    store: Arc<dyn RunStore>,
}

impl FanoutCoordinator {
    pub fn new(unit: ExecutionUnit, store: Arc<dyn RunStore>) -> Self {
        Self { unit, store }
    }

    pub async fn run(
        &self,
        run_id: &str,
        browsers: &[BrowserEngine],
        parallel: bool,
        recording: &Recording,
        settings: &ExecutionSettings,
        cancel: CancelSignal,
    ) -> RunOutcome {
        let browsers = distinct(browsers);
        let started = Instant::now();
        let concurrent = parallel && browsers.len() > 1;
        info!(
            run_id = %run_id,
            engines = browsers.len(),
            parallel = concurrent,
            "fanning out recording across engines"
        );

        let executions = if concurrent {
            join_all(browsers.iter().map(|browser| {
                self.run_engine(run_id, *browser, recording, settings, cancel.clone())
            }))
            .await
        } else {
            let mut executions = Vec::with_capacity(browsers.len());
            for browser in &browsers {
                executions.push(
                    self.run_engine(run_id, *browser, recording, settings, cancel.clone())
                        .await,
                );
            }
            executions
        };

        RunOutcome::aggregate(executions, started.elapsed().as_millis() as i64)
    }

    /// An engine error still completes the browser result, with the counts
    /// of the action rows recorded before it.
    async fn run_engine(
        &self,
        run_id: &str,
        browser: BrowserEngine,
        recording: &Recording,
        settings: &ExecutionSettings,
        cancel: CancelSignal,
    ) -> ExecutionOutcome {
        if let Err(err) = self
            .store
            .mark_browser_running(run_id, browser, Utc::now())
            .await
        {
            warn!(run_id = %run_id, browser = %browser, error = %err, "could not mark browser result running");
        }

        let started = Instant::now();
        let outcome = match self
            .unit
            .execute(run_id, browser, true, recording, settings, cancel)
            .await
        {
            Ok(outcome) => outcome,
            Err(failure) => {
                let elapsed_ms = started.elapsed().as_millis() as i64;
                let mut outcome = if failure.error.is_cancellation() {
                    ExecutionOutcome::aborted(
                        Some(browser),
                        OutcomeStatus::Cancelled,
                        CANCELLED_BY_USER,
                        None,
                        elapsed_ms,
                    )
                } else {
                    warn!(run_id = %run_id, browser = %browser, error = %failure.error, "engine execution failed");
                    ExecutionOutcome::aborted(
                        Some(browser),
                        OutcomeStatus::Failed,
                        failure.error.to_string(),
                        failure.error.action_id().map(str::to_string),
                        elapsed_ms,
                    )
                };
                outcome.stats = failure.stats;
                outcome.action_results = failure.action_results;
                outcome
            }
        };

        if let Err(err) = self
            .store
            .complete_browser_result(run_id, browser, &outcome.completion())
            .await
        {
            warn!(run_id = %run_id, browser = %browser, error = %err, "could not complete browser result");
        }
        outcome
    }
}

/// Request order with duplicates removed; an empty request means Chromium.
fn distinct(browsers: &[BrowserEngine]) -> Vec<BrowserEngine> {
    let mut unique = Vec::with_capacity(browsers.len());
    for browser in browsers {
        if !unique.contains(browser) {
            unique.push(*browser);
        }
    }
    if unique.is_empty() {
        unique.push(BrowserEngine::Chromium);
    }
    unique
}

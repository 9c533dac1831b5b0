use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::debug;
use uuid::Uuid;

use super::side_effects::SideEffects;
use crate::engine::{ActionFailure, EngineReport, Reporter, ScreenshotCapture};
use crate::progress::{EventSink, ProgressEvent};
use crate::run::{ActionOutcome, ActionResultRecord, BrowserEngine, RecordedAction, RunStore};

/// Turns engine callbacks into action rows and progress events. Rows are
/// kept in memory and persisted in the background; a failed insert only
/// loses that row.
pub struct ActionRecorder {
    run_id: String,
    browser: Option<BrowserEngine>,
    store: Arc<dyn RunStore>,
    events: EventSink,
    effects: SideEffects,
    records: Vec<ActionResultRecord>,
    started: HashMap<usize, DateTime<Utc>>,
    expected: usize,
}

impl ActionRecorder {
    pub fn new(
        run_id: impl Into<String>,
        browser: Option<BrowserEngine>,
        store: Arc<dyn RunStore>,
        events: EventSink,
    ) -> Self {
        Self {
            run_id: run_id.into(),
            browser,
            store,
            events,
            effects: SideEffects::new(),
            records: Vec::new(),
            started: HashMap::new(),
            expected: 0,
        }
    }

    pub fn records(&self) -> &[ActionResultRecord] {
        &self.records
    }

    pub fn into_records(self) -> Vec<ActionResultRecord> {
        self.records
    }

    /// Waits for the background inserts issued so far.
    pub async fn settle(&self) {
        self.effects.settle().await;
    }

    /// Attaches screenshots reported at the end of an execution to the
    /// matching records (latest record per action id) and backfills the
    /// stored rows.
    pub fn apply_screenshots(&mut self, captures: &[ScreenshotCapture]) {
        for capture in captures {
            let Some(record) = self
                .records
                .iter_mut()
                .rev()
                .find(|record| record.action_id == capture.action_id)
            else {
                debug!(
                    run_id = %self.run_id,
                    action_id = %capture.action_id,
                    "screenshot reported for unknown action"
                );
                continue;
            };
            if record.screenshot_path.as_deref() == Some(capture.path.as_str()) {
                continue;
            }
            record.screenshot_path = Some(capture.path.clone());

            let store = Arc::clone(&self.store);
            let result_id = record.result_id.clone();
            let path = capture.path.clone();
            self.effects
                .spawn(format!("screenshot backfill {result_id}"), async move {
                    store.set_action_screenshot(&result_id, &path).await
                });
        }
    }

    fn record(
        &mut self,
        action: &RecordedAction,
        index: usize,
        outcome: ActionOutcome,
        elapsed: Option<Duration>,
        failure: Option<&ActionFailure>,
    ) {
        let completed_at = Utc::now();
        let duration_ms = elapsed.map(|elapsed| elapsed.as_millis() as i64);
        let started_at = self.started.remove(&index).or_else(|| {
            elapsed
                .and_then(|elapsed| chrono::Duration::from_std(elapsed).ok())
                .map(|elapsed| completed_at - elapsed)
        });
        let record = ActionResultRecord {
            result_id: Uuid::new_v4().to_string(),
            run_id: self.run_id.clone(),
            browser: self.browser,
            action_id: action.id.clone(),
            action_type: action.action_type.clone(),
            index: index as i64,
            outcome,
            duration_ms,
            started_at,
            completed_at: Some(completed_at),
            selector: action.selectors.primary(),
            error_message: failure.map(|failure| failure.message.clone()),
            error_stack: failure.and_then(|failure| failure.stack.clone()),
            screenshot_path: failure.and_then(|failure| failure.screenshot_path.clone()),
        };

        let store = Arc::clone(&self.store);
        let persisted = record.clone();
        self.effects.spawn(
            format!("action result {} #{}", persisted.action_id, persisted.index),
            async move { store.insert_action_result(&persisted).await },
        );
        self.records.push(record);
    }
}

impl Reporter for ActionRecorder {
    fn on_start(&mut self, total_actions: usize) {
        self.expected = total_actions;
        debug!(run_id = %self.run_id, browser = ?self.browser, total_actions, "engine started");
    }

    fn on_action_start(&mut self, action: &RecordedAction, index: usize) {
        self.started.insert(index, Utc::now());
        self.events.emit(ProgressEvent::ActionStarted {
            run_id: self.run_id.clone(),
            browser: self.browser,
            action_id: action.id.clone(),
            action_type: action.action_type.clone(),
            index,
        });
    }

    fn on_action_success(&mut self, action: &RecordedAction, index: usize, elapsed: Duration) {
        self.record(action, index, ActionOutcome::Success, Some(elapsed), None);
        self.events.emit(ProgressEvent::ActionSucceeded {
            run_id: self.run_id.clone(),
            browser: self.browser,
            action_id: action.id.clone(),
            index,
            duration_ms: elapsed.as_millis() as i64,
        });
    }

    fn on_action_error(
        &mut self,
        action: &RecordedAction,
        index: usize,
        failure: &ActionFailure,
        elapsed: Duration,
    ) {
        self.record(action, index, ActionOutcome::Failed, Some(elapsed), Some(failure));
        self.events.emit(ProgressEvent::ActionFailed {
            run_id: self.run_id.clone(),
            browser: self.browser,
            action_id: action.id.clone(),
            index,
            duration_ms: elapsed.as_millis() as i64,
            error: failure.message.clone(),
            screenshot_path: failure.screenshot_path.clone(),
        });
    }

    fn on_action_skipped(&mut self, action: &RecordedAction, index: usize, reason: &str) {
        self.record(action, index, ActionOutcome::Skipped, None, None);
        self.events.emit(ProgressEvent::ActionSkipped {
            run_id: self.run_id.clone(),
            browser: self.browser,
            action_id: action.id.clone(),
            index,
            reason: reason.to_string(),
        });
    }

    fn on_complete(&mut self, report: &EngineReport) {
        debug!(
            run_id = %self.run_id,
            browser = ?self.browser,
            status = ?report.status,
            recorded = self.records.len(),
            expected = self.expected,
            "engine finished"
        );
    }
}

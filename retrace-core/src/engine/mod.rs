mod chromium;
mod error;
mod signal;

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::run::{BrowserEngine, RecordedAction, Recording};

pub use chromium::ChromiumEngine;
pub use error::{EngineError, EngineResult, CANCELLATION_MARKER};
pub use signal::{cancel_pair, CancelSignal, CancelTrigger};

#[derive(Debug, Clone)]
pub struct ExecutionOptions {
    pub browser: BrowserEngine,
    pub headless: bool,
    pub timeout: Option<Duration>,
    pub record_video: bool,
    pub capture_screenshots: bool,
    pub artifacts_dir: PathBuf,
    pub cancel: CancelSignal,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EngineStatus {
    Success,
    Failure,
    Cancelled,
    Timeout,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EngineActionError {
    pub action_id: String,
    pub error: String,
    #[serde(default)]
    pub stack: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScreenshotCapture {
    pub action_id: String,
    pub path: String,
}

/// What the engine reports once it stops driving the browser.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EngineReport {
    pub status: EngineStatus,
    pub duration_ms: i64,
    pub actions_total: i64,
    pub actions_executed: i64,
    pub actions_failed: i64,
    pub actions_skipped: i64,
    pub errors: Vec<EngineActionError>,
    pub video_path: Option<String>,
    pub screenshots: Vec<ScreenshotCapture>,
}

impl EngineReport {
    pub fn new(status: EngineStatus, actions_total: i64) -> Self {
        Self {
            status,
            duration_ms: 0,
            actions_total,
            actions_executed: 0,
            actions_failed: 0,
            actions_skipped: 0,
            errors: Vec::new(),
            video_path: None,
            screenshots: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ActionFailure {
    pub message: String,
    pub stack: Option<String>,
    pub screenshot_path: Option<String>,
}

impl ActionFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            stack: None,
            screenshot_path: None,
        }
    }
}

/// Progress callbacks the engine invokes synchronously while replaying.
pub trait Reporter: Send {
    fn on_start(&mut self, total_actions: usize);

    fn on_action_start(&mut self, action: &RecordedAction, index: usize);

    fn on_action_success(&mut self, action: &RecordedAction, index: usize, elapsed: Duration);

    fn on_action_error(
        &mut self,
        action: &RecordedAction,
        index: usize,
        failure: &ActionFailure,
        elapsed: Duration,
    );

    fn on_action_skipped(&mut self, action: &RecordedAction, index: usize, reason: &str);

    fn on_complete(&mut self, report: &EngineReport);
}

/// Drives a browser through a recording. Implementations must watch
/// `options.cancel` and unwind with [`EngineError::Cancelled`] once it fires.
#[async_trait]
pub trait ExecutionEngine: Send + Sync {
    async fn execute(
        &self,
        recording: &Recording,
        options: &ExecutionOptions,
        reporter: &mut dyn Reporter,
    ) -> EngineResult<EngineReport>;
}

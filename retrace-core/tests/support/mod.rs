#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;

use retrace_core::engine::{
    ActionFailure, EngineActionError, EngineError, EngineReport, EngineResult, EngineStatus,
    ExecutionEngine, ExecutionOptions, Reporter, ScreenshotCapture,
};
use retrace_core::progress::{ChannelPublisher, ProgressEvent};
use retrace_core::run::{RecordedAction, SelectorSet};
use retrace_core::{
    BrowserEngine, ExecutionSection, OrchestratorConfig, Recording, Run, RunKind,
    RunOrchestrator, SqliteRunStore, TestDefinition,
};

pub const USER: &str = "user-1";

#[derive(Debug, Clone)]
pub enum Script {
    Pass,
    FailAt {
        action_id: &'static str,
        message: &'static str,
        screenshot: bool,
    },
    Error(&'static str),
    /// Completes `completed` actions, then the engine itself errors out.
    CrashAfter {
        completed: usize,
        message: &'static str,
    },
    /// Completes the first action, then blocks until the cancel signal fires.
    WaitForCancel,
    Sleep(Duration),
}

pub struct ScriptedEngine {
    default: Script,
    per_browser: HashMap<BrowserEngine, Script>,
    calls: AtomicUsize,
}

impl ScriptedEngine {
    pub fn new(default: Script) -> Self {
        Self {
            default,
            per_browser: HashMap::new(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with(mut self, browser: BrowserEngine, script: Script) -> Self {
        self.per_browser.insert(browser, script);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ExecutionEngine for ScriptedEngine {
    async fn execute(
        &self,
        recording: &Recording,
        options: &ExecutionOptions,
        reporter: &mut dyn Reporter,
    ) -> EngineResult<EngineReport> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let script = self
            .per_browser
            .get(&options.browser)
            .cloned()
            .unwrap_or_else(|| self.default.clone());
        let total = recording.actions.len();
        reporter.on_start(total);

        match script {
            Script::Error(message) => return Err(EngineError::Other(message.to_string())),
            Script::CrashAfter { completed, message } => {
                for (index, action) in recording.actions.iter().take(completed).enumerate() {
                    reporter.on_action_start(action, index);
                    reporter.on_action_success(action, index, Duration::from_millis(2));
                }
                return Err(EngineError::Other(message.to_string()));
            }
            Script::WaitForCancel => {
                if let Some(first) = recording.actions.first() {
                    reporter.on_action_start(first, 0);
                    reporter.on_action_success(first, 0, Duration::from_millis(3));
                }
                options.cancel.cancelled().await;
                return Err(EngineError::cancelled());
            }
            Script::Sleep(duration) => tokio::time::sleep(duration).await,
            Script::Pass | Script::FailAt { .. } => {}
        }

        let mut report = EngineReport::new(EngineStatus::Success, total as i64);
        let mut halted = false;
        for (index, action) in recording.actions.iter().enumerate() {
            if halted {
                reporter.on_action_skipped(action, index, "previous action failed");
                report.actions_skipped += 1;
                continue;
            }
            reporter.on_action_start(action, index);
            report.actions_executed += 1;
            match &script {
                Script::FailAt {
                    action_id,
                    message,
                    screenshot,
                } if action.id == *action_id => {
                    report.actions_failed += 1;
                    report.errors.push(EngineActionError {
                        action_id: action.id.clone(),
                        error: message.to_string(),
                        stack: Some(format!("at {}", action.action_type)),
                    });
                    if *screenshot {
                        report.screenshots.push(ScreenshotCapture {
                            action_id: action.id.clone(),
                            path: options
                                .artifacts_dir
                                .join(format!("{}.png", action.id))
                                .display()
                                .to_string(),
                        });
                    }
                    let mut failure = ActionFailure::new(*message);
                    failure.stack = Some(format!("at {}", action.action_type));
                    reporter.on_action_error(action, index, &failure, Duration::from_millis(4));
                    halted = true;
                }
                _ => reporter.on_action_success(action, index, Duration::from_millis(2)),
            }
        }
        if report.actions_failed > 0 {
            report.status = EngineStatus::Failure;
        }
        report.duration_ms = 25;
        reporter.on_complete(&report);
        Ok(report)
    }
}

pub fn recording(recording_id: &str, user_id: &str, actions: usize) -> Recording {
    let actions = (1..=actions)
        .map(|n| {
            let mut action = RecordedAction::new(format!("act_{n:03}"), "click");
            action.selectors = SelectorSet {
                css: Some(format!("#step-{n}")),
                text: Some(format!("Step {n}")),
                ..SelectorSet::default()
            };
            action
        })
        .collect();
    Recording::new(recording_id, user_id, "checkout", "https://shop.test/").with_actions(actions)
}

pub fn recording_run(run_id: &str, recording_id: &str) -> Run {
    let mut run = Run::new(run_id, USER, RunKind::Recording);
    run.recording_id = Some(recording_id.to_string());
    run.browsers = vec![BrowserEngine::Chromium];
    run
}

pub fn test_run(run_id: &str, test_id: &str, browsers: &[BrowserEngine]) -> Run {
    let mut run = Run::new(run_id, USER, RunKind::Test);
    run.test_id = Some(test_id.to_string());
    run.browsers = browsers.to_vec();
    run
}

pub fn test_definition(test_id: &str, recording_id: &str, browsers: &[BrowserEngine]) -> TestDefinition {
    let mut test = TestDefinition::new(test_id, USER, recording_id, "checkout flow");
    test.browsers = browsers.to_vec();
    test
}

pub struct Harness {
    pub dir: TempDir,
    pub store: SqliteRunStore,
    pub engine: Arc<ScriptedEngine>,
    pub channel: ChannelPublisher,
    pub orchestrator: RunOrchestrator,
}

impl Harness {
    pub fn new(engine: ScriptedEngine) -> Self {
        let dir = TempDir::new().expect("tempdir");
        let store = SqliteRunStore::builder()
            .path(dir.path().join("runs.sqlite"))
            .create_if_missing(true)
            .build()
            .expect("build store");
        store.initialize().expect("initialize store");
        Self::with_store(dir, store.clone(), Arc::new(store), engine)
    }

    pub fn with_store(
        dir: TempDir,
        store: SqliteRunStore,
        runtime_store: Arc<dyn retrace_core::RunStore>,
        engine: ScriptedEngine,
    ) -> Self {
        let engine = Arc::new(engine);
        let channel = ChannelPublisher::new(512);
        let config = OrchestratorConfig {
            cancellation_poll: Duration::from_millis(50),
            artifacts_dir: dir.path().join("artifacts"),
            defaults: ExecutionSection::default(),
        };
        let orchestrator = RunOrchestrator::new(
            runtime_store,
            engine.clone(),
            Arc::new(channel.clone()),
            config,
        );
        Self {
            dir,
            store,
            engine,
            channel,
            orchestrator,
        }
    }
}

pub fn drain(rx: &mut tokio::sync::broadcast::Receiver<ProgressEvent>) -> Vec<ProgressEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

/// Terminal status and completion timestamp must go together, and skipped
/// actions fill the gap between executed and total.
pub fn assert_consistent(run: &Run) {
    assert_eq!(
        run.status.terminal(),
        run.completed_at.is_some(),
        "status {} with completed_at {:?}",
        run.status,
        run.completed_at
    );
    assert_eq!(
        run.stats.actions_executed + run.stats.actions_skipped,
        run.stats.actions_total,
        "{:?}",
        run.stats
    );
}

mod publisher;
mod sink;

use serde::{Deserialize, Serialize};

use crate::run::{ActionSummary, BrowserEngine, RunStatus};

pub use publisher::{
    publisher_from_config, ChannelPublisher, FanoutPublisher, NoopPublisher, ProgressPublisher,
    PublishError, WebhookPublisher,
};
pub use sink::EventSink;

/// Live progress for dashboards. `browser` is set only for multi-browser
/// runs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    RunStarted {
        run_id: String,
        browser: Option<BrowserEngine>,
        total_actions: i64,
        actions: Vec<ActionSummary>,
    },
    ActionStarted {
        run_id: String,
        browser: Option<BrowserEngine>,
        action_id: String,
        action_type: String,
        index: usize,
    },
    ActionSucceeded {
        run_id: String,
        browser: Option<BrowserEngine>,
        action_id: String,
        index: usize,
        duration_ms: i64,
    },
    ActionFailed {
        run_id: String,
        browser: Option<BrowserEngine>,
        action_id: String,
        index: usize,
        duration_ms: i64,
        error: String,
        screenshot_path: Option<String>,
    },
    ActionSkipped {
        run_id: String,
        browser: Option<BrowserEngine>,
        action_id: String,
        index: usize,
        reason: String,
    },
    RunCompleted {
        run_id: String,
        status: RunStatus,
        duration_ms: i64,
        actions_executed: i64,
        actions_failed: i64,
        actions_skipped: i64,
        error_message: Option<String>,
    },
    RunError {
        run_id: String,
        error: String,
    },
}

impl ProgressEvent {
    pub fn run_id(&self) -> &str {
        match self {
            ProgressEvent::RunStarted { run_id, .. }
            | ProgressEvent::ActionStarted { run_id, .. }
            | ProgressEvent::ActionSucceeded { run_id, .. }
            | ProgressEvent::ActionFailed { run_id, .. }
            | ProgressEvent::ActionSkipped { run_id, .. }
            | ProgressEvent::RunCompleted { run_id, .. }
            | ProgressEvent::RunError { run_id, .. } => run_id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ProgressEvent::RunStarted { .. } => "run_started",
            ProgressEvent::ActionStarted { .. } => "action_started",
            ProgressEvent::ActionSucceeded { .. } => "action_succeeded",
            ProgressEvent::ActionFailed { .. } => "action_failed",
            ProgressEvent::ActionSkipped { .. } => "action_skipped",
            ProgressEvent::RunCompleted { .. } => "run_completed",
            ProgressEvent::RunError { .. } => "run_error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ProgressEvent::RunCompleted { .. } | ProgressEvent::RunError { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_are_tagged_by_type() {
        let event = ProgressEvent::ActionSkipped {
            run_id: "run-1".into(),
            browser: Some(BrowserEngine::Firefox),
            action_id: "act_004".into(),
            index: 3,
            reason: "previous action failed".into(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "action_skipped");
        assert_eq!(json["browser"], "firefox");
        assert_eq!(event.kind(), "action_skipped");
        assert_eq!(event.run_id(), "run-1");
        assert!(!event.is_terminal());
    }

    #[test]
    fn terminal_events_carry_status() {
        let event: ProgressEvent = serde_json::from_str(
            r#"{"type":"run_completed","run_id":"r","status":"cancelled","duration_ms":10,
                "actions_executed":1,"actions_failed":0,"actions_skipped":2,
                "error_message":"Run cancelled by user"}"#,
        )
        .unwrap();
        assert!(event.is_terminal());
        match event {
            ProgressEvent::RunCompleted { status, .. } => assert_eq!(status, RunStatus::Cancelled),
            other => panic!("unexpected event {other:?}"),
        }
    }
}

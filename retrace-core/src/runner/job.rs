use serde::{Deserialize, Serialize};

use crate::run::{BrowserEngine, RunKind};

/// What the run targets. Serialized flat into the job payload under
/// `run_kind`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "run_kind", rename_all = "snake_case")]
pub enum RunTarget {
    Recording { recording_id: String },
    Test { test_id: String },
}

/// Queue payload for one run. Unset flags fall back to the test definition,
/// then to the configured execution defaults.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunJob {
    pub run_id: String,
    pub user_id: String,
    #[serde(flatten)]
    pub target: RunTarget,
    #[serde(default)]
    pub browsers: Vec<BrowserEngine>,
    #[serde(default)]
    pub parallel: Option<bool>,
    #[serde(default)]
    pub headless: Option<bool>,
    #[serde(default)]
    pub record_video: Option<bool>,
    #[serde(default)]
    pub capture_screenshots: Option<bool>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

impl RunJob {
    pub fn new(run_id: impl Into<String>, user_id: impl Into<String>, target: RunTarget) -> Self {
        Self {
            run_id: run_id.into(),
            user_id: user_id.into(),
            target,
            browsers: Vec::new(),
            parallel: None,
            headless: None,
            record_video: None,
            capture_screenshots: None,
            timeout_ms: None,
        }
    }

    pub fn for_recording(
        run_id: impl Into<String>,
        user_id: impl Into<String>,
        recording_id: impl Into<String>,
    ) -> Self {
        Self::new(
            run_id,
            user_id,
            RunTarget::Recording {
                recording_id: recording_id.into(),
            },
        )
    }

    pub fn for_test(
        run_id: impl Into<String>,
        user_id: impl Into<String>,
        test_id: impl Into<String>,
    ) -> Self {
        Self::new(
            run_id,
            user_id,
            RunTarget::Test {
                test_id: test_id.into(),
            },
        )
    }

    pub fn with_browsers(mut self, browsers: Vec<BrowserEngine>) -> Self {
        self.browsers = browsers;
        self
    }

    pub fn kind(&self) -> RunKind {
        match self.target {
            RunTarget::Recording { .. } => RunKind::Recording,
            RunTarget::Test { .. } => RunKind::Test,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_is_flat_with_run_kind_tag() {
        let mut job = RunJob::for_test("run-1", "user-1", "test-9")
            .with_browsers(vec![BrowserEngine::Chromium, BrowserEngine::Firefox]);
        job.parallel = Some(false);

        let json = serde_json::to_value(&job).unwrap();
        assert_eq!(json["run_kind"], "test");
        assert_eq!(json["test_id"], "test-9");
        assert_eq!(json["browsers"][1], "firefox");

        let decoded: RunJob = serde_json::from_value(json).unwrap();
        assert_eq!(decoded, job);
        assert_eq!(decoded.kind(), RunKind::Test);
    }

    #[test]
    fn minimal_payload_uses_defaults() {
        let job: RunJob = serde_json::from_str(
            r#"{"run_id":"r","user_id":"u","run_kind":"recording","recording_id":"rec"}"#,
        )
        .unwrap();
        assert_eq!(job.kind(), RunKind::Recording);
        assert!(job.browsers.is_empty());
        assert_eq!(job.timeout_ms, None);
    }
}

use std::fmt;
use std::ops::AddAssign;
use std::str::FromStr;

use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::Row;
use serde::{Deserialize, Serialize};

use crate::sqlite::{split_paths, to_utc};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RunKind {
    Recording,
    Test,
    Suite,
}

impl RunKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunKind::Recording => "recording",
            RunKind::Test => "test",
            RunKind::Suite => "suite",
        }
    }
}

impl fmt::Display for RunKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "recording" => Ok(RunKind::Recording),
            "test" => Ok(RunKind::Test),
            "suite" => Ok(RunKind::Suite),
            other => Err(format!("unknown run kind: {other}")),
        }
    }
}

/// Lifecycle of a run or of one engine's share of it.
///
/// `queued -> running -> passed | failed | cancelled`. `error` is the
/// terminal status of runs rejected before execution (missing or foreign
/// recording/test).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Queued,
    Running,
    Passed,
    Failed,
    Cancelled,
    Error,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Queued => "queued",
            RunStatus::Running => "running",
            RunStatus::Passed => "passed",
            RunStatus::Failed => "failed",
            RunStatus::Cancelled => "cancelled",
            RunStatus::Error => "error",
        }
    }

    pub fn terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Passed | RunStatus::Failed | RunStatus::Cancelled | RunStatus::Error
        )
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(RunStatus::Queued),
            "running" => Ok(RunStatus::Running),
            "passed" => Ok(RunStatus::Passed),
            "failed" => Ok(RunStatus::Failed),
            "cancelled" => Ok(RunStatus::Cancelled),
            "error" => Ok(RunStatus::Error),
            other => Err(format!("unknown run status: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum BrowserEngine {
    Chromium,
    Firefox,
    Webkit,
}

impl BrowserEngine {
    pub fn as_str(&self) -> &'static str {
        match self {
            BrowserEngine::Chromium => "chromium",
            BrowserEngine::Firefox => "firefox",
            BrowserEngine::Webkit => "webkit",
        }
    }

    /// Parses a comma separated engine list, dropping duplicates while
    /// keeping the first occurrence order.
    pub fn parse_list(value: &str) -> Result<Vec<BrowserEngine>, String> {
        let mut engines = Vec::new();
        for item in value.split(',').map(str::trim).filter(|item| !item.is_empty()) {
            let engine: BrowserEngine = item.parse()?;
            if !engines.contains(&engine) {
                engines.push(engine);
            }
        }
        Ok(engines)
    }

    pub fn join_list(engines: &[BrowserEngine]) -> String {
        engines
            .iter()
            .map(BrowserEngine::as_str)
            .collect::<Vec<_>>()
            .join(",")
    }
}

impl fmt::Display for BrowserEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BrowserEngine {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "chromium" | "chrome" => Ok(BrowserEngine::Chromium),
            "firefox" => Ok(BrowserEngine::Firefox),
            "webkit" | "safari" => Ok(BrowserEngine::Webkit),
            other => Err(format!("unknown browser engine: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ActionOutcome {
    Success,
    Failed,
    Skipped,
}

impl ActionOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionOutcome::Success => "success",
            ActionOutcome::Failed => "failed",
            ActionOutcome::Skipped => "skipped",
        }
    }
}

impl FromStr for ActionOutcome {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(ActionOutcome::Success),
            "failed" => Ok(ActionOutcome::Failed),
            "skipped" => Ok(ActionOutcome::Skipped),
            other => Err(format!("unknown action outcome: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunStats {
    pub actions_total: i64,
    pub actions_executed: i64,
    pub actions_failed: i64,
    pub actions_skipped: i64,
}

impl RunStats {
    pub fn from_counts(total: i64, executed: i64, failed: i64) -> Self {
        let executed = executed.clamp(0, total.max(0));
        Self {
            actions_total: total,
            actions_executed: executed,
            actions_failed: failed.max(0),
            actions_skipped: (total - executed).max(0),
        }
    }
}

impl AddAssign for RunStats {
    fn add_assign(&mut self, other: Self) {
        self.actions_total += other.actions_total;
        self.actions_executed += other.actions_executed;
        self.actions_failed += other.actions_failed;
        self.actions_skipped += other.actions_skipped;
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Run {
    pub run_id: String,
    pub user_id: String,
    pub project_id: Option<String>,
    pub kind: RunKind,
    pub parent_run_id: Option<String>,
    pub recording_id: Option<String>,
    pub test_id: Option<String>,
    pub browsers: Vec<BrowserEngine>,
    pub status: RunStatus,
    pub created_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub stats: RunStats,
    pub duration_ms: Option<i64>,
    pub error_message: Option<String>,
    pub error_action_id: Option<String>,
    pub video_path: Option<String>,
    pub screenshot_paths: Vec<String>,
}

impl Run {
    pub fn new(run_id: impl Into<String>, user_id: impl Into<String>, kind: RunKind) -> Self {
        Self {
            run_id: run_id.into(),
            user_id: user_id.into(),
            project_id: None,
            kind,
            parent_run_id: None,
            recording_id: None,
            test_id: None,
            browsers: Vec::new(),
            status: RunStatus::Queued,
            created_at: None,
            started_at: None,
            completed_at: None,
            stats: RunStats::default(),
            duration_ms: None,
            error_message: None,
            error_action_id: None,
            video_path: None,
            screenshot_paths: Vec::new(),
        }
    }

    /// A run is finished once its terminal write happened; an externally
    /// cancelled run keeps executing until its job records the outcome.
    pub fn is_finished(&self) -> bool {
        self.status.terminal() && self.completed_at.is_some()
    }

    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let created_at: Option<NaiveDateTime> = row.get("created_at")?;
        let started_at: Option<NaiveDateTime> = row.get("started_at")?;
        let completed_at: Option<NaiveDateTime> = row.get("completed_at")?;
        let browsers: String = row.get("browsers")?;
        Ok(Self {
            run_id: row.get("run_id")?,
            user_id: row.get("user_id")?,
            project_id: row.get("project_id")?,
            kind: row
                .get::<_, String>("kind")?
                .parse()
                .unwrap_or(RunKind::Recording),
            parent_run_id: row.get("parent_run_id")?,
            recording_id: row.get("recording_id")?,
            test_id: row.get("test_id")?,
            browsers: BrowserEngine::parse_list(&browsers).unwrap_or_default(),
            status: row
                .get::<_, String>("status")?
                .parse()
                .unwrap_or(RunStatus::Queued),
            created_at: to_utc(created_at),
            started_at: to_utc(started_at),
            completed_at: to_utc(completed_at),
            stats: RunStats {
                actions_total: row.get("actions_total")?,
                actions_executed: row.get("actions_executed")?,
                actions_failed: row.get("actions_failed")?,
                actions_skipped: row.get("actions_skipped")?,
            },
            duration_ms: row.get("duration_ms")?,
            error_message: row.get("error_message")?,
            error_action_id: row.get("error_action_id")?,
            video_path: row.get("video_path")?,
            screenshot_paths: split_paths(row.get("screenshot_paths")?),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BrowserResultRecord {
    pub run_id: String,
    pub browser: BrowserEngine,
    pub status: RunStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub stats: RunStats,
    pub duration_ms: Option<i64>,
    pub error_message: Option<String>,
    pub error_action_id: Option<String>,
    pub video_path: Option<String>,
    pub screenshot_paths: Vec<String>,
}

impl BrowserResultRecord {
    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let started_at: Option<NaiveDateTime> = row.get("started_at")?;
        let completed_at: Option<NaiveDateTime> = row.get("completed_at")?;
        Ok(Self {
            run_id: row.get("run_id")?,
            browser: row
                .get::<_, String>("browser")?
                .parse()
                .unwrap_or(BrowserEngine::Chromium),
            status: row
                .get::<_, String>("status")?
                .parse()
                .unwrap_or(RunStatus::Queued),
            started_at: to_utc(started_at),
            completed_at: to_utc(completed_at),
            stats: RunStats {
                actions_total: row.get("actions_total")?,
                actions_executed: row.get("actions_executed")?,
                actions_failed: row.get("actions_failed")?,
                actions_skipped: row.get("actions_skipped")?,
            },
            duration_ms: row.get("duration_ms")?,
            error_message: row.get("error_message")?,
            error_action_id: row.get("error_action_id")?,
            video_path: row.get("video_path")?,
            screenshot_paths: split_paths(row.get("screenshot_paths")?),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SelectorMetadata {
    pub kind: String,
    pub value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActionResultRecord {
    pub result_id: String,
    pub run_id: String,
    pub browser: Option<BrowserEngine>,
    pub action_id: String,
    pub action_type: String,
    pub index: i64,
    pub outcome: ActionOutcome,
    pub duration_ms: Option<i64>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub selector: Option<SelectorMetadata>,
    pub error_message: Option<String>,
    pub error_stack: Option<String>,
    pub screenshot_path: Option<String>,
}

impl ActionResultRecord {
    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let started_at: Option<NaiveDateTime> = row.get("started_at")?;
        let completed_at: Option<NaiveDateTime> = row.get("completed_at")?;
        let selector_kind: Option<String> = row.get("selector_kind")?;
        let selector_value: Option<String> = row.get("selector_value")?;
        Ok(Self {
            result_id: row.get("result_id")?,
            run_id: row.get("run_id")?,
            browser: row
                .get::<_, Option<String>>("browser")?
                .and_then(|value| value.parse().ok()),
            action_id: row.get("action_id")?,
            action_type: row.get("action_type")?,
            index: row.get("action_index")?,
            outcome: row
                .get::<_, String>("outcome")?
                .parse()
                .unwrap_or(ActionOutcome::Failed),
            duration_ms: row.get("duration_ms")?,
            started_at: to_utc(started_at),
            completed_at: to_utc(completed_at),
            selector: match (selector_kind, selector_value) {
                (Some(kind), Some(value)) => Some(SelectorMetadata { kind, value }),
                _ => None,
            },
            error_message: row.get("error_message")?,
            error_stack: row.get("error_stack")?,
            screenshot_path: row.get("screenshot_path")?,
        })
    }
}

/// Terminal write for a run or for one engine's browser result.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunCompletion {
    pub status: RunStatus,
    pub stats: RunStats,
    pub duration_ms: i64,
    pub error_message: Option<String>,
    pub error_action_id: Option<String>,
    pub video_path: Option<String>,
    pub screenshot_paths: Vec<String>,
}

impl RunCompletion {
    pub fn bare(status: RunStatus, error_message: Option<String>) -> Self {
        Self {
            status,
            stats: RunStats::default(),
            duration_ms: 0,
            error_message,
            error_action_id: None,
            video_path: None,
            screenshot_paths: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn browser_list_parsing_deduplicates_in_order() {
        let engines = BrowserEngine::parse_list("firefox, chromium,firefox,webkit").unwrap();
        assert_eq!(
            engines,
            vec![
                BrowserEngine::Firefox,
                BrowserEngine::Chromium,
                BrowserEngine::Webkit
            ]
        );
        assert_eq!(BrowserEngine::join_list(&engines), "firefox,chromium,webkit");
        assert!(BrowserEngine::parse_list("netscape").is_err());
    }

    #[test]
    fn stats_infer_skipped_from_executed() {
        let stats = RunStats::from_counts(5, 3, 1);
        assert_eq!(stats.actions_skipped, 2);
        assert_eq!(stats.actions_skipped + stats.actions_executed, stats.actions_total);

        let clamped = RunStats::from_counts(2, 7, 0);
        assert_eq!(clamped.actions_executed, 2);
        assert_eq!(clamped.actions_skipped, 0);
    }

    #[test]
    fn terminal_statuses() {
        assert!(!RunStatus::Queued.terminal());
        assert!(!RunStatus::Running.terminal());
        for status in [
            RunStatus::Passed,
            RunStatus::Failed,
            RunStatus::Cancelled,
            RunStatus::Error,
        ] {
            assert!(status.terminal());
            assert_eq!(status.as_str().parse::<RunStatus>().unwrap(), status);
        }
    }
}

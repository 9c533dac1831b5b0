use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::run::{Run, RunCompletion, RunStats, RunStatus, RunStore, StoreResult};

/// Completes a suite parent once every child run has finished. Safe to call
/// any number of times and from concurrently finishing siblings: the parent
/// is only ever completed once.
#[derive(Clone)]
pub struct SuiteReconciler {
    store: Arc<dyn RunStore>,
}

impl SuiteReconciler {
    pub fn new(store: Arc<dyn RunStore>) -> Self {
        Self { store }
    }

    /// Best-effort variant used after every run; failures are logged.
    pub async fn reconcile(&self, child_run_id: &str) {
        if let Err(err) = self.try_reconcile(child_run_id).await {
            warn!(run_id = %child_run_id, error = %err, "suite reconciliation failed");
        }
    }

    /// Returns the parent's persisted status when this call completed it.
    pub async fn try_reconcile(&self, child_run_id: &str) -> StoreResult<Option<RunStatus>> {
        let Some(child) = self.store.fetch_run(child_run_id).await? else {
            return Ok(None);
        };
        let Some(parent_id) = child.parent_run_id else {
            return Ok(None);
        };
        let Some(parent) = self.store.fetch_run(&parent_id).await? else {
            debug!(run_id = %child_run_id, parent_run_id = %parent_id, "parent run missing");
            return Ok(None);
        };
        if parent.is_finished() {
            return Ok(None);
        }

        let children = self.store.list_children(&parent_id).await?;
        let pending = children.iter().filter(|run| !run.is_finished()).count();
        if pending > 0 {
            debug!(parent_run_id = %parent_id, pending, "suite still has running children");
            return Ok(None);
        }

        let completion = suite_completion(&children);
        let persisted = self.store.complete_run(&parent_id, &completion).await?;
        if let Some(status) = persisted {
            info!(parent_run_id = %parent_id, status = %status, children = children.len(), "suite run completed");
        }
        Ok(persisted)
    }
}

/// `failed` if any child failed or errored, else `cancelled` if any child was
/// cancelled, else `passed`.
pub fn suite_status(children: &[Run]) -> RunStatus {
    if children
        .iter()
        .any(|run| matches!(run.status, RunStatus::Failed | RunStatus::Error))
    {
        RunStatus::Failed
    } else if children
        .iter()
        .any(|run| run.status == RunStatus::Cancelled)
    {
        RunStatus::Cancelled
    } else {
        RunStatus::Passed
    }
}

pub fn suite_completion(children: &[Run]) -> RunCompletion {
    let mut stats = RunStats::default();
    let mut duration_ms = 0;
    let mut errors = Vec::new();
    for child in children {
        stats += child.stats;
        duration_ms += child.duration_ms.unwrap_or_default();
        if let Some(message) = child.error_message.as_deref().filter(|m| !m.is_empty()) {
            errors.push(message);
        }
    }

    RunCompletion {
        status: suite_status(children),
        stats,
        duration_ms,
        error_message: (!errors.is_empty()).then(|| errors.join("; ")),
        error_action_id: None,
        video_path: None,
        screenshot_paths: Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::run::RunKind;

    fn child(status: RunStatus, duration: i64, error: Option<&str>) -> Run {
        let mut run = Run::new(format!("child-{duration}"), "user", RunKind::Test);
        run.status = status;
        run.duration_ms = Some(duration);
        run.stats = RunStats::from_counts(4, 4, 0);
        run.error_message = error.map(str::to_string);
        run
    }

    #[test]
    fn failed_beats_cancelled_beats_passed() {
        let passed = child(RunStatus::Passed, 1, None);
        let cancelled = child(RunStatus::Cancelled, 2, Some("Run cancelled by user"));
        let errored = child(RunStatus::Error, 3, Some("Recording not found"));

        assert_eq!(suite_status(&[passed.clone()]), RunStatus::Passed);
        assert_eq!(
            suite_status(&[passed.clone(), cancelled.clone()]),
            RunStatus::Cancelled
        );
        assert_eq!(
            suite_status(&[passed, cancelled.clone(), errored.clone()]),
            RunStatus::Failed
        );

        let completion = suite_completion(&[cancelled, errored]);
        assert_eq!(completion.duration_ms, 5);
        assert_eq!(completion.stats.actions_total, 8);
        assert_eq!(
            completion.error_message.as_deref(),
            Some("Run cancelled by user; Recording not found")
        );
    }
}

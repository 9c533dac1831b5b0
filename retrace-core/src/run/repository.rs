use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::catalog::{Recording, TestDefinition};
use super::models::{ActionResultRecord, BrowserEngine, Run, RunCompletion, RunStatus};
use super::store::SqliteRunStore;
use super::{StoreError, StoreResult};

/// Persistence operations the orchestrator performs while processing a job.
#[async_trait]
pub trait RunStore: Send + Sync {
    async fn fetch_run(&self, run_id: &str) -> StoreResult<Option<Run>>;

    async fn fetch_run_status(&self, run_id: &str) -> StoreResult<Option<RunStatus>>;

    async fn mark_run_running(&self, run_id: &str, at: DateTime<Utc>) -> StoreResult<bool>;

    async fn complete_run(
        &self,
        run_id: &str,
        completion: &RunCompletion,
    ) -> StoreResult<Option<RunStatus>>;

    async fn list_children(&self, parent_run_id: &str) -> StoreResult<Vec<Run>>;

    async fn fetch_recording(&self, recording_id: &str) -> StoreResult<Option<Recording>>;

    async fn fetch_test(&self, test_id: &str) -> StoreResult<Option<TestDefinition>>;

    async fn mark_browser_running(
        &self,
        run_id: &str,
        browser: BrowserEngine,
        at: DateTime<Utc>,
    ) -> StoreResult<()>;

    async fn complete_browser_result(
        &self,
        run_id: &str,
        browser: BrowserEngine,
        completion: &RunCompletion,
    ) -> StoreResult<()>;

    async fn insert_action_result(&self, record: &ActionResultRecord) -> StoreResult<()>;

    async fn set_action_screenshot(&self, result_id: &str, path: &str) -> StoreResult<()>;
}

impl SqliteRunStore {
    async fn blocking<T, F>(&self, op: F) -> StoreResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&SqliteRunStore) -> StoreResult<T> + Send + 'static,
    {
        let store = self.clone();
        tokio::task::spawn_blocking(move || op(&store))
            .await
            .map_err(|err| StoreError::Join(err.to_string()))?
    }
}

#[async_trait]
impl RunStore for SqliteRunStore {
    async fn fetch_run(&self, run_id: &str) -> StoreResult<Option<Run>> {
        let run_id = run_id.to_string();
        self.blocking(move |store| store.fetch_run(&run_id)).await
    }

    async fn fetch_run_status(&self, run_id: &str) -> StoreResult<Option<RunStatus>> {
        let run_id = run_id.to_string();
        self.blocking(move |store| store.fetch_run_status(&run_id))
            .await
    }

    async fn mark_run_running(&self, run_id: &str, at: DateTime<Utc>) -> StoreResult<bool> {
        let run_id = run_id.to_string();
        self.blocking(move |store| store.mark_run_running(&run_id, at))
            .await
    }

    async fn complete_run(
        &self,
        run_id: &str,
        completion: &RunCompletion,
    ) -> StoreResult<Option<RunStatus>> {
        let run_id = run_id.to_string();
        let completion = completion.clone();
        self.blocking(move |store| store.complete_run(&run_id, &completion))
            .await
    }

    async fn list_children(&self, parent_run_id: &str) -> StoreResult<Vec<Run>> {
        let parent_run_id = parent_run_id.to_string();
        self.blocking(move |store| store.list_children(&parent_run_id))
            .await
    }

    async fn fetch_recording(&self, recording_id: &str) -> StoreResult<Option<Recording>> {
        let recording_id = recording_id.to_string();
        self.blocking(move |store| store.fetch_recording(&recording_id))
            .await
    }

    async fn fetch_test(&self, test_id: &str) -> StoreResult<Option<TestDefinition>> {
        let test_id = test_id.to_string();
        self.blocking(move |store| store.fetch_test(&test_id)).await
    }

    async fn mark_browser_running(
        &self,
        run_id: &str,
        browser: BrowserEngine,
        at: DateTime<Utc>,
    ) -> StoreResult<()> {
        let run_id = run_id.to_string();
        self.blocking(move |store| store.mark_browser_running(&run_id, browser, at))
            .await
    }

    async fn complete_browser_result(
        &self,
        run_id: &str,
        browser: BrowserEngine,
        completion: &RunCompletion,
    ) -> StoreResult<()> {
        let run_id = run_id.to_string();
        let completion = completion.clone();
        self.blocking(move |store| store.complete_browser_result(&run_id, browser, &completion))
            .await
    }

    async fn insert_action_result(&self, record: &ActionResultRecord) -> StoreResult<()> {
        let record = record.clone();
        self.blocking(move |store| store.insert_action_result(&record))
            .await
    }

    async fn set_action_screenshot(&self, result_id: &str, path: &str) -> StoreResult<()> {
        let result_id = result_id.to_string();
        let path = path.to_string();
        self.blocking(move |store| store.set_action_screenshot(&result_id, &path))
            .await
    }
}

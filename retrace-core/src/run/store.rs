use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};

use super::catalog::{Recording, TestDefinition};
use super::models::{
    ActionResultRecord, BrowserEngine, BrowserResultRecord, Run, RunCompletion, RunStatus,
};
use super::{StoreError, StoreResult};
use crate::sqlite::{configure_connection, join_paths, RUNS_SCHEMA};

pub(crate) const CANCELLED_BY_USER: &str = "Run cancelled by user";

#[derive(Debug, Clone)]
pub struct SqliteRunStoreBuilder {
    path: Option<PathBuf>,
    read_only: bool,
    create_if_missing: bool,
}

impl Default for SqliteRunStoreBuilder {
    fn default() -> Self {
        Self {
            path: None,
            read_only: false,
            create_if_missing: true,
        }
    }
}

impl SqliteRunStoreBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn path(mut self, path: impl AsRef<Path>) -> Self {
        self.path = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn read_only(mut self, value: bool) -> Self {
        self.read_only = value;
        self
    }

    pub fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    pub fn build(self) -> StoreResult<SqliteRunStore> {
        let path = self.path.ok_or(StoreError::MissingStore)?;
        let mut flags = if self.read_only {
            OpenFlags::SQLITE_OPEN_READ_ONLY
        } else {
            OpenFlags::SQLITE_OPEN_READ_WRITE
        };

        if !self.read_only && self.create_if_missing {
            flags |= OpenFlags::SQLITE_OPEN_CREATE;
        }

        Ok(SqliteRunStore { path, flags })
    }
}

#[derive(Debug, Clone)]
pub struct SqliteRunStore {
    path: PathBuf,
    flags: OpenFlags,
}

impl SqliteRunStore {
    pub fn builder() -> SqliteRunStoreBuilder {
        SqliteRunStoreBuilder::new()
    }

    pub fn new(path: impl AsRef<Path>) -> StoreResult<Self> {
        SqliteRunStoreBuilder::new().path(path).build()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open(&self) -> StoreResult<Connection> {
        let conn = Connection::open_with_flags(&self.path, self.flags).map_err(|source| {
            StoreError::OpenDatabase {
                path: self.path.clone(),
                source,
            }
        })?;
        configure_connection(&conn).map_err(|source| StoreError::OpenDatabase {
            path: self.path.clone(),
            source,
        })?;
        Ok(conn)
    }

    pub fn initialize(&self) -> StoreResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = self.open()?;
        conn.execute_batch(RUNS_SCHEMA)?;
        Ok(())
    }

    pub fn create_run(&self, run: &Run) -> StoreResult<()> {
        self.create_runs(std::slice::from_ref(run))
    }

    pub fn create_runs(&self, runs: &[Run]) -> StoreResult<()> {
        let mut conn = self.open()?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO runs (
                    run_id, user_id, project_id, kind, parent_run_id, recording_id, test_id,
                    browsers, status
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            )?;
            for run in runs {
                stmt.execute(params![
                    &run.run_id,
                    &run.user_id,
                    &run.project_id,
                    run.kind.as_str(),
                    &run.parent_run_id,
                    &run.recording_id,
                    &run.test_id,
                    BrowserEngine::join_list(&run.browsers),
                    run.status.as_str(),
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    pub fn fetch_run(&self, run_id: &str) -> StoreResult<Option<Run>> {
        let conn = self.open()?;
        let mut stmt = conn.prepare("SELECT * FROM runs WHERE run_id = ?1")?;
        let run = stmt.query_row([run_id], |row| Run::from_row(row)).optional()?;
        Ok(run)
    }

    pub fn fetch_run_status(&self, run_id: &str) -> StoreResult<Option<RunStatus>> {
        let conn = self.open()?;
        let status: Option<String> = conn
            .query_row("SELECT status FROM runs WHERE run_id = ?1", [run_id], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(status.and_then(|value| value.parse().ok()))
    }

    pub fn list_children(&self, parent_run_id: &str) -> StoreResult<Vec<Run>> {
        let conn = self.open()?;
        let mut stmt = conn.prepare(
            "SELECT * FROM runs WHERE parent_run_id = ?1 ORDER BY created_at ASC, run_id ASC",
        )?;
        let rows = stmt
            .query_map([parent_run_id], |row| Run::from_row(row))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn list_runs(&self, status: Option<RunStatus>, limit: usize) -> StoreResult<Vec<Run>> {
        let conn = self.open()?;
        let mut stmt = conn.prepare(
            "SELECT * FROM runs
             WHERE (?1 IS NULL OR status = ?1)
             ORDER BY created_at DESC, run_id DESC
             LIMIT ?2",
        )?;
        let rows = stmt
            .query_map(
                params![status.as_ref().map(RunStatus::as_str), limit as i64],
                |row| Run::from_row(row),
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn count_by_status(&self) -> StoreResult<HashMap<String, usize>> {
        let conn = self.open()?;
        let mut stmt = conn.prepare("SELECT status, COUNT(*) FROM runs GROUP BY status")?;
        let mut map = HashMap::new();
        for row in stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })? {
            let (status, count) = row?;
            map.insert(status, count as usize);
        }
        Ok(map)
    }

    /// `queued -> running`. Returns false when the run is in any other state.
    pub fn mark_run_running(&self, run_id: &str, at: DateTime<Utc>) -> StoreResult<bool> {
        let conn = self.open()?;
        let affected = conn.execute(
            "UPDATE runs SET status = 'running', started_at = ?2
             WHERE run_id = ?1 AND status = 'queued'",
            params![run_id, at.naive_utc()],
        )?;
        Ok(affected > 0)
    }

    /// Writes the terminal state of a run exactly once.
    ///
    /// A run that was cancelled externally while executing stays
    /// `cancelled` whatever outcome the caller reports. Returns the persisted
    /// status, or `None` when the run is unknown or already completed.
    pub fn complete_run(
        &self,
        run_id: &str,
        completion: &RunCompletion,
    ) -> StoreResult<Option<RunStatus>> {
        let mut conn = self.open()?;
        let tx = conn.transaction()?;
        let affected = tx.execute(
            "UPDATE runs SET
                status = CASE WHEN status = 'cancelled' THEN 'cancelled' ELSE ?2 END,
                error_message = CASE
                    WHEN status = 'cancelled' AND ?2 <> 'cancelled' THEN ?12
                    ELSE ?8 END,
                completed_at = ?3,
                actions_total = ?4,
                actions_executed = ?5,
                actions_failed = ?6,
                actions_skipped = ?7,
                error_action_id = ?9,
                video_path = ?10,
                screenshot_paths = ?11,
                duration_ms = ?13
             WHERE run_id = ?1 AND completed_at IS NULL",
            params![
                run_id,
                completion.status.as_str(),
                Utc::now().naive_utc(),
                completion.stats.actions_total,
                completion.stats.actions_executed,
                completion.stats.actions_failed,
                completion.stats.actions_skipped,
                &completion.error_message,
                &completion.error_action_id,
                &completion.video_path,
                join_paths(&completion.screenshot_paths),
                CANCELLED_BY_USER,
                completion.duration_ms,
            ],
        )?;
        if affected == 0 {
            tx.commit()?;
            return Ok(None);
        }
        let status: String =
            tx.query_row("SELECT status FROM runs WHERE run_id = ?1", [run_id], |row| {
                row.get(0)
            })?;
        tx.commit()?;
        Ok(status.parse().ok())
    }

    /// Requests cancellation of a run that has not finished yet. The
    /// executing job observes the status and performs the terminal write.
    pub fn cancel_run(&self, run_id: &str) -> StoreResult<bool> {
        let conn = self.open()?;
        let affected = conn.execute(
            "UPDATE runs SET status = 'cancelled'
             WHERE run_id = ?1 AND status IN ('queued', 'running') AND completed_at IS NULL",
            [run_id],
        )?;
        Ok(affected > 0)
    }

    pub fn create_browser_results(
        &self,
        run_id: &str,
        browsers: &[BrowserEngine],
    ) -> StoreResult<()> {
        let mut conn = self.open()?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT OR IGNORE INTO browser_results (run_id, browser, status)
                 VALUES (?1, ?2, 'queued')",
            )?;
            for browser in browsers {
                stmt.execute(params![run_id, browser.as_str()])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    pub fn fetch_browser_results(&self, run_id: &str) -> StoreResult<Vec<BrowserResultRecord>> {
        let conn = self.open()?;
        let mut stmt =
            conn.prepare("SELECT * FROM browser_results WHERE run_id = ?1 ORDER BY rowid")?;
        let rows = stmt
            .query_map([run_id], |row| BrowserResultRecord::from_row(row))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn mark_browser_running(
        &self,
        run_id: &str,
        browser: BrowserEngine,
        at: DateTime<Utc>,
    ) -> StoreResult<()> {
        let conn = self.open()?;
        conn.execute(
            "INSERT INTO browser_results (run_id, browser, status, started_at)
             VALUES (?1, ?2, 'running', ?3)
             ON CONFLICT(run_id, browser) DO UPDATE SET
                status = 'running',
                started_at = excluded.started_at
             WHERE browser_results.completed_at IS NULL",
            params![run_id, browser.as_str(), at.naive_utc()],
        )?;
        Ok(())
    }

    pub fn complete_browser_result(
        &self,
        run_id: &str,
        browser: BrowserEngine,
        completion: &RunCompletion,
    ) -> StoreResult<()> {
        let conn = self.open()?;
        let affected = conn.execute(
            "UPDATE browser_results SET
                status = ?3,
                completed_at = ?4,
                actions_total = ?5,
                actions_executed = ?6,
                actions_failed = ?7,
                actions_skipped = ?8,
                duration_ms = ?9,
                error_message = ?10,
                error_action_id = ?11,
                video_path = ?12,
                screenshot_paths = ?13
             WHERE run_id = ?1 AND browser = ?2 AND completed_at IS NULL",
            params![
                run_id,
                browser.as_str(),
                completion.status.as_str(),
                Utc::now().naive_utc(),
                completion.stats.actions_total,
                completion.stats.actions_executed,
                completion.stats.actions_failed,
                completion.stats.actions_skipped,
                completion.duration_ms,
                &completion.error_message,
                &completion.error_action_id,
                &completion.video_path,
                join_paths(&completion.screenshot_paths),
            ],
        )?;
        if affected == 0 {
            return Err(StoreError::NotFound {
                entity: "browser result",
                id: format!("{run_id}/{browser}"),
            });
        }
        Ok(())
    }

    pub fn insert_action_result(&self, record: &ActionResultRecord) -> StoreResult<()> {
        self.insert_action_results(std::slice::from_ref(record))
    }

    pub fn insert_action_results(&self, records: &[ActionResultRecord]) -> StoreResult<()> {
        let mut conn = self.open()?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO action_results (
                    result_id, run_id, browser, action_id, action_type, action_index, outcome,
                    duration_ms, started_at, completed_at, selector_kind, selector_value,
                    error_message, error_stack, screenshot_path
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
            )?;
            for record in records {
                stmt.execute(params![
                    &record.result_id,
                    &record.run_id,
                    record.browser.map(|browser| browser.as_str()),
                    &record.action_id,
                    &record.action_type,
                    record.index,
                    record.outcome.as_str(),
                    record.duration_ms,
                    record.started_at.map(|dt| dt.naive_utc()),
                    record.completed_at.map(|dt| dt.naive_utc()),
                    record.selector.as_ref().map(|selector| selector.kind.as_str()),
                    record.selector.as_ref().map(|selector| selector.value.as_str()),
                    &record.error_message,
                    &record.error_stack,
                    &record.screenshot_path,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// The screenshot path is the only column an action result accepts
    /// after insert.
    pub fn set_action_screenshot(&self, result_id: &str, path: &str) -> StoreResult<()> {
        let conn = self.open()?;
        let affected = conn.execute(
            "UPDATE action_results SET screenshot_path = ?2 WHERE result_id = ?1",
            params![result_id, path],
        )?;
        if affected == 0 {
            return Err(StoreError::NotFound {
                entity: "action result",
                id: result_id.to_string(),
            });
        }
        Ok(())
    }

    pub fn list_action_results(&self, run_id: &str) -> StoreResult<Vec<ActionResultRecord>> {
        let conn = self.open()?;
        let mut stmt = conn.prepare(
            "SELECT * FROM action_results WHERE run_id = ?1
             ORDER BY browser ASC, action_index ASC",
        )?;
        let rows = stmt
            .query_map([run_id], |row| ActionResultRecord::from_row(row))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn upsert_recording(&self, recording: &Recording) -> StoreResult<()> {
        let conn = self.open()?;
        let actions = serde_json::to_string(&recording.actions)?;
        conn.execute(
            "INSERT INTO recordings (
                recording_id, user_id, project_id, name, url, actions, action_count
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT(recording_id) DO UPDATE SET
                user_id = excluded.user_id,
                project_id = excluded.project_id,
                name = excluded.name,
                url = excluded.url,
                actions = excluded.actions,
                action_count = excluded.action_count,
                updated_at = CURRENT_TIMESTAMP",
            params![
                &recording.recording_id,
                &recording.user_id,
                &recording.project_id,
                &recording.name,
                &recording.url,
                actions,
                recording.action_count,
            ],
        )?;
        Ok(())
    }

    pub fn fetch_recording(&self, recording_id: &str) -> StoreResult<Option<Recording>> {
        let conn = self.open()?;
        let mut stmt = conn.prepare("SELECT * FROM recordings WHERE recording_id = ?1")?;
        let recording = stmt
            .query_row([recording_id], |row| Recording::from_row(row))
            .optional()?;
        Ok(recording)
    }

    pub fn upsert_test(&self, test: &TestDefinition) -> StoreResult<()> {
        let conn = self.open()?;
        conn.execute(
            "INSERT INTO tests (
                test_id, user_id, project_id, recording_id, name, browsers, parallel, headless,
                timeout_ms, record_video, capture_screenshots
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            ON CONFLICT(test_id) DO UPDATE SET
                user_id = excluded.user_id,
                project_id = excluded.project_id,
                recording_id = excluded.recording_id,
                name = excluded.name,
                browsers = excluded.browsers,
                parallel = excluded.parallel,
                headless = excluded.headless,
                timeout_ms = excluded.timeout_ms,
                record_video = excluded.record_video,
                capture_screenshots = excluded.capture_screenshots,
                updated_at = CURRENT_TIMESTAMP",
            params![
                &test.test_id,
                &test.user_id,
                &test.project_id,
                &test.recording_id,
                &test.name,
                BrowserEngine::join_list(&test.browsers),
                test.parallel as i64,
                test.headless as i64,
                test.timeout_ms.map(|value| value as i64),
                test.record_video as i64,
                test.capture_screenshots as i64,
            ],
        )?;
        Ok(())
    }

    pub fn fetch_test(&self, test_id: &str) -> StoreResult<Option<TestDefinition>> {
        let conn = self.open()?;
        let mut stmt = conn.prepare("SELECT * FROM tests WHERE test_id = ?1")?;
        let test = stmt
            .query_row([test_id], |row| TestDefinition::from_row(row))
            .optional()?;
        Ok(test)
    }
}

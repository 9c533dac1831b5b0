use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::types::Value;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension, Row};
use thiserror::Error;

use crate::runner::{RunJob, RunResult};
use crate::sqlite::{configure_connection, to_utc, RUNS_SCHEMA};

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("failed to open queue database {path}: {source}")]
    Open {
        source: rusqlite::Error,
        path: PathBuf,
    },
    #[error("failed to execute statement on queue database: {0}")]
    Execute(#[from] rusqlite::Error),
    #[error("queue path not configured")]
    MissingStore,
    #[error("invalid job status: {0}")]
    InvalidStatus(String),
    #[error("job not found: {0}")]
    NotFound(i64),
    #[error("job payload error: {0}")]
    Payload(#[from] serde_json::Error),
    #[error("blocking queue task failed: {0}")]
    Join(String),
}

pub type QueueResult<T> = Result<T, QueueError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueStatus {
    Queued,
    Active,
    Completed,
    Failed,
}

impl QueueStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueStatus::Queued => "queued",
            QueueStatus::Active => "active",
            QueueStatus::Completed => "completed",
            QueueStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for QueueStatus {
    type Err = QueueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(Self::Queued),
            "active" => Ok(Self::Active),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(QueueError::InvalidStatus(other.to_string())),
        }
    }
}

#[derive(Debug, Clone)]
pub struct QueuedJob {
    pub job_id: i64,
    pub run_id: String,
    pub job: RunJob,
    pub status: QueueStatus,
    pub attempts: i64,
    pub result: Option<RunResult>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl QueuedJob {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let payload: String = row.get("payload")?;
        let job = serde_json::from_str(&payload).map_err(|err| {
            rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(err))
        })?;
        let result = row
            .get::<_, Option<String>>("result")?
            .and_then(|value| serde_json::from_str(&value).ok());
        let created_at: Option<NaiveDateTime> = row.get("created_at")?;
        let updated_at: Option<NaiveDateTime> = row.get("updated_at")?;
        Ok(Self {
            job_id: row.get("job_id")?,
            run_id: row.get("run_id")?,
            job,
            status: row
                .get::<_, String>("status")?
                .parse()
                .unwrap_or(QueueStatus::Queued),
            attempts: row.get("attempts")?,
            result,
            created_at: to_utc(created_at),
            updated_at: to_utc(updated_at),
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct QueueFilter {
    pub status: Option<QueueStatus>,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Default)]
pub struct QueueSummary {
    pub counts: HashMap<QueueStatus, i64>,
}

impl QueueSummary {
    pub fn count(&self, status: QueueStatus) -> i64 {
        self.counts.get(&status).copied().unwrap_or_default()
    }
}

#[derive(Debug, Clone)]
pub struct JobQueueStoreBuilder {
    path: Option<PathBuf>,
    read_only: bool,
    create_if_missing: bool,
}

impl Default for JobQueueStoreBuilder {
    fn default() -> Self {
        Self {
            path: None,
            read_only: false,
            create_if_missing: true,
        }
    }
}

impl JobQueueStoreBuilder {
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

    pub fn build(self) -> QueueResult<JobQueueStore> {
        let path = self.path.ok_or(QueueError::MissingStore)?;
        let mut flags = if self.read_only {
            OpenFlags::SQLITE_OPEN_READ_ONLY
        } else {
            OpenFlags::SQLITE_OPEN_READ_WRITE
        };
        if !self.read_only && self.create_if_missing {
            flags |= OpenFlags::SQLITE_OPEN_CREATE;
        }
        Ok(JobQueueStore { path, flags })
    }
}

/// FIFO of run jobs living next to the run tables.
#[derive(Debug, Clone)]
pub struct JobQueueStore {
    path: PathBuf,
    flags: OpenFlags,
}

impl JobQueueStore {
    pub fn builder() -> JobQueueStoreBuilder {
        JobQueueStoreBuilder::new()
    }

    pub fn new(path: impl AsRef<Path>) -> QueueResult<Self> {
        JobQueueStoreBuilder::new().path(path).build()
    }

    fn open(&self) -> QueueResult<Connection> {
        let conn = Connection::open_with_flags(&self.path, self.flags).map_err(|source| {
            QueueError::Open {
                source,
                path: self.path.clone(),
            }
        })?;
        configure_connection(&conn).map_err(|source| QueueError::Open {
            source,
            path: self.path.clone(),
        })?;
        Ok(conn)
    }

    pub fn initialize(&self) -> QueueResult<()> {
        let conn = self.open()?;
        conn.execute_batch(RUNS_SCHEMA)?;
        Ok(())
    }

    pub fn enqueue(&self, job: &RunJob) -> QueueResult<i64> {
        let conn = self.open()?;
        conn.execute(
            "INSERT INTO run_jobs (run_id, payload, status) VALUES (?1, ?2, 'queued')",
            params![&job.run_id, serde_json::to_string(job)?],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Hands the oldest queued job to the caller and marks it active. Jobs
    /// whose payload no longer decodes are marked failed and passed over.
    pub fn claim_next(&self) -> QueueResult<Option<QueuedJob>> {
        let mut conn = self.open()?;
        let tx = conn.transaction()?;
        loop {
            let next: Option<(i64, String)> = tx
                .query_row(
                    "SELECT job_id, payload FROM run_jobs WHERE status = 'queued'
                     ORDER BY job_id LIMIT 1",
                    [],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;
            let Some((job_id, payload)) = next else {
                tx.commit()?;
                return Ok(None);
            };
            if let Err(err) = serde_json::from_str::<RunJob>(&payload) {
                tx.execute(
                    "UPDATE run_jobs SET status = 'failed', result = ?2,
                        updated_at = CURRENT_TIMESTAMP
                     WHERE job_id = ?1",
                    params![
                        job_id,
                        serde_json::json!({ "error": format!("invalid payload: {err}") })
                            .to_string()
                    ],
                )?;
                continue;
            }
            tx.execute(
                "UPDATE run_jobs SET status = 'active', attempts = attempts + 1,
                    updated_at = CURRENT_TIMESTAMP
                 WHERE job_id = ?1",
                [job_id],
            )?;
            let claimed = tx.query_row(
                "SELECT * FROM run_jobs WHERE job_id = ?1",
                [job_id],
                QueuedJob::from_row,
            )?;
            tx.commit()?;
            return Ok(Some(claimed));
        }
    }

    pub fn finish(&self, job_id: i64, result: &RunResult) -> QueueResult<()> {
        self.close(job_id, QueueStatus::Completed, &serde_json::to_string(result)?)
    }

    pub fn fail(&self, job_id: i64, reason: &str) -> QueueResult<()> {
        self.close(
            job_id,
            QueueStatus::Failed,
            &serde_json::json!({ "error": reason }).to_string(),
        )
    }

    fn close(&self, job_id: i64, status: QueueStatus, result: &str) -> QueueResult<()> {
        let conn = self.open()?;
        let affected = conn.execute(
            "UPDATE run_jobs SET status = ?1, result = ?2, updated_at = CURRENT_TIMESTAMP
             WHERE job_id = ?3",
            params![status.as_str(), result, job_id],
        )?;
        if affected == 0 {
            return Err(QueueError::NotFound(job_id));
        }
        Ok(())
    }

    /// Puts jobs left active by a crashed worker back in line.
    pub fn requeue_active(&self) -> QueueResult<usize> {
        let conn = self.open()?;
        let affected = conn.execute(
            "UPDATE run_jobs SET status = 'queued', updated_at = CURRENT_TIMESTAMP
             WHERE status = 'active'",
            [],
        )?;
        Ok(affected)
    }

    pub fn fetch(&self, job_id: i64) -> QueueResult<Option<QueuedJob>> {
        let conn = self.open()?;
        let job = conn
            .query_row(
                "SELECT * FROM run_jobs WHERE job_id = ?1",
                [job_id],
                QueuedJob::from_row,
            )
            .optional()?;
        Ok(job)
    }

    pub fn list(&self, filter: &QueueFilter) -> QueueResult<Vec<QueuedJob>> {
        let conn = self.open()?;
        let mut query = String::from("SELECT * FROM run_jobs");
        let mut params: Vec<Value> = Vec::new();
        if let Some(status) = filter.status {
            query.push_str(" WHERE status = ?");
            params.push(Value::Text(status.as_str().to_string()));
        }
        query.push_str(" ORDER BY job_id ASC");
        if let Some(limit) = filter.limit {
            query.push_str(" LIMIT ?");
            params.push(Value::Integer(limit as i64));
        }
        let mut stmt = conn.prepare(&query)?;
        let mut rows = stmt.query(rusqlite::params_from_iter(params.iter()))?;
        let mut jobs = Vec::new();
        while let Some(row) = rows.next()? {
            jobs.push(QueuedJob::from_row(row)?);
        }
        Ok(jobs)
    }

    pub fn summary(&self) -> QueueResult<QueueSummary> {
        let conn = self.open()?;
        let mut stmt = conn.prepare("SELECT status, COUNT(*) FROM run_jobs GROUP BY status")?;
        let mut rows = stmt.query([])?;
        let mut counts = HashMap::new();
        while let Some(row) = rows.next()? {
            let status: String = row.get(0)?;
            counts.insert(status.parse()?, row.get(1)?);
        }
        Ok(QueueSummary { counts })
    }
}

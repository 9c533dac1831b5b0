use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{ArgGroup, Args, Parser, Subcommand, ValueEnum};
use retrace_core::run::{ActionResultRecord, BrowserResultRecord};
use retrace_core::{
    load_retrace_config, publisher_from_config, BrowserEngine, ChannelPublisher, ChromiumEngine,
    JobQueueStore, OrchestratorConfig, ProgressPublisher, Recording, RetraceConfig, Run, RunJob,
    RunKind, RunOrchestrator, RunStatus, RunTarget, SqliteRunStore, TestDefinition, Worker,
};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

const DEFAULT_CONFIG: &str = "configs/retrace.toml";

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(#[from] retrace_core::ConfigError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("store error: {0}")]
    Store(#[from] retrace_core::StoreError),
    #[error("queue error: {0}")]
    Queue(#[from] retrace_core::QueueError),
    #[error("progress error: {0}")]
    Progress(#[from] retrace_core::PublishError),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("not found: {0}")]
    NotFound(String),
}

#[derive(Parser, Debug)]
#[command(author, version, about = "retrace run queue control interface", long_about = None)]
pub struct Cli {
    /// Path to retrace.toml (defaults to configs/retrace.toml when present)
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// Override for storage.database_path
    #[arg(long)]
    pub database: Option<PathBuf>,
    /// Override for storage.artifacts_dir
    #[arg(long)]
    pub artifacts_dir: Option<PathBuf>,
    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Creates the database schema and the artifacts directory
    Init,
    /// Shows run and queue counts by status
    Status,
    /// Inspects or cancels runs
    #[command(subcommand)]
    Runs(RunsCommands),
    /// Creates a run and queues it for the worker
    Enqueue(EnqueueArgs),
    /// Loads recordings and tests from JSON files
    #[command(subcommand)]
    Import(ImportCommands),
    /// Runs the queue worker with the Chromium engine
    Worker(WorkerArgs),
}

#[derive(Subcommand, Debug)]
pub enum RunsCommands {
    /// Lists the most recent runs
    List(RunsListArgs),
    /// Shows one run with its browser and action results
    Show(RunIdArgs),
    /// Requests cancellation of a queued or running run
    Cancel(RunIdArgs),
}

#[derive(Args, Debug)]
pub struct RunsListArgs {
    /// Only runs with this status
    #[arg(long)]
    pub status: Option<String>,
    #[arg(long, default_value_t = 20)]
    pub limit: usize,
}

#[derive(Args, Debug)]
pub struct RunIdArgs {
    pub run_id: String,
}

#[derive(Args, Debug)]
#[command(group(ArgGroup::new("target").required(true).args(["recording", "test"])))]
pub struct EnqueueArgs {
    /// Replays a single recording
    #[arg(long)]
    pub recording: Option<String>,
    /// Executes a test definition
    #[arg(long)]
    pub test: Option<String>,
    /// Owner of the run
    #[arg(long)]
    pub user: String,
    #[arg(long)]
    pub project: Option<String>,
    /// Run id; generated when omitted
    #[arg(long)]
    pub run_id: Option<String>,
    /// Comma separated engines, e.g. chromium,firefox
    #[arg(long)]
    pub browsers: Option<String>,
    #[arg(long)]
    pub parallel: Option<bool>,
    /// Shows the browser window
    #[arg(long, default_value_t = false)]
    pub headed: bool,
    #[arg(long)]
    pub timeout_ms: Option<u64>,
    #[arg(long)]
    pub record_video: Option<bool>,
    #[arg(long)]
    pub capture_screenshots: Option<bool>,
}

#[derive(Subcommand, Debug)]
pub enum ImportCommands {
    /// Upserts a recording from a JSON file
    Recording(ImportArgs),
    /// Upserts a test definition from a JSON file
    Test(ImportArgs),
}

#[derive(Args, Debug)]
pub struct ImportArgs {
    pub path: PathBuf,
}

#[derive(Args, Debug)]
pub struct WorkerArgs {
    /// Processes the jobs currently queued and exits
    #[arg(long, default_value_t = false)]
    pub once: bool,
    /// Override for worker.concurrency
    #[arg(long)]
    pub concurrency: Option<usize>,
}

pub fn run(cli: Cli) -> Result<()> {
    let context = AppContext::new(&cli)?;

    match &cli.command {
        Commands::Init => render(&context.init()?, cli.format)?,
        Commands::Status => render(&context.gather_status()?, cli.format)?,
        Commands::Runs(RunsCommands::List(args)) => render(&context.runs_list(args)?, cli.format)?,
        Commands::Runs(RunsCommands::Show(args)) => {
            render(&context.runs_show(&args.run_id)?, cli.format)?
        }
        Commands::Runs(RunsCommands::Cancel(args)) => {
            render(&context.runs_cancel(&args.run_id)?, cli.format)?
        }
        Commands::Enqueue(args) => render(&context.enqueue(args)?, cli.format)?,
        Commands::Import(command) => render(&context.import(command)?, cli.format)?,
        Commands::Worker(args) => render(&context.run_worker(args)?, cli.format)?,
    }

    Ok(())
}

fn render<T>(value: &T, format: OutputFormat) -> Result<()>
where
    T: Serialize + DisplayFallback,
{
    match format {
        OutputFormat::Text => {
            println!("{}", value.display());
            Ok(())
        }
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(value)?;
            println!("{}", json);
            Ok(())
        }
    }
}

trait DisplayFallback {
    fn display(&self) -> String;
}

#[derive(Debug)]
struct AppContext {
    config: RetraceConfig,
    database: PathBuf,
    artifacts_dir: PathBuf,
}

impl AppContext {
    fn new(cli: &Cli) -> Result<Self> {
        let config = match &cli.config {
            Some(path) => load_retrace_config(path)?,
            None if Path::new(DEFAULT_CONFIG).exists() => load_retrace_config(DEFAULT_CONFIG)?,
            None => RetraceConfig::default(),
        };
        let database = cli
            .database
            .clone()
            .unwrap_or_else(|| config.database_path());
        let artifacts_dir = cli
            .artifacts_dir
            .clone()
            .unwrap_or_else(|| config.artifacts_dir());
        Ok(Self {
            config,
            database,
            artifacts_dir,
        })
    }

    fn run_store(&self) -> Result<SqliteRunStore> {
        Ok(SqliteRunStore::builder()
            .path(&self.database)
            .create_if_missing(true)
            .build()?)
    }

    fn queue(&self) -> Result<JobQueueStore> {
        Ok(JobQueueStore::builder()
            .path(&self.database)
            .create_if_missing(true)
            .build()?)
    }

    fn init(&self) -> Result<InitReport> {
        self.run_store()?.initialize()?;
        fs::create_dir_all(&self.artifacts_dir)?;
        Ok(InitReport {
            database: self.database.display().to_string(),
            artifacts_dir: self.artifacts_dir.display().to_string(),
        })
    }

    fn gather_status(&self) -> Result<StatusReport> {
        let runs = self
            .run_store()?
            .count_by_status()?
            .into_iter()
            .collect::<BTreeMap<_, _>>();
        let jobs = self
            .queue()?
            .summary()?
            .counts
            .into_iter()
            .map(|(status, count)| (status.to_string(), count))
            .collect::<BTreeMap<_, _>>();
        Ok(StatusReport {
            database: self.database.display().to_string(),
            runs,
            jobs,
        })
    }

    fn runs_list(&self, args: &RunsListArgs) -> Result<RunList> {
        let status = args
            .status
            .as_deref()
            .map(str::parse::<RunStatus>)
            .transpose()
            .map_err(AppError::InvalidArgument)?;
        let rows = self.run_store()?.list_runs(status, args.limit)?;
        Ok(RunList { rows })
    }

    fn runs_show(&self, run_id: &str) -> Result<RunDetail> {
        let store = self.run_store()?;
        let run = store
            .fetch_run(run_id)?
            .ok_or_else(|| AppError::NotFound(format!("run {run_id}")))?;
        Ok(RunDetail {
            browser_results: store.fetch_browser_results(run_id)?,
            action_results: store.list_action_results(run_id)?,
            run,
        })
    }

    fn runs_cancel(&self, run_id: &str) -> Result<CancelReport> {
        let store = self.run_store()?;
        let cancelled = store.cancel_run(run_id)?;
        let status = store
            .fetch_run_status(run_id)?
            .ok_or_else(|| AppError::NotFound(format!("run {run_id}")))?;
        Ok(CancelReport {
            run_id: run_id.to_string(),
            cancelled,
            status,
        })
    }

    fn enqueue(&self, args: &EnqueueArgs) -> Result<EnqueueReport> {
        let store = self.run_store()?;
        let requested = args
            .browsers
            .as_deref()
            .map(BrowserEngine::parse_list)
            .transpose()
            .map_err(AppError::InvalidArgument)?
            .unwrap_or_default();
        let defaults = &self.config.execution.default_browsers;

        let (kind, target, browsers) = match (&args.recording, &args.test) {
            (Some(recording_id), _) => {
                let browser = requested
                    .first()
                    .or(defaults.first())
                    .copied()
                    .unwrap_or(BrowserEngine::Chromium);
                let target = RunTarget::Recording {
                    recording_id: recording_id.clone(),
                };
                (RunKind::Recording, target, vec![browser])
            }
            (None, Some(test_id)) => {
                let stored = store
                    .fetch_test(test_id)?
                    .map(|test| test.browsers)
                    .unwrap_or_default();
                let browsers = [requested, stored, defaults.clone()]
                    .into_iter()
                    .find(|list| !list.is_empty())
                    .unwrap_or_else(|| vec![BrowserEngine::Chromium]);
                let target = RunTarget::Test {
                    test_id: test_id.clone(),
                };
                (RunKind::Test, target, browsers)
            }
            (None, None) => {
                return Err(AppError::InvalidArgument(
                    "either --recording or --test is required".to_string(),
                ))
            }
        };

        let run_id = args
            .run_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let mut run = Run::new(&run_id, &args.user, kind);
        run.project_id = args.project.clone();
        run.browsers = browsers.clone();
        match &target {
            RunTarget::Recording { recording_id } => run.recording_id = Some(recording_id.clone()),
            RunTarget::Test { test_id } => run.test_id = Some(test_id.clone()),
        }
        store.create_run(&run)?;
        if kind == RunKind::Test {
            store.create_browser_results(&run_id, &browsers)?;
        }

        let mut job = RunJob::new(&run_id, &args.user, target).with_browsers(browsers.clone());
        job.parallel = args.parallel;
        job.headless = args.headed.then_some(false);
        job.timeout_ms = args.timeout_ms;
        job.record_video = args.record_video;
        job.capture_screenshots = args.capture_screenshots;
        let job_id = self.queue()?.enqueue(&job)?;
        info!(%run_id, job_id, "run queued");

        Ok(EnqueueReport {
            run_id,
            job_id,
            kind,
            browsers,
        })
    }

    fn import(&self, command: &ImportCommands) -> Result<ImportReport> {
        let store = self.run_store()?;
        match command {
            ImportCommands::Recording(args) => {
                let content = fs::read_to_string(&args.path)?;
                let recording: Recording = serde_json::from_str(&content)?;
                let actions = recording.actions.clone();
                let recording = recording.with_actions(actions);
                store.upsert_recording(&recording)?;
                Ok(ImportReport {
                    entity: "recording",
                    id: recording.recording_id,
                })
            }
            ImportCommands::Test(args) => {
                let content = fs::read_to_string(&args.path)?;
                let test: TestDefinition = serde_json::from_str(&content)?;
                if test.browsers.is_empty() {
                    return Err(AppError::InvalidArgument(format!(
                        "test {} declares no browsers",
                        test.test_id
                    )));
                }
                store.upsert_test(&test)?;
                Ok(ImportReport {
                    entity: "test",
                    id: test.test_id,
                })
            }
        }
    }

    fn run_worker(&self, args: &WorkerArgs) -> Result<WorkerReport> {
        let runtime = tokio::runtime::Runtime::new()?;
        runtime.block_on(async {
            let mut section = self.config.worker.clone();
            if let Some(concurrency) = args.concurrency {
                section.concurrency = concurrency.max(1);
            }

            let channel = ChannelPublisher::new(self.config.progress.channel_capacity);
            tokio::spawn(log_progress(channel.subscribe()));
            let extra: Arc<dyn ProgressPublisher> = Arc::new(channel);
            let publisher = publisher_from_config(&self.config.progress, Some(extra))?;

            let mut orchestrator_config = OrchestratorConfig::from_config(&self.config);
            orchestrator_config.artifacts_dir = self.artifacts_dir.clone();
            let orchestrator = RunOrchestrator::new(
                Arc::new(self.run_store()?),
                Arc::new(ChromiumEngine::new(self.config.chromium.clone())),
                publisher,
                orchestrator_config,
            );
            let worker = Worker::new(self.queue()?, Arc::new(orchestrator), &section);

            if args.once {
                let processed = worker.tick().await?;
                return Ok(WorkerReport {
                    mode: "once",
                    processed: Some(processed),
                });
            }

            let (shutdown_tx, shutdown_rx) = watch::channel(false);
            tokio::spawn(async move {
                match tokio::signal::ctrl_c().await {
                    Ok(()) => info!("shutdown requested"),
                    Err(err) => warn!(error = %err, "could not listen for ctrl-c"),
                }
                let _ = shutdown_tx.send(true);
            });
            worker.run_until(shutdown_rx).await;
            Ok(WorkerReport {
                mode: "continuous",
                processed: None,
            })
        })
    }
}

async fn log_progress(mut events: broadcast::Receiver<retrace_core::ProgressEvent>) {
    loop {
        match events.recv().await {
            Ok(event) => debug!(run_id = %event.run_id(), kind = event.kind(), "progress"),
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                warn!(missed, "progress log lagging")
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

#[derive(Debug, Serialize)]
struct InitReport {
    database: String,
    artifacts_dir: String,
}

#[derive(Debug, Serialize)]
struct StatusReport {
    database: String,
    runs: BTreeMap<String, usize>,
    jobs: BTreeMap<String, i64>,
}

#[derive(Debug, Serialize)]
struct RunList {
    rows: Vec<Run>,
}

#[derive(Debug, Serialize)]
struct RunDetail {
    run: Run,
    browser_results: Vec<BrowserResultRecord>,
    action_results: Vec<ActionResultRecord>,
}

#[derive(Debug, Serialize)]
struct CancelReport {
    run_id: String,
    cancelled: bool,
    status: RunStatus,
}

#[derive(Debug, Serialize)]
struct EnqueueReport {
    run_id: String,
    job_id: i64,
    kind: RunKind,
    browsers: Vec<BrowserEngine>,
}

#[derive(Debug, Serialize)]
struct ImportReport {
    entity: &'static str,
    id: String,
}

#[derive(Debug, Serialize)]
struct WorkerReport {
    mode: &'static str,
    processed: Option<usize>,
}

impl DisplayFallback for InitReport {
    fn display(&self) -> String {
        format!(
            "database: {}\nartifacts: {}",
            self.database, self.artifacts_dir
        )
    }
}

impl DisplayFallback for StatusReport {
    fn display(&self) -> String {
        let mut lines = vec![format!("Database: {}", self.database), "Runs:".to_string()];
        if self.runs.is_empty() {
            lines.push("  (none)".to_string());
        }
        for (status, count) in &self.runs {
            lines.push(format!("  {status:<10} {count}"));
        }
        lines.push("Jobs:".to_string());
        if self.jobs.is_empty() {
            lines.push("  (none)".to_string());
        }
        for (status, count) in &self.jobs {
            lines.push(format!("  {status:<10} {count}"));
        }
        lines.join("\n")
    }
}

impl DisplayFallback for RunList {
    fn display(&self) -> String {
        if self.rows.is_empty() {
            return "No runs found".to_string();
        }
        self.rows
            .iter()
            .map(|run| {
                format!(
                    "{id} | {kind} | {status} | {executed}/{total} executed, {failed} failed | {created}",
                    id = run.run_id,
                    kind = run.kind,
                    status = run.status,
                    executed = run.stats.actions_executed,
                    total = run.stats.actions_total,
                    failed = run.stats.actions_failed,
                    created = run
                        .created_at
                        .map(|dt| dt.to_rfc3339())
                        .unwrap_or_else(|| "-".to_string()),
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl DisplayFallback for RunDetail {
    fn display(&self) -> String {
        let run = &self.run;
        let mut lines = vec![
            format!("Run {} ({}) by {}", run.run_id, run.kind, run.user_id),
            format!("  status: {}", run.status),
            format!(
                "  actions: {} total, {} executed, {} failed, {} skipped",
                run.stats.actions_total,
                run.stats.actions_executed,
                run.stats.actions_failed,
                run.stats.actions_skipped
            ),
        ];
        if let Some(duration) = run.duration_ms {
            lines.push(format!("  duration: {duration} ms"));
        }
        if let Some(error) = &run.error_message {
            lines.push(format!("  error: {error}"));
        }
        for result in &self.browser_results {
            lines.push(format!(
                "  [{}] {} ({} executed, {} failed)",
                result.browser,
                result.status,
                result.stats.actions_executed,
                result.stats.actions_failed
            ));
        }
        for action in &self.action_results {
            let browser = action
                .browser
                .map(|browser| browser.to_string())
                .unwrap_or_else(|| "-".to_string());
            let mut line = format!(
                "    {browser} #{} {} {} {}",
                action.index,
                action.action_id,
                action.action_type,
                action.outcome.as_str()
            );
            if let Some(error) = &action.error_message {
                line.push_str(&format!(": {error}"));
            }
            lines.push(line);
        }
        lines.join("\n")
    }
}

impl DisplayFallback for CancelReport {
    fn display(&self) -> String {
        if self.cancelled {
            format!("Run {} cancellation requested", self.run_id)
        } else {
            format!("Run {} not cancelled (status {})", self.run_id, self.status)
        }
    }
}

impl DisplayFallback for EnqueueReport {
    fn display(&self) -> String {
        format!(
            "Queued {} run {} as job {} on {}",
            self.kind,
            self.run_id,
            self.job_id,
            BrowserEngine::join_list(&self.browsers)
        )
    }
}

impl DisplayFallback for ImportReport {
    fn display(&self) -> String {
        format!("Imported {} {}", self.entity, self.id)
    }
}

impl DisplayFallback for WorkerReport {
    fn display(&self) -> String {
        match self.processed {
            Some(processed) => format!("Worker processed {processed} job(s)"),
            None => "Worker stopped".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use retrace_core::run::RecordedAction;
    use tempfile::TempDir;

    fn prepare_test_context() -> (TempDir, AppContext) {
        let temp = TempDir::new().unwrap();
        let cli = Cli {
            config: None,
            database: Some(temp.path().join("data/retrace.sqlite")),
            artifacts_dir: Some(temp.path().join("data/artifacts")),
            format: OutputFormat::Json,
            command: Commands::Init,
        };
        let context = AppContext::new(&cli).unwrap();
        context.init().unwrap();
        (temp, context)
    }

    fn enqueue_args(user: &str) -> EnqueueArgs {
        EnqueueArgs {
            recording: None,
            test: None,
            user: user.to_string(),
            project: None,
            run_id: None,
            browsers: None,
            parallel: None,
            headed: false,
            timeout_ms: None,
            record_video: None,
            capture_screenshots: None,
        }
    }

    #[test]
    fn init_creates_schema_and_artifacts() {
        let (temp, context) = prepare_test_context();
        assert!(temp.path().join("data/retrace.sqlite").exists());
        assert!(temp.path().join("data/artifacts").is_dir());
        let status = context.gather_status().unwrap();
        assert!(status.runs.is_empty());
        assert!(status.jobs.is_empty());
    }

    #[test]
    fn test_runs_resolve_browsers_from_the_definition() {
        let (_temp, context) = prepare_test_context();
        let store = context.run_store().unwrap();
        let mut test = TestDefinition::new("test-1", "user-1", "rec-1", "checkout");
        test.browsers = vec![BrowserEngine::Firefox, BrowserEngine::Webkit];
        store.upsert_test(&test).unwrap();

        let mut args = enqueue_args("user-1");
        args.test = Some("test-1".into());
        args.run_id = Some("run-1".into());
        let report = context.enqueue(&args).unwrap();
        assert_eq!(report.kind, RunKind::Test);
        assert_eq!(report.browsers, test.browsers);

        let detail = context.runs_show("run-1").unwrap();
        assert_eq!(detail.run.status, RunStatus::Queued);
        assert_eq!(detail.browser_results.len(), 2);
        let status = context.gather_status().unwrap();
        assert_eq!(status.runs.get("queued"), Some(&1));
        assert_eq!(status.jobs.get("queued"), Some(&1));
    }

    #[test]
    fn recording_runs_use_a_single_engine() {
        let (_temp, context) = prepare_test_context();
        let mut args = enqueue_args("user-1");
        args.recording = Some("rec-1".into());
        args.browsers = Some("webkit,firefox".into());
        let report = context.enqueue(&args).unwrap();
        assert_eq!(report.browsers, vec![BrowserEngine::Webkit]);
        let detail = context.runs_show(&report.run_id).unwrap();
        assert!(detail.browser_results.is_empty());
        assert_eq!(detail.run.recording_id.as_deref(), Some("rec-1"));

        args.browsers = Some("netscape".into());
        assert!(matches!(
            context.enqueue(&args),
            Err(AppError::InvalidArgument(_))
        ));
    }

    #[test]
    fn cancel_only_applies_to_unfinished_runs() {
        let (_temp, context) = prepare_test_context();
        let mut args = enqueue_args("user-1");
        args.recording = Some("rec-1".into());
        args.run_id = Some("run-1".into());
        context.enqueue(&args).unwrap();

        let first = context.runs_cancel("run-1").unwrap();
        assert!(first.cancelled);
        assert_eq!(first.status, RunStatus::Cancelled);
        let second = context.runs_cancel("run-1").unwrap();
        assert!(!second.cancelled);
        assert!(matches!(
            context.runs_cancel("missing"),
            Err(AppError::NotFound(_))
        ));

        let listed = context
            .runs_list(&RunsListArgs {
                status: Some("cancelled".into()),
                limit: 5,
            })
            .unwrap();
        assert_eq!(listed.rows.len(), 1);
        assert!(context
            .runs_list(&RunsListArgs {
                status: Some("bogus".into()),
                limit: 5,
            })
            .is_err());
    }

    #[test]
    fn import_recording_counts_actions() {
        let (temp, context) = prepare_test_context();
        let recording = Recording::new("rec-1", "user-1", "login", "https://app.test/")
            .with_actions(vec![
                RecordedAction::new("act_001", "click"),
                RecordedAction::new("act_002", "type"),
            ]);
        let mut value = serde_json::to_value(&recording).unwrap();
        value.as_object_mut().unwrap().remove("action_count");
        let path = temp.path().join("recording.json");
        fs::write(&path, serde_json::to_string(&value).unwrap()).unwrap();

        let report = context
            .import(&ImportCommands::Recording(ImportArgs { path }))
            .unwrap();
        assert_eq!(report.id, "rec-1");
        let stored = context
            .run_store()
            .unwrap()
            .fetch_recording("rec-1")
            .unwrap()
            .unwrap();
        assert_eq!(stored.action_count, 2);
    }

    #[test]
    fn worker_once_settles_runs_without_a_browser() {
        let (_temp, context) = prepare_test_context();
        let mut args = enqueue_args("user-1");
        args.recording = Some("rec-missing".into());
        args.run_id = Some("run-1".into());
        context.enqueue(&args).unwrap();

        let report = context
            .run_worker(&WorkerArgs {
                once: true,
                concurrency: None,
            })
            .unwrap();
        assert_eq!(report.processed, Some(1));
        let run = context.runs_show("run-1").unwrap().run;
        assert_eq!(run.status, RunStatus::Error);
        assert_eq!(run.error_message.as_deref(), Some("Recording not found"));
        assert!(run.completed_at.is_some());
    }
}

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::error::{ConfigError, Result};
use crate::run::BrowserEngine;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct RetraceConfig {
    pub worker: WorkerSection,
    pub execution: ExecutionSection,
    pub storage: StorageSection,
    pub chromium: ChromiumSection,
    pub progress: ProgressSection,
}

impl RetraceConfig {
    pub fn from_toml_str(content: &str) -> std::result::Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    pub fn validate(&self) -> Result<()> {
        if self.worker.concurrency == 0 {
            return Err(ConfigError::Invalid {
                field: "worker.concurrency",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.worker.cancellation_poll_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "worker.cancellation_poll_ms",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.execution.default_browsers.is_empty() {
            return Err(ConfigError::Invalid {
                field: "execution.default_browsers",
                reason: "at least one browser engine is required".to_string(),
            });
        }
        if let Some(url) = &self.progress.webhook_url {
            url::Url::parse(url).map_err(|err| ConfigError::Invalid {
                field: "progress.webhook_url",
                reason: err.to_string(),
            })?;
        }
        Ok(())
    }

    pub fn resolve_path<P: AsRef<Path>>(&self, candidate: P) -> PathBuf {
        let path = candidate.as_ref();
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            Path::new(&self.storage.base_dir).join(path)
        }
    }

    pub fn database_path(&self) -> PathBuf {
        self.resolve_path(&self.storage.database_path)
    }

    pub fn artifacts_dir(&self) -> PathBuf {
        self.resolve_path(&self.storage.artifacts_dir)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WorkerSection {
    pub poll_interval_ms: u64,
    pub concurrency: usize,
    pub cancellation_poll_ms: u64,
}

impl WorkerSection {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn cancellation_poll(&self) -> Duration {
        Duration::from_millis(self.cancellation_poll_ms)
    }
}

impl Default for WorkerSection {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1_000,
            concurrency: 2,
            cancellation_poll_ms: 2_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExecutionSection {
    pub parallel_browsers: bool,
    pub headless: bool,
    pub timeout_ms: Option<u64>,
    pub record_video: bool,
    pub capture_screenshots: bool,
    pub default_browsers: Vec<BrowserEngine>,
}

impl Default for ExecutionSection {
    fn default() -> Self {
        Self {
            parallel_browsers: true,
            headless: true,
            timeout_ms: Some(300_000),
            record_video: false,
            capture_screenshots: true,
            default_browsers: vec![BrowserEngine::Chromium],
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageSection {
    pub base_dir: String,
    pub database_path: String,
    pub artifacts_dir: String,
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            base_dir: ".".to_string(),
            database_path: "data/retrace.sqlite".to_string(),
            artifacts_dir: "data/artifacts".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ChromiumSection {
    pub executable_path: Option<String>,
    pub sandbox: bool,
    pub disable_gpu: bool,
    pub window: [u32; 2],
    pub request_timeout_seconds: Option<u64>,
    pub extra_args: Vec<String>,
}

impl Default for ChromiumSection {
    fn default() -> Self {
        Self {
            executable_path: None,
            sandbox: true,
            disable_gpu: true,
            window: [1366, 768],
            request_timeout_seconds: Some(30),
            extra_args: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProgressSection {
    pub webhook_url: Option<String>,
    pub channel_capacity: usize,
}

impl Default for ProgressSection {
    fn default() -> Self {
        Self {
            webhook_url: None,
            channel_capacity: 256,
        }
    }
}

pub fn load_retrace_config<P: AsRef<Path>>(path: P) -> Result<RetraceConfig> {
    let config: RetraceConfig = load_toml(path)?;
    config.validate()?;
    Ok(config)
}

fn load_toml<T, P>(path: P) -> Result<T>
where
    T: DeserializeOwned,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        source,
        path: path.to_path_buf(),
    })?;
    toml::from_str(&content).map_err(|source| ConfigError::Parse {
        source,
        path: path.to_path_buf(),
    })
}

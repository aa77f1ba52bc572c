//! Pipeline configuration.
//!
//! [`PipelineConfig`] is loaded from TOML or JSON. Every field has a default,
//! so an empty file yields a pipeline against the Temporal community forum.
//! `FETCHFLOW_BASE_URL` overrides the source base URL from the file.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::errors::{ConfigError, ErrorClass};
use crate::pipeline::checkpoint_key;
use crate::pipeline::RetryPolicy;
use crate::projection::Projection;

/// Environment variable overriding [`SourceConfig::base_url`].
pub const BASE_URL_ENV: &str = "FETCHFLOW_BASE_URL";

/// Top-level configuration of one pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Task queue name; part of the checkpoint key.
    #[serde(default = "default_task_queue")]
    pub task_queue: String,
    /// Workflow id; part of the checkpoint key.
    #[serde(default = "default_workflow_id")]
    pub workflow_id: String,
    /// Outermost deadline of a run, unbounded when absent.
    #[serde(default)]
    pub run_timeout_seconds: Option<f64>,
    /// Directory for file checkpoints; in-memory when absent.
    #[serde(default)]
    pub checkpoint_dir: Option<PathBuf>,
    /// Where records are read from.
    #[serde(default)]
    pub source: SourceConfig,
    /// Listing stage.
    #[serde(default = "default_stage_a")]
    pub stage_a: StageConfig,
    /// Per-identifier fetch stage.
    #[serde(default)]
    pub stage_b: StageConfig,
    /// Output columns.
    #[serde(default)]
    pub projection: Projection,
    /// Repeated runs.
    #[serde(default)]
    pub schedule: ScheduleConfig,
}

fn default_task_queue() -> String {
    "temporal-community-task-queue".to_string()
}

fn default_workflow_id() -> String {
    "temporal-community-workflow".to_string()
}

fn default_stage_a() -> StageConfig {
    StageConfig {
        retry: RetryPolicy::default().with_non_retryable(ErrorClass::NonRetryableConfigured),
        ..StageConfig::default()
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            task_queue: default_task_queue(),
            workflow_id: default_workflow_id(),
            source: SourceConfig::default(),
            stage_a: default_stage_a(),
            stage_b: StageConfig::default(),
            projection: Projection::default(),
            run_timeout_seconds: None,
            checkpoint_dir: None,
            schedule: ScheduleConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Creates a configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the task queue.
    #[must_use]
    pub fn with_task_queue(mut self, task_queue: impl Into<String>) -> Self {
        self.task_queue = task_queue.into();
        self
    }

    /// Sets the workflow id.
    #[must_use]
    pub fn with_workflow_id(mut self, workflow_id: impl Into<String>) -> Self {
        self.workflow_id = workflow_id.into();
        self
    }

    /// Sets the source configuration.
    #[must_use]
    pub fn with_source(mut self, source: SourceConfig) -> Self {
        self.source = source;
        self
    }

    /// Sets the listing stage configuration.
    #[must_use]
    pub fn with_stage_a(mut self, stage: StageConfig) -> Self {
        self.stage_a = stage;
        self
    }

    /// Sets the fetch stage configuration.
    #[must_use]
    pub fn with_stage_b(mut self, stage: StageConfig) -> Self {
        self.stage_b = stage;
        self
    }

    /// Sets the projection.
    #[must_use]
    pub fn with_projection(mut self, projection: Projection) -> Self {
        self.projection = projection;
        self
    }

    /// Sets the run deadline.
    #[must_use]
    pub fn with_run_timeout(mut self, timeout: Duration) -> Self {
        self.run_timeout_seconds = Some(timeout.as_secs_f64());
        self
    }

    /// Sets the checkpoint directory.
    #[must_use]
    pub fn with_checkpoint_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.checkpoint_dir = Some(dir.into());
        self
    }

    /// `task_queue/workflow_id`.
    #[must_use]
    pub fn run_key(&self) -> String {
        format!("{}/{}", self.task_queue, self.workflow_id)
    }

    /// Key under which this pipeline's checkpoint is stored.
    #[must_use]
    pub fn checkpoint_key(&self) -> String {
        checkpoint_key(&self.task_queue, &self.workflow_id)
    }

    /// Run deadline as a duration.
    #[must_use]
    pub fn run_timeout(&self) -> Option<Duration> {
        self.run_timeout_seconds
            .and_then(|s| Duration::try_from_secs_f64(s).ok())
    }

    /// Parses TOML.
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        toml::from_str(input).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Parses JSON.
    pub fn from_json_str(input: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(input).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Reads a file, picking the format from its extension (TOML unless
    /// `.json`), applies environment overrides and validates.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;
        let is_json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        let mut config = if is_json {
            Self::from_json_str(&contents)?
        } else {
            Self::from_toml_str(&contents)?
        };
        config.apply_overrides(|name| std::env::var(name).ok());
        config.validate()?;
        Ok(config)
    }

    /// Like [`load`](Self::load), using defaults when the file is missing.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        if path.as_ref().exists() {
            return Self::load(path);
        }
        let mut config = Self::default();
        config.apply_overrides(|name| std::env::var(name).ok());
        config.validate()?;
        Ok(config)
    }

    /// Applies overrides looked up by environment variable name.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup(BASE_URL_ENV).filter(|v| !v.is_empty()) {
            self.source.base_url = url;
        }
    }

    /// Rejects unusable values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.task_queue.trim().is_empty() {
            return Err(ConfigError::invalid("task_queue", "must not be empty"));
        }
        if self.workflow_id.trim().is_empty() {
            return Err(ConfigError::invalid("workflow_id", "must not be empty"));
        }
        self.source.validate()?;
        self.stage_a.validate("stage_a")?;
        self.stage_b.validate("stage_b")?;
        if let Some(timeout) = self.run_timeout_seconds {
            if !timeout.is_finite() || timeout <= 0.0 {
                return Err(ConfigError::invalid(
                    "run_timeout_seconds",
                    "must be a positive number",
                ));
            }
        }
        self.schedule.validate()
    }
}

/// Settings of one stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageConfig {
    /// Deadline of a single call.
    #[serde(default = "default_start_to_close")]
    pub start_to_close_seconds: f64,
    /// Retry policy of the stage.
    #[serde(default)]
    pub retry: RetryPolicy,
}

fn default_start_to_close() -> f64 {
    15.0
}

impl Default for StageConfig {
    fn default() -> Self {
        Self {
            start_to_close_seconds: default_start_to_close(),
            retry: RetryPolicy::default(),
        }
    }
}

impl StageConfig {
    /// Sets the per-call deadline.
    #[must_use]
    pub fn with_start_to_close(mut self, timeout: Duration) -> Self {
        self.start_to_close_seconds = timeout.as_secs_f64();
        self
    }

    /// Sets the retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Per-call deadline as a duration.
    #[must_use]
    pub fn start_to_close(&self) -> Duration {
        Duration::try_from_secs_f64(self.start_to_close_seconds).unwrap_or(Duration::MAX)
    }

    fn validate(&self, field: &str) -> Result<(), ConfigError> {
        if !self.start_to_close_seconds.is_finite() || self.start_to_close_seconds <= 0.0 {
            return Err(ConfigError::invalid(
                format!("{field}.start_to_close_seconds"),
                "must be a positive number",
            ));
        }
        self.retry.validate(&format!("{field}.retry"))
    }
}

/// Where and how the remote service is reached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Service root.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// User agent sent with every request.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Path of the listing, relative to the base URL.
    #[serde(default = "default_listing_path")]
    pub listing_path: String,
    /// Path of one record; `{id}` is replaced with the identifier.
    #[serde(default = "default_record_path_template")]
    pub record_path_template: String,
    /// JSON pointer to the array of listing entries.
    #[serde(default = "default_identifiers_pointer")]
    pub identifiers_pointer: String,
    /// Field holding the identifier inside each listing entry.
    #[serde(default = "default_id_field")]
    pub id_field: String,
    /// TCP connect timeout.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_seconds: f64,
}

fn default_base_url() -> String {
    "https://community.temporal.io".to_string()
}

fn default_user_agent() -> String {
    concat!("fetchflow/", env!("CARGO_PKG_VERSION")).to_string()
}

fn default_listing_path() -> String {
    "latest.json".to_string()
}

fn default_record_path_template() -> String {
    "t/{id}.json".to_string()
}

fn default_identifiers_pointer() -> String {
    "/topic_list/topics".to_string()
}

fn default_id_field() -> String {
    "id".to_string()
}

fn default_connect_timeout() -> f64 {
    10.0
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            user_agent: default_user_agent(),
            listing_path: default_listing_path(),
            record_path_template: default_record_path_template(),
            identifiers_pointer: default_identifiers_pointer(),
            id_field: default_id_field(),
            connect_timeout_seconds: default_connect_timeout(),
        }
    }
}

impl SourceConfig {
    /// Sets the base URL.
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Sets the user agent.
    #[must_use]
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Rejects unusable values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            return Err(ConfigError::invalid(
                "source.base_url",
                "must start with http:// or https://",
            ));
        }
        if !self.record_path_template.contains("{id}") {
            return Err(ConfigError::invalid(
                "source.record_path_template",
                "must contain {id}",
            ));
        }
        if !self.identifiers_pointer.is_empty() && !self.identifiers_pointer.starts_with('/') {
            return Err(ConfigError::invalid(
                "source.identifiers_pointer",
                "must be empty or start with '/'",
            ));
        }
        self.connect_timeout().map(|_| ())
    }

    /// Connection timeout as a duration.
    pub fn connect_timeout(&self) -> Result<Duration, ConfigError> {
        if self.connect_timeout_seconds <= 0.0 {
            return Err(ConfigError::invalid(
                "source.connect_timeout_seconds",
                "must be a positive number",
            ));
        }
        Duration::try_from_secs_f64(self.connect_timeout_seconds).map_err(|_| {
            ConfigError::invalid(
                "source.connect_timeout_seconds",
                "must be a finite number of seconds",
            )
        })
    }
}

/// Interval schedule of repeated runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleConfig {
    /// Time between run starts.
    #[serde(default = "default_every_seconds")]
    pub every_seconds: f64,
    /// Stop after this many runs; unbounded when absent.
    #[serde(default)]
    pub max_runs: Option<u32>,
}

fn default_every_seconds() -> f64 {
    10.0 * 60.0 * 60.0
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            every_seconds: default_every_seconds(),
            max_runs: None,
        }
    }
}

impl ScheduleConfig {
    /// Interval as a duration.
    #[must_use]
    pub fn every(&self) -> Duration {
        Duration::try_from_secs_f64(self.every_seconds).unwrap_or(Duration::MAX)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !self.every_seconds.is_finite() || self.every_seconds <= 0.0 {
            return Err(ConfigError::invalid(
                "schedule.every_seconds",
                "must be a positive number",
            ));
        }
        if self.max_runs == Some(0) {
            return Err(ConfigError::invalid("schedule.max_runs", "must be at least 1"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.task_queue, "temporal-community-task-queue");
        assert_eq!(config.source.base_url, "https://community.temporal.io");
        assert!((config.stage_a.start_to_close_seconds - 15.0).abs() < f64::EPSILON);
        assert_eq!(config.stage_b.start_to_close(), Duration::from_secs(15));
        assert!(config
            .stage_a
            .retry
            .non_retryable
            .contains(&ErrorClass::NonRetryableConfigured));
        assert_eq!(config.schedule.every(), Duration::from_secs(36_000));
        assert!(config.run_timeout().is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_toml_is_default() {
        let config = PipelineConfig::from_toml_str("").unwrap();
        assert_eq!(config, PipelineConfig::default());
    }

    #[test]
    fn test_partial_toml() {
        let config = PipelineConfig::from_toml_str(
            r#"
            task_queue = "q"
            run_timeout_seconds = 120.0

            [source]
            base_url = "http://localhost:9000"

            [stage_b]
            start_to_close_seconds = 5.0

            [stage_b.retry]
            maximum_attempts = 4

            [[projection]]
            name = "title"
            field = "title"
            "#,
        )
        .unwrap();

        assert_eq!(config.task_queue, "q");
        assert_eq!(config.workflow_id, "temporal-community-workflow");
        assert_eq!(config.source.base_url, "http://localhost:9000");
        assert_eq!(config.source.listing_path, "latest.json");
        assert_eq!(config.stage_b.start_to_close(), Duration::from_secs(5));
        assert_eq!(config.stage_b.retry.maximum_attempts, Some(4));
        assert_eq!(config.projection.column_names(), vec!["title".to_string()]);
        assert_eq!(config.run_timeout(), Some(Duration::from_secs(120)));
    }

    #[test]
    fn test_json_config() {
        let config =
            PipelineConfig::from_json_str(r#"{"workflow_id": "w", "schedule": {"max_runs": 2}}"#)
                .unwrap();
        assert_eq!(config.workflow_id, "w");
        assert_eq!(config.schedule.max_runs, Some(2));
    }

    #[test]
    fn test_toml_round_trip() {
        let config = PipelineConfig::default()
            .with_run_timeout(Duration::from_secs(90))
            .with_checkpoint_dir("/var/lib/fetchflow")
            .with_projection(Projection::community_posts_with_views());
        let rendered = toml::to_string(&config).unwrap();
        assert_eq!(PipelineConfig::from_toml_str(&rendered).unwrap(), config);
    }

    #[test]
    fn test_parse_error() {
        let err = PipelineConfig::from_toml_str("task_queue = [").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_validation_failures() {
        let cases = [
            PipelineConfig::default().with_task_queue(" "),
            PipelineConfig::default().with_source(SourceConfig::default().with_base_url("ftp://x")),
            PipelineConfig::default()
                .with_stage_b(StageConfig::default().with_retry(RetryPolicy::new().with_maximum_attempts(0))),
            PipelineConfig {
                run_timeout_seconds: Some(-1.0),
                ..PipelineConfig::default()
            },
            PipelineConfig {
                schedule: ScheduleConfig {
                    every_seconds: 0.0,
                    max_runs: None,
                },
                ..PipelineConfig::default()
            },
            PipelineConfig::default().with_source(SourceConfig {
                connect_timeout_seconds: 1e300,
                ..SourceConfig::default()
            }),
        ];
        for config in cases {
            assert!(config.validate().is_err(), "accepted {config:?}");
        }
    }

    #[test]
    fn test_env_override() {
        let mut config = PipelineConfig::default();
        config.apply_overrides(|name| {
            (name == BASE_URL_ENV).then(|| "http://127.0.0.1:8080".to_string())
        });
        assert_eq!(config.source.base_url, "http://127.0.0.1:8080");

        config.apply_overrides(|_| Some(String::new()));
        assert_eq!(config.source.base_url, "http://127.0.0.1:8080");
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let toml_path = dir.path().join("fetchflow.toml");
        std::fs::write(&toml_path, "workflow_id = \"from-file\"\n").unwrap();
        let json_path = dir.path().join("fetchflow.json");
        std::fs::write(&json_path, r#"{"workflow_id": "from-json"}"#).unwrap();

        assert_eq!(PipelineConfig::load(&toml_path).unwrap().workflow_id, "from-file");
        assert_eq!(PipelineConfig::load(&json_path).unwrap().workflow_id, "from-json");
        assert!(matches!(
            PipelineConfig::load(dir.path().join("missing.toml")),
            Err(ConfigError::Io(_))
        ));
    }

    #[test]
    fn test_checkpoint_key_follows_run_identity() {
        let a = PipelineConfig::default();
        let b = PipelineConfig::default().with_workflow_id("other");
        assert_ne!(a.checkpoint_key(), b.checkpoint_key());
        assert_eq!(a.run_key(), "temporal-community-task-queue/temporal-community-workflow");
    }
}

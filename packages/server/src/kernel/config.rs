//! Process configuration from environment variables.
//!
//! Every knob has a default so a bare `worker` binary starts against a
//! local Postgres. Values are read once at startup into [`AppConfig`] and
//! passed around explicitly; nothing re-reads the environment later.

use std::time::Duration;

use anyhow::{Context, Result};

/// Which blob backend to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    Local,
    S3,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,

    // Worker pool
    pub worker_concurrency: usize,
    pub worker_poll_interval: Duration,
    pub shutdown_timeout: Duration,
    pub lease_duration: Duration,
    pub default_job_timeout_secs: i32,

    // Scheduler
    pub scheduler_tick: Duration,

    // Retry policy
    pub retry_max_attempts: i32,
    pub retry_base: Duration,
    pub retry_cap: Duration,

    // Databox sync
    pub databox_gateway_url: String,
    pub databox_max_concurrent_accounts: usize,

    // Analysis
    pub analysis_max_doc_size_bytes: usize,
    pub analysis_truncate_classify: usize,
    pub analysis_truncate_extract: usize,
    pub analysis_truncate_summarise: usize,

    // Storage
    pub storage_backend: StorageBackend,
    pub storage_root: String,
    pub s3_bucket: Option<String>,

    // Collaborators
    pub llm_base_url: String,
    pub llm_model: String,
    pub llm_api_key: Option<String>,
    pub ocr_base_url: Option<String>,
}

impl AppConfig {
    /// Load from the process environment.
    pub fn from_env() -> Result<Self> {
        let storage_backend = match env_or("STORAGE_BACKEND", "local").as_str() {
            "s3" => StorageBackend::S3,
            _ => StorageBackend::Local,
        };

        Ok(Self {
            database_url: std::env::var("DATABASE_URL")
                .context("DATABASE_URL must be set")?,

            worker_concurrency: parse_env("WORKER_CONCURRENCY", 5)?,
            worker_poll_interval: Duration::from_millis(parse_env(
                "WORKER_POLL_INTERVAL_MS",
                2_000,
            )?),
            shutdown_timeout: Duration::from_secs(parse_env("SHUTDOWN_TIMEOUT_SECS", 30)?),
            lease_duration: Duration::from_secs(parse_env("JOB_LEASE_SECS", 60)?),
            default_job_timeout_secs: parse_env("JOB_DEFAULT_TIMEOUT_SECS", 1_800)?,

            scheduler_tick: Duration::from_secs(parse_env("SCHEDULER_TICK_SECS", 30)?),

            retry_max_attempts: parse_env("RETRY_MAX_ATTEMPTS", 3)?,
            retry_base: Duration::from_millis(parse_env("RETRY_BASE_MS", 1_000)?),
            retry_cap: Duration::from_millis(parse_env("RETRY_CAP_MS", 300_000)?),

            databox_gateway_url: env_or("DATABOX_GATEWAY_URL", "http://localhost:8085"),
            databox_max_concurrent_accounts: parse_env("DATABOX_SYNC_MAX_CONCURRENT_ACCOUNTS", 5)?,

            analysis_max_doc_size_bytes: parse_env(
                "ANALYSIS_MAX_DOC_SIZE_BYTES",
                50 * 1024 * 1024,
            )?,
            analysis_truncate_classify: parse_env("ANALYSIS_TEXT_TRUNCATE_CLASSIFY", 4_000)?,
            analysis_truncate_extract: parse_env("ANALYSIS_TEXT_TRUNCATE_EXTRACT", 6_000)?,
            analysis_truncate_summarise: parse_env("ANALYSIS_TEXT_TRUNCATE_SUMMARISE", 10_000)?,

            storage_backend,
            storage_root: env_or("STORAGE_ROOT", "./data/blobs"),
            s3_bucket: std::env::var("S3_BUCKET").ok(),

            llm_base_url: env_or("LLM_BASE_URL", "https://api.openai.com/v1"),
            llm_model: env_or("LLM_MODEL", "gpt-4o-mini"),
            llm_api_key: std::env::var("OPENAI_API_KEY").ok(),
            ocr_base_url: std::env::var("OCR_BASE_URL").ok(),
        })
    }

    /// Defaults with an explicit database URL; used by tests.
    pub fn for_tests(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            worker_concurrency: 2,
            worker_poll_interval: Duration::from_millis(50),
            shutdown_timeout: Duration::from_secs(5),
            lease_duration: Duration::from_secs(10),
            default_job_timeout_secs: 60,
            scheduler_tick: Duration::from_millis(200),
            retry_max_attempts: 3,
            retry_base: Duration::from_millis(10),
            retry_cap: Duration::from_millis(100),
            databox_gateway_url: "http://localhost:8085".into(),
            databox_max_concurrent_accounts: 5,
            analysis_max_doc_size_bytes: 50 * 1024 * 1024,
            analysis_truncate_classify: 4_000,
            analysis_truncate_extract: 6_000,
            analysis_truncate_summarise: 10_000,
            storage_backend: StorageBackend::Local,
            storage_root: "./data/blobs".into(),
            s3_bucket: None,
            llm_base_url: "http://localhost:9000".into(),
            llm_model: "test".into(),
            llm_api_key: None,
            ocr_base_url: None,
        }
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse_env<T>(key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .with_context(|| format!("invalid value for {key}: {raw}")),
        Err(_) => Ok(default),
    }
}

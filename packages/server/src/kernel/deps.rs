//! Server dependencies for job handlers (using traits for testability)
//!
//! This is the central dependency container handed to every job handler.
//! All external services sit behind trait abstractions so tests can swap
//! in the mocks from `test_dependencies`.

use std::sync::Arc;

use sqlx::PgPool;
use tokio::sync::Semaphore;

use super::config::AppConfig;
use super::jobs::JobQueue;
use super::storage::BlobStorage;
use super::traits::{
    BaseCredentialStore, BaseDocumentFetcher, BaseLlm, BaseNotifier, BaseOcrEngine,
};

/// Dependencies accessible to job handlers.
#[derive(Clone)]
pub struct ServerDeps {
    pub db_pool: PgPool,
    /// Handlers enqueue follow-up jobs (e.g. one analysis per ingested
    /// document) through the same durable queue the worker drains.
    pub job_queue: Arc<dyn JobQueue>,
    pub storage: Arc<dyn BlobStorage>,
    pub fetcher: Arc<dyn BaseDocumentFetcher>,
    pub credentials: Arc<dyn BaseCredentialStore>,
    pub llm: Arc<dyn BaseLlm>,
    /// OCR is optional; without it scanned PDFs fall back to direct text
    /// extraction.
    pub ocr: Option<Arc<dyn BaseOcrEngine>>,
    pub notifier: Arc<dyn BaseNotifier>,
    /// Caps concurrent databox accounts per process, shared across all
    /// sync handler invocations.
    pub sync_limiter: Arc<Semaphore>,
    pub config: AppConfig,
}

impl ServerDeps {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        db_pool: PgPool,
        job_queue: Arc<dyn JobQueue>,
        storage: Arc<dyn BlobStorage>,
        fetcher: Arc<dyn BaseDocumentFetcher>,
        credentials: Arc<dyn BaseCredentialStore>,
        llm: Arc<dyn BaseLlm>,
        ocr: Option<Arc<dyn BaseOcrEngine>>,
        notifier: Arc<dyn BaseNotifier>,
        config: AppConfig,
    ) -> Self {
        let sync_limiter = Arc::new(Semaphore::new(config.databox_max_concurrent_accounts));

        Self {
            db_pool,
            job_queue,
            storage,
            fetcher,
            credentials,
            llm,
            ocr,
            notifier,
            sync_limiter,
            config,
        }
    }
}

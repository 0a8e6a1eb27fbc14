// Shared test harness.
//
// Database-backed tests run against TEST_DATABASE_URL and skip cleanly
// when it is unset, so the suite passes on machines without Postgres.

use std::sync::Arc;

use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use backoffice_core::kernel::jobs::{
    JobContext, JobQueue, PostgresJobQueue, RecordingEventSink,
};
use backoffice_core::kernel::storage::LocalStorage;
use backoffice_core::kernel::test_dependencies::{
    MockCredentialStore, MockFetcher, MockLlm, MockNotifier,
};
use backoffice_core::kernel::{AppConfig, ServerDeps};

/// Connect to the test database, or `None` when TEST_DATABASE_URL is
/// unset.
pub async fn try_pool() -> Option<PgPool> {
    let url = std::env::var("TEST_DATABASE_URL").ok()?;

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&url)
        .await
        .expect("failed to connect to TEST_DATABASE_URL");

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("failed to run migrations");

    Some(pool)
}

/// Everything a handler test needs, with mock collaborators it can
/// inspect afterwards.
pub struct TestHarness {
    pub pool: PgPool,
    pub queue: Arc<PostgresJobQueue>,
    pub deps: Arc<ServerDeps>,
    pub fetcher: Arc<MockFetcher>,
    pub notifier: Arc<MockNotifier>,
    pub llm: Arc<MockLlm>,
    pub events: Arc<RecordingEventSink>,
    pub tenant_id: Uuid,
    _blob_dir: TempDir,
}

impl TestHarness {
    pub async fn new(pool: PgPool) -> Self {
        Self::with_mocks(pool, MockFetcher::new(), MockLlm::new(), MockNotifier::new()).await
    }

    pub async fn with_mocks(
        pool: PgPool,
        fetcher: MockFetcher,
        llm: MockLlm,
        notifier: MockNotifier,
    ) -> Self {
        let blob_dir = TempDir::new().expect("tempdir");
        let storage = Arc::new(
            LocalStorage::new(blob_dir.path())
                .await
                .expect("local storage"),
        );

        let queue = Arc::new(PostgresJobQueue::with_retry_policy(
            pool.clone(),
            std::time::Duration::from_millis(10),
            std::time::Duration::from_millis(50),
        ));

        let fetcher = Arc::new(fetcher);
        let llm = Arc::new(llm);
        let notifier = Arc::new(notifier);
        let events = Arc::new(RecordingEventSink::new());

        let database_url =
            std::env::var("TEST_DATABASE_URL").unwrap_or_else(|_| "postgres://unused".into());

        let deps = Arc::new(ServerDeps::new(
            pool.clone(),
            queue.clone() as Arc<dyn JobQueue>,
            storage,
            fetcher.clone(),
            Arc::new(MockCredentialStore),
            llm.clone(),
            None,
            notifier.clone(),
            AppConfig::for_tests(database_url),
        ));

        Self {
            pool,
            queue,
            deps,
            fetcher,
            llm,
            notifier,
            events,
            tenant_id: Uuid::new_v4(),
            _blob_dir: blob_dir,
        }
    }

    /// A job context as the worker would build it.
    pub fn ctx(&self) -> JobContext {
        JobContext {
            deps: self.deps.clone(),
            job_id: Uuid::new_v4(),
            tenant_id: self.tenant_id,
            cancellation: CancellationToken::new(),
            events: self.events.clone(),
        }
    }
}

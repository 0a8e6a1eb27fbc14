// Main entry point for the background worker process.
//
// Hosts the worker pool and the scheduler in one process. Multiple worker
// processes may run side by side; they coordinate through the job store's
// leases and idempotency keys.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use sqlx::postgres::PgPoolOptions;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use backoffice_core::domains::build_job_registry;
use backoffice_core::kernel::jobs::{
    JobQueue, PostgresJobQueue, Scheduler, TracingEventSink, WorkerConfig, WorkerPool,
};
use backoffice_core::kernel::storage::{BlobStorage, LocalStorage, S3Storage};
use backoffice_core::kernel::{
    AppConfig, BaseOcrEngine, DataboxFetcher, HttpOcrEngine, OpenAiCompatClient,
    PostgresCredentialStore, ServerDeps, StorageBackend, WebhookNotifier,
};
use databox::{DataboxClient, DataboxClientOptions};

#[derive(Parser, Debug)]
#[command(name = "worker", about = "Back-office job worker and scheduler")]
struct Args {
    /// Disable the scheduler loop in this process (workers-only mode).
    #[arg(long)]
    no_scheduler: bool,

    /// Stable worker id; defaults to a random one per start.
    #[arg(long)]
    worker_id: Option<String>,

    /// Symmetric key for account credential decryption.
    #[arg(long, env = "CREDENTIALS_KEY", hide_env_values = true)]
    credentials_key: String,

    /// Endpoint reminders are delivered to.
    #[arg(long, env = "NOTIFY_URL", default_value = "http://localhost:8086/notify")]
    notify_url: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,backoffice_core=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let config = AppConfig::from_env().context("Failed to load configuration")?;

    tracing::info!("Connecting to database...");
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await
        .context("Failed to connect to database")?;

    tracing::info!("Running database migrations...");
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("Failed to run migrations")?;

    // Storage backend
    let storage: Arc<dyn BlobStorage> = match config.storage_backend {
        StorageBackend::Local => Arc::new(
            LocalStorage::new(&config.storage_root)
                .await
                .context("Failed to open local blob storage")?,
        ),
        StorageBackend::S3 => {
            let bucket = config
                .s3_bucket
                .clone()
                .context("S3_BUCKET must be set for the s3 storage backend")?;
            Arc::new(S3Storage::from_env(bucket).await)
        }
    };

    // Collaborators
    let databox_client = DataboxClient::new(DataboxClientOptions {
        base_url: config.databox_gateway_url.clone(),
        ..DataboxClientOptions::default()
    })
    .context("Failed to build databox client")?;
    let fetcher = Arc::new(DataboxFetcher::new(databox_client));
    let credentials = Arc::new(PostgresCredentialStore::new(
        pool.clone(),
        args.credentials_key.clone(),
    ));
    let llm = Arc::new(OpenAiCompatClient::new(
        config.llm_base_url.clone(),
        config.llm_model.clone(),
        config.llm_api_key.clone(),
    ));
    let ocr: Option<Arc<dyn BaseOcrEngine>> = config
        .ocr_base_url
        .as_ref()
        .map(|url| Arc::new(HttpOcrEngine::new(url.clone())) as Arc<dyn BaseOcrEngine>);
    let notifier = Arc::new(WebhookNotifier::new(args.notify_url.clone()));

    let queue = Arc::new(PostgresJobQueue::with_retry_policy(
        pool.clone(),
        config.retry_base,
        config.retry_cap,
    ));

    let deps = Arc::new(ServerDeps::new(
        pool.clone(),
        queue.clone() as Arc<dyn JobQueue>,
        storage,
        fetcher,
        credentials,
        llm,
        ocr,
        notifier,
        config.clone(),
    ));

    let registry = Arc::new(build_job_registry());
    let events = Arc::new(TracingEventSink);

    let mut worker_config = WorkerConfig::from_app_config(&config);
    if let Some(worker_id) = args.worker_id {
        worker_config.worker_id = worker_id;
    }

    let shutdown = CancellationToken::new();
    let pool_task = {
        let worker = Arc::new(WorkerPool::new(
            queue.clone() as Arc<dyn JobQueue>,
            registry,
            deps,
            events,
            worker_config,
        ));
        let token = shutdown.clone();
        tokio::spawn(async move { worker.run(token).await })
    };

    let scheduler_task = if !args.no_scheduler {
        let scheduler = Scheduler::new(
            pool.clone(),
            queue.clone() as Arc<dyn JobQueue>,
            config.scheduler_tick,
        );
        let token = shutdown.clone();
        Some(tokio::spawn(async move { scheduler.run(token).await }))
    } else {
        None
    };

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    tracing::info!("Shutdown signal received");
    shutdown.cancel();

    pool_task.await.context("worker pool task panicked")??;
    if let Some(task) = scheduler_task {
        task.await.context("scheduler task panicked")??;
    }

    tracing::info!("Worker stopped");
    Ok(())
}

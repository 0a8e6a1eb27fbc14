//! Worker pool for processing background jobs.
//!
//! A pool runs C concurrent slots in one process. Each slot independently
//! polls the store, claims a single job, and executes it under a deadline
//! with a background heartbeater keeping the lease alive.
//!
//! # Architecture
//!
//! ```text
//! WorkerPool
//!     ├─► slot 0..C: claim ─► resolve handler ─► execute (timeout)
//!     │        │                    │
//!     │        │                    └─► heartbeat task (lease/2)
//!     │        └─► complete / fail (retry, dead-letter)
//!     └─► recovery loop: bulk re-queue expired leases
//! ```
//!
//! Ordering between jobs is deliberately unspecified; priority only biases
//! which job a free slot claims next.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::events::{JobEvent, JobEventSink};
use super::job::Job;
use super::queue::{ErrorKind, FailOutcome, JobError, JobQueue};
use super::registry::{JobContext, SharedJobRegistry};
use crate::kernel::ServerDeps;

/// Configuration for the worker pool.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Worker ID for this process instance.
    pub worker_id: String,
    /// Number of concurrent job slots.
    pub concurrency: usize,
    /// How long a slot sleeps when no job is available.
    pub poll_interval: Duration,
    /// Grace period for in-flight jobs on shutdown.
    pub shutdown_timeout: Duration,
    /// Lease duration for claimed jobs; heartbeats fire at half this.
    pub lease: Duration,
    /// How often the recovery pass scans for expired leases.
    pub recovery_interval: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker_id: format!("worker-{}", Uuid::new_v4()),
            concurrency: 5,
            poll_interval: Duration::from_secs(2),
            shutdown_timeout: Duration::from_secs(30),
            lease: Duration::from_secs(60),
            recovery_interval: Duration::from_secs(60),
        }
    }
}

impl WorkerConfig {
    pub fn from_app_config(config: &crate::kernel::AppConfig) -> Self {
        Self {
            worker_id: format!("worker-{}", Uuid::new_v4()),
            concurrency: config.worker_concurrency,
            poll_interval: config.worker_poll_interval,
            shutdown_timeout: config.shutdown_timeout,
            lease: config.lease_duration,
            recovery_interval: Duration::from_secs(60),
        }
    }
}

/// Pool of concurrent job slots over one queue.
pub struct WorkerPool {
    queue: Arc<dyn JobQueue>,
    registry: SharedJobRegistry,
    deps: Arc<ServerDeps>,
    events: Arc<dyn JobEventSink>,
    config: WorkerConfig,
}

impl WorkerPool {
    pub fn new(
        queue: Arc<dyn JobQueue>,
        registry: SharedJobRegistry,
        deps: Arc<ServerDeps>,
        events: Arc<dyn JobEventSink>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            queue,
            registry,
            deps,
            events,
            config,
        }
    }

    /// Run until `shutdown` fires, then drain.
    ///
    /// On shutdown the slots stop claiming, in-flight jobs get
    /// `shutdown_timeout` to finish, and anything still running is
    /// abandoned to lease expiry and the recovery pass.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) -> Result<()> {
        info!(
            worker_id = %self.config.worker_id,
            concurrency = self.config.concurrency,
            types = ?self.registry.registered_types(),
            "worker pool starting"
        );

        // Reclaim whatever a previous crash of this process left behind.
        if let Err(e) = self.queue.recover_expired().await {
            error!(error = %e, "startup lease recovery failed");
        }

        let mut slots = JoinSet::new();

        for slot in 0..self.config.concurrency {
            let pool = self.clone();
            let token = shutdown.clone();
            slots.spawn(async move { pool.slot_loop(slot, token).await });
        }

        let recovery_pool = self.clone();
        let recovery_token = shutdown.clone();
        slots.spawn(async move { recovery_pool.recovery_loop(recovery_token).await });

        shutdown.cancelled().await;
        info!(worker_id = %self.config.worker_id, "worker pool draining");

        let drain = async {
            while slots.join_next().await.is_some() {}
        };
        if tokio::time::timeout(self.config.shutdown_timeout, drain)
            .await
            .is_err()
        {
            warn!(
                worker_id = %self.config.worker_id,
                "shutdown timeout elapsed; abandoning in-flight jobs to lease expiry"
            );
            slots.abort_all();
        }

        info!(worker_id = %self.config.worker_id, "worker pool stopped");
        Ok(())
    }

    async fn slot_loop(&self, slot: usize, shutdown: CancellationToken) {
        let types = self.registry.registered_types();

        loop {
            if shutdown.is_cancelled() {
                break;
            }

            let claimed = self
                .queue
                .claim(&self.config.worker_id, &types, self.config.lease)
                .await;

            match claimed {
                Err(e) => {
                    error!(slot, error = %e, "claim failed");
                    sleep_or_shutdown(Duration::from_secs(1), &shutdown).await;
                }
                Ok(None) => {
                    // Jitter decorrelates slots so they don't stampede the
                    // table on every poll tick.
                    let jitter_ms =
                        fastrand::u64(0..=self.config.poll_interval.as_millis() as u64 / 2);
                    let sleep = self.config.poll_interval + Duration::from_millis(jitter_ms);
                    sleep_or_shutdown(sleep, &shutdown).await;
                }
                Ok(Some(job)) => {
                    debug!(slot, job_id = %job.id, job_type = %job.job_type, "claimed job");
                    self.process_job(job, &shutdown).await;
                }
            }
        }
    }

    async fn recovery_loop(&self, shutdown: CancellationToken) {
        loop {
            sleep_or_shutdown(self.config.recovery_interval, &shutdown).await;
            if shutdown.is_cancelled() {
                break;
            }
            if let Err(e) = self.queue.recover_expired().await {
                error!(error = %e, "lease recovery failed");
            }
        }
    }

    async fn process_job(&self, job: Job, shutdown: &CancellationToken) {
        let started = Instant::now();

        self.events.emit(JobEvent::Started {
            job_id: job.id,
            job_type: job.job_type.clone(),
            worker_id: self.config.worker_id.clone(),
            attempt: job.retry_count + 1,
        });

        // Shutdown propagates into the handler through this token; the
        // handler gets the remainder of shutdown_timeout to wind down.
        let job_cancel = shutdown.child_token();

        let lease_lost = CancellationToken::new();
        let heartbeat_stop = CancellationToken::new();
        let heartbeat = self.spawn_heartbeater(
            job.id,
            job_cancel.clone(),
            lease_lost.clone(),
            heartbeat_stop.clone(),
        );

        let timeout = Duration::from_secs(job.timeout_seconds.max(1) as u64);
        let ctx = JobContext {
            deps: self.deps.clone(),
            job_id: job.id,
            tenant_id: job.tenant_id,
            cancellation: job_cancel.clone(),
            events: self.events.clone(),
        };

        let outcome = tokio::select! {
            _ = lease_lost.cancelled() => Err(JobError::lease_lost()),
            result = tokio::time::timeout(timeout, self.registry.execute(&job, ctx)) => {
                match result {
                    Ok(inner) => inner,
                    Err(_elapsed) => Err(JobError::timeout(timeout)),
                }
            }
        };

        heartbeat_stop.cancel();
        let _ = heartbeat.await;

        match outcome {
            Ok(result) => {
                if let Err(e) = self
                    .queue
                    .complete(job.id, &self.config.worker_id, result)
                    .await
                {
                    error!(job_id = %job.id, error = %e, "failed to mark job completed");
                    return;
                }
                self.events.emit(JobEvent::Succeeded {
                    job_id: job.id,
                    job_type: job.job_type.clone(),
                    duration_ms: started.elapsed().as_millis() as u64,
                });
            }
            Err(err) if err.kind == ErrorKind::LeaseLost => {
                // The row belongs to someone else now; recovery or the new
                // owner decides its fate.
                self.events.emit(JobEvent::LeaseLost {
                    job_id: job.id,
                    job_type: job.job_type.clone(),
                });
            }
            Err(err) => {
                match self.queue.fail(job.id, &self.config.worker_id, &err).await {
                    Ok(FailOutcome::Retried { .. }) => {
                        self.events.emit(JobEvent::Failed {
                            job_id: job.id,
                            job_type: job.job_type.clone(),
                            error: err.message.clone(),
                            error_kind: err.kind,
                            will_retry: true,
                        });
                    }
                    Ok(FailOutcome::DeadLettered) => {
                        self.events.emit(JobEvent::DeadLettered {
                            job_id: job.id,
                            job_type: job.job_type.clone(),
                            final_error: err.message.clone(),
                        });
                    }
                    Err(e) => {
                        error!(job_id = %job.id, error = %e, "failed to mark job failed");
                    }
                }
            }
        }
    }

    /// Extend the lease every lease/2 until stopped. A heartbeat that
    /// reports lost ownership cancels the job.
    fn spawn_heartbeater(
        &self,
        job_id: Uuid,
        job_cancel: CancellationToken,
        lease_lost: CancellationToken,
        stop: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let queue = self.queue.clone();
        let worker_id = self.config.worker_id.clone();
        let lease = self.config.lease;

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(lease / 2);
            interval.tick().await; // skip the immediate first tick

            loop {
                tokio::select! {
                    _ = stop.cancelled() => break,
                    _ = interval.tick() => {
                        match queue.heartbeat(job_id, &worker_id, lease).await {
                            Ok(true) => {}
                            Ok(false) => {
                                warn!(job_id = %job_id, "heartbeat found lease taken over");
                                job_cancel.cancel();
                                lease_lost.cancel();
                                break;
                            }
                            Err(e) => {
                                // Transient store trouble; keep the slot
                                // alive and try again next tick.
                                warn!(job_id = %job_id, error = %e, "heartbeat failed");
                            }
                        }
                    }
                }
            }
        })
    }
}

async fn sleep_or_shutdown(duration: Duration, shutdown: &CancellationToken) {
    tokio::select! {
        _ = shutdown.cancelled() => {}
        _ = tokio::time::sleep(duration) => {}
    }
}

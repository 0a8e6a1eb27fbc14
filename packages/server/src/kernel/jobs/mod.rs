//! Job infrastructure for background execution.
//!
//! This module provides the kernel-level machinery:
//! - [`PostgresJobQueue`] - durable queue with leases, retries and
//!   dead-lettering
//! - [`JobRegistry`] - job type to handler map with typed payload decoding
//! - [`WorkerPool`] - N concurrent claim slots with heartbeats and drain
//! - [`Scheduler`] - cron/interval schedule materialisation
//!
//! Domain job handlers live in their respective domains; this module only
//! provides the infrastructure.

pub mod dead_letter;
pub mod events;
pub mod job;
pub mod queue;
pub mod registry;
pub mod schedule;
pub mod scheduler;
pub mod worker;

pub use dead_letter::DeadLetter;
pub use events::{JobEvent, JobEventSink, RecordingEventSink, TracingEventSink};
pub use job::{Job, JobPriority, JobStatus};
pub use queue::{
    EnqueueOptions, EnqueueResult, ErrorKind, FailOutcome, JobError, JobQueue, PostgresJobQueue,
    RecoveryReport, backoff_delay,
};
pub use registry::{JobContext, JobRegistry, SharedJobRegistry};
pub use schedule::{JobSchedule, ScheduleInterval};
pub use scheduler::{Scheduler, schedule_idempotency_key};
pub use worker::{WorkerConfig, WorkerPool};

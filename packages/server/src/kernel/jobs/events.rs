//! Job lifecycle events.
//!
//! Events are facts about execution, emitted through an explicit sink that
//! is handed to the worker and the handlers. The default sink logs; tests
//! install a recording sink to assert on the sequence.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::queue::ErrorKind;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum JobEvent {
    Started {
        job_id: Uuid,
        job_type: String,
        worker_id: String,
        attempt: i32,
    },

    Succeeded {
        job_id: Uuid,
        job_type: String,
        duration_ms: u64,
    },

    Failed {
        job_id: Uuid,
        job_type: String,
        error: String,
        error_kind: ErrorKind,
        will_retry: bool,
    },

    DeadLettered {
        job_id: Uuid,
        job_type: String,
        final_error: String,
    },

    /// A worker noticed mid-run that its lease was taken over.
    LeaseLost { job_id: Uuid, job_type: String },

    /// Databox sync progress for one tenant's job, emitted as counts change.
    SyncProgress {
        tenant_id: Uuid,
        job_id: Uuid,
        documents_found: u64,
        documents_new: u64,
        documents_skipped: u64,
    },
}

/// Observer for job lifecycle events.
///
/// Implementations must be cheap and non-blocking; the worker emits from
/// its hot path.
pub trait JobEventSink: Send + Sync {
    fn emit(&self, event: JobEvent);
}

/// Sink that forwards events to tracing.
#[derive(Debug, Default)]
pub struct TracingEventSink;

impl JobEventSink for TracingEventSink {
    fn emit(&self, event: JobEvent) {
        match &event {
            JobEvent::Started {
                job_id,
                job_type,
                worker_id,
                attempt,
            } => {
                tracing::debug!(job_id = %job_id, job_type = %job_type, worker_id = %worker_id, attempt, "job started");
            }
            JobEvent::Succeeded {
                job_id,
                job_type,
                duration_ms,
            } => {
                tracing::info!(job_id = %job_id, job_type = %job_type, duration_ms, "job succeeded");
            }
            JobEvent::Failed {
                job_id,
                job_type,
                error,
                will_retry,
                ..
            } => {
                tracing::warn!(job_id = %job_id, job_type = %job_type, error = %error, will_retry, "job failed");
            }
            JobEvent::DeadLettered {
                job_id,
                job_type,
                final_error,
            } => {
                tracing::error!(job_id = %job_id, job_type = %job_type, final_error = %final_error, "job dead-lettered");
            }
            JobEvent::LeaseLost { job_id, job_type } => {
                tracing::warn!(job_id = %job_id, job_type = %job_type, "job lease lost");
            }
            JobEvent::SyncProgress {
                tenant_id,
                job_id,
                documents_found,
                documents_new,
                documents_skipped,
            } => {
                tracing::debug!(
                    tenant_id = %tenant_id,
                    job_id = %job_id,
                    documents_found,
                    documents_new,
                    documents_skipped,
                    "databox sync progress"
                );
            }
        }
    }
}

/// Sink that records events in memory; test-only observer.
#[derive(Debug, Default)]
pub struct RecordingEventSink {
    events: std::sync::Mutex<Vec<JobEvent>>,
}

impl RecordingEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<JobEvent> {
        self.events.lock().expect("event sink lock poisoned").clone()
    }
}

impl JobEventSink for RecordingEventSink {
    fn emit(&self, event: JobEvent) {
        self.events
            .lock()
            .expect("event sink lock poisoned")
            .push(event);
    }
}

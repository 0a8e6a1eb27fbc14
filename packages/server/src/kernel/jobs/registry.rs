//! Job registry for deserializing and executing jobs.
//!
//! The registry maps job type strings (e.g., "databox_sync") to handlers.
//! Each handler decodes the JSON payload into its typed struct and runs
//! with a [`JobContext`]. Registration happens once at startup; the
//! registry is read-only afterwards and handed to the worker as an
//! explicit dependency.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::events::JobEventSink;
use super::job::Job;
use super::queue::JobError;
use crate::kernel::ServerDeps;

/// Per-invocation context a handler runs with.
///
/// `cancellation` fires on graceful shutdown and on job timeout; handlers
/// with long inner loops should poll it between I/O steps.
#[derive(Clone)]
pub struct JobContext {
    pub deps: Arc<ServerDeps>,
    pub job_id: Uuid,
    pub tenant_id: Uuid,
    pub cancellation: CancellationToken,
    pub events: Arc<dyn JobEventSink>,
}

type BoxedHandler = Box<
    dyn Fn(
            serde_json::Value,
            JobContext,
        ) -> Pin<Box<dyn Future<Output = Result<serde_json::Value, JobError>> + Send>>
        + Send
        + Sync,
>;

/// Registry that maps job type strings to handlers.
#[derive(Default)]
pub struct JobRegistry {
    registrations: HashMap<&'static str, BoxedHandler>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self {
            registrations: HashMap::new(),
        }
    }

    /// Register a job type with its handler.
    ///
    /// # Panics
    ///
    /// Panics when `job_type` is already registered - two handlers for one
    /// tag is a wiring bug that must not survive startup.
    pub fn register<P, F, Fut>(&mut self, job_type: &'static str, handler: F)
    where
        P: DeserializeOwned + Send + 'static,
        F: Fn(P, JobContext) -> Fut + Send + Sync + Clone + 'static,
        Fut: Future<Output = Result<serde_json::Value, JobError>> + Send + 'static,
    {
        let boxed: BoxedHandler = Box::new(move |value, ctx| {
            let handler = handler.clone();
            Box::pin(async move {
                let payload: P = serde_json::from_value(value).map_err(|e| {
                    JobError::permanent(format!("poison payload for {job_type}: {e}"))
                })?;
                handler(payload, ctx).await
            })
        });

        if self.registrations.insert(job_type, boxed).is_some() {
            panic!("job type '{job_type}' registered twice");
        }
    }

    /// Execute a claimed job with its registered handler.
    pub async fn execute(
        &self,
        job: &Job,
        ctx: JobContext,
    ) -> Result<serde_json::Value, JobError> {
        let handler = self
            .registrations
            .get(job.job_type.as_str())
            .ok_or_else(|| JobError::permanent(format!("unknown job type: {}", job.job_type)))?;

        handler(job.payload.clone(), ctx).await
    }

    pub fn is_registered(&self, job_type: &str) -> bool {
        self.registrations.contains_key(job_type)
    }

    /// All registered types, for the worker's claim filter.
    pub fn registered_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.registrations.keys().map(|k| k.to_string()).collect();
        types.sort();
        types
    }
}

/// Thread-safe registry wrapped in Arc.
pub type SharedJobRegistry = Arc<JobRegistry>;

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    struct TestPayload {
        tenant_id: Uuid,
    }

    #[test]
    fn register_and_check() {
        let mut registry = JobRegistry::new();
        registry.register::<TestPayload, _, _>("test_job", |payload, _ctx| async move {
            Ok(serde_json::json!({"tenant_id": payload.tenant_id}))
        });

        assert!(registry.is_registered("test_job"));
        assert!(!registry.is_registered("unknown_job"));
        assert_eq!(registry.registered_types(), vec!["test_job".to_string()]);
    }

    #[test]
    #[should_panic(expected = "registered twice")]
    fn duplicate_registration_panics() {
        let mut registry = JobRegistry::new();
        registry.register::<TestPayload, _, _>("test_job", |_p, _c| async move {
            Ok(serde_json::Value::Null)
        });
        registry.register::<TestPayload, _, _>("test_job", |_p, _c| async move {
            Ok(serde_json::Value::Null)
        });
    }
}

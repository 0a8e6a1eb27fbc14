// Domain layers - business logic that runs inside job handlers.

pub mod accounts;
pub mod analysis;
pub mod deadlines;
pub mod documents;
pub mod maintenance;
pub mod sync;

use crate::kernel::jobs::JobRegistry;

/// Wire every job type to its handler.
///
/// Called once at startup; the worker treats the result as immutable.
pub fn build_job_registry() -> JobRegistry {
    let mut registry = JobRegistry::new();

    registry.register("databox_sync", |payload, ctx| {
        sync::run_databox_sync(payload, ctx)
    });
    registry.register("document_analysis", |payload, ctx| {
        analysis::run_document_analysis(payload, ctx)
    });
    registry.register("deadline_reminder", |payload, ctx| {
        deadlines::run_deadline_reminder(payload, ctx)
    });
    registry.register("watchlist_check", |payload, ctx| {
        maintenance::run_watchlist_check(payload, ctx)
    });
    registry.register("webhook_delivery", |payload, ctx| {
        maintenance::run_webhook_delivery(payload, ctx)
    });
    registry.register("audit_archive", |payload, ctx| {
        maintenance::run_audit_archive(payload, ctx)
    });
    registry.register("session_cleanup", |payload, ctx| {
        maintenance::run_session_cleanup(payload, ctx)
    });

    registry
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_covers_every_job_type() {
        let registry = build_job_registry();
        for job_type in [
            "databox_sync",
            "document_analysis",
            "deadline_reminder",
            "watchlist_check",
            "webhook_delivery",
            "audit_archive",
            "session_cleanup",
        ] {
            assert!(registry.is_registered(job_type), "{job_type} missing");
        }
        assert_eq!(registry.registered_types().len(), 7);
    }
}

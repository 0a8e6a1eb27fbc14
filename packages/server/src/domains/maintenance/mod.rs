pub mod handlers;

pub use handlers::{
    AuditArchivePayload, SessionCleanupPayload, WatchlistCheckPayload, WebhookDeliveryPayload,
    run_audit_archive, run_session_cleanup, run_watchlist_check, run_webhook_delivery,
};

//! Back-office automation platform for Austrian businesses.
//!
//! The platform polls government portals (FinanzOnline databox, ELDA,
//! Firmenbuch) for newly issued documents, stores them content-addressed,
//! runs an analysis pipeline over each document and reminds tenants before
//! extracted deadlines expire.
//!
//! # Architecture
//!
//! ```text
//! Scheduler ──► jobs table ◄── WorkerPool (N slots)
//!                                  │
//!                                  ├─► databox_sync ──► DocumentStore ──► BlobStorage
//!                                  ├─► document_analysis ──► pipeline (OCR/LLM)
//!                                  └─► deadline_reminder ──► notifier
//! ```
//!
//! `kernel` holds infrastructure (job queue, worker, scheduler, storage,
//! collaborator clients); `domains` holds the business logic that runs
//! inside job handlers. Business logic never touches infrastructure other
//! than through [`kernel::ServerDeps`].

pub mod common;
pub mod domains;
pub mod kernel;

pub mod handler;

pub use handler::{DeadlineReminderPayload, DeadlineReminderResult, run_deadline_reminder};

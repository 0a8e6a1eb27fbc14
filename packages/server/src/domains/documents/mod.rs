pub mod document;
pub mod store;

pub use document::{Document, DocumentStatus, NewDocument, ReminderOffset};
pub use store::{CreateOutcome, DocumentError, DocumentStore};

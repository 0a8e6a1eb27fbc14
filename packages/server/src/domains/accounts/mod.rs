pub mod account;

pub use account::{DataboxAccount, Portal};

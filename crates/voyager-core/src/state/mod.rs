//! State machine module.

pub mod machine;

pub use machine::{StateError, TransferMachine, TransferState};

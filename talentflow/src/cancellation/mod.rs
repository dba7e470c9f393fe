//! Cooperative cancellation for in-flight analysis runs.

mod token;

pub use token::{CancelCallback, CancellationToken};

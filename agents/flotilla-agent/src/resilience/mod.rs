//! Resilience module
//!
//! Retry, backoff, and timeout policies applied around fallible
//! asynchronous operations.

pub mod retry;

pub use retry::{ResilientOperation, RetryPolicy};

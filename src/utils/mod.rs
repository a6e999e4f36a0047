//! Shared utilities: errors, logging and restart backoff.

pub mod error;
pub mod logging;
pub mod retry;

//! Backoff and error classification for worker restarts.
//!
//! This module provides:
//! - [`compute_backoff`]: exponential-backoff delay calculator with optional jitter.
//! - [`is_transient`]: classifies an [`IndexerError`] as restartable or not.
//!
//! Engines never retry a failed block themselves; the supervisor uses these
//! helpers to decide whether (and when) a fresh worker is started.

use crate::config::RestartConfig;
use crate::utils::error::IndexerError;
use std::time::Duration;

// ─────────────────────────────────────────────────────────────────────────────
// Backoff calculation
// ─────────────────────────────────────────────────────────────────────────────

/// Computes the delay before the next restart.
///
/// `attempt` is 1-indexed: `attempt = 1` is the delay before the first
/// restart, `attempt = 2` before the second, etc.
///
/// Formula: `delay = initial_backoff_ms * backoff_multiplier^(attempt - 1)`,
/// capped at `max_backoff_ms`, then ±25 % jitter if enabled.
#[must_use]
pub fn compute_backoff(cfg: &RestartConfig, attempt: u32) -> Duration {
    let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
    let base = cfg.initial_backoff_ms as f64 * cfg.backoff_multiplier.powi(exponent);
    let capped = base.min(cfg.max_backoff_ms as f64);

    let ms = if cfg.jitter {
        // jitter factor in [0.75, 1.25], seeded from the clock
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .subsec_nanos();
        let factor = 0.75 + f64::from(nanos % 1_000_000) / 1_000_000.0 * 0.5;
        capped * factor
    } else {
        capped
    };

    Duration::from_millis(ms as u64)
}

// ─────────────────────────────────────────────────────────────────────────────
// Error classification
// ─────────────────────────────────────────────────────────────────────────────

/// Returns `true` if `err` is a transient failure after which restarting the
/// worker from its last durable marker can succeed.
///
/// | Error variant          | Restarted | Reason                                  |
/// |------------------------|-----------|-----------------------------------------|
/// | `LedgerError`          | ✅        | Peer unavailable, subscription dropped  |
/// | `ConnectionError`      | ✅        | Network blip                            |
/// | `InternalError`        | ✅        | tokio task join noise                   |
/// | `DatabaseError` (I/O)  | ✅        | Connection reset, pool timeout          |
/// | `DatabaseError` (rest) | ❌        | Schema / constraint violations are stable |
/// | `DecodingError`        | ❌        | A malformed block will not self-heal    |
/// | `StorageError`         | ❌        | Backend misuse                          |
/// | `ConfigError`          | ❌        | Programmer error                        |
/// | `RetryExhausted`       | ❌        | Already exhausted                       |
#[must_use]
pub fn is_transient(err: &IndexerError) -> bool {
    match err {
        IndexerError::LedgerError(_)
        | IndexerError::ConnectionError(_)
        | IndexerError::InternalError(_) => true,
        IndexerError::DatabaseError(db) => matches!(
            db,
            sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed
        ),
        _ => false,
    }
}

//! Retry logic with exponential backoff
//!
//! Directory renames and removals inside a module cache can fail transiently while
//! another process holds a handle on a file below them. This module retries those
//! operations with exponential backoff and optional jitter.
//!
//! # Example
//!
//! ```no_run
//! use modcache_race::retry::with_retry;
//! use modcache_race::config::RetryConfig;
//! use modcache_race::error::Error;
//!
//! # async fn example() -> Result<(), Error> {
//! let config = RetryConfig::default();
//! with_retry(&config, || async {
//!     tokio::fs::rename("staging", "final").await.map_err(Error::from)
//! })
//! .await?;
//! # Ok(())
//! # }
//! ```

use crate::config::RetryConfig;
use crate::error::{Error, ExtractionError};
use rand::Rng;
use std::future::Future;
use std::io::ErrorKind;
use std::time::Duration;

/// Trait for errors that can be classified as retryable or not
///
/// Sharing violations and busy resources should return `true`.
/// Missing files, corrupt archives, and checksum failures should return `false`.
pub trait IsRetryable {
    /// Returns true if the error is transient and the operation should be retried
    fn is_retryable(&self) -> bool;
}

impl IsRetryable for std::io::Error {
    fn is_retryable(&self) -> bool {
        // Windows reports sharing violations and access denied on a busy
        // directory as PermissionDenied.
        matches!(
            self.kind(),
            ErrorKind::PermissionDenied
                | ErrorKind::ResourceBusy
                | ErrorKind::Interrupted
                | ErrorKind::WouldBlock
        )
    }
}

impl IsRetryable for Error {
    fn is_retryable(&self) -> bool {
        match self {
            Error::Io(e) => e.is_retryable(),
            Error::Extraction(ExtractionError::Rename { source, .. })
            | Error::Extraction(ExtractionError::Marker { source, .. }) => source.is_retryable(),
            Error::Extraction(_) => false,
            Error::Config { .. } => false,
            Error::InvalidModule { .. } => false,
            Error::TaskFailed(_) => false,
            Error::Other(_) => false,
        }
    }
}

/// Execute an async operation with exponential backoff retry logic
///
/// Returns the successful result or the last error after all retry attempts are
/// exhausted. Non-retryable errors are returned immediately.
pub async fn with_retry<F, Fut, T, E>(config: &RetryConfig, mut operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: IsRetryable + std::fmt::Display,
{
    let mut attempt = 0;
    let mut delay = config.initial_delay;

    loop {
        match operation().await {
            Ok(result) => {
                if attempt > 0 {
                    tracing::info!(attempts = attempt + 1, "succeeded after backing off");
                }
                return Ok(result);
            }
            Err(e) if e.is_retryable() && attempt < config.max_attempts => {
                attempt += 1;

                tracing::debug!(
                    attempt,
                    max_attempts = config.max_attempts,
                    delay_ms = delay.as_millis(),
                    "transient filesystem error, backing off"
                );

                let jittered_delay = if config.jitter {
                    add_jitter(delay)
                } else {
                    delay
                };

                tokio::time::sleep(jittered_delay).await;

                let next_delay =
                    Duration::from_secs_f64(delay.as_secs_f64() * config.backoff_multiplier);
                delay = next_delay.min(config.max_delay);
            }
            Err(e) => {
                if e.is_retryable() {
                    tracing::error!(
                        error = %e,
                        attempts = attempt + 1,
                        "still failing after every retry"
                    );
                } else {
                    tracing::debug!(error = %e, "not retrying permanent error");
                }
                return Err(e);
            }
        }
    }
}

/// Add random jitter to a delay
///
/// The actual delay will be between `delay` and `2 * delay`.
fn add_jitter(delay: Duration) -> Duration {
    let mut rng = rand::thread_rng();
    let jitter_factor: f64 = rng.gen_range(0.0..=1.0);
    Duration::from_secs_f64(delay.as_secs_f64() * (1.0 + jitter_factor))
}

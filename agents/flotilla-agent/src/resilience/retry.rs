//! Retry Policies
//!
//! Wraps fallible async operations in bounded retry with exponential
//! backoff plus jitter and an overall timeout. Two independently
//! configured policies exist: one for HQ HTTP calls and one for image
//! pulls.

use std::future::Future;
use std::time::Duration;

use anyhow::{anyhow, Result};
use rand::Rng;
use tracing::warn;

use crate::connection::protocol::HqStatusError;

/// Message fragments that mark an untyped error as transient. Fragile and
/// kept only as a fallback for errors that arrive without a useful type.
const RETRY_KEYWORDS: [&str; 4] = ["timeout", "network", "connection", "unreachable"];

/// Retry and timeout parameters for one class of operations.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts allowed, the first one included.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Overall bound covering every attempt and the waits between them.
    pub timeout: Duration,
}

impl RetryPolicy {
    /// Default policy for HQ HTTP calls.
    pub fn http() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            timeout: Duration::from_secs(30),
        }
    }

    /// Default policy for image pulls, which legitimately take minutes.
    pub fn image_pull() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(30),
            timeout: Duration::from_secs(600),
        }
    }

    /// Delay before the attempt following attempt `n`, with fresh jitter.
    fn backoff_delay(&self, attempt: u32) -> Duration {
        let jitter = rand::thread_rng().gen_range(0.5..1.5);
        self.backoff_delay_with_jitter(attempt, jitter)
    }

    /// `min(base * 2^(n-1) * jitter, max)`. Jitter spreads retries out so
    /// a fleet of agents does not hammer HQ or the registry in lockstep.
    fn backoff_delay_with_jitter(&self, attempt: u32, jitter: f64) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31) as i32;
        let delay = self.base_delay.as_secs_f64() * 2f64.powi(exponent) * jitter;
        Duration::from_secs_f64(delay.min(self.max_delay.as_secs_f64()))
    }
}

/// Executes async operations under a [`RetryPolicy`].
pub struct ResilientOperation {
    name: &'static str,
    policy: RetryPolicy,
}

impl ResilientOperation {
    pub fn new(name: &'static str, policy: RetryPolicy) -> Self {
        Self { name, policy }
    }

    /// Runs `op` until it succeeds, a non-retryable error occurs, retries
    /// are exhausted, or the overall timeout fires. The timeout drops the
    /// in-flight attempt and surfaces a timeout error; exhausted retries
    /// surface the last failure.
    pub async fn execute<T, F, Fut>(&self, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let attempts = async {
            let mut attempt: u32 = 1;
            loop {
                match op().await {
                    Ok(value) => return Ok(value),
                    Err(err) => {
                        if attempt >= self.policy.max_retries || !is_retryable(&err) {
                            return Err(err);
                        }

                        let delay = self.policy.backoff_delay(attempt);
                        warn!(
                            operation = self.name,
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            error = %err,
                            "Transient failure, retrying"
                        );
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                    }
                }
            }
        };

        match tokio::time::timeout(self.policy.timeout, attempts).await {
            Ok(result) => result,
            Err(_) => Err(anyhow!(
                "{} timed out after {:?}",
                self.name,
                self.policy.timeout
            )),
        }
    }
}

/// Classifies an error as transient.
///
/// Typed causes are checked first: request timeouts and connection
/// failures from the HTTP client, network-class IO errors, elapsed
/// timers, and non-success HQ statuses. The keyword match over the error
/// text is a compatibility fallback only.
pub fn is_retryable(err: &anyhow::Error) -> bool {
    for cause in err.chain() {
        if let Some(e) = cause.downcast_ref::<reqwest::Error>() {
            if e.is_timeout() || e.is_connect() {
                return true;
            }
        }
        if let Some(e) = cause.downcast_ref::<std::io::Error>() {
            if matches!(
                e.kind(),
                std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::ConnectionRefused
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::NotConnected
                    | std::io::ErrorKind::UnexpectedEof
            ) {
                return true;
            }
        }
        if cause.downcast_ref::<tokio::time::error::Elapsed>().is_some() {
            return true;
        }
        if cause.downcast_ref::<HqStatusError>().is_some() {
            return true;
        }
    }

    let text = format!("{err:#}").to_lowercase();
    RETRY_KEYWORDS.iter().any(|keyword| text.contains(keyword))
}

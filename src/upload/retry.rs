use crate::config::UploadConfig;
use rand::Rng;
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Exponential backoff with jitter
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Fraction of each delay randomized in either direction
    pub jitter: f64,
}

impl BackoffPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
            jitter: 0.0,
        }
    }

    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// Delay before retrying after failed attempt `attempt` (1-based), before jitter
    pub fn base_delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let delay_ms = (self.base_delay.as_millis() as u64).saturating_mul(2_u64.pow(exponent));
        let delay = Duration::from_millis(delay_ms);

        if delay > self.max_delay {
            self.max_delay
        } else {
            delay
        }
    }

    /// Jittered delay, still capped at `max_delay`
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let delay = self.base_delay_for(attempt);
        if self.jitter <= 0.0 || delay.is_zero() {
            return delay;
        }

        let factor = 1.0 + rand::thread_rng().gen_range(-self.jitter..=self.jitter);
        let jittered = delay.mul_f64(factor.max(0.0));
        jittered.min(self.max_delay)
    }
}

impl From<&UploadConfig> for BackoffPolicy {
    fn from(config: &UploadConfig) -> Self {
        BackoffPolicy::new(config.max_retries, config.base_delay(), config.max_delay())
            .with_jitter(config.jitter)
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        BackoffPolicy::from(&UploadConfig::default())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RetryError<E> {
    /// Every attempt failed; carries the last error
    Exhausted { attempts: u32, last_error: E },
    /// Cancelled between attempts
    Cancelled { attempts: u32, last_error: Option<E> },
}

impl<E> RetryError<E> {
    pub fn attempts(&self) -> u32 {
        match self {
            RetryError::Exhausted { attempts, .. } | RetryError::Cancelled { attempts, .. } => {
                *attempts
            }
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, RetryError::Cancelled { .. })
    }

    pub fn last_error(&self) -> Option<&E> {
        match self {
            RetryError::Exhausted { last_error, .. } => Some(last_error),
            RetryError::Cancelled { last_error, .. } => last_error.as_ref(),
        }
    }
}

impl<E: fmt::Display> fmt::Display for RetryError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetryError::Exhausted {
                attempts,
                last_error,
            } => write!(f, "gave up after {} attempt(s): {}", attempts, last_error),
            RetryError::Cancelled {
                attempts,
                last_error: Some(e),
            } => write!(f, "cancelled after {} attempt(s): {}", attempts, e),
            RetryError::Cancelled { attempts, .. } => {
                write!(f, "cancelled after {} attempt(s)", attempts)
            }
        }
    }
}

/// Run `operation` until it succeeds or the policy's attempts are spent.
///
/// The closure receives the 1-based attempt number. Cancellation is checked
/// before each attempt and during the backoff wait, never mid-attempt.
/// Returns the value and the number of attempts used.
pub async fn retry_with_backoff<T, E, F, Fut>(
    policy: &BackoffPolicy,
    cancel: &CancellationToken,
    mut operation: F,
) -> Result<(T, u32), RetryError<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: fmt::Display,
{
    let mut last_error = None;

    for attempt in 1..=policy.max_attempts {
        if cancel.is_cancelled() {
            return Err(RetryError::Cancelled {
                attempts: attempt - 1,
                last_error,
            });
        }

        match operation(attempt).await {
            Ok(value) => return Ok((value, attempt)),
            Err(e) => {
                if attempt == policy.max_attempts {
                    warn!("Attempt {}/{} failed: {}", attempt, policy.max_attempts, e);
                    return Err(RetryError::Exhausted {
                        attempts: attempt,
                        last_error: e,
                    });
                }

                let delay = policy.delay_for(attempt);
                warn!(
                    "Attempt {}/{} failed: {}; retrying in {:?}",
                    attempt, policy.max_attempts, e, delay
                );
                last_error = Some(e);

                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!("Retry loop cancelled during backoff");
                        return Err(RetryError::Cancelled {
                            attempts: attempt,
                            last_error,
                        });
                    }
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }
    }

    // max_attempts >= 1, so the loop always returns
    Err(RetryError::Cancelled {
        attempts: policy.max_attempts,
        last_error,
    })
}

/// How a failed commit was handled
#[derive(Debug, Clone, PartialEq)]
pub struct CommitFailure<E> {
    pub error: E,
    /// Whether the cleanup step succeeded
    pub cleaned_up: bool,
}

/// Run `commit`; when it fails, run `cleanup` before reporting the failure.
///
/// Cleanup errors are logged and reflected in `cleaned_up`, never returned.
pub async fn commit_with_cleanup<T, E, C, CFut, D, DFut, DE>(
    commit: C,
    cleanup: D,
) -> Result<T, CommitFailure<E>>
where
    C: FnOnce() -> CFut,
    CFut: Future<Output = Result<T, E>>,
    D: FnOnce() -> DFut,
    DFut: Future<Output = Result<(), DE>>,
    E: fmt::Display,
    DE: fmt::Display,
{
    match commit().await {
        Ok(value) => Ok(value),
        Err(error) => {
            warn!("Commit failed: {}; running cleanup", error);
            let cleaned_up = match cleanup().await {
                Ok(()) => true,
                Err(e) => {
                    warn!("Cleanup after failed commit also failed: {}", e);
                    false
                }
            };
            Err(CommitFailure { error, cleaned_up })
        }
    }
}

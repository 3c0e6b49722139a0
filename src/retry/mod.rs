use crate::error::{ErrorKind, ResilienceError};
use backoff::{backoff::Backoff, ExponentialBackoff, ExponentialBackoffBuilder};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Observability hook invoked before each retry sleep with the attempt
/// number that just failed and its error. Never alters control flow.
pub type OnRetry = Arc<dyn Fn(u32, &ResilienceError) + Send + Sync>;

/// Retry policy: attempt budget, backoff shape and error classification
#[derive(Clone)]
pub struct RetryPolicy {
    /// Maximum total attempts, including the first
    pub max_attempts: u32,
    /// Initial backoff delay in milliseconds
    pub base_delay_ms: u64,
    /// Backoff ceiling in milliseconds
    pub max_delay_ms: u64,
    /// Multiplier applied to the delay after each attempt
    pub exponential_base: f64,
    /// Randomize each delay in a 0.5x-1.5x band so concurrent retries
    /// desynchronize
    pub jitter: bool,
    /// Error kinds worth retrying
    pub retryable_kinds: Vec<ErrorKind>,
    /// Case-insensitive substrings matched against the error message,
    /// a fallback for opaque third-party errors whose kind is `Other`
    pub retryable_matchers: Vec<String>,
    /// Per-retry observability hook
    pub on_retry: Option<OnRetry>,
}

impl std::fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("base_delay_ms", &self.base_delay_ms)
            .field("max_delay_ms", &self.max_delay_ms)
            .field("exponential_base", &self.exponential_base)
            .field("jitter", &self.jitter)
            .field("retryable_kinds", &self.retryable_kinds)
            .field("retryable_matchers", &self.retryable_matchers)
            .field("on_retry", &self.on_retry.as_ref().map(|_| "Fn"))
            .finish()
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1000,
            max_delay_ms: 10000,
            exponential_base: 2.0,
            jitter: true,
            retryable_kinds: vec![
                ErrorKind::Timeout,
                ErrorKind::Connection,
                ErrorKind::RateLimited,
                ErrorKind::Unavailable,
            ],
            retryable_matchers: Vec::new(),
            on_retry: None,
        }
    }
}

impl RetryPolicy {
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay_ms = delay.as_millis() as u64;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay_ms = delay.as_millis() as u64;
        self
    }

    pub fn with_exponential_base(mut self, base: f64) -> Self {
        self.exponential_base = base;
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn with_retryable_matchers(mut self, matchers: Vec<String>) -> Self {
        self.retryable_matchers = matchers;
        self
    }

    pub fn with_on_retry(mut self, on_retry: OnRetry) -> Self {
        self.on_retry = Some(on_retry);
        self
    }

    /// Whether an error is worth another attempt. Kind-based first;
    /// message substrings as a fallback. Cancellation is never retried.
    pub fn is_retryable(&self, error: &ResilienceError) -> bool {
        if matches!(error, ResilienceError::Cancelled) {
            return false;
        }

        if self.retryable_kinds.contains(&error.kind()) {
            return true;
        }

        let message = error.to_string().to_lowercase();
        self.retryable_matchers
            .iter()
            .any(|m| message.contains(&m.to_lowercase()))
    }
}

/// Outcome of a retry loop. Carries the attempt count so callers can
/// distinguish "never attempted", "failed after N attempts" and
/// "succeeded on attempt K".
#[derive(Debug)]
pub enum RetryOutcome<T> {
    Success { value: T, attempts: u32 },
    Failure { error: ResilienceError, attempts: u32 },
}

impl<T> RetryOutcome<T> {
    pub fn is_success(&self) -> bool {
        matches!(self, RetryOutcome::Success { .. })
    }

    pub fn attempts(&self) -> u32 {
        match self {
            RetryOutcome::Success { attempts, .. } => *attempts,
            RetryOutcome::Failure { attempts, .. } => *attempts,
        }
    }

    pub fn into_result(self) -> Result<T, ResilienceError> {
        match self {
            RetryOutcome::Success { value, .. } => Ok(value),
            RetryOutcome::Failure { error, .. } => Err(error),
        }
    }
}

/// Retry executor with exponential backoff
pub struct RetryExecutor {
    policy: RetryPolicy,
}

impl RetryExecutor {
    /// Create a new retry executor
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run an operation with retries. Attempts are strictly sequential;
    /// attempt k+1 never starts before attempt k completes.
    pub async fn execute<F, Fut, T>(&self, mut f: F) -> RetryOutcome<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ResilienceError>>,
    {
        let mut backoff = self.create_backoff();
        let mut attempt: u32 = 1;

        loop {
            debug!(
                attempt,
                max_attempts = self.policy.max_attempts,
                "Executing operation"
            );

            match f().await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(attempt, "Operation succeeded after retries");
                    }
                    return RetryOutcome::Success { value, attempts: attempt };
                }
                Err(e) => {
                    if !self.policy.is_retryable(&e) {
                        debug!(attempt, error = %e, "Error not retryable");
                        return RetryOutcome::Failure { error: e, attempts: attempt };
                    }

                    if attempt >= self.policy.max_attempts {
                        warn!(
                            attempt,
                            max_attempts = self.policy.max_attempts,
                            error = %e,
                            "Operation failed after max attempts"
                        );
                        return RetryOutcome::Failure { error: e, attempts: attempt };
                    }

                    if let Some(on_retry) = &self.policy.on_retry {
                        on_retry(attempt, &e);
                    }

                    if let Some(wait) = backoff.next_backoff() {
                        debug!(
                            attempt,
                            wait_ms = wait.as_millis(),
                            error = %e,
                            "Operation failed, retrying after backoff"
                        );
                        tokio::time::sleep(wait).await;
                    } else {
                        warn!(attempt, error = %e, "Backoff exhausted");
                        return RetryOutcome::Failure { error: e, attempts: attempt };
                    }

                    attempt += 1;
                }
            }
        }
    }

    fn create_backoff(&self) -> ExponentialBackoff {
        ExponentialBackoffBuilder::new()
            .with_initial_interval(Duration::from_millis(self.policy.base_delay_ms))
            .with_max_interval(Duration::from_millis(self.policy.max_delay_ms))
            .with_multiplier(self.policy.exponential_base)
            .with_randomization_factor(if self.policy.jitter { 0.5 } else { 0.0 })
            .with_max_elapsed_time(None) // Max attempts are enforced manually
            .build()
    }
}

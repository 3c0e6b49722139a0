use crate::batch::{execute_batch, BatchOptions, BatchOutcome};
use crate::circuit_breaker::{CircuitBreakerConfig, CircuitBreakerRegistry, CircuitState};
use crate::error::{ResilienceError, Result};
use crate::reporter::{ErrorCategory, ErrorRecord, ErrorReporter, Severity};
use crate::retry::{OnRetry, RetryExecutor, RetryOutcome, RetryPolicy};
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tracing::{debug, warn};

/// Correlation context for one logical operation
#[derive(Debug, Clone)]
pub struct InvokeContext {
    /// Logical operation name, also the default breaker identity
    pub operation: String,
    pub user_id: Option<String>,
    pub request_id: Option<String>,
    pub metadata: HashMap<String, String>,
}

impl InvokeContext {
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            user_id: None,
            request_id: None,
            metadata: HashMap::new(),
        }
    }

    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Alternative result-producing path used once the primary path is
/// exhausted or short-circuited
pub type Fallback<T> = Arc<dyn Fn() -> BoxFuture<'static, Result<T>> + Send + Sync>;

/// Caller-supplied acceptance check on an otherwise successful response
pub type Validator<T> = Arc<dyn Fn(&T) -> bool + Send + Sync>;

/// Per-call knobs for [`Invoker::invoke`]
pub struct InvokeOptions<T> {
    /// Maximum total attempts, including the first
    pub retries: u32,
    /// Breaker identity; defaults to `"op:" + context.operation`
    pub circuit_breaker: Option<String>,
    /// Per-attempt deadline
    pub timeout: Duration,
    /// Breaker thresholds for a breaker created by this call. Ignored
    /// when the named breaker already exists.
    pub breaker_config: Option<CircuitBreakerConfig>,
    /// Extra case-insensitive substrings treated as retryable
    pub retryable_matchers: Vec<String>,
    pub fallback: Option<Fallback<T>>,
    pub validate: Option<Validator<T>>,
    pub on_retry: Option<OnRetry>,
}

// Manual impl: the derive would demand `T: Clone`, but only the hooks
// are cloned, never a `T`.
impl<T> Clone for InvokeOptions<T> {
    fn clone(&self) -> Self {
        Self {
            retries: self.retries,
            circuit_breaker: self.circuit_breaker.clone(),
            timeout: self.timeout,
            breaker_config: self.breaker_config.clone(),
            retryable_matchers: self.retryable_matchers.clone(),
            fallback: self.fallback.clone(),
            validate: self.validate.clone(),
            on_retry: self.on_retry.clone(),
        }
    }
}

impl<T> Default for InvokeOptions<T> {
    fn default() -> Self {
        Self {
            retries: 3,
            circuit_breaker: None,
            timeout: Duration::from_secs(30),
            breaker_config: None,
            retryable_matchers: Vec::new(),
            fallback: None,
            validate: None,
            on_retry: None,
        }
    }
}

impl<T> InvokeOptions<T> {
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn with_circuit_breaker(mut self, name: impl Into<String>) -> Self {
        self.circuit_breaker = Some(name.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_breaker_config(mut self, config: CircuitBreakerConfig) -> Self {
        self.breaker_config = Some(config);
        self
    }

    pub fn with_retryable_matchers(mut self, matchers: Vec<String>) -> Self {
        self.retryable_matchers = matchers;
        self
    }

    pub fn with_fallback(mut self, fallback: Fallback<T>) -> Self {
        self.fallback = Some(fallback);
        self
    }

    pub fn with_validate(mut self, validate: Validator<T>) -> Self {
        self.validate = Some(validate);
        self
    }

    pub fn with_on_retry(mut self, on_retry: OnRetry) -> Self {
        self.on_retry = Some(on_retry);
        self
    }
}

/// Composition root wiring retry, circuit breaking, per-attempt
/// timeouts, response validation, fallback and failure reporting
/// around any flaky upstream call.
///
/// Explicitly constructed and dependency-injected; [`Invoker::global`]
/// offers a process-wide default purely as a convenience.
#[derive(Debug, Clone)]
pub struct Invoker {
    registry: CircuitBreakerRegistry,
    reporter: ErrorReporter,
    breaker_config: CircuitBreakerConfig,
    retry_policy: RetryPolicy,
}

impl Default for Invoker {
    fn default() -> Self {
        Self::new(CircuitBreakerRegistry::new(), ErrorReporter::default())
    }
}

static GLOBAL_INVOKER: OnceLock<Invoker> = OnceLock::new();

impl Invoker {
    /// Create an invoker over the given registry and reporter
    pub fn new(registry: CircuitBreakerRegistry, reporter: ErrorReporter) -> Self {
        Self {
            registry,
            reporter,
            breaker_config: CircuitBreakerConfig::default(),
            retry_policy: RetryPolicy::default(),
        }
    }

    /// Process-wide default instance
    pub fn global() -> &'static Invoker {
        GLOBAL_INVOKER.get_or_init(Invoker::default)
    }

    /// Default thresholds for breakers created by this invoker
    pub fn with_breaker_config(mut self, config: CircuitBreakerConfig) -> Self {
        self.breaker_config = config;
        self
    }

    /// Base retry policy; per-call options override attempts and matchers
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    pub fn registry(&self) -> &CircuitBreakerRegistry {
        &self.registry
    }

    pub fn reporter(&self) -> &ErrorReporter {
        &self.reporter
    }

    /// Run an operation through the full resilience pipeline.
    ///
    /// Each attempt goes breaker admission, then the operation raced
    /// against the per-attempt timeout, then the optional validation
    /// hook. Transient failures are retried with backoff; terminal
    /// failures are reported and either replaced by the fallback's
    /// result or returned to the caller. A failing fallback never masks
    /// the original error.
    pub async fn invoke<F, Fut, T>(
        &self,
        mut op: F,
        ctx: &InvokeContext,
        options: InvokeOptions<T>,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        let breaker_name = options
            .circuit_breaker
            .clone()
            .unwrap_or_else(|| format!("op:{}", ctx.operation));
        let breaker = self.registry.get_or_create(
            &breaker_name,
            options
                .breaker_config
                .clone()
                .unwrap_or_else(|| self.breaker_config.clone()),
        );

        let mut policy = self
            .retry_policy
            .clone()
            .with_max_attempts(options.retries);
        policy
            .retryable_matchers
            .extend(options.retryable_matchers.iter().cloned());
        policy.on_retry = Some(self.retry_reporting_hook(ctx, options.on_retry.clone()));

        let executor = RetryExecutor::new(policy);

        let timeout = options.timeout;
        let operation = ctx.operation.clone();
        let validate = options.validate.clone();

        let outcome = executor
            .execute(|| {
                let fut = op();
                let breaker = breaker.clone();
                let operation = operation.clone();
                let validate = validate.clone();
                async move {
                    let value = breaker
                        .execute(|| async move {
                            match tokio::time::timeout(timeout, fut).await {
                                Ok(result) => result,
                                Err(_) => Err(ResilienceError::Timeout { operation, timeout }),
                            }
                        })
                        .await?;

                    if let Some(validate) = &validate {
                        if !validate(&value) {
                            return Err(ResilienceError::Validation(
                                "response rejected by validation hook".to_string(),
                            ));
                        }
                    }
                    Ok(value)
                }
            })
            .await;

        match outcome {
            RetryOutcome::Success { value, attempts } => {
                if attempts > 1 {
                    debug!(
                        operation = %ctx.operation,
                        attempts,
                        "Operation recovered after retries"
                    );
                }
                Ok(value)
            }
            RetryOutcome::Failure { error, attempts } => {
                self.report_terminal(ctx, &error, attempts, options.retries)
                    .await;
                self.resolve_failure(ctx, error, options.fallback).await
            }
        }
    }

    /// Run many already-composed resilient calls with bounded
    /// concurrency. See [`execute_batch`] for chunking semantics.
    pub async fn invoke_batch<T>(
        &self,
        calls: Vec<BoxFuture<'_, Result<T>>>,
        options: BatchOptions,
    ) -> Result<Vec<BatchOutcome<T>>> {
        execute_batch(calls, options).await
    }

    /// Current state of a named breaker, or `None` if it was never used
    pub async fn circuit_status(&self, name: &str) -> Option<CircuitState> {
        self.registry.state(name).await
    }

    /// Force a named breaker back to closed
    pub async fn reset_circuit(&self, name: &str) {
        self.registry.reset(name).await;
    }

    /// Diagnostic query over recently reported failures
    pub async fn recent_errors(
        &self,
        source: Option<&str>,
        since: Option<DateTime<Utc>>,
    ) -> Vec<ErrorRecord> {
        self.reporter.recent(source, since).await
    }

    /// Hook run on every failed attempt that will be retried: records
    /// a medium-severity event and forwards to the caller's hook.
    fn retry_reporting_hook(&self, ctx: &InvokeContext, user_hook: Option<OnRetry>) -> OnRetry {
        let reporter = self.reporter.clone();
        let ctx = ctx.clone();
        Arc::new(move |attempt, error| {
            let mut record = ErrorRecord::new(
                ctx.operation.as_str(),
                error.to_string(),
                error.kind(),
                ErrorCategory::RetryAttempt,
                Severity::Medium,
            )
            .with_attempt(attempt);
            if let Some(user_id) = &ctx.user_id {
                record = record.with_user_id(user_id.as_str());
            }
            if let Some(request_id) = &ctx.request_id {
                record = record.with_request_id(request_id.as_str());
            }
            for (key, value) in &ctx.metadata {
                record = record.with_context(key.as_str(), value.as_str());
            }

            // Recording must not delay the retry loop
            let reporter = reporter.clone();
            tokio::spawn(async move { reporter.record(record).await });

            if let Some(user_hook) = &user_hook {
                user_hook(attempt, error);
            }
        })
    }

    async fn report_terminal(
        &self,
        ctx: &InvokeContext,
        error: &ResilienceError,
        attempts: u32,
        retries: u32,
    ) {
        let category = match error {
            ResilienceError::CircuitOpen { .. } => ErrorCategory::CircuitOpen,
            ResilienceError::Validation(_) => ErrorCategory::ValidationFailure,
            _ if attempts >= retries => ErrorCategory::RetryExhausted,
            _ => ErrorCategory::FinalFailure,
        };

        let mut record = ErrorRecord::new(
            ctx.operation.as_str(),
            error.to_string(),
            error.kind(),
            category,
            Severity::High,
        )
        .with_attempt(attempts);
        if let Some(user_id) = &ctx.user_id {
            record = record.with_user_id(user_id.as_str());
        }
        if let Some(request_id) = &ctx.request_id {
            record = record.with_request_id(request_id.as_str());
        }
        for (key, value) in &ctx.metadata {
            record = record.with_context(key.as_str(), value.as_str());
        }

        self.reporter.record(record).await;
    }

    /// Terminal failure path: try the fallback if supplied, otherwise
    /// return the original error. A fallback failure is logged and the
    /// original error surfaces so root cause is never masked.
    async fn resolve_failure<T>(
        &self,
        ctx: &InvokeContext,
        original: ResilienceError,
        fallback: Option<Fallback<T>>,
    ) -> Result<T> {
        if let Some(fallback) = fallback {
            debug!(operation = %ctx.operation, "Invoking fallback");
            match fallback().await {
                Ok(value) => return Ok(value),
                Err(fallback_error) => {
                    warn!(
                        operation = %ctx.operation,
                        fallback_error = %fallback_error,
                        original_error = %original,
                        "Fallback failed, surfacing original error"
                    );
                }
            }
        }
        Err(original)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn quick_invoker() -> Invoker {
        Invoker::default().with_retry_policy(
            RetryPolicy::default()
                .with_base_delay(Duration::from_millis(5))
                .with_max_delay(Duration::from_millis(20))
                .with_jitter(false),
        )
    }

    #[tokio::test]
    async fn test_invoke_passes_through_success() {
        let invoker = quick_invoker();
        let ctx = InvokeContext::new("chat");

        let result = invoker
            .invoke(|| async { Ok(42u32) }, &ctx, InvokeOptions::default())
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(
            invoker.circuit_status("op:chat").await,
            Some(CircuitState::Closed)
        );
    }

    #[tokio::test]
    async fn test_default_breaker_name_derived_from_operation() {
        let invoker = quick_invoker();
        let ctx = InvokeContext::new("weather-lookup");

        let _ = invoker
            .invoke(|| async { Ok(()) }, &ctx, InvokeOptions::default())
            .await;

        assert!(invoker.registry().get("op:weather-lookup").is_some());
    }

    #[tokio::test]
    async fn test_validation_failure_not_retried() {
        let invoker = quick_invoker();
        let ctx = InvokeContext::new("records");

        let calls = Arc::new(std::sync::atomic::AtomicU32::new(0));
        let calls_clone = calls.clone();

        let options = InvokeOptions::default()
            .with_retries(5)
            .with_validate(Arc::new(|v: &u32| *v > 10));

        let result = invoker
            .invoke(
                move || {
                    let calls = calls_clone.clone();
                    async move {
                        calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                        Ok(3u32)
                    }
                },
                &ctx,
                options,
            )
            .await;

        assert!(matches!(result, Err(ResilienceError::Validation(_))));
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_terminal_failure_reported_high() {
        let invoker = quick_invoker();
        let ctx = InvokeContext::new("chat")
            .with_user_id("u-1")
            .with_request_id("req-9");

        let result: Result<()> = invoker
            .invoke(
                || async { Err(ResilienceError::upstream(ErrorKind::Unavailable, "503")) },
                &ctx,
                InvokeOptions::default().with_retries(2),
            )
            .await;
        assert!(result.is_err());

        let errors = invoker.recent_errors(Some("chat"), None).await;
        let terminal = errors
            .iter()
            .find(|r| r.severity == Severity::High)
            .expect("terminal record present");
        assert_eq!(terminal.category, ErrorCategory::RetryExhausted);
        assert_eq!(terminal.user_id.as_deref(), Some("u-1"));
        assert_eq!(terminal.request_id.as_deref(), Some("req-9"));
        assert_eq!(terminal.attempt, Some(2));
    }

    #[tokio::test]
    async fn test_global_instance_is_shared() {
        let a = Invoker::global();
        let b = Invoker::global();
        assert!(std::ptr::eq(a, b));
    }
}

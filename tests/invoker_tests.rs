use futures::FutureExt;
use resilience::{
    BatchOptions, CircuitBreakerConfig, CircuitState, ErrorCategory, ErrorKind, InvokeContext,
    InvokeOptions, Invoker, ResilienceError, Result, RetryPolicy, Severity,
};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn quick_invoker() -> Invoker {
    Invoker::default().with_retry_policy(
        RetryPolicy::default()
            .with_base_delay(Duration::from_millis(5))
            .with_max_delay(Duration::from_millis(20))
            .with_jitter(false),
    )
}

#[tokio::test]
async fn test_transient_failures_then_success() {
    // Operation fails twice with ECONNRESET, then succeeds
    let invoker = quick_invoker();
    let ctx = InvokeContext::new("chat-completion").with_request_id("req-1");

    let attempts = Arc::new(AtomicU32::new(0));
    let attempts_clone = attempts.clone();

    let seen: Arc<Mutex<Vec<u32>>> = Arc::new(Mutex::new(Vec::new()));
    let seen_clone = seen.clone();

    let options = InvokeOptions::default()
        .with_retries(3)
        .with_on_retry(Arc::new(move |attempt, _err| {
            seen_clone.lock().unwrap().push(attempt);
        }));

    let result = invoker
        .invoke(
            move || {
                let attempts = attempts_clone.clone();
                async move {
                    let n = attempts.fetch_add(1, Ordering::SeqCst);
                    if n < 2 {
                        Err(ResilienceError::from_message("read ECONNRESET"))
                    } else {
                        Ok("hello".to_string())
                    }
                }
            },
            &ctx,
            options,
        )
        .await;

    assert_eq!(result.unwrap(), "hello");
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
    assert_eq!(*seen.lock().unwrap(), vec![1, 2]);
}

#[tokio::test]
async fn test_fallback_result_on_exhaustion() {
    let invoker = quick_invoker();
    let ctx = InvokeContext::new("chat-completion");

    let options = InvokeOptions::default()
        .with_retries(2)
        .with_fallback(Arc::new(|| {
            async { Ok("cached reply".to_string()) }.boxed()
        }));

    let result = invoker
        .invoke(
            || async { Err(ResilienceError::upstream(ErrorKind::Unavailable, "503")) },
            &ctx,
            options,
        )
        .await;

    assert_eq!(result.unwrap(), "cached reply");
}

#[tokio::test]
async fn test_failing_fallback_surfaces_original_error() {
    let invoker = quick_invoker();
    let ctx = InvokeContext::new("chat-completion");

    let options: InvokeOptions<String> = InvokeOptions::default()
        .with_retries(2)
        .with_fallback(Arc::new(|| {
            async { Err(ResilienceError::from_message("fallback store offline")) }.boxed()
        }));

    let result = invoker
        .invoke(
            || async {
                Err(ResilienceError::upstream(
                    ErrorKind::Unavailable,
                    "503 from upstream",
                ))
            },
            &ctx,
            options,
        )
        .await;

    // Root cause is the upstream error, not the fallback's
    match result {
        Err(ResilienceError::Upstream { kind, message }) => {
            assert_eq!(kind, ErrorKind::Unavailable);
            assert!(message.contains("upstream"));
        }
        other => panic!("expected original upstream error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_open_circuit_takes_fallback_path() {
    let invoker = quick_invoker();
    let ctx = InvokeContext::new("chat-completion");

    let breaker_config = CircuitBreakerConfig {
        failure_threshold: 2,
        reset_timeout_secs: 3600,
        ..Default::default()
    };

    // Trip the breaker with non-retryable failures
    for _ in 0..2 {
        let options: InvokeOptions<String> = InvokeOptions::default()
            .with_retries(1)
            .with_breaker_config(breaker_config.clone());
        let _ = invoker
            .invoke(
                || async { Err(ResilienceError::Validation("garbage response".to_string())) },
                &ctx,
                options,
            )
            .await;
    }
    assert_eq!(
        invoker.circuit_status("op:chat-completion").await,
        Some(CircuitState::Open)
    );

    // Short-circuited call still produces the fallback's result
    let ran = Arc::new(AtomicU32::new(0));
    let ran_clone = ran.clone();
    let options = InvokeOptions::default()
        .with_retries(3)
        .with_fallback(Arc::new(|| async { Ok("degraded".to_string()) }.boxed()));

    let result = invoker
        .invoke(
            move || {
                let ran = ran_clone.clone();
                async move {
                    ran.fetch_add(1, Ordering::SeqCst);
                    Ok("live".to_string())
                }
            },
            &ctx,
            options,
        )
        .await;

    assert_eq!(result.unwrap(), "degraded");
    assert_eq!(ran.load(Ordering::SeqCst), 0);

    // Admin reset restores the live path
    invoker.reset_circuit("op:chat-completion").await;
    let result = invoker
        .invoke(
            || async { Ok("live".to_string()) },
            &ctx,
            InvokeOptions::default(),
        )
        .await;
    assert_eq!(result.unwrap(), "live");
}

#[tokio::test]
async fn test_per_attempt_timeout_is_retried() {
    let invoker = quick_invoker();
    let ctx = InvokeContext::new("slow-api");

    let attempts = Arc::new(AtomicU32::new(0));
    let attempts_clone = attempts.clone();

    let options: InvokeOptions<String> = InvokeOptions::default()
        .with_retries(2)
        .with_timeout(Duration::from_millis(20));

    let result = invoker
        .invoke(
            move || {
                let attempts = attempts_clone.clone();
                async move {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    Ok("too late".to_string())
                }
            },
            &ctx,
            options,
        )
        .await;

    assert!(matches!(result, Err(ResilienceError::Timeout { .. })));
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_retry_attempts_and_terminal_failure_reported() {
    let invoker = quick_invoker();
    let ctx = InvokeContext::new("medical-records").with_user_id("patient-7");

    let result: Result<()> = invoker
        .invoke(
            || async { Err(ResilienceError::from_message("connection reset by peer")) },
            &ctx,
            InvokeOptions::default().with_retries(3),
        )
        .await;
    assert!(result.is_err());

    // Spawned retry-attempt records may lag the terminal record briefly
    tokio::time::sleep(Duration::from_millis(50)).await;

    let errors = invoker.recent_errors(Some("medical-records"), None).await;

    let retries: Vec<_> = errors
        .iter()
        .filter(|r| r.category == ErrorCategory::RetryAttempt)
        .collect();
    assert_eq!(retries.len(), 2);
    assert!(retries.iter().all(|r| r.severity == Severity::Medium));
    assert!(retries
        .iter()
        .all(|r| r.user_id.as_deref() == Some("patient-7")));

    let terminal: Vec<_> = errors
        .iter()
        .filter(|r| r.category == ErrorCategory::RetryExhausted)
        .collect();
    assert_eq!(terminal.len(), 1);
    assert_eq!(terminal[0].severity, Severity::High);
    assert_eq!(terminal[0].kind, ErrorKind::Connection);
    assert_eq!(terminal[0].attempt, Some(3));
}

#[tokio::test]
async fn test_custom_matcher_extends_retryable_set() {
    let invoker = quick_invoker();
    let ctx = InvokeContext::new("image-gen");

    let attempts = Arc::new(AtomicU32::new(0));
    let attempts_clone = attempts.clone();

    let options: InvokeOptions<()> = InvokeOptions::default()
        .with_retries(3)
        .with_retryable_matchers(vec!["model warming up".to_string()]);

    let result = invoker
        .invoke(
            move || {
                let attempts = attempts_clone.clone();
                async move {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    Err(ResilienceError::upstream(
                        ErrorKind::Other,
                        "Model Warming Up, try again",
                    ))
                }
            },
            &ctx,
            options,
        )
        .await;

    assert!(result.is_err());
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_batch_of_resilient_calls() {
    let invoker = Arc::new(quick_invoker());

    let mut calls = Vec::new();
    for i in 0..6u32 {
        let invoker = invoker.clone();
        calls.push(
            async move {
                let ctx = InvokeContext::new("reminder-email");
                invoker
                    .invoke(
                        move || async move {
                            if i == 4 {
                                Err(ResilienceError::Validation("bad template".to_string()))
                            } else {
                                Ok(i)
                            }
                        },
                        &ctx,
                        InvokeOptions::default().with_retries(1),
                    )
                    .await
            }
            .boxed(),
        );
    }

    let outcomes = invoker
        .invoke_batch(calls, BatchOptions::default().with_concurrency(3))
        .await
        .unwrap();

    assert_eq!(outcomes.len(), 6);
    assert_eq!(outcomes.iter().filter(|o| o.is_success()).count(), 5);
}

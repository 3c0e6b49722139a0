use crate::error::{ResilienceError, Result};
use futures::future::{join_all, BoxFuture};
use tracing::{debug, warn};

/// Knobs for [`execute_batch`]
#[derive(Debug, Clone)]
pub struct BatchOptions {
    /// Maximum calls in flight at once
    pub concurrency: usize,
    /// Abort remaining chunks after the first observed failure
    pub stop_on_error: bool,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            concurrency: 5,
            stop_on_error: false,
        }
    }
}

impl BatchOptions {
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_stop_on_error(mut self, stop_on_error: bool) -> Self {
        self.stop_on_error = stop_on_error;
        self
    }
}

/// Outcome of one call within a batch
#[derive(Debug)]
pub enum BatchOutcome<T> {
    Success(T),
    Failure(ResilienceError),
}

impl<T> BatchOutcome<T> {
    pub fn is_success(&self) -> bool {
        matches!(self, BatchOutcome::Success(_))
    }

    pub fn into_result(self) -> Result<T> {
        match self {
            BatchOutcome::Success(value) => Ok(value),
            BatchOutcome::Failure(error) => Err(error),
        }
    }
}

/// Run many calls with bounded concurrency.
///
/// Calls are partitioned into sequential chunks of `concurrency`; a
/// chunk is fully drained, successes and failures alike, before the
/// next chunk starts. Chunking bounds pressure on the downstream
/// dependency and gives breaker accounting a chance to trip between
/// waves instead of after an unbounded fan-out.
///
/// With `stop_on_error`, the first failure observed while draining a
/// chunk aborts the remaining chunks and propagates that error.
pub async fn execute_batch<T>(
    calls: Vec<BoxFuture<'_, Result<T>>>,
    options: BatchOptions,
) -> Result<Vec<BatchOutcome<T>>> {
    let total = calls.len();
    let concurrency = options.concurrency.max(1);
    debug!(total, concurrency, "Starting batch execution");

    let mut outcomes = Vec::with_capacity(total);
    let mut remaining = calls;

    while !remaining.is_empty() {
        let take = remaining.len().min(concurrency);
        let chunk: Vec<_> = remaining.drain(..take).collect();

        let results = join_all(chunk).await;

        let mut first_error: Option<ResilienceError> = None;
        for result in results {
            match result {
                Ok(value) => outcomes.push(BatchOutcome::Success(value)),
                Err(error) => {
                    if first_error.is_none() {
                        first_error = Some(error.clone());
                    }
                    outcomes.push(BatchOutcome::Failure(error));
                }
            }
        }

        if options.stop_on_error {
            if let Some(error) = first_error {
                warn!(
                    completed = outcomes.len(),
                    skipped = remaining.len(),
                    error = %error,
                    "Batch aborted on first error"
                );
                return Err(error);
            }
        }
    }

    debug!(
        total,
        failed = outcomes.iter().filter(|o| !o.is_success()).count(),
        "Batch execution complete"
    );
    Ok(outcomes)
}
